//! Error types for Ensemble

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum EnsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid control table: {0}")]
    ControlTable(#[from] ControlTableError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias
pub type EnsResult<T> = Result<T, EnsError>;

/// Structural problems in a scene control table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlTableError {
    #[error("scene '{scene}' declares control id {id} twice")]
    DuplicateId { scene: String, id: i64 },

    #[error("scene '{scene}' declares control name '{name}' twice")]
    DuplicateName { scene: String, name: String },

    #[error("scene '{scene}' uses reserved control id {id}")]
    ReservedId { scene: String, id: i64 },

    #[error("scene '{scene}' control '{name}' has min > max")]
    EmptyRange { scene: String, name: String },

    #[error("scene '{0}' declared twice")]
    DuplicateScene(String),

    #[error("registry has no scenes")]
    NoScenes,
}

/// Why a value was refused by a control's range check
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValueError {
    #[error("value {0} is not a finite integer")]
    NotIntegral(f64),

    #[error("value {value} outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
}
