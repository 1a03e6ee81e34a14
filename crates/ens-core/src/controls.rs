//! Scene-aware Control Registry
//!
//! Maps a numeric control id *and* a name to one validated-range control
//! definition per scene, so the integer-only datagram wire and the named UI
//! share one source of truth. Adding a control is one table row.
//!
//! Ids `0` and `100` are reserved across all scenes: `0` means "no target"
//! on the wire, `100` is the global scene-select control.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::{ControlTableError, ValueError};

/// Reserved id: no target / global slot on the wire
pub const NO_TARGET_ID: i64 = 0;

/// Reserved id of the global scene-select control
pub const SCENE_SELECT_ID: i64 = 100;

/// Name of the global scene-select control
pub const SCENE_SELECT_NAME: &str = "scene";

pub const PITCH: &str = "pitch";
pub const INTERVAL: &str = "interval";

/// Scene active at boot
pub const DEFAULT_SCENE: &str = "audioScore";

/// Fallbacks used when a scene does not define pitch/interval
pub const FALLBACK_PITCH: i64 = 69;
pub const FALLBACK_INTERVAL: i64 = 1000;

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROL REFERENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// A control addressed either by numeric id or by name
///
/// Deserializes from a bare JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlRef {
    ById(i64),
    ByName(String),
}

impl From<i64> for ControlRef {
    fn from(id: i64) -> Self {
        Self::ById(id)
    }
}

impl From<i32> for ControlRef {
    fn from(id: i32) -> Self {
        Self::ById(id as i64)
    }
}

impl From<&str> for ControlRef {
    fn from(name: &str) -> Self {
        Self::ByName(name.to_string())
    }
}

impl From<String> for ControlRef {
    fn from(name: String) -> Self {
        Self::ByName(name)
    }
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ById(id) => write!(f, "#{id}"),
            Self::ByName(name) => write!(f, "'{name}'"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// One controllable parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDefinition {
    pub id: i64,
    pub name: String,
    pub min: i64,
    pub max: i64,
    /// UI slider granularity; not enforced on apply
    pub step: i64,
    pub default_value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ControlDefinition {
    pub fn new(id: i64, name: &str, min: i64, max: i64, step: i64, default_value: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            min,
            max,
            step,
            default_value,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Range check performed at apply time. Never clamps.
    pub fn validate(&self, value: f64) -> Result<i64, ValueError> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(ValueError::NotIntegral(value));
        }
        let value = value as i64;
        if value < self.min || value > self.max {
            return Err(ValueError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(value)
    }

    pub fn accepts(&self, value: f64) -> bool {
        self.validate(value).is_ok()
    }

    fn matches(&self, control: &ControlRef) -> bool {
        match control {
            ControlRef::ById(id) => self.id == *id,
            ControlRef::ByName(name) => self.name == *name,
        }
    }
}

/// Ordered control table of one scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneControls {
    pub scene_name: String,
    pub controls: Vec<ControlDefinition>,
}

/// Built-in "audioScore" scene: per-player pitch and pulse interval
pub fn audio_score_controls() -> SceneControls {
    SceneControls {
        scene_name: DEFAULT_SCENE.to_string(),
        controls: vec![
            ControlDefinition::new(1, PITCH, 36, 84, 1, FALLBACK_PITCH).with_unit("MIDI"),
            ControlDefinition::new(2, INTERVAL, 50, 3000, 50, FALLBACK_INTERVAL).with_unit("ms"),
        ],
    }
}

/// Initial pitch/interval handed to a newly joined player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDefaults {
    pub pitch: i64,
    pub interval: i64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// All scenes plus the global controls that resolve in every scene
#[derive(Debug, Clone)]
pub struct ControlRegistry {
    scenes: Vec<SceneControls>,
    globals: Vec<ControlDefinition>,
}

impl Default for ControlRegistry {
    fn default() -> Self {
        Self::from_validated(vec![audio_score_controls()])
    }
}

impl ControlRegistry {
    /// Build a registry from scene tables, rejecting structural mistakes
    pub fn new(scenes: Vec<SceneControls>) -> Result<Self, ControlTableError> {
        validate_tables(&scenes)?;
        log::debug!(
            "[Controls] {} scene table(s): {}",
            scenes.len(),
            scenes
                .iter()
                .map(|s| s.scene_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self::from_validated(scenes))
    }

    fn from_validated(scenes: Vec<SceneControls>) -> Self {
        let last_index = scenes.len().saturating_sub(1) as i64;
        let globals = vec![ControlDefinition::new(
            SCENE_SELECT_ID,
            SCENE_SELECT_NAME,
            0,
            last_index,
            1,
            0,
        )];
        Self { scenes, globals }
    }

    /// Resolve a control by id or name within `scene`
    ///
    /// Global controls resolve regardless of scene. An unknown scene still
    /// resolves globals so a scene-select can recover from it.
    pub fn resolve(&self, scene: &str, control: &ControlRef) -> Option<&ControlDefinition> {
        if let Some(global) = self.globals.iter().find(|c| c.matches(control)) {
            return Some(global);
        }
        self.scene(scene)?.controls.iter().find(|c| c.matches(control))
    }

    pub fn scene(&self, name: &str) -> Option<&SceneControls> {
        self.scenes.iter().find(|s| s.scene_name == name)
    }

    pub fn has_scene(&self, name: &str) -> bool {
        self.scene(name).is_some()
    }

    /// Scene name at `index` in table order (scene-select value mapping)
    pub fn scene_at(&self, index: i64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.scenes.get(i))
            .map(|s| s.scene_name.as_str())
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.scene_name.clone()).collect()
    }

    /// Controls of `scene`; empty for an unknown scene
    pub fn controls(&self, scene: &str) -> &[ControlDefinition] {
        self.scene(scene).map(|s| s.controls.as_slice()).unwrap_or(&[])
    }

    pub fn globals(&self) -> &[ControlDefinition] {
        &self.globals
    }

    pub fn player_defaults(&self, scene: &str) -> PlayerDefaults {
        let default_of = |name: &str, fallback: i64| {
            self.resolve(scene, &ControlRef::from(name))
                .map(|c| c.default_value)
                .unwrap_or(fallback)
        };
        PlayerDefaults {
            pitch: default_of(PITCH, FALLBACK_PITCH),
            interval: default_of(INTERVAL, FALLBACK_INTERVAL),
        }
    }
}

fn validate_tables(scenes: &[SceneControls]) -> Result<(), ControlTableError> {
    if scenes.is_empty() {
        return Err(ControlTableError::NoScenes);
    }
    let mut scene_names = HashSet::new();
    for scene in scenes {
        if !scene_names.insert(scene.scene_name.as_str()) {
            return Err(ControlTableError::DuplicateScene(scene.scene_name.clone()));
        }
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for control in &scene.controls {
            if control.id == NO_TARGET_ID
                || control.id == SCENE_SELECT_ID
                || control.name == SCENE_SELECT_NAME
            {
                return Err(ControlTableError::ReservedId {
                    scene: scene.scene_name.clone(),
                    id: control.id,
                });
            }
            if !ids.insert(control.id) {
                return Err(ControlTableError::DuplicateId {
                    scene: scene.scene_name.clone(),
                    id: control.id,
                });
            }
            if !names.insert(control.name.as_str()) {
                return Err(ControlTableError::DuplicateName {
                    scene: scene.scene_name.clone(),
                    name: control.name.clone(),
                });
            }
            if control.min > control.max {
                return Err(ControlTableError::EmptyRange {
                    scene: scene.scene_name.clone(),
                    name: control.name.clone(),
                });
            }
        }
    }
    Ok(())
}
