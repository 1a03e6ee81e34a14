use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ens_core::{EnsError, EnsResult};
use ens_session::Mp3Config;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "ENSEMBLE_CONFIG";
/// Looked up in the working directory when nothing else is given
pub const CONFIG_FILE: &str = "ensemble.config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// `null` disables the datagram listener
    pub osc_addr: Option<SocketAddr>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub mp3_slots: usize,
    pub play_lead_ms: u64,
    pub late_join_lead_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            osc_addr: Some(SocketAddr::from(([0, 0, 0, 0], 57121))),
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 50 * 1024 * 1024,
            mp3_slots: 8,
            play_lead_ms: 2000,
            late_join_lead_ms: 500,
        }
    }
}

impl ServerConfig {
    /// Resolve and load the configuration
    ///
    /// Order: `explicit` path, then `$ENSEMBLE_CONFIG`, then
    /// `./ensemble.config.json` if it exists, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> EnsResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_path(Path::new(&path));
        }
        let local = std::env::current_dir()?.join(CONFIG_FILE);
        if local.exists() {
            return Self::load_from_path(&local);
        }
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> EnsResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EnsError::Config(format!("failed to read {}: {e}", path.display())))?;
        let cfg: Self = serde_json::from_str(&raw)
            .map_err(|e| EnsError::Config(format!("invalid {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EnsResult<()> {
        if self.mp3_slots == 0 {
            return Err(EnsError::Config("mp3_slots must be at least 1".into()));
        }
        if self.play_lead_ms == 0 || self.late_join_lead_ms == 0 {
            return Err(EnsError::Config("lead times must be positive".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(EnsError::Config("max_upload_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn mp3_config(&self) -> Mp3Config {
        Mp3Config {
            slots: self.mp3_slots,
            play_lead_ms: self.play_lead_ms as f64,
            late_join_lead_ms: self.late_join_lead_ms as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(r#"{"mp3_slots": 4, "listen_addr": "127.0.0.1:9000"}"#);
        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.mp3_slots, 4);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.play_lead_ms, 2000);
        assert!(cfg.osc_addr.is_some());
    }

    #[test]
    fn test_null_osc_disables_listener() {
        let file = write_config(r#"{"osc_addr": null}"#);
        let cfg = ServerConfig::load_from_path(file.path()).unwrap();
        assert_eq!(cfg.osc_addr, None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let zero_slots = write_config(r#"{"mp3_slots": 0}"#);
        assert!(matches!(
            ServerConfig::load_from_path(zero_slots.path()),
            Err(EnsError::Config(_))
        ));

        let garbage = write_config("{not json");
        assert!(matches!(
            ServerConfig::load_from_path(garbage.path()),
            Err(EnsError::Config(_))
        ));
    }

    #[test]
    fn test_mp3_config_conversion() {
        let mp3 = ServerConfig::default().mp3_config();
        assert_eq!(mp3, Mp3Config::default());
    }
}
