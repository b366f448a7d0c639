//! Config file: `[engine]` and `[session]` tables, defaults for anything missing

use std::path::{Path, PathBuf};

use maestro_core::{Settings, Style};
use maestro_services::EngineConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub session: SessionConfig,
}

/// Starting point of a session; everything can be changed live afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub style: String,
    pub key: String,
    pub bpm: f32,
    pub intensity: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            style: "rock".into(),
            key: "A min".into(),
            bpm: 110.0,
            intensity: 50,
        }
    }
}

impl SessionConfig {
    /// Initial settings. A bad field is reported and left at its default.
    pub fn to_settings(&self) -> Settings {
        let mut settings = Settings::default();
        match Style::parse(&self.style) {
            Ok(style) => settings.apply_style(style),
            Err(e) => warn!("Ignoring session style: {}", e),
        }
        let fields = [
            ("key", self.key.clone()),
            ("bpm", self.bpm.to_string()),
            ("intensity", self.intensity.to_string()),
        ];
        for (param, value) in fields {
            if let Err(e) = settings.set_param(param, &value) {
                warn!("Ignoring session {}: {}", param, e);
            }
        }
        settings
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("maestro")
        .join("config.toml")
}

/// Read `path`, or the default location. Missing or unreadable files give defaults.
pub fn load_config(path: Option<&Path>) -> AppConfig {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let Ok(text) = std::fs::read_to_string(&path) else {
        info!("No config at {}, using defaults", path.display());
        return AppConfig::default();
    };
    match toml::from_str(&text) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Invalid config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_file() {
        let text = r#"
            [engine]
            block_size = 512
            stall_timeout_ms = 250
            queue_blocks = 3
            seed = 11

            [session]
            style = "edm"
            key = "F# dorian"
            bpm = 128
            intensity = 70
        "#;
        let config: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(config.engine.block_size, 512);
        assert_eq!(config.engine.queue_blocks, 3);
        assert_eq!(config.engine.seed, 11);
        assert_eq!(config.session.style, "edm");

        let settings = config.session.to_settings();
        assert_eq!(settings.style, Style::Edm);
        assert_eq!(settings.tempo, 128.0);
        assert_eq!(settings.intensity, 70);
        assert_eq!(settings.key.name(), "F# dorian");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str("[session]\nbpm = 90\n").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.session.bpm, 90.0);
        assert_eq!(config.session.style, "rock");
    }

    #[test]
    fn test_bad_session_fields_fall_back() {
        let session = SessionConfig {
            style: "polka".into(),
            key: "H major".into(),
            bpm: 1000.0,
            intensity: 40,
        };
        let settings = session.to_settings();
        let defaults = Settings::default();
        assert_eq!(settings.style, defaults.style);
        assert_eq!(settings.key, defaults.key);
        assert_eq!(settings.tempo, 300.0);
        assert_eq!(settings.intensity, 40);
    }

    #[test]
    fn test_missing_and_invalid_files_give_defaults() {
        let dir = std::env::temp_dir().join(format!("maestro-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        assert_eq!(load_config(Some(&dir.join("absent.toml"))), AppConfig::default());

        let broken = dir.join("broken.toml");
        std::fs::write(&broken, "[engine\nblock_size = ").unwrap();
        assert_eq!(load_config(Some(&broken)), AppConfig::default());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
