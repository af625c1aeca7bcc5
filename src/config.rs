use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::{KeyCode, Movement, MovementBindings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown key name `{0}` in bindings")]
    UnknownKey(String),
    #[error("window size {width}x{height} must be non-zero")]
    InvalidSize { width: u32, height: u32 },
}

/// Host settings, loadable from a JSON file. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Render module artifact; defaults to the cdylib next to the executable.
    pub module_path: Option<PathBuf>,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub frame_interval_ms: u64,
    pub reload_retry_ms: u64,
    /// Directory for per-generation copies of the module.
    pub shadow_dir: Option<PathBuf>,
    /// Key name to movement, e.g. `"W": "forward"`.
    pub bindings: BTreeMap<String, Movement>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let bindings = [
            ("W", Movement::Forward),
            ("A", Movement::StrafeLeft),
            ("S", Movement::Backward),
            ("D", Movement::StrafeRight),
            ("Space", Movement::Up),
            ("LeftShift", Movement::Down),
        ]
        .into_iter()
        .map(|(key, movement)| (key.to_string(), movement))
        .collect();
        Self {
            module_path: None,
            title: "compute raytracer".to_string(),
            width: 640,
            height: 360,
            vsync: false,
            frame_interval_ms: 16,
            reload_retry_ms: 50,
            shadow_dir: None,
            bindings,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        self.movement_bindings().map(|_| ())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn reload_retry(&self) -> Duration {
        Duration::from_millis(self.reload_retry_ms)
    }

    pub fn module_path(&self) -> PathBuf {
        self.module_path.clone().unwrap_or_else(default_module_path)
    }

    pub fn shadow_dir(&self) -> PathBuf {
        self.shadow_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("hotray-shadow"))
    }

    pub fn movement_bindings(&self) -> Result<MovementBindings, ConfigError> {
        let mut bindings = MovementBindings::empty();
        for (name, movement) in &self.bindings {
            let key = KeyCode::from_name(name).ok_or_else(|| ConfigError::UnknownKey(name.clone()))?;
            bindings.bind(key, *movement);
        }
        Ok(bindings)
    }
}

fn default_module_path() -> PathBuf {
    let file_name = libloading::library_filename("hotray");
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_reference_window() {
        let config = HostConfig::default();
        assert_eq!(config.title, "compute raytracer");
        assert_eq!((config.width, config.height), (640, 360));
        assert_eq!(config.reload_retry(), Duration::from_millis(50));
        assert_eq!(
            config.movement_bindings().unwrap(),
            MovementBindings::default()
        );
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let file = write_config(r#"{ "width": 320, "module_path": "/tmp/libhotray.so" }"#);
        let config = HostConfig::load(file.path()).unwrap();
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 360);
        assert_eq!(config.module_path(), PathBuf::from("/tmp/libhotray.so"));
    }

    #[test]
    fn bindings_are_parsed_by_key_name() {
        let file = write_config(r#"{ "bindings": { "Up": "forward", "E": "up" } }"#);
        let config = HostConfig::load(file.path()).unwrap();
        let bindings = config.movement_bindings().unwrap();
        assert_eq!(
            bindings.movement_for(KeyCode::from_name("Up").unwrap()),
            Some(Movement::Forward)
        );
        assert_eq!(
            bindings.movement_for(KeyCode::Character('E')),
            Some(Movement::Up)
        );
        assert_eq!(bindings.movement_for(KeyCode::Character('W')), None);
    }

    #[test]
    fn invalid_files_are_rejected() {
        let file = write_config(r#"{ "bindings": { "Hyper": "forward" } }"#);
        assert!(matches!(
            HostConfig::load(file.path()),
            Err(ConfigError::UnknownKey(name)) if name == "Hyper"
        ));

        let file = write_config(r#"{ "height": 0 }"#);
        assert!(matches!(
            HostConfig::load(file.path()),
            Err(ConfigError::InvalidSize { .. })
        ));

        let file = write_config("{ not json");
        assert!(matches!(
            HostConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            HostConfig::load(Path::new("/definitely/missing/hotray.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
