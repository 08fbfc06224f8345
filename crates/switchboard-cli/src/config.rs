//! Configuration loading from `~/.switchboard/config.toml` with defaults.

use std::path::{Path, PathBuf};
use switchboard_types::config::SwitchboardConfig;
use tracing::{info, warn};

/// Where the effective configuration came from.
#[derive(Debug)]
pub enum ConfigSource {
    Loaded(PathBuf),
    NotFound(PathBuf),
    Unreadable { path: PathBuf, error: String },
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    /// Report the outcome. Called once logging is installed, since the log
    /// level itself comes from the file.
    pub fn log(&self) {
        match self {
            ConfigSource::Loaded(path) => {
                info!(path = %path.display(), "Loaded configuration")
            }
            ConfigSource::NotFound(path) => {
                info!(path = %path.display(), "Config file not found, using defaults")
            }
            ConfigSource::Unreadable { path, error } => warn!(
                error = %error,
                path = %path.display(),
                "Failed to read config file, using defaults"
            ),
            ConfigSource::Invalid { path, error } => warn!(
                error = %error,
                path = %path.display(),
                "Failed to parse config, using defaults"
            ),
        }
    }
}

/// Load configuration from a TOML file. Any problem falls back to defaults.
pub fn load_config(path: Option<&Path>) -> (SwitchboardConfig, ConfigSource) {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        return (SwitchboardConfig::default(), ConfigSource::NotFound(config_path));
    }
    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) => {
            return (
                SwitchboardConfig::default(),
                ConfigSource::Unreadable {
                    path: config_path,
                    error: e.to_string(),
                },
            )
        }
    };
    match toml::from_str::<SwitchboardConfig>(&contents) {
        Ok(config) => (config, ConfigSource::Loaded(config_path)),
        Err(e) => (
            SwitchboardConfig::default(),
            ConfigSource::Invalid {
                path: config_path,
                error: e.to_string(),
            },
        ),
    }
}

/// Default config path: `~/.switchboard/config.toml`.
pub fn default_config_path() -> PathBuf {
    switchboard_home().join("config.toml")
}

/// Default Switchboard home directory.
pub fn switchboard_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".switchboard")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, source) = load_config(Some(&path));
        assert_eq!(config, SwitchboardConfig::default());
        assert!(matches!(source, ConfigSource::NotFound(_)));
    }

    #[test]
    fn test_load_config_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[broker]
listen_addr = "0.0.0.0:6000"
stale_after_secs = 10
"#
        )
        .unwrap();

        let (config, source) = load_config(Some(file.path()));
        assert!(matches!(source, ConfigSource::Loaded(_)));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.broker.listen_addr.port(), 6000);
        assert_eq!(config.broker.stale_after_secs, 10);
        assert_eq!(config.broker.poll_interval_ms, 20);
        assert_eq!(config.device, Default::default());
    }

    #[test]
    fn test_load_config_invalid_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\nlisten_addr = 42").unwrap();

        let (config, source) = load_config(Some(file.path()));
        assert_eq!(config, SwitchboardConfig::default());
        assert!(matches!(source, ConfigSource::Invalid { .. }));
    }

    #[test]
    fn test_default_path() {
        assert!(default_config_path().ends_with(".switchboard/config.toml"));
    }
}
