//! `bundlepatch.ini` loading and saving.
//!
//! ```ini
//! [patch]
//! play_mode = host
//! packages = main, dlc_maps
//! semantic_patch = false
//! repair_retry_budget = 1
//! state_delay_ms = 100
//! skip_main_download = false
//!
//! [server]
//! host = https://cdn.example.com/game
//! fallback_host = https://backup.example.com/game
//! app_config_url =
//! patch_config_url =
//! timeout_secs = 30
//!
//! [download]
//! max_concurrency = 10
//! max_retry = 3
//! check_disk_space = true
//!
//! [paths]
//! installation_dir = /opt/game/content
//! sandbox_dir = ~/.local/share/bundlepatch
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::settings::{PatchSettings, PlayMode};
use crate::version::SemanticRule;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Contents of `bundlepatch.ini`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Settings for the orchestrator.
    pub settings: PatchSettings,
    /// Package names, in patch order.
    pub packages: Vec<String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            settings: PatchSettings::default(),
            packages: vec!["main".to_string()],
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }
        self.to_ini()
            .write_to_file(path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    fn to_ini(&self) -> Ini {
        let s = &self.settings;
        let mut ini = Ini::new();

        ini.with_section(Some("patch"))
            .set("play_mode", s.play_mode.as_str())
            .set("packages", self.packages.join(", "))
            .set("semantic_patch", s.semantic_rule.patch.to_string())
            .set("repair_retry_budget", s.repair_retry_budget.to_string())
            .set("state_delay_ms", s.state_delay.as_millis().to_string())
            .set("skip_main_download", s.skip_main_download.to_string());

        ini.with_section(Some("server"))
            .set("host", s.default_host.clone().unwrap_or_default())
            .set("fallback_host", s.fallback_host.clone().unwrap_or_default())
            .set("app_config_url", s.app_config_url.clone().unwrap_or_default())
            .set(
                "patch_config_url",
                s.patch_config_url.clone().unwrap_or_default(),
            )
            .set("timeout_secs", s.http_timeout.as_secs().to_string());

        ini.with_section(Some("download"))
            .set("max_concurrency", s.max_concurrency.to_string())
            .set("max_retry", s.max_retry.to_string())
            .set("check_disk_space", s.check_disk_space.to_string());

        ini.with_section(Some("paths"))
            .set("installation_dir", s.installation_dir.display().to_string())
            .set("sandbox_dir", s.sandbox_dir.display().to_string());

        ini
    }
}

/// Directory holding the config file.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bundlepatch")
}

/// Default config file location.
pub fn config_file_path() -> PathBuf {
    config_directory().join("bundlepatch.ini")
}

/// Overlay the values found in `ini` onto the defaults.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();
    let s = &mut config.settings;

    if let Some(section) = ini.section(Some("patch")) {
        if let Some(v) = section.get("play_mode") {
            s.play_mode = PlayMode::from_str(v).map_err(|reason| invalid("patch", "play_mode", v, &reason))?;
        }
        if let Some(v) = section.get("packages") {
            let names: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if names.is_empty() {
                return Err(invalid("patch", "packages", v, "at least one package is required"));
            }
            config.packages = names;
        }
        if let Some(v) = section.get("semantic_patch") {
            let patch = parse_bool("patch", "semantic_patch", v)?;
            s.semantic_rule = SemanticRule { patch, ..SemanticRule::default() };
        }
        if let Some(v) = section.get("repair_retry_budget") {
            s.repair_retry_budget = parse_number("patch", "repair_retry_budget", v)?;
        }
        if let Some(v) = section.get("state_delay_ms") {
            s.state_delay = Duration::from_millis(parse_number("patch", "state_delay_ms", v)?);
        }
        if let Some(v) = section.get("skip_main_download") {
            s.skip_main_download = parse_bool("patch", "skip_main_download", v)?;
        }
    }

    if let Some(section) = ini.section(Some("server")) {
        s.default_host = non_empty(section.get("host")).or(s.default_host.take());
        s.fallback_host = non_empty(section.get("fallback_host")).or(s.fallback_host.take());
        s.app_config_url = non_empty(section.get("app_config_url")).or(s.app_config_url.take());
        s.patch_config_url =
            non_empty(section.get("patch_config_url")).or(s.patch_config_url.take());
        if let Some(v) = section.get("timeout_secs") {
            s.http_timeout = Duration::from_secs(parse_number("server", "timeout_secs", v)?);
        }
    }

    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("max_concurrency") {
            let max: usize = parse_number("download", "max_concurrency", v)?;
            if max == 0 {
                return Err(invalid("download", "max_concurrency", v, "must be at least 1"));
            }
            s.max_concurrency = max;
        }
        if let Some(v) = section.get("max_retry") {
            s.max_retry = parse_number("download", "max_retry", v)?;
        }
        if let Some(v) = section.get("check_disk_space") {
            s.check_disk_space = parse_bool("download", "check_disk_space", v)?;
        }
    }

    if let Some(section) = ini.section(Some("paths")) {
        if let Some(v) = non_empty(section.get("installation_dir")) {
            s.installation_dir = expand_tilde(&v);
        }
        if let Some(v) = non_empty(section.get("sandbox_dir")) {
            s.sandbox_dir = expand_tilde(&v);
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        let ini = Ini::load_from_str(text).unwrap();
        parse_ini(&ini)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("nope.ini")).unwrap();
        assert_eq!(config.packages, vec!["main".to_string()]);
        assert_eq!(config.settings.play_mode, PlayMode::Host);
    }

    #[test]
    fn test_overlay_values() {
        let config = parse(
            "[patch]\nplay_mode = offline\npackages = main, dlc_maps ,\nsemantic_patch = yes\n\
             [server]\nhost = https://cdn.example.com\n\
             [download]\nmax_concurrency = 4\nmax_retry = 0\ncheck_disk_space = off\n\
             [paths]\nsandbox_dir = /tmp/sbx\n",
        )
        .unwrap();

        assert_eq!(config.packages, vec!["main", "dlc_maps"]);
        let s = &config.settings;
        assert_eq!(s.play_mode, PlayMode::Offline);
        assert!(s.semantic_rule.patch);
        assert_eq!(s.default_host.as_deref(), Some("https://cdn.example.com"));
        assert_eq!(s.max_concurrency, 4);
        assert_eq!(s.max_retry, 0);
        assert!(!s.check_disk_space);
        assert_eq!(s.sandbox_dir, PathBuf::from("/tmp/sbx"));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = parse("[download]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigFileError::InvalidValue { ref key, .. } if key == "max_concurrency"
        ));

        let err = parse("[patch]\nplay_mode = cloud\n").unwrap_err();
        assert!(err.to_string().contains("patch.play_mode"));

        assert!(parse("[download]\ncheck_disk_space = maybe\n").is_err());
        assert!(parse("[patch]\npackages = ,\n").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("bundlepatch.ini");

        let mut config = ConfigFile::default();
        config.packages = vec!["core".into(), "extra".into()];
        config.settings = PatchSettings::new(PathBuf::from("/srv/sandbox"))
            .with_host("https://cdn.example.com")
            .with_max_retry(7)
            .with_state_delay(Duration::from_millis(0));
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.packages, config.packages);
        assert_eq!(loaded.settings.max_retry, 7);
        assert_eq!(loaded.settings.state_delay, Duration::ZERO);
        assert_eq!(loaded.settings.sandbox_dir, PathBuf::from("/srv/sandbox"));
        assert!(loaded.settings.fallback_host.is_none());
    }
}
