//! Runtime settings for a patch run.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::join_location;
use crate::version::SemanticRule;

/// App config file name, in the installation dir, sandbox and on the server.
pub const APP_CONFIG_FILE_NAME: &str = "appconfig.json";

/// Patch config (download groups) file name on the server.
pub const PATCH_CONFIG_FILE_NAME: &str = "patchconfig.json";

/// Default number of concurrent file transfers per downloader.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default retries per file after the first attempt.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Default number of failed repairs reported before repair proceeds anyway.
pub const DEFAULT_REPAIR_RETRY_BUDGET: u32 = 1;

/// Default pause on entry to the heavier states (100ms).
pub const DEFAULT_STATE_DELAY_MS: u64 = 100;

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Where package content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Content is read in place; nothing is checked or downloaded.
    EditorSimulate,
    /// Content ships with the installation; no network access.
    Offline,
    /// Content is patched from a host server.
    #[default]
    Host,
    /// Like `Host`, on a platform with no queryable disk space.
    Web,
}

impl PlayMode {
    /// Whether this mode talks to a content server.
    pub fn is_networked(&self) -> bool {
        matches!(self, Self::Host | Self::Web)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EditorSimulate => "simulate",
            Self::Offline => "offline",
            Self::Host => "host",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulate" | "editor-simulate" | "editor_simulate" => Ok(Self::EditorSimulate),
            "offline" => Ok(Self::Offline),
            "host" => Ok(Self::Host),
            "web" | "webgl" => Ok(Self::Web),
            other => Err(format!("unknown play mode '{}'", other)),
        }
    }
}

/// Settings for one orchestration instance.
#[derive(Debug, Clone)]
pub struct PatchSettings {
    /// Where package content comes from.
    pub play_mode: PlayMode,

    /// Granularity of the app-version comparison.
    pub semantic_rule: SemanticRule,

    /// Read-only installation directory holding the shipped app config and
    /// builtin bundles.
    pub installation_dir: PathBuf,

    /// Writable directory for the app config mirror, package caches and the
    /// last group selection.
    pub sandbox_dir: PathBuf,

    /// Remote app config location. Defaults to `<default_host>/appconfig.json`.
    pub app_config_url: Option<String>,

    /// Remote patch config location. Defaults to `<default_host>/patchconfig.json`.
    pub patch_config_url: Option<String>,

    /// Content server root; packages live under `<default_host>/<package>`.
    pub default_host: Option<String>,

    /// Secondary content server tried after the default host fails.
    pub fallback_host: Option<String>,

    /// Concurrent file transfers per downloader.
    pub max_concurrency: usize,

    /// Retries per file after the first attempt.
    pub max_retry: u32,

    /// Whether to refuse downloads that do not fit on disk.
    pub check_disk_space: bool,

    /// Failed repairs reported before repair proceeds anyway.
    pub repair_retry_budget: u32,

    /// Pause on entry to the heavier states.
    pub state_delay: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,

    /// Go from manifest update straight to cleanup.
    pub skip_main_download: bool,
}

impl Default for PatchSettings {
    fn default() -> Self {
        let sandbox_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("bundlepatch");
        Self {
            play_mode: PlayMode::default(),
            semantic_rule: SemanticRule::default(),
            installation_dir: PathBuf::from("."),
            sandbox_dir,
            app_config_url: None,
            patch_config_url: None,
            default_host: None,
            fallback_host: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retry: DEFAULT_MAX_RETRY,
            check_disk_space: true,
            repair_retry_budget: DEFAULT_REPAIR_RETRY_BUDGET,
            state_delay: Duration::from_millis(DEFAULT_STATE_DELAY_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            skip_main_download: false,
        }
    }
}

impl PatchSettings {
    /// Settings with the given sandbox directory.
    pub fn new(sandbox_dir: PathBuf) -> Self {
        Self {
            sandbox_dir,
            ..Default::default()
        }
    }

    pub fn with_play_mode(mut self, mode: PlayMode) -> Self {
        self.play_mode = mode;
        self
    }

    pub fn with_semantic_rule(mut self, rule: SemanticRule) -> Self {
        self.semantic_rule = rule;
        self
    }

    pub fn with_installation_dir(mut self, dir: PathBuf) -> Self {
        self.installation_dir = dir;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.default_host = Some(host.into());
        self
    }

    pub fn with_fallback_host(mut self, host: impl Into<String>) -> Self {
        self.fallback_host = Some(host.into());
        self
    }

    pub fn with_app_config_url(mut self, url: impl Into<String>) -> Self {
        self.app_config_url = Some(url.into());
        self
    }

    pub fn with_patch_config_url(mut self, url: impl Into<String>) -> Self {
        self.patch_config_url = Some(url.into());
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_max_retry(mut self, retries: u32) -> Self {
        self.max_retry = retries;
        self
    }

    pub fn with_check_disk_space(mut self, check: bool) -> Self {
        self.check_disk_space = check;
        self
    }

    pub fn with_repair_retry_budget(mut self, budget: u32) -> Self {
        self.repair_retry_budget = budget;
        self
    }

    pub fn with_state_delay(mut self, delay: Duration) -> Self {
        self.state_delay = delay;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_skip_main_download(mut self, skip: bool) -> Self {
        self.skip_main_download = skip;
        self
    }

    /// App config shipped with the installation.
    pub fn bundle_app_config_path(&self) -> PathBuf {
        self.installation_dir.join(APP_CONFIG_FILE_NAME)
    }

    /// Writable mirror of the app config.
    pub fn sandbox_app_config_path(&self) -> PathBuf {
        self.sandbox_dir.join(APP_CONFIG_FILE_NAME)
    }

    /// Root of the per-package sandbox directories.
    pub fn packages_dir(&self) -> PathBuf {
        self.sandbox_dir.join("packages")
    }

    /// Directory for last group selection records.
    pub fn selection_dir(&self) -> PathBuf {
        self.sandbox_dir.join("selection")
    }

    /// Location of the authoritative app config, if one is configured.
    pub fn app_config_location(&self) -> Option<String> {
        self.app_config_url.clone().or_else(|| {
            self.default_host
                .as_deref()
                .map(|host| join_location(host, APP_CONFIG_FILE_NAME))
        })
    }

    /// Location of the patch config, if one is configured.
    pub fn patch_config_location(&self) -> Option<String> {
        self.patch_config_url.clone().or_else(|| {
            self.default_host
                .as_deref()
                .map(|host| join_location(host, PATCH_CONFIG_FILE_NAME))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PatchSettings::default();
        assert_eq!(settings.play_mode, PlayMode::Host);
        assert_eq!(settings.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(settings.max_retry, DEFAULT_MAX_RETRY);
        assert_eq!(settings.repair_retry_budget, 1);
        assert!(settings.check_disk_space);
        assert!(!settings.semantic_rule.patch);
        assert!(settings.app_config_location().is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let settings = PatchSettings::new(PathBuf::from("/var/game"))
            .with_host("https://cdn.example.com/game")
            .with_fallback_host("https://backup.example.com/game")
            .with_max_concurrency(0)
            .with_max_retry(5)
            .with_state_delay(Duration::ZERO)
            .with_play_mode(PlayMode::Web);

        assert_eq!(settings.max_concurrency, 1);
        assert_eq!(settings.max_retry, 5);
        assert_eq!(settings.play_mode, PlayMode::Web);
        assert_eq!(
            settings.sandbox_app_config_path(),
            PathBuf::from("/var/game/appconfig.json")
        );
        assert_eq!(
            settings.patch_config_location().as_deref(),
            Some("https://cdn.example.com/game/patchconfig.json")
        );
    }

    #[test]
    fn test_explicit_urls_win() {
        let settings = PatchSettings::default()
            .with_host("https://cdn.example.com")
            .with_app_config_url("https://meta.example.com/app.json");
        assert_eq!(
            settings.app_config_location().as_deref(),
            Some("https://meta.example.com/app.json")
        );
    }

    #[test]
    fn test_play_mode_parse() {
        assert_eq!("offline".parse::<PlayMode>(), Ok(PlayMode::Offline));
        assert_eq!("WebGL".parse::<PlayMode>(), Ok(PlayMode::Web));
        assert_eq!(
            "editor-simulate".parse::<PlayMode>(),
            Ok(PlayMode::EditorSimulate)
        );
        assert!("cloud".parse::<PlayMode>().is_err());
        assert!(PlayMode::Host.is_networked());
        assert!(!PlayMode::Offline.is_networked());
    }
}
