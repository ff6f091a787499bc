use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Coordinator configuration, loaded from `outrider.toml` in the user config
/// directory. Every field has a default so a missing file is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum wall-clock run time for a delegation, in seconds.
    pub max_run_secs: u64,
    /// Watchdog grace margin on top of `max_run_secs`, in seconds.
    pub timeout_grace_secs: u64,
    /// Upper bound on one AI-analysis completion call, in seconds.
    pub analysis_timeout_secs: u64,
    /// When set, every analysis invocation writes a JSON audit record.
    pub debug_log: bool,
    /// Data directory; audit records land under `<data_dir>/analysis`.
    pub data_dir: PathBuf,
    /// User-maintained model preference notes, injected verbatim into every
    /// dispatched prompt when the file exists.
    pub model_prefs_path: PathBuf,
    /// Prompt sent on `resume` when the caller supplies none.
    pub continue_prompt: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .map(|d| d.join("outrider"))
            .unwrap_or_else(|| PathBuf::from(".outrider"));
        let data_dir = dirs::data_dir()
            .map(|d| d.join("outrider"))
            .unwrap_or_else(|| PathBuf::from(".outrider"));

        Self {
            max_run_secs: 15 * 60,
            timeout_grace_secs: 5,
            analysis_timeout_secs: 60,
            debug_log: false,
            data_dir,
            model_prefs_path: config_dir.join("models.md"),
            continue_prompt: "Continue with the task.".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = dirs::config_dir()
            .map(|d| d.join("outrider").join("outrider.toml"))
            .unwrap_or_else(|| PathBuf::from(".outrider/outrider.toml"));

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: ManagerConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(ManagerConfig::default())
        }
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }

    /// Watchdog deadline: maximum run time plus the grace margin.
    pub fn watchdog_after(&self) -> Duration {
        Duration::from_secs(self.max_run_secs + self.timeout_grace_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn analysis_log_dir(&self) -> PathBuf {
        self.data_dir.join("analysis")
    }

    /// Load the model-preference notes if the file exists. Contents are
    /// injected verbatim; no parsing beyond presence.
    pub fn model_prefs(&self) -> Option<String> {
        std::fs::read_to_string(&self.model_prefs_path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_run_secs, 900);
        assert_eq!(config.timeout_grace_secs, 5);
        assert_eq!(config.watchdog_after(), Duration::from_secs(905));
        assert_eq!(config.analysis_timeout(), Duration::from_secs(60));
        assert!(!config.debug_log);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ManagerConfig = toml::from_str("max_run_secs = 60\ndebug_log = true").unwrap();
        assert_eq!(config.max_run_secs, 60);
        assert!(config.debug_log);
        assert_eq!(config.timeout_grace_secs, 5);
    }

    #[test]
    fn test_model_prefs_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            model_prefs_path: dir.path().join("models.md"),
            ..ManagerConfig::default()
        };
        assert!(config.model_prefs().is_none());

        std::fs::write(&config.model_prefs_path, "prefer small models").unwrap();
        assert_eq!(config.model_prefs().unwrap(), "prefer small models");
    }
}
