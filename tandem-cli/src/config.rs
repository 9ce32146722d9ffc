use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tandem_remote::{GitHubConfig, RetryPolicy};
use tandem_sync::rules::{PathRules, DEFAULT_QUARANTINE_DIR};
use tandem_sync::SyncConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree to keep in sync
    pub local_root: PathBuf,
    /// Holds the sync cache and the journal
    pub state_dir: PathBuf,
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: String,
    #[serde(default = "default_excluded")]
    pub excluded: Vec<String>,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

fn default_quarantine_dir() -> String {
    DEFAULT_QUARANTINE_DIR.to_string()
}

fn default_excluded() -> Vec<String> {
    vec![".git".to_string()]
}

fn default_commit_message() -> String {
    "tandem sync".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_token_env() -> String {
    "TANDEM_GITHUB_TOKEN".to_string()
}

fn default_api_base() -> String {
    tandem_remote::github::DEFAULT_API_BASE.to_string()
}

impl Config {
    /// Fresh configuration for syncing `local_root` with `owner/repo`
    pub fn new(local_root: PathBuf, state_dir: PathBuf, owner: String, repo: String) -> Self {
        Self {
            local_root,
            state_dir,
            quarantine_dir: default_quarantine_dir(),
            excluded: default_excluded(),
            commit_message: default_commit_message(),
            remote: RemoteConfig {
                owner,
                repo,
                branch: default_branch(),
                token_env: default_token_env(),
                api_base: default_api_base(),
            },
            retry: RetrySettings::default(),
        }
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Load configuration from `path`
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn rules(&self) -> PathRules {
        PathRules::new(self.quarantine_dir.clone(), self.excluded.clone())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(self.state_dir.clone()).with_rules(self.rules())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    /// Remote settings with the token read from the environment
    pub fn github_config(&self) -> GitHubConfig {
        let token = std::env::var(&self.remote.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_none() {
            tracing::warn!(
                "{} is not set; requests to the remote are unauthenticated",
                self.remote.token_env
            );
        }

        GitHubConfig {
            api_base: self.remote.api_base.clone(),
            owner: self.remote.owner.clone(),
            repo: self.remote.repo.clone(),
            branch: self.remote.branch.clone(),
            token,
            commit_message: self.commit_message.clone(),
            retry: self.retry_policy(),
        }
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".tandem").join("config.toml"))
}

/// Get the default state directory
pub fn default_state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Home directory not found")?;
    Ok(home.join(".tandem").join("state"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Config {
        Config::new(
            PathBuf::from("/data/vault"),
            PathBuf::from("/data/state"),
            "me".to_string(),
            "notes".to_string(),
        )
    }

    #[test]
    fn test_config_serialization() {
        let config = sample();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("local_root"));
        assert!(toml_str.contains("[remote]"));
        assert!(toml_str.contains("token_env = \"TANDEM_GITHUB_TOKEN\""));

        let deserialized: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            local_root = "/v"
            state_dir = "/s"

            [remote]
            owner = "me"
            repo = "notes"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.branch, "main");
        assert_eq!(config.quarantine_dir, DEFAULT_QUARANTINE_DIR);
        assert_eq!(config.excluded, vec![".git".to_string()]);
        assert_eq!(config.retry, RetrySettings::default());
        assert!(config.rules().is_excluded(".git/config"));
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = sample();
        config.excluded.push(".obsidian".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.rules().is_excluded(".obsidian/app.json"));
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let mut config = sample();
        config.retry.max_attempts = 0;
        config.retry.base_delay_ms = 10;
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }
}
