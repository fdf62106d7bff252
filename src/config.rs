//! Configuration loader and validator for the discovery service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::fetcher::UserAgentRules;
use crate::filter::BlacklistPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default)]
    pub fetch: Fetch,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_run_interval_seconds")]
    pub run_interval_seconds: u64,
}

/// What to look at and how to score it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Discovery {
    #[serde(default = "default_post_window_minutes")]
    pub post_window_minutes: u64,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub blacklist_errors: BlacklistPolicy,
}

/// Outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fetch {
    /// Worker pool size; 0 (the default) starts one worker per scheduled
    /// candidate. Set a positive value to cap concurrent fetches.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub default_user_agent: String,
    #[serde(default = "default_user_agent_rules")]
    pub user_agent_rules: Vec<UserAgentRule>,
}

/// Use `user_agent` for every link containing `pattern`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAgentRule {
    pub pattern: String,
    pub user_agent: String,
}

fn default_run_interval_seconds() -> u64 {
    2 * 60 * 60
}

fn default_post_window_minutes() -> u64 {
    120
}

fn default_keywords() -> Vec<String> {
    vec!["anime".into(), "manga".into()]
}

fn default_workers() -> usize {
    0
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_user_agent() -> String {
    "@bateszi auto-discover spider".into()
}

fn default_user_agent_rules() -> Vec<UserAgentRule> {
    vec![UserAgentRule {
        pattern: "tumblr.com".into(),
        user_agent: "Baiduspider".into(),
    }]
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            post_window_minutes: default_post_window_minutes(),
            keywords: default_keywords(),
            blacklist_errors: BlacklistPolicy::default(),
        }
    }
}

impl Default for Fetch {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_seconds: default_timeout_seconds(),
            default_user_agent: default_user_agent(),
            user_agent_rules: default_user_agent_rules(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/autodiscover.db", self.app.data_dir))
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.app.run_interval_seconds)
    }
}

impl Fetch {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn user_agents(&self) -> UserAgentRules {
        UserAgentRules::new(
            self.user_agent_rules
                .iter()
                .map(|r| (r.pattern.clone(), r.user_agent.clone())),
            self.default_user_agent.clone(),
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.run_interval_seconds == 0 {
        return Err(ConfigError::Invalid("app.run_interval_seconds must be > 0"));
    }

    if cfg.discovery.post_window_minutes == 0 {
        return Err(ConfigError::Invalid(
            "discovery.post_window_minutes must be > 0",
        ));
    }
    if cfg.discovery.keywords.is_empty() {
        return Err(ConfigError::Invalid("discovery.keywords must be non-empty"));
    }
    if cfg.discovery.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Invalid(
            "discovery.keywords must not contain blank entries",
        ));
    }

    // workers == 0 is allowed and means unbounded fan-out
    if cfg.fetch.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("fetch.timeout_seconds must be > 0"));
    }
    if cfg.fetch.default_user_agent.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "fetch.default_user_agent must be non-empty",
        ));
    }
    for rule in &cfg.fetch.user_agent_rules {
        if rule.pattern.is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.user_agent_rules[].pattern must be non-empty",
            ));
        }
        if rule.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "fetch.user_agent_rules[].user_agent must be non-empty",
            ));
        }
    }

    Ok(())
}

/// Returns an example YAML configuration with every default spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  run_interval_seconds: 7200

discovery:
  post_window_minutes: 120
  keywords:
    - anime
    - manga
  blacklist_errors: fail_open

fetch:
  workers: 0
  timeout_seconds: 10
  default_user_agent: "@bateszi auto-discover spider"
  user_agent_rules:
    - pattern: "tumblr.com"
      user_agent: "Baiduspider"
"#
}
