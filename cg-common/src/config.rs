//! Configuration loading and config file resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every section and
//! key has a built-in default, so a missing file (or a file that only sets a
//! few keys) still yields a complete configuration.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config file (`~/.config/convguard/convguard.toml`) if present
//! 4. Built-in defaults

use crate::model::RecommendedAction;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CG_CONFIG";

/// Upper bound on the per-event module deadline (one hour)
pub const MAX_DEADLINE_MS: u64 = 3_600_000;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub cache: CacheConfig,
    pub sessions: SessionConfig,
    pub synthesis: SynthesisConfig,
    pub susceptibility: SusceptibilityConfig,
    pub broadcast: BroadcastConfig,
    pub maintenance: MaintenanceConfig,
    pub adapters: AdaptersConfig,
}

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Verdict persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; persistence is disabled when absent
    pub path: Option<PathBuf>,
    /// Upper bound on retrying a locked database
    pub max_lock_wait_ms: u64,
    /// Verdicts loaded per session when warm-starting
    pub warm_start_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_lock_wait_ms: 5000,
            warm_start_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Shared deadline for all module adapters of one event
    pub deadline_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { deadline_ms: 2000 }
    }
}

impl OrchestratorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum resident entries across all shards
    pub capacity: usize,
    pub ttl_secs: u64,
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 4096,
            ttl_secs: 300,
            shards: 16,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum retained history entries per session
    pub history_cap: usize,
    pub idle_timeout_secs: u64,
    /// Number of most recent entries used for susceptibility scoring
    pub susceptibility_window: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: 200,
            idle_timeout_secs: 1800,
            susceptibility_window: 50,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Lower bounds of LOW, MEDIUM, HIGH and CRITICAL
    pub thresholds: [f64; 4],
    /// Flags that force at least HIGH
    pub critical_tags: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            thresholds: [0.2, 0.4, 0.6, 0.8],
            critical_tags: vec!["critical".to_string(), "block-tag".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SusceptibilityConfig {
    pub relational_weight: f64,
    pub emotional_weight: f64,
    pub behavioral_weight: f64,
    /// Scores at or above this are Medium
    pub medium_threshold: f64,
    /// Scores at or above this are High
    pub high_threshold: f64,
    pub relational_tags: Vec<String>,
    pub emotional_tags: Vec<String>,
    pub behavioral_tags: Vec<String>,
}

impl Default for SusceptibilityConfig {
    fn default() -> Self {
        Self {
            relational_weight: 35.0,
            emotional_weight: 30.0,
            behavioral_weight: 25.0,
            medium_threshold: 41.0,
            high_threshold: 76.0,
            relational_tags: vec!["grooming".to_string(), "relational".to_string()],
            emotional_tags: vec!["emotional_vulnerability".to_string()],
            behavioral_tags: vec!["behavior_change".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Undelivered verdicts queued per subscriber before it is dropped
    pub subscriber_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
        }
    }
}

impl MaintenanceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Installed analysis modules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub rules: Vec<RuleTableConfig>,
    pub http: Vec<HttpAdapterConfig>,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            rules: vec![RuleTableConfig::builtin_lexicon()],
            http: Vec::new(),
        }
    }
}

/// Keyword rule table module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTableConfig {
    pub id: String,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_rule_confidence() -> f64 {
    0.8
}

/// One keyword rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Substring matched against normalized (lowercase, single-spaced) text
    pub pattern: String,
    pub tag: String,
    pub score: f64,
    #[serde(default)]
    pub action: Option<RecommendedAction>,
}

impl RuleConfig {
    fn new(pattern: &str, tag: &str, score: f64, action: Option<RecommendedAction>) -> Self {
        Self {
            pattern: pattern.to_string(),
            tag: tag.to_string(),
            score,
            action,
        }
    }
}

impl RuleTableConfig {
    /// Small built-in lexicon so the service is useful without configuration
    pub fn builtin_lexicon() -> Self {
        use RecommendedAction::*;
        Self {
            id: "lexicon".to_string(),
            confidence: default_rule_confidence(),
            rules: vec![
                RuleConfig::new("our little secret", "grooming", 0.7, Some(Alert)),
                RuleConfig::new("don't tell your parents", "grooming", 0.8, Some(Escalate)),
                RuleConfig::new("mature for your age", "grooming", 0.6, Some(Alert)),
                RuleConfig::new("nobody understands me", "emotional_vulnerability", 0.3, Some(Log)),
                RuleConfig::new("i feel so alone", "emotional_vulnerability", 0.35, Some(Log)),
                RuleConfig::new("skip school", "behavior_change", 0.4, Some(Log)),
                RuleConfig::new("delete this chat", "behavior_change", 0.5, Some(Alert)),
                RuleConfig::new("meet in person", "behavior_change", 0.6, Some(Alert)),
                RuleConfig::new("send me a photo", "critical", 0.9, Some(Block)),
            ],
        }
    }
}

/// External analysis service module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpAdapterConfig {
    pub id: String,
    pub endpoint: String,
    /// Optional bearer token sent with each request
    #[serde(default)]
    pub api_key: Option<String>,
}

impl TomlConfig {
    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        let t = &self.synthesis.thresholds;
        if t.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(Error::Config("synthesis.thresholds must lie in [0, 1]".to_string()));
        }
        if t.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Config(
                "synthesis.thresholds must be strictly ascending".to_string(),
            ));
        }
        let s = &self.susceptibility;
        if s.medium_threshold >= s.high_threshold {
            return Err(Error::Config(
                "susceptibility.medium_threshold must be below high_threshold".to_string(),
            ));
        }
        if self.orchestrator.deadline_ms == 0 || self.orchestrator.deadline_ms > MAX_DEADLINE_MS {
            return Err(Error::Config(format!(
                "orchestrator.deadline_ms must be in 1..={}",
                MAX_DEADLINE_MS
            )));
        }
        if self.cache.enabled && (self.cache.capacity == 0 || self.cache.shards == 0) {
            return Err(Error::Config(
                "cache.capacity and cache.shards must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if self.sessions.history_cap == 0 {
            return Err(Error::Config("sessions.history_cap must be > 0".to_string()));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(Error::Config("broadcast.subscriber_buffer must be > 0".to_string()));
        }

        let mut ids = HashSet::new();
        let all_ids = self
            .adapters
            .rules
            .iter()
            .map(|r| r.id.as_str())
            .chain(self.adapters.http.iter().map(|h| h.id.as_str()));
        for id in all_ids {
            if id.trim().is_empty() {
                return Err(Error::Config("adapter id must not be empty".to_string()));
            }
            if !ids.insert(id) {
                return Err(Error::Config(format!("duplicate adapter id '{}'", id)));
            }
        }
        Ok(())
    }
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: user config file, only when it exists
    default_config_path().filter(|p| p.exists())
}

/// `~/.config/convguard/convguard.toml` (platform equivalent)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("convguard").join("convguard.toml"))
}

/// Parse and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

/// Load the config file if one resolves, otherwise fall back to defaults.
///
/// A missing file is not fatal: it logs a warning and uses defaults. A file
/// that exists but fails to parse or validate is an error.
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        None => {
            info!("No config file configured, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, target)?;
    Ok(())
}
