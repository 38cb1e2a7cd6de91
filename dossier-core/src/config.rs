//! Configuration system for Dossier.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/dossier/config.toml` and/or `.dossier/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DossierConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Orchestration limits and early-stop thresholds for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Minimum number of round-1 tasks; the plan is padded up to this (default: 8).
    #[serde(default = "default_min_agents")]
    pub min_agents: usize,
    /// Hard cap on tasks spawned per run (default: 20).
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Cap on method-audit, discovery and exhaustion scouts per batch (default: 8).
    #[serde(default = "default_max_method_agents")]
    pub max_method_agents: usize,
    #[serde(default = "default_min_rounds")]
    pub min_rounds: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Disable early stop and always run gap-fill and exhaustion scouts.
    #[serde(default)]
    pub force_exhaustion: bool,
    #[serde(default = "default_diminishing_score")]
    pub early_stop_diminishing_score: f64,
    #[serde(default = "default_novelty_ratio")]
    pub early_stop_novelty_ratio: f64,
    #[serde(default = "default_new_domains")]
    pub early_stop_new_domains: usize,
    #[serde(default = "default_new_sources")]
    pub early_stop_new_sources: usize,
    /// Unique-domain floor for the independent exhaustion check (default: 6).
    #[serde(default = "default_min_exhaustion_domains")]
    pub min_exhaustion_domains: usize,
    /// Delay between round-1 task launches in milliseconds (default: 1000).
    #[serde(default = "default_sector_stagger_ms")]
    pub sector_stagger_ms: u64,
    #[serde(default = "default_discovery_stagger_ms")]
    pub discovery_stagger_ms: u64,
    #[serde(default = "default_audit_stagger_ms")]
    pub audit_stagger_ms: u64,
}

fn default_min_agents() -> usize {
    8
}
fn default_max_agents() -> usize {
    20
}
fn default_max_method_agents() -> usize {
    8
}
fn default_min_rounds() -> usize {
    1
}
fn default_max_rounds() -> usize {
    2
}
fn default_diminishing_score() -> f64 {
    0.75
}
fn default_novelty_ratio() -> f64 {
    0.25
}
fn default_new_domains() -> usize {
    1
}
fn default_new_sources() -> usize {
    3
}
fn default_min_exhaustion_domains() -> usize {
    6
}
fn default_sector_stagger_ms() -> u64 {
    1000
}
fn default_discovery_stagger_ms() -> u64 {
    600
}
fn default_audit_stagger_ms() -> u64 {
    700
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            min_agents: default_min_agents(),
            max_agents: default_max_agents(),
            max_method_agents: default_max_method_agents(),
            min_rounds: default_min_rounds(),
            max_rounds: default_max_rounds(),
            force_exhaustion: false,
            early_stop_diminishing_score: default_diminishing_score(),
            early_stop_novelty_ratio: default_novelty_ratio(),
            early_stop_new_domains: default_new_domains(),
            early_stop_new_sources: default_new_sources(),
            min_exhaustion_domains: default_min_exhaustion_domains(),
            sector_stagger_ms: default_sector_stagger_ms(),
            discovery_stagger_ms: default_discovery_stagger_ms(),
            audit_stagger_ms: default_audit_stagger_ms(),
        }
    }
}

impl RunConfig {
    /// Return a copy with every limit forced into a usable range.
    pub fn clamped(&self) -> Self {
        let min_agents = self.min_agents.max(1);
        let min_rounds = self.min_rounds.max(1);
        Self {
            min_agents,
            max_agents: self.max_agents.max(min_agents),
            max_method_agents: self.max_method_agents.max(1),
            min_rounds,
            max_rounds: self.max_rounds.max(min_rounds),
            early_stop_diminishing_score: clamp_unit(self.early_stop_diminishing_score),
            early_stop_novelty_ratio: clamp_unit(self.early_stop_novelty_ratio),
            ..self.clone()
        }
    }

    /// Unique-domain coverage below which extra exhaustion scouts are spawned.
    pub fn exhaustion_domain_floor(&self) -> usize {
        self.min_exhaustion_domains.max(self.min_agents / 2)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Budget and retry policy for the evidence recovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Hard wall-clock budget for the whole pass, in seconds (default: 45).
    #[serde(default = "default_recovery_budget_secs")]
    pub budget_secs: u64,
    /// Maximum number of distinct queries issued (default: 8).
    #[serde(default = "default_recovery_max_queries")]
    pub max_queries: usize,
    /// Minimum priority score for a query to run before fallbacks (default: 4).
    #[serde(default = "default_priority_threshold")]
    pub priority_threshold: u32,
    /// Lower-scored queries allowed once priority queries are spent (default: 2).
    #[serde(default = "default_max_fallback_queries")]
    pub max_fallback_queries: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_recovery_budget_secs() -> u64 {
    45
}
fn default_recovery_max_queries() -> usize {
    8
}
fn default_priority_threshold() -> u32 {
    4
}
fn default_max_fallback_queries() -> usize {
    2
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_recovery_budget_secs(),
            max_queries: default_recovery_max_queries(),
            priority_threshold: default_priority_threshold(),
            max_fallback_queries: default_max_fallback_queries(),
            retry: RetryConfig::default(),
        }
    }
}

impl RecoveryConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per query, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds (default: 500).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (default: 8000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Backoff multiplier (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add random jitter (default: true).
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Expiry and capacity of the time-boxed caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub recovery_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub recovery_max_entries: usize,
    #[serde(default = "default_ttl_secs")]
    pub geocode_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub geocode_max_entries: usize,
}

/// Seven days.
fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}
fn default_max_entries() -> usize {
    200
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recovery_ttl_secs: default_ttl_secs(),
            recovery_max_entries: default_max_entries(),
            geocode_ttl_secs: default_ttl_secs(),
            geocode_max_entries: default_max_entries(),
        }
    }
}

/// Where persisted process-wide stores live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State directory; the platform data dir when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "dossier", "dossier")
            .map(|d| d.data_dir().join("state"))
            .unwrap_or_else(|| PathBuf::from(".dossier").join("state"))
    }

    pub fn taxonomy_path(&self) -> PathBuf {
        self.resolve_state_dir().join("taxonomy_growth.json")
    }

    pub fn knowledge_path(&self) -> PathBuf {
        self.resolve_state_dir().join("knowledge_base.json")
    }

    pub fn recovery_cache_path(&self) -> PathBuf {
        self.resolve_state_dir().join("recovery_cache.json")
    }

    pub fn geocode_cache_path(&self) -> PathBuf {
        self.resolve_state_dir().join("geocode_cache.json")
    }
}

/// Load configuration from the layered sources.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DossierConfig>,
) -> Result<DossierConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DossierConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "dossier", "dossier") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".dossier").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (DOSSIER_RUN__MAX_ROUNDS, DOSSIER_RECOVERY__BUDGET_SECS, etc.)
    figment = figment.merge(Env::prefixed("DOSSIER_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
