//! Layered configuration for undercity: global (`~/.config/undercity/config.toml`)
//! merged with project (`.undercity/config.toml`), project wins.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub router: RoutingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub elevator: ElevatorConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub default_base_url: &'static str,
    pub api_style: &'static str,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef {
        id: "openai",
        name: "OpenAI",
        env_var: "OPENAI_API_KEY",
        default_base_url: "https://api.openai.com/v1",
        api_style: "openai",
    },
    ProviderDef {
        id: "anthropic",
        name: "Anthropic",
        env_var: "ANTHROPIC_API_KEY",
        default_base_url: "https://api.anthropic.com/v1",
        api_style: "anthropic",
    },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default, flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub api_style: Option<String>,
    /// Model id to use for each tier, e.g. cheap = "gpt-4.1-mini".
    #[serde(default)]
    pub cheap_model: Option<String>,
    #[serde(default)]
    pub mid_model: Option<String>,
    #[serde(default)]
    pub strong_model: Option<String>,
}

impl ProviderConfig {
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            providers: HashMap::new(),
        }
    }
}

/// Keyword lists that bias the complexity classifier, on top of the
/// built-in closed keyword sets (spec.md's LOW_KEYWORDS/HIGH_KEYWORDS analogue).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub low_keywords: Vec<String>,
    #[serde(default)]
    pub high_keywords: Vec<String>,
    /// Minimum number of newly-completed tasks before the routing profile
    /// is recomputed. spec.md default 5.
    #[serde(default = "default_min_new_tasks")]
    pub min_new_tasks: u32,
}

fn default_min_new_tasks() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_retries_per_tier")]
    pub max_retries_per_tier: u32,
    #[serde(default = "default_max_strong_retries")]
    pub max_strong_retries: u32,
    #[serde(default = "default_max_writes_per_file")]
    pub max_writes_per_file: u32,
    #[serde(default = "default_turn_cap_cheap")]
    pub turn_cap_cheap: u32,
    #[serde(default = "default_turn_cap_mid")]
    pub turn_cap_mid: u32,
    #[serde(default = "default_turn_cap_strong")]
    pub turn_cap_strong: u32,
    #[serde(default)]
    pub enable_planning: bool,
    #[serde(default)]
    pub enable_review: bool,
    #[serde(default = "default_max_review_passes_per_tier")]
    pub max_review_passes_per_tier: u32,
    #[serde(default = "default_max_strong_review_passes")]
    pub max_strong_review_passes: u32,
    #[serde(default)]
    pub annealing: bool,
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_max_attempts() -> u32 {
    7
}
fn default_max_retries_per_tier() -> u32 {
    3
}
fn default_max_strong_retries() -> u32 {
    7
}
fn default_max_writes_per_file() -> u32 {
    6
}
fn default_turn_cap_cheap() -> u32 {
    10
}
fn default_turn_cap_mid() -> u32 {
    15
}
fn default_turn_cap_strong() -> u32 {
    25
}
fn default_max_review_passes_per_tier() -> u32 {
    2
}
fn default_max_strong_review_passes() -> u32 {
    6
}
fn default_state_dir() -> String {
    ".undercity".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_retries_per_tier: default_max_retries_per_tier(),
            max_strong_retries: default_max_strong_retries(),
            max_writes_per_file: default_max_writes_per_file(),
            turn_cap_cheap: default_turn_cap_cheap(),
            turn_cap_mid: default_turn_cap_mid(),
            turn_cap_strong: default_turn_cap_strong(),
            enable_planning: false,
            enable_review: false,
            max_review_passes_per_tier: default_max_review_passes_per_tier(),
            max_strong_review_passes: default_max_strong_review_passes(),
            annealing: false,
            state_dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevatorConfig {
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub push_to_origin: bool,
}

fn default_integration_branch() -> String {
    "main".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for ElevatorConfig {
    fn default() -> Self {
        Self {
            integration_branch: default_integration_branch(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            push_to_origin: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    #[serde(default = "default_true")]
    pub run_typecheck: bool,
    #[serde(default = "default_true")]
    pub run_tests: bool,
    #[serde(default = "default_true")]
    pub run_lint: bool,
    #[serde(default = "default_true")]
    pub run_build: bool,
    #[serde(default)]
    pub run_spell: bool,
    #[serde(default)]
    pub run_security: bool,
    #[serde(default)]
    pub skip_optional_checks: bool,
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_check_timeout_secs() -> u64 {
    300
}

impl VerifyConfig {
    fn defaults() -> Self {
        Self {
            run_typecheck: true,
            run_tests: true,
            run_lint: true,
            run_build: true,
            run_spell: false,
            run_security: false,
            skip_optional_checks: false,
            check_timeout_secs: default_check_timeout_secs(),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples_for_recommendation: u32,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate_for_recommendation: f64,
}

fn default_min_samples() -> u32 {
    3
}
fn default_min_success_rate() -> f64 {
    0.60
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_samples_for_recommendation: default_min_samples(),
            min_success_rate_for_recommendation: default_min_success_rate(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("undercity")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn ensure_dirs() -> Result<()> {
        std::fs::create_dir_all(Self::config_dir())?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        Self::ensure_dirs()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(Self::config_path(), content).context("Failed to write config file")
    }

    pub fn load_project(project_root: &std::path::Path) -> Result<Option<Self>> {
        let path = project_root.join(".undercity").join("config.toml");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read project config")?;
            Ok(Some(
                toml::from_str(&content).context("Failed to parse project config")?,
            ))
        } else {
            Ok(None)
        }
    }

    /// Merge global config with project overrides. Project scalars win;
    /// provider entries merge field-by-field (project fills gaps left by global).
    pub fn merge(global: &Config, project: &Config) -> Config {
        let mut providers = global.provider.providers.clone();
        for (k, proj_entry) in &project.provider.providers {
            let base = providers.remove(k).unwrap_or_default();
            providers.insert(k.clone(), merge_provider_entry(&base, proj_entry));
        }

        let mut low_keywords = global.router.low_keywords.clone();
        low_keywords.extend(project.router.low_keywords.clone());
        low_keywords.sort();
        low_keywords.dedup();
        let mut high_keywords = global.router.high_keywords.clone();
        high_keywords.extend(project.router.high_keywords.clone());
        high_keywords.sort();
        high_keywords.dedup();

        Config {
            provider: ProviderConfig {
                default: if project.provider.default != default_provider() {
                    project.provider.default.clone()
                } else {
                    global.provider.default.clone()
                },
                providers,
            },
            router: RoutingConfig {
                low_keywords,
                high_keywords,
                min_new_tasks: if project.router.min_new_tasks != default_min_new_tasks() {
                    project.router.min_new_tasks
                } else {
                    global.router.min_new_tasks
                },
            },
            worker: project.worker.clone(),
            elevator: project.elevator.clone(),
            verify: project.verify.clone(),
            learning: project.learning.clone(),
        }
    }

    /// Load global config layered with project config found under `project_root`.
    pub fn load_layered(project_root: &std::path::Path) -> Result<Self> {
        let global = Self::load()?;
        match Self::load_project(project_root)? {
            Some(project) => Ok(Self::merge(&global, &project)),
            None => Ok(global),
        }
    }
}

fn merge_provider_entry(global: &ProviderEntry, project: &ProviderEntry) -> ProviderEntry {
    ProviderEntry {
        api_key: project.api_key.clone().or_else(|| global.api_key.clone()),
        base_url: project
            .base_url
            .clone()
            .or_else(|| global.base_url.clone()),
        api_style: project
            .api_style
            .clone()
            .or_else(|| global.api_style.clone()),
        cheap_model: project
            .cheap_model
            .clone()
            .or_else(|| global.cheap_model.clone()),
        mid_model: project
            .mid_model
            .clone()
            .or_else(|| global.mid_model.clone()),
        strong_model: project
            .strong_model
            .clone()
            .or_else(|| global.strong_model.clone()),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            router: RoutingConfig::default(),
            worker: WorkerConfig::default(),
            elevator: ElevatorConfig::default(),
            verify: VerifyConfig::defaults(),
            learning: LearningConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.provider.default, cfg.provider.default);
        assert_eq!(back.worker.max_attempts, cfg.worker.max_attempts);
    }

    #[test]
    fn merge_prefers_project_scalars() {
        let mut global = Config::default();
        global.elevator.integration_branch = "develop".to_string();
        let mut project = Config::default();
        project.elevator.integration_branch = "main".to_string();
        let merged = Config::merge(&global, &project);
        assert_eq!(merged.elevator.integration_branch, "main");
    }

    #[test]
    fn merge_unions_keyword_lists() {
        let mut global = Config::default();
        global.router.low_keywords = vec!["typo".into()];
        let mut project = Config::default();
        project.router.low_keywords = vec!["rename".into()];
        let merged = Config::merge(&global, &project);
        assert!(merged.router.low_keywords.contains(&"typo".to_string()));
        assert!(merged.router.low_keywords.contains(&"rename".to_string()));
    }

    #[test]
    fn load_project_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_project(dir.path()).unwrap().is_none());
    }
}
