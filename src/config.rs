use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::model::ActionRiskLevel;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub providers: ProviderConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Approval thresholds, compared on the risk total order.
#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_auto_approve_max_risk")]
    pub auto_approve_max_risk: ActionRiskLevel,
    #[serde(default = "default_deny_min_risk")]
    pub deny_min_risk: ActionRiskLevel,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_approve_max_risk: default_auto_approve_max_risk(),
            deny_min_risk: default_deny_min_risk(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct ApprovalConfig {
    /// How long a suspended run waits before resolving to timed_out.
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
    /// How often the timeout sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Shared secret for signing approval callbacks; unsigned callbacks are
    /// accepted when unset.
    pub callback_secret: Option<String>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            callback_secret: None,
        }
    }
}

// Manual Debug impl to avoid leaking the callback secret
impl std::fmt::Debug for ApprovalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalConfig")
            .field("timeout_secs", &self.timeout_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field(
                "callback_secret",
                &self.callback_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub base_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: default_store_dir(),
        }
    }
}

/// Which evidence-provider implementations to construct.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// Fixture-backed stubs (local runs, tests).
    Stub,
    /// Stubs for cost/infra plus a live KubeCost endpoint.
    Kubecost,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_mode")]
    pub mode: ProviderMode,
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,
    pub kubecost_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mode: default_provider_mode(),
            fixtures_dir: default_fixtures_dir(),
            kubecost_base_url: None,
        }
    }
}

/// Evidence window used by triage/analysis/verification queries.
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_window_start")]
    pub window_start: String,
    #[serde(default = "default_window_end")]
    pub window_end: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_start: default_window_start(),
            window_end: default_window_end(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_auto_approve_max_risk() -> ActionRiskLevel {
    ActionRiskLevel::Low
}

fn default_deny_min_risk() -> ActionRiskLevel {
    ActionRiskLevel::Critical
}

fn default_approval_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("/var/lib/costmend/runs")
}

fn default_provider_mode() -> ProviderMode {
    ProviderMode::Stub
}

fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_window_start() -> String {
    "2026-02-01".to_string()
}

fn default_window_end() -> String {
    "2026-02-16".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(
                config::File::with_name("costmend")
                    .required(false),
            );
        }

        // Environment variable overrides with COSTMEND_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("COSTMEND")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn callback_secret(&self) -> Option<&str> {
        self.approval.callback_secret.as_deref()
    }
}
