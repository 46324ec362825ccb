//! strata.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// System name reported to engines and used in evict requests.
    #[serde(default = "default_system_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Managed engines, in index order.
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub smd: SmdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local RPC socket of the engine process.
    pub socket: PathBuf,
    pub targets: u32,
    /// Fault domain path, e.g. `/rack0/host3`.
    pub fault_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_svc_reps")]
    pub default_svc_reps: u32,
    #[serde(default = "default_max_svc_reps")]
    pub max_svc_reps: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_evict_window")]
    pub evict_batch_window_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Backoff for pool creates that hit a group version mismatch.
    #[serde(default)]
    pub create_retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmdConfig {
    #[serde(default)]
    pub replace_retry: RetryConfig,
}

/// Bounded exponential backoff used when an engine reports busy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_system_name() -> String {
    "strata".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/strata")
}

fn default_api_port() -> u16 {
    10001
}

fn default_svc_reps() -> u32 {
    3
}

fn default_max_svc_reps() -> u32 {
    13
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_evict_window() -> u64 {
    50
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    100
}

fn default_growth_factor() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    5_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            default_svc_reps: default_svc_reps(),
            max_svc_reps: default_max_svc_reps(),
            sweep_interval_secs: default_sweep_interval(),
            evict_batch_window_ms: default_evict_window(),
            request_timeout_secs: default_request_timeout(),
            create_retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            growth_factor: default_growth_factor(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl StrataConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StrataConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the control plane cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool.max_svc_reps == 0 {
            anyhow::bail!("pool.max_svc_reps must be non-zero");
        }
        if self.pool.default_svc_reps > self.pool.max_svc_reps {
            anyhow::bail!(
                "pool.default_svc_reps ({}) exceeds pool.max_svc_reps ({})",
                self.pool.default_svc_reps,
                self.pool.max_svc_reps
            );
        }
        if self.smd.replace_retry.growth_factor < 1.0 {
            anyhow::bail!("smd.replace_retry.growth_factor must be >= 1.0");
        }
        if self.pool.create_retry.growth_factor < 1.0 {
            anyhow::bail!("pool.create_retry.growth_factor must be >= 1.0");
        }
        for (idx, engine) in self.engines.iter().enumerate() {
            if engine.targets == 0 {
                anyhow::bail!("engine {idx}: targets must be non-zero");
            }
        }
        Ok(())
    }

    /// Scaffold a single-engine config rooted at `data_dir`.
    pub fn scaffold(data_dir: &Path, targets: u32) -> Self {
        StrataConfig {
            name: default_system_name(),
            data_dir: data_dir.to_path_buf(),
            api_port: default_api_port(),
            engines: vec![EngineConfig {
                socket: data_dir.join("engine0.sock"),
                targets,
                fault_domain: None,
            }],
            pool: PoolConfig::default(),
            smd: SmdConfig::default(),
        }
    }
}
