use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{BackoffPolicy, Classifier, HTTP_SERVICE_UNAVAILABLE};
use crate::scheduler::{SchedulerOptions, DEFAULT_POLL_TIMEOUT};
use crate::transport::multi::CurlOptions;

/// libcurl settings (optional `[curl]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurlConfig {
    pub connect_timeout_secs: u64,
    /// Limit on a single attempt; absent means no limit.
    pub timeout_secs: Option<u64>,
    /// Receive buffer size in bytes (None = library default).
    pub buffer_size: Option<usize>,
}

impl Default for CurlConfig {
    fn default() -> Self {
        let opts = CurlOptions::default();
        Self {
            connect_timeout_secs: opts.connect_timeout.as_secs(),
            timeout_secs: opts.timeout.map(|t| t.as_secs()),
            buffer_size: opts.buffer_size,
        }
    }
}

impl CurlConfig {
    pub fn to_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            timeout: self.timeout_secs.map(Duration::from_secs),
            buffer_size: self.buffer_size,
            ..CurlOptions::default()
        }
    }
}

/// Transfer tunables loaded from `~/.config/bxfer/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Base of the first retry delay, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Growth factor between consecutive retry delays.
    pub backoff_scale_factor: f64,
    /// A retry delay reaching this fails the batch.
    pub max_backoff_before_fail_ms: u64,
    /// Upper bound on one readiness wait.
    pub poll_timeout_cap_ms: u64,
    /// Bound on concurrently submitted transfers (None = whole batch at once).
    pub max_in_flight: Option<usize>,
    /// HTTP statuses treated as "overloaded, retry later".
    pub transient_statuses: Vec<u32>,
    pub curl: CurlConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            initial_backoff_ms: backoff.initial.as_millis() as u64,
            backoff_scale_factor: backoff.scale_factor,
            max_backoff_before_fail_ms: backoff.max_before_fail.as_millis() as u64,
            poll_timeout_cap_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            max_in_flight: None,
            transient_statuses: vec![HTTP_SERVICE_UNAVAILABLE],
            curl: CurlConfig::default(),
        }
    }
}

impl TransferConfig {
    /// Reject settings the scheduler cannot run with. The checks are those of
    /// [`SchedulerOptions::validate`].
    pub fn validate(&self) -> Result<()> {
        self.scheduler_options().validate()?;
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_backoff_ms),
            scale_factor: self.backoff_scale_factor,
            max_before_fail: Duration::from_millis(self.max_backoff_before_fail_ms),
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            backoff: self.backoff(),
            poll_timeout_cap: Duration::from_millis(self.poll_timeout_cap_ms),
            max_in_flight: self.max_in_flight,
            classifier: Classifier::new(self.transient_statuses.clone()),
        }
    }

    pub fn curl_options(&self) -> CurlOptions {
        self.curl.to_options()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bxfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Read and validate configuration from `path`.
pub fn load_from(path: &Path) -> Result<TransferConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let cfg: TransferConfig =
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<TransferConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = TransferConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}
