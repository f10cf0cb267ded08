use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Buffered bytes are written to disk once they reach this threshold.
pub const DEFAULT_FLUSH_SIZE: usize = 1024 * 1024;

/// Global configuration loaded from `~/.config/qdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdmConfig {
    /// Number of download agents (parallel transfers).
    pub agent_count: usize,
    /// A transfer with no byte progress for this long fails with a timeout.
    pub timeout_secs: u64,
    /// Disk-write batching threshold in bytes.
    pub flush_size: usize,
    /// Continue partial files with a byte-range request instead of
    /// truncating and starting over.
    pub resume: bool,
    /// Sampling window for the aggregate speed, in milliseconds.
    pub speed_sample_millis: u64,
}

impl Default for QdmConfig {
    fn default() -> Self {
        Self {
            agent_count: 3,
            timeout_secs: 30,
            flush_size: DEFAULT_FLUSH_SIZE,
            resume: true,
            speed_sample_millis: 1000,
        }
    }
}

impl QdmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn speed_sample(&self) -> Duration {
        Duration::from_millis(self.speed_sample_millis.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<QdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = QdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: QdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
