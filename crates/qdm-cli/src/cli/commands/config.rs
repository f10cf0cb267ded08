//! `qdm config` – print the config file path and effective values.

use anyhow::Result;
use qdm_core::config::{self, QdmConfig};

pub fn run_config(cfg: QdmConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());
    println!("{:#?}", cfg);
    Ok(())
}
