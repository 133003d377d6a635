//! `yadl config` – show the effective configuration and where it lives.

use anyhow::{Context, Result};
use yadl_core::config;

pub fn run_config() -> Result<()> {
    let path = config::config_path()?;
    let cfg = config::load_or_init()?;
    let rendered = toml::to_string_pretty(&cfg).context("rendering configuration")?;

    println!("# {}", path.display());
    print!("{}", rendered);
    println!();
    println!("output directory: {}", cfg.resolved_output_dir().display());
    Ok(())
}
