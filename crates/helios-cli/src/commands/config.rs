//! Config command implementation.

use anyhow::{Context as _, Result, bail};
use helios_core::Config;

use crate::cli::ConfigAction;
use crate::util::Context;

pub fn cmd_config(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", ctx.config_path().display());
        }
        ConfigAction::Show => {
            let config = ctx.load_config()?;
            let content =
                toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{}", content);
        }
        ConfigAction::Init { force } => {
            let path = ctx.config_path();
            if path.exists() && !force {
                bail!(
                    "{} already exists. Use --force to overwrite it.",
                    path.display()
                );
            }
            Config::default()
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !ctx.quiet {
                eprintln!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}
