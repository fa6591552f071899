//! Build command implementation

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::bundler::Bundler;
use crate::config::{Config, Mode};
use crate::utils::{format_duration, format_size};

/// Bundle the project into the output directory
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Output directory (defaults to output.path)
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,

    /// Build mode (defaults to NODE_ENV)
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,
}

impl BuildCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        info!("Loading configuration from {}", config_path);
        let mut config = Config::load(config_path)?;
        if let Some(mode) = self.mode {
            config = config.with_mode(mode);
        }

        eprintln!("{} Building project in {} mode...", "→".blue(), config.mode.to_string().cyan());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}")?);
        spinner.set_message("bundling");
        spinner.enable_steady_tick(Duration::from_millis(80));

        let bundler = Bundler::new(config)?;
        let result = bundler.build().await;
        spinner.finish_and_clear();

        let result = result?;
        let outdir = bundler.emit(&result, self.outdir.as_deref())?;

        eprintln!(
            "\n{} Built {} file(s) into {} in {}\n",
            "✓".green().bold(),
            result.assets.len(),
            outdir.display().to_string().cyan(),
            format_duration(result.duration)
        );

        // Print bundle summary
        for bundle in result.bundles() {
            eprintln!(
                "  {} {} {} {}",
                "•".dimmed(),
                bundle.path.cyan(),
                format_size(bundle.size).dimmed(),
                format!("[{}]", bundle.kind.label()).dimmed()
            );
        }

        if !result.warnings.is_empty() {
            eprintln!();
            for warning in &result.warnings {
                eprintln!("  {} {}", "⚠".yellow(), warning.to_string().yellow());
            }
        }

        eprintln!();

        Ok(())
    }
}
