//! Command-line interface for Loom
//!
//! Provides the main CLI structure using clap with subcommands for:
//! - `build`: Bundle the project into the output directory
//! - `dev`: Development server with HMR
//! - `init`: Project scaffolding

mod build;
mod dev;
mod init;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

pub use build::BuildCommand;
pub use dev::{DevCommand, DevServerOptions};
pub use init::InitCommand;

/// Loom - a configuration-driven frontend bundler and dev server
#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to loom.toml config file
    #[arg(short, long, global = true, default_value = "loom.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bundle the project into the output directory
    Build(BuildCommand),

    /// Start development server with hot module replacement
    Dev(DevCommand),

    /// Scaffold a new project
    Init(InitCommand),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<()> {
        print_banner();

        match &self.command {
            Commands::Build(cmd) => cmd.execute(&self.config).await,
            Commands::Dev(cmd) => cmd.execute(&self.config).await,
            Commands::Init(cmd) => cmd.execute().await,
        }
    }
}

/// Print the Loom banner
fn print_banner() {
    eprintln!(
        "\n{} {} {}\n",
        "⚡".cyan(),
        "Loom".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["loom", "build", "--config", "app/loom.toml", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, "app/loom.toml");
        assert!(matches!(cli.command, Commands::Build(_)));
    }

    #[test]
    fn test_dev_overrides() {
        let cli = Cli::parse_from(["loom", "dev", "--port", "9000", "--no-hmr"]);
        let Commands::Dev(dev) = cli.command else {
            panic!("expected dev command");
        };
        assert_eq!(dev.port, Some(9000));
        assert_eq!(dev.host, None);
        assert!(dev.no_hmr);
        assert_eq!(cli.config, "loom.toml");
    }
}
