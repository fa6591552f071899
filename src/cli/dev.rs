//! Development server command implementation

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tracing::info;

use crate::config::Config;
use crate::server::DevServer;

/// Start development server with hot module replacement
#[derive(Args, Debug)]
pub struct DevCommand {
    /// Port to run the dev server on (defaults to dev_server.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (defaults to dev_server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Open browser automatically
    #[arg(long)]
    pub open: bool,

    /// Disable hot module replacement
    #[arg(long)]
    pub no_hmr: bool,
}

impl DevCommand {
    pub async fn execute(&self, config_path: &str) -> Result<()> {
        info!("Loading configuration from {}", config_path);
        let config = Config::load(config_path)?;
        let options = self.options(&config);

        eprintln!(
            "{} Starting dev server at {}\n",
            "→".blue(),
            format!("http://{}:{}", options.host, options.port).cyan().underline()
        );

        if options.hmr {
            eprintln!("  {} Hot Module Replacement {}", "•".dimmed(), "enabled".green());
        }

        eprintln!("  {} Press {} to stop\n", "•".dimmed(), "Ctrl+C".yellow());

        let server = DevServer::new(config, options)?;
        server.start().await
    }

    /// Server options from the config, with command-line overrides applied
    pub fn options(&self, config: &Config) -> DevServerOptions {
        DevServerOptions {
            host: self.host.clone().unwrap_or_else(|| config.dev_server.host.clone()),
            port: self.port.unwrap_or(config.dev_server.port),
            hmr: config.dev_server.hot && !self.no_hmr,
            open: self.open || config.dev_server.open,
        }
    }
}

/// Development server options
#[derive(Debug, Clone)]
pub struct DevServerOptions {
    pub host: String,
    pub port: u16,
    pub hmr: bool,
    pub open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_options_fall_back_to_config() {
        let config = Config::default_config(PathBuf::from("/app"));
        let cmd = DevCommand {
            port: None,
            host: None,
            open: false,
            no_hmr: false,
        };
        let options = cmd.options(&config);
        assert_eq!(options.host, "0.0.0.0");
        assert_eq!(options.port, 8083);
        assert!(options.hmr);
        assert!(!options.open);
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::default_config(PathBuf::from("/app"));
        let cmd = DevCommand {
            port: Some(9000),
            host: Some("127.0.0.1".to_string()),
            open: true,
            no_hmr: true,
        };
        let options = cmd.options(&config);
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 9000);
        assert!(!options.hmr);
        assert!(options.open);
    }
}
