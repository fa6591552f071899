//! Loom library
//!
//! A frontend bundler driven by `loom.toml`: rule-based loader chains, chunk
//! splitting, HTML/stylesheet/copy plugins and a hot-reloading dev server.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use loom_lib::{Bundler, Config};
//!
//! let config = Config::load("loom.toml")?;
//! let bundler = Bundler::new(config)?;
//! let result = bundler.build().await?;
//! bundler.emit(&result, None)?;
//! # Ok(())
//! # }
//! ```

pub mod bundler;
pub mod cli;
pub mod config;
pub mod error;
pub mod loaders;
pub mod plugins;
pub mod resolver;
pub mod rules;
pub mod server;
pub mod utils;

pub use bundler::{BuildResult, Bundler};
pub use cli::Cli;
pub use config::{Config, Mode};
pub use error::{BuildError, Diagnostic};
pub use server::DevServer;
