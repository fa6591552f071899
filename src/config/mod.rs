//! Configuration handling for Loom
//!
//! Parses and manages loom.toml configuration files.

mod schema;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::loaders;
use crate::rules::RuleSet;

pub use schema::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Entry points: chunk name -> source file
    #[serde(default = "default_entry")]
    pub entry: BTreeMap<String, String>,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// File-pattern rules and their loader chains
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    /// Plugin configuration
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Chunk splitting
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Development server settings
    #[serde(default)]
    pub dev_server: DevServerConfig,

    /// Root directory (computed from config file location)
    #[serde(skip)]
    pub root: PathBuf,

    /// Build mode (from CLI or NODE_ENV)
    #[serde(skip)]
    pub mode: Mode,
}

fn default_entry() -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("main".to_string(), "src/index.js".to_string());
    map
}

impl Config {
    /// Load configuration from a file path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let canonical_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let content = fs::read_to_string(&canonical_path)
            .with_context(|| format!("Failed to read config file: {}", canonical_path.display()))?;

        let root = canonical_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let config = Self::from_toml(&content, root)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration text rooted at `root` without validating it
    pub fn from_toml(content: &str, root: PathBuf) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse loom.toml")?;
        config.root = root;
        config.mode = Mode::from_env();
        Ok(config)
    }

    /// Create a default configuration rooted at `root`
    pub fn default_config(root: PathBuf) -> Self {
        Self {
            entry: default_entry(),
            output: OutputConfig::default(),
            rules: default_rules(),
            plugins: PluginsConfig::default(),
            optimization: OptimizationConfig::default(),
            dev_server: DevServerConfig::default(),
            root,
            mode: Mode::Development,
        }
    }

    /// Override the build mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.entry.is_empty() {
            anyhow::bail!("At least one entry must be specified in loom.toml");
        }

        for name in self.entry.keys() {
            self.resolve_entry(name)?;
        }

        RuleSet::compile(&self.rules)?;
        for rule in &self.rules {
            for stage in &rule.uses {
                if !loaders::is_known(&stage.loader) {
                    return Err(BuildError::UnknownLoader(stage.loader.clone()).into());
                }
            }
        }

        let mut names: Vec<&str> = self
            .optimization
            .split_chunks
            .cache_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        if !self.optimization.runtime_chunk.is_empty() {
            names.push(&self.optimization.runtime_chunk);
        }
        names.extend(self.entry.keys().map(String::as_str));
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        if names.len() != total {
            anyhow::bail!("Chunk names must be unique across entries, cache groups and the runtime chunk");
        }

        Ok(())
    }

    /// Get the absolute output directory path
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.path)
    }

    /// Locate the source file of an entry; build-fatal when missing
    pub fn resolve_entry(&self, name: &str) -> Result<PathBuf, BuildError> {
        let relative = self
            .entry
            .get(name)
            .ok_or_else(|| BuildError::UnknownEntry(name.to_string()))?;
        let full_path = self.root.join(relative);
        if !full_path.is_file() {
            return Err(BuildError::MissingEntry {
                name: name.to_string(),
                path: full_path,
            });
        }
        Ok(full_path)
    }

    /// Get all entry paths, sorted by entry name
    pub fn all_entries(&self) -> Vec<(String, PathBuf)> {
        self.entry
            .iter()
            .map(|(name, path)| (name.clone(), self.root.join(path)))
            .collect()
    }

    /// Public path, always ending with a slash
    pub fn public_path(&self) -> String {
        let public = &self.output.public_path;
        if public.ends_with('/') {
            public.clone()
        } else {
            format!("{}/", public)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_reproduce_stock_setup() {
        let config = Config::from_toml("", PathBuf::from("/app")).unwrap();

        assert_eq!(config.entry.get("main").map(String::as_str), Some("src/index.js"));
        assert_eq!(config.output.filename, "js/[name]-[hash].js");
        assert_eq!(config.plugins.extract_css.filename, "css/[name]-[hash].css");
        assert_eq!(config.rules.len(), 6);
        assert_eq!(config.dev_server.port, 8083);
        assert_eq!(config.dev_server.host, "0.0.0.0");
        assert!(!config.dev_server.overlay.warnings);
        assert_eq!(config.optimization.runtime_chunk, "manifest");
        assert_eq!(config.optimization.split_chunks.cache_groups[0].name, "vendor");
    }

    #[test]
    fn test_parse_rules_and_entries() {
        let content = r#"
            [entry]
            app = "src/app.js"

            [[rules]]
            test = '\.txt$'
            use = [{ loader = "url", options = { limit = 0, name = "[name].[ext]" } }]
        "#;
        let config = Config::from_toml(content, PathBuf::from("/app")).unwrap();

        assert_eq!(config.all_entries(), vec![("app".to_string(), PathBuf::from("/app/src/app.js"))]);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].uses[0].loader, "url");
        assert_eq!(config.rules[0].uses[0].options["limit"].as_integer(), Some(0));
    }

    #[test]
    fn test_missing_entry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = Config::default_config(dir.path().to_path_buf());

        let err = config.resolve_entry("main").unwrap_err();
        assert!(matches!(err, BuildError::MissingEntry { .. }));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_loader_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "").unwrap();

        let content = r#"
            [[rules]]
            test = '\.ts$'
            use = [{ loader = "ts" }]
        "#;
        let config = Config::from_toml(content, dir.path().to_path_buf()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown loader 'ts'"));
    }

    #[test]
    fn test_mode_from_env_value() {
        assert_eq!(Mode::from_env_value("production"), Mode::Production);
        assert_eq!(Mode::from_env_value("development"), Mode::Development);
        assert_eq!(Mode::from_env_value("test"), Mode::Development);
    }

    #[test]
    fn test_public_path_normalized() {
        let mut config = Config::default_config(PathBuf::from("/app"));
        config.output.public_path = "/assets".to_string();
        assert_eq!(config.public_path(), "/assets/");
    }
}
