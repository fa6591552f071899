//! Plugin system for Loom
//!
//! Plugins run after the chunks are rendered and operate on the whole
//! in-memory [`AssetSet`]: they can add, rewrite or drop output files. They
//! run in registration order, so later plugins see what earlier ones emitted.

mod copy;
mod extract;
mod html;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::bundler::{AssetSet, ChunkOutput};
use crate::config::Config;
use crate::error::BuildError;

pub use copy::CopyPlugin;
pub use extract::ExtractCssPlugin;
pub use html::{minify_html, HtmlPlugin};

/// Plugin hook context
pub struct PluginContext<'a> {
    pub config: &'a Config,

    /// Rendered chunks in load order; empty during `build_start`
    pub chunks: &'a [ChunkOutput],
}

/// Plugin trait - implement this to create a Loom plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name for logging and errors
    fn name(&self) -> &str;

    /// Called before any module is processed
    async fn build_start(&self, _ctx: &PluginContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once the chunks are rendered
    async fn process_assets(&self, assets: &mut AssetSet, ctx: &PluginContext<'_>) -> Result<()>;
}

/// Plugin manager
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    /// Create an empty plugin manager
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock plugins: stylesheet extraction, HTML generation, static copy
    pub fn with_defaults(config: &Config) -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(ExtractCssPlugin::new(config.plugins.extract_css.clone())));
        manager.register(Arc::new(HtmlPlugin::new(config.plugins.html.clone())));
        manager.register(Arc::new(CopyPlugin::new(config.plugins.copy.clone())));
        manager
    }

    /// Register a plugin
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run build_start hooks
    pub async fn run_build_start(&self, ctx: &PluginContext<'_>) -> Result<()> {
        for plugin in &self.plugins {
            plugin
                .build_start(ctx)
                .await
                .map_err(|e| BuildError::plugin(plugin.name(), format!("{:#}", e)))?;
        }
        Ok(())
    }

    /// Run process_assets hooks
    pub async fn run_process_assets(&self, assets: &mut AssetSet, ctx: &PluginContext<'_>) -> Result<()> {
        for plugin in &self.plugins {
            debug!("Running plugin: {}", plugin.name());
            plugin
                .process_assets(assets, ctx)
                .await
                .map_err(|e| BuildError::plugin(plugin.name(), format!("{:#}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{Asset, AssetKind};
    use std::path::PathBuf;

    struct Banner;

    #[async_trait]
    impl Plugin for Banner {
        fn name(&self) -> &str {
            "banner"
        }

        async fn process_assets(&self, assets: &mut AssetSet, _ctx: &PluginContext<'_>) -> Result<()> {
            assets.insert(Asset::new("BANNER.txt", "built with loom", AssetKind::Static));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn process_assets(&self, _assets: &mut AssetSet, _ctx: &PluginContext<'_>) -> Result<()> {
            anyhow::bail!("out of ink")
        }
    }

    #[test]
    fn test_default_plugin_order() {
        let config = Config::default_config(PathBuf::from("/app"));
        let manager = PluginManager::with_defaults(&config);
        assert_eq!(manager.names(), vec!["extract-css", "html", "copy"]);
    }

    #[tokio::test]
    async fn test_plugins_run_in_order_and_failures_are_named() {
        let config = Config::default_config(PathBuf::from("/app"));
        let ctx = PluginContext {
            config: &config,
            chunks: &[],
        };
        let mut assets = AssetSet::new();

        let mut manager = PluginManager::new();
        manager.register(Arc::new(Banner));
        manager.run_process_assets(&mut assets, &ctx).await.unwrap();
        assert!(assets.contains("BANNER.txt"));

        manager.register(Arc::new(Broken));
        let err = manager.run_process_assets(&mut assets, &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "plugin 'broken' failed: out of ink");
    }
}
