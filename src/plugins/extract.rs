//! Stylesheet extraction
//!
//! Concatenates the extracted stylesheets of every chunk into one file per
//! chunk, named by the configured template.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{Plugin, PluginContext};
use crate::bundler::{Asset, AssetKind, AssetSet};
use crate::config::ExtractCssConfig;
use crate::loaders::minify_css;
use crate::utils::{hash_content, render_template, TemplateVars};

pub struct ExtractCssPlugin {
    options: ExtractCssConfig,
}

impl ExtractCssPlugin {
    pub fn new(options: ExtractCssConfig) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Plugin for ExtractCssPlugin {
    fn name(&self) -> &str {
        "extract-css"
    }

    async fn process_assets(&self, assets: &mut AssetSet, ctx: &PluginContext<'_>) -> Result<()> {
        for chunk in ctx.chunks.iter().filter(|c| !c.styles.is_empty()) {
            let mut css = String::new();
            for style in &chunk.styles {
                css.push_str(style.css.trim_end());
                css.push('\n');
            }

            if ctx.config.mode.is_production() {
                css = minify_css(&css, Path::new(&format!("{}.css", chunk.name)))?;
            }

            let hash = hash_content(css.as_bytes());
            let path = render_template(
                &self.options.filename,
                &TemplateVars {
                    name: &chunk.name,
                    ext: "css",
                    hash: &hash,
                    hash_length: ctx.config.output.hash_length,
                },
            );
            debug!("Extracted {} stylesheet(s) into {}", chunk.styles.len(), path);

            assets.insert(Asset::new(path, css, AssetKind::Style).with_chunk(&chunk.name));
        }

        Ok(())
    }
}
