//! Verbatim copy of static files into the output

use std::fs;

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use super::{Plugin, PluginContext};
use crate::bundler::{Asset, AssetKind, AssetSet};
use crate::config::CopyPattern;
use crate::utils::{clean_path, path_to_module_id};

pub struct CopyPlugin {
    patterns: Vec<CopyPattern>,
}

impl CopyPlugin {
    pub fn new(patterns: Vec<CopyPattern>) -> Self {
        Self { patterns }
    }
}

fn ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid ignore pattern: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl Plugin for CopyPlugin {
    fn name(&self) -> &str {
        "copy"
    }

    async fn build_start(&self, ctx: &PluginContext<'_>) -> Result<()> {
        for pattern in &self.patterns {
            let from = ctx.config.root.join(&pattern.from);
            if !from.exists() {
                anyhow::bail!("copy source not found: {}", from.display());
            }
            ignore_set(&pattern.ignore)?;
        }
        Ok(())
    }

    async fn process_assets(&self, assets: &mut AssetSet, ctx: &PluginContext<'_>) -> Result<()> {
        for pattern in &self.patterns {
            let from = ctx.config.root.join(&pattern.from);
            let ignore = ignore_set(&pattern.ignore)?;
            let mut copied = 0;

            for entry in WalkDir::new(&from).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", from.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = match entry.path().strip_prefix(&from) {
                    Ok(rel) if !rel.as_os_str().is_empty() => path_to_module_id(rel),
                    _ => entry.file_name().to_string_lossy().into_owned(),
                };
                if ignore.is_match(&relative) {
                    debug!("Skipping ignored file: {}", relative);
                    continue;
                }

                let contents = fs::read(entry.path())
                    .with_context(|| format!("Failed to read {}", entry.path().display()))?;
                let target = clean_path(&format!("{}/{}", pattern.to, relative));
                let target = target.trim_start_matches('/');
                assets.insert(Asset::new(target, contents, AssetKind::Static).with_source(entry.path()));
                copied += 1;
            }

            debug!("Copied {} file(s) from {}", copied, from.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn write(dir: &TempDir, path: &str, contents: &[u8]) {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    #[tokio::test]
    async fn test_copies_tree_verbatim_and_skips_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/static/robots.txt", b"User-agent: *\n");
        write(&dir, "src/static/img/icon.ico", &[0, 1, 2, 255]);
        write(&dir, "src/static/notes/README.md", b"skip me");

        let config = Config::default_config(dir.path().to_path_buf());
        let ctx = PluginContext {
            config: &config,
            chunks: &[],
        };
        let plugin = CopyPlugin::new(vec![CopyPattern {
            from: "src/static".to_string(),
            to: "static".to_string(),
            ignore: vec!["**/*.md".to_string()],
        }]);

        let mut assets = AssetSet::new();
        plugin.build_start(&ctx).await.unwrap();
        plugin.process_assets(&mut assets, &ctx).await.unwrap();

        let paths: Vec<&str> = assets.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["static/img/icon.ico", "static/robots.txt"]);
        assert_eq!(assets.get("static/img/icon.ico").unwrap().contents, vec![0, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = Config::default_config(dir.path().to_path_buf());
        let ctx = PluginContext {
            config: &config,
            chunks: &[],
        };
        let err = CopyPlugin::new(config.plugins.copy.clone())
            .build_start(&ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("copy source not found"));
    }
}
