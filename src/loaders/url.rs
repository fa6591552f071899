//! Asset stage: inline small files as data URIs, emit the rest

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use super::{Content, Loader, LoaderContext};
use crate::utils::{hash_content, mime_type, render_template, stem_and_ext, TemplateVars};

fn default_limit() -> usize {
    10000
}

fn default_name() -> String {
    "[name].[hash:7].[ext]".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UrlOptions {
    /// Files strictly smaller than this many bytes are inlined
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Output path template for emitted files
    #[serde(default = "default_name")]
    pub name: String,

    /// MIME type override for data URIs
    pub mimetype: Option<String>,
}

impl Default for UrlOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            name: default_name(),
            mimetype: None,
        }
    }
}

pub struct UrlLoader {
    options: UrlOptions,
}

impl UrlLoader {
    pub fn new(options: UrlOptions) -> Self {
        Self { options }
    }
}

impl Loader for UrlLoader {
    fn name(&self) -> &str {
        "url"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let bytes = content.into_bytes();
        let (stem, ext) = stem_and_ext(ctx.resource);

        let url = if bytes.len() < self.options.limit {
            let mime = self
                .options
                .mimetype
                .clone()
                .unwrap_or_else(|| mime_type(&ext).split(';').next().unwrap_or_default().to_string());
            format!("data:{};base64,{}", mime, STANDARD.encode(&bytes))
        } else {
            let hash = hash_content(&bytes);
            let path = render_template(
                &self.options.name,
                &TemplateVars {
                    name: &stem,
                    ext: &ext,
                    hash: &hash,
                    hash_length: 7,
                },
            );
            let url = format!("{}{}", ctx.public_path, path);
            ctx.emit_file(path, bytes);
            url
        };

        let script = format!("module.exports = {};", serde_json::to_string(&url)?);
        ctx.asset_url = Some(url);
        Ok(Content::Script(script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::loaders::testing::{context, NoLinker};
    use std::path::Path;

    fn load(options: UrlOptions, bytes: &[u8]) -> (Content, Option<String>, Vec<String>) {
        let path = Path::new("/app/src/img/logo.png");
        let mut ctx = context(path, Mode::Development, &NoLinker);
        let out = UrlLoader::new(options).apply(Content::Raw(bytes.to_vec()), &mut ctx).unwrap();
        let emitted = ctx.emitted.iter().map(|f| f.path.clone()).collect();
        (out, ctx.asset_url, emitted)
    }

    #[test]
    fn test_small_files_are_inlined() {
        let (out, url, emitted) = load(UrlOptions::default(), b"png");
        assert_eq!(url.as_deref(), Some("data:image/png;base64,cG5n"));
        assert_eq!(out, Content::Script("module.exports = \"data:image/png;base64,cG5n\";".into()));
        assert!(emitted.is_empty());
    }

    #[test]
    fn test_large_files_are_emitted() {
        let options = UrlOptions {
            limit: 2,
            name: "static/img/[name].[hash:7].[ext]".into(),
            mimetype: None,
        };
        let (_, url, emitted) = load(options, b"png");
        let expected = format!("static/img/logo.{}.png", &hash_content(b"png")[..7]);

        assert_eq!(emitted, vec![expected.clone()]);
        assert_eq!(url, Some(format!("/{}", expected)));
    }

    #[test]
    fn test_limit_is_exclusive() {
        let options = UrlOptions {
            limit: 3,
            ..UrlOptions::default()
        };
        let (_, url, emitted) = load(options, b"png");
        assert_eq!(emitted.len(), 1);
        assert!(url.is_some_and(|u| u.starts_with("/logo.")));
    }
}
