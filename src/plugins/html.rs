//! HTML document generation
//!
//! Reads the template, links every chunk's stylesheet before `</head>` and
//! every chunk's script before `</body>` in load order, and minifies the
//! result in production.

use std::fs;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Plugin, PluginContext};
use crate::bundler::{Asset, AssetKind, AssetSet};
use crate::config::{HtmlConfig, HtmlMinifyConfig};

/// Elements whose content is copied verbatim by the minifier
const RAW_TEXT: &[&str] = &["pre", "textarea", "script", "style"];

pub struct HtmlPlugin {
    options: HtmlConfig,
}

impl HtmlPlugin {
    pub fn new(options: HtmlConfig) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    async fn build_start(&self, ctx: &PluginContext<'_>) -> Result<()> {
        let template = ctx.config.root.join(&self.options.template);
        if !template.is_file() {
            anyhow::bail!("template not found: {}", template.display());
        }
        Ok(())
    }

    async fn process_assets(&self, assets: &mut AssetSet, ctx: &PluginContext<'_>) -> Result<()> {
        let template_path = ctx.config.root.join(&self.options.template);
        let template = fs::read_to_string(&template_path)
            .with_context(|| format!("Failed to read template: {}", template_path.display()))?;
        let public_path = ctx.config.public_path();

        let mut links = String::new();
        let mut scripts = String::new();
        for chunk in ctx.chunks {
            if let Some(style) = assets.for_chunk(&chunk.name, AssetKind::Style) {
                links.push_str(&format!(
                    "<link href=\"{}{}\" rel=\"stylesheet\">",
                    public_path, style.path
                ));
            }
            scripts.push_str(&format!(
                "<script type=\"text/javascript\" src=\"{}{}\"></script>",
                public_path, chunk.script
            ));
        }

        let mut html = insert_before(&template, "</head>", &links);
        html = insert_before(&html, "</body>", &scripts);

        if ctx.config.mode.is_production() {
            html = minify_html(&html, &self.options.minify);
        }

        debug!("Generated {} from {}", self.options.filename, template_path.display());
        assets.insert(
            Asset::new(self.options.filename.clone(), html, AssetKind::Html).with_source(template_path),
        );
        Ok(())
    }
}

/// Insert `markup` before the last `tag` (case-insensitive), or append it
fn insert_before(html: &str, tag: &str, markup: &str) -> String {
    match html.to_ascii_lowercase().rfind(tag) {
        Some(index) => format!("{}{}{}", &html[..index], markup, &html[index..]),
        None => format!("{}{}", html, markup),
    }
}

/// Minify an HTML document
pub fn minify_html(html: &str, options: &HtmlMinifyConfig) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while !rest.is_empty() {
        let Some(open) = rest.find('<') else {
            push_text(&mut out, rest, options);
            break;
        };
        push_text(&mut out, &rest[..open], options);
        rest = &rest[open..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|i| i + 3).unwrap_or(rest.len());
            // conditional comments carry markup
            if !options.remove_comments || rest.starts_with("<!--[if") {
                out.push_str(&rest[..end]);
            }
            rest = &rest[end..];
            continue;
        }

        let Some(len) = tag_length(rest) else {
            out.push('<');
            rest = &rest[1..];
            continue;
        };
        let tag = &rest[..len];
        rest = &rest[len..];
        out.push_str(&minify_tag(tag, options.remove_attribute_quotes));

        if let Some(name) = raw_text_element(tag) {
            let end = rest
                .to_ascii_lowercase()
                .find(&format!("</{}", name))
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
        }
    }

    out
}

fn push_text(out: &mut String, text: &str, options: &HtmlMinifyConfig) {
    if !options.collapse_whitespace {
        out.push_str(text);
        return;
    }
    if text.trim().is_empty() {
        return;
    }

    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
}

/// Length of the tag at the start of `rest`, if it is one
fn tag_length(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    match bytes.get(1) {
        Some(c) if c.is_ascii_alphabetic() || *c == b'/' || *c == b'!' => {}
        _ => return None,
    }

    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i + 1),
            None => {}
        }
    }
    None
}

fn raw_text_element(tag: &str) -> Option<&'static str> {
    let name: String = tag[1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    RAW_TEXT.iter().copied().find(|raw| *raw == name)
}

fn can_unquote(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, '"' | '\'' | '`' | '=' | '<' | '>'))
}

/// Normalize whitespace inside a tag and drop attribute quotes where safe
fn minify_tag(tag: &str, remove_quotes: bool) -> String {
    let inner = &tag[1..tag.len() - 1];
    if inner.starts_with('/') || inner.starts_with('!') {
        return format!("<{}>", inner.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    let (inner, self_closing) = match inner.trim_end().strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (inner, false),
    };
    let bytes = inner.as_bytes();
    let name_end = inner.find(char::is_whitespace).unwrap_or(inner.len());
    let mut out = format!("<{}", &inner[..name_end]);
    let mut last_unquoted = false;
    let mut i = name_end;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' {
            i += 1;
        }
        out.push(' ');
        out.push_str(&inner[start..i]);
        last_unquoted = false;

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b'=' {
            continue;
        }
        j += 1;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }

        let (value, next) = match bytes.get(j) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let close = inner[j + 1..]
                    .find(q as char)
                    .map(|k| j + 1 + k)
                    .unwrap_or(bytes.len());
                (&inner[j + 1..close], (close + 1).min(bytes.len()))
            }
            _ => {
                let end = inner[j..]
                    .find(char::is_whitespace)
                    .map(|k| j + k)
                    .unwrap_or(bytes.len());
                (&inner[j..end], end)
            }
        };
        i = next;

        out.push('=');
        if remove_quotes && can_unquote(value) {
            out.push_str(value);
            last_unquoted = true;
        } else {
            let q = if value.contains('"') { '\'' } else { '"' };
            out.push(q);
            out.push_str(value);
            out.push(q);
        }
    }

    if self_closing {
        if last_unquoted {
            out.push(' ');
        }
        out.push('/');
    }
    out.push('>');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{ChunkKind, ChunkOutput};
    use crate::config::{Config, Mode};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn chunk(name: &str, kind: ChunkKind) -> ChunkOutput {
        ChunkOutput {
            name: name.to_string(),
            kind,
            script: format!("js/{}.js", name),
            styles: Vec::new(),
        }
    }

    async fn render(mode: Mode) -> String {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/index.html"),
            "<html>\n<head>\n  <title>x</title>\n</head>\n<body>\n  <div id=\"app\"></div>\n</body>\n</html>\n",
        )
        .unwrap();

        let config = Config::default_config(dir.path().to_path_buf()).with_mode(mode);
        let chunks = vec![
            chunk("manifest", ChunkKind::Runtime),
            chunk("vendor", ChunkKind::Shared),
            chunk("main", ChunkKind::Entry),
        ];
        let ctx = PluginContext {
            config: &config,
            chunks: &chunks,
        };

        let mut assets = AssetSet::new();
        assets.insert(Asset::new("css/main.css", ".a{}", AssetKind::Style).with_chunk("main"));

        let plugin = HtmlPlugin::new(config.plugins.html.clone());
        plugin.build_start(&ctx).await.unwrap();
        plugin.process_assets(&mut assets, &ctx).await.unwrap();
        assets.get("index.html").unwrap().text().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_injects_links_and_scripts_in_chunk_order() {
        let html = render(Mode::Development).await;
        assert_eq!(
            html,
            "<html>\n<head>\n  <title>x</title>\n<link href=\"/css/main.css\" rel=\"stylesheet\"></head>\n<body>\n  <div id=\"app\"></div>\n\
             <script type=\"text/javascript\" src=\"/js/manifest.js\"></script>\
             <script type=\"text/javascript\" src=\"/js/vendor.js\"></script>\
             <script type=\"text/javascript\" src=\"/js/main.js\"></script></body>\n</html>\n"
        );
    }

    #[tokio::test]
    async fn test_production_document_is_minified() {
        let html = render(Mode::Production).await;
        assert_eq!(
            html,
            "<html><head><title>x</title><link href=/css/main.css rel=stylesheet></head><body><div id=app></div>\
             <script type=text/javascript src=/js/manifest.js></script>\
             <script type=text/javascript src=/js/vendor.js></script>\
             <script type=text/javascript src=/js/main.js></script></body></html>"
        );
    }

    #[tokio::test]
    async fn test_missing_template_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = Config::default_config(dir.path().to_path_buf());
        let ctx = PluginContext {
            config: &config,
            chunks: &[],
        };
        let err = HtmlPlugin::new(config.plugins.html.clone())
            .build_start(&ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("template not found"));
    }

    #[test]
    fn test_minifier_preserves_raw_text() {
        let source = "<!DOCTYPE html>\n<html>\n  <head>\n    <!-- analytics -->\n    <meta charset=\"utf-8\">\n    <title>My   App</title>\n  </head>\n  <body class=\"app main\" id=\"root\">\n    <pre>  keep\n   this  </pre>\n    <script>var a = \"x  y\";</script>\n    <br />\n  </body>\n</html>\n";
        let html = minify_html(source, &HtmlMinifyConfig::default());
        assert_eq!(
            html,
            "<!DOCTYPE html><html><head><meta charset=utf-8><title>My App</title></head>\
             <body class=\"app main\" id=root><pre>  keep\n   this  </pre><script>var a = \"x  y\";</script><br/></body></html>"
        );
    }

    #[test]
    fn test_minifier_switches() {
        let options = HtmlMinifyConfig {
            remove_comments: false,
            collapse_whitespace: false,
            remove_attribute_quotes: false,
        };
        let source = "<p  class=\"a\" >\n  <!-- note -->\n</p>";
        assert_eq!(minify_html(source, &options), "<p class=\"a\">\n  <!-- note -->\n</p>");
    }
}
