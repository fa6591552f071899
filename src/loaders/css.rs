//! CSS stage: `url()` resolution, CSS modules and validation

use std::fmt;
use std::path::Path;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{Content, Loader, LoaderContext};
use crate::error::BuildError;
use crate::utils::{module_id, stem_and_ext};

static URL_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#).unwrap()
});

static IDENT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(name|local|hash)(?::(base64|hex))?(?::(\d+))?\]").unwrap()
});

fn default_local_ident_name() -> String {
    "[hash:base64]".to_string()
}

fn default_url() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CssOptions {
    /// Scope class names per file and export the mapping
    pub modules: bool,

    /// Template for scoped class names
    #[serde(default = "default_local_ident_name")]
    pub local_ident_name: String,

    /// Minify the output; defaults to on in production
    pub minimize: Option<bool>,

    /// Resolve `url()` references through the build
    #[serde(default = "default_url")]
    pub url: bool,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            modules: false,
            local_ident_name: default_local_ident_name(),
            minimize: None,
            url: default_url(),
        }
    }
}

pub struct CssLoader {
    options: CssOptions,
}

impl CssLoader {
    pub fn new(options: CssOptions) -> Self {
        Self { options }
    }

    fn rewrite_urls(&self, css: &str, ctx: &mut LoaderContext<'_>) -> Result<String> {
        let mut out = String::with_capacity(css.len());
        let mut last = 0;

        for caps in URL_REF.captures_iter(css) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
            let specifier = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            if !is_linkable(specifier) {
                continue;
            }

            let linked = ctx.linker.link(specifier, ctx.resource)?;
            out.push_str(&css[last..whole.start]);
            out.push_str(&format!("url(\"{}\")", linked.url));
            last = whole.end;

            ctx.file_dependencies.push(linked.path);
            ctx.emitted.extend(linked.emitted);
        }

        out.push_str(&css[last..]);
        Ok(out)
    }

    fn scoped_name(&self, class: &str, ctx: &LoaderContext<'_>) -> String {
        let (stem, _) = stem_and_ext(ctx.resource);
        let id = module_id(ctx.resource, ctx.root);
        let digest = Sha256::digest(format!("{}+{}", id, class).as_bytes());

        let name = IDENT_TOKEN.replace_all(&self.options.local_ident_name, |caps: &Captures<'_>| {
            match &caps[1] {
                "name" => stem.clone(),
                "local" => class.to_string(),
                _ => {
                    let encoded = match caps.get(2).map(|m| m.as_str()) {
                        Some("hex") => hex::encode(&digest[..]),
                        _ => URL_SAFE_NO_PAD.encode(&digest[..]),
                    };
                    let len = caps
                        .get(3)
                        .and_then(|m| m.as_str().parse::<usize>().ok())
                        .unwrap_or(6);
                    encoded[..len.min(encoded.len())].to_string()
                }
            }
        });

        let mut ident: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if ident.starts_with(|c: char| c.is_ascii_digit()) {
            ident.insert(0, '_');
        }
        ident
    }
}

impl Loader for CssLoader {
    fn name(&self) -> &str {
        "css"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let mut sheet = content.into_stylesheet(self.name(), ctx.resource)?;

        if self.options.url {
            sheet.css = self.rewrite_urls(&sheet.css, ctx)?;
        }

        if self.options.modules {
            let mut renamed = Vec::new();
            sheet.css = scope_classes(&sheet.css, &mut |class| {
                let scoped = self.scoped_name(class, ctx);
                renamed.push((class.to_string(), scoped.clone()));
                scoped
            });
            sheet.locals.extend(renamed);
        }

        let minimize = self
            .options
            .minimize
            .unwrap_or_else(|| ctx.mode.is_production());

        if minimize {
            sheet.css = minify_css(&sheet.css, ctx.resource)?;
        } else {
            StyleSheet::parse(&sheet.css, parser_options(ctx.resource)).map_err(|e| css_error(ctx.resource, e))?;
        }
        Ok(Content::Style(sheet))
    }
}

fn parser_options<'i>(path: &Path) -> ParserOptions<'i> {
    ParserOptions {
        filename: path.display().to_string(),
        ..ParserOptions::default()
    }
}

/// Parse and minify a stylesheet
pub fn minify_css(css: &str, path: &Path) -> Result<String, BuildError> {
    let mut stylesheet = StyleSheet::parse(css, parser_options(path)).map_err(|e| css_error(path, e))?;
    stylesheet
        .minify(MinifyOptions::default())
        .map_err(|e| css_error(path, e))?;
    let printed = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| css_error(path, e))?;
    Ok(printed.code)
}

/// Map a lightningcss failure onto a located syntax error
pub(super) fn css_error<T: fmt::Display>(path: &Path, err: lightningcss::error::Error<T>) -> BuildError {
    let (line, column) = err
        .loc
        .as_ref()
        .map(|loc| (loc.line as usize + 1, loc.column as usize))
        .unwrap_or((0, 0));
    BuildError::Syntax {
        path: path.to_path_buf(),
        line,
        column,
        message: err.kind.to_string(),
    }
}

/// References the build should not touch: data URIs, remote URLs, fragments
/// and root-absolute paths
fn is_linkable(specifier: &str) -> bool {
    !(specifier.is_empty()
        || specifier.starts_with("data:")
        || specifier.starts_with('#')
        || specifier.starts_with('/')
        || specifier.contains("://"))
}

#[derive(Clone, Copy)]
enum Block {
    Rules,
    Keyframes,
    Declarations,
}

/// Rename every class selector outside declaration blocks. `:global(...)`
/// keeps its contents as written, `:local(...)` is scoped like plain text.
fn scope_classes(css: &str, rename: &mut dyn FnMut(&str) -> String) -> String {
    let chars: Vec<char> = css.chars().collect();
    let mut out = String::with_capacity(css.len());
    let mut prelude = String::new();
    let mut stack: Vec<Block> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let in_declarations = matches!(stack.last(), Some(Block::Declarations));
        let target = if in_declarations { &mut out } else { &mut prelude };

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let end = find_comment_end(&chars, i + 2);
            target.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == '"' || c == '\'' {
            let end = find_string_end(&chars, i);
            target.extend(&chars[i..end]);
            i = end;
            continue;
        }

        if in_declarations {
            out.push(c);
            match c {
                '{' => stack.push(Block::Declarations),
                '}' => {
                    stack.pop();
                }
                _ => {}
            }
            i += 1;
            continue;
        }

        match c {
            '{' => {
                let head = prelude.trim_start();
                let block = if let Some(at_rule) = head.strip_prefix('@') {
                    out.push_str(&prelude);
                    if at_rule.starts_with("keyframes") || at_rule.contains("-keyframes") {
                        Block::Keyframes
                    } else if ["media", "supports", "document", "layer", "container"]
                        .iter()
                        .any(|k| at_rule.starts_with(k))
                    {
                        Block::Rules
                    } else {
                        Block::Declarations
                    }
                } else {
                    if matches!(stack.last(), Some(Block::Keyframes)) {
                        out.push_str(&prelude);
                    } else {
                        out.push_str(&scope_selector(&prelude, rename));
                    }
                    Block::Declarations
                };
                out.push('{');
                stack.push(block);
                prelude.clear();
            }
            '}' => {
                out.push_str(&prelude);
                out.push('}');
                prelude.clear();
                stack.pop();
            }
            ';' => {
                out.push_str(&prelude);
                out.push(';');
                prelude.clear();
            }
            _ => prelude.push(c),
        }
        i += 1;
    }

    out.push_str(&prelude);
    out
}

fn find_comment_end(chars: &[char], from: usize) -> usize {
    let mut j = from;
    while j + 1 < chars.len() {
        if chars[j] == '*' && chars[j + 1] == '/' {
            return j + 2;
        }
        j += 1;
    }
    chars.len()
}

fn find_string_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote || c == '\n' => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '-'
}

fn scope_selector(selector: &str, rename: &mut dyn FnMut(&str) -> String) -> String {
    let chars: Vec<char> = selector.chars().collect();
    let mut out = String::with_capacity(selector.len());
    let mut brackets = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let rest: String = chars[i..chars.len().min(i + 8)].iter().collect();

        if c == '"' || c == '\'' {
            let end = find_string_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        match c {
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            ':' if brackets == 0 && (rest.starts_with(":global(") || rest.starts_with(":local(")) => {
                let open = i + rest.find('(').unwrap_or(0);
                let close = matching_paren(&chars, open);
                let inner: String = chars[open + 1..close.min(chars.len())].iter().collect();
                if rest.starts_with(":global(") {
                    out.push_str(&inner);
                } else {
                    out.push_str(&scope_selector(&inner, rename));
                }
                i = close + 1;
                continue;
            }
            '.' if brackets == 0 && chars.get(i + 1).is_some_and(|&n| is_ident_start(n)) => {
                let mut end = i + 1;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '-') {
                    end += 1;
                }
                let class: String = chars[i + 1..end].iter().collect();
                out.push('.');
                out.push_str(&rename(&class));
                i = end;
                continue;
            }
            _ => {}
        }

        out.push(c);
        i += 1;
    }

    out
}

fn matching_paren(chars: &[char], open: usize) -> usize {
    let mut depth = 0usize;
    for (j, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return j;
                }
            }
            _ => {}
        }
    }
    chars.len()
}
