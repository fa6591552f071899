//! Less preprocessing stage
//!
//! Supports the subset of Less that plain stylesheets lean on: `//` comments,
//! `@variable` declarations with lexical scope (including `@{var}`
//! interpolation), nested rules with `&` parent references, and nested
//! conditional at-rules. Mixins and guards are rejected. Local `@import`s
//! are inlined once each before compilation; remote ones are hoisted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{Content, Loader, LoaderContext, Stylesheet};
use crate::error::BuildError;
use crate::resolver::Resolver;
use crate::utils::line_column;

const MAX_VARIABLE_DEPTH: usize = 16;

static ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"~"([^"]*)"|~'([^']*)'"#).unwrap());

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"@import\s*(?:\((?P<options>[^)]*)\)\s*)?(?:url\(\s*(?:"(?P<url_dq>[^"]*)"|'(?P<url_sq>[^']*)'|(?P<bare>[^)"'\s]*))\s*\)|"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')(?P<media>[^;{}]*);"#,
    )
    .unwrap()
});

const IMPORT_OPTIONS: &[&str] = &["less", "css", "once"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LessOptions {
    /// Variables that override the stylesheet's own top-level definitions
    pub variables: BTreeMap<String, String>,
}

pub struct LessLoader {
    options: LessOptions,
}

impl LessLoader {
    pub fn new(options: LessOptions) -> Self {
        Self { options }
    }
}

impl Loader for LessLoader {
    fn name(&self) -> &str {
        "less"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let sheet = content.into_stylesheet(self.name(), ctx.resource)?;
        let resource = ctx.resource;

        let mut imports = Imports::new(resource);
        let source = imports.inline(&sheet.css, resource)?;
        ctx.file_dependencies.extend(imports.files);

        let mut css = compile(&source, &self.options.variables).map_err(|issue| BuildError::Syntax {
            path: resource.to_path_buf(),
            line: issue.line,
            column: issue.column,
            message: issue.message,
        })?;
        if !imports.remote.is_empty() {
            css = format!("{}\n{}", imports.remote.join("\n"), css);
        }
        Ok(Content::Style(Stylesheet {
            css,
            locals: sheet.locals,
        }))
    }
}

/// `@import` inlining state for one stylesheet
struct Imports {
    resolver: Resolver,
    /// Every file inlined so far, the entry included
    seen: Vec<PathBuf>,
    /// Imported files, in inlining order
    files: Vec<PathBuf>,
    /// Remote `@import` statements, kept verbatim
    remote: Vec<String>,
}

impl Imports {
    fn new(entry: &Path) -> Self {
        Self {
            resolver: Resolver::new(&["less", "css"]),
            seen: vec![canonical(entry)],
            files: Vec::new(),
            remote: Vec::new(),
        }
    }

    /// `source` with each local `@import` replaced by the imported file
    fn inline(&mut self, source: &str, path: &Path) -> Result<String> {
        let stripped = strip_comments(source);
        let mut out = String::with_capacity(stripped.len());
        let mut last = 0;

        for caps in IMPORT.captures_iter(&stripped) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let at_statement_start = stripped[..whole.start()]
                .trim_end()
                .chars()
                .last()
                .map_or(true, |c| matches!(c, ';' | '{' | '}'));
            if !at_statement_start {
                continue;
            }

            let specifier = ["url_dq", "url_sq", "bare", "dq", "sq"]
                .iter()
                .find_map(|group| caps.name(group))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let media = caps.name("media").map(|m| m.as_str().trim()).unwrap_or_default();

            out.push_str(&stripped[last..whole.start()]);
            last = whole.end();

            if is_remote(specifier) {
                self.remote.push(whole.as_str().to_string());
                continue;
            }

            let options = caps.name("options").map(|m| m.as_str()).unwrap_or_default();
            if let Some(option) = options
                .split(',')
                .map(str::trim)
                .find(|o| !o.is_empty() && !IMPORT_OPTIONS.contains(o))
            {
                let (line, column) = line_column(&stripped, whole.start());
                return Err(BuildError::Syntax {
                    path: path.to_path_buf(),
                    line,
                    column,
                    message: format!("unsupported @import option '{}'", option),
                }
                .into());
            }

            // `@import "theme"` is relative to the importing file, as in Less
            let request = if specifier.starts_with(['.', '/', '~']) {
                specifier.to_string()
            } else {
                format!("./{}", specifier)
            };
            let target = self.resolver.resolve(&request, path).map_err(|_| BuildError::Unresolved {
                specifier: specifier.to_string(),
                importer: path.to_path_buf(),
            })?;
            let target = canonical(&target);
            if self.seen.contains(&target) {
                continue;
            }
            self.seen.push(target.clone());

            let text = fs::read_to_string(&target)
                .with_context(|| format!("Failed to read {}", target.display()))?;
            let inlined = self.inline(&text, &target)?;
            self.files.push(target);

            if media.is_empty() {
                out.push_str(&inlined);
            } else {
                out.push_str(&format!("@media {} {{\n{}\n}}", media, inlined));
            }
            out.push('\n');
        }

        out.push_str(&stripped[last..]);
        Ok(out)
    }
}

fn is_remote(specifier: &str) -> bool {
    ["http://", "https://", "//", "data:"]
        .iter()
        .any(|prefix| specifier.starts_with(prefix))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LessIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Debug)]
enum Node {
    Declaration { text: String, at: usize },
    Variable { name: String, value: String },
    Rule { selector: String, children: Vec<Node>, at: usize },
    AtRule { prelude: String, children: Option<Vec<Node>>, at: usize },
}

/// Compile Less source to flat CSS
pub(crate) fn compile(source: &str, overrides: &BTreeMap<String, String>) -> Result<String, LessIssue> {
    let chars: Vec<char> = strip_comments(source).chars().collect();
    let mut parser = Parser { chars: &chars, pos: 0 };
    let nodes = parser.block(None)?;

    let overrides = overrides
        .iter()
        .map(|(k, v)| (k.trim_start_matches('@').to_string(), v.clone()))
        .collect();
    let emitter = Emitter { chars: &chars };
    let mut out = String::new();
    emitter.emit(&nodes, &[], &Scope::root(overrides), true, &mut out)?;
    Ok(out)
}

fn issue_at(chars: &[char], at: usize, message: impl Into<String>) -> LessIssue {
    let mut line = 1;
    let mut column = 1;
    for &c in &chars[..at.min(chars.len())] {
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    LessIssue {
        line,
        column,
        message: message.into(),
    }
}

/// Blank out `//` and `/* */` comments, keeping offsets and newlines
fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut quote: Option<char> = None;
    let mut parens = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == q || c == '\n' {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '(' => {
                parens += 1;
                out.push(c);
            }
            ')' => {
                parens = parens.saturating_sub(1);
                out.push(c);
            }
            '/' if chars.get(i + 1) == Some(&'/') && parens == 0 => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                    i += 1;
                }
                if i < chars.len() {
                    out.push_str("  ");
                    i += 2;
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

struct Parser<'c> {
    chars: &'c [char],
    pos: usize,
}

impl<'c> Parser<'c> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Parse statements until the `}` closing a block opened at `open`,
    /// or until end of input for the top level
    fn block(&mut self, open: Option<usize>) -> Result<Vec<Node>, LessIssue> {
        let mut nodes = Vec::new();
        let mut buf = String::new();
        let mut buf_start = self.pos;

        loop {
            let Some(c) = self.peek() else {
                if let Some(open) = open {
                    return Err(issue_at(self.chars, open, "unclosed block"));
                }
                self.statement(&buf, buf_start, &mut nodes)?;
                return Ok(nodes);
            };

            match c {
                '"' | '\'' => {
                    if buf.trim().is_empty() {
                        buf_start = self.pos;
                    }
                    self.copy_string(c, &mut buf)?;
                }
                '(' => {
                    if buf.trim().is_empty() {
                        buf_start = self.pos;
                    }
                    self.copy_parens(&mut buf)?;
                }
                '@' if self.chars.get(self.pos + 1) == Some(&'{') => {
                    if buf.trim().is_empty() {
                        buf_start = self.pos;
                    }
                    while let Some(c) = self.peek() {
                        buf.push(c);
                        self.pos += 1;
                        if c == '}' {
                            break;
                        }
                    }
                }
                ';' => {
                    self.pos += 1;
                    self.statement(&buf, buf_start, &mut nodes)?;
                    buf.clear();
                }
                '{' => {
                    let at = self.pos;
                    self.pos += 1;
                    let prelude = buf.trim().to_string();
                    if prelude.is_empty() {
                        return Err(issue_at(self.chars, at, "block without selector"));
                    }
                    let children = self.block(Some(at))?;
                    if prelude.starts_with('@') {
                        nodes.push(Node::AtRule {
                            prelude,
                            children: Some(children),
                            at: buf_start,
                        });
                    } else {
                        nodes.push(Node::Rule {
                            selector: prelude,
                            children,
                            at: buf_start,
                        });
                    }
                    buf.clear();
                }
                '}' => {
                    if open.is_none() {
                        return Err(issue_at(self.chars, self.pos, "unexpected '}'"));
                    }
                    self.pos += 1;
                    self.statement(&buf, buf_start, &mut nodes)?;
                    return Ok(nodes);
                }
                c => {
                    if buf.trim().is_empty() && !c.is_whitespace() {
                        buf_start = self.pos;
                    }
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn copy_string(&mut self, quote: char, buf: &mut String) -> Result<(), LessIssue> {
        let start = self.pos;
        buf.push(quote);
        self.pos += 1;
        loop {
            match self.peek() {
                None | Some('\n') => return Err(issue_at(self.chars, start, "unterminated string")),
                Some('\\') => {
                    buf.push('\\');
                    self.pos += 1;
                    if let Some(escaped) = self.peek() {
                        buf.push(escaped);
                        self.pos += 1;
                    }
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                    if c == quote {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn copy_parens(&mut self, buf: &mut String) -> Result<(), LessIssue> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(issue_at(self.chars, start, "unclosed '('")),
                Some(q @ ('"' | '\'')) => self.copy_string(q, buf)?,
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                    match c {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn statement(&self, text: &str, at: usize, nodes: &mut Vec<Node>) -> Result<(), LessIssue> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(rest) = text.strip_prefix('@') {
            let name_len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
                .unwrap_or(rest.len());
            let (name, after) = rest.split_at(name_len);
            if let Some(value) = after.trim_start().strip_prefix(':') {
                nodes.push(Node::Variable {
                    name: name.to_string(),
                    value: value.trim().to_string(),
                });
            } else {
                nodes.push(Node::AtRule {
                    prelude: text.to_string(),
                    children: None,
                    at,
                });
            }
            return Ok(());
        }

        if (text.starts_with('.') || text.starts_with('#')) && text.ends_with(')') {
            return Err(issue_at(self.chars, at, "mixin calls are not supported"));
        }
        if !text.contains(':') {
            return Err(issue_at(self.chars, at, format!("expected a declaration, found '{}'", text)));
        }

        nodes.push(Node::Declaration {
            text: text.to_string(),
            at,
        });
        Ok(())
    }
}

struct Scope<'p> {
    vars: BTreeMap<String, String>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn root(vars: BTreeMap<String, String>) -> Self {
        Self { vars, parent: None }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        match self.vars.get(name) {
            Some(value) => Some(value.as_str()),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }
}

struct Emitter<'c> {
    chars: &'c [char],
}

impl<'c> Emitter<'c> {
    fn emit(
        &self,
        nodes: &[Node],
        parents: &[String],
        outer: &Scope<'_>,
        root: bool,
        out: &mut String,
    ) -> Result<(), LessIssue> {
        let mut scope = Scope {
            vars: BTreeMap::new(),
            parent: Some(outer),
        };
        for node in nodes {
            if let Node::Variable { name, value } = node {
                // at the root, configured overrides win over the file's own definitions
                if !(root && outer.vars.contains_key(name)) {
                    scope.vars.insert(name.clone(), value.clone());
                }
            }
        }

        let mut declarations = Vec::new();
        for node in nodes {
            if let Node::Declaration { text, at } = node {
                declarations.push(unescape(&self.interpolate(text, &scope, *at, 0)?));
            }
        }
        if !declarations.is_empty() {
            if parents.is_empty() {
                for declaration in &declarations {
                    out.push_str(&format!("{};\n", declaration));
                }
            } else {
                out.push_str(&format!("{} {{\n", parents.join(",\n")));
                for declaration in &declarations {
                    out.push_str(&format!("  {};\n", declaration));
                }
                out.push_str("}\n");
            }
        }

        for node in nodes {
            match node {
                Node::Rule {
                    selector,
                    children,
                    at,
                } => {
                    let selector = self.interpolate(selector, &scope, *at, 0)?;
                    let selectors = combine(parents, &selector);
                    self.emit(children, &selectors, &scope, false, out)?;
                }
                Node::AtRule {
                    prelude,
                    children,
                    at,
                } => {
                    let prelude = self.interpolate_prelude(prelude, &scope, *at)?;
                    match children {
                        Some(children) => {
                            out.push_str(&format!("{} {{\n", prelude));
                            let inherited: &[String] = if is_conditional(&prelude) { parents } else { &[] };
                            self.emit(children, inherited, &scope, false, out)?;
                            out.push_str("}\n");
                        }
                        None => out.push_str(&format!("{};\n", prelude)),
                    }
                }
                Node::Declaration { .. } | Node::Variable { .. } => {}
            }
        }

        Ok(())
    }

    fn interpolate_prelude(&self, prelude: &str, scope: &Scope<'_>, at: usize) -> Result<String, LessIssue> {
        let keyword_len = prelude
            .char_indices()
            .skip(1)
            .find(|(_, c)| !(c.is_alphanumeric() || *c == '-' || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(prelude.len());
        let (keyword, rest) = prelude.split_at(keyword_len);
        Ok(format!("{}{}", keyword, unescape(&self.interpolate(rest, scope, at, 0)?)))
    }

    /// Replace `@name` and `@{name}` references; quoted text only sees `@{name}`
    fn interpolate(&self, text: &str, scope: &Scope<'_>, at: usize, depth: usize) -> Result<String, LessIssue> {
        if depth > MAX_VARIABLE_DEPTH {
            return Err(issue_at(self.chars, at, "recursive variable definition"));
        }

        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut quote: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '@' {
                let braced = chars.get(i + 1) == Some(&'{');
                let start = if braced { i + 2 } else { i + 1 };
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '-' || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let closed = !braced || chars.get(end) == Some(&'}');

                if !name.is_empty() && closed && (braced || quote.is_none()) {
                    let value = scope
                        .lookup(&name)
                        .ok_or_else(|| issue_at(self.chars, at, format!("variable @{} is undefined", name)))?;
                    out.push_str(&self.interpolate(value, scope, at, depth + 1)?);
                    i = if braced { end + 1 } else { end };
                    continue;
                }
            }

            match quote {
                Some(q) if c == q => quote = None,
                None if c == '"' || c == '\'' => quote = Some(c),
                _ => {}
            }
            out.push(c);
            i += 1;
        }

        Ok(out)
    }
}

/// `~"text"` escapes output their contents verbatim
fn unescape(text: &str) -> String {
    ESCAPE.replace_all(text, "${1}${2}").into_owned()
}

fn is_conditional(prelude: &str) -> bool {
    ["@media", "@supports", "@document", "@container", "@layer"]
        .iter()
        .any(|keyword| prelude.starts_with(keyword))
}

/// Split on commas outside of parentheses and brackets
fn split_selectors(selector: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;

    for c in selector.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_string());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Resolve nested selectors against their parents
fn combine(parents: &[String], selector: &str) -> Vec<String> {
    let parts = split_selectors(selector);
    if parents.is_empty() {
        return parts.into_iter().map(|p| p.replace('&', "").trim().to_string()).collect();
    }

    let mut combined = Vec::new();
    for parent in parents {
        for part in &parts {
            if part.contains('&') {
                combined.push(part.replace('&', parent));
            } else {
                combined.push(format!("{} {}", parent, part));
            }
        }
    }
    combined
}
