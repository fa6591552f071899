//! Script transpile stage
//!
//! Walks the source once, checking that delimiters, strings, template
//! literals, comments and regex literals are well formed, and lowers JSX
//! elements to `React.createElement(...)` calls along the way.

use anyhow::Result;
use serde::Deserialize;

use super::{Content, Loader, LoaderContext};
use crate::error::BuildError;

/// Keywords after which a `/` starts a regex and a `<` starts JSX
const KEYWORDS_BEFORE_EXPRESSION: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "instanceof", "yield", "await", "default",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BabelOptions {
    /// Function JSX elements are lowered to
    pub pragma: String,
    /// Component used for `<>...</>`
    pub pragma_frag: String,
}

impl Default for BabelOptions {
    fn default() -> Self {
        Self {
            pragma: "React.createElement".to_string(),
            pragma_frag: "React.Fragment".to_string(),
        }
    }
}

pub struct BabelLoader {
    options: BabelOptions,
}

impl BabelLoader {
    pub fn new(options: BabelOptions) -> Self {
        Self { options }
    }
}

impl Loader for BabelLoader {
    fn name(&self) -> &str {
        "babel"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let source = content.into_text(self.name(), ctx.resource)?;
        let code = lower(&source, &self.options).map_err(|issue| BuildError::Syntax {
            path: ctx.resource.to_path_buf(),
            line: issue.line,
            column: issue.column,
            message: issue.message,
        })?;
        Ok(Content::Script(code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxIssue {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Validate `source` and lower any JSX it contains
pub(crate) fn lower(source: &str, options: &BabelOptions) -> Result<String, SyntaxIssue> {
    let mut scanner = Scanner {
        chars: source.chars().collect(),
        pos: 0,
        options,
    };
    scanner.script(None)
}

/// What the previous significant token was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Value,
    Keyword,
    Punct(char),
}

impl Prev {
    fn expects_expression(self) -> bool {
        match self {
            Prev::Start | Prev::Keyword => true,
            Prev::Value => false,
            Prev::Punct(c) => c != ')' && c != ']',
        }
    }
}

enum Prop {
    Pair(String, String),
    Spread(String),
}

struct Scanner<'o> {
    chars: Vec<char>,
    pos: usize,
    options: &'o BabelOptions,
}

impl<'o> Scanner<'o> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: &str) -> bool {
        let len = expected.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .map(|window| window.iter().copied().eq(expected.chars()))
            .unwrap_or(false);
        if matches {
            self.pos += len;
        }
        matches
    }

    fn skip_ws(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn issue(&self, at: usize, message: impl Into<String>) -> SyntaxIssue {
        let mut line = 1;
        let mut column = 1;
        for &c in &self.chars[..at.min(self.chars.len())] {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        SyntaxIssue {
            line,
            column,
            message: message.into(),
        }
    }

    /// Copy script text until the unmatched `close` (consumed, not copied) or end of input
    fn script(&mut self, close: Option<char>) -> Result<String, SyntaxIssue> {
        let mut out = String::new();
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut prev = Prev::Start;

        loop {
            let Some(c) = self.peek() else {
                if let Some(&(open, at)) = stack.last() {
                    return Err(self.issue(at, format!("unclosed '{}'", open)));
                }
                if let Some(close) = close {
                    return Err(self.issue(self.pos, format!("expected '{}' before end of input", close)));
                }
                return Ok(out);
            };

            match c {
                '"' | '\'' => {
                    out.push_str(&self.string(c)?);
                    prev = Prev::Value;
                }
                '`' => {
                    out.push_str(&self.template()?);
                    prev = Prev::Value;
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        out.push(c);
                        self.pos += 1;
                    }
                }
                '/' if self.peek_at(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    out.push_str("/*");
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.pos += 1;
                                out.push_str("*/");
                                break;
                            }
                            Some(c) => out.push(c),
                            None => return Err(self.issue(start, "unterminated comment")),
                        }
                    }
                }
                '/' if prev.expects_expression() => {
                    out.push_str(&self.regex()?);
                    prev = Prev::Value;
                }
                '<' if prev.expects_expression() && self.jsx_start() => {
                    out.push_str(&self.jsx_element()?);
                    prev = Prev::Value;
                }
                '(' | '[' | '{' => {
                    stack.push((c, self.pos));
                    out.push(c);
                    self.pos += 1;
                    prev = Prev::Punct(c);
                }
                ')' | ']' | '}' => {
                    match stack.pop() {
                        None if close == Some(c) => {
                            self.pos += 1;
                            return Ok(out);
                        }
                        None => return Err(self.issue(self.pos, format!("unexpected '{}'", c))),
                        Some((open, _)) if closing(open) != c => {
                            return Err(self.issue(
                                self.pos,
                                format!("unexpected '{}', expected '{}'", c, closing(open)),
                            ));
                        }
                        Some(_) => {}
                    }
                    out.push(c);
                    self.pos += 1;
                    prev = if c == '}' { Prev::Punct(c) } else { Prev::Value };
                }
                c if is_ident_char(c) => {
                    let word = self.word();
                    prev = if KEYWORDS_BEFORE_EXPRESSION.contains(&word.as_str()) {
                        Prev::Keyword
                    } else {
                        Prev::Value
                    };
                    out.push_str(&word);
                }
                c if c.is_whitespace() => {
                    out.push(c);
                    self.pos += 1;
                }
                // postfix `++`/`--` still ends in a value
                '+' | '-' if prev == Prev::Value && self.peek_at(1) == Some(c) => {
                    out.push(c);
                    out.push(c);
                    self.pos += 2;
                }
                c => {
                    out.push(c);
                    self.pos += 1;
                    prev = Prev::Punct(c);
                }
            }
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            word.push(c);
            self.pos += 1;
        }
        word
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxIssue> {
        let start = self.pos;
        self.pos += 1;
        let mut s = String::from(quote);
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.issue(start, "unterminated string literal")),
                Some('\\') => {
                    s.push('\\');
                    if let Some(escaped) = self.bump() {
                        s.push(escaped);
                    }
                }
                Some(c) if c == quote => {
                    s.push(c);
                    return Ok(s);
                }
                Some(c) => s.push(c),
            }
        }
    }

    fn template(&mut self) -> Result<String, SyntaxIssue> {
        let start = self.pos;
        self.pos += 1;
        let mut s = String::from('`');
        loop {
            match self.bump() {
                None => return Err(self.issue(start, "unterminated template literal")),
                Some('\\') => {
                    s.push('\\');
                    if let Some(escaped) = self.bump() {
                        s.push(escaped);
                    }
                }
                Some('`') => {
                    s.push('`');
                    return Ok(s);
                }
                Some('$') if self.peek() == Some('{') => {
                    self.pos += 1;
                    s.push_str("${");
                    s.push_str(&self.script(Some('}'))?);
                    s.push('}');
                }
                Some(c) => s.push(c),
            }
        }
    }

    fn regex(&mut self) -> Result<String, SyntaxIssue> {
        let start = self.pos;
        self.pos += 1;
        let mut s = String::from('/');
        let mut in_class = false;
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(self.issue(start, "unterminated regular expression"))
                }
                Some('\\') => {
                    s.push('\\');
                    if let Some(escaped) = self.bump() {
                        s.push(escaped);
                    }
                }
                Some(c) => {
                    s.push(c);
                    match c {
                        '[' => in_class = true,
                        ']' => in_class = false,
                        '/' if !in_class => break,
                        _ => {}
                    }
                }
            }
        }
        while let Some(flag) = self.peek().filter(|c| c.is_ascii_alphabetic()) {
            s.push(flag);
            self.pos += 1;
        }
        Ok(s)
    }

    fn jsx_start(&self) -> bool {
        matches!(self.peek_at(1), Some(c) if c == '>' || c.is_alphabetic() || c == '_' || c == '$')
    }

    fn jsx_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_ident_char(c) || matches!(c, '-' | '.' | ':') {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        name
    }

    fn jsx_element(&mut self) -> Result<String, SyntaxIssue> {
        let start = self.pos;
        self.pos += 1;
        self.skip_ws();

        if self.peek() == Some('>') {
            self.pos += 1;
            let children = self.jsx_children(start, "")?;
            return Ok(create_element(
                &self.options.pragma,
                &self.options.pragma_frag,
                "null",
                &children,
            ));
        }

        let name = self.jsx_name();
        if name.is_empty() {
            return Err(self.issue(self.pos, "expected JSX tag name"));
        }

        let mut props = Vec::new();
        let children = loop {
            self.skip_ws();
            match self.peek() {
                Some('/') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() != Some('>') {
                        return Err(self.issue(self.pos, "expected '>' after '/' in JSX tag"));
                    }
                    self.pos += 1;
                    break Vec::new();
                }
                Some('>') => {
                    self.pos += 1;
                    break self.jsx_children(start, &name)?;
                }
                Some('{') => {
                    let at = self.pos;
                    self.pos += 1;
                    self.skip_ws();
                    if !self.eat("...") {
                        return Err(self.issue(at, "expected '...' in JSX spread attribute"));
                    }
                    let expr = self.script(Some('}'))?;
                    props.push(Prop::Spread(expr.trim().to_string()));
                }
                Some(c) if is_ident_char(c) => {
                    let attr = self.jsx_name();
                    self.skip_ws();
                    let value = if self.eat("=") {
                        self.skip_ws();
                        self.jsx_attribute_value()?
                    } else {
                        "true".to_string()
                    };
                    props.push(Prop::Pair(attr, value));
                }
                Some(c) => {
                    return Err(self.issue(self.pos, format!("unexpected '{}' in JSX tag", c)))
                }
                None => return Err(self.issue(start, format!("unterminated JSX element <{}>", name))),
            }
        };

        let tag = if is_intrinsic(&name) {
            js_string(&name)
        } else {
            name
        };
        Ok(create_element(
            &self.options.pragma,
            &tag,
            &render_props(&props),
            &children,
        ))
    }

    fn jsx_attribute_value(&mut self) -> Result<String, SyntaxIssue> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let start = self.pos;
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.bump() {
                        Some(c) if c == quote => return Ok(js_string(&value)),
                        Some(c) => value.push(c),
                        None => return Err(self.issue(start, "unterminated JSX attribute string")),
                    }
                }
            }
            Some('{') => {
                let at = self.pos;
                self.pos += 1;
                let expr = self.script(Some('}'))?;
                let expr = expr.trim();
                if expr.is_empty() {
                    return Err(self.issue(at, "JSX attributes must be assigned a non-empty expression"));
                }
                Ok(expr.to_string())
            }
            Some('<') => self.jsx_element(),
            _ => Err(self.issue(self.pos, "expected JSX attribute value")),
        }
    }

    fn jsx_children(&mut self, start: usize, name: &str) -> Result<Vec<String>, SyntaxIssue> {
        let mut children = Vec::new();
        let mut text = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(self.issue(start, format!("unterminated JSX element <{}>", name)))
                }
                Some('<') => {
                    let at = self.pos;
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some('/') {
                        self.pos += 1;
                        self.skip_ws();
                        let closing = self.jsx_name();
                        self.skip_ws();
                        if !self.eat(">") {
                            return Err(self.issue(self.pos, "expected '>' in JSX closing tag"));
                        }
                        if closing != name {
                            return Err(self.issue(
                                at,
                                format!("expected closing tag </{}>, found </{}>", name, closing),
                            ));
                        }
                        push_text(&mut children, &text);
                        return Ok(children);
                    }
                    self.pos = at;
                    push_text(&mut children, &text);
                    text.clear();
                    children.push(self.jsx_element()?);
                }
                Some('{') => {
                    push_text(&mut children, &text);
                    text.clear();
                    self.pos += 1;
                    let expr = self.script(Some('}'))?;
                    let expr = expr.trim();
                    let comment_only = expr.starts_with("/*") && expr.ends_with("*/");
                    if !expr.is_empty() && !comment_only {
                        children.push(expr.to_string());
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_intrinsic(name: &str) -> bool {
    !name.contains('.') && name.chars().next().map(|c| c.is_lowercase()).unwrap_or(false)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn is_js_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(is_ident_char)
}

/// JSX text rules: lines are trimmed at inner edges, blank lines dropped,
/// the rest joined by single spaces
fn push_text(children: &mut Vec<String>, raw: &str) {
    if raw.is_empty() {
        return;
    }
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len() - 1;
    let mut parts = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let mut line = line.trim_end_matches('\r').replace('\t', " ");
        if i != 0 {
            line = line.trim_start().to_string();
        }
        if i != last {
            line = line.trim_end().to_string();
        }
        if !line.is_empty() {
            parts.push(line);
        }
    }

    if !parts.is_empty() {
        children.push(js_string(&parts.join(" ")));
    }
}

fn render_props(props: &[Prop]) -> String {
    if props.is_empty() {
        return "null".to_string();
    }

    let mut groups: Vec<String> = Vec::new();
    let mut pairs: Vec<String> = Vec::new();
    let mut has_spread = false;

    for prop in props {
        match prop {
            Prop::Pair(key, value) => {
                let key = if is_js_identifier(key) {
                    key.clone()
                } else {
                    js_string(key)
                };
                pairs.push(format!("{}: {}", key, value));
            }
            Prop::Spread(expr) => {
                has_spread = true;
                if !pairs.is_empty() {
                    groups.push(format!("{{{}}}", pairs.join(", ")));
                    pairs.clear();
                }
                groups.push(expr.clone());
            }
        }
    }
    if !pairs.is_empty() {
        groups.push(format!("{{{}}}", pairs.join(", ")));
    }

    if has_spread {
        format!("Object.assign({{}}, {})", groups.join(", "))
    } else {
        groups.join(", ")
    }
}

fn create_element(pragma: &str, tag: &str, props: &str, children: &[String]) -> String {
    let mut call = format!("{}({}, {}", pragma, tag, props);
    for child in children {
        call.push_str(", ");
        call.push_str(child);
    }
    call.push(')');
    call
}
