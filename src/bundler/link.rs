//! ES module linking
//!
//! Rewrites `import`/`export` statements, `require()` calls and dynamic
//! `import()` into the runtime's CommonJS-style module form, with every
//! specifier replaced by the resolved module id. Matching runs over a masked
//! copy of the source so strings and comments never produce statements.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::BuildError;
use crate::resolver::{DYNAMIC_IMPORT, EXPORT_FROM, IMPORT_STMT, REQUIRE_CALL};
use crate::utils::{line_column, mask_script};

static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bexport\s*\{(?P<named>[^}]*)\}[ \t]*;?").unwrap());

static EXPORT_DEFAULT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bexport\s+default\s+(?P<kw>(?:async\s+)?function\s*\*?|class)\s+(?P<name>[\w$]+)").unwrap()
});

static EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bexport\s+default\s+").unwrap());

static EXPORT_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bexport\s+(?P<kw>(?:async\s+)?function\b\s*\*?\s*|class\s+)(?P<name>[\w$]+)").unwrap()
});

static EXPORT_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bexport\s+(?P<kw>const|let|var)\b").unwrap());

const DEFAULT_BINDING: &str = "__loom_default__";

struct Edit {
    range: Range<usize>,
    text: String,
}

struct Linker<'a> {
    source: &'a str,
    ids: &'a HashMap<String, String>,
    importer: &'a Path,
    edits: Vec<Edit>,
    /// exported name -> getter expression
    exports: Vec<(String, String)>,
    esm: bool,
    counter: usize,
}

/// Rewrite a script into a runtime module body. `ids` maps every specifier
/// the script uses to the id of the module it resolved to.
pub fn link(source: &str, ids: &HashMap<String, String>, importer: &Path) -> Result<String> {
    let masked = mask_script(source);
    let mut linker = Linker {
        source,
        ids,
        importer,
        edits: Vec::new(),
        exports: Vec::new(),
        esm: false,
        counter: 0,
    };

    for caps in EXPORT_FROM.captures_iter(&masked) {
        linker.export_from(&caps)?;
    }
    for caps in IMPORT_STMT.captures_iter(&masked) {
        linker.import(&caps)?;
    }
    for caps in EXPORT_LIST.captures_iter(&masked) {
        linker.export_list(&caps);
    }
    for caps in EXPORT_DEFAULT_DECL.captures_iter(&masked) {
        linker.export_declaration(&caps, Some("default"));
    }
    for caps in EXPORT_DEFAULT.captures_iter(&masked) {
        linker.export_default(&caps);
    }
    for caps in EXPORT_VAR.captures_iter(&masked) {
        linker.export_variables(&caps, &masked)?;
    }
    for caps in EXPORT_DECL.captures_iter(&masked) {
        linker.export_declaration(&caps, None);
    }
    for caps in DYNAMIC_IMPORT.captures_iter(&masked) {
        linker.dynamic_import(&caps)?;
    }
    for caps in REQUIRE_CALL.captures_iter(&masked) {
        linker.require(&caps)?;
    }

    Ok(linker.finish())
}

fn range(caps: &Captures<'_>) -> Range<usize> {
    caps.get(0).map(|m| m.range()).unwrap_or(0..0)
}

/// Split `a, b as c` into (imported, local) pairs
fn specifier_list(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let mut parts = item.split_whitespace();
            let imported = parts.next().unwrap_or_default().to_string();
            let local = match (parts.next(), parts.next()) {
                (Some("as"), Some(local)) => local.to_string(),
                _ => imported.clone(),
            };
            (imported, local)
        })
        .collect()
}

/// The declarators of a variable statement, up to its terminating `;` or the
/// line break that ends it
fn declaration_text(rest: &str) -> &str {
    const CONTINUES_AFTER: &str = ",=+-*/%&|^!?:<>.~";
    const CONTINUES_BEFORE: &str = ",=+-*/%&|^?:<>.([";

    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth == 0 => return &rest[..i],
            ')' | ']' | '}' => depth -= 1,
            ';' if depth == 0 => return &rest[..i],
            '\n' if depth == 0 => {
                let last = rest[..i].trim_end().chars().last();
                let next = rest[i..].trim_start().chars().next();
                // the keyword may sit alone on its line
                let open = rest[..i].trim().is_empty();
                let continues = open
                    || last.map(|c| CONTINUES_AFTER.contains(c)).unwrap_or(false)
                    || next.map(|c| CONTINUES_BEFORE.contains(c)).unwrap_or(false);
                if !continues {
                    return &rest[..i];
                }
            }
            _ => {}
        }
    }
    rest
}

/// Split on `separator` outside of brackets
fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Split `target = initializer` at its first top-level `=`
fn split_default(text: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return (&text[..i], Some(&text[i + 1..])),
            _ => {}
        }
    }
    (text, None)
}

/// Local names bound by a binding pattern: `a`, `{ a, b: c, ...d }`, `[a, , b = 1]`
fn pattern_names(pattern: &str) -> Vec<String> {
    let pattern = pattern.trim();
    let (object, inner) = if let Some(inner) = pattern.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        (true, inner)
    } else if let Some(inner) = pattern.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
        (false, inner)
    } else if !pattern.is_empty()
        && !pattern.starts_with(|c: char| c.is_ascii_digit())
        && pattern.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    {
        return vec![pattern.to_string()];
    } else {
        return Vec::new();
    };

    let mut names = Vec::new();
    for element in split_top_level(inner, ',') {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        if let Some(rest) = element.strip_prefix("...") {
            names.extend(pattern_names(rest));
            continue;
        }
        let (target, _) = split_default(element);
        let value = if object {
            match split_top_level(target, ':').as_slice() {
                [_, value] => *value,
                _ => target,
            }
        } else {
            target
        };
        names.extend(pattern_names(value));
    }
    names
}

impl<'a> Linker<'a> {
    fn overlaps(&self, range: &Range<usize>) -> bool {
        self.edits
            .iter()
            .any(|e| range.start < e.range.end && e.range.start < range.end)
    }

    fn push(&mut self, range: Range<usize>, text: String) -> bool {
        if self.overlaps(&range) {
            return false;
        }
        self.edits.push(Edit { range, text });
        true
    }

    /// Quoted module id for the specifier captured by `spec`
    fn module_ref(&self, caps: &Captures<'_>) -> Result<String> {
        let range = caps.name("spec").map(|m| m.range()).unwrap_or(0..0);
        let specifier = &self.source[range];
        let id = self.ids.get(specifier).ok_or_else(|| BuildError::Unresolved {
            specifier: specifier.to_string(),
            importer: self.importer.to_path_buf(),
        })?;
        Ok(format!("require({})", serde_json::to_string(id)?))
    }

    fn binding(&mut self) -> String {
        let name = format!("__loom_m{}__", self.counter);
        self.counter += 1;
        name
    }

    fn import(&mut self, caps: &Captures<'_>) -> Result<()> {
        let whole = range(caps);
        if self.overlaps(&whole) {
            return Ok(());
        }
        let module = self.module_ref(caps)?;
        let default = caps.name("default").map(|m| m.as_str());
        let namespace = caps.name("ns").map(|m| m.as_str());
        let named = caps.name("named").map(|m| specifier_list(m.as_str()));

        let text = if default.is_none() && namespace.is_none() && named.is_none() {
            format!("{};", module)
        } else {
            let binding = namespace.map(str::to_string).unwrap_or_else(|| self.binding());
            let mut lines = vec![format!("var {} = {};", binding, module)];
            if let Some(local) = default {
                lines.push(format!("var {} = require.d({});", local, binding));
            }
            for (imported, local) in named.unwrap_or_default() {
                if imported == "default" {
                    lines.push(format!("var {} = require.d({});", local, binding));
                } else {
                    lines.push(format!("var {} = {}.{};", local, binding, imported));
                }
            }
            lines.join(" ")
        };

        self.esm = true;
        self.push(whole, text);
        Ok(())
    }

    fn export_from(&mut self, caps: &Captures<'_>) -> Result<()> {
        let module = self.module_ref(caps)?;
        let binding = self.binding();
        let named = caps.name("named").map(|m| specifier_list(m.as_str()));
        let namespace = caps.name("ns").map(|m| m.as_str().to_string());

        let text = match (named, namespace) {
            (Some(list), _) => {
                for (imported, exported) in list {
                    let getter = if imported == "default" {
                        format!("require.d({})", binding)
                    } else {
                        format!("{}.{}", binding, imported)
                    };
                    self.exports.push((exported, getter));
                }
                format!("var {} = {};", binding, module)
            }
            (None, Some(ns)) => {
                self.exports.push((ns, binding.clone()));
                format!("var {} = {};", binding, module)
            }
            (None, None) => format!("var {} = {}; require.r(exports, {});", binding, module, binding),
        };

        self.esm = true;
        self.push(range(caps), text);
        Ok(())
    }

    fn export_list(&mut self, caps: &Captures<'_>) {
        let whole = range(caps);
        if self.overlaps(&whole) {
            return;
        }
        for (local, exported) in specifier_list(caps.name("named").map(|m| m.as_str()).unwrap_or_default()) {
            self.exports.push((exported, local));
        }
        self.esm = true;
        self.push(whole, String::new());
    }

    /// `export [default] function|class|const|let|var name`
    fn export_declaration(&mut self, caps: &Captures<'_>, exported: Option<&str>) {
        let whole = range(caps);
        let keyword = caps.name("kw").map(|m| m.as_str().trim_end()).unwrap_or_default();
        let name = caps.name("name").map(|m| m.as_str()).unwrap_or_default();
        if self.push(whole, format!("{} {}", keyword, name)) {
            self.exports
                .push((exported.unwrap_or(name).to_string(), name.to_string()));
            self.esm = true;
        }
    }

    /// `export const|let|var` with any number of declarators, destructuring included.
    /// Only the `export` keyword is removed; the declaration stays as written.
    fn export_variables(&mut self, caps: &Captures<'_>, masked: &str) -> Result<()> {
        let whole = range(caps);
        let Some(keyword) = caps.name("kw") else {
            return Ok(());
        };
        if self.overlaps(&whole) {
            return Ok(());
        }

        let declaration = declaration_text(&masked[keyword.end()..]);
        let mut names = Vec::new();
        for declarator in split_top_level(declaration, ',') {
            let (binding, _) = split_default(declarator);
            let bound = pattern_names(binding);
            if bound.is_empty() {
                let (line, column) = line_column(self.source, keyword.end());
                return Err(BuildError::Syntax {
                    path: self.importer.to_path_buf(),
                    line,
                    column,
                    message: format!("cannot export '{}'", declarator.trim()),
                }
                .into());
            }
            names.extend(bound);
        }

        if self.push(whole.start..keyword.start(), String::new()) {
            for name in names {
                self.exports.push((name.clone(), name));
            }
            self.esm = true;
        }
        Ok(())
    }

    fn export_default(&mut self, caps: &Captures<'_>) {
        if self.push(range(caps), format!("var {} = ", DEFAULT_BINDING)) {
            self.exports
                .push(("default".to_string(), DEFAULT_BINDING.to_string()));
            self.esm = true;
        }
    }

    fn dynamic_import(&mut self, caps: &Captures<'_>) -> Result<()> {
        let module = self.module_ref(caps)?;
        self.push(
            range(caps),
            format!("Promise.resolve().then(function () {{ return {}; }})", module),
        );
        Ok(())
    }

    fn require(&mut self, caps: &Captures<'_>) -> Result<()> {
        if self.overlaps(&range(caps)) {
            return Ok(());
        }
        let module = self.module_ref(caps)?;
        self.push(range(caps), module);
        Ok(())
    }

    fn finish(mut self) -> String {
        self.edits.sort_by_key(|e| e.range.start);

        let mut body = String::with_capacity(self.source.len());
        let mut last = 0;
        for edit in &self.edits {
            body.push_str(&self.source[last..edit.range.start]);
            body.push_str(&edit.text);
            last = edit.range.end;
        }
        body.push_str(&self.source[last..]);

        if !self.esm {
            return body;
        }

        let mut prologue = String::from("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
        if !self.exports.is_empty() {
            let getters: Vec<String> = self
                .exports
                .iter()
                .map(|(name, expr)| {
                    format!(
                        "{}: function () {{ return {}; }}",
                        serde_json::Value::String(name.clone()),
                        expr
                    )
                })
                .collect();
            prologue.push_str(&format!("require.e(exports, {{ {} }});\n", getters.join(", ")));
        }

        prologue + &body
    }
}
