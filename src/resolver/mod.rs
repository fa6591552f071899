//! Module resolution
//!
//! Extracts import specifiers from scripts and resolves them to files on disk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::BuildError;
use crate::utils::mask_script;

// Statement grammar shared with the linker, so every specifier the linker
// rewrites has been resolved. All patterns run on `mask_script` output.

pub(crate) static IMPORT_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\bimport\s*(?:(?P<default>[\w$]+)\s*,?\s*)?(?:\*\s*as\s+(?P<ns>[\w$]+)\s*|\{(?P<named>[^}]*)\}\s*)?(?:from\s*)?["'](?P<spec>[^"'\n]*)["'][ \t]*;?"#,
    )
    .unwrap()
});

pub(crate) static EXPORT_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\bexport\s*(?:\*\s*(?:as\s+(?P<ns>[\w$]+)\s*)?|\{(?P<named>[^}]*)\}\s*)from\s*["'](?P<spec>[^"'\n]*)["'][ \t]*;?"#,
    )
    .unwrap()
});

pub(crate) static REQUIRE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\brequire\s*\(\s*["'](?P<spec>[^"'\n]*)["']\s*\)"#).unwrap()
});

pub(crate) static DYNAMIC_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["'](?P<spec>[^"'\n]*)["']\s*\)"#).unwrap()
});

/// Extensions probed for extension-less specifiers, in order
pub const EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "json"];

/// Module resolver
#[derive(Debug, Clone)]
pub struct Resolver {
    extensions: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(EXTENSIONS)
    }
}

impl Resolver {
    /// Create a resolver probing the given extensions
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Import specifiers of a script, unique, in source order
    pub fn extract_dependencies(&self, source: &str) -> Vec<String> {
        // matched on the masked copy so commented-out imports are skipped;
        // specifier text comes from the original at the same offsets
        let masked = mask_script(source);
        let mut found: Vec<(usize, String)> = Vec::new();

        for regex in [&*EXPORT_FROM, &*IMPORT_STMT, &*DYNAMIC_IMPORT, &*REQUIRE_CALL] {
            for cap in regex.captures_iter(&masked) {
                if let Some(specifier) = cap.name("spec").filter(|m| !m.is_empty()) {
                    found.push((specifier.start(), source[specifier.range()].to_string()));
                }
            }
        }

        found.sort_by_key(|(offset, _)| *offset);
        let mut dependencies: Vec<String> = Vec::new();
        for (_, specifier) in found {
            if !dependencies.contains(&specifier) {
                dependencies.push(specifier);
            }
        }

        debug!("Found {} dependencies", dependencies.len());
        dependencies
    }

    /// Resolve a specifier imported by `from` to an existing file
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf> {
        debug!("Resolving '{}' from '{}'", specifier, from.display());

        let request = strip_query(specifier);
        let base_dir = from.parent().unwrap_or(Path::new("."));

        let resolved = if request.starts_with('.') || Path::new(request).is_absolute() {
            self.resolve_relative(request, base_dir)
        } else {
            // `~pkg/file` is the stylesheet spelling of a bare specifier
            self.resolve_bare(request.trim_start_matches('~'), base_dir)?
        };

        match resolved {
            Some(path) => {
                debug!("Resolved to: {}", path.display());
                Ok(path)
            }
            None => Err(BuildError::Unresolved {
                specifier: specifier.to_string(),
                importer: from.to_path_buf(),
            }
            .into()),
        }
    }

    /// Resolve a relative import
    fn resolve_relative(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        let target = normalize_path(&base_dir.join(specifier));

        if target.is_file() {
            return Some(target);
        }

        for ext in &self.extensions {
            let mut with_ext = target.clone().into_os_string();
            with_ext.push(".");
            with_ext.push(ext);
            let with_ext = PathBuf::from(with_ext);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }

        if target.is_dir() {
            for ext in &self.extensions {
                let index = target.join(format!("index.{}", ext));
                if index.is_file() {
                    return Some(index);
                }
            }
        }

        None
    }

    /// Resolve a bare import by walking up through `node_modules` directories
    fn resolve_bare(&self, specifier: &str, from: &Path) -> Result<Option<PathBuf>> {
        let mut current = from.to_path_buf();

        loop {
            let node_modules = current.join("node_modules");

            if node_modules.is_dir() {
                if let Some(resolved) = self.resolve_in_node_modules(&node_modules, specifier)? {
                    return Ok(Some(resolved));
                }
            }

            if !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Resolve a package (and optional subpath) inside one `node_modules`
    fn resolve_in_node_modules(&self, node_modules: &Path, specifier: &str) -> Result<Option<PathBuf>> {
        let (package_name, subpath) = if specifier.starts_with('@') {
            let parts: Vec<&str> = specifier.splitn(3, '/').collect();
            if parts.len() < 2 {
                return Ok(None);
            }
            let name = format!("{}/{}", parts[0], parts[1]);
            (name, parts.get(2).map(|s| s.to_string()))
        } else {
            let parts: Vec<&str> = specifier.splitn(2, '/').collect();
            (parts[0].to_string(), parts.get(1).map(|s| s.to_string()))
        };

        let package_dir = node_modules.join(&package_name);
        if !package_dir.is_dir() {
            return Ok(None);
        }

        if let Some(sub) = subpath {
            return Ok(self.resolve_relative(&sub, &package_dir));
        }

        let package_json = package_dir.join("package.json");
        if package_json.is_file() {
            let content = fs::read_to_string(&package_json)
                .with_context(|| format!("Failed to read {}", package_json.display()))?;
            let pkg: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", package_json.display()))?;

            for field in ["module", "main"] {
                if let Some(entry) = pkg.get(field).and_then(|v| v.as_str()) {
                    if let Some(resolved) = self.resolve_relative(entry, &package_dir) {
                        return Ok(Some(resolved));
                    }
                }
            }
        }

        Ok(self.resolve_relative("index", &package_dir))
    }
}

/// Drop `?query` and `#fragment` suffixes
pub fn strip_query(specifier: &str) -> &str {
    let end = specifier.find(['?', '#']).unwrap_or(specifier.len());
    &specifier[..end]
}

/// Lexically remove `.` and `..` components
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, path: &str, contents: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    #[test]
    fn test_extract_imports() {
        let source = r#"
            import foo from './foo';
            import { bar,
                     baz } from './bar.js';
            import * as ns from '../ns';
            import React, { useState } from 'react';
            export { qux } from './qux';
            export * from './all';
            import './styles.less';
            const x = require('./x');
            const lazy = import('./lazy');
            import foo2 from './foo';
        "#;

        let deps = Resolver::default().extract_dependencies(source);
        assert_eq!(
            deps,
            vec!["./foo", "./bar.js", "../ns", "react", "./qux", "./all", "./styles.less", "./x", "./lazy"]
        );
    }

    #[test]
    fn test_extract_compact_imports() {
        let source = "import{a}from'./a';import x from\"./b\";export*from'./c';export{d}from\"./d\"\nimport'./e.css'";
        assert_eq!(
            Resolver::default().extract_dependencies(source),
            vec!["./a", "./b", "./c", "./d", "./e.css"]
        );
    }

    #[test]
    fn test_plain_exports_are_not_dependencies() {
        let source = "export const name = 'x';\nexport default function () { return 'y'; }\n";
        assert!(Resolver::default().extract_dependencies(source).is_empty());
    }

    #[test]
    fn test_commented_imports_are_ignored() {
        let source = "// import a from './a';\n/* require('./b') */\nconst s = \"import './c'\";\nimport d from './d';\n";
        assert_eq!(Resolver::default().extract_dependencies(source), vec!["./d"]);
    }

    #[test]
    fn test_resolve_relative() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "src/index.js", "");
        touch(root, "src/util.js", "");
        touch(root, "src/view.jsx", "");
        touch(root, "src/widgets/index.js", "");
        touch(root, "src/img/logo.png", "");

        let resolver = Resolver::default();
        let from = root.join("src/index.js");

        assert_eq!(resolver.resolve("./util", &from).unwrap(), root.join("src/util.js"));
        assert_eq!(resolver.resolve("./view", &from).unwrap(), root.join("src/view.jsx"));
        assert_eq!(resolver.resolve("./widgets", &from).unwrap(), root.join("src/widgets/index.js"));
        assert_eq!(
            resolver.resolve("./img/../img/logo.png?inline#top", &from).unwrap(),
            root.join("src/img/logo.png")
        );
    }

    #[test]
    fn test_resolve_bare_packages() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "src/index.js", "");
        touch(root, "node_modules/left-pad/package.json", r#"{"main": "lib/pad"}"#);
        touch(root, "node_modules/left-pad/lib/pad.js", "");
        touch(root, "node_modules/@scope/ui/index.js", "");
        touch(root, "node_modules/@scope/ui/button.js", "");
        touch(root, "node_modules/normalize.css/normalize.css", "");

        let resolver = Resolver::default();
        let from = root.join("src/index.js");

        assert_eq!(
            resolver.resolve("left-pad", &from).unwrap(),
            root.join("node_modules/left-pad/lib/pad.js")
        );
        assert_eq!(
            resolver.resolve("@scope/ui", &from).unwrap(),
            root.join("node_modules/@scope/ui/index.js")
        );
        assert_eq!(
            resolver.resolve("@scope/ui/button", &from).unwrap(),
            root.join("node_modules/@scope/ui/button.js")
        );
        assert_eq!(
            resolver.resolve("~normalize.css/normalize.css", &from).unwrap(),
            root.join("node_modules/normalize.css/normalize.css")
        );
    }

    #[test]
    fn test_unresolved_is_fatal() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("src/index.js");
        let err = Resolver::default().resolve("./missing", &from).unwrap_err();
        assert!(err.to_string().starts_with("can't resolve './missing'"));

        let err = Resolver::default().resolve("no-such-package", &from).unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("./font.woff?v=1"), "./font.woff");
        assert_eq!(strip_query("./font.svg#icon"), "./font.svg");
        assert_eq!(strip_query("./plain.js"), "./plain.js");
    }
}
