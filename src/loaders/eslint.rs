//! Pre-transform lint stage
//!
//! Findings are reported as warnings; this stage never fails a build.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{Content, Loader, LoaderContext};
use crate::error::{Diagnostic, Severity};
use crate::utils::{line_column, mask_script};

static DEBUGGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bdebugger\b").unwrap());
static ALERT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(alert|confirm|prompt)\s*\(").unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EslintOptions {
    /// Enabled rule names
    pub rules: Vec<String>,
}

impl Default for EslintOptions {
    fn default() -> Self {
        Self {
            rules: ["no-debugger", "no-alert", "eqeqeq", "no-trailing-spaces"]
                .iter()
                .map(|r| r.to_string())
                .collect(),
        }
    }
}

pub struct EslintLoader {
    options: EslintOptions,
}

impl EslintLoader {
    pub fn new(options: EslintOptions) -> Self {
        Self { options }
    }

    fn enabled(&self, rule: &str) -> bool {
        self.options.rules.iter().any(|r| r == rule)
    }
}

struct Finding {
    offset: usize,
    rule: &'static str,
    message: String,
}

impl Loader for EslintLoader {
    fn name(&self) -> &str {
        "eslint"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let source = content.into_text(self.name(), ctx.resource)?;
        let masked = mask_script(&source);
        let mut findings = Vec::new();

        if self.enabled("no-debugger") {
            for m in DEBUGGER.find_iter(&masked) {
                findings.push(Finding {
                    offset: m.start(),
                    rule: "no-debugger",
                    message: "Unexpected 'debugger' statement.".to_string(),
                });
            }
        }

        if self.enabled("no-alert") {
            for caps in ALERT.captures_iter(&masked) {
                let name = &caps[1];
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                if masked[..start].ends_with('.') {
                    continue;
                }
                findings.push(Finding {
                    offset: start,
                    rule: "no-alert",
                    message: format!("Unexpected {}.", name),
                });
            }
        }

        if self.enabled("eqeqeq") {
            findings.extend(loose_equality(&masked));
        }

        if self.enabled("no-trailing-spaces") {
            let mut offset = 0;
            for line in source.split('\n') {
                let content = line.trim_end_matches('\r');
                let trimmed = content.trim_end_matches([' ', '\t']);
                if trimmed.len() != content.len() {
                    findings.push(Finding {
                        offset: offset + trimmed.len(),
                        rule: "no-trailing-spaces",
                        message: "Trailing spaces not allowed.".to_string(),
                    });
                }
                offset += line.len() + 1;
            }
        }

        findings.sort_by_key(|f| f.offset);
        for finding in findings {
            let (line, column) = line_column(&masked, finding.offset);
            let diagnostic = Diagnostic {
                path: ctx.resource.to_path_buf(),
                line,
                column,
                rule: finding.rule.to_string(),
                message: finding.message,
                severity: Severity::Warning,
            };
            debug!("{}", diagnostic);
            ctx.diagnostics.push(diagnostic);
        }

        Ok(Content::Script(source))
    }
}

fn loose_equality(masked: &str) -> Vec<Finding> {
    let bytes = masked.as_bytes();
    let mut findings = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        let (op, strict) = match (bytes[i], bytes[i + 1]) {
            (b'=', b'=') => ("==", "==="),
            (b'!', b'=') => ("!=", "!=="),
            _ => {
                i += 1;
                continue;
            }
        };
        let followed_by_eq = bytes.get(i + 2) == Some(&b'=');
        let preceded_by_op = op == "=="
            && i > 0
            && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>');

        if followed_by_eq {
            i += 3;
            continue;
        }
        if !preceded_by_op {
            findings.push(Finding {
                offset: i,
                rule: "eqeqeq",
                message: format!("Expected '{}' and instead saw '{}'.", strict, op),
            });
        }
        i += 2;
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::loaders::testing::{context, NoLinker};
    use std::path::Path;

    fn lint(source: &str) -> Vec<Diagnostic> {
        let loader = EslintLoader::new(EslintOptions::default());
        let path = Path::new("/app/src/index.js");
        let mut ctx = context(path, Mode::Development, &NoLinker);
        let out = loader.apply(Content::Raw(source.as_bytes().to_vec()), &mut ctx).unwrap();
        assert_eq!(out, Content::Script(source.to_string()));
        ctx.diagnostics
    }

    #[test]
    fn test_clean_source_has_no_findings() {
        assert!(lint("const a = b === c;\nif (a !== 1) { run(); }\n").is_empty());
    }

    #[test]
    fn test_rules_report_locations() {
        let source = "debugger;\nif (a == b) alert('x');  \nwindow.alert(1);\n";
        let found = lint(source);
        let summary: Vec<(&str, usize, usize)> = found
            .iter()
            .map(|d| (d.rule.as_str(), d.line, d.column))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("no-debugger", 1, 1),
                ("eqeqeq", 2, 7),
                ("no-alert", 2, 13),
                ("no-trailing-spaces", 2, 24),
            ]
        );
        assert!(found.iter().all(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let source = "const s = 'debugger == alert(';\n// debugger\n/* a != b */\n";
        assert!(lint(source).is_empty());
    }

    #[test]
    fn test_rules_can_be_disabled() {
        let loader = EslintLoader::new(EslintOptions {
            rules: vec!["eqeqeq".to_string()],
        });
        let path = Path::new("/app/src/index.js");
        let mut ctx = context(path, Mode::Development, &NoLinker);
        loader
            .apply(Content::Script("debugger; a != b".to_string()), &mut ctx)
            .unwrap();
        assert_eq!(ctx.diagnostics.len(), 1);
        assert_eq!(ctx.diagnostics[0].rule, "eqeqeq");
    }
}
