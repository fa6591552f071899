//! Build-fatal error types
//!
//! Anything that aborts a build is a [`BuildError`]. Lint findings are not
//! errors; they travel as [`Diagnostic`]s and end up in the build warnings.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a build
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("entry '{name}' points to non-existent file: {}", .path.display())]
    MissingEntry { name: String, path: PathBuf },

    #[error("unknown entry '{0}'")]
    UnknownEntry(String),

    #[error("module parse failed: {}\nYou may need an appropriate loader to handle this file type.", .0.display())]
    NoMatchingRule(PathBuf),

    #[error("can't resolve '{specifier}' in {}", .importer.display())]
    Unresolved { specifier: String, importer: PathBuf },

    #[error("unknown loader '{0}'")]
    UnknownLoader(String),

    #[error("{loader}: {} : {message}", .path.display())]
    Loader {
        loader: String,
        path: PathBuf,
        message: String,
    },

    #[error("syntax error in {}:{line}:{column}: {message}", .path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },
}

impl BuildError {
    pub fn loader(loader: &str, path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Loader {
            loader: loader.to_string(),
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn plugin(plugin: &str, message: impl fmt::Display) -> Self {
        Self::Plugin {
            plugin: plugin.to_string(),
            message: message.to_string(),
        }
    }
}

/// Severity of a non-fatal finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A lint finding attached to a source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Diagnostic {
    /// Friendly one-line format: `warning: message (rule) at file:line:col`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "{}: {} ({}) at {}:{}:{}",
            level,
            self.message,
            self.rule,
            self.path.display(),
            self.line,
            self.column
        )
    }
}
