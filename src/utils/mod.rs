//! Utility functions and helpers

use std::path::Path;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

static TEMPLATE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(name|ext|hash|contenthash|chunkhash)(?::(\d+))?\]").unwrap()
});

/// Full hex SHA-256 of the given content
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Values substituted into a filename template
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    /// Full content hash; truncated per token
    pub hash: &'a str,
    /// Length used by a bare `[hash]`
    pub hash_length: usize,
}

/// Expand `[name]`, `[ext]`, `[hash]`, `[hash:N]` and their
/// `contenthash`/`chunkhash` aliases. Unknown tokens are left untouched.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    TEMPLATE_TOKEN
        .replace_all(template, |caps: &Captures<'_>| match &caps[1] {
            "name" => vars.name.to_string(),
            "ext" => vars.ext.to_string(),
            _ => {
                let len = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(vars.hash_length);
                vars.hash[..len.min(vars.hash.len())].to_string()
            }
        })
        .into_owned()
}

/// Forward-slash path of `path` relative to `base`, prefixed with `./`.
/// Paths outside `base` keep their absolute form.
pub fn module_id(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(relative) => format!("./{}", path_to_module_id(relative)),
        Err(_) => path_to_module_id(path),
    }
}

/// Blank out string, template and comment bodies so rules only see code.
/// Every byte is kept at its offset and newlines survive.
pub fn mask_script(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str(char),
        Template,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    let blank = |c: char, out: &mut String| {
        if c == '\n' {
            out.push('\n');
        } else {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        }
    };

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '"' | '\'' => {
                    state = State::Str(c);
                    out.push(c);
                }
                '`' => {
                    state = State::Template;
                    out.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    state = State::LineComment;
                    out.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    out.push_str("  ");
                }
                _ => out.push(c),
            },
            State::Str(quote) => {
                if c == '\\' {
                    blank(c, &mut out);
                    if let Some(next) = chars.next() {
                        blank(next, &mut out);
                    }
                } else if c == quote || c == '\n' {
                    out.push(c);
                    state = State::Code;
                } else {
                    blank(c, &mut out);
                }
            }
            State::Template => {
                if c == '\\' {
                    blank(c, &mut out);
                    if let Some(next) = chars.next() {
                        blank(next, &mut out);
                    }
                } else if c == '`' {
                    out.push(c);
                    state = State::Code;
                } else {
                    blank(c, &mut out);
                }
            }
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    blank(c, &mut out);
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    blank(c, &mut out);
                }
            }
        }
    }

    out
}

/// 1-based line and column of a byte offset
pub fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}

/// Get relative path from base to target
pub fn relative_path(from: &Path, to: &Path) -> Option<String> {
    pathdiff::diff_paths(to, from).map(|p| path_to_module_id(&p))
}

/// Clean a path by removing . and .. components
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }

    if path.starts_with('/') {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

/// Convert a file path to forward-slash form
pub fn path_to_module_id(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

/// File stem and extension of a path, both possibly empty
pub fn stem_and_ext(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    (stem, ext)
}

/// MIME type for a file extension
pub fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs_f64();

    if secs >= 60.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = secs - (mins as f64 * 60.0);
        format!("{}m {:.2}s", mins, remaining_secs)
    } else if secs >= 1.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.0}ms", secs * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_content() {
        let hash = hash_content(b"hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_content(b"hello world"));
        assert_ne!(hash, hash_content(b"hello world!"));
    }

    #[test]
    fn test_render_template() {
        let hash = hash_content(b"body");
        let vars = TemplateVars {
            name: "logo",
            ext: "png",
            hash: &hash,
            hash_length: 20,
        };

        assert_eq!(
            render_template("static/img/[name].[hash:7].[ext]", &vars),
            format!("static/img/logo.{}.png", &hash[..7])
        );
        assert_eq!(
            render_template("js/[name]-[hash].js", &vars),
            format!("js/logo-{}.js", &hash[..20])
        );
        assert_eq!(
            render_template("[name].[contenthash:4].[unknown]", &vars),
            format!("logo.{}.[unknown]", &hash[..4])
        );
    }

    #[test]
    fn test_module_id() {
        assert_eq!(
            module_id(Path::new("/app/src/index.js"), Path::new("/app")),
            "./src/index.js"
        );
        assert_eq!(module_id(Path::new("/other/x.js"), Path::new("/app")), "/other/x.js");
    }

    #[test]
    fn test_mask_script_keeps_offsets() {
        let source = "a('x y'); // note\nb(`t`); /* é */ c";
        let masked = mask_script(source);
        assert_eq!(masked.len(), source.len());
        assert_eq!(masked, "a('   ');        \nb(` `);          c");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("./foo/bar"), "foo/bar");
        assert_eq!(clean_path("foo/../bar"), "bar");
        assert_eq!(clean_path("/foo/./bar/../baz"), "/foo/baz");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;

        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs_f64(1.5)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5.00s");
    }
}
