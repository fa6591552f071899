//! Vendor prefixing stage
//!
//! Stylesheets are parsed with lightningcss and printed back against the
//! configured browser targets, which adds the prefixes those browsers need.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::Deserialize;

use super::css::css_error;
use super::{Content, Loader, LoaderContext, Stylesheet};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostcssOptions {
    /// Minimum supported version per browser, e.g. `chrome = "49"`
    pub browsers: BTreeMap<String, String>,
}

impl Default for PostcssOptions {
    fn default() -> Self {
        let browsers = [
            ("chrome", "49"),
            ("edge", "14"),
            ("firefox", "52"),
            ("ie", "11"),
            ("ios_saf", "9"),
            ("safari", "9"),
        ];
        Self {
            browsers: browsers
                .iter()
                .map(|(b, v)| (b.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub struct PostcssLoader {
    targets: Targets,
}

impl PostcssLoader {
    pub fn new(options: PostcssOptions) -> Result<Self> {
        let mut browsers = Browsers::default();
        for (browser, version) in &options.browsers {
            let version = Some(parse_version(version)?);
            match browser.as_str() {
                "android" => browsers.android = version,
                "chrome" => browsers.chrome = version,
                "edge" => browsers.edge = version,
                "firefox" => browsers.firefox = version,
                "ie" => browsers.ie = version,
                "ios_saf" => browsers.ios_saf = version,
                "opera" => browsers.opera = version,
                "safari" => browsers.safari = version,
                "samsung" => browsers.samsung = version,
                other => bail!("Unknown browser '{}' in postcss targets", other),
            }
        }

        Ok(Self {
            targets: Targets::from(browsers),
        })
    }
}

/// `major[.minor[.patch]]` packed the way lightningcss expects
fn parse_version(version: &str) -> Result<u32> {
    let mut packed = 0u32;
    let mut parts = version.trim().split('.');
    for shift in [16, 8, 0] {
        let part = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("Invalid browser version '{}'", version))?,
            None => 0,
        };
        packed |= (part & 0xff) << shift;
    }
    Ok(packed)
}

impl Loader for PostcssLoader {
    fn name(&self) -> &str {
        "postcss"
    }

    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        let sheet = content.into_stylesheet(self.name(), ctx.resource)?;

        let css = {
            let mut stylesheet = StyleSheet::parse(
                &sheet.css,
                ParserOptions {
                    filename: ctx.resource.display().to_string(),
                    ..ParserOptions::default()
                },
            )
            .map_err(|e| css_error(ctx.resource, e))?;

            stylesheet
                .minify(MinifyOptions {
                    targets: self.targets,
                    ..MinifyOptions::default()
                })
                .map_err(|e| css_error(ctx.resource, e))?;

            stylesheet
                .to_css(PrinterOptions {
                    targets: self.targets,
                    ..PrinterOptions::default()
                })
                .map_err(|e| css_error(ctx.resource, e))?
                .code
        };

        Ok(Content::Style(Stylesheet {
            css,
            locals: sheet.locals,
        }))
    }
}
