//! Rule matching
//!
//! Maps a module path to the first rule whose `test` matches and whose
//! include/exclude filters pass.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::{Enforce, LoaderConfig, RuleConfig};

/// A compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    test: Regex,
    include: Option<Regex>,
    exclude: Option<Regex>,
    pub enforce: Option<Enforce>,
    pub uses: Vec<LoaderConfig>,
    pub extract: bool,
}

impl Rule {
    fn compile(config: &RuleConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).with_context(|| format!("Invalid rule pattern: {}", pattern))
        };

        Ok(Self {
            test: compile(&config.test)?,
            include: config.include.as_deref().map(compile).transpose()?,
            exclude: config.exclude.as_deref().map(compile).transpose()?,
            enforce: config.enforce,
            uses: config.uses.clone(),
            extract: config.extract,
        })
    }

    /// Check the rule against a forward-slash normalized path
    pub fn matches(&self, resource: &str) -> bool {
        if !self.test.is_match(resource) {
            return false;
        }
        if let Some(include) = &self.include {
            if !include.is_match(resource) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(resource) {
                return false;
            }
        }
        true
    }

    /// Loader names in application order (last listed runs first)
    pub fn chain(&self) -> impl Iterator<Item = &LoaderConfig> {
        self.uses.iter().rev()
    }
}

/// Ordered set of compiled rules
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile rules; `enforce = "pre"` rules are tried first, `"post"` last
    pub fn compile(configs: &[RuleConfig]) -> Result<Self> {
        let mut rules = configs
            .iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>>>()?;

        // stable sort keeps declaration order within each phase
        rules.sort_by_key(|rule| match rule.enforce {
            Some(Enforce::Pre) => 0,
            None => 1,
            Some(Enforce::Post) => 2,
        });

        Ok(Self { rules })
    }

    /// Select the first rule that accepts the path
    pub fn match_rule(&self, path: &Path) -> Option<&Rule> {
        self.match_index(path).map(|i| &self.rules[i])
    }

    /// Position of the first rule that accepts the path
    pub fn match_index(&self, path: &Path) -> Option<usize> {
        let resource = normalize(path);
        self.rules.iter().position(|rule| rule.matches(&resource))
    }

    /// Rules in matching order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Forward-slash form of a path, as rule patterns expect
pub fn normalize(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_rules;

    fn loaders(rule: &Rule) -> Vec<&str> {
        rule.chain().map(|l| l.loader.as_str()).collect()
    }

    #[test]
    fn test_default_rules_route_every_asset_kind() {
        let rules = RuleSet::compile(&default_rules()).unwrap();

        let cases = [
            ("/app/src/index.js", vec!["eslint", "babel"]),
            ("/app/src/view.jsx", vec!["eslint", "babel"]),
            ("/app/src/app.css", vec!["less", "postcss", "css", "style"]),
            ("/app/src/theme.less", vec!["less", "postcss", "css"]),
            ("/app/src/logo.png", vec!["url"]),
            ("/app/src/photo.jpeg", vec!["url"]),
            ("/app/src/clip.mp4", vec!["url"]),
            ("/app/src/sound.flac", vec!["url"]),
            ("/app/src/font.woff2", vec!["url"]),
            ("/app/src/font.otf", vec!["url"]),
        ];

        for (path, expected) in cases {
            let rule = rules.match_rule(Path::new(path)).unwrap_or_else(|| panic!("{}", path));
            assert_eq!(loaders(rule), expected, "{}", path);
        }
    }

    #[test]
    fn test_exclude_and_include_filters() {
        let rules = RuleSet::compile(&default_rules()).unwrap();

        // scripts under node_modules are excluded from the lint/transpile rule
        assert!(rules.match_rule(Path::new("/app/node_modules/lib/index.js")).is_none());
        // stylesheets outside src are not included
        assert!(rules.match_rule(Path::new("/app/vendor/reset.css")).is_none());
        // assets have no filters
        assert!(rules.match_rule(Path::new("/app/node_modules/pkg/icon.svg")).is_some());
    }

    #[test]
    fn test_pre_rules_come_first() {
        let configs = vec![
            RuleConfig {
                test: r"\.js$".to_string(),
                include: None,
                exclude: None,
                enforce: None,
                uses: vec![LoaderConfig::new("babel")],
                extract: false,
            },
            RuleConfig {
                test: r"\.js$".to_string(),
                include: None,
                exclude: None,
                enforce: Some(Enforce::Pre),
                uses: vec![LoaderConfig::new("eslint")],
                extract: false,
            },
        ];
        let rules = RuleSet::compile(&configs).unwrap();
        let rule = rules.match_rule(Path::new("a.js")).unwrap();
        assert_eq!(loaders(rule), vec!["eslint"]);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let configs = vec![RuleConfig {
            test: "(".to_string(),
            include: None,
            exclude: None,
            enforce: None,
            uses: Vec::new(),
            extract: false,
        }];
        assert!(RuleSet::compile(&configs).is_err());
    }
}
