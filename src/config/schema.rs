//! Configuration schema definitions
//!
//! Every default here reproduces the stock single-page-app setup, so a
//! `loom.toml` only has to name what differs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Build mode, selected by `--mode` or `NODE_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    Production,
    #[default]
    Development,
}

impl Mode {
    /// Interpret a `NODE_ENV` style value; anything but "production" is development
    pub fn from_env_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            Mode::Production
        } else {
            Mode::Development
        }
    }

    /// Read the mode from the `NODE_ENV` environment variable
    pub fn from_env() -> Self {
        std::env::var("NODE_ENV")
            .map(|v| Self::from_env_value(&v))
            .unwrap_or_default()
    }

    pub fn is_production(self) -> bool {
        self == Mode::Production
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Production => f.write_str("production"),
            Mode::Development => f.write_str("development"),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Public URL prefix for emitted files
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Filename template for entry chunks
    #[serde(default = "default_js_filename")]
    pub filename: String,

    /// Filename template for non-entry chunks (shared and runtime)
    #[serde(default = "default_js_filename")]
    pub chunk_filename: String,

    /// Number of hex digits `[hash]` expands to
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,

    /// Write manifest.json next to the bundles
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            public_path: default_public_path(),
            filename: default_js_filename(),
            chunk_filename: default_js_filename(),
            hash_length: default_hash_length(),
            manifest: true,
        }
    }
}

fn default_output_path() -> String {
    "dist".to_string()
}

fn default_public_path() -> String {
    "/".to_string()
}

fn default_js_filename() -> String {
    "js/[name]-[hash].js".to_string()
}

fn default_hash_length() -> usize {
    20
}

fn default_true() -> bool {
    true
}

/// When a rule runs relative to normal rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforce {
    Pre,
    Post,
}

/// One entry in a rule's loader chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Built-in loader name (babel, eslint, less, postcss, css, style, url)
    pub loader: String,

    /// Loader-specific options
    #[serde(default)]
    pub options: toml::Table,
}

impl LoaderConfig {
    pub fn new(loader: &str) -> Self {
        Self {
            loader: loader.to_string(),
            options: toml::Table::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

/// A file-pattern rule and its loader chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex the module path must match
    pub test: String,

    /// Regex the module path must also match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,

    /// Regex that rejects a module path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforce: Option<Enforce>,

    /// Loader chain, applied last to first
    #[serde(rename = "use")]
    pub uses: Vec<LoaderConfig>,

    /// Route the resulting stylesheet into the extracted css file
    #[serde(default)]
    pub extract: bool,
}

/// The stock rule set
pub fn default_rules() -> Vec<RuleConfig> {
    let css_loader = LoaderConfig::new("css")
        .with_option("modules", true)
        .with_option("local_ident_name", "[name]-[local]-[hash:base64:5]");
    let less_loader = LoaderConfig::new("less");

    vec![
        RuleConfig {
            test: r"\.(js|jsx)$".to_string(),
            include: None,
            exclude: Some("node_modules".to_string()),
            enforce: Some(Enforce::Pre),
            uses: vec![LoaderConfig::new("babel"), LoaderConfig::new("eslint")],
            extract: false,
        },
        RuleConfig {
            test: r"\.css$".to_string(),
            include: Some("src".to_string()),
            exclude: Some("node_modules".to_string()),
            enforce: None,
            uses: vec![
                LoaderConfig::new("style"),
                css_loader.clone(),
                LoaderConfig::new("postcss"),
                less_loader.clone(),
            ],
            extract: false,
        },
        RuleConfig {
            test: r"\.less$".to_string(),
            include: Some("src".to_string()),
            exclude: Some("node_modules".to_string()),
            enforce: None,
            uses: vec![css_loader, LoaderConfig::new("postcss"), less_loader],
            extract: true,
        },
        asset_rule(r"\.(png|jpe?g|gif|svg)(\?.*)?$", "static/img/[name].[hash:7].[ext]"),
        asset_rule(
            r"\.(mp4|webm|ogg|mp3|wav|flac|aac)(\?.*)?$",
            "static/media/[name].[hash:7].[ext]",
        ),
        asset_rule(r"\.(woff2?|eot|ttf|otf)(\?.*)?$", "static/fonts/[name].[hash:7].[ext]"),
    ]
}

fn asset_rule(test: &str, name: &str) -> RuleConfig {
    RuleConfig {
        test: test.to_string(),
        include: None,
        exclude: None,
        enforce: None,
        uses: vec![LoaderConfig::new("url")
            .with_option("limit", 10000)
            .with_option("name", name)],
        extract: false,
    }
}

/// Stylesheet extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractCssConfig {
    #[serde(default = "default_css_filename")]
    pub filename: String,

    /// Also pull stylesheets of shared chunks into each entry's file
    #[serde(default = "default_true")]
    pub all_chunks: bool,
}

impl Default for ExtractCssConfig {
    fn default() -> Self {
        Self {
            filename: default_css_filename(),
            all_chunks: true,
        }
    }
}

fn default_css_filename() -> String {
    "css/[name]-[hash].css".to_string()
}

/// HTML minification switches, applied in production mode only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlMinifyConfig {
    #[serde(default = "default_true")]
    pub remove_comments: bool,

    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,

    #[serde(default = "default_true")]
    pub remove_attribute_quotes: bool,
}

impl Default for HtmlMinifyConfig {
    fn default() -> Self {
        Self {
            remove_comments: true,
            collapse_whitespace: true,
            remove_attribute_quotes: true,
        }
    }
}

/// HTML document generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtmlConfig {
    #[serde(default = "default_template")]
    pub template: String,

    #[serde(default = "default_html_filename")]
    pub filename: String,

    #[serde(default)]
    pub minify: HtmlMinifyConfig,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            filename: default_html_filename(),
            minify: HtmlMinifyConfig::default(),
        }
    }
}

fn default_template() -> String {
    "src/index.html".to_string()
}

fn default_html_filename() -> String {
    "index.html".to_string()
}

/// One verbatim copy instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyPattern {
    /// Source directory, relative to the project root
    pub from: String,

    /// Destination directory, relative to the output directory
    pub to: String,

    /// Glob patterns (relative to `from`) that are not copied
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub extract_css: ExtractCssConfig,

    #[serde(default)]
    pub html: HtmlConfig,

    #[serde(default = "default_copy")]
    pub copy: Vec<CopyPattern>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            extract_css: ExtractCssConfig::default(),
            html: HtmlConfig::default(),
            copy: default_copy(),
        }
    }
}

fn default_copy() -> Vec<CopyPattern> {
    vec![CopyPattern {
        from: "src/static".to_string(),
        to: "static".to_string(),
        ignore: Vec::new(),
    }]
}

/// A group of modules pulled out into one shared chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGroupConfig {
    /// Output chunk name
    pub name: String,

    /// Regex over module paths
    pub test: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitChunksConfig {
    #[serde(default = "default_cache_groups")]
    pub cache_groups: Vec<CacheGroupConfig>,
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        Self {
            cache_groups: default_cache_groups(),
        }
    }
}

fn default_cache_groups() -> Vec<CacheGroupConfig> {
    vec![CacheGroupConfig {
        name: "vendor".to_string(),
        test: r"[\\/]node_modules[\\/]".to_string(),
    }]
}

/// Chunk optimization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Name of the chunk holding the module runtime; empty keeps it inline
    #[serde(default = "default_runtime_chunk")]
    pub runtime_chunk: String,

    #[serde(default)]
    pub split_chunks: SplitChunksConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            runtime_chunk: default_runtime_chunk(),
            split_chunks: SplitChunksConfig::default(),
        }
    }
}

fn default_runtime_chunk() -> String {
    "manifest".to_string()
}

/// Error overlay switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_true")]
    pub errors: bool,

    #[serde(default)]
    pub warnings: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            errors: true,
            warnings: false,
        }
    }
}

/// A history fallback rewrite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteConfig {
    /// Regex over the request path
    pub from: String,

    /// Path served instead
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryFallbackConfig {
    #[serde(default = "default_rewrites")]
    pub rewrites: Vec<RewriteConfig>,
}

impl Default for HistoryFallbackConfig {
    fn default() -> Self {
        Self {
            rewrites: default_rewrites(),
        }
    }
}

fn default_rewrites() -> Vec<RewriteConfig> {
    vec![RewriteConfig {
        from: ".*".to_string(),
        to: "/index.html".to_string(),
    }]
}

/// Development server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to run dev server on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable hot module replacement
    #[serde(default = "default_true")]
    pub hot: bool,

    /// Gzip responses
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Open browser automatically
    #[serde(default)]
    pub open: bool,

    /// Browser console verbosity of the HMR client
    #[serde(default = "default_client_log_level")]
    pub client_log_level: String,

    #[serde(default)]
    pub overlay: OverlayConfig,

    #[serde(default)]
    pub history_api_fallback: HistoryFallbackConfig,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hot: true,
            compress: true,
            open: false,
            client_log_level: default_client_log_level(),
            overlay: OverlayConfig::default(),
            history_api_fallback: HistoryFallbackConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    8083
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_log_level() -> String {
    "warning".to_string()
}
