//! Loader chains
//!
//! A loader is one transform stage. A rule's `use` list is compiled into a
//! [`LoaderChain`] and the module content flows through it stage by stage;
//! any stage may fail the build, lint stages only add diagnostics.

mod babel;
mod css;
mod eslint;
mod less;
mod postcss;
mod style;
mod url;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{LoaderConfig, Mode};
use crate::error::{BuildError, Diagnostic};

pub use babel::{BabelLoader, BabelOptions};
pub use css::{minify_css, CssLoader, CssOptions};
pub use eslint::{EslintLoader, EslintOptions};
pub use less::{LessLoader, LessOptions};
pub use postcss::{PostcssLoader, PostcssOptions};
pub use style::StyleLoader;
pub(crate) use style::inject_css;
pub use url::{UrlLoader, UrlOptions};

/// Names of the built-in loaders
pub const KNOWN_LOADERS: &[&str] = &["babel", "eslint", "less", "postcss", "css", "style", "url"];

/// Check whether a loader name is built in
pub fn is_known(name: &str) -> bool {
    KNOWN_LOADERS.contains(&name)
}

/// A stylesheet plus the class names it exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub css: String,
    /// Original class name -> scoped class name
    pub locals: BTreeMap<String, String>,
}

/// Module content as it moves through a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// File bytes as read from disk
    Raw(Vec<u8>),
    /// JavaScript source
    Script(String),
    /// Stylesheet source
    Style(Stylesheet),
}

impl Content {
    /// Textual view of the content; raw bytes must be UTF-8
    pub fn into_text(self, loader: &str, path: &Path) -> Result<String> {
        match self {
            Content::Raw(bytes) => String::from_utf8(bytes)
                .map_err(|_| BuildError::loader(loader, path, "source is not valid UTF-8").into()),
            Content::Script(code) => Ok(code),
            Content::Style(sheet) => Ok(sheet.css),
        }
    }

    /// Stylesheet view of the content; scripts are rejected
    pub fn into_stylesheet(self, loader: &str, path: &Path) -> Result<Stylesheet> {
        match self {
            Content::Style(sheet) => Ok(sheet),
            Content::Raw(bytes) => Ok(Stylesheet {
                css: Content::Raw(bytes).into_text(loader, path)?,
                locals: BTreeMap::new(),
            }),
            Content::Script(_) => {
                Err(BuildError::loader(loader, path, "expected a stylesheet, got a script").into())
            }
        }
    }

    /// Raw bytes of the content
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Content::Raw(bytes) => bytes,
            Content::Script(code) => code.into_bytes(),
            Content::Style(sheet) => sheet.css.into_bytes(),
        }
    }
}

/// A file a loader wants written next to the bundles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedFile {
    /// Path relative to the output directory
    pub path: String,
    pub contents: Vec<u8>,
    /// Source file the emission came from
    pub source: PathBuf,
}

/// An asset referenced from inside a stylesheet, after running its own rule
#[derive(Debug, Clone)]
pub struct LinkedAsset {
    pub path: PathBuf,
    /// URL the reference must be rewritten to
    pub url: String,
    pub emitted: Vec<EmittedFile>,
}

/// Resolves and processes assets referenced by a loader (e.g. css `url()`)
pub trait AssetLinker: Send + Sync {
    fn link(&self, specifier: &str, importer: &Path) -> Result<LinkedAsset>;
}

/// Per-module state shared by the stages of one chain run
pub struct LoaderContext<'a> {
    /// Absolute path of the module being processed
    pub resource: &'a Path,
    pub root: &'a Path,
    pub mode: Mode,
    pub public_path: &'a str,
    pub linker: &'a dyn AssetLinker,
    pub emitted: Vec<EmittedFile>,
    pub file_dependencies: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    /// Set by asset loaders: the URL (or data URI) the module stands for
    pub asset_url: Option<String>,
}

impl<'a> LoaderContext<'a> {
    pub fn new(
        resource: &'a Path,
        root: &'a Path,
        mode: Mode,
        public_path: &'a str,
        linker: &'a dyn AssetLinker,
    ) -> Self {
        Self {
            resource,
            root,
            mode,
            public_path,
            linker,
            emitted: Vec::new(),
            file_dependencies: Vec::new(),
            diagnostics: Vec::new(),
            asset_url: None,
        }
    }

    pub fn emit_file(&mut self, path: String, contents: Vec<u8>) {
        self.emitted.push(EmittedFile {
            path,
            contents,
            source: self.resource.to_path_buf(),
        });
    }
}

/// One transform stage
pub trait Loader: Send + Sync {
    /// Loader name for logging and errors
    fn name(&self) -> &str;

    /// Transform the content, or fail the build
    fn apply(&self, content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content>;
}

/// Instantiate a built-in loader from its configuration
pub fn create(config: &LoaderConfig) -> Result<Box<dyn Loader>> {
    let loader: Box<dyn Loader> = match config.loader.as_str() {
        "babel" => Box::new(BabelLoader::new(options(config)?)),
        "eslint" => Box::new(EslintLoader::new(options(config)?)),
        "less" => Box::new(LessLoader::new(options(config)?)),
        "postcss" => Box::new(PostcssLoader::new(options(config)?)?),
        "css" => Box::new(CssLoader::new(options(config)?)),
        "style" => Box::new(StyleLoader),
        "url" => Box::new(UrlLoader::new(options(config)?)),
        other => return Err(BuildError::UnknownLoader(other.to_string()).into()),
    };
    Ok(loader)
}

fn options<T: DeserializeOwned>(config: &LoaderConfig) -> Result<T> {
    toml::Value::Table(config.options.clone())
        .try_into()
        .with_context(|| format!("Invalid options for loader '{}'", config.loader))
}

/// An ordered list of loaders, in application order
pub struct LoaderChain {
    loaders: Vec<Box<dyn Loader>>,
}

impl LoaderChain {
    /// Build a chain from loader configs already in application order
    pub fn new<'c>(configs: impl IntoIterator<Item = &'c LoaderConfig>) -> Result<Self> {
        let loaders = configs.into_iter().map(create).collect::<Result<Vec<_>>>()?;
        Ok(Self { loaders })
    }

    /// Feed content through every stage in order
    pub fn run(&self, mut content: Content, ctx: &mut LoaderContext<'_>) -> Result<Content> {
        for loader in &self.loaders {
            debug!("{} <- {}", ctx.resource.display(), loader.name());
            content = loader.apply(content, ctx)?;
        }
        Ok(content)
    }

    pub fn names(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Linker that resolves nothing
    pub struct NoLinker;

    impl AssetLinker for NoLinker {
        fn link(&self, specifier: &str, importer: &Path) -> Result<LinkedAsset> {
            Err(BuildError::Unresolved {
                specifier: specifier.to_string(),
                importer: importer.to_path_buf(),
            }
            .into())
        }
    }

    /// Linker that maps every specifier to `/static/<file name>`
    pub struct StaticLinker;

    impl AssetLinker for StaticLinker {
        fn link(&self, specifier: &str, importer: &Path) -> Result<LinkedAsset> {
            let name = specifier.rsplit('/').next().unwrap_or(specifier);
            Ok(LinkedAsset {
                path: importer.with_file_name(name),
                url: format!("/static/{}", name),
                emitted: Vec::new(),
            })
        }
    }

    pub fn context<'a>(
        resource: &'a Path,
        mode: Mode,
        linker: &'a dyn AssetLinker,
    ) -> LoaderContext<'a> {
        LoaderContext::new(resource, Path::new("/app"), mode, "/", linker)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_unknown_loader() {
        let err = create(&LoaderConfig::new("sass")).err().unwrap();
        assert!(err.to_string().contains("unknown loader 'sass'"));
    }

    #[test]
    fn test_bad_options_rejected() {
        let config = LoaderConfig::new("url").with_option("limit", "lots");
        assert!(create(&config).is_err());
    }

    #[test]
    fn test_chain_runs_in_order() {
        let configs = [
            LoaderConfig::new("less"),
            LoaderConfig::new("css"),
            LoaderConfig::new("style"),
        ];
        let chain = LoaderChain::new(configs.iter()).unwrap();
        assert_eq!(chain.names(), vec!["less", "css", "style"]);

        let path = Path::new("/app/src/a.css");
        let mut ctx = context(path, Mode::Development, &NoLinker);
        let source = b"@c: red;\n.a { color: @c; }".to_vec();
        let out = chain.run(Content::Raw(source), &mut ctx).unwrap();

        match out {
            Content::Script(code) => {
                assert!(code.contains("document.createElement('style')"));
                assert!(code.contains("color: red"));
            }
            other => panic!("expected script, got {:?}", other),
        }
    }

    #[test]
    fn test_content_views() {
        let path = Path::new("a.bin");
        assert!(Content::Raw(vec![0xff, 0xfe]).into_text("x", path).is_err());
        assert!(Content::Script("x".into()).into_stylesheet("x", path).is_err());
        assert_eq!(Content::Script("ab".into()).into_bytes(), b"ab".to_vec());
    }
}
