//! In-memory build output

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// What an output file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssetKind {
    Script,
    Style,
    Html,
    /// File emitted by a loader (images, media, fonts)
    Asset,
    /// File copied verbatim
    Static,
    Manifest,
}

impl AssetKind {
    pub fn label(self) -> &'static str {
        match self {
            AssetKind::Script => "script",
            AssetKind::Style => "style",
            AssetKind::Html => "html",
            AssetKind::Asset => "asset",
            AssetKind::Static => "static",
            AssetKind::Manifest => "manifest",
        }
    }
}

/// One output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Forward-slash path relative to the output directory
    pub path: String,
    pub contents: Vec<u8>,
    pub kind: AssetKind,
    /// Chunk the file belongs to
    pub chunk: Option<String>,
    /// Source file it was produced from
    pub source: Option<PathBuf>,
}

impl Asset {
    pub fn new(path: impl Into<String>, contents: impl Into<Vec<u8>>, kind: AssetKind) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            kind,
            chunk: None,
            source: None,
        }
    }

    pub fn with_chunk(mut self, chunk: &str) -> Self {
        self.chunk = Some(chunk.to_string());
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn size(&self) -> usize {
        self.contents.len()
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.contents).ok()
    }
}

/// Every file a build produces, keyed by output path
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    assets: BTreeMap<String, Asset>,
}

impl AssetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, replacing any earlier file at the same path
    pub fn insert(&mut self, asset: Asset) -> Option<Asset> {
        self.assets.insert(asset.path.clone(), asset)
    }

    pub fn get(&self, path: &str) -> Option<&Asset> {
        self.assets.get(path.trim_start_matches('/'))
    }

    pub fn remove(&mut self, path: &str) -> Option<Asset> {
        self.assets.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn of_kind(&self, kind: AssetKind) -> impl Iterator<Item = &Asset> {
        self.assets.values().filter(move |a| a.kind == kind)
    }

    /// The file of the given kind produced for a chunk
    pub fn for_chunk(&self, chunk: &str, kind: AssetKind) -> Option<&Asset> {
        self.of_kind(kind).find(|a| a.chunk.as_deref() == Some(chunk))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.assets.values().map(Asset::size).sum()
    }

    /// Write every file below `dir`
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        for asset in self.assets.values() {
            let target = dir.join(&asset.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::write(&target, &asset.contents)
                .with_context(|| format!("Failed to write {}", target.display()))?;
            debug!("Wrote {}", target.display());
        }

        Ok(())
    }
}
