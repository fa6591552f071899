//! Core bundler implementation
//!
//! Builds the module graph from the entries, runs every module through the
//! loader chain of its rule, splits the graph into chunks and renders them
//! into an in-memory [`AssetSet`]. Nothing touches the output directory until
//! [`Bundler::emit`].

mod chunk;
mod graph;
mod link;
mod output;
mod runtime;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{BuildError, Diagnostic};
use crate::loaders::{inject_css, AssetLinker, Content, EmittedFile, LinkedAsset, LoaderChain, LoaderContext};
use crate::plugins::{PluginContext, PluginManager};
use crate::resolver::{normalize_path, Resolver};
use crate::rules::RuleSet;
use crate::utils::{hash_content, module_id, render_template, stem_and_ext, TemplateVars};

pub use chunk::{split_chunks, CacheGroup, Chunk, ChunkKind};
pub use graph::{Module, ModuleGraph, ModuleId, ModuleKind};
pub use link::link;
pub use output::{Asset, AssetKind, AssetSet};
pub use runtime::runtime_source;

/// Information about a generated file
#[derive(Debug, Clone)]
pub struct BundleInfo {
    /// Path relative to the output directory
    pub path: String,

    /// Size in bytes
    pub size: usize,

    pub kind: AssetKind,
}

/// A stylesheet pulled out of a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedStyle {
    /// Id of the module it came from
    pub module: String,
    pub css: String,
}

/// A rendered chunk
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub name: String,
    pub kind: ChunkKind,

    /// Output path of the chunk's script
    pub script: String,

    /// Stylesheets to extract, in module order
    pub styles: Vec<ExtractedStyle>,
}

/// Result of a build operation
#[derive(Debug)]
pub struct BuildResult {
    /// Every output file
    pub assets: AssetSet,

    /// Chunks in load order
    pub chunks: Vec<ChunkOutput>,

    /// Module id -> rendered module body
    pub modules: BTreeMap<String, String>,

    /// Lint findings
    pub warnings: Vec<Diagnostic>,

    /// Logical name -> public URL of the emitted file
    pub manifest: BTreeMap<String, String>,

    /// Fingerprint of the whole output
    pub hash: String,

    pub duration: Duration,
}

impl BuildResult {
    /// Generated files, in output path order
    pub fn bundles(&self) -> Vec<BundleInfo> {
        self.assets
            .iter()
            .map(|asset| BundleInfo {
                path: asset.path.clone(),
                size: asset.size(),
                kind: asset.kind,
            })
            .collect()
    }

    pub fn chunk(&self, name: &str) -> Option<&ChunkOutput> {
        self.chunks.iter().find(|c| c.name == name)
    }
}

/// Output of one module's loader chain
struct Transformed {
    content: Content,
    extract: bool,
    emitted: Vec<EmittedFile>,
    diagnostics: Vec<Diagnostic>,
    asset_url: Option<String>,
}

impl Transformed {
    fn plain(content: Content) -> Self {
        Self {
            content,
            extract: false,
            emitted: Vec::new(),
            diagnostics: Vec::new(),
            asset_url: None,
        }
    }
}

#[derive(Default)]
struct BuildState {
    graph: ModuleGraph,
    warnings: Vec<Diagnostic>,
}

#[derive(Default)]
struct Rendered {
    assets: AssetSet,
    chunks: Vec<ChunkOutput>,
    modules: BTreeMap<String, String>,
}

/// The main bundler
pub struct Bundler {
    /// Project configuration
    config: Arc<Config>,

    public_path: String,

    rules: RuleSet,

    /// One loader chain per rule, same order as `rules`
    chains: Vec<LoaderChain>,

    /// Module resolver
    resolver: Resolver,

    cache_groups: Vec<CacheGroup>,

    plugins: PluginManager,

    /// Emit hot-reload support into the runtime
    hot: bool,
}

impl Bundler {
    /// Create a new bundler instance with the stock plugins
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let rules = RuleSet::compile(&config.rules)?;
        let chains = rules
            .rules()
            .iter()
            .map(|rule| LoaderChain::new(rule.chain()))
            .collect::<Result<Vec<_>>>()?;

        let cache_groups = config
            .optimization
            .split_chunks
            .cache_groups
            .iter()
            .map(|group| {
                let test = Regex::new(&group.test)
                    .with_context(|| format!("Invalid cache group pattern: {}", group.test))?;
                Ok(CacheGroup {
                    name: group.name.clone(),
                    test,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let plugins = PluginManager::with_defaults(&config);

        Ok(Self {
            public_path: config.public_path(),
            config,
            rules,
            chains,
            resolver: Resolver::default(),
            cache_groups,
            plugins,
            hot: false,
        })
    }

    /// Toggle hot-reload support in the emitted runtime
    pub fn with_hot(mut self, hot: bool) -> Self {
        self.hot = hot;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plugins_mut(&mut self) -> &mut PluginManager {
        &mut self.plugins
    }

    /// Build the project into memory
    pub async fn build(&self) -> Result<BuildResult> {
        let start = Instant::now();

        let ctx = PluginContext {
            config: &self.config,
            chunks: &[],
        };
        self.plugins.run_build_start(&ctx).await?;

        // every entry must exist before any module is processed
        let entries = self
            .config
            .entry
            .keys()
            .map(|name| Ok((name.clone(), normalize_path(&self.config.resolve_entry(name)?))))
            .collect::<Result<Vec<_>>>()?;

        // 1. Build the module graph from the entries
        info!("Building module graph...");
        let mut state = BuildState::default();
        let mut roots = Vec::with_capacity(entries.len());
        for (name, path) in &entries {
            debug!("Processing entry: {} -> {}", name, path.display());
            let id = self.visit(path, &mut state)?;
            roots.push((name.clone(), id));
        }

        // 2. Split into chunks
        let runtime_chunk = Some(self.config.optimization.runtime_chunk.as_str()).filter(|n| !n.is_empty());
        let chunks = split_chunks(&state.graph, &roots, &self.cache_groups, runtime_chunk);
        info!(
            "Generated {} chunk(s) from {} module(s)",
            chunks.len(),
            state.graph.len()
        );

        // 3. Render chunk scripts and loader-emitted files
        let Rendered {
            mut assets,
            chunks,
            modules,
        } = self.render(&state.graph, &chunks, runtime_chunk.is_none())?;

        // 4. Plugins
        let ctx = PluginContext {
            config: &self.config,
            chunks: &chunks,
        };
        self.plugins.run_process_assets(&mut assets, &ctx).await?;

        // 5. Manifest
        let manifest = self.manifest(&assets, &chunks);
        if self.config.output.manifest {
            let json = serde_json::to_string_pretty(&manifest)?;
            assets.insert(Asset::new("manifest.json", json, AssetKind::Manifest));
        }

        let hash = build_hash(&assets);
        let duration = start.elapsed();
        debug!("Build {} completed in {:?}", hash, duration);

        Ok(BuildResult {
            assets,
            chunks,
            modules,
            warnings: state.warnings,
            manifest,
            hash,
            duration,
        })
    }

    /// Write a build to `outdir`, or the configured output directory
    pub fn emit(&self, result: &BuildResult, outdir: Option<&Path>) -> Result<PathBuf> {
        let dir = outdir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output_dir());
        result.assets.write_to(&dir)?;
        info!("Wrote {} file(s) to {}", result.assets.len(), dir.display());
        Ok(dir)
    }

    /// Run a file through the chain of the first matching rule
    fn transform(&self, path: &Path) -> Result<Transformed> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read module: {}", path.display()))?;

        let Some(index) = self.rules.match_index(path) else {
            return Ok(Transformed::plain(fallback(path, bytes)?));
        };

        let mut ctx = LoaderContext::new(path, &self.config.root, self.config.mode, &self.public_path, self);
        let content = self.chains[index].run(Content::Raw(bytes), &mut ctx)?;

        Ok(Transformed {
            content,
            extract: self.rules.rules()[index].extract,
            emitted: ctx.emitted,
            diagnostics: ctx.diagnostics,
            asset_url: ctx.asset_url,
        })
    }

    /// Process a module and, depth-first, everything it imports
    fn visit(&self, path: &Path, state: &mut BuildState) -> Result<ModuleId> {
        if let Some(id) = state.graph.get_module_id(path) {
            return Ok(id);
        }
        debug!("Processing module: {}", path.display());

        let transformed = self.transform(path)?;
        state.warnings.extend(transformed.diagnostics);
        let id = module_id(path, &self.config.root);

        let (kind, source, css) = match transformed.content {
            Content::Script(code) if transformed.asset_url.is_some() => (ModuleKind::Asset, code, None),
            Content::Script(code) => (ModuleKind::Script, code, None),
            Content::Style(sheet) if transformed.extract => {
                let code = format!(
                    "module.exports = {};\nif (module.hot) module.hot.accept();\n",
                    serde_json::to_string(&sheet.locals)?
                );
                (ModuleKind::ExtractedStyle, code, Some(sheet.css))
            }
            Content::Style(sheet) => {
                let code = format!(
                    "{}module.exports = {};\n",
                    inject_css(&sheet.css, &id)?,
                    serde_json::to_string(&sheet.locals)?
                );
                (ModuleKind::Script, code, None)
            }
            Content::Raw(_) => {
                return Err(BuildError::loader(
                    "bundler",
                    path,
                    "loader chain must end with a script or stylesheet stage",
                )
                .into())
            }
        };

        let specifiers = self.resolver.extract_dependencies(&source);

        // added before its dependencies so import cycles terminate
        let module = state.graph.add_module(Module {
            id,
            path: path.to_path_buf(),
            kind,
            code: String::new(),
            css,
            emitted: transformed.emitted,
        });

        let mut ids = HashMap::new();
        for specifier in specifiers {
            let resolved = self.resolver.resolve(&specifier, path)?;
            let dependency = self.visit(&resolved, state)?;
            state.graph.add_dependency(module, dependency);
            if let Some(dep) = state.graph.get_module(dependency) {
                ids.insert(specifier, dep.id.clone());
            }
        }

        let code = link(&source, &ids, path)?;
        if let Some(entry) = state.graph.get_module_mut(module) {
            entry.code = code;
        }

        Ok(module)
    }

    fn render(&self, graph: &ModuleGraph, chunks: &[Chunk], inline_runtime: bool) -> Result<Rendered> {
        let mut rendered = Rendered::default();
        let extract_shared = self.config.plugins.extract_css.all_chunks;

        for chunk in chunks {
            let mut styles = Vec::new();
            let mut bodies = Vec::new();

            for module in chunk.module_ids.iter().filter_map(|&id| graph.get_module(id)) {
                let mut code = module.code.clone();
                if let Some(css) = &module.css {
                    if chunk.kind == ChunkKind::Shared && !extract_shared {
                        code = inject_css(css, &module.id)? + &code;
                    } else {
                        styles.push(ExtractedStyle {
                            module: module.id.clone(),
                            css: css.clone(),
                        });
                    }
                }

                for file in &module.emitted {
                    rendered.assets.insert(
                        Asset::new(file.path.clone(), file.contents.clone(), AssetKind::Asset)
                            .with_source(file.source.clone()),
                    );
                }

                let newline = if code.ends_with('\n') { "" } else { "\n" };
                bodies.push(format!(
                    "{}: function (module, exports, require) {{\n{}{}}}",
                    serde_json::to_string(&module.id)?,
                    code,
                    newline
                ));
                rendered.modules.insert(module.id.clone(), code);
            }

            let mut script = String::new();
            if chunk.kind == ChunkKind::Runtime || (chunk.kind == ChunkKind::Entry && inline_runtime) {
                script.push_str(&runtime_source(self.hot));
            }
            if chunk.kind != ChunkKind::Runtime {
                let entry = match chunk.entry_module.and_then(|id| graph.get_module(id)) {
                    Some(module) => format!(", {}", serde_json::to_string(&module.id)?),
                    None => String::new(),
                };
                script.push_str(&format!(
                    "(self.__loom_register__ = self.__loom_register__ || []).push([{}, {{\n{}\n}}{}]);\n",
                    serde_json::to_string(&[&chunk.name])?,
                    bodies.join(",\n"),
                    entry
                ));
            }

            let template = match chunk.kind {
                ChunkKind::Shared => &self.config.output.chunk_filename,
                _ => &self.config.output.filename,
            };
            let hash = hash_content(script.as_bytes());
            let path = render_template(
                template,
                &TemplateVars {
                    name: &chunk.name,
                    ext: "js",
                    hash: &hash,
                    hash_length: self.config.output.hash_length,
                },
            );
            debug!("Rendered chunk {} -> {}", chunk.name, path);

            rendered
                .assets
                .insert(Asset::new(path.clone(), script, AssetKind::Script).with_chunk(&chunk.name));
            rendered.chunks.push(ChunkOutput {
                name: chunk.name.clone(),
                kind: chunk.kind,
                script: path,
                styles,
            });
        }

        Ok(rendered)
    }

    fn manifest(&self, assets: &AssetSet, chunks: &[ChunkOutput]) -> BTreeMap<String, String> {
        let url = |path: &str| format!("{}{}", self.public_path, path);
        let mut manifest = BTreeMap::new();

        for chunk in chunks {
            manifest.insert(format!("{}.js", chunk.name), url(&chunk.script));
            if let Some(style) = assets.for_chunk(&chunk.name, AssetKind::Style) {
                manifest.insert(format!("{}.css", chunk.name), url(&style.path));
            }
        }

        for asset in assets.of_kind(AssetKind::Asset) {
            if let Some(source) = &asset.source {
                let key = module_id(source, &self.config.root);
                manifest.insert(key.trim_start_matches("./").to_string(), url(&asset.path));
            }
        }

        manifest
    }
}

impl AssetLinker for Bundler {
    /// Resolve a stylesheet reference and run it through its own rule
    fn link(&self, specifier: &str, importer: &Path) -> Result<LinkedAsset> {
        // stylesheet urls are relative unless they say otherwise
        let specifier = if specifier.starts_with('.') || specifier.starts_with('~') {
            specifier.to_string()
        } else {
            format!("./{}", specifier)
        };

        let path = self.resolver.resolve(&specifier, importer)?;
        let transformed = self.transform(&path)?;
        let url = transformed.asset_url.ok_or_else(|| {
            BuildError::loader(
                "css",
                importer,
                format!("'{}' does not resolve to an asset", specifier),
            )
        })?;

        Ok(LinkedAsset {
            path,
            url,
            emitted: transformed.emitted,
        })
    }
}

/// Handling for files no rule matches
fn fallback(path: &Path, bytes: Vec<u8>) -> Result<Content> {
    let (_, ext) = stem_and_ext(path);
    match ext.as_str() {
        "js" | "mjs" | "cjs" => Ok(Content::Script(Content::Raw(bytes).into_text("js", path)?)),
        "json" => {
            let text = Content::Raw(bytes).into_text("json", path)?;
            serde_json::from_str::<serde_json::Value>(&text).map_err(|e| BuildError::Syntax {
                path: path.to_path_buf(),
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            })?;
            Ok(Content::Script(format!("module.exports = {};\n", text.trim())))
        }
        _ => Err(BuildError::NoMatchingRule(path.to_path_buf()).into()),
    }
}

fn build_hash(assets: &AssetSet) -> String {
    let mut hasher = Sha256::new();
    for asset in assets.iter() {
        hasher.update(asset.path.as_bytes());
        hasher.update(&asset.contents);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..20].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut all = vec![
            ("src/index.html", "<html><head></head><body></body></html>"),
            ("src/static/robots.txt", "User-agent: *\n"),
        ];
        all.extend_from_slice(files);
        for (path, contents) in all {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, contents).unwrap();
        }
        dir
    }

    async fn build(dir: &TempDir, edit: impl FnOnce(&mut Config)) -> Result<BuildResult> {
        let mut config = Config::default_config(dir.path().to_path_buf());
        edit(&mut config);
        Bundler::new(config)?.build().await
    }

    fn app() -> TempDir {
        project(&[
            (
                "src/index.js",
                "import { greet } from './util';\nimport lib from 'lib';\nconsole.log(greet(lib));\n",
            ),
            ("src/util.js", "export function greet(name) {\n  return 'hi ' + name;\n}\n"),
            ("node_modules/lib/package.json", r#"{ "main": "main.js" }"#),
            ("node_modules/lib/main.js", "module.exports = 'lib';\n"),
        ])
    }

    #[tokio::test]
    async fn test_build_splits_runtime_vendor_and_entry() {
        let dir = app();
        let result = build(&dir, |_| {}).await.unwrap();

        let names: Vec<_> = result.chunks.iter().map(|c| (c.name.as_str(), c.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("manifest", ChunkKind::Runtime),
                ("vendor", ChunkKind::Shared),
                ("main", ChunkKind::Entry),
            ]
        );

        let script = |name: &str| {
            let chunk = result.chunk(name).unwrap();
            result.assets.get(&chunk.script).unwrap().text().unwrap().to_string()
        };
        assert!(script("manifest").contains("self.__loom_require__ = require;"));
        assert!(script("vendor").contains("\"./node_modules/lib/main.js\": function (module, exports, require)"));
        let main = script("main");
        assert!(main.contains("\"./src/util.js\": function"));
        assert!(!main.contains("\"./node_modules/lib/main.js\": function"));
        assert!(main.ends_with("}, \"./src/index.js\"]);\n"));

        assert_eq!(result.manifest["main.js"], format!("/{}", result.chunk("main").unwrap().script));
        assert!(result.assets.contains("index.html"));
        assert!(result.assets.contains("static/robots.txt"));
        assert!(result.assets.contains("manifest.json"));
    }

    #[tokio::test]
    async fn test_builds_are_deterministic() {
        let dir = app();
        let first = build(&dir, |_| {}).await.unwrap();
        let second = build(&dir, |_| {}).await.unwrap();

        let paths = |r: &BuildResult| r.bundles().into_iter().map(|b| b.path).collect::<Vec<_>>();
        assert_eq!(paths(&first), paths(&second));
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn test_inline_runtime_without_runtime_chunk() {
        let dir = app();
        let result = build(&dir, |c| c.optimization.runtime_chunk.clear()).await.unwrap();

        assert!(result.chunk("manifest").is_none());
        let main = result.chunk("main").unwrap();
        let text = result.assets.get(&main.script).unwrap().text().unwrap();
        assert!(text.starts_with("(function () {\n  if (self.__loom_require__) return;"));
    }

    #[tokio::test]
    async fn test_missing_entry_aborts() {
        let dir = project(&[]);
        let err = build(&dir, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("entry 'main' points to non-existent file"));
    }

    #[tokio::test]
    async fn test_unmatched_file_fails() {
        let dir = project(&[
            ("src/index.js", "import notes from './notes.txt';\n"),
            ("src/notes.txt", "hello"),
        ]);
        let err = build(&dir, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("module parse failed"));
    }

    #[tokio::test]
    async fn test_json_modules_and_unresolved_imports() {
        let dir = project(&[
            ("src/index.js", "import data from './data.json';\n"),
            ("src/data.json", "{ \"b\": 1, \"a\": 2 }\n"),
        ]);
        let result = build(&dir, |_| {}).await.unwrap();
        assert_eq!(result.modules["./src/data.json"], "module.exports = { \"b\": 1, \"a\": 2 };\n");

        let dir = project(&[("src/index.js", "import missing from './missing';\n")]);
        let err = build(&dir, |_| {}).await.unwrap_err();
        assert!(err.to_string().contains("can't resolve './missing'"));
    }

    #[tokio::test]
    async fn test_stylesheets_are_extracted_or_injected() {
        let dir = project(&[
            ("src/index.js", "import styles from './app.less';\nimport './plain.css';\nconsole.log(styles.title);\n"),
            ("src/app.less", "@c: red;\n.title { color: @c; }\n"),
            ("src/plain.css", "body { margin: 0; }\n"),
        ]);
        let result = build(&dir, |c| c.mode = Mode::Development).await.unwrap();

        let main = result.chunk("main").unwrap();
        assert_eq!(main.styles.len(), 1);
        assert_eq!(main.styles[0].module, "./src/app.less");
        assert!(main.styles[0].css.contains("color: red"));

        assert!(result.modules["./src/app.less"].starts_with("module.exports = {\"title\":\"app-title-"));
        assert!(result.modules["./src/plain.css"].contains("document.createElement('style')"));
        assert!(result.manifest.contains_key("main.css"));
    }
}
