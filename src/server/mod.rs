//! Development server with Hot Module Replacement
//!
//! Provides a local development server with:
//! - Serving of the last successful build straight from memory
//! - History fallback for client-side routing
//! - WebSocket-based HMR
//! - File watching and serialized rebuilds

mod hmr;

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::bundler::{Asset, AssetKind, BuildResult, Bundler};
use crate::cli::DevServerOptions;
use crate::config::Config;
use crate::utils::{format_duration, mime_type, relative_path, stem_and_ext};

pub use hmr::{client_script, diff_builds, inject_client, HmrMessage};

/// WebSocket endpoint of the HMR client
pub const HMR_PATH: &str = "/__loom_hmr";

/// Shared server state
pub struct ServerState {
    /// Project configuration
    config: Arc<Config>,

    public_path: String,

    /// Last successful build
    current: RwLock<Option<Arc<BuildResult>>>,

    /// Status messages of the last build, replayed to new clients
    status: RwLock<Vec<HmrMessage>>,

    /// HMR broadcast channel
    hmr_tx: broadcast::Sender<HmrMessage>,

    /// Whether HMR is enabled
    hmr_enabled: bool,

    /// History fallback rewrites
    rewrites: Vec<(Regex, String)>,
}

impl ServerState {
    fn new(config: Arc<Config>, hmr_enabled: bool) -> Result<Self> {
        let rewrites = config
            .dev_server
            .history_api_fallback
            .rewrites
            .iter()
            .map(|rewrite| {
                let from = Regex::new(&rewrite.from)
                    .with_context(|| format!("Invalid rewrite pattern: {}", rewrite.from))?;
                Ok((from, rewrite.to.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let (hmr_tx, _) = broadcast::channel::<HmrMessage>(100);

        Ok(Self {
            public_path: config.public_path(),
            config,
            current: RwLock::new(None),
            status: RwLock::new(Vec::new()),
            hmr_tx,
            hmr_enabled,
            rewrites,
        })
    }

    /// Run a build and publish the outcome to connected clients
    async fn rebuild(&self, bundler: &Bundler, changed: &[PathBuf]) {
        match bundler.build().await {
            Ok(result) => self.publish(result, changed),
            Err(e) => self.fail(e),
        }
    }

    fn publish(&self, result: BuildResult, changed: &[PathBuf]) {
        eprintln!(
            "{} Compiled {} in {}",
            "✓".green().bold(),
            result.hash.dimmed(),
            format_duration(result.duration)
        );
        for warning in &result.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }

        let result = Arc::new(result);
        let previous = self.current.write().replace(result.clone());

        let mut messages = vec![HmrMessage::Hash {
            hash: result.hash.clone(),
        }];
        if let Some(previous) = previous {
            messages.extend(diff_builds(&previous, &result, changed, &self.config));
        }
        messages.push(HmrMessage::status_of(&result));
        self.broadcast(messages);
    }

    fn fail(&self, err: anyhow::Error) {
        let message = format!("{:#}", err);
        error!("Build failed");
        eprintln!("{} {}", "✗".red().bold(), message.red());
        self.broadcast(vec![HmrMessage::Errors {
            errors: vec![message],
        }]);
    }

    fn broadcast(&self, messages: Vec<HmrMessage>) {
        for message in &messages {
            debug!("HMR -> {:?}", message);
            // no receivers just means no browser is connected
            let _ = self.hmr_tx.send(message.clone());
        }
        *self.status.write() = messages.into_iter().filter(HmrMessage::is_status).collect();
    }

    /// The file a request path maps to, after history fallback
    ///
    /// Only requests accepting `text/html` are rewritten, so a missing
    /// script or image still gets a 404.
    fn lookup(&self, build: &BuildResult, path: &str, accepts_html: bool) -> Option<Asset> {
        if let Some(asset) = self.asset_at(build, path) {
            return Some(asset);
        }
        if !accepts_html {
            return None;
        }

        let (_, to) = self.rewrites.iter().find(|(from, _)| from.is_match(path))?;
        self.asset_at(build, to)
    }

    fn asset_at(&self, build: &BuildResult, path: &str) -> Option<Asset> {
        let relative = path.strip_prefix(&self.public_path).or_else(|| {
            // "/assets" for a public path of "/assets/"
            (path == self.public_path.trim_end_matches('/')).then_some("")
        })?;
        let relative = if relative.is_empty() {
            self.config.plugins.html.filename.as_str()
        } else {
            relative
        };
        build.assets.get(relative).cloned()
    }
}

/// Development server
pub struct DevServer {
    /// Project configuration
    config: Arc<Config>,

    /// Server options
    options: DevServerOptions,
}

impl DevServer {
    /// Create a new development server
    pub fn new(config: Config, options: DevServerOptions) -> Result<Self> {
        Ok(Self {
            config: Arc::new(config),
            options,
        })
    }

    /// Run the initial build and return the router serving it
    pub async fn app(&self) -> Result<Router> {
        let (state, _) = self.prepare().await?;
        Ok(router(state, self.config.dev_server.compress))
    }

    /// Start the development server
    pub async fn start(&self) -> Result<()> {
        let (state, bundler) = self.prepare().await?;
        self.setup_file_watcher(state.clone(), bundler)?;

        let app = router(state, self.config.dev_server.compress);

        let listener = tokio::net::TcpListener::bind((self.options.host.as_str(), self.options.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", self.options.host, self.options.port))?;
        let addr: SocketAddr = listener.local_addr()?;

        // Open browser if requested
        if self.options.open {
            let url = format!("http://{}:{}", browse_host(&self.options.host), addr.port());
            if let Err(e) = webbrowser_open(&url) {
                debug!("Failed to open browser: {}", e);
            }
        }

        info!("Server listening on http://{}", addr);
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn prepare(&self) -> Result<(Arc<ServerState>, Arc<Bundler>)> {
        let bundler = Arc::new(Bundler::new((*self.config).clone())?.with_hot(self.options.hmr));
        let state = Arc::new(ServerState::new(self.config.clone(), self.options.hmr)?);
        state.rebuild(&bundler, &[]).await;
        Ok((state, bundler))
    }

    /// Set up file watching; each debounced batch triggers one rebuild
    fn setup_file_watcher(&self, state: Arc<ServerState>, bundler: Arc<Bundler>) -> Result<()> {
        let root = self.config.root.clone();
        let output_dir = self.config.output_dir();

        // Use a debouncer to avoid too many events
        let (tx, rx) = std::sync::mpsc::channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(Duration::from_millis(100), tx)?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;

        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

        // The debouncer is moved into the thread to keep it alive
        std::thread::spawn(move || {
            let _debouncer = debouncer;

            loop {
                match rx.recv() {
                    Ok(Ok(events)) => {
                        let mut paths: Vec<PathBuf> = events
                            .into_iter()
                            .map(|event| event.path)
                            .filter(|path| !path.starts_with(&output_dir) && !is_hidden(path, &root))
                            .collect();
                        paths.sort();
                        paths.dedup();
                        if !paths.is_empty() && batch_tx.send(paths).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Watch error: {:?}", e);
                    }
                    Err(_) => {
                        // Channel closed, exit
                        break;
                    }
                }
            }
        });

        // one rebuild at a time; batches queued meanwhile are merged
        tokio::spawn(async move {
            while let Some(mut changed) = batch_rx.recv().await {
                while let Ok(more) = batch_rx.try_recv() {
                    changed.extend(more);
                }
                changed.sort();
                changed.dedup();

                for path in &changed {
                    let shown = relative_path(&state.config.root, path)
                        .unwrap_or_else(|| path.display().to_string());
                    eprintln!("  {} {}", "↻".yellow(), shown.dimmed());
                }
                state.rebuild(&bundler, &changed).await;
            }
        });

        Ok(())
    }
}

/// Router serving the in-memory build
fn router(state: Arc<ServerState>, compress: bool) -> Router {
    let app = Router::new()
        .route(HMR_PATH, get(hmr::hmr_websocket))
        .fallback(serve_asset)
        .layer(CorsLayer::permissive())
        .with_state(state);

    if compress {
        app.layer(CompressionLayer::new())
    } else {
        app
    }
}

/// Serve a file of the current build
async fn serve_asset(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(build) = state.current.read().clone() else {
        let errors: Vec<String> = state
            .status
            .read()
            .iter()
            .filter_map(|m| match m {
                HmrMessage::Errors { errors } => Some(errors.join("\n")),
                _ => None,
            })
            .collect();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Build failed:\n{}", errors.join("\n")),
        )
            .into_response();
    };

    let path = uri.path();
    let Some(asset) = state.lookup(&build, path, accepts_html(&headers)) else {
        debug!("Not found: {}", path);
        return (StatusCode::NOT_FOUND, format!("File not found: {}", path)).into_response();
    };

    let (_, ext) = stem_and_ext(Path::new(&asset.path));
    let content_type = HeaderValue::from_static(mime_type(&ext));

    let mut body = asset.contents;
    if asset.kind == AssetKind::Html && state.hmr_enabled {
        body = match String::from_utf8(body) {
            Ok(html) => inject_client(&html, &state.config.dev_server).into_bytes(),
            Err(e) => {
                warn!("{} is not valid UTF-8", asset.path);
                e.into_bytes()
            }
        };
    }

    let mut response = body.into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
}

fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|media| {
            let media = media.split(';').next().unwrap_or_default().trim();
            media.eq_ignore_ascii_case("text/html")
        })
}

/// Whether a watched path is a dotfile or lives in a dot directory of the project
fn is_hidden(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn browse_host(host: &str) -> &str {
    if host == "0.0.0.0" || host == "::" {
        "localhost"
    } else {
        host
    }
}

/// Open URL in browser (simple implementation)
fn webbrowser_open(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .spawn()?;
    }

    Ok(())
}
