//! Hot Module Replacement (HMR) support
//!
//! Every rebuild produces a short message sequence: `hash`, then any updates
//! (`css-update`, `js-update` or `full-reload`), then `ok` or `warnings`. A
//! failed rebuild produces a single `errors` message.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ServerState;
use crate::bundler::{AssetKind, BuildResult};
use crate::config::{Config, DevServerConfig};

/// HMR message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HmrMessage {
    /// A new build finished
    Hash { hash: String },

    /// Build succeeded without warnings
    Ok,

    /// Build succeeded with lint findings
    Warnings { warnings: Vec<String> },

    /// Build failed
    Errors { errors: Vec<String> },

    /// A chunk's stylesheet moved to a new URL
    CssUpdate { chunk: String, old: String, new: String },

    /// Module id -> new module body
    JsUpdate { modules: BTreeMap<String, String> },

    /// Full page reload required
    FullReload { reason: String },
}

impl HmrMessage {
    /// Whether the message describes build state rather than an update
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            HmrMessage::Hash { .. } | HmrMessage::Ok | HmrMessage::Warnings { .. } | HmrMessage::Errors { .. }
        )
    }

    /// Final status message for a successful build
    pub fn status_of(result: &BuildResult) -> Self {
        if result.warnings.is_empty() {
            HmrMessage::Ok
        } else {
            HmrMessage::Warnings {
                warnings: result.warnings.iter().map(ToString::to_string).collect(),
            }
        }
    }
}

fn full_reload(reason: impl Into<String>) -> Vec<HmrMessage> {
    vec![HmrMessage::FullReload {
        reason: reason.into(),
    }]
}

/// Update messages that take clients from `previous` to `next`
pub fn diff_builds(
    previous: &BuildResult,
    next: &BuildResult,
    changed: &[PathBuf],
    config: &Config,
) -> Vec<HmrMessage> {
    // the document and copied files have no module to swap
    let template = config.root.join(&config.plugins.html.template);
    let copied: Vec<PathBuf> = config
        .plugins
        .copy
        .iter()
        .map(|pattern| config.root.join(&pattern.from))
        .collect();
    if let Some(path) = changed
        .iter()
        .find(|p| **p == template || copied.iter().any(|dir| p.starts_with(dir)))
    {
        return full_reload(format!("{} changed", path.display()));
    }

    let chunk_names = |r: &BuildResult| r.chunks.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
    if chunk_names(previous) != chunk_names(next) || !previous.modules.keys().eq(next.modules.keys()) {
        return full_reload("modules were added or removed");
    }

    let public_path = config.public_path();
    let mut messages = Vec::new();

    for chunk in &next.chunks {
        let stylesheet = |r: &BuildResult| {
            r.assets
                .for_chunk(&chunk.name, AssetKind::Style)
                .map(|a| format!("{}{}", public_path, a.path))
        };
        match (stylesheet(previous), stylesheet(next)) {
            (Some(old), Some(new)) if old != new => messages.push(HmrMessage::CssUpdate {
                chunk: chunk.name.clone(),
                old,
                new,
            }),
            (Some(_), None) | (None, Some(_)) => return full_reload("stylesheets were added or removed"),
            _ => {}
        }
    }

    let modules: BTreeMap<String, String> = next
        .modules
        .iter()
        .filter(|(id, code)| previous.modules.get(*id) != Some(*code))
        .map(|(id, code)| (id.clone(), code.clone()))
        .collect();
    if !modules.is_empty() {
        messages.push(HmrMessage::JsUpdate { modules });
    }

    messages
}

/// Handle WebSocket upgrade for HMR
pub async fn hmr_websocket(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(|socket| handle_hmr_socket(socket, state))
}

/// Handle HMR WebSocket connection
async fn handle_hmr_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before replaying so no build slips through
    let mut hmr_rx = state.hmr_tx.subscribe();

    let replay = state.status.read().clone();
    for message in replay {
        if let Ok(json) = serde_json::to_string(&message) {
            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    }

    debug!("HMR client connected");

    // Spawn task to forward HMR messages to client
    let send_task = tokio::spawn(async move {
        while let Ok(message) = hmr_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&message) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                debug!("HMR client disconnected");
                break;
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    debug!("HMR connection closed");
}

const CLIENT: &str = r#"<script>
(function () {
  var options = __OPTIONS__;
  var levels = { none: 0, error: 1, warning: 2, info: 3 };
  var level = levels[options.logLevel] || 0;
  var overlay = null;
  var connected = false;

  function log(kind, message) {
    if (levels[kind] > level) return;
    var method = kind === 'warning' ? 'warn' : kind;
    console[method]('[loom] ' + message);
  }

  function hideOverlay() {
    if (overlay && overlay.parentNode) overlay.parentNode.removeChild(overlay);
    overlay = null;
  }

  function showOverlay(title, messages) {
    hideOverlay();
    overlay = document.createElement('div');
    overlay.setAttribute('style', 'position:fixed;top:0;left:0;right:0;bottom:0;z-index:2147483647;overflow:auto;padding:24px;background:rgba(0,0,0,0.85);color:#e8e8e8;font:13px/1.5 monospace;');
    var heading = document.createElement('div');
    heading.setAttribute('style', 'color:#ff5555;font-size:16px;margin-bottom:12px;');
    heading.textContent = title;
    overlay.appendChild(heading);
    messages.forEach(function (text) {
      var pre = document.createElement('pre');
      pre.setAttribute('style', 'white-space:pre-wrap;margin:0 0 12px;');
      pre.textContent = text;
      overlay.appendChild(pre);
    });
    document.body.appendChild(overlay);
  }

  function reload() {
    location.reload();
  }

  function handle(msg) {
    switch (msg.type) {
      case 'hash':
        log('info', 'rebuilt ' + msg.hash);
        break;
      case 'ok':
        hideOverlay();
        break;
      case 'warnings':
        hideOverlay();
        msg.warnings.forEach(function (w) { log('warning', w); });
        if (options.overlayWarnings) showOverlay('Compiled with warnings', msg.warnings);
        break;
      case 'errors':
        msg.errors.forEach(function (e) { log('error', e); });
        if (options.overlayErrors) showOverlay('Failed to compile', msg.errors);
        break;
      case 'css-update':
        var links = document.querySelectorAll('link[rel="stylesheet"]');
        for (var i = 0; i < links.length; i++) {
          if (links[i].getAttribute('href') === msg.old) links[i].setAttribute('href', msg.new);
        }
        log('info', 'stylesheet ' + msg.chunk + ' updated');
        break;
      case 'js-update':
        if (!self.__loom_hot_apply__ || !self.__loom_hot_apply__(msg.modules)) reload();
        break;
      case 'full-reload':
        log('info', msg.reason);
        reload();
        break;
    }
  }

  function connect() {
    var protocol = location.protocol === 'https:' ? 'wss://' : 'ws://';
    var ws = new WebSocket(protocol + location.host + '/__loom_hmr');
    ws.onopen = function () {
      if (connected) reload();
      connected = true;
    };
    ws.onmessage = function (event) {
      handle(JSON.parse(event.data));
    };
    ws.onclose = function () {
      setTimeout(connect, 1000);
    };
  }

  connect();
})();
</script>
"#;

/// Client script configured from the dev server settings
pub fn client_script(config: &DevServerConfig) -> String {
    let options = serde_json::json!({
        "logLevel": config.client_log_level,
        "overlayErrors": config.overlay.errors,
        "overlayWarnings": config.overlay.warnings,
    });
    CLIENT.replace("__OPTIONS__", &options.to_string())
}

/// Inject the HMR client before `</body>` or at the end
pub fn inject_client(html: &str, config: &DevServerConfig) -> String {
    let script = client_script(config);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            let mut result = html.to_string();
            result.insert_str(pos, &script);
            result
        }
        None => format!("{}{}", html, script),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::{Asset, AssetSet, ChunkKind, ChunkOutput};
    use std::time::Duration;

    fn result(css: &str, modules: &[(&str, &str)]) -> BuildResult {
        let mut assets = AssetSet::new();
        assets.insert(Asset::new("js/main.js", "", AssetKind::Script).with_chunk("main"));
        assets.insert(Asset::new(css, "", AssetKind::Style).with_chunk("main"));
        BuildResult {
            assets,
            chunks: vec![ChunkOutput {
                name: "main".to_string(),
                kind: ChunkKind::Entry,
                script: "js/main.js".to_string(),
                styles: Vec::new(),
            }],
            modules: modules
                .iter()
                .map(|(id, code)| (id.to_string(), code.to_string()))
                .collect(),
            warnings: Vec::new(),
            manifest: BTreeMap::new(),
            hash: "h".to_string(),
            duration: Duration::ZERO,
        }
    }

    fn config() -> Config {
        Config::default_config(PathBuf::from("/app"))
    }

    #[test]
    fn test_message_wire_format() {
        let message = HmrMessage::CssUpdate {
            chunk: "main".to_string(),
            old: "/css/a.css".to_string(),
            new: "/css/b.css".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&message).unwrap(),
            r#"{"type":"css-update","chunk":"main","old":"/css/a.css","new":"/css/b.css"}"#
        );
        assert_eq!(serde_json::to_string(&HmrMessage::Ok).unwrap(), r#"{"type":"ok"}"#);
    }

    #[test]
    fn test_stylesheet_change_is_a_css_update_only() {
        let modules = [("./src/index.js", "a")];
        let before = result("css/main-1.css", &modules);
        let after = result("css/main-2.css", &modules);

        let messages = diff_builds(&before, &after, &[PathBuf::from("/app/src/app.less")], &config());
        assert_eq!(
            messages,
            vec![HmrMessage::CssUpdate {
                chunk: "main".to_string(),
                old: "/css/main-1.css".to_string(),
                new: "/css/main-2.css".to_string(),
            }]
        );
    }

    #[test]
    fn test_changed_modules_are_sent() {
        let before = result("css/main.css", &[("./src/a.js", "1"), ("./src/b.js", "2")]);
        let after = result("css/main.css", &[("./src/a.js", "1"), ("./src/b.js", "3")]);

        let messages = diff_builds(&before, &after, &[PathBuf::from("/app/src/b.js")], &config());
        let mut expected = BTreeMap::new();
        expected.insert("./src/b.js".to_string(), "3".to_string());
        assert_eq!(messages, vec![HmrMessage::JsUpdate { modules: expected }]);
    }

    #[test]
    fn test_full_reloads() {
        let before = result("css/main.css", &[("./src/a.js", "1")]);
        let after = result("css/main.css", &[("./src/a.js", "1"), ("./src/b.js", "2")]);
        let messages = diff_builds(&before, &after, &[], &config());
        assert!(matches!(messages.as_slice(), [HmrMessage::FullReload { .. }]));

        let messages = diff_builds(&before, &before, &[PathBuf::from("/app/src/index.html")], &config());
        assert!(matches!(messages.as_slice(), [HmrMessage::FullReload { .. }]));

        let messages = diff_builds(&before, &before, &[PathBuf::from("/app/src/static/a.txt")], &config());
        assert!(matches!(messages.as_slice(), [HmrMessage::FullReload { .. }]));
    }

    #[test]
    fn test_client_is_injected_with_options() {
        let html = inject_client("<html><body></body></html>", &DevServerConfig::default());
        assert!(html.contains("\"overlayWarnings\":false"));
        assert!(html.contains("/__loom_hmr"));
        assert!(html.ends_with("</script>\n</body></html>"));
    }
}
