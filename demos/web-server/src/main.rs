//! Demo web server with an xterm.js terminal.
//!
//! Run with: cargo run -p podterm-web-server
//!
//! Then open http://localhost:8082 in your browser. Sessions run on this host
//! through `LocalPtyExecutor`; the namespace and pod only label them.
//!
//! Environment:
//! - `PODTERM_ADDR`: listen address (default `127.0.0.1:8082`)
//! - `PODTERM_CONFIG`: optional JSON file with `session` and `websocket` sections
//! - `RUST_LOG`: log filter (default `info`)

use std::{net::SocketAddr, path::Path, sync::Arc};

use anyhow::Context as _;
use axum::{Router, response::Html, routing::get};
use podterm_executor::LocalPtyExecutor;
use podterm_session::{SessionConfig, SessionManager};
use podterm_transport::{WsConfig, WsState, create_ws_router};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "127.0.0.1:8082";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    session: SessionConfig,
    websocket: WsConfig,
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<DemoConfig> {
    let Some(path) = path else {
        return Ok(DemoConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::var_os("PODTERM_CONFIG").map(std::path::PathBuf::from);
    let config = load_config(config_path.as_deref()).await?;
    let addr: SocketAddr = std::env::var("PODTERM_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("invalid PODTERM_ADDR")?;

    let executor = LocalPtyExecutor::new().with_cwd(std::env::current_dir()?);
    let manager = Arc::new(SessionManager::new(Arc::new(executor), config.session));
    let state = WsState::new(Arc::clone(&manager), config.websocket);

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            manager.shutdown();
        })
        .await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>podterm</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/xterm@5.3.0/css/xterm.css" />
    <script src="https://cdn.jsdelivr.net/npm/xterm@5.3.0/lib/xterm.js"></script>
    <script src="https://cdn.jsdelivr.net/npm/xterm-addon-fit@0.8.0/lib/xterm-addon-fit.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #terminal-container {
            width: 100%;
            height: calc(100vh - 100px);
        }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>podterm</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="terminal-container"></div>

    <script>
        const term = new Terminal({
            cursorBlink: true,
            fontSize: 14,
            fontFamily: 'Menlo, Monaco, "Courier New", monospace',
            theme: {
                background: '#1e1e1e',
                foreground: '#d4d4d4',
            }
        });

        const fitAddon = new FitAddon.FitAddon();
        term.loadAddon(fitAddon);
        term.open(document.getElementById('terminal-container'));
        fitAddon.fit();

        const status = document.getElementById('status');
        const send = (msg) => {
            if (ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify(msg));
            }
        };

        // Page query (?namespace=..&pod_name=..&container_name=..) is passed through.
        const params = new URLSearchParams(window.location.search);
        if (!params.has('namespace')) params.set('namespace', 'local');
        if (!params.has('pod_name')) params.set('pod_name', 'host');

        const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
        const ws = new WebSocket(`${protocol}//${window.location.host}/ws?${params}`);

        ws.onopen = () => {
            status.textContent = `Connected to ${params.get('namespace')}/${params.get('pod_name')}`;
            status.className = 'status connected';
            send({ operation: 'resize', rows: term.rows, cols: term.cols });
        };

        ws.onclose = () => {
            status.textContent = 'Disconnected';
            status.className = 'status disconnected';
        };

        ws.onerror = (err) => {
            console.error('WebSocket error:', err);
        };

        ws.onmessage = (event) => {
            try {
                const msg = JSON.parse(event.data);
                if (msg.operation === 'output') {
                    term.write(msg.data);
                }
            } catch (e) {
                console.error('Failed to parse message:', e);
            }
        };

        term.onData((data) => send({ operation: 'input', data }));
        term.onResize(({ cols, rows }) => send({ operation: 'resize', rows, cols }));
        window.addEventListener('resize', () => fitAddon.fit());

        // Keep-alive
        setInterval(() => send({ operation: 'ping' }), 30000);
    </script>
</body>
</html>
"#;
