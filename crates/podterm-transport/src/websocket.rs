//! WebSocket transport for web terminals.

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header::ORIGIN},
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use futures::{SinkExt, StreamExt, future};
use podterm_core::{ExecTarget, SessionId, TransportError, UpgradeError};
use podterm_session::{ManagerError, SessionInfo, SessionManager};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{bridge::run_bridge, terminal::Frame};

/// WebSocket surface configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Route the terminal is served on.
    pub path: String,
    /// Upper bound on completing the upgrade, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Accepted `Origin` header values. Empty allows every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            handshake_timeout_ms: 2_000,
            allowed_origins: Vec::new(),
        }
    }
}

impl WsConfig {
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Check the request's `Origin` against the allow-list.
    ///
    /// # Errors
    /// Returns [`UpgradeError::OriginRejected`] for an origin not on a
    /// non-empty allow-list.
    pub fn check_origin(&self, headers: &HeaderMap) -> Result<(), UpgradeError> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }
        let origin = headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if self.allowed_origins.iter().any(|o| o == origin) {
            Ok(())
        } else {
            Err(UpgradeError::OriginRejected(origin.to_string()))
        }
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Session manager carrying the injected executor.
    pub manager: Arc<SessionManager>,
    pub config: Arc<WsConfig>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, config: WsConfig) -> Self {
        Self {
            manager,
            config: Arc::new(config),
        }
    }
}

/// Query parameters identifying the process to attach to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecQuery {
    pub namespace: Option<String>,
    pub pod_name: Option<String>,
    pub container_name: Option<String>,
    /// Shell-quoted command line. Defaults to `/bin/bash`.
    pub command: Option<String>,
    pub tty: Option<bool>,
}

impl ExecQuery {
    /// Validate into an [`ExecTarget`].
    ///
    /// # Errors
    /// Returns error if a required parameter is missing or the command does
    /// not parse.
    pub fn into_target(self) -> Result<ExecTarget, UpgradeError> {
        let namespace = non_empty(self.namespace).ok_or(UpgradeError::MissingParam("namespace"))?;
        let pod = non_empty(self.pod_name).ok_or(UpgradeError::MissingParam("pod_name"))?;
        let mut target =
            ExecTarget::new(namespace, pod, self.container_name.unwrap_or_default());

        if let Some(command) = non_empty(self.command) {
            let argv = shlex::split(&command)
                .filter(|argv| !argv.is_empty())
                .ok_or_else(|| UpgradeError::InvalidQuery(format!("unparsable command: {command}")))?;
            target = target.with_command(argv);
        }
        if let Some(tty) = self.tty {
            target = target.with_tty(tty);
        }
        Ok(target)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    State(state): State<WsState>,
    query: Result<Query<ExecQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let target = match query
        .map_err(|e| UpgradeError::InvalidQuery(e.body_text()))
        .and_then(|Query(q)| q.into_target())
    {
        Ok(target) => target,
        Err(e) => return reject(e),
    };
    if let Err(e) = state.config.check_origin(&headers) {
        return reject(e);
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => return reject(UpgradeError::NotWebSocket(e.body_text())),
    };

    tracing::info!(
        namespace = %target.namespace,
        pod = %target.pod,
        container = %target.container,
        "exec pod"
    );

    let requested = Instant::now();
    let timeout = state.config.handshake_timeout();
    ws.on_failed_upgrade(|e: axum::Error| {
        tracing::warn!(error = %UpgradeError::Failed(e.to_string()), "get pty failed");
    })
    .on_upgrade(move |socket| async move {
        if let Err(e) = check_handshake(requested.elapsed(), timeout) {
            tracing::warn!(error = %e, "get pty failed");
            return;
        }
        handle_socket(socket, state, target).await;
    })
}

/// An upgrade that took longer than `timeout` is abandoned.
fn check_handshake(elapsed: Duration, timeout: Duration) -> Result<(), UpgradeError> {
    if elapsed > timeout {
        return Err(UpgradeError::Timeout(timeout));
    }
    Ok(())
}

fn reject(err: UpgradeError) -> Response {
    tracing::warn!(error = %err, "rejecting terminal upgrade");
    err.into_response()
}

async fn handle_socket(socket: WebSocket, state: WsState, target: ExecTarget) {
    let (sender, receiver) = socket.split();

    let frames = receiver.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(data)) => Some(Ok(Frame::Binary(data))),
            Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
            // Pings are answered by the websocket layer.
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
        })
    });
    let sink = sender
        .sink_map_err(|e| TransportError::Send(e.to_string()))
        .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

    if let Err(e) = run_bridge(&state.manager, target, frames, sink).await {
        tracing::warn!(error = %e, "session not started");
    }
}

/// List live sessions.
pub async fn list_sessions(State(state): State<WsState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.active().await)
}

/// Terminate a live session from outside.
pub async fn terminate_session(
    State(state): State<WsState>,
    Path(id): Path<SessionId>,
) -> StatusCode {
    match state.manager.terminate(id).await {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::CONFLICT,
        Err(ManagerError::NotFound(_)) => StatusCode::NOT_FOUND,
        Err(ManagerError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Create WebSocket router.
///
/// Serves the terminal on `config.path`, plus `{path}/sessions` to list live
/// sessions and `{path}/sessions/{id}` to terminate one.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(state));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> Router {
    let path = state.config.path.trim_end_matches('/').to_string();
    let root = if path.is_empty() { "/" } else { path.as_str() };
    Router::new()
        .route(root, get(ws_handler))
        .route(&format!("{path}/sessions"), get(list_sessions))
        .route(&format!("{path}/sessions/{{id}}"), delete(terminate_session))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_query_into_target() {
        let query = ExecQuery {
            namespace: Some("default".into()),
            pod_name: Some("nginx-0".into()),
            container_name: Some("nginx".into()),
            command: Some("sh -c 'echo hi'".into()),
            tty: Some(false),
        };
        let target = query.into_target().unwrap();
        assert_eq!(target.namespace, "default");
        assert_eq!(target.pod, "nginx-0");
        assert_eq!(target.container, "nginx");
        assert_eq!(target.command, vec!["sh", "-c", "echo hi"]);
        assert!(!target.tty);
    }

    #[test]
    fn test_query_defaults_to_bash_with_tty() {
        let query = ExecQuery {
            namespace: Some("default".into()),
            pod_name: Some("nginx-0".into()),
            ..ExecQuery::default()
        };
        let target = query.into_target().unwrap();
        assert_eq!(target.command, vec!["/bin/bash"]);
        assert!(target.tty);
        assert!(target.container.is_empty());
    }

    #[test]
    fn test_query_requires_namespace_and_pod() {
        let missing_pod = ExecQuery {
            namespace: Some("default".into()),
            pod_name: Some("  ".into()),
            ..ExecQuery::default()
        };
        assert!(matches!(
            missing_pod.into_target(),
            Err(UpgradeError::MissingParam("pod_name"))
        ));
        assert!(matches!(
            ExecQuery::default().into_target(),
            Err(UpgradeError::MissingParam("namespace"))
        ));
    }

    #[test]
    fn test_origin_allow_list() {
        let open = WsConfig::default();
        assert!(open.check_origin(&HeaderMap::new()).is_ok());

        let strict = WsConfig {
            allowed_origins: vec!["https://console.example.com".into()],
            ..WsConfig::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, "https://console.example.com".parse().unwrap());
        assert!(strict.check_origin(&headers).is_ok());

        headers.insert(ORIGIN, "https://evil.example.com".parse().unwrap());
        assert!(matches!(
            strict.check_origin(&headers),
            Err(UpgradeError::OriginRejected(o)) if o == "https://evil.example.com"
        ));
    }

    #[test]
    fn test_handshake_timeout_boundary() {
        let timeout = WsConfig::default().handshake_timeout();
        assert!(check_handshake(Duration::ZERO, timeout).is_ok());
        assert!(check_handshake(timeout, timeout).is_ok());
        assert!(matches!(
            check_handshake(timeout + Duration::from_millis(1), timeout),
            Err(UpgradeError::Timeout(t)) if t == timeout
        ));
    }

    mod routes {
        use async_trait::async_trait;
        use podterm_core::{ExecStreams, ExecutionError, Executor};
        use podterm_session::SessionConfig;

        use super::*;

        struct Idle;

        #[async_trait]
        impl Executor for Idle {
            async fn stream(
                &self,
                _target: &ExecTarget,
                streams: ExecStreams,
            ) -> Result<(), ExecutionError> {
                streams.cancel.cancelled().await;
                Ok(())
            }
        }

        fn app() -> (Router, Arc<SessionManager>) {
            let manager = Arc::new(SessionManager::new(Arc::new(Idle), SessionConfig::default()));
            let router = create_ws_router(WsState::new(Arc::clone(&manager), WsConfig::default()));
            (router, manager)
        }

        #[tokio::test]
        async fn test_plain_http_request_is_rejected_without_session() {
            let (app, manager) = app();
            let response = app
                .oneshot(
                    Request::get("/ws?namespace=default&pod_name=web-0")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(manager.is_empty().await);
        }

        #[tokio::test]
        async fn test_missing_pod_is_rejected() {
            let (app, _manager) = app();
            let response = app
                .oneshot(Request::get("/ws?namespace=default").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_sessions_listing_and_terminate() {
            let (app, manager) = app();
            let handle = manager
                .register(ExecTarget::new("default", "web-0", ""))
                .await
                .unwrap();

            let response = app
                .clone()
                .oneshot(Request::get("/ws/sessions").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let uri = format!("/ws/sessions/{}", handle.id);
            let response = app
                .clone()
                .oneshot(Request::delete(&uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
            assert!(handle.lifecycle.is_terminated());

            let response = app
                .oneshot(Request::delete(&uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CONFLICT);
        }
    }
}
