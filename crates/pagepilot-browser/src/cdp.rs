//! Condensed Chrome DevTools Protocol client.
//!
//! One WebSocket connection to the browser endpoint; commands are correlated
//! to responses through a pending-request map. Each pooled slot gets its own
//! isolated browser context (`Target.createBrowserContext`) with a single
//! attached page target.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use pagepilot_core::AutomationError;

/// Per-command timeout; a CDP call that outlives this is considered stuck.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// CDP transport and protocol errors.
#[derive(Debug, Error)]
pub enum CdpError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("javascript exception: {0}")]
    JavaScript(String),

    #[error("command timed out: {0}")]
    Timeout(String),

    #[error("session closed")]
    SessionClosed,
}

impl From<CdpError> for AutomationError {
    fn from(e: CdpError) -> Self {
        match e {
            CdpError::ConnectionFailed(msg) => AutomationError::Network(msg),
            CdpError::WebSocket(e) => AutomationError::Network(e.to_string()),
            CdpError::Http(e) => AutomationError::Network(e.to_string()),
            CdpError::Timeout(msg) => AutomationError::Network(msg),
            CdpError::Json(e) => AutomationError::Protocol(e.to_string()),
            CdpError::Protocol { code, message } => {
                AutomationError::Protocol(format!("{} ({})", message, code))
            }
            CdpError::JavaScript(msg) => AutomationError::Protocol(msg),
            CdpError::SessionClosed => AutomationError::Protocol("session closed".to_string()),
        }
    }
}

#[derive(Serialize)]
struct CdpRequest {
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct CdpMessage {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpRemoteError>,
    // Events carry `method`/`params`; this client polls instead of
    // subscribing, so they are dropped in the read loop.
    #[allow(dead_code)]
    method: Option<String>,
}

#[derive(Deserialize)]
struct CdpRemoteError {
    code: i64,
    message: String,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, CdpError>>>>>;

/// A command-correlated connection to a Chrome debugging endpoint.
pub struct CdpConnection {
    ws_tx: tokio::sync::Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to `endpoint` (e.g. `http://localhost:9222`) by discovering
    /// the browser's WebSocket debugger URL.
    pub async fn connect(endpoint: &str) -> Result<Self, CdpError> {
        let version: Value = reqwest::get(format!("{}/json/version", endpoint))
            .await?
            .json()
            .await?;
        let ws_url = version["webSocketDebuggerUrl"]
            .as_str()
            .ok_or_else(|| {
                CdpError::ConnectionFailed("missing webSocketDebuggerUrl".to_string())
            })?
            .to_string();

        let (stream, _) = tokio_tungstenite::connect_async(&ws_url).await?;
        let (ws_tx, mut ws_rx) = stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };

                let parsed: CdpMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!("Unparseable CDP message: {}", e);
                        continue;
                    }
                };

                if let Some(id) = parsed.id {
                    if let Some(tx) = reader_pending.lock().remove(&id) {
                        let outcome = match parsed.error {
                            Some(e) => Err(CdpError::Protocol {
                                code: e.code,
                                message: e.message,
                            }),
                            None => Ok(parsed.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                } else {
                    trace!("CDP event dropped");
                }
            }

            // Connection gone: fail everything still in flight.
            let mut pending = reader_pending.lock();
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(CdpError::SessionClosed));
            }
        });

        debug!("CDP connected to {}", ws_url);
        Ok(Self {
            ws_tx: tokio::sync::Mutex::new(ws_tx),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Send a command and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, CdpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };
        let payload = serde_json::to_string(&request)?;
        trace!("CDP send: {}", payload);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut ws = self.ws_tx.lock().await;
            ws.send(Message::Text(payload.into())).await?;
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CdpError::Timeout(method.to_string()))
            }
        }
    }

    /// Create an isolated browser context with one attached page target.
    pub async fn create_isolated_session(
        self: &Arc<Self>,
    ) -> Result<CdpSession, CdpError> {
        let context = self
            .call(
                "Target.createBrowserContext",
                Some(json!({ "disposeOnDetach": true })),
                None,
            )
            .await?;
        let browser_context_id = context["browserContextId"]
            .as_str()
            .ok_or_else(|| CdpError::ConnectionFailed("missing browserContextId".to_string()))?
            .to_string();

        let target = self
            .call(
                "Target.createTarget",
                Some(json!({
                    "url": "about:blank",
                    "browserContextId": browser_context_id,
                })),
                None,
            )
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .ok_or_else(|| CdpError::ConnectionFailed("missing targetId".to_string()))?
            .to_string();

        let attached = self
            .call(
                "Target.attachToTarget",
                Some(json!({ "targetId": target_id, "flatten": true })),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| CdpError::ConnectionFailed("missing sessionId".to_string()))?
            .to_string();

        let session = CdpSession {
            conn: self.clone(),
            session_id,
            target_id,
            browser_context_id,
        };
        session.call("Page.enable", None).await?;
        session.call("Runtime.enable", None).await?;

        debug!(
            "Created isolated CDP session {} (context {})",
            session.session_id, session.browser_context_id
        );
        Ok(session)
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// A session attached to one page target inside an isolated browser context.
pub struct CdpSession {
    conn: Arc<CdpConnection>,
    session_id: String,
    target_id: String,
    browser_context_id: String,
}

impl CdpSession {
    /// Send a command scoped to this session.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CdpError> {
        self.conn.call(method, params, Some(&self.session_id)).await
    }

    /// Target ID of the attached page.
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Evaluate a JavaScript expression, returning its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("unknown exception");
            return Err(CdpError::JavaScript(text.to_string()));
        }

        Ok(result["result"]["value"].clone())
    }

    /// Close the page target and dispose its browser context.
    pub async fn close(&self) {
        let _ = self
            .conn
            .call(
                "Target.closeTarget",
                Some(json!({ "targetId": self.target_id })),
                None,
            )
            .await;
        let _ = self
            .conn
            .call(
                "Target.disposeBrowserContext",
                Some(json!({ "browserContextId": self.browser_context_id })),
                None,
            )
            .await;
        debug!("Closed CDP session {}", self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = CdpRequest {
            id: 7,
            method: "Page.navigate".to_string(),
            params: Some(json!({ "url": "https://example.com" })),
            session_id: Some("abc".to_string()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["sessionId"], "abc");
        assert_eq!(value["params"]["url"], "https://example.com");
    }

    #[test]
    fn test_request_omits_empty_fields() {
        let request = CdpRequest {
            id: 1,
            method: "Browser.getVersion".to_string(),
            params: None,
            session_id: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("params").is_none());
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_error_message_parsing() {
        let raw = r#"{"id":3,"error":{"code":-32000,"message":"No target"}}"#;
        let parsed: CdpMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, Some(3));
        let err = parsed.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "No target");
    }

    #[test]
    fn test_error_conversion() {
        let err: AutomationError = CdpError::Timeout("Page.navigate".to_string()).into();
        assert!(matches!(err, AutomationError::Network(_)));

        let err: AutomationError = CdpError::JavaScript("boom".to_string()).into();
        assert!(matches!(err, AutomationError::Protocol(_)));
    }
}
