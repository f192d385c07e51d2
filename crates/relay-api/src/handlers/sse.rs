//! SSE front transport
//!
//! `GET /sse` opens a stream and creates one [`FrontSession`] for it. The
//! first event is `endpoint`, naming the URL the caller posts its frames
//! to. Replies come back on the stream as `message` events. Each stream is
//! its own session; nothing is shared between callers except the router.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parking_lot::RwLock;
use relay_core::JsonRpcMessage;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::front::{FrontMode, FrontSession};
use crate::state::AppState;

/// Path callers post frames to
pub const MESSAGE_PATH: &str = "/message";

struct Registered {
    session: Arc<FrontSession>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Live stream sessions, keyed by session id
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Registered>>,
    /// Flips to `true` once; every open stream ends when it does
    closing: watch::Sender<bool>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            sessions: RwLock::new(HashMap::new()),
            closing,
        }
    }

    fn register(&self, session: Arc<FrontSession>, outbound: mpsc::UnboundedSender<String>) {
        self.sessions
            .write()
            .insert(session.id().to_string(), Registered { session, outbound });
    }

    fn get(&self, id: &str) -> Option<(Arc<FrontSession>, mpsc::UnboundedSender<String>)> {
        self.sessions
            .read()
            .get(id)
            .map(|r| (r.session.clone(), r.outbound.clone()))
    }

    fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every stream session and end their event streams, including
    /// ones with replies still in flight.
    pub fn close_all(&self) {
        self.closing.send_replace(true);
        let drained: Vec<Registered> = self.sessions.write().drain().map(|(_, r)| r).collect();
        if !drained.is_empty() {
            info!(sessions = drained.len(), "Closing stream sessions");
        }
        for registered in drained {
            registered.session.on_close();
        }
    }
}

/// Unregisters and closes the session when its event stream is dropped
struct StreamGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<FrontSession>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.registry.remove(self.session.id()) {
            debug!(session = %self.session.id(), "Stream dropped by caller");
        }
        self.session.on_close();
    }
}

/// GET /sse
pub async fn open_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().to_string();
    let session = Arc::new(FrontSession::new(
        id.clone(),
        FrontMode::Stream,
        state.router.clone(),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.sessions.register(session.clone(), tx);
    info!(session = %id, "Stream session opened");

    let mut closing = state.sessions.closing.subscribe();
    let guard = StreamGuard {
        registry: state.sessions.clone(),
        session,
    };
    let endpoint = format!("{}?sessionId={}", MESSAGE_PATH, id);

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
        loop {
            let frame = tokio::select! {
                frame = rx.recv() => frame,
                _ = closing.wait_for(|closing| *closing) => None,
            };
            let Some(frame) = frame else { break };
            yield Ok(Event::default().event("message").data(frame));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// POST /message?sessionId=<id>
///
/// Accepts the frame immediately; the reply arrives on the session's
/// stream.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Result<(StatusCode, &'static str), ApiError> {
    let (session, outbound) = state
        .sessions
        .get(&query.session_id)
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", query.session_id)))?;

    let request = match JsonRpcMessage::parse(&body) {
        Ok(JsonRpcMessage::Request(request)) => request,
        Ok(JsonRpcMessage::Response(_)) => return Ok((StatusCode::ACCEPTED, "Accepted")),
        Err(e) => {
            session.on_error(&e);
            return Err(ApiError::BadRequest(e.to_string()));
        }
    };

    tokio::spawn(async move {
        let Some(response) = session.handle(request).await else {
            return;
        };
        match serde_json::to_string(&response) {
            Ok(frame) => {
                if outbound.send(frame).is_err() {
                    debug!(session = %session.id(), "Stream closed before reply");
                }
            }
            Err(e) => warn!(session = %session.id(), error = %e, "Failed to encode reply"),
        }
    });

    Ok((StatusCode::ACCEPTED, "Accepted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_gateway::CapabilityRouter;

    fn session(id: &str) -> Arc<FrontSession> {
        Arc::new(FrontSession::new(
            id,
            FrontMode::Stream,
            Arc::new(CapabilityRouter::new()),
        ))
    }

    #[test]
    fn test_registry_isolates_sessions() {
        let registry = SessionRegistry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        registry.register(session("a"), tx_a);
        registry.register(session("b"), tx_b);

        assert_eq!(registry.len(), 2);
        assert!(registry.remove("a"));
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));
    }

    #[test]
    fn test_guard_drop_closes_session() {
        let registry = Arc::new(SessionRegistry::new());
        let s = session("a");
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(s.clone(), tx);

        drop(StreamGuard {
            registry: registry.clone(),
            session: s.clone(),
        });

        assert!(registry.is_empty());
        assert!(s.is_closed());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let registry = SessionRegistry::new();
        let s = session("a");
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        registry.register(s.clone(), tx);

        registry.close_all();

        assert!(registry.is_empty());
        assert!(s.is_closed());
        assert!(rx.recv().await.is_none());
        assert!(*registry.closing.subscribe().borrow());
    }
}
