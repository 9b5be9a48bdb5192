//! Request/response correlation for full-duplex channels.
//!
//! Writers register an id before sending; the connection's single reader task
//! feeds every inbound frame through [`PendingRequests::handle_frame`], which
//! routes responses to their waiter by id. Once the inbound side is gone,
//! [`PendingRequests::fail_all`] wakes every waiter with a connection error
//! and rejects new registrations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::GatewayError;
use crate::protocol::{classify_incoming, reply_to_server_request, Incoming, JsonRpcResponse};

type Waiter = oneshot::Sender<Result<JsonRpcResponse, GatewayError>>;

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, Waiter>,
    /// Set once the channel is gone; the reason is reported to late callers.
    closed: Option<String>,
}

/// In-flight requests for one connection.
pub struct PendingRequests {
    server: String,
    state: Mutex<PendingState>,
}

impl PendingRequests {
    pub fn new(server: &str) -> Arc<Self> {
        Arc::new(Self {
            server: server.to_string(),
            state: Mutex::new(PendingState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for `id`. Must be called before the request is written
    /// so a fast reply cannot race past its waiter.
    pub fn register(self: &Arc<Self>, id: u64) -> Result<PendingSlot, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(GatewayError::connection(&self.server, reason.clone()));
        }
        state.waiters.insert(id, tx);
        Ok(PendingSlot {
            id,
            rx: Some(rx),
            pending: Arc::clone(self),
        })
    }

    /// Number of requests still waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.lock().waiters.len()
    }

    fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            tracing::warn!(
                server = %self.server,
                error = ?response.error,
                "received JSON-RPC error without id"
            );
            return;
        };
        let waiter = self.lock().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => {
                tracing::debug!(server = %self.server, id, "dropping response with no waiter");
            }
        }
    }

    /// Classify one inbound frame and act on it.
    ///
    /// Returns the reply to write back when the frame is a server-initiated
    /// request.
    pub fn handle_frame(&self, raw: &str) -> Option<Value> {
        match classify_incoming(raw) {
            Some(Incoming::Response(response)) => {
                self.resolve(response);
                None
            }
            Some(Incoming::Request { id, method }) => {
                tracing::debug!(server = %self.server, method = %method, "answering server request");
                Some(reply_to_server_request(&id, &method))
            }
            Some(Incoming::Notification { method }) => {
                tracing::debug!(server = %self.server, method = %method, "server notification");
                None
            }
            None => {
                if !raw.trim().is_empty() {
                    tracing::debug!(server = %self.server, line = raw.trim(), "skipping non-JSON-RPC output");
                }
                None
            }
        }
    }

    /// Fail every waiter and refuse further registrations.
    pub fn fail_all(&self, reason: &str) {
        let waiters: Vec<Waiter> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.waiters.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(GatewayError::connection(&self.server, reason)));
        }
    }
}

/// A registered request awaiting its response.
///
/// Dropping the slot (e.g. when the caller's timeout fires) removes the id
/// from the pending map.
pub struct PendingSlot {
    id: u64,
    rx: Option<oneshot::Receiver<Result<JsonRpcResponse, GatewayError>>>,
    pending: Arc<PendingRequests>,
}

impl PendingSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(mut self) -> Result<JsonRpcResponse, GatewayError> {
        let Some(rx) = self.rx.take() else {
            return Err(GatewayError::connection(
                &self.pending.server,
                "response already consumed",
            ));
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::connection(
                &self.pending.server,
                "connection dropped before a response arrived",
            )),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending.lock().waiters.remove(&self.id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
