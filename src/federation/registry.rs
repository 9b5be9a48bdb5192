//! Connection registry: one record per configured backend and the
//! connect/disconnect state machine.
//!
//! The name table is a plain `RwLock` that is never held across an await, so
//! inserts and removals are atomic with respect to other tasks. Each record
//! carries its own async session lock; connect, disconnect and calls on one
//! backend serialize on it while different backends proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OwnedMappedMutexGuard, OwnedMutexGuard};

use super::session::{Session, SessionConnector};
use crate::config::BackendConfig;
use crate::errors::GatewayError;
use crate::protocol::ServerInfo;

// ─── Status ──────────────────────────────────────────────────────────────────

/// Connection state of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Externally visible snapshot of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub capabilities: Option<Value>,
}

// ─── Records ─────────────────────────────────────────────────────────────────

struct RecordState {
    config: BackendConfig,
    status: ConnectionStatus,
    last_error: Option<String>,
    capabilities: Option<Value>,
    server_info: Option<ServerInfo>,
    connected_at: Option<DateTime<Utc>>,
}

type SessionSlot = Arc<tokio::sync::Mutex<Option<Box<dyn Session>>>>;

/// Exclusive access to a connected backend's session for the duration of
/// one operation.
pub type SessionLease = OwnedMappedMutexGuard<Option<Box<dyn Session>>, dyn Session>;

struct ConnectionRecord {
    state: Mutex<RecordState>,
    session: SessionSlot,
}

impl ConnectionRecord {
    fn new(config: BackendConfig) -> Self {
        Self {
            state: Mutex::new(RecordState {
                config,
                status: ConnectionStatus::Disconnected,
                last_error: None,
                capabilities: None,
                server_info: None,
                connected_at: None,
            }),
            session: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_connect(&self, config: BackendConfig) {
        let mut state = self.state();
        state.config = config;
        state.status = ConnectionStatus::Connecting;
        state.last_error = None;
    }

    fn mark_connected(&self, capabilities: Value, server_info: Option<ServerInfo>) {
        let mut state = self.state();
        state.status = ConnectionStatus::Connected;
        state.capabilities = Some(capabilities);
        state.server_info = server_info;
        state.connected_at = Some(Utc::now());
    }

    fn mark_error(&self, message: String) {
        let mut state = self.state();
        state.status = ConnectionStatus::Error;
        state.last_error = Some(message);
        state.connected_at = None;
    }

    fn mark_disconnected(&self) {
        let mut state = self.state();
        state.status = ConnectionStatus::Disconnected;
        state.connected_at = None;
    }

    fn snapshot(&self) -> BackendStatus {
        let state = self.state();
        BackendStatus {
            status: state.status,
            connected_at: state.connected_at,
            last_error: state.last_error.clone(),
            capabilities: state.capabilities.clone(),
        }
    }
}

#[derive(Default)]
struct Table {
    by_name: HashMap<String, Arc<ConnectionRecord>>,
    order: Vec<String>,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Owns every backend record and the sessions inside them.
pub struct ConnectionRegistry {
    connector: Arc<dyn SessionConnector>,
    table: RwLock<Table>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            table: RwLock::new(Table::default()),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<ConnectionRecord>> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(name)
            .cloned()
    }

    fn get_or_insert(&self, config: &BackendConfig) -> Arc<ConnectionRecord> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = table.by_name.get(&config.name) {
            return Arc::clone(record);
        }
        let record = Arc::new(ConnectionRecord::new(config.clone()));
        table.by_name.insert(config.name.clone(), Arc::clone(&record));
        table.order.push(config.name.clone());
        record
    }

    /// Connect (or reconnect) the backend described by `config`.
    ///
    /// Never fails: the outcome is the return value plus the record's status
    /// and last error. A live session for the same name is closed first.
    pub async fn connect(&self, config: BackendConfig) -> bool {
        let name = config.name.clone();
        let record = self.get_or_insert(&config);
        let mut slot = Arc::clone(&record.session).lock_owned().await;

        if let Some(old) = slot.take() {
            tracing::info!(server = %name, "closing existing session before reconnect");
            close_session(&name, old).await;
            record.mark_disconnected();
        }

        record.begin_connect(config.clone());
        tracing::info!(server = %name, transport = %config.transport, "connecting to backend");

        let result = match config.validate() {
            Err(e) => Err(e),
            Ok(()) => {
                let timeout = Duration::from_secs(config.timeout);
                match tokio::time::timeout(timeout, self.connector.connect(&config)).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout {
                        operation: "connect".to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            }
        };

        match result {
            Ok(session) => {
                let capabilities = session.capabilities();
                let server_info = session.server_info();
                *slot = Some(session);
                record.mark_connected(capabilities, server_info);
                tracing::info!(server = %name, "connected to backend");
                true
            }
            Err(e) => {
                let message = format!("Failed to connect to {name}: {e}");
                tracing::error!(server = %name, error = %e, "{message}");
                record.mark_error(message);
                false
            }
        }
    }

    /// Disconnect a backend. Unknown or already-disconnected names are a
    /// no-op.
    pub async fn disconnect(&self, name: &str) {
        let Some(record) = self.get(name) else {
            return;
        };
        let mut slot = Arc::clone(&record.session).lock_owned().await;
        if let Some(session) = slot.take() {
            close_session(name, session).await;
            record.mark_disconnected();
            tracing::info!(server = name, "disconnected from backend");
        } else if record.snapshot().status != ConnectionStatus::Disconnected {
            record.mark_disconnected();
        }
    }

    /// Reconnect using the stored config.
    pub async fn reconnect(&self, name: &str) -> Result<bool, GatewayError> {
        let config = self
            .config(name)
            .ok_or_else(|| GatewayError::not_found("backend", name))?;
        Ok(self.connect(config).await)
    }

    /// Disconnect and forget a backend.
    pub async fn remove(&self, name: &str) {
        self.disconnect(name).await;
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.by_name.remove(name).is_some() {
            table.order.retain(|n| n != name);
            tracing::info!(server = name, "removed backend");
        }
    }

    /// Exclusive access to a connected backend's session.
    pub async fn lease(&self, name: &str) -> Result<SessionLease, GatewayError> {
        let record = self
            .get(name)
            .ok_or_else(|| GatewayError::not_found("backend", name))?;
        let slot = Arc::clone(&record.session).lock_owned().await;
        OwnedMutexGuard::try_map(slot, |s| s.as_deref_mut()).map_err(|_| {
            GatewayError::InvalidState {
                name: name.to_string(),
                status: record.snapshot().status,
            }
        })
    }

    /// Backend names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    /// Names of backends currently connected, in registration order.
    pub fn connected_names(&self) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|n| self.status(n) == Some(ConnectionStatus::Connected))
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<ConnectionStatus> {
        self.get(name).map(|r| r.snapshot().status)
    }

    pub fn config(&self, name: &str) -> Option<BackendConfig> {
        self.get(name).map(|r| r.state().config.clone())
    }

    pub fn server_info(&self, name: &str) -> Option<ServerInfo> {
        self.get(name).and_then(|r| r.state().server_info.clone())
    }

    /// Status snapshot of every record.
    pub fn statuses(&self) -> BTreeMap<String, BackendStatus> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table
            .by_name
            .iter()
            .map(|(name, record)| (name.clone(), record.snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Close a session, logging and swallowing failures.
async fn close_session(name: &str, session: Box<dyn Session>) {
    if let Err(e) = session.close().await {
        tracing::warn!(server = name, error = %e, "error closing session");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
