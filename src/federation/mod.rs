//! Federation layer: one gateway over many backends.
//!
//! The registry owns backend records and their sessions, the router maps
//! namespaced names onto them, and [`Gateway`] ties both to the API wrappers.

pub mod gateway;
pub mod namespace;
pub mod registry;
pub mod router;
pub mod session;

pub use gateway::{Gateway, GatewayMetrics};
pub use registry::{BackendStatus, ConnectionRegistry, ConnectionStatus};
pub use router::NamespaceRouter;
pub use session::{McpSession, Session, SessionConnector, TransportConnector};
