//! REST-to-tool adapter.
//!
//! Each configured REST API becomes one [`ApiWrapper`] exposing a tool per
//! endpoint under `api:{wrapper}:{endpoint}`; [`ApiWrapperManager`] owns them
//! all and routes calls by name.

pub mod manager;
pub mod schema;
pub mod wrapper;

pub use manager::ApiWrapperManager;
pub use schema::{build_input_schema, build_tool};
pub use wrapper::{ApiWrapper, WrapperStatus};
