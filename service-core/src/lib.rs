//! service-core: shared plumbing for the pickup platform HTTP services.
//!
//! Error taxonomy, base configuration, telemetry bootstrap and the
//! request-level middleware every service mounts in front of its router.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use async_trait;
pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
pub use validator;
