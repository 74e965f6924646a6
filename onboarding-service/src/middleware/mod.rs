pub mod auth;
pub mod device;
pub mod metrics;
pub mod session;

pub use auth::{authorize, AccessGuard, AccessPolicy, AuthContext, AuthUser};
pub use device::{normalize_device_id, require_bound_device, DeviceId, DEVICE_ID_HEADER};
pub use metrics::metrics_middleware;
pub use session::require_live_session;
