//! HTTP API handlers for rollcall-ar

pub mod attendance;
pub mod devices;
pub mod hardware;
pub mod health;
pub mod reconcile;

pub use attendance::attendance_routes;
pub use devices::device_routes;
pub use hardware::hardware_routes;
pub use health::health_routes;
pub use reconcile::reconcile_routes;
