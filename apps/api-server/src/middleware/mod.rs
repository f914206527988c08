//! Middleware modules.

pub mod error;
pub mod throttle;

pub use throttle::ThrottleMiddleware;
