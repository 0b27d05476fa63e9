//! HTTP route handlers.

pub mod health;
pub mod locks;
pub mod metrics;
pub mod sagas;
