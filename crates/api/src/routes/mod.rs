//! HTTP route handlers.

pub mod deliveries;
pub mod devices;
pub mod health;
pub mod notifications;
pub mod session;
