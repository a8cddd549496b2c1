//! Shared utilities and common types for the mentor push subsystem.
//!
//! This crate provides pure helpers used across all other crates:
//! - Notification and device fingerprints
//! - Human-readable device labels derived from user agents
//! - Common validation logic
//! - Session token verification for the external auth service

pub mod device_label;
pub mod fingerprint;
pub mod session_token;
pub mod validation;
