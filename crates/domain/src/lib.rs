//! Domain layer for the mentor push subsystem.
//!
//! This crate contains:
//! - Record models (DeviceRecord, NotificationRecord, DedupEntry)
//! - The delivery deduplication engine and the local notification history
//! - The device registry client, duplicate-device consolidator and token
//!   lifecycle coordinator
//! - The storage, provider and clock abstractions they run against

pub mod models;
pub mod services;
