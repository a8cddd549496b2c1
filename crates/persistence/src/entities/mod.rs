//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod push_device;
pub mod push_profile;

pub use push_device::PushDeviceEntity;
pub use push_profile::PushProfileEntity;
