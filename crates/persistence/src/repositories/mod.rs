//! Repository implementations for database operations.

pub mod profile_store;
pub mod push_device;
pub mod push_profile;

pub use profile_store::PgProfileStore;
pub use push_device::PushDeviceRepository;
pub use push_profile::PushProfileRepository;
