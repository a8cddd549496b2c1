//! Domain services for the mentor push subsystem.
//!
//! Services contain the delivery, history and device registry logic that
//! operates on domain models.

pub mod clock;
pub mod consolidation;
pub mod dedup;
pub mod delivery;
pub mod history;
pub mod lifecycle;
pub mod local_store;
pub mod profile_store;
pub mod push_provider;
pub mod registry;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use consolidation::{ConsolidationReport, DeviceConsolidator};
pub use dedup::{DeliveryDeduplicator, DEFAULT_DEDUP_WINDOW_SECS};
pub use delivery::{DeliveryOutcome, DeliveryPipeline};
pub use history::{HistoryChange, NotificationHistory, DEFAULT_HISTORY_CAPACITY};
pub use lifecycle::{
    LifecycleError, RefreshOutcome, SyncReport, TokenLifecycleCoordinator,
    DEFAULT_OPERATION_TIMEOUT_SECS,
};
pub use local_store::{LocalStore, LocalStoreError, MemoryLocalStore, DEDUP_KEY, HISTORY_KEY};
pub use profile_store::{DeviceOrder, MemoryProfileStore, ProfileStore, StoreError};
pub use push_provider::{
    MockPushProvider, PermissionState, ProviderError, PushProvider, TokenOptions,
};
pub use registry::{DeviceRegistryClient, RegistryError};
pub use session::{PushSession, RegistrationState, SessionRegistry, SessionSnapshot};
