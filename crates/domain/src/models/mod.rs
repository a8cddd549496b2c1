//! Domain models for the mentor push subsystem.

pub mod dedup;
pub mod device;
pub mod notification;

pub use dedup::{DedupDecision, DedupEntry};
pub use device::{
    DeviceEnvironment, DeviceFields, DevicePatch, DeviceRecord, DeviceSummary, PushSummary,
    RegisterDeviceRequest, RenameDeviceRequest, UpdateDeviceRequest,
};
pub use notification::{DeliverySource, IncomingNotification, NotificationRecord};
