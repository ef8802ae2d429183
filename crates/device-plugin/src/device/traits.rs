//! Seams between the plugin core and the hardware backend

use core::error::Error;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;

use super::types::DeviceRecord;

pub type DeviceResult<T> = Result<T, Report<DeviceError>>;

/// Errors raised by device backends.
#[derive(Debug, Display)]
pub enum DeviceError {
    #[display("Failed to initialize device backend")]
    Init,
    #[display("Failed to enumerate devices")]
    Enumerate,
    #[display("Failed to subscribe to health events")]
    Subscribe,
    #[display("Failed to wait for health events")]
    Wait,
    #[display("Failed to query device {id}")]
    Query { id: String },
}

impl Error for DeviceError {}

/// Enumerates the accelerators present on the node.
pub trait DeviceInventory: Send + Sync {
    /// Full re-scan; every call returns a fresh snapshot.
    fn enumerate(&self) -> DeviceResult<Vec<DeviceRecord>>;

    fn device_count(&self) -> DeviceResult<usize> {
        Ok(self.enumerate()?.len())
    }
}

/// A health notification from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// A critical error on one device.
    Device(String),
    /// An error that cannot be attributed to a single device.
    Wildcard,
}

/// Live registration for health events; unsubscribes on drop.
pub trait HealthSubscription: Send {
    /// Blocks for at most `timeout`. `Ok(None)` means the window elapsed quietly.
    fn wait_next(&mut self, timeout: Duration) -> DeviceResult<Option<HealthEvent>>;
}

pub struct Subscription {
    pub handle: Box<dyn HealthSubscription>,
    /// Devices that could not be registered, with the reason.
    pub rejected: Vec<(String, String)>,
}

pub trait HealthEventSource: Send + Sync {
    fn subscribe(&self, device_ids: &[String]) -> DeviceResult<Subscription>;
}

/// Host side artifacts needed to hand a device to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAllocation {
    /// Device special files, primary device node first.
    pub host_paths: Vec<String>,
    /// Driver index (minor number) of the device.
    pub device_index: Option<u32>,
    pub module_index: Option<u32>,
}

pub trait AllocationPathResolver: Send + Sync {
    fn resolve(&self, device_id: &str) -> DeviceResult<DeviceAllocation>;
}

/// A complete backend, as wired into the plugin server.
pub trait DeviceBackend: DeviceInventory + HealthEventSource + AllocationPathResolver {}

impl<T> DeviceBackend for T where T: DeviceInventory + HealthEventSource + AllocationPathResolver {}
