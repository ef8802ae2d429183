//! Device model and hardware backends
//!
//! The plugin core only talks to the traits in [`traits`]; [`hlml::HlmlDevices`]
//! implements them on top of the vendor library and [`mock::MockDevices`] in memory.

pub mod hlml;
pub mod mock;
pub mod traits;
pub mod types;

pub use mock::MockDevices;
pub use traits::AllocationPathResolver;
pub use traits::DeviceAllocation;
pub use traits::DeviceBackend;
pub use traits::DeviceError;
pub use traits::DeviceInventory;
pub use traits::DeviceResult;
pub use traits::HealthEvent;
pub use traits::HealthEventSource;
pub use traits::HealthSubscription;
pub use traits::Subscription;
pub use types::DeviceRecord;
pub use types::DeviceSnapshot;
pub use types::DeviceType;
pub use types::Health;
