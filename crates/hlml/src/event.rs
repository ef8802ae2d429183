use std::ffi::c_uint;
use std::time::Duration;

use crate::error::check;
use crate::error::HlmlError;
use crate::error::Result;
use crate::error::ReturnCode;
use crate::ffi;
use crate::Device;
use crate::Hlml;

pub const EVENT_ECC_ERR: u64 = 1 << 0;
pub const EVENT_CRITICAL_ERR: u64 = 1 << 1;

/// One event delivered by [`EventSet::wait`].
#[derive(Debug)]
pub struct Event {
    /// Device the event originated from, when the library attributed it to one.
    pub device: Option<Device>,
    pub event_type: u64,
}

/// Set of devices registered for event delivery; freed on drop.
pub struct EventSet {
    hlml: Hlml,
    raw: ffi::RawEventSet,
}

unsafe impl Send for EventSet {}

impl EventSet {
    pub(crate) fn create(hlml: Hlml) -> Result<Self> {
        let mut raw: ffi::RawEventSet = std::ptr::null_mut();
        check("hlml_event_set_create", unsafe {
            (hlml.symbols().event_set_create)(&mut raw)
        })?;
        Ok(Self { hlml, raw })
    }

    pub fn register(&self, device: &Device, event_types: u64) -> Result<()> {
        check("hlml_device_register_events", unsafe {
            (self.hlml.symbols().device_register_events)(device.raw(), event_types, self.raw)
        })
    }

    /// Blocks for up to `timeout`; `Ok(None)` means nothing arrived in time.
    pub fn wait(&self, timeout: Duration) -> Result<Option<Event>> {
        let mut data = ffi::EventData::default();
        let timeout_ms = c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX);

        let result = check("hlml_event_set_wait", unsafe {
            (self.hlml.symbols().event_set_wait)(self.raw, &mut data, timeout_ms)
        });
        match result {
            Ok(()) => Ok(Some(Event {
                device: (!data.device.is_null()).then(|| Device::new(self.hlml.clone(), data.device)),
                event_type: data.event_type,
            })),
            Err(HlmlError::Call {
                code: ReturnCode::Timeout,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for EventSet {
    fn drop(&mut self) {
        if let Err(e) = check("hlml_event_set_free", unsafe {
            (self.hlml.symbols().event_set_free)(self.raw)
        }) {
            tracing::warn!("Failed to free HLML event set: {e}");
        }
    }
}
