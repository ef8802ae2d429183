//! Habana Labs Management Library (HLML) bindings
//!
//! The shared library is opened with `libloading` when [`Hlml::init`] is called and
//! `hlml_shutdown` runs when the last handle is dropped, so the library lifecycle is
//! tied to an owned value instead of process-global state.

mod device;
mod error;
mod event;
mod ffi;

use std::ffi::c_uint;
use std::ffi::OsStr;
use std::fmt;
use std::sync::Arc;

use libloading::Library;

pub use device::Device;
pub use device::PciInfo;
pub use error::HlmlError;
pub use error::Result;
pub use error::ReturnCode;
pub use event::Event;
pub use event::EventSet;
pub use event::EVENT_CRITICAL_ERR;
pub use event::EVENT_ECC_ERR;

/// Default library name resolved through the dynamic linker search path.
pub const DEFAULT_LIBRARY: &str = "libhlml.so";

struct Inner {
    symbols: ffi::Symbols,
    // Declared after `symbols` so the function table never outlives the mapping.
    _library: Library,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let result = error::check("hlml_shutdown", unsafe { (self.symbols.shutdown)() });
        match result {
            Ok(()) => tracing::info!("HLML shut down"),
            Err(e) => tracing::warn!("HLML shutdown returned: {e}"),
        }
    }
}

/// Initialized HLML instance. Cloning is cheap and shares the same library handle.
#[derive(Clone)]
pub struct Hlml {
    inner: Arc<Inner>,
}

impl fmt::Debug for Hlml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hlml").finish_non_exhaustive()
    }
}

impl Hlml {
    /// Loads the library at `path` and calls `hlml_init`.
    pub fn init(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading HLML from {}", path.to_string_lossy());

        let library = unsafe { Library::new(path)? };
        let symbols = unsafe { ffi::Symbols::load(&library)? };
        error::check("hlml_init", unsafe { (symbols.init)() })?;

        Ok(Self {
            inner: Arc::new(Inner {
                symbols,
                _library: library,
            }),
        })
    }

    pub(crate) fn symbols(&self) -> &ffi::Symbols {
        &self.inner.symbols
    }

    pub fn device_count(&self) -> Result<u32> {
        let mut count: c_uint = 0;
        error::check("hlml_device_get_count", unsafe {
            (self.symbols().device_get_count)(&mut count)
        })?;
        Ok(count)
    }

    pub fn device_by_index(&self, index: u32) -> Result<Device> {
        let mut raw: ffi::RawDevice = std::ptr::null_mut();
        error::check("hlml_device_get_handle_by_index", unsafe {
            (self.symbols().device_get_handle_by_index)(index, &mut raw)
        })?;
        Ok(Device::new(self.clone(), raw))
    }

    /// Scans every device for a matching serial number; HLML has no direct lookup.
    pub fn device_by_serial(&self, serial: &str) -> Result<Device> {
        for index in 0..self.device_count()? {
            let device = self.device_by_index(index)?;
            if device.serial()? == serial {
                return Ok(device);
            }
        }
        Err(HlmlError::SerialNotFound(serial.to_string()))
    }

    pub fn event_set(&self) -> Result<EventSet> {
        EventSet::create(self.clone())
    }
}
