use std::ffi::c_char;
use std::ffi::c_uint;

use crate::error::check;
use crate::error::Result;
use crate::error::ReturnCode;
use crate::error::HlmlError;
use crate::ffi;
use crate::Hlml;

/// PCI properties of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciInfo {
    pub bus_id: String,
    /// Combined 16 bit device id and 16 bit vendor id.
    pub device_id: u32,
}

/// Handle to one accelerator, keeping the library alive while it exists.
pub struct Device {
    hlml: Hlml,
    raw: ffi::RawDevice,
}

// HLML device handles are opaque library-owned pointers that may be used from any thread.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("raw", &self.raw).finish()
    }
}

impl Device {
    pub(crate) fn new(hlml: Hlml, raw: ffi::RawDevice) -> Self {
        Self { hlml, raw }
    }

    pub(crate) fn raw(&self) -> ffi::RawDevice {
        self.raw
    }

    fn read_string(&self, function: &'static str, getter: ffi::StringGetter) -> Result<String> {
        let mut buffer = [0 as c_char; ffi::STRING_BUFFER_LEN];
        check(function, unsafe {
            getter(self.raw, buffer.as_mut_ptr(), buffer.len() as c_uint)
        })?;
        Ok(ffi::string_from_buffer(&buffer))
    }

    pub fn serial(&self) -> Result<String> {
        self.read_string("hlml_device_get_serial", self.hlml.symbols().device_get_serial)
    }

    pub fn uuid(&self) -> Result<String> {
        self.read_string("hlml_device_get_uuid", self.hlml.symbols().device_get_uuid)
    }

    pub fn pci_info(&self) -> Result<PciInfo> {
        let mut pci = ffi::PciInfo::default();
        check("hlml_device_get_pci_info", unsafe {
            (self.hlml.symbols().device_get_pci_info)(self.raw, &mut pci)
        })?;
        Ok(PciInfo {
            bus_id: ffi::string_from_buffer(&pci.bus_id),
            device_id: pci.pci_device_id,
        })
    }

    pub fn minor_number(&self) -> Result<u32> {
        let mut minor: c_uint = 0;
        check("hlml_device_get_minor_number", unsafe {
            (self.hlml.symbols().device_get_minor_number)(self.raw, &mut minor)
        })?;
        Ok(minor)
    }

    /// Module index on the board, `None` when the library cannot report it.
    pub fn module_id(&self) -> Result<Option<u32>> {
        self.optional_uint(
            "hlml_device_get_module_id",
            self.hlml.symbols().device_get_module_id,
        )
    }

    /// NUMA node the device is attached to, `None` when unknown.
    pub fn numa_node(&self) -> Result<Option<u32>> {
        self.optional_uint(
            "hlml_device_get_numa_node",
            self.hlml.symbols().device_get_numa_node,
        )
    }

    fn optional_uint(
        &self,
        function: &'static str,
        getter: Option<ffi::UintGetter>,
    ) -> Result<Option<u32>> {
        let Some(getter) = getter else {
            return Ok(None);
        };
        let mut value: c_uint = 0;
        match check(function, unsafe { getter(self.raw, &mut value) }) {
            Ok(()) => Ok(Some(value)),
            Err(HlmlError::Call {
                code: ReturnCode::NotSupported,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
