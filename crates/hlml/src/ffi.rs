//! Raw C ABI of `libhlml.so`, resolved at load time.

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::c_ulonglong;
use std::ffi::c_void;

use libloading::Library;

pub(crate) const PCI_DOMAIN_LEN: usize = 5;
pub(crate) const PCI_ADDR_LEN: usize = PCI_DOMAIN_LEN + 10;
/// Size of the buffers handed to the string getters.
pub(crate) const STRING_BUFFER_LEN: usize = 256;

pub(crate) type RawDevice = *mut c_void;
pub(crate) type RawEventSet = *mut c_void;

#[repr(C)]
#[derive(Default)]
pub(crate) struct PciInfo {
    pub bus: c_uint,
    pub bus_id: [c_char; PCI_ADDR_LEN],
    pub device: c_uint,
    pub domain: c_uint,
    pub pci_device_id: c_uint,
}

#[repr(C)]
pub(crate) struct EventData {
    pub device: RawDevice,
    pub event_type: c_ulonglong,
}

impl Default for EventData {
    fn default() -> Self {
        Self {
            device: std::ptr::null_mut(),
            event_type: 0,
        }
    }
}

type InitFn = unsafe extern "C" fn() -> c_int;
type CountFn = unsafe extern "C" fn(*mut c_uint) -> c_int;
type HandleByIndexFn = unsafe extern "C" fn(c_uint, *mut RawDevice) -> c_int;
type PciInfoFn = unsafe extern "C" fn(RawDevice, *mut PciInfo) -> c_int;
pub(crate) type StringGetter = unsafe extern "C" fn(RawDevice, *mut c_char, c_uint) -> c_int;
pub(crate) type UintGetter = unsafe extern "C" fn(RawDevice, *mut c_uint) -> c_int;
type RegisterEventsFn = unsafe extern "C" fn(RawDevice, c_ulonglong, RawEventSet) -> c_int;
type EventSetCreateFn = unsafe extern "C" fn(*mut RawEventSet) -> c_int;
type EventSetFreeFn = unsafe extern "C" fn(RawEventSet) -> c_int;
type EventSetWaitFn = unsafe extern "C" fn(RawEventSet, *mut EventData, c_uint) -> c_int;

/// Function table copied out of the loaded library.
///
/// The pointers stay valid for as long as the owning [`Library`] is alive, which the
/// caller guarantees by keeping both in the same struct.
pub(crate) struct Symbols {
    pub init: InitFn,
    pub shutdown: InitFn,
    pub device_get_count: CountFn,
    pub device_get_handle_by_index: HandleByIndexFn,
    pub device_get_pci_info: PciInfoFn,
    pub device_get_uuid: StringGetter,
    pub device_get_serial: StringGetter,
    pub device_get_minor_number: UintGetter,
    /// Missing from older library releases.
    pub device_get_module_id: Option<UintGetter>,
    /// Missing from older library releases.
    pub device_get_numa_node: Option<UintGetter>,
    pub device_register_events: RegisterEventsFn,
    pub event_set_create: EventSetCreateFn,
    pub event_set_free: EventSetFreeFn,
    pub event_set_wait: EventSetWaitFn,
}

impl Symbols {
    /// # Safety
    ///
    /// `library` must be an HLML build exporting the declared signatures.
    pub(crate) unsafe fn load(library: &Library) -> Result<Self, libloading::Error> {
        unsafe fn required<T: Copy>(library: &Library, name: &[u8]) -> Result<T, libloading::Error> {
            Ok(*library.get::<T>(name)?)
        }

        unsafe fn optional<T: Copy>(library: &Library, name: &[u8]) -> Option<T> {
            library.get::<T>(name).ok().map(|symbol| *symbol)
        }

        Ok(Self {
            init: required(library, b"hlml_init\0")?,
            shutdown: required(library, b"hlml_shutdown\0")?,
            device_get_count: required(library, b"hlml_device_get_count\0")?,
            device_get_handle_by_index: required(library, b"hlml_device_get_handle_by_index\0")?,
            device_get_pci_info: required(library, b"hlml_device_get_pci_info\0")?,
            device_get_uuid: required(library, b"hlml_device_get_uuid\0")?,
            device_get_serial: required(library, b"hlml_device_get_serial\0")?,
            device_get_minor_number: required(library, b"hlml_device_get_minor_number\0")?,
            device_get_module_id: optional(library, b"hlml_device_get_module_id\0"),
            device_get_numa_node: optional(library, b"hlml_device_get_numa_node\0"),
            device_register_events: required(library, b"hlml_device_register_events\0")?,
            event_set_create: required(library, b"hlml_event_set_create\0")?,
            event_set_free: required(library, b"hlml_event_set_free\0")?,
            event_set_wait: required(library, b"hlml_event_set_wait\0")?,
        })
    }
}

/// Reads a NUL terminated string out of a fixed size C buffer.
pub(crate) fn string_from_buffer(buffer: &[c_char]) -> String {
    let bytes: Vec<u8> = buffer
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_from_buffer_stops_at_nul() {
        let mut buffer = [0 as c_char; 8];
        for (slot, byte) in buffer.iter_mut().zip(b"AB12") {
            *slot = *byte as c_char;
        }
        assert_eq!(string_from_buffer(&buffer), "AB12");
    }

    #[test]
    fn string_from_unterminated_buffer_uses_whole_buffer() {
        let buffer = [b'x' as c_char; 4];
        assert_eq!(string_from_buffer(&buffer), "xxxx");
    }
}
