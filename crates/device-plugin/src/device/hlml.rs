//! HLML backed implementation of the device traits

use std::time::Duration;

use error_stack::ResultExt;
use hlml::EventSet;
use hlml::Hlml;
use hlml::EVENT_CRITICAL_ERR;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::traits::AllocationPathResolver;
use super::traits::DeviceAllocation;
use super::traits::DeviceError;
use super::traits::DeviceInventory;
use super::traits::DeviceResult;
use super::traits::HealthEvent;
use super::traits::HealthEventSource;
use super::traits::HealthSubscription;
use super::traits::Subscription;
use super::types::DeviceRecord;
use super::types::DeviceType;

/// Device files granted for the accelerator with driver minor number `minor`.
pub fn device_paths(minor: u32) -> Vec<String> {
    vec![
        format!("/dev/accel/accel{minor}"),
        format!("/dev/accel/accel_controlD{minor}"),
        format!("/dev/hl{minor}"),
        format!("/dev/hl_controlD{minor}"),
    ]
}

/// Whether a PCI device id (as reported by HLML) belongs to `device_type`.
pub fn matches_device_type(pci_device_id: u32, device_type: DeviceType) -> bool {
    format!("{pci_device_id:x}").ends_with(device_type.pci_id_suffix())
}

pub struct HlmlDevices {
    hlml: Hlml,
    device_type: DeviceType,
}

impl HlmlDevices {
    pub fn new(hlml: Hlml, device_type: DeviceType) -> Self {
        Self { hlml, device_type }
    }
}

impl DeviceInventory for HlmlDevices {
    fn enumerate(&self) -> DeviceResult<Vec<DeviceRecord>> {
        let count = self
            .hlml
            .device_count()
            .change_context(DeviceError::Enumerate)?;

        debug!("Finding devices, {count} reported by HLML");
        let mut devices = Vec::new();

        for index in 0..count {
            let device = self
                .hlml
                .device_by_index(index)
                .change_context(DeviceError::Enumerate)
                .attach_printable_lazy(|| format!("device index {index}"))?;
            let pci = device.pci_info().change_context(DeviceError::Enumerate)?;

            if !matches_device_type(pci.device_id, self.device_type) {
                debug!(
                    "Skipping device {index} with pci id {:x}, not a {}",
                    pci.device_id, self.device_type
                );
                continue;
            }

            let serial = device.serial().change_context(DeviceError::Enumerate)?;
            let uuid = device.uuid().unwrap_or_default();
            let numa_node = device.numa_node().change_context(DeviceError::Enumerate)?;

            info!(
                device_type = %self.device_type,
                serial = %serial,
                uuid = %uuid,
                pci_bus_id = %pci.bus_id,
                numa_node = ?numa_node,
                "Found device"
            );

            let mut record = DeviceRecord::healthy(serial);
            if let Some(node) = numa_node {
                record = record.with_numa_node(i64::from(node));
            }
            devices.push(record);
        }

        Ok(devices)
    }
}

struct HlmlSubscription {
    events: EventSet,
}

impl HealthSubscription for HlmlSubscription {
    fn wait_next(&mut self, timeout: Duration) -> DeviceResult<Option<HealthEvent>> {
        let Some(event) = self
            .events
            .wait(timeout)
            .change_context(DeviceError::Wait)?
        else {
            return Ok(None);
        };

        if event.event_type & EVENT_CRITICAL_ERR == 0 {
            debug!("Ignoring HLML event type {}", event.event_type);
            return Ok(None);
        }

        let serial = event.device.as_ref().map(|device| device.serial());
        match serial {
            Some(Ok(serial)) if !serial.is_empty() => Ok(Some(HealthEvent::Device(serial))),
            Some(Err(e)) => {
                warn!("Critical error on a device that could not be identified: {e}");
                Ok(Some(HealthEvent::Wildcard))
            }
            _ => Ok(Some(HealthEvent::Wildcard)),
        }
    }
}

impl HealthEventSource for HlmlDevices {
    fn subscribe(&self, device_ids: &[String]) -> DeviceResult<Subscription> {
        let events = self.hlml.event_set().change_context(DeviceError::Subscribe)?;
        let mut rejected = Vec::new();

        for id in device_ids {
            let registered = self
                .hlml
                .device_by_serial(id)
                .and_then(|device| events.register(&device, EVENT_CRITICAL_ERR));
            if let Err(e) = registered {
                rejected.push((id.clone(), e.to_string()));
            }
        }

        Ok(Subscription {
            handle: Box::new(HlmlSubscription { events }),
            rejected,
        })
    }
}

impl AllocationPathResolver for HlmlDevices {
    fn resolve(&self, device_id: &str) -> DeviceResult<DeviceAllocation> {
        let query = || DeviceError::Query {
            id: device_id.to_string(),
        };

        let device = self
            .hlml
            .device_by_serial(device_id)
            .change_context_lazy(query)?;
        let minor = device
            .minor_number()
            .change_context_lazy(query)?;
        let module = device
            .module_id()
            .change_context_lazy(query)?;

        Ok(DeviceAllocation {
            host_paths: device_paths(minor),
            device_index: Some(minor),
            module_index: module,
        })
    }
}
