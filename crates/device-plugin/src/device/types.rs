use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::plugin::api;

/// Accelerator family served by one plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Goya,
    Gaudi,
}

impl DeviceType {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Goya => "goya",
            DeviceType::Gaudi => "gaudi",
        }
    }

    /// Low 16 bits of the PCI device id, in lowercase hex.
    pub fn pci_id_suffix(&self) -> &'static str {
        match self {
            DeviceType::Goya => "0001",
            DeviceType::Gaudi => "1000",
        }
    }

    /// Extended resource name the devices are advertised under.
    pub fn resource_name(&self) -> String {
        format!("habana.ai/{}", self.name())
    }

    /// File name of the plugin socket inside the kubelet device plugin directory.
    pub fn socket_name(&self) -> String {
        format!("{}_habanalabs.sock", self.name())
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device health as advertised to kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    /// Wire value from the device plugin API constants.
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accelerator as advertised to kubelet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Serial number; the only key used for lookups.
    pub id: String,
    pub health: Health,
    /// NUMA nodes the device is local to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Vec<i64>>,
}

impl DeviceRecord {
    pub fn healthy(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            health: Health::Healthy,
            topology: None,
        }
    }

    pub fn with_numa_node(mut self, node: i64) -> Self {
        self.topology = Some(vec![node]);
        self
    }
}

impl From<&DeviceRecord> for api::Device {
    fn from(record: &DeviceRecord) -> Self {
        api::Device {
            id: record.id.clone(),
            health: record.health.as_str().to_string(),
            topology: record.topology.as_ref().map(|nodes| api::TopologyInfo {
                nodes: nodes.iter().map(|&id| api::NumaNode { id }).collect(),
            }),
        }
    }
}

/// Ordered set of every device advertised by one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    devices: Vec<DeviceRecord>,
}

impl DeviceSnapshot {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }

    /// Flips the device to unhealthy. Returns `true` if its health changed.
    pub fn mark_unhealthy(&mut self, id: &str) -> bool {
        match self.devices.iter_mut().find(|d| d.id == id) {
            Some(device) if device.health == Health::Healthy => {
                device.health = Health::Unhealthy;
                true
            }
            _ => false,
        }
    }

    pub fn to_response(&self) -> api::ListAndWatchResponse {
        api::ListAndWatchResponse {
            devices: self.devices.iter().map(api::Device::from).collect(),
        }
    }
}
