//! Kubernetes device plugin for Habana Labs accelerators
//!
//! [`supervisor::Supervisor`] keeps a [`plugin::PluginServer`] registered with
//! kubelet, restarting it when kubelet restarts or on SIGHUP. Devices come from
//! a [`device::DeviceBackend`], normally backed by HLML.

pub mod config;
pub mod device;
pub mod error;
pub mod plugin;
pub mod supervisor;
pub mod watchers;
