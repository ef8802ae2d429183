//! Kubelet device plugin API server

#![allow(clippy::doc_markdown)]
pub mod api {
    #![allow(clippy::doc_overindented_list_items)]
    tonic::include_proto!("v1beta1");
}

pub mod allocation;
mod feed;
pub mod health;
pub mod server;
mod service;
pub mod uds;

pub use health::HealthWatchSettings;
pub use server::PluginConfig;
pub use server::PluginPhase;
pub use server::PluginServer;

/// Device plugin API version spoken with kubelet.
pub const API_VERSION: &str = "v1beta1";

/// Directory kubelet watches for device plugin sockets.
pub const DEFAULT_DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// File name of kubelet's registration socket inside [`DEFAULT_DEVICE_PLUGIN_PATH`].
pub const KUBELET_SOCKET_NAME: &str = "kubelet.sock";
