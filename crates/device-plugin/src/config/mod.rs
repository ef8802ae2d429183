//! Command line configuration

pub mod backend;
pub mod cli;
pub mod devices;
pub mod serve;

use std::time::Duration;

use crate::plugin::HealthWatchSettings;
use crate::plugin::PluginConfig;
use crate::plugin::KUBELET_SOCKET_NAME;
use crate::supervisor::SupervisorConfig;

impl From<&serve::ServeArgs> for PluginConfig {
    fn from(args: &serve::ServeArgs) -> Self {
        let dev_type = args.backend.dev_type;
        let kubelet_socket = args
            .kubelet_socket
            .clone()
            .unwrap_or_else(|| args.device_plugin_path.join(KUBELET_SOCKET_NAME));

        let mut config = PluginConfig::new(
            dev_type.resource_name(),
            args.device_plugin_path.join(dev_type.socket_name()),
            kubelet_socket,
        );
        config.health = HealthWatchSettings {
            wait_timeout: Duration::from_millis(args.health_wait_timeout_ms),
            error_backoff: Duration::from_millis(args.health_error_backoff_ms),
        };
        config
    }
}

impl From<&serve::ServeArgs> for SupervisorConfig {
    fn from(args: &serve::ServeArgs) -> Self {
        Self {
            retry_interval: Duration::from_secs(args.retry_interval_secs),
            max_registration_failures: args.max_registration_failures.max(1),
        }
    }
}

pub use backend::*;
pub use cli::*;
pub use devices::*;
pub use serve::*;
