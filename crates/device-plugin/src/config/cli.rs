use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::devices::ListDevicesArgs;
use crate::config::serve::ServeArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugin
    Serve(Box<ServeArgs>),
    /// Print the devices the plugin would advertise, as JSON
    #[command(name = "list-devices")]
    ListDevices(ListDevicesArgs),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::BackendKind;
    use crate::device::DeviceType;
    use crate::plugin::PluginConfig;
    use crate::supervisor::SupervisorConfig;

    fn serve_args(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(["habana-device-plugin", "serve"].iter().chain(args))
            .expect("arguments parse");
        match cli.command {
            Commands::Serve(args) => *args,
            Commands::ListDevices(_) => panic!("expected serve"),
        }
    }

    #[test]
    fn serve_defaults_target_goya_under_kubelet_dir() {
        let args = serve_args(&[]);
        let config = PluginConfig::from(&args);

        assert_eq!(args.backend.dev_type, DeviceType::Goya);
        assert_eq!(args.backend.backend, BackendKind::Hlml);
        assert_eq!(config.resource_name, "habana.ai/goya");
        assert_eq!(
            config.socket_path,
            std::path::PathBuf::from("/var/lib/kubelet/device-plugins/goya_habanalabs.sock")
        );
        assert_eq!(
            config.kubelet_socket,
            std::path::PathBuf::from("/var/lib/kubelet/device-plugins/kubelet.sock")
        );
        assert_eq!(config.health.wait_timeout, Duration::from_secs(5));
    }

    #[test]
    fn serve_overrides_flow_into_core_configs() {
        let args = serve_args(&[
            "--dev-type",
            "gaudi",
            "--device-plugin-path",
            "/tmp/plugins",
            "--retry-interval-secs",
            "1",
            "--max-registration-failures",
            "7",
        ]);
        let plugin = PluginConfig::from(&args);
        let supervisor = SupervisorConfig::from(&args);

        assert_eq!(plugin.resource_name, "habana.ai/gaudi");
        assert_eq!(
            plugin.socket_path,
            std::path::PathBuf::from("/tmp/plugins/gaudi_habanalabs.sock")
        );
        assert_eq!(supervisor.retry_interval, Duration::from_secs(1));
        assert_eq!(supervisor.max_registration_failures, 7);
    }

    #[test]
    fn unknown_device_type_is_rejected() {
        let result = Cli::try_parse_from(["habana-device-plugin", "serve", "--dev-type", "tpu"]);
        assert!(result.is_err());
    }
}
