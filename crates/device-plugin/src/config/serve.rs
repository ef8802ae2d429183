use std::path::PathBuf;

use clap::Parser;

use crate::config::backend::BackendArgs;
use crate::plugin::DEFAULT_DEVICE_PLUGIN_PATH;

#[derive(Parser, Clone, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub backend: BackendArgs,

    #[arg(
        long,
        default_value = DEFAULT_DEVICE_PLUGIN_PATH,
        value_hint = clap::ValueHint::DirPath,
        help = "Kubelet device plugin directory the plugin socket is created in"
    )]
    pub device_plugin_path: PathBuf,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "Kubelet registration socket, defaults to kubelet.sock inside the device plugin directory"
    )]
    pub kubelet_socket: Option<PathBuf>,

    #[arg(
        long,
        default_value = "5000",
        help = "Longest single wait for device health events, in milliseconds"
    )]
    pub health_wait_timeout_ms: u64,

    #[arg(
        long,
        default_value = "2000",
        help = "Delay before retrying after a health event error, in milliseconds"
    )]
    pub health_error_backoff_ms: u64,

    #[arg(
        long,
        default_value = "5",
        help = "Delay before retrying a failed start or registration, in seconds"
    )]
    pub retry_interval_secs: u64,

    #[arg(
        long,
        default_value = "3",
        help = "Consecutive registration failures before giving up"
    )]
    pub max_registration_failures: u32,

    #[arg(
        long,
        env = "HABANA_DEVICE_PLUGIN_LOG_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_path: Option<PathBuf>,
}
