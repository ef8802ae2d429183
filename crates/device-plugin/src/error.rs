//! Error types for the device plugin.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, Report<PluginError>>;

/// Errors surfaced by the plugin server and the lifecycle supervisor.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Device inventory could not be enumerated
    #[display("Failed to enumerate devices")]
    Inventory,

    /// Socket bind, RPC server start or local dial failed
    #[display("Failed to start device plugin server: {message}")]
    Startup { message: String },

    /// Kubelet unreachable or registration rejected
    #[display("Failed to register device plugin with kubelet")]
    Registration,

    /// Requested device id is not part of the current snapshot
    #[display("Invalid allocation request: unknown device {id}")]
    UnknownDevice { id: String },

    /// Host device files for a known device could not be resolved
    #[display("Failed to resolve device files for {id}")]
    Resolve { id: String },

    /// RPC received while no session is serving
    #[display("Device plugin is not serving")]
    NotServing,

    /// Session teardown failed
    #[display("Failed to stop device plugin server")]
    Shutdown,

    /// Filesystem or signal watcher could not be created
    #[display("Failed to set up {what} watcher")]
    Watcher { what: &'static str },
}

impl Error for PluginError {}

/// Maps a report onto a gRPC status using its outermost context.
pub(crate) fn to_status(report: &Report<PluginError>) -> tonic::Status {
    match report.current_context() {
        err @ PluginError::UnknownDevice { .. } => tonic::Status::not_found(err.to_string()),
        err @ PluginError::NotServing => tonic::Status::unavailable(err.to_string()),
        _ => tonic::Status::internal(format!("{report:#}")),
    }
}
