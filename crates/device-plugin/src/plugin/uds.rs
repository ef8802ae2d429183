//! gRPC client channels over unix domain sockets

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::transport::Uri;
use tower::service_fn;

#[derive(Debug, Display)]
#[display("Failed to dial unix socket {}", path.display())]
pub struct DialError {
    path: PathBuf,
}

impl core::error::Error for DialError {}

/// Connects to the gRPC server listening on `socket_path`, giving up after `timeout`.
pub async fn connect(socket_path: &Path, timeout: Duration) -> Result<Channel, Report<DialError>> {
    let dial_error = || DialError {
        path: socket_path.to_path_buf(),
    };
    let target = socket_path.to_path_buf();

    // The HTTP URL is a placeholder since the connector ignores it
    let endpoint = Endpoint::from_static("http://tonic").connect_timeout(timeout);
    let connecting = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let target = target.clone();
        async move {
            match UnixStream::connect(target).await {
                Ok(stream) => Ok(TokioIo::new(stream)),
                Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
            }
        }
    }));

    match tokio::time::timeout(timeout, connecting).await {
        Ok(channel) => channel.change_context_lazy(dial_error),
        Err(_) => Err(Report::new(dial_error()))
            .attach_printable_lazy(|| format!("timed out after {timeout:?}")),
    }
}
