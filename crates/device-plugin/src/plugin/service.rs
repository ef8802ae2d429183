use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use error_stack::Report;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Result as TonicResult;
use tonic::Status;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::allocation;
use super::feed::SnapshotFeed;
use super::api::device_plugin_server::DevicePlugin;
use super::api::AllocateRequest;
use super::api::AllocateResponse;
use super::api::DevicePluginOptions;
use super::api::Empty;
use super::api::ListAndWatchResponse;
use super::api::PreStartContainerRequest;
use super::api::PreStartContainerResponse;
use super::api::PreferredAllocationRequest;
use super::api::PreferredAllocationResponse;
use crate::device::DeviceBackend;
use crate::error::to_status;
use crate::error::PluginError;

/// State shared between a session and the RPC handlers serving it.
pub(crate) struct SessionContext {
    pub resource_name: String,
    pub options: DevicePluginOptions,
    pub backend: Arc<dyn DeviceBackend>,
    pub feed: Arc<SnapshotFeed>,
    pub shutdown: CancellationToken,
    serving: AtomicBool,
}

impl SessionContext {
    pub fn new(
        resource_name: String,
        options: DevicePluginOptions,
        backend: Arc<dyn DeviceBackend>,
        feed: Arc<SnapshotFeed>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            resource_name,
            options,
            backend,
            feed,
            shutdown,
            serving: AtomicBool::new(false),
        }
    }

    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    fn ensure_serving(&self) -> TonicResult<()> {
        if self.serving.load(Ordering::SeqCst) && !self.shutdown.is_cancelled() {
            Ok(())
        } else {
            Err(to_status(&Report::new(PluginError::NotServing)))
        }
    }
}

/// gRPC handlers of the `v1beta1.DevicePlugin` service for one session.
pub(crate) struct DevicePluginService {
    context: Arc<SessionContext>,
}

impl DevicePluginService {
    pub fn new(context: Arc<SessionContext>) -> Self {
        Self { context }
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<DevicePluginOptions>> {
        debug!("getting device plugin options");
        Ok(Response::new(self.context.options))
    }

    type ListAndWatchStream =
        Pin<Box<dyn Stream<Item = Result<ListAndWatchResponse, Status>> + Send>>;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> TonicResult<Response<Self::ListAndWatchStream>> {
        self.context.ensure_serving()?;
        info!(resource = %self.context.resource_name, "ListAndWatch stream opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let mut updates = self.context.feed.subscribe();
        let shutdown = self.context.shutdown.clone();
        let resource_name = self.context.resource_name.clone();

        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    snapshot = updates.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                let response = snapshot.to_response();
                debug!(devices = response.devices.len(), "Sending device list");
                if tx.send(Ok(response)).is_err() {
                    warn!(resource = %resource_name, "ListAndWatch client went away");
                    break;
                }
            }
            info!(resource = %resource_name, "ListAndWatch stream closed");
        });

        let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        _request: Request<PreferredAllocationRequest>,
    ) -> TonicResult<Response<PreferredAllocationResponse>> {
        Err(Status::unimplemented(
            "preferred allocation is not supported by this plugin",
        ))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> TonicResult<Response<AllocateResponse>> {
        self.context.ensure_serving()?;
        let request = request.into_inner();
        info!(
            containers = request.container_requests.len(),
            "Allocate request received"
        );

        let snapshot = self.context.feed.current();
        let backend = self.context.backend.clone();

        // Resolving device files may block in the vendor library
        let result = tokio::task::spawn_blocking(move || {
            allocation::allocate(&snapshot, backend.as_ref(), &request)
        })
        .await
        .map_err(|e| Status::internal(format!("allocation task failed: {e}")))?;

        match result {
            Ok(response) => Ok(Response::new(response)),
            Err(report) => {
                warn!("Rejecting allocation: {report:?}");
                Err(to_status(&report))
            }
        }
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> TonicResult<Response<PreStartContainerResponse>> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
