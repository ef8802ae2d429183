use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::api::device_plugin_server::DevicePluginServer;
use super::api::registration_client::RegistrationClient;
use super::api::DevicePluginOptions;
use super::api::RegisterRequest;
use super::feed::SnapshotFeed;
use super::health;
use super::health::HealthWatchSettings;
use super::service::DevicePluginService;
use super::service::SessionContext;
use super::uds;
use super::API_VERSION;
use crate::device::DeviceBackend;
use crate::device::DeviceError;
use crate::device::DeviceInventory;
use crate::device::DeviceRecord;
use crate::device::DeviceResult;
use crate::device::DeviceSnapshot;
use crate::error::PluginError;
use crate::error::PluginResult;

/// Static configuration of a plugin server.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Extended resource name, e.g. `habana.ai/gaudi`.
    pub resource_name: String,
    /// Socket this plugin serves on, inside the kubelet device plugin directory.
    pub socket_path: PathBuf,
    /// Kubelet registration socket.
    pub kubelet_socket: PathBuf,
    pub options: DevicePluginOptions,
    /// Bound on dialing our own socket and kubelet's.
    pub dial_timeout: Duration,
    /// Bound on joining each session task during stop.
    pub stop_timeout: Duration,
    pub health: HealthWatchSettings,
}

impl PluginConfig {
    pub fn new(
        resource_name: impl Into<String>,
        socket_path: impl Into<PathBuf>,
        kubelet_socket: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resource_name: resource_name.into(),
            socket_path: socket_path.into(),
            kubelet_socket: kubelet_socket.into(),
            options: DevicePluginOptions {
                pre_start_required: false,
                get_preferred_allocation_available: false,
            },
            dial_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            health: HealthWatchSettings::default(),
        }
    }
}

/// Lifecycle phase of a [`PluginServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    Idle,
    Starting,
    Serving,
    Stopping,
}

struct Session {
    context: Arc<SessionContext>,
    server_task: JoinHandle<Result<(), tonic::transport::Error>>,
    health_task: JoinHandle<()>,
    updater_task: JoinHandle<usize>,
}

enum SessionState {
    Idle,
    Serving(Session),
}

/// Serves the device plugin API for one resource on a unix socket.
///
/// At most one session is live at a time; [`PluginServer::start`] tears down
/// the previous session before building a new one.
pub struct PluginServer {
    config: PluginConfig,
    backend: Arc<dyn DeviceBackend>,
    state: SessionState,
    phase: PluginPhase,
}

impl PluginServer {
    pub fn new(config: PluginConfig, backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            config,
            backend,
            state: SessionState::Idle,
            phase: PluginPhase::Idle,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn options(&self) -> DevicePluginOptions {
        self.config.options
    }

    pub fn phase(&self) -> PluginPhase {
        self.phase
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Current snapshot of the live session, if any.
    pub fn snapshot(&self) -> Option<DeviceSnapshot> {
        match &self.state {
            SessionState::Serving(session) => Some(session.context.feed.current()),
            SessionState::Idle => None,
        }
    }

    /// Fresh device count from the backend.
    pub async fn device_count(&self) -> DeviceResult<usize> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.device_count())
            .await
            .change_context(DeviceError::Enumerate)?
    }

    async fn enumerate(&self) -> DeviceResult<Vec<DeviceRecord>> {
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || backend.enumerate())
            .await
            .change_context(DeviceError::Enumerate)?
    }

    /// Starts a session. An active session is stopped first.
    pub async fn start(&mut self) -> PluginResult<()> {
        if matches!(self.state, SessionState::Serving(_)) {
            debug!("Restarting active session");
            self.stop().await?;
        }

        self.phase = PluginPhase::Starting;
        match self.start_session().await {
            Ok(session) => {
                session.context.set_serving(true);
                self.state = SessionState::Serving(session);
                self.phase = PluginPhase::Serving;
                info!(
                    resource = %self.config.resource_name,
                    socket = %self.config.socket_path.display(),
                    "Device plugin serving"
                );
                Ok(())
            }
            Err(e) => {
                self.phase = PluginPhase::Idle;
                Err(e)
            }
        }
    }

    async fn start_session(&self) -> PluginResult<Session> {
        let socket_path = &self.config.socket_path;
        let startup = |message: &str| PluginError::Startup {
            message: format!("{message} {}", socket_path.display()),
        };

        remove_socket(socket_path).change_context_lazy(|| startup("could not remove stale"))?;

        let devices = self
            .enumerate()
            .await
            .change_context(PluginError::Inventory)?;
        let snapshot = DeviceSnapshot::new(devices);
        let device_ids = snapshot.ids();
        info!(
            resource = %self.config.resource_name,
            devices = ?device_ids,
            "Starting device plugin"
        );

        let listener =
            UnixListener::bind(socket_path).change_context_lazy(|| startup("could not bind"))?;

        let shutdown = CancellationToken::new();
        let feed = Arc::new(SnapshotFeed::new(snapshot));
        let context = Arc::new(SessionContext::new(
            self.config.resource_name.clone(),
            self.config.options,
            self.backend.clone(),
            feed.clone(),
            shutdown.clone(),
        ));

        let server_task = {
            let service = DevicePluginServer::new(DevicePluginService::new(context.clone()));
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(service)
                    .serve_with_incoming_shutdown(
                        tokio_stream::wrappers::UnixListenerStream::new(listener),
                        async move {
                            shutdown.cancelled().await;
                            info!("shutting down gRPC server");
                        },
                    )
                    .await
            })
        };

        // Make sure the server answers before telling kubelet about it
        if let Err(e) = uds::connect(socket_path, self.config.dial_timeout).await {
            shutdown.cancel();
            server_task.abort();
            if let Err(cleanup) = remove_socket(socket_path) {
                warn!("Failed to remove socket after failed start: {cleanup}");
            }
            return Err(e.change_context(startup("could not dial")));
        }

        let (unhealthy_tx, unhealthy_rx) = mpsc::unbounded_channel();
        let health_task = health::spawn_watch(
            self.backend.clone(),
            device_ids,
            unhealthy_tx,
            shutdown,
            self.config.health,
        );
        let updater_task = tokio::spawn(health::apply_updates(
            unhealthy_rx,
            feed,
            self.config.resource_name.clone(),
        ));

        Ok(Session {
            context,
            server_task,
            health_task,
            updater_task,
        })
    }

    /// Stops the live session and removes its socket. No-op when idle.
    pub async fn stop(&mut self) -> PluginResult<()> {
        let session = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Serving(session) => session,
            SessionState::Idle => return Ok(()),
        };

        self.phase = PluginPhase::Stopping;
        info!(
            resource = %self.config.resource_name,
            socket = %self.config.socket_path.display(),
            "Stopping device plugin"
        );
        session.context.set_serving(false);
        session.context.shutdown.cancel();

        let timeout = self.config.stop_timeout;
        match join_bounded("gRPC server", session.server_task, timeout).await {
            Some(Err(e)) => warn!("gRPC server exited with error: {e}"),
            Some(Ok(())) | None => {}
        }
        join_bounded("health watch", session.health_task, timeout).await;
        if let Some(transitions) = join_bounded("snapshot updater", session.updater_task, timeout).await {
            debug!(transitions, "Session health updates drained");
        }
        session.context.feed.close();

        let removed = remove_socket(&self.config.socket_path);
        self.phase = PluginPhase::Idle;
        removed.change_context(PluginError::Shutdown)
    }

    /// Registers this plugin's socket with kubelet.
    pub async fn register(&self, kubelet_socket: &Path, resource_name: &str) -> PluginResult<()> {
        let endpoint = self
            .config
            .socket_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Report::new(PluginError::Registration))
            .attach_printable_lazy(|| {
                format!("socket path {} has no file name", self.config.socket_path.display())
            })?;

        info!(
            kubelet = %kubelet_socket.display(),
            resource = %resource_name,
            endpoint = %endpoint,
            "Registering device plugin with kubelet"
        );

        let channel = uds::connect(kubelet_socket, self.config.dial_timeout)
            .await
            .change_context(PluginError::Registration)?;
        let mut client = RegistrationClient::new(channel);

        let request = RegisterRequest {
            version: API_VERSION.to_string(),
            endpoint,
            resource_name: resource_name.to_string(),
            options: Some(self.config.options),
        };

        client
            .register(Request::new(request))
            .await
            .change_context(PluginError::Registration)?;

        info!(resource = %resource_name, "Registered device plugin with kubelet");
        Ok(())
    }

    /// Starts a session and registers it; a session whose registration fails is stopped.
    pub async fn serve(&mut self) -> PluginResult<()> {
        self.start().await?;

        let kubelet_socket = self.config.kubelet_socket.clone();
        let resource_name = self.config.resource_name.clone();
        if let Err(e) = self.register(&kubelet_socket, &resource_name).await {
            if let Err(stop) = self.stop().await {
                error!("Failed to stop device plugin after failed registration: {stop:?}");
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Removes `path`, treating a missing file as success.
fn remove_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn join_bounded<T>(name: &str, mut task: JoinHandle<T>, timeout: Duration) -> Option<T> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("{name} task failed: {e}");
            None
        }
        Err(_) => {
            warn!("{name} task did not stop within {timeout:?}, aborting");
            task.abort();
            None
        }
    }
}
