#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use device_plugin::plugin::api::device_plugin_client::DevicePluginClient;
use device_plugin::plugin::api::registration_server::Registration;
use device_plugin::plugin::api::registration_server::RegistrationServer;
use device_plugin::plugin::api::Empty;
use device_plugin::plugin::api::RegisterRequest;
use device_plugin::plugin::uds;
use device_plugin::plugin::HealthWatchSettings;
use device_plugin::plugin::PluginConfig;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Request;
use tonic::Response;
use tonic::Status;

pub const RESOURCE: &str = "habana.ai/gaudi";
pub const SOCKET_NAME: &str = "gaudi_habanalabs.sock";

pub fn plugin_config(dir: &Path) -> PluginConfig {
    let mut config = PluginConfig::new(RESOURCE, dir.join(SOCKET_NAME), dir.join("kubelet.sock"));
    config.health = HealthWatchSettings {
        wait_timeout: Duration::from_millis(20),
        error_backoff: Duration::from_millis(10),
    };
    config.stop_timeout = Duration::from_secs(5);
    config
}

pub async fn plugin_client(socket: &Path) -> DevicePluginClient<Channel> {
    let channel = uds::connect(socket, Duration::from_secs(5))
        .await
        .expect("plugin socket should accept connections");
    DevicePluginClient::new(channel)
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Clone, Default)]
struct RecordingRegistration {
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
}

#[tonic::async_trait]
impl Registration for RecordingRegistration {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<Empty>, Status> {
        self.requests.lock().unwrap().push(request.into_inner());
        Ok(Response::new(Empty {}))
    }
}

/// Kubelet stand-in serving the registration service on a unix socket.
pub struct FakeKubelet {
    requests: Arc<Mutex<Vec<RegisterRequest>>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeKubelet {
    pub fn start(socket: &Path) -> Self {
        let _ = std::fs::remove_file(socket);
        let listener = UnixListener::bind(socket).expect("bind kubelet socket");
        let service = RecordingRegistration::default();
        let requests = service.requests.clone();
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tonic::transport::Server::builder()
                    .add_service(RegistrationServer::new(service))
                    .serve_with_incoming_shutdown(
                        tokio_stream::wrappers::UnixListenerStream::new(listener),
                        shutdown.cancelled_owned(),
                    )
                    .await
                    .expect("fake kubelet serves");
            })
        };

        Self {
            requests,
            shutdown,
            task,
        }
    }

    pub fn requests(&self) -> Vec<RegisterRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}
