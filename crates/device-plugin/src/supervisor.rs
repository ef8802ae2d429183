//! Top-level control loop keeping the plugin registered with kubelet

use std::time::Duration;

use error_stack::ResultExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::PluginError;
use crate::error::PluginResult;
use crate::plugin::PluginServer;
use crate::watchers::SupervisorEvent;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Delay before retrying a failed start or registration.
    pub retry_interval: Duration,
    /// Consecutive registration failures after which the supervisor gives up.
    pub max_registration_failures: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            max_registration_failures: 3,
        }
    }
}

/// Outcome of one restart pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Serving,
    NoDevices,
    Retry,
}

pub struct Supervisor {
    server: PluginServer,
    config: SupervisorConfig,
    enumerated_once: bool,
    registration_failures: u32,
}

impl Supervisor {
    pub fn new(server: PluginServer, config: SupervisorConfig) -> Self {
        Self {
            server,
            config,
            enumerated_once: false,
            registration_failures: 0,
        }
    }

    pub fn server(&self) -> &PluginServer {
        &self.server
    }

    /// Drives the plugin until a terminate event arrives or every event source is gone.
    ///
    /// Returns an error when the first inventory query fails or registration
    /// keeps failing past the configured limit.
    pub async fn run(
        &mut self,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) -> PluginResult<()> {
        let mut restart = true;

        loop {
            let mut retry = false;
            if restart {
                match self.restart().await? {
                    Attempt::Serving => restart = false,
                    Attempt::NoDevices => {}
                    Attempt::Retry => retry = true,
                }
            }

            let event = tokio::select! {
                event = events.recv() => event,
                _ = tokio::time::sleep(self.config.retry_interval), if retry => {
                    debug!("Retrying device plugin start");
                    continue;
                }
            };

            match event {
                Some(SupervisorEvent::KubeletRestarted) => {
                    info!("Kubelet socket created, restarting");
                    restart = true;
                }
                Some(SupervisorEvent::WatcherError(e)) => warn!("Filesystem watcher error: {e}"),
                Some(SupervisorEvent::Reload) => {
                    info!("Received SIGHUP, restarting");
                    restart = true;
                }
                Some(SupervisorEvent::Terminate(signal)) => {
                    info!("Received {signal}, shutting down");
                    return self.server.stop().await;
                }
                None => {
                    info!("Event sources closed, shutting down");
                    return self.server.stop().await;
                }
            }
        }
    }

    async fn restart(&mut self) -> PluginResult<Attempt> {
        if let Err(e) = self.server.stop().await {
            warn!("Failed to stop previous session: {e:?}");
        }

        let count = match self.server.device_count().await {
            Ok(count) => count,
            Err(e) if !self.enumerated_once => {
                return Err(e)
                    .change_context(PluginError::Inventory)
                    .attach_printable("initial device inventory failed");
            }
            Err(e) => {
                warn!("Failed to query devices, waiting for changes: {e:?}");
                return Ok(Attempt::NoDevices);
            }
        };
        self.enumerated_once = true;

        if count == 0 {
            warn!("No devices found, waiting for changes");
            return Ok(Attempt::NoDevices);
        }

        match self.server.serve().await {
            Ok(()) => {
                self.registration_failures = 0;
                Ok(Attempt::Serving)
            }
            Err(e) if e.current_context() == &PluginError::Registration => {
                self.registration_failures += 1;
                error!(
                    failures = self.registration_failures,
                    limit = self.config.max_registration_failures,
                    "Could not register with kubelet: {e:?}"
                );
                if self.registration_failures >= self.config.max_registration_failures {
                    return Err(e).attach_printable(format!(
                        "gave up after {} consecutive registration failures",
                        self.registration_failures
                    ));
                }
                Ok(Attempt::Retry)
            }
            Err(e) => {
                error!("Could not start device plugin: {e:?}");
                Ok(Attempt::Retry)
            }
        }
    }
}
