//! Health fan-in for a serving session
//!
//! A blocking task waits on the backend's health events and forwards the ids
//! of devices that went bad over an unbounded channel. A single async task
//! consumes that channel and publishes each transition through the session's
//! [`SnapshotFeed`], which `ListAndWatch` streams follow.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::feed::SnapshotFeed;
use crate::device::DeviceBackend;
use crate::device::HealthEvent;
use crate::device::HealthEventSource;

#[derive(Debug, Clone, Copy)]
pub struct HealthWatchSettings {
    /// Upper bound of one blocking wait, and so of shutdown latency.
    pub wait_timeout: Duration,
    /// Delay before retrying after the event source failed.
    pub error_backoff: Duration,
}

impl Default for HealthWatchSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(2),
        }
    }
}

pub(crate) fn spawn_watch(
    backend: Arc<dyn DeviceBackend>,
    device_ids: Vec<String>,
    unhealthy_tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    settings: HealthWatchSettings,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        watch_health(
            backend.as_ref(),
            &device_ids,
            &unhealthy_tx,
            &shutdown,
            settings,
        );
    })
}

/// Runs until `shutdown` fires, reporting every device that needs to go unhealthy.
///
/// Must run on a blocking thread inside a tokio runtime.
pub(crate) fn watch_health(
    source: &(impl HealthEventSource + ?Sized),
    device_ids: &[String],
    unhealthy_tx: &mpsc::UnboundedSender<String>,
    shutdown: &CancellationToken,
    settings: HealthWatchSettings,
) {
    let report = |id: &str| unhealthy_tx.send(id.to_string()).is_ok();

    let mut subscription = loop {
        if shutdown.is_cancelled() {
            return;
        }
        match source.subscribe(device_ids) {
            Ok(subscription) => break subscription,
            Err(e) => {
                warn!("Failed to subscribe to health events, retrying: {e:?}");
                backoff(shutdown, settings.error_backoff);
            }
        }
    };
    info!(devices = device_ids.len(), "Watching device health");

    for (id, reason) in subscription.rejected.drain(..) {
        warn!(device = %id, "Failed to register for critical events, marking unhealthy: {reason}");
        if !report(&id) {
            return;
        }
    }

    while !shutdown.is_cancelled() {
        match subscription.handle.wait_next(settings.wait_timeout) {
            Ok(None) => {}
            Ok(Some(HealthEvent::Device(id))) if device_ids.contains(&id) => {
                warn!(device = %id, "Critical error on device, marking unhealthy");
                if !report(&id) {
                    break;
                }
            }
            Ok(Some(HealthEvent::Device(id))) => {
                warn!(device = %id, "Ignoring health event for a device that is not advertised");
            }
            Ok(Some(HealthEvent::Wildcard)) => {
                warn!("Critical error on an unidentified device, marking all devices unhealthy");
                if !device_ids.iter().all(|id| report(id)) {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed waiting for health events: {e:?}");
                backoff(shutdown, settings.error_backoff);
            }
        }
    }

    drop(subscription);
    info!("Device health watch stopped");
}

fn backoff(shutdown: &CancellationToken, delay: Duration) {
    tokio::runtime::Handle::current().block_on(async {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    });
}

/// Applies unhealthy reports to the snapshot until every sender is gone.
///
/// Returns the number of health transitions published.
pub(crate) async fn apply_updates(
    mut unhealthy_rx: mpsc::UnboundedReceiver<String>,
    feed: Arc<SnapshotFeed>,
    resource_name: String,
) -> usize {
    let mut transitions = 0;

    while let Some(id) = unhealthy_rx.recv().await {
        if feed.publish_if_modified(|snapshot| snapshot.mark_unhealthy(&id)) {
            transitions += 1;
            warn!(resource = %resource_name, device = %id, "Device is unhealthy");
        } else {
            debug!(device = %id, "Device already unhealthy");
        }
    }

    debug!(resource = %resource_name, transitions, "Snapshot updater finished");
    transitions
}
