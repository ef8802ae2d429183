//! Event sources feeding the lifecycle supervisor

use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use notify::event::EventKind;
use notify::Config;
use notify::Event;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use crate::error::PluginError;

/// Wake-up reasons for the supervisor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Kubelet recreated its registration socket, i.e. it restarted.
    KubeletRestarted,
    /// The filesystem watcher reported an error.
    WatcherError(String),
    /// Re-synchronize with kubelet (SIGHUP).
    Reload,
    /// Stop serving and exit.
    Terminate(&'static str),
}

/// Watches `dir` and reports a [`SupervisorEvent::KubeletRestarted`] whenever
/// `kubelet_socket` is created inside it. The watch lasts as long as the
/// returned watcher is alive.
pub fn watch_kubelet_socket(
    dir: &Path,
    kubelet_socket: &Path,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> Result<RecommendedWatcher, Report<PluginError>> {
    let kubelet_socket: PathBuf = kubelet_socket.to_path_buf();
    let watcher_error = || PluginError::Watcher { what: "filesystem" };

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => {
                    debug!("Filesystem event: {:?}", event);
                    if !matches!(event.kind, EventKind::Create(_))
                        || !event.paths.iter().any(|path| path == &kubelet_socket)
                    {
                        return;
                    }
                    SupervisorEvent::KubeletRestarted
                }
                Err(e) => SupervisorEvent::WatcherError(e.to_string()),
            };
            // Ignore errors if the supervisor is gone
            let _ = events.send(event);
        },
        Config::default(),
    )
    .change_context_lazy(watcher_error)?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .change_context_lazy(watcher_error)
        .attach_printable_lazy(|| format!("watching {}", dir.display()))?;

    info!("Watching {} for kubelet restarts", dir.display());
    Ok(watcher)
}

/// Forwards SIGHUP as [`SupervisorEvent::Reload`] and SIGINT, SIGTERM and
/// SIGQUIT as [`SupervisorEvent::Terminate`].
pub fn spawn_signal_watcher(
    events: mpsc::UnboundedSender<SupervisorEvent>,
) -> Result<JoinHandle<()>, Report<PluginError>> {
    let signal_error = || PluginError::Watcher { what: "signal" };
    let mut sighup = signal(SignalKind::hangup()).change_context_lazy(signal_error)?;
    let mut sigint = signal(SignalKind::interrupt()).change_context_lazy(signal_error)?;
    let mut sigterm = signal(SignalKind::terminate()).change_context_lazy(signal_error)?;
    let mut sigquit = signal(SignalKind::quit()).change_context_lazy(signal_error)?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = sighup.recv() => SupervisorEvent::Reload,
                _ = sigint.recv() => SupervisorEvent::Terminate("SIGINT"),
                _ = sigterm.recv() => SupervisorEvent::Terminate("SIGTERM"),
                _ = sigquit.recv() => SupervisorEvent::Terminate("SIGQUIT"),
                _ = events.closed() => break,
            };
            if events.send(event).is_err() {
                break;
            }
        }
        debug!("Signal watcher stopped");
    }))
}
