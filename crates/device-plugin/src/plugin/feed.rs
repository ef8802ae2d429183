//! Published device snapshot of a session
//!
//! Every `ListAndWatch` subscriber gets its own unbounded queue. The current
//! snapshot and the subscriber list sit behind one lock, so a subscriber sees
//! the snapshot it joined at followed by exactly one snapshot per applied
//! transition, in order.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tracing::debug;

use crate::device::DeviceSnapshot;

struct FeedState {
    current: DeviceSnapshot,
    subscribers: Vec<mpsc::UnboundedSender<DeviceSnapshot>>,
}

pub(crate) struct SnapshotFeed {
    state: Mutex<FeedState>,
}

impl SnapshotFeed {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            state: Mutex::new(FeedState {
                current: snapshot,
                subscribers: Vec::new(),
            }),
        }
    }

    // Snapshot updates cannot leave the state half written, so a poisoned
    // lock still guards a consistent value.
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> DeviceSnapshot {
        self.lock().current.clone()
    }

    /// Registers a subscriber whose queue starts with the current snapshot.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(state.current.clone());
        state.subscribers.push(tx);
        rx
    }

    /// Applies `update` and, when it reports a change, queues the new
    /// snapshot for every live subscriber.
    pub fn publish_if_modified(&self, update: impl FnOnce(&mut DeviceSnapshot) -> bool) -> bool {
        let mut state = self.lock();
        if !update(&mut state.current) {
            return false;
        }

        let snapshot = state.current.clone();
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
        let gone = before - state.subscribers.len();
        if gone > 0 {
            debug!(gone, "Dropped closed snapshot subscribers");
        }
        true
    }

    /// Drops every subscriber queue, ending their streams once drained.
    pub fn close(&self) {
        self.lock().subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}
