//! In-memory backend implementing the device traits
//!
//! Used by unit and integration tests, and by `--backend mock` for dry runs on
//! machines without accelerators.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

use error_stack::Report;

use super::traits::AllocationPathResolver;
use super::traits::DeviceAllocation;
use super::traits::DeviceError;
use super::traits::DeviceInventory;
use super::traits::DeviceResult;
use super::traits::HealthEvent;
use super::traits::HealthEventSource;
use super::traits::HealthSubscription;
use super::traits::Subscription;
use super::types::DeviceRecord;

#[derive(Default)]
struct EventQueue {
    events: VecDeque<HealthEvent>,
    failing_waits: usize,
}

#[derive(Default)]
struct Shared {
    devices: Mutex<Vec<DeviceRecord>>,
    allocations: Mutex<HashMap<String, DeviceAllocation>>,
    rejected: Mutex<HashSet<String>>,
    inventory_error: Mutex<bool>,
    queue: Mutex<EventQueue>,
    queue_ready: Condvar,
    active_subscriptions: AtomicUsize,
    total_subscriptions: AtomicUsize,
    enumerations: AtomicUsize,
}

/// Mock backend. Clones share state, so a test can keep a handle while the plugin owns another.
#[derive(Clone, Default)]
pub struct MockDevices {
    shared: Arc<Shared>,
}

impl MockDevices {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        let mock = Self::default();
        mock.set_devices(devices);
        mock
    }

    /// Healthy devices named by `ids`, each resolving to `/dev/hl<n>` with index and module `n`.
    pub fn with_ids(ids: &[&str]) -> Self {
        let mock = Self::new(ids.iter().map(|id| DeviceRecord::healthy(*id)).collect());
        for (n, id) in ids.iter().enumerate() {
            let n = n as u32;
            mock.set_allocation(
                id,
                DeviceAllocation {
                    host_paths: vec![format!("/dev/hl{n}"), format!("/dev/hl_controlD{n}")],
                    device_index: Some(n),
                    module_index: Some(n),
                },
            );
        }
        mock
    }

    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        *self.shared.devices.lock().unwrap() = devices;
    }

    pub fn set_allocation(&self, id: &str, allocation: DeviceAllocation) {
        self.shared
            .allocations
            .lock()
            .unwrap()
            .insert(id.to_string(), allocation);
    }

    /// Makes subscription of `id` fail, as a device that cannot register for events would.
    pub fn reject_subscription(&self, id: &str) {
        self.shared.rejected.lock().unwrap().insert(id.to_string());
    }

    /// Enable or disable error mode for enumeration
    pub fn set_inventory_error(&self, enabled: bool) {
        *self.shared.inventory_error.lock().unwrap() = enabled;
    }

    /// Makes the next `count` waits fail.
    pub fn fail_next_waits(&self, count: usize) {
        self.shared.queue.lock().unwrap().failing_waits = count;
    }

    pub fn emit(&self, event: HealthEvent) {
        self.shared.queue.lock().unwrap().events.push_back(event);
        self.shared.queue_ready.notify_all();
    }

    pub fn active_subscriptions(&self) -> usize {
        self.shared.active_subscriptions.load(Ordering::SeqCst)
    }

    pub fn total_subscriptions(&self) -> usize {
        self.shared.total_subscriptions.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.shared.enumerations.load(Ordering::SeqCst)
    }
}

impl DeviceInventory for MockDevices {
    fn enumerate(&self) -> DeviceResult<Vec<DeviceRecord>> {
        self.shared.enumerations.fetch_add(1, Ordering::SeqCst);
        if *self.shared.inventory_error.lock().unwrap() {
            return Err(Report::new(DeviceError::Enumerate).attach_printable("mock error mode"));
        }
        Ok(self.shared.devices.lock().unwrap().clone())
    }
}

struct MockSubscription {
    shared: Arc<Shared>,
}

impl HealthSubscription for MockSubscription {
    fn wait_next(&mut self, timeout: Duration) -> DeviceResult<Option<HealthEvent>> {
        let queue = self.shared.queue.lock().unwrap();
        let (mut queue, _) = self
            .shared
            .queue_ready
            .wait_timeout_while(queue, timeout, |q| q.events.is_empty() && q.failing_waits == 0)
            .unwrap();

        if queue.failing_waits > 0 {
            queue.failing_waits -= 1;
            return Err(Report::new(DeviceError::Wait).attach_printable("injected wait failure"));
        }
        Ok(queue.events.pop_front())
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.shared.active_subscriptions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HealthEventSource for MockDevices {
    fn subscribe(&self, device_ids: &[String]) -> DeviceResult<Subscription> {
        let rejected_ids = self.shared.rejected.lock().unwrap();
        let rejected = device_ids
            .iter()
            .filter(|id| rejected_ids.contains(*id))
            .map(|id| (id.clone(), "mock rejected subscription".to_string()))
            .collect();

        self.shared.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        self.shared.total_subscriptions.fetch_add(1, Ordering::SeqCst);

        Ok(Subscription {
            handle: Box::new(MockSubscription {
                shared: self.shared.clone(),
            }),
            rejected,
        })
    }
}

impl AllocationPathResolver for MockDevices {
    fn resolve(&self, device_id: &str) -> DeviceResult<DeviceAllocation> {
        self.shared
            .allocations
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| {
                Report::new(DeviceError::Query {
                    id: device_id.to_string(),
                })
            })
    }
}
