use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use util::{IdGenerator, TaskRunner};

use crate::level::PressureLevel;

/// Callback invoked with the broadcast pressure level.
pub type PressureCallback = Box<dyn Fn(PressureLevel) + Send + Sync + 'static>;

/// Identifier returned when registering a listener.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ListenerSlot {
    active: AtomicBool,
    callback: PressureCallback,
    sync_callback: Option<PressureCallback>,
}

impl ListenerSlot {
    fn deliver(&self, level: PressureLevel) {
        if self.active.load(Ordering::Acquire) {
            (self.callback)(level);
        }
    }

    fn deliver_sync(&self, level: PressureLevel) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if let Some(sync_callback) = &self.sync_callback {
            sync_callback(level);
        }
    }
}

struct Registration {
    id: ListenerId,
    slot: Arc<ListenerSlot>,
    // Thread the listener registered from, when that thread runs a task queue.
    runner: Option<TaskRunner>,
}

/// Process-wide fan-out list of pressure listeners.
///
/// Broadcasting snapshots the list and releases the lock before invoking any
/// callback, so callbacks may register or unregister listeners freely. A
/// listener unregistered before its delivery runs is never invoked.
pub struct PressureRegistry {
    listeners: Mutex<Vec<Registration>>,
    ids: IdGenerator,
    suppressed: AtomicBool,
}

impl PressureRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            ids: IdGenerator::default(),
            suppressed: AtomicBool::new(false),
        }
    }

    /// Registers `callback`, delivered on the calling thread's task runner
    /// when there is one, otherwise inline on the broadcasting thread.
    pub fn register<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(PressureLevel) + Send + Sync + 'static,
    {
        self.insert(Box::new(callback), None)
    }

    /// Like [`register`](Self::register), with an extra callback that always
    /// runs inline on the broadcasting thread.
    pub fn register_with_sync<F, S>(&self, callback: F, sync_callback: S) -> ListenerId
    where
        F: Fn(PressureLevel) + Send + Sync + 'static,
        S: Fn(PressureLevel) + Send + Sync + 'static,
    {
        self.insert(Box::new(callback), Some(Box::new(sync_callback)))
    }

    fn insert(
        &self,
        callback: PressureCallback,
        sync_callback: Option<PressureCallback>,
    ) -> ListenerId {
        let id = ListenerId(self.ids.next());
        let slot = Arc::new(ListenerSlot {
            active: AtomicBool::new(true),
            callback,
            sync_callback,
        });
        self.lock().push(Registration {
            id,
            slot,
            runner: TaskRunner::current(),
        });
        id
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn unregister(&self, id: ListenerId) {
        let mut listeners = self.lock();
        if let Some(index) = listeners.iter().position(|entry| entry.id == id) {
            let entry = listeners.swap_remove(index);
            entry.slot.active.store(false, Ordering::Release);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Delivers `level` to every registered listener exactly once.
    ///
    /// # Panics
    ///
    /// Panics if `level` is [`PressureLevel::None`].
    pub fn broadcast(&self, level: PressureLevel) {
        assert_ne!(level, PressureLevel::None, "cannot broadcast the none level");

        let snapshot: Vec<(Arc<ListenerSlot>, Option<TaskRunner>)> = self
            .lock()
            .iter()
            .map(|entry| (Arc::clone(&entry.slot), entry.runner.clone()))
            .collect();
        debug!("broadcasting {level} pressure to {} listeners", snapshot.len());

        for (slot, runner) in &snapshot {
            match runner {
                Some(runner) if !runner.runs_tasks_on_current_thread() => {
                    let slot = Arc::clone(slot);
                    runner.post(move || slot.deliver(level));
                }
                _ => slot.deliver(level),
            }
        }

        for (slot, _) in &snapshot {
            slot.deliver_sync(level);
        }
    }

    /// Delivers a real pressure notification unless notifications are suppressed.
    pub fn notify(&self, level: PressureLevel) {
        if self.is_suppressed() {
            trace!("{level} pressure notification suppressed");
            return;
        }
        self.broadcast(level);
    }

    /// Delivers `level` even while real notifications are suppressed.
    pub fn simulate(&self, level: PressureLevel) {
        self.broadcast(level);
    }

    /// Returns whether the flag actually changed.
    pub fn set_suppressed(&self, suppressed: bool) -> bool {
        let previous = self.suppressed.swap(suppressed, Ordering::AcqRel);
        if previous == suppressed {
            return false;
        }
        debug!("pressure notifications suppressed: {suppressed}");
        true
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        // Callbacks never run under this lock, so poisoning cannot leave the
        // list half-updated.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for PressureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PressureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PressureRegistry")
            .field("listeners", &self.listener_count())
            .field("suppressed", &self.is_suppressed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use util::TaskThread;

    fn recorder(registry: &PressureRegistry) -> (ListenerId, Arc<Mutex<Vec<PressureLevel>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = registry.register(move |level| sink.lock().unwrap().push(level));
        (id, seen)
    }

    #[test]
    fn broadcast_reaches_each_listener_once() {
        let registry = PressureRegistry::new();
        let (_, first) = recorder(&registry);
        let (_, second) = recorder(&registry);

        registry.broadcast(PressureLevel::Moderate);
        registry.broadcast(PressureLevel::Critical);

        let expected = vec![PressureLevel::Moderate, PressureLevel::Critical];
        assert_eq!(*first.lock().unwrap(), expected);
        assert_eq!(*second.lock().unwrap(), expected);
    }

    #[test]
    fn unregistered_listener_is_not_invoked() {
        let registry = PressureRegistry::new();
        let (id, seen) = recorder(&registry);
        let (_, kept) = recorder(&registry);

        registry.unregister(id);
        registry.broadcast(PressureLevel::Critical);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(kept.lock().unwrap().len(), 1);
        assert_eq!(registry.listener_count(), 1);

        // Unknown ids are a no-op.
        registry.unregister(id);
    }

    #[test]
    #[should_panic(expected = "none level")]
    fn broadcasting_none_panics() {
        PressureRegistry::new().broadcast(PressureLevel::None);
    }

    #[test]
    fn suppression_swallows_notify_but_not_simulate() {
        let registry = PressureRegistry::new();
        let (_, seen) = recorder(&registry);

        assert!(registry.set_suppressed(true));
        assert!(!registry.set_suppressed(true));
        registry.notify(PressureLevel::Critical);
        assert!(seen.lock().unwrap().is_empty());

        registry.simulate(PressureLevel::Moderate);
        assert_eq!(*seen.lock().unwrap(), vec![PressureLevel::Moderate]);

        assert!(registry.set_suppressed(false));
        registry.notify(PressureLevel::Critical);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![PressureLevel::Moderate, PressureLevel::Critical]
        );
    }

    #[test]
    fn listener_added_during_broadcast_waits_for_the_next_one() {
        let registry = Arc::new(PressureRegistry::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner_registry = Arc::clone(&registry);
        let inner_calls = Arc::clone(&late_calls);
        registry.register(move |_| {
            let calls = Arc::clone(&inner_calls);
            inner_registry.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        });

        registry.broadcast(PressureLevel::Moderate);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        registry.broadcast(PressureLevel::Moderate);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_removed_by_an_earlier_callback_is_skipped() {
        let registry = Arc::new(PressureRegistry::new());
        let victim_calls = Arc::new(AtomicUsize::new(0));
        let victim_id = Arc::new(Mutex::new(None));

        let inner_registry = Arc::clone(&registry);
        let inner_id = Arc::clone(&victim_id);
        registry.register(move |_| {
            if let Some(id) = *inner_id.lock().unwrap() {
                inner_registry.unregister(id);
            }
        });
        let calls = Arc::clone(&victim_calls);
        let id = registry.register(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        *victim_id.lock().unwrap() = Some(id);

        registry.broadcast(PressureLevel::Critical);
        assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delivery_happens_on_the_registering_runner() {
        let registry = Arc::new(PressureRegistry::new());
        let thread = TaskThread::spawn("listener-thread").unwrap();
        let runner = thread.runner();
        let (tx, rx) = mpsc::channel();

        let inner_registry = Arc::clone(&registry);
        runner.post(move || {
            let tx = Mutex::new(tx);
            inner_registry.register(move |level| {
                let on_runner = TaskRunner::current()
                    .map(|runner| runner.name() == "listener-thread")
                    .unwrap_or(false);
                tx.lock().unwrap().send((level, on_runner)).unwrap();
            });
        });
        runner.flush();

        registry.broadcast(PressureLevel::Critical);
        runner.flush();

        assert_eq!(rx.try_recv().unwrap(), (PressureLevel::Critical, true));
    }

    #[test]
    fn posted_delivery_is_dropped_after_unregister() {
        let registry = Arc::new(PressureRegistry::new());
        let thread = TaskThread::spawn("late-unregister").unwrap();
        let runner = thread.runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let (id_tx, id_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        let inner_registry = Arc::clone(&registry);
        let inner_calls = Arc::clone(&calls);
        runner.post(move || {
            let id = inner_registry.register(move |_| {
                inner_calls.fetch_add(1, Ordering::SeqCst);
            });
            id_tx.send(id).unwrap();
        });
        let id = id_rx.recv().unwrap();

        // Hold the runner busy so the delivery stays queued.
        runner.post(move || {
            let _ = gate_rx.recv();
        });
        registry.broadcast(PressureLevel::Moderate);
        registry.unregister(id);
        gate_tx.send(()).unwrap();
        runner.flush();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_churn_on_other_threads_during_broadcasts() {
        const BROADCASTS: usize = 200;
        const WORKERS: usize = 4;
        const CYCLES: usize = 50;

        let registry = Arc::new(PressureRegistry::new());
        let stable = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stable);
        registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let start = Arc::new(std::sync::Barrier::new(WORKERS + 1));
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    (0..CYCLES)
                        .map(|_| {
                            let calls = Arc::new(AtomicUsize::new(0));
                            let counter = Arc::clone(&calls);
                            let id = registry.register(move |_| {
                                counter.fetch_add(1, Ordering::SeqCst);
                            });
                            std::thread::yield_now();
                            registry.unregister(id);
                            calls
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        start.wait();
        for _ in 0..BROADCASTS {
            registry.broadcast(PressureLevel::Moderate);
        }
        let churned: Vec<Arc<AtomicUsize>> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();

        assert_eq!(stable.load(Ordering::SeqCst), BROADCASTS);
        assert_eq!(registry.listener_count(), 1);
        for calls in &churned {
            assert!(calls.load(Ordering::SeqCst) <= BROADCASTS);
        }

        let before: Vec<usize> = churned
            .iter()
            .map(|calls| calls.load(Ordering::SeqCst))
            .collect();
        registry.broadcast(PressureLevel::Critical);
        let after: Vec<usize> = churned
            .iter()
            .map(|calls| calls.load(Ordering::SeqCst))
            .collect();
        assert_eq!(before, after);
        assert_eq!(stable.load(Ordering::SeqCst), BROADCASTS + 1);
    }

    #[test]
    fn sync_callbacks_run_inline() {
        let registry = PressureRegistry::new();
        let sync_seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sync_seen);
        registry.register_with_sync(
            |_| {},
            move |level| {
                assert_eq!(level, PressureLevel::Critical);
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        registry.broadcast(PressureLevel::Critical);
        assert_eq!(sync_seen.load(Ordering::SeqCst), 1);
    }
}
