use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use controller::PressureController;
use frames::{EvictableFrame, FrameEvictionManager, FrameId, SharedHandleCounter};
use ipc::{ChannelId, ChildEndpoint};
use log::{debug, info};
use pressure::{PressureLevel, PressureListener, PressureRegistry};
use util::{IdGenerator, TaskThread};

/// Pressure events one process saw before shutdown.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Observation {
    pub process: String,
    pub events: usize,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} pressure event(s)", self.process, self.events)
    }
}

/// Registry plus a listener that logs and counts what reaches it.
struct ObservedRegistry {
    name: String,
    registry: Arc<PressureRegistry>,
    events: Arc<AtomicUsize>,
    _listener: PressureListener,
}

impl ObservedRegistry {
    fn new(name: String) -> Self {
        let registry = Arc::new(PressureRegistry::new());
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        let label = name.clone();
        let listener = PressureListener::new(&registry, move |level| {
            counter.fetch_add(1, Ordering::SeqCst);
            info!("{label} observed {level} memory pressure");
        });
        Self {
            name,
            registry,
            events,
            _listener: listener,
        }
    }

    fn observation(&self) -> Observation {
        Observation {
            process: self.name.clone(),
            events: self.events.load(Ordering::SeqCst),
        }
    }
}

/// In-process stand-in for a renderer: its own registry fed by a channel
/// endpoint running on a dedicated thread.
struct ChildProcess {
    id: ChannelId,
    observed: ObservedRegistry,
    worker: JoinHandle<()>,
}

/// The coordinating process and the children attached to it.
pub struct Browser {
    io: TaskThread,
    observed: ObservedRegistry,
    controller: Arc<PressureController>,
    children: Vec<ChildProcess>,
    // Shared with dispatchers so children spawned later still get notified.
    attached: Arc<Mutex<Vec<ChannelId>>>,
    channel_ids: IdGenerator,
}

impl Browser {
    pub fn start() -> Result<Self> {
        let io = TaskThread::spawn("ebb-io").context("failed to start the coordination thread")?;
        let observed = ObservedRegistry::new("browser".to_string());
        let controller = PressureController::new(io.runner(), Arc::clone(&observed.registry));
        Ok(Self {
            io,
            observed,
            controller,
            children: Vec::new(),
            attached: Arc::default(),
            channel_ids: IdGenerator::default(),
        })
    }

    pub fn spawn_children(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let id = ChannelId::new(self.channel_ids.next());
            let name = format!("child-{id}");
            let observed = ObservedRegistry::new(name.clone());
            let (filter, receiver) = ipc::channel(id);
            let worker = ChildEndpoint::new(Arc::clone(&observed.registry))
                .spawn(&name, receiver)
                .with_context(|| format!("failed to start {name}"))?;
            self.controller.on_channel_attached(filter);
            lock(&self.attached).push(id);
            self.children.push(ChildProcess {
                id,
                observed,
                worker,
            });
        }
        debug!("{} child processes attached", self.children.len());
        Ok(())
    }

    pub fn controller(&self) -> &Arc<PressureController> {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<PressureRegistry> {
        &self.observed.registry
    }

    /// Routes a real pressure event to this process and every child attached
    /// at the time of the event.
    pub fn dispatcher(&self) -> impl Fn(PressureLevel) + Send + 'static {
        let registry = Arc::clone(self.registry());
        let controller = Arc::clone(&self.controller);
        let attached = Arc::clone(&self.attached);
        move |level| {
            registry.notify(level);
            let channels = lock(&attached).clone();
            for id in channels {
                controller.send_pressure_notification(Some(id), level);
            }
        }
    }

    /// Detaches every child, drains their channels and reports what each
    /// process observed.
    pub fn shutdown(self) -> Result<Vec<Observation>> {
        let Self {
            io,
            observed,
            controller,
            children,
            attached,
            ..
        } = self;

        lock(&attached).clear();
        for child in &children {
            controller.on_channel_detached(child.id);
        }
        controller.flush();
        drop(controller);
        io.shutdown().map_err(|_| anyhow!("coordination thread panicked"))?;

        let mut report = vec![observed.observation()];
        for child in children {
            child
                .worker
                .join()
                .map_err(|_| anyhow!("{} endpoint panicked", child.observed.name))?;
            report.push(child.observed.observation());
        }
        Ok(report)
    }
}

fn lock(attached: &Mutex<Vec<ChannelId>>) -> MutexGuard<'_, Vec<ChannelId>> {
    attached
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Placeholder for a renderer's saved frame, backed by one shared handle.
struct SavedFrame {
    id: FrameId,
    manager: Weak<FrameEvictionManager>,
    handles: Arc<SharedHandleCounter>,
}

impl EvictableFrame for SavedFrame {
    fn evict_current_frame(&self) {
        info!("evicting saved frame {}", self.id);
        self.handles.release(1);
        if let Some(manager) = self.manager.upgrade() {
            manager.remove_frame(self.id);
        }
    }
}

/// Fills `manager` with `count` unlocked frames. The returned clients must be
/// kept alive for as long as their frames should be tracked.
pub fn populate_frames(
    manager: &Arc<FrameEvictionManager>,
    handles: &Arc<SharedHandleCounter>,
    count: usize,
) -> Vec<Arc<dyn EvictableFrame>> {
    let ids = IdGenerator::default();
    (0..count)
        .map(|_| {
            let id = FrameId::new(ids.next());
            handles.allocate(1);
            let frame: Arc<dyn EvictableFrame> = Arc::new(SavedFrame {
                id,
                manager: Arc::downgrade(manager),
                handles: Arc::clone(handles),
            });
            manager.add_frame(id, &frame, false);
            frame
        })
        .collect()
}
