use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ebb_controller::{MemoryDomain, PressureController};
use ipc::{ChannelId, ChildEndpoint};
use pressure::{PressureLevel, PressureRegistry};
use util::TaskThread;

const WAIT: Duration = Duration::from_secs(5);

fn record_levels(registry: &PressureRegistry) -> Receiver<PressureLevel> {
    let (tx, levels) = mpsc::channel();
    let tx = Mutex::new(tx);
    registry.register(move |level| {
        let _ = tx.lock().unwrap().send(level);
    });
    levels
}

struct Child {
    id: ChannelId,
    registry: Arc<PressureRegistry>,
    levels: Receiver<PressureLevel>,
    worker: JoinHandle<()>,
}

impl Child {
    fn next_level(&self) -> PressureLevel {
        self.levels.recv_timeout(WAIT).expect("child saw no pressure event")
    }

    fn assert_idle(&self) {
        assert_eq!(self.levels.try_recv().ok(), None);
    }
}

struct Browser {
    io: TaskThread,
    controller: Arc<PressureController>,
    levels: Receiver<PressureLevel>,
}

impl Browser {
    fn new() -> Self {
        let io = TaskThread::spawn("browser-io").unwrap();
        let registry = Arc::new(PressureRegistry::new());
        let levels = record_levels(&registry);
        let controller = PressureController::new(io.runner(), registry);
        Self {
            io,
            controller,
            levels,
        }
    }

    fn spawn_child(&self, raw: u64) -> Child {
        let id = ChannelId::new(raw);
        let registry = Arc::new(PressureRegistry::new());
        let levels = record_levels(&registry);

        let (filter, receiver) = ipc::channel(id);
        let worker = ChildEndpoint::new(Arc::clone(&registry))
            .spawn(&format!("child-{raw}"), receiver)
            .unwrap();
        self.controller.on_channel_attached(filter);
        Child {
            id,
            registry,
            levels,
            worker,
        }
    }

    /// Simulated events travel behind everything sent before them, so seeing
    /// one in every child proves earlier messages were applied.
    fn barrier(&self, children: &[&Child]) {
        self.controller
            .simulate_in_all_processes(PressureLevel::Moderate);
        self.controller.flush();
        assert_eq!(self.levels.recv_timeout(WAIT), Ok(PressureLevel::Moderate));
        for child in children {
            assert_eq!(child.next_level(), PressureLevel::Moderate);
        }
    }

    fn shutdown(self, children: Vec<Child>) {
        for child in &children {
            self.controller.on_channel_detached(child.id);
        }
        self.controller.flush();
        drop(self.controller);
        self.io.shutdown().unwrap();
        for child in children {
            child.worker.join().unwrap();
        }
    }
}

#[test]
fn child_attached_during_suppression_starts_suppressed() {
    let browser = Browser::new();
    let a = browser.spawn_child(1);
    browser.controller.set_suppressed_in_all_processes(true);
    let b = browser.spawn_child(2);
    browser.barrier(&[&a, &b]);

    assert!(browser.controller.registry().is_suppressed());
    assert!(a.registry.is_suppressed());
    assert!(b.registry.is_suppressed());

    browser.controller.set_suppressed_in_all_processes(false);
    browser.barrier(&[&a, &b]);
    assert!(!a.registry.is_suppressed());
    assert!(!b.registry.is_suppressed());

    browser.shutdown(vec![a, b]);
}

#[test]
fn real_notifications_are_withheld_while_suppressed() {
    let browser = Browser::new();
    let a = browser.spawn_child(1);
    let b = browser.spawn_child(2);

    browser.controller.set_suppressed_in_all_processes(true);
    browser.controller.flush();
    browser
        .controller
        .send_pressure_notification(Some(a.id), PressureLevel::Critical);
    browser.controller.registry().notify(PressureLevel::Critical);
    browser.barrier(&[&a, &b]);
    browser.levels.try_recv().unwrap_err();
    a.assert_idle();

    browser.controller.set_suppressed_in_all_processes(false);
    browser
        .controller
        .send_pressure_notification(Some(a.id), PressureLevel::Critical);
    assert_eq!(a.next_level(), PressureLevel::Critical);
    browser.barrier(&[&a, &b]);
    b.assert_idle();

    browser.shutdown(vec![a, b]);
}

#[test]
fn inspector_simulation_reaches_every_process() {
    let browser = Browser::new();
    let a = browser.spawn_child(1);
    let b = browser.spawn_child(2);
    let domain = MemoryDomain::new(Arc::clone(&browser.controller));

    domain.set_pressure_notifications_suppressed(true).unwrap();
    domain.simulate_pressure_notification("critical").unwrap();
    browser.controller.flush();

    assert_eq!(browser.levels.recv_timeout(WAIT), Ok(PressureLevel::Critical));
    assert_eq!(a.next_level(), PressureLevel::Critical);
    assert_eq!(b.next_level(), PressureLevel::Critical);

    assert!(domain.simulate_pressure_notification("extreme").is_err());
    browser.barrier(&[&a, &b]);
    a.assert_idle();

    browser.shutdown(vec![a, b]);
}
