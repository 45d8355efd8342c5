use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ipc::{ChannelFilter, ChannelId};
use log::{debug, trace};
use pressure::{PressureLevel, PressureRegistry};
use util::TaskRunner;

use crate::channels::ChannelMap;

/// Fans memory pressure control out from the coordinating process to every
/// attached child process.
///
/// All state changes happen on one coordination runner. Public methods called
/// from any other thread re-post themselves onto that runner and return
/// immediately, so callers never block on the channel map.
pub struct PressureController {
    runner: TaskRunner,
    registry: Arc<PressureRegistry>,
    channels: Mutex<ChannelMap>,
}

impl PressureController {
    /// `registry` is the coordinating process's own listener registry.
    pub fn new(runner: TaskRunner, registry: Arc<PressureRegistry>) -> Arc<Self> {
        Arc::new(Self {
            runner,
            registry,
            channels: Mutex::new(ChannelMap::default()),
        })
    }

    pub fn registry(&self) -> &Arc<PressureRegistry> {
        &self.registry
    }

    /// Starts tracking a child channel. A child attaching while notifications
    /// are suppressed is told so right away.
    ///
    /// # Panics
    ///
    /// Panics on the coordination runner if the channel id is already attached.
    pub fn on_channel_attached(self: &Arc<Self>, filter: ChannelFilter) {
        let filter = Arc::new(filter);
        self.attach(filter);
    }

    fn attach(self: &Arc<Self>, filter: Arc<ChannelFilter>) {
        let deferred = Arc::clone(&filter);
        if !self.ensure_on_runner(move |this| this.attach(deferred)) {
            return;
        }

        debug!("memory channel {} attached", filter.id());
        self.channels().insert(Arc::clone(&filter));
        if self.registry.is_suppressed() {
            filter.send_set_suppressed(true);
        }
    }

    /// Stops tracking a child channel.
    ///
    /// # Panics
    ///
    /// Panics on the coordination runner if the channel was never attached.
    pub fn on_channel_detached(self: &Arc<Self>, id: ChannelId) {
        if !self.ensure_on_runner(move |this| this.on_channel_detached(id)) {
            return;
        }

        self.channels().remove(id);
        debug!("memory channel {id} detached");
    }

    /// Switches suppression of real notifications in this process and in
    /// every attached child. The switch itself is never suppressed. Children
    /// only hear about actual transitions.
    pub fn set_suppressed_in_all_processes(self: &Arc<Self>, suppressed: bool) {
        if !self.ensure_on_runner(move |this| this.set_suppressed_in_all_processes(suppressed)) {
            return;
        }

        if !self.registry.set_suppressed(suppressed) {
            trace!("pressure suppression already {suppressed}");
            return;
        }
        for filter in self.channels().snapshot() {
            filter.send_set_suppressed(suppressed);
        }
    }

    /// Delivers a synthetic notification here and in every child, regardless
    /// of suppression.
    ///
    /// # Panics
    ///
    /// Panics if `level` is [`PressureLevel::None`].
    pub fn simulate_in_all_processes(self: &Arc<Self>, level: PressureLevel) {
        assert_ne!(level, PressureLevel::None, "cannot simulate the none level");
        if !self.ensure_on_runner(move |this| this.simulate_in_all_processes(level)) {
            return;
        }

        self.registry.simulate(level);
        let filters = self.channels().snapshot();
        debug!("simulating {level} pressure in {} child processes", filters.len());
        for filter in filters {
            filter.send_simulate(level);
        }
    }

    /// Forwards a real notification to one child.
    ///
    /// Dropped while suppressed or when `channel` is unknown. Passing `None`
    /// addresses no child; the caller notifies its own process directly.
    ///
    /// # Panics
    ///
    /// Panics if `level` is [`PressureLevel::None`].
    pub fn send_pressure_notification(
        self: &Arc<Self>,
        channel: Option<ChannelId>,
        level: PressureLevel,
    ) {
        assert_ne!(level, PressureLevel::None, "cannot notify the none level");
        if !self.ensure_on_runner(move |this| this.send_pressure_notification(channel, level)) {
            return;
        }

        if self.registry.is_suppressed() {
            trace!("{level} notification for channel {channel:?} suppressed");
            return;
        }
        let Some(id) = channel else {
            return;
        };
        // A child may detach while a notification for it is in flight.
        let Some(filter) = self.channels().get(id) else {
            trace!("{level} notification for detached channel {id} dropped");
            return;
        };
        filter.send_notify(level);
    }

    /// Blocks until work already posted to the coordination runner has run.
    pub fn flush(&self) {
        self.runner.flush();
    }

    pub fn attached_channel_count(&self) -> usize {
        self.channels().len()
    }

    /// Returns true when the caller is on the coordination runner. Otherwise
    /// posts `task` there and returns false.
    fn ensure_on_runner<F>(self: &Arc<Self>, task: F) -> bool
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        if self.runner.runs_tasks_on_current_thread() {
            return true;
        }
        let this = Arc::clone(self);
        self.runner.post(move || task(&this));
        false
    }

    fn channels(&self) -> MutexGuard<'_, ChannelMap> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for PressureController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PressureController")
            .field("runner", &self.runner)
            .field("channels", &self.attached_channel_count())
            .field("suppressed", &self.registry.is_suppressed())
            .finish()
    }
}
