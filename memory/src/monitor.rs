use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use pressure::{CurrentPressureLevel, PressureLevel, PressureLevelSource};
use serde::Deserialize;

use crate::source::{MemoryPressureSource, MemoryPressureThresholds};

/// Polling, smoothing and re-notification settings for the monitor.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Polling cadence for the source worker.
    #[serde(rename = "sample_interval_ms", with = "duration_ms")]
    pub sample_interval: Duration,
    /// Minimum time a pressure level must persist before being lowered.
    #[serde(rename = "monotonic_window_ms", with = "duration_ms")]
    pub monotonic_window: Duration,
    /// How often a persisting moderate level is announced again.
    #[serde(rename = "moderate_renotify_interval_ms", with = "duration_ms")]
    pub moderate_renotify_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            monotonic_window: Duration::from_secs(3),
            moderate_renotify_interval: Duration::from_secs(10),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Background monitor that samples a source and dispatches pressure events.
///
/// The worker performs blocking I/O on its own thread. The latest smoothed
/// level is published for lock-free queries from any thread.
#[derive(Debug)]
pub struct MemoryPressureMonitor {
    current: Arc<CurrentPressureLevel>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MemoryPressureMonitor {
    /// Starts sampling `source`; `dispatch` is called on the worker thread
    /// whenever listeners should hear about the current level.
    pub fn start<S, D>(
        mut source: S,
        thresholds: MemoryPressureThresholds,
        config: MonitorConfig,
        dispatch: D,
    ) -> io::Result<Self>
    where
        S: MemoryPressureSource + Send + 'static,
        D: Fn(PressureLevel) + Send + 'static,
    {
        let current = Arc::new(CurrentPressureLevel::default());
        let (stop, stopped) = mpsc::channel();

        let published = Arc::clone(&current);
        let worker = thread::Builder::new()
            .name("memory-pressure-monitor".to_string())
            .spawn(move || {
                let mut smoother = PressureSmoother::new(config.monotonic_window);
                let mut pacer = NotificationPacer::new(config.moderate_renotify_interval);
                loop {
                    if let Some(reading) = source.sample(&thresholds) {
                        let now = Instant::now();
                        let level = smoother.filter(reading.level, now);
                        let previous = published.set(level);
                        if previous != level {
                            info!(
                                "memory pressure {previous} -> {level} ({} per-mille headroom via {:?})",
                                reading.headroom_per_mille, reading.source
                            );
                        }
                        if pacer.should_notify(level, now) {
                            dispatch(level);
                        }
                    }

                    match stopped.recv_timeout(config.sample_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!("memory pressure monitor stopped");
            })?;

        Ok(Self {
            current,
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Shared handle to the published level, for components that outlive
    /// borrowing the monitor.
    pub fn level_handle(&self) -> Arc<CurrentPressureLevel> {
        Arc::clone(&self.current)
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl PressureLevelSource for MemoryPressureMonitor {
    fn current_level(&self) -> PressureLevel {
        self.current.get()
    }
}

impl Drop for MemoryPressureMonitor {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[derive(Debug, Clone, Copy)]
struct PressureSmoother {
    last: PressureLevel,
    last_change: Instant,
    monotonic_window: Duration,
}

impl PressureSmoother {
    fn new(monotonic_window: Duration) -> Self {
        Self {
            last: PressureLevel::None,
            last_change: Instant::now(),
            monotonic_window,
        }
    }

    fn filter(&mut self, next: PressureLevel, now: Instant) -> PressureLevel {
        // Avoid short-interval flapping by only allowing decreases after the window.
        if next > self.last {
            self.last = next;
            self.last_change = now;
            return next;
        }

        if next < self.last && now.duration_since(self.last_change) < self.monotonic_window {
            return self.last;
        }

        if next != self.last {
            self.last = next;
            self.last_change = now;
        }
        next
    }
}

/// Decides when a sampled level should be announced.
///
/// Critical pressure is announced on every sample, moderate pressure on entry
/// and then once per interval while it persists.
#[derive(Debug, Clone, Copy)]
struct NotificationPacer {
    moderate_interval: Duration,
    last_level: PressureLevel,
    last_notified: Option<Instant>,
}

impl NotificationPacer {
    fn new(moderate_interval: Duration) -> Self {
        Self {
            moderate_interval,
            last_level: PressureLevel::None,
            last_notified: None,
        }
    }

    fn should_notify(&mut self, level: PressureLevel, now: Instant) -> bool {
        let changed = level != self.last_level;
        self.last_level = level;

        let due = match level {
            PressureLevel::None => {
                self.last_notified = None;
                return false;
            }
            PressureLevel::Critical => true,
            PressureLevel::Moderate => {
                changed
                    || self
                        .last_notified
                        .map_or(true, |at| now.duration_since(at) >= self.moderate_interval)
            }
        };
        if due {
            self.last_notified = Some(now);
        }
        due
    }
}
