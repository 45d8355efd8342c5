use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, trace, warn};
use pressure::{PressureLevel, PressureLevelSource, PressureListener, PressureRegistry};

use crate::config::FrameBudgetConfig;
use crate::frame::{EvictableFrame, FrameId};
use crate::handles::SharedHandleCounter;

struct FrameState {
    max_saved_frames: usize,
    max_handles: usize,
    /// Evictable frames, most recently unlocked first.
    unlocked: VecDeque<FrameId>,
    /// Pinned frames and their lock counts. Counts are never zero.
    locked: HashMap<FrameId, usize>,
    clients: HashMap<FrameId, Weak<dyn EvictableFrame>>,
}

impl FrameState {
    fn len(&self) -> usize {
        self.unlocked.len() + self.locked.len()
    }

    fn unlocked_position(&self, id: FrameId) -> Option<usize> {
        self.unlocked.iter().position(|entry| *entry == id)
    }

    fn remove(&mut self, id: FrameId) -> bool {
        let was_locked = self.locked.remove(&id).is_some();
        let was_unlocked = match self.unlocked_position(id) {
            Some(index) => self.unlocked.remove(index).is_some(),
            None => false,
        };
        self.clients.remove(&id);
        was_locked || was_unlocked
    }

    fn budget(&self, level: PressureLevel) -> usize {
        // Split so configured budgets near usize::MAX cannot overflow.
        let percent = level.budget_percentage();
        let whole = self.max_saved_frames / 100 * percent;
        let rest = self.max_saved_frames % 100 * percent / 100;
        (whole + rest).max(1)
    }

    /// Caps `limit` so the frames kept would fit in `max_handles`, assuming
    /// every frame costs the current average number of handles.
    fn handle_adjusted(&self, limit: usize, allocated_handles: usize) -> usize {
        let entries = self.len();
        if allocated_handles == 0 || entries == 0 {
            return limit;
        }
        let affordable = self.max_handles.saturating_mul(entries) / allocated_handles;
        limit.min(affordable).max(1)
    }
}

/// Keeps the number of saved frames within a budget that shrinks under
/// memory pressure, evicting the least recently unlocked frames first.
///
/// Locked frames are never evicted. Eviction callbacks run without the
/// internal lock held, so clients may call back into the manager.
pub struct FrameEvictionManager {
    state: Mutex<FrameState>,
    level: Arc<dyn PressureLevelSource>,
    handles: Arc<SharedHandleCounter>,
}

impl FrameEvictionManager {
    pub fn new(
        config: FrameBudgetConfig,
        level: Arc<dyn PressureLevelSource>,
        handles: Arc<SharedHandleCounter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FrameState {
                max_saved_frames: config.max_saved_frames,
                max_handles: config.max_handles,
                unlocked: VecDeque::new(),
                locked: HashMap::new(),
                clients: HashMap::new(),
            }),
            level,
            handles,
        })
    }

    /// Tracks a frame, replacing any previous entry with the same id, then
    /// trims to the current budget.
    pub fn add_frame(&self, id: FrameId, client: &Arc<dyn EvictableFrame>, locked: bool) {
        {
            let mut state = self.state();
            state.remove(id);
            if locked {
                state.locked.insert(id, 1);
            } else {
                state.unlocked.push_front(id);
            }
            state.clients.insert(id, Arc::downgrade(client));
        }
        self.cull(self.max_number_of_saved_frames());
    }

    pub fn remove_frame(&self, id: FrameId) {
        if !self.state().remove(id) {
            trace!("frame {id} is not tracked");
        }
    }

    pub fn lock_frame(&self, id: FrameId) {
        let mut state = self.state();
        if let Some(count) = state.locked.get_mut(&id) {
            *count += 1;
            return;
        }
        let Some(index) = state.unlocked_position(id) else {
            trace!("lock of untracked frame {id} ignored");
            return;
        };
        state.unlocked.remove(index);
        state.locked.insert(id, 1);
    }

    /// Drops one lock. The frame becomes evictable once the last lock is gone.
    pub fn unlock_frame(&self, id: FrameId) {
        {
            let mut state = self.state();
            let Some(count) = state.locked.get_mut(&id) else {
                trace!("unlock of frame {id} ignored, it is not locked");
                return;
            };
            if *count > 1 {
                *count -= 1;
                return;
            }
            state.locked.remove(&id);
            state.unlocked.push_front(id);
        }
        self.cull(self.max_number_of_saved_frames());
    }

    /// Frames allowed at the current pressure level, never less than one.
    pub fn max_number_of_saved_frames(&self) -> usize {
        let level = self.level.current_level();
        self.state().budget(level)
    }

    /// Trims to the budget of `level`. A manager configured for a single
    /// frame is left alone until its next add or unlock.
    pub fn on_memory_pressure(&self, level: PressureLevel) {
        let limit = {
            let state = self.state();
            if state.max_saved_frames <= 1 {
                return;
            }
            state.budget(level)
        };
        self.cull(limit);
    }

    /// Registers with `registry` for as long as the returned listener lives.
    /// The listener does not keep the manager alive.
    pub fn listen(self: &Arc<Self>, registry: &Arc<PressureRegistry>) -> PressureListener {
        let manager = Arc::downgrade(self);
        PressureListener::new(registry, move |level| {
            if let Some(manager) = manager.upgrade() {
                manager.on_memory_pressure(level);
            }
        })
    }

    pub fn set_max_number_of_saved_frames(&self, max_saved_frames: usize) {
        self.state().max_saved_frames = max_saved_frames;
    }

    pub fn set_max_handles(&self, max_handles: usize) {
        self.state().max_handles = max_handles;
    }

    pub fn locked_count(&self) -> usize {
        self.state().locked.len()
    }

    pub fn unlocked_count(&self) -> usize {
        self.state().unlocked.len()
    }

    pub fn has_frame(&self, id: FrameId) -> bool {
        let state = self.state();
        state.locked.contains_key(&id) || state.unlocked_position(id).is_some()
    }

    pub fn is_locked(&self, id: FrameId) -> bool {
        self.state().locked.contains_key(&id)
    }

    fn cull(&self, limit: usize) {
        let limit = self
            .state()
            .handle_adjusted(limit, self.handles.allocated());

        let mut evicted = 0;
        loop {
            let (id, client) = {
                let state = self.state();
                if state.len() <= limit {
                    break;
                }
                let Some(&id) = state.unlocked.back() else {
                    break;
                };
                (id, state.clients.get(&id).and_then(Weak::upgrade))
            };

            // The client is dropped before relocking; its destructor may call back in.
            let responsive = match client {
                Some(client) => {
                    client.evict_current_frame();
                    true
                }
                None => false,
            };

            let mut state = self.state();
            if state.unlocked_position(id).is_some() {
                if responsive {
                    warn!("frame {id} was not removed by its client during eviction");
                } else {
                    debug!("client of frame {id} is gone, dropping its entry");
                }
                state.remove(id);
            }
            evicted += 1;
        }

        if evicted > 0 {
            debug!("evicted {evicted} saved frames to stay within {limit}");
        }
    }

    fn state(&self) -> MutexGuard<'_, FrameState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for FrameEvictionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("FrameEvictionManager")
            .field("max_saved_frames", &state.max_saved_frames)
            .field("max_handles", &state.max_handles)
            .field("locked", &state.locked.len())
            .field("unlocked", &state.unlocked.len())
            .finish()
    }
}
