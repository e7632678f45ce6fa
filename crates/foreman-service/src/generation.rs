//! Generation clock and generation-staged service state.
//!
//! A reconcile pass computes new service state before it commits. That state
//! is staged against the pass's generation and only becomes visible once the
//! registry publishes that generation, so every service flips to the new
//! generation at the same instant even though they were reconfigured one
//! after another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Shared counter of the most recently committed generation.
///
/// Generation 0 is the empty registry before the first pass.
#[derive(Debug, Clone, Default)]
pub struct GenerationClock(Arc<AtomicU64>);

impl GenerationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently committed generation.
    pub fn committed(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, generation: u64) {
        self.0.store(generation, Ordering::Release);
    }
}

/// A value with one visible version and at most one staged version.
pub struct Staged<T> {
    clock: GenerationClock,
    slots: RwLock<Slots<T>>,
}

struct Slots<T> {
    visible: Option<Arc<T>>,
    pending: Option<(u64, Arc<T>)>,
}

impl<T> Staged<T> {
    pub fn new(clock: GenerationClock) -> Self {
        Self {
            clock,
            slots: RwLock::new(Slots {
                visible: None,
                pending: None,
            }),
        }
    }

    /// The value as of the committed generation.
    pub fn get(&self) -> Option<Arc<T>> {
        let committed = self.clock.committed();
        let slots = self.slots.read();
        match &slots.pending {
            Some((generation, value)) if *generation <= committed => Some(value.clone()),
            _ => slots.visible.clone(),
        }
    }

    /// The most recently staged value, committed or not.
    ///
    /// Used while a pass commits, to capture the state it produced.
    pub(crate) fn latest(&self) -> Option<Arc<T>> {
        let slots = self.slots.read();
        slots
            .pending
            .as_ref()
            .map(|(_, value)| value.clone())
            .or_else(|| slots.visible.clone())
    }

    /// Stage `value` to become visible when `generation` is committed.
    ///
    /// A previously staged value is promoted if its generation has been
    /// committed, and dropped otherwise.
    pub fn stage(&self, generation: u64, value: T) {
        let committed = self.clock.committed();
        let mut slots = self.slots.write();
        if let Some((staged_at, previous)) = slots.pending.take() {
            if staged_at <= committed {
                slots.visible = Some(previous);
            }
        }
        slots.pending = Some((generation, Arc::new(value)));
    }
}
