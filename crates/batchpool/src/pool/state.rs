use portable_atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`WorkerPool`](crate::WorkerPool).
///
/// Transitions only move forward:
/// `Created -> Running -> (Draining ->) Stopped`, or `Created -> Stopped` when
/// a pool is stopped without ever being started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolState {
    /// Constructed, no workers yet.
    Created = 0,
    /// Workers are claiming and executing items.
    Running = 1,
    /// Intake is closed; workers are finishing the queued items.
    Draining = 2,
    /// Workers have exited and the queues are closed.
    Stopped = 3,
}

impl PoolState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Atomic cell holding a [`PoolState`].
#[derive(Debug)]
pub(crate) struct AtomicPoolState(AtomicU8);

impl AtomicPoolState {
    pub(crate) const fn new(state: PoolState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> PoolState {
        PoolState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replaces the state, returning the previous one.
    pub(crate) fn swap(&self, state: PoolState) -> PoolState {
        PoolState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Moves from `current` to `new`. On failure returns the observed state.
    pub(crate) fn transition(&self, current: PoolState, new: PoolState) -> Result<(), PoolState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PoolState::from_u8)
    }
}
