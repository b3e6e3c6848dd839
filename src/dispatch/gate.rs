use crate::monitor::MemoryState;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Admission gate of one run
///
/// A permit is one concurrency slot and is held until the task retires.
/// Workers carry a clone of the gate to watch for critical memory.
#[derive(Clone)]
pub(crate) enum Gate {
    /// At most `n` tasks admitted at once
    Fixed(Arc<Semaphore>),

    /// Like `Fixed`, but admissions also wait while memory is under pressure or critical
    Adaptive {
        slots: Arc<Semaphore>,
        memory: watch::Receiver<MemoryState>,
    },
}

impl Gate {
    pub(crate) fn fixed(permits: usize) -> Self {
        Self::Fixed(Arc::new(Semaphore::new(permits)))
    }

    pub(crate) fn adaptive(permits: usize, memory: watch::Receiver<MemoryState>) -> Self {
        Self::Adaptive {
            slots: Arc::new(Semaphore::new(permits)),
            memory,
        }
    }

    /// Waits until a new task may be admitted
    pub(crate) async fn acquire(&mut self) -> Option<OwnedSemaphorePermit> {
        match self {
            Self::Fixed(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            Self::Adaptive { slots, memory } => {
                let permit = Arc::clone(slots).acquire_owned().await.ok()?;

                let paused = {
                    let state = memory.borrow();
                    state.pressure || state.critical
                };
                if paused {
                    tracing::debug!("Admission paused by memory pressure");
                }
                // A closed channel means sampling stopped, which never blocks admission
                let _ = memory
                    .wait_for(|state| !state.pressure && !state.critical)
                    .await;
                if paused {
                    tracing::debug!("Admission resumed");
                }
                Some(permit)
            }
        }
    }

    /// Whether an admitted task should hand its slot back before the next fetch
    pub(crate) fn is_critical(&self) -> bool {
        match self {
            Self::Fixed(_) => false,
            // The last value of a closed channel is stale
            Self::Adaptive { memory, .. } => {
                memory.has_changed().is_ok() && memory.borrow().critical
            }
        }
    }

    /// Resolves once memory is below the critical level or sampling has stopped
    pub(crate) async fn critical_cleared(&mut self) {
        if let Self::Adaptive { memory, .. } = self {
            let _ = memory.wait_for(|state| !state.critical).await;
        }
    }

    pub(crate) fn available(&self) -> usize {
        match self {
            Self::Fixed(slots) => slots.available_permits(),
            Self::Adaptive { slots, .. } => slots.available_permits(),
        }
    }
}
