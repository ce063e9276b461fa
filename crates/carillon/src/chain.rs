//! Priority-ordered, vetoable fan-out of ticks
//!
//! Observers run synchronously in descending priority. Any observer can halt
//! the rest of the chain for one tick by returning `false`, which is how a
//! "silent today" override keeps the default striker from running.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use tracing::debug;

use crate::tick::Tick;

/// Something that wants to hear about every quarter-hour.
pub trait Observer: Send + Sync {
    /// Called once per tick. Return `Ok(false)` to stop lower-priority
    /// observers from running for this tick.
    fn on_tick(&self, tick: Tick) -> anyhow::Result<bool>;

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Error type for chain registration
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Subscriber already attached: {0}")]
    DuplicateSubscriber(String),
}

/// What happened during one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Observers that ran (including the one that halted)
    pub invoked: usize,
    /// Name of the observer that stopped the chain, if any
    pub halted_by: Option<String>,
}

struct Entry {
    priority: i64,
    observer: Arc<dyn Observer>,
}

/// Ordered subscriber list shared between the clock thread and setup code.
#[derive(Default)]
pub struct NotificationChain {
    entries: RwLock<Vec<Entry>>,
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    // Compare data pointers only; vtable pointers may differ between codegen units
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl NotificationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer.
    ///
    /// Without a priority the observer goes to the end of the list, one
    /// below the current last entry (0 for an empty chain). To change a
    /// priority, detach and attach again.
    pub fn attach(
        &self,
        observer: Arc<dyn Observer>,
        priority: Option<i64>,
    ) -> Result<(), ChainError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.iter().any(|e| same_observer(&e.observer, &observer)) {
            return Err(ChainError::DuplicateSubscriber(observer.name().to_string()));
        }

        let priority = priority.unwrap_or_else(|| {
            entries.last().map(|e| e.priority - 1).unwrap_or(0)
        });
        debug!("Attaching {} at priority {}", observer.name(), priority);

        entries.push(Entry { priority, observer });
        // Stable: equal priorities keep registration order
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn detach(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter().position(|e| same_observer(&e.observer, observer)) {
            Some(pos) => {
                let removed = entries.remove(pos);
                debug!("Detached {}", removed.observer.name());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Priorities in dispatch order.
    pub fn priorities(&self) -> Vec<i64> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.priority)
            .collect()
    }

    /// Run every observer for `tick` until one halts or fails.
    ///
    /// The list is snapshotted first, so observers may attach or detach
    /// while running; changes take effect on the next tick.
    pub fn dispatch(&self, tick: Tick) -> anyhow::Result<DispatchReport> {
        let snapshot: Vec<Arc<dyn Observer>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| Arc::clone(&e.observer))
            .collect();

        let mut report = DispatchReport {
            invoked: 0,
            halted_by: None,
        };

        for observer in snapshot {
            report.invoked += 1;
            let proceed = observer
                .on_tick(tick)
                .with_context(|| format!("{} failed at {}", observer.name(), tick))?;

            if !proceed {
                debug!("{} halted the chain at {}", observer.name(), tick);
                report.halted_by = Some(observer.name().to_string());
                break;
            }
        }

        Ok(report)
    }
}
