//! Progress events for set and unit state changes
//!
//! Events are delivered synchronously, in the order the transitions happen,
//! to registered [`ProgressObserver`]s and to channel subscribers. Observers
//! attached after an event was emitted never see it.

use crate::lock_unpoisoned;
use crate::types::{ResultInfo, SetState, UnitRef, UnitState};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A single state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    SetStateChanged {
        set_id: Uuid,
        state: SetState,
    },
    UnitStateChanged {
        set_id: Uuid,
        unit: UnitRef,
        state: UnitState,
        result: ResultInfo,
    },
}

impl ChangeEvent {
    pub fn set_id(&self) -> Uuid {
        match self {
            Self::SetStateChanged { set_id, .. } | Self::UnitStateChanged { set_id, .. } => *set_id,
        }
    }
}

/// Receives progress updates during an operation
///
/// Called on whichever thread made the transition; implementations must not
/// block for long.
pub trait ProgressObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event);
    }
}

#[derive(Default)]
struct Listeners {
    observers: Vec<Arc<dyn ProgressObserver>>,
    subscribers: Vec<Sender<ChangeEvent>>,
}

/// Fans events out to observers and subscribers
///
/// A single lock is held while an event is delivered so that every listener
/// sees the same total order.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Listeners>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        lock_unpoisoned(&self.listeners).observers.push(observer);
    }

    /// Subscribe to future events through a channel
    ///
    /// Dropping the receiver unsubscribes on the next emitted event.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock_unpoisoned(&self.listeners).subscribers.push(tx);
        rx
    }

    pub fn emit(&self, event: ChangeEvent) {
        let mut listeners = lock_unpoisoned(&self.listeners);
        for observer in &listeners.observers {
            observer.on_change(&event);
        }
        listeners.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn set_state(&self, set_id: Uuid, state: SetState) {
        log::debug!("set {set_id} -> {state:?}");
        self.emit(ChangeEvent::SetStateChanged { set_id, state });
    }

    pub(crate) fn unit_state(&self, set_id: Uuid, unit: UnitRef, state: UnitState, result: ResultInfo) {
        log::debug!("unit {unit} -> {state}");
        self.emit(ChangeEvent::UnitStateChanged {
            set_id,
            unit,
            state,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_late_observer_misses_earlier_events() {
        let emitter = EventEmitter::new();
        let set_id = Uuid::new_v4();
        let early = emitter.subscribe();

        emitter.set_state(set_id, SetState::InProgress);
        let late = emitter.subscribe();
        emitter.set_state(set_id, SetState::Completed);

        assert_eq!(early.try_iter().count(), 2);
        let late_events: Vec<_> = late.try_iter().collect();
        assert_eq!(
            late_events,
            vec![ChangeEvent::SetStateChanged {
                set_id,
                state: SetState::Completed
            }]
        );
    }

    #[test]
    fn test_closure_observer() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        emitter.add_observer(Arc::new(move |_: &ChangeEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        emitter.set_state(Uuid::new_v4(), SetState::InProgress);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let emitter = EventEmitter::new();
        drop(emitter.subscribe());
        emitter.set_state(Uuid::new_v4(), SetState::InProgress);
        assert!(lock_unpoisoned(&emitter.listeners).subscribers.is_empty());
    }
}
