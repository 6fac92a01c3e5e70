use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::{BTreeSet, BinaryHeap},
};

/// A callback type that can be scheduled.
pub type EventFn = Box<dyn FnOnce()>;

/// Opaque reservation for a scheduled event.
///
/// Handles stay valid after the event fires; cancelling a fired or
/// already-cancelled handle is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventHandle(u64);

struct Event {
    time: f64,
    id: u64,
    event: EventFn,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        other.time == self.time && other.id == self.id
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on time; equal timestamps run in schedule order.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An event loop implementation for discrete time simulation.
///
/// Single-threaded and cooperative: callbacks run to completion, one at a
/// time, and suspension happens only at event boundaries. The loop is shared
/// across components behind an `Rc`, so every method takes `&self`.
pub struct EventLoop {
    events: RefCell<BinaryHeap<Event>>,
    pending_events: RefCell<BTreeSet<u64>>,
    cancelled_events: RefCell<BTreeSet<u64>>,
    event_id: Cell<u64>,
    now: Cell<f64>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self {
            events: RefCell::new(BinaryHeap::new()),
            pending_events: RefCell::new(BTreeSet::new()),
            cancelled_events: RefCell::new(BTreeSet::new()),
            event_id: Cell::new(0),
            now: Cell::new(0.0),
        }
    }
}

impl EventLoop {
    /// Creates a new event loop starting at simulated time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> f64 {
        self.now.get()
    }

    /// Schedules a new event `delay` seconds from now.
    pub fn schedule(&self, delay: f64, event: EventFn) -> EventHandle {
        debug_assert!(delay >= 0.0, "events cannot be scheduled in the past");

        let id = self.event_id.get();
        self.event_id.set(id + 1);

        self.events.borrow_mut().push(Event {
            time: self.now.get() + delay,
            id,
            event,
        });
        self.pending_events.borrow_mut().insert(id);

        EventHandle(id)
    }

    /// Cancels the event behind `handle`. Idempotent.
    pub fn cancel(&self, handle: EventHandle) {
        if self.pending_events.borrow_mut().remove(&handle.0) {
            self.cancelled_events.borrow_mut().insert(handle.0);
        }
    }

    /// Runs the next event in the loop.
    ///
    /// Returns `false` once the queue is empty. A cancelled entry consumes
    /// the step without running its callback.
    pub fn advance(&self) -> bool {
        let event = {
            let mut events = self.events.borrow_mut();

            let Some(event) = events.pop() else {
                return false;
            };

            self.pending_events.borrow_mut().remove(&event.id);
            self.now.set(event.time);

            if self.cancelled_events.borrow_mut().remove(&event.id) {
                return true;
            }

            event
        };

        (event.event)();
        true
    }

    /// Runs events until the queue drains.
    pub fn run_until_idle(&self) {
        while self.advance() {}
    }

    /// Runs every event with a timestamp at or before `deadline`.
    pub fn run_until(&self, deadline: f64) {
        loop {
            let next = self.events.borrow().peek().map(|event| event.time);
            match next {
                Some(time) if time <= deadline => {
                    self.advance();
                }
                _ => return,
            }
        }
    }

    /// Returns number of pending (non-cancelled) events.
    pub fn pending_count(&self) -> usize {
        self.pending_events.borrow().len()
    }
}
