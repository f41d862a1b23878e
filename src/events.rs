//! Round completion and failure notices, per session.

use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::cmp;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoundComplete,
    RoundError,
    TransportError,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub session: String,
    /// Reporting party; `None` when an inbound payload could not be attributed.
    pub party: Option<usize>,
    pub kind: EventKind,
    pub message: String,
    pub occurred_at: Instant,
}

impl Event {
    pub fn new(session: &str, party: Option<usize>, kind: EventKind, message: impl Into<String>) -> Self {
        Event {
            session: session.to_string(),
            party,
            kind,
            message: message.into(),
            occurred_at: Instant::now(),
        }
    }
}

struct LedgerState {
    events: Vec<Event>,
    last_focus: Instant,
}

pub struct EventLedger {
    state: Mutex<LedgerState>,
    changed: Condvar,
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLedger {
    pub fn new() -> Self {
        EventLedger {
            state: Mutex::new(LedgerState {
                events: Vec::new(),
                last_focus: Instant::now(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn append(&self, event: Event) {
        debug!(
            "ledger: {:?} from {:?} ({})",
            event.kind, event.party, event.session
        );
        self.state.lock().events.push(event);
        self.changed.notify_all();
    }

    /// Counts the session's events that occurred at or after the focus.
    pub fn count(&self, session: &str) -> HashMap<EventKind, usize> {
        let state = self.state.lock();
        Self::count_locked(&state, session)
    }

    fn count_locked(state: &LedgerState, session: &str) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in state
            .events
            .iter()
            .filter(|event| event.session == session && event.occurred_at >= state.last_focus)
        {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// True once the session recorded a round or transport failure.
    pub fn has_failure(&self, session: &str) -> bool {
        let counts = self.count(session);
        counts.get(&EventKind::RoundError).copied().unwrap_or(0) > 0
            || counts.get(&EventKind::TransportError).copied().unwrap_or(0) > 0
    }

    /// Moves the focus to `at` and drops every event older than it.
    pub fn set_focus(&self, at: Instant) {
        let mut state = self.state.lock();
        state.last_focus = at;
        let before = state.events.len();
        state.events.retain(|event| event.occurred_at >= at);
        let evicted = before - state.events.len();
        if evicted > 0 {
            info!("ledger: focus moved, {} stale events evicted", evicted);
        }
    }

    pub fn remove_all(&self, session: &str) {
        self.state.lock().events.retain(|event| event.session != session);
    }

    /// Re-evaluates `check` against the session's counts whenever an event
    /// is appended, at least once per `poll_interval`, until it yields a
    /// value or `timeout` elapses.
    pub fn wait_for<T, F>(&self, session: &str, timeout: Duration, poll_interval: Duration, mut check: F) -> Option<T>
    where
        F: FnMut(&HashMap<EventKind, usize>) -> Option<T>,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = check(&Self::count_locked(&state, session)) {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = cmp::min(deadline - now, poll_interval);
            self.changed.wait_for(&mut state, wait);
        }
    }
}
