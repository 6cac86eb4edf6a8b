// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic event thread
//!
//! One background thread per participant drives heartbeats, ACKNACK
//! deadlines, liveliness timers, discovery announcements and lease checks.
//!
//! # Architecture
//! - Timers live in a min-heap keyed by deadline.
//! - Each timer has a generation; restarting or cancelling bumps it so stale
//!   heap entries are skipped when popped.
//! - Callbacks run without the timer lock held and return a [`TimerAction`].
//!
//! # Cancellation
//! [`TimerHandle::cancel`] is synchronous: if the callback is running on the
//! event thread at that moment, the caller waits for it to finish. Endpoints
//! cancel their timers this way before being torn down. Calling `cancel` from
//! inside the callback itself does not wait.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::dds::{Error, Result};

/// What the event thread does with a timer after its callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Fire again after the timer's configured period (stop if none).
    Rearm,
    /// Fire again after the given delay.
    RearmAfter(Duration),
    /// Disarm; the timer can still be restarted through its handle.
    Stop,
}

type Callback = Arc<dyn Fn() -> TimerAction + Send + Sync>;

struct TimerEntry {
    period: Option<Duration>,
    generation: u64,
    armed: bool,
    callback: Callback,
}

#[derive(Default)]
struct TimerState {
    timers: HashMap<u64, TimerEntry>,
    heap: BinaryHeap<Reverse<(Instant, u64, u64)>>,
    next_id: u64,
    running: Option<u64>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    thread_id: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn arm(&self, state: &mut TimerState, id: u64, delay: Duration) -> bool {
        let Some(entry) = state.timers.get_mut(&id) else {
            return false;
        };
        entry.generation += 1;
        entry.armed = true;
        let deadline = Instant::now() + delay;
        state.heap.push(Reverse((deadline, id, entry.generation)));
        true
    }

    fn on_event_thread(&self) -> bool {
        *self.thread_id.lock() == Some(thread::current().id())
    }
}

/// Background timer thread.
pub struct EventThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventThread {
    /// Spawn the event thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState::default()),
            wakeup: Condvar::new(),
            thread_id: Mutex::new(None),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&worker))
            .map_err(|e| Error::PreconditionNotMet(format!("event thread spawn failed: {}", e)))?;
        *shared.thread_id.lock() = Some(handle.thread().id());

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Register a periodic timer whose first expiry is one `period` from now.
    pub fn schedule_periodic<F>(&self, period: Duration, callback: F) -> TimerHandle
    where
        F: Fn() -> TimerAction + Send + Sync + 'static,
    {
        self.register(Some(period), Some(period), Arc::new(callback))
    }

    /// Register a timer that fires once after `delay` unless rearmed.
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: Fn() -> TimerAction + Send + Sync + 'static,
    {
        self.register(None, Some(delay), Arc::new(callback))
    }

    /// Register a disarmed timer; arm it later with [`TimerHandle::restart`].
    pub fn create_idle<F>(&self, callback: F) -> TimerHandle
    where
        F: Fn() -> TimerAction + Send + Sync + 'static,
    {
        self.register(None, None, Arc::new(callback))
    }

    fn register(&self, period: Option<Duration>, first: Option<Duration>, callback: Callback) -> TimerHandle {
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.timers.insert(
            id,
            TimerEntry {
                period,
                generation: 0,
                armed: false,
                callback,
            },
        );
        if let Some(delay) = first {
            self.shared.arm(&mut state, id, delay);
        }
        drop(state);
        self.shared.wakeup.notify_all();
        TimerHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of registered timers (armed or not).
    pub fn timer_count(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    /// Stop the thread and join it. Pending timers are dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.timers.clear();
            state.heap.clear();
        }
        self.shared.wakeup.notify_all();
        if self.shared.on_event_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let Some(Reverse((deadline, id, generation))) = state.heap.peek().copied() else {
            shared.wakeup.wait(&mut state);
            continue;
        };
        let now = Instant::now();
        if deadline > now {
            let _ = shared.wakeup.wait_until(&mut state, deadline);
            continue;
        }
        state.heap.pop();

        let callback = match state.timers.get_mut(&id) {
            Some(entry) if entry.armed && entry.generation == generation => {
                entry.armed = false;
                Arc::clone(&entry.callback)
            }
            _ => continue,
        };
        state.running = Some(id);
        let action = parking_lot::MutexGuard::unlocked(&mut state, || callback());
        state.running = None;

        // Cancelled or restarted while the callback ran.
        let still_idle = state
            .timers
            .get(&id)
            .is_some_and(|e| !e.armed && e.generation == generation);
        if still_idle {
            let next = match action {
                TimerAction::Rearm => state.timers.get(&id).and_then(|e| e.period),
                TimerAction::RearmAfter(delay) => Some(delay),
                TimerAction::Stop => None,
            };
            if let Some(delay) = next {
                shared.arm(&mut state, id, delay);
            }
        }
        shared.wakeup.notify_all();
    }
    log::debug!("[TIMER] event thread exiting");
}

/// Handle controlling one timer.
///
/// Dropping the handle does not cancel the timer; call [`TimerHandle::cancel`].
pub struct TimerHandle {
    id: u64,
    shared: Weak<Shared>,
}

impl TimerHandle {
    /// (Re)arm the timer to fire after `delay`, replacing any pending expiry.
    pub fn restart(&self, delay: Duration) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let armed = {
            let mut state = shared.state.lock();
            shared.arm(&mut state, self.id, delay)
        };
        shared.wakeup.notify_all();
        armed
    }

    /// Disarm without removing; `restart` can arm it again.
    pub fn disarm(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut state = shared.state.lock();
            if let Some(entry) = state.timers.get_mut(&self.id) {
                entry.generation += 1;
                entry.armed = false;
            }
        }
    }

    /// Remove the timer, waiting for an in-progress callback to finish.
    pub fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = shared.state.lock();
        state.timers.remove(&self.id);
        if shared.on_event_thread() {
            return;
        }
        while state.running == Some(self.id) {
            shared.wakeup.wait(&mut state);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            shared
                .state
                .lock()
                .timers
                .get(&self.id)
                .is_some_and(|e| e.armed)
        })
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerHandle({})", self.id)
    }
}
