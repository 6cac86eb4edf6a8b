// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WaitSet - blocking wait for Condition triggers
//!
//! A [`WaitSet`] is a condvar-guarded queue of condition tokens. Conditions
//! push their [`ConditionId`] into every attached waitset when their trigger
//! value flips to `true`; [`WaitSet::wait`] returns the ids of the attached
//! conditions that are triggered when it wakes up.
//!
//! Unlike listeners, nothing runs on the participant's threads: the
//! application processes events on the thread that calls `wait`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::entity::StatusMask;
use super::{Error, Result};

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(u64);

impl ConditionId {
    fn next() -> Self {
        ConditionId(NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Queue shared between a waitset and its attached conditions.
struct Signal {
    queue: Mutex<VecDeque<ConditionId>>,
    wakeup: Condvar,
}

impl Signal {
    fn push(&self, id: ConditionId) {
        self.queue.lock().push_back(id);
        self.wakeup.notify_all();
    }
}

/// Waitsets a condition must wake.
#[derive(Default)]
pub struct Notifier {
    signals: Mutex<Vec<Weak<Signal>>>,
}

impl Notifier {
    fn add(&self, signal: &Arc<Signal>) {
        self.signals.lock().push(Arc::downgrade(signal));
    }

    fn remove(&self, signal: &Arc<Signal>) {
        self.signals
            .lock()
            .retain(|s| s.upgrade().is_some_and(|s| !Arc::ptr_eq(&s, signal)));
    }

    fn notify(&self, id: ConditionId) {
        let signals: Vec<Arc<Signal>> = {
            let mut signals = self.signals.lock();
            signals.retain(|s| s.strong_count() > 0);
            signals.iter().filter_map(Weak::upgrade).collect()
        };
        for signal in signals {
            signal.push(id);
        }
    }
}

/// Boolean predicate that can be attached to a [`WaitSet`].
pub trait Condition: Send + Sync {
    fn id(&self) -> ConditionId;

    fn trigger_value(&self) -> bool;

    /// Waitsets to wake when the trigger value becomes `true`.
    fn notifier(&self) -> &Notifier;
}

/// Condition whose trigger value is set by the application.
pub struct GuardCondition {
    id: ConditionId,
    triggered: AtomicBool,
    notifier: Notifier,
}

impl GuardCondition {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConditionId::next(),
            triggered: AtomicBool::new(false),
            notifier: Notifier::default(),
        }
    }

    pub fn set_trigger_value(&self, value: bool) {
        let was = self.triggered.swap(value, Ordering::AcqRel);
        if value && !was {
            self.notifier.notify(self.id);
        }
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition for GuardCondition {
    fn id(&self) -> ConditionId {
        self.id
    }

    fn trigger_value(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

/// Condition triggered while an entity has a changed status in its
/// enabled mask. Statuses are cleared by reading them (or, for
/// DATA_AVAILABLE, by taking or reading the samples).
pub struct StatusCondition {
    id: ConditionId,
    active: AtomicU32,
    enabled: AtomicU32,
    notifier: Notifier,
}

impl StatusCondition {
    pub(crate) fn new() -> Self {
        Self {
            id: ConditionId::next(),
            active: AtomicU32::new(0),
            enabled: AtomicU32::new(StatusMask::ALL.bits()),
            notifier: Notifier::default(),
        }
    }

    pub fn enabled_statuses(&self) -> StatusMask {
        StatusMask::from_bits(self.enabled.load(Ordering::Acquire))
    }

    pub fn set_enabled_statuses(&self, mask: StatusMask) {
        let before = self.trigger_value();
        self.enabled.store(mask.bits(), Ordering::Release);
        if !before && self.trigger_value() {
            self.notifier.notify(self.id);
        }
    }

    /// Statuses changed and not yet read.
    pub fn active_statuses(&self) -> StatusMask {
        StatusMask::from_bits(self.active.load(Ordering::Acquire))
    }

    pub(crate) fn raise(&self, status: StatusMask) {
        self.active.fetch_or(status.bits(), Ordering::AcqRel);
        if self.enabled_statuses().intersects(status) {
            self.notifier.notify(self.id);
        }
    }

    pub(crate) fn clear(&self, status: StatusMask) {
        self.active.fetch_and(!status.bits(), Ordering::AcqRel);
    }
}

impl Condition for StatusCondition {
    fn id(&self) -> ConditionId {
        self.id
    }

    fn trigger_value(&self) -> bool {
        self.active_statuses().intersects(self.enabled_statuses())
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

/// Blocks the calling thread until an attached condition triggers.
pub struct WaitSet {
    signal: Arc<Signal>,
    conditions: Mutex<Vec<Arc<dyn Condition>>>,
}

impl WaitSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal {
                queue: Mutex::new(VecDeque::new()),
                wakeup: Condvar::new(),
            }),
            conditions: Mutex::new(Vec::new()),
        }
    }

    /// # Errors
    /// `PreconditionNotMet` if the condition is already attached.
    pub fn attach_condition(&self, condition: Arc<dyn Condition>) -> Result<()> {
        let mut conditions = self.conditions.lock();
        if conditions.iter().any(|c| c.id() == condition.id()) {
            return Err(Error::PreconditionNotMet("condition already attached".into()));
        }
        condition.notifier().add(&self.signal);
        conditions.push(condition);
        Ok(())
    }

    /// # Errors
    /// `BadParameter` if the condition is not attached.
    pub fn detach_condition(&self, id: ConditionId) -> Result<()> {
        let mut conditions = self.conditions.lock();
        let Some(pos) = conditions.iter().position(|c| c.id() == id) else {
            return Err(Error::BadParameter("condition not attached".into()));
        };
        let condition = conditions.remove(pos);
        condition.notifier().remove(&self.signal);
        Ok(())
    }

    pub fn conditions(&self) -> Vec<ConditionId> {
        self.conditions.lock().iter().map(|c| c.id()).collect()
    }

    fn triggered(&self) -> Vec<ConditionId> {
        self.conditions
            .lock()
            .iter()
            .filter(|c| c.trigger_value())
            .map(|c| c.id())
            .collect()
    }

    /// Wait until at least one attached condition is triggered.
    ///
    /// # Errors
    /// `Timeout` if none triggers within `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<ConditionId>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut queue = self.signal.queue.lock();
        loop {
            queue.clear();
            // Conditions take their own locks; never hold the queue while asking.
            let triggered = parking_lot::MutexGuard::unlocked(&mut queue, || self.triggered());
            if !triggered.is_empty() {
                return Ok(triggered);
            }
            if !queue.is_empty() {
                continue;
            }
            match deadline {
                Some(d) => {
                    if self.signal.wakeup.wait_until(&mut queue, d).timed_out() && queue.is_empty() {
                        let triggered = parking_lot::MutexGuard::unlocked(&mut queue, || self.triggered());
                        if triggered.is_empty() {
                            return Err(Error::Timeout);
                        }
                        return Ok(triggered);
                    }
                }
                None => self.signal.wakeup.wait(&mut queue),
            }
        }
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        for condition in self.conditions.lock().drain(..) {
            condition.notifier().remove(&self.signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_guard_condition_wakes_waiter() {
        let ws = Arc::new(WaitSet::new());
        let guard = Arc::new(GuardCondition::new());
        ws.attach_condition(guard.clone()).expect("attach");

        let trigger = Arc::clone(&guard);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.set_trigger_value(true);
        });
        let ids = ws.wait(Duration::from_secs(5)).expect("triggered");
        assert_eq!(ids, vec![guard.id()]);
        handle.join().expect("join");
    }

    #[test]
    fn test_timeout_when_nothing_triggers() {
        let ws = WaitSet::new();
        ws.attach_condition(Arc::new(GuardCondition::new())).expect("attach");
        assert_eq!(ws.wait(Duration::from_millis(20)), Err(Error::Timeout));
    }

    #[test]
    fn test_already_triggered_returns_immediately() {
        let ws = WaitSet::new();
        let guard = Arc::new(GuardCondition::new());
        guard.set_trigger_value(true);
        ws.attach_condition(guard.clone()).expect("attach");
        assert_eq!(ws.wait(Duration::ZERO).expect("triggered"), vec![guard.id()]);
    }

    #[test]
    fn test_status_condition_respects_mask() {
        let ws = WaitSet::new();
        let cond = Arc::new(StatusCondition::new());
        cond.set_enabled_statuses(StatusMask::DATA_AVAILABLE);
        ws.attach_condition(cond.clone()).expect("attach");

        cond.raise(StatusMask::SAMPLE_LOST);
        assert!(!cond.trigger_value());
        assert_eq!(ws.wait(Duration::from_millis(10)), Err(Error::Timeout));

        cond.raise(StatusMask::DATA_AVAILABLE);
        assert_eq!(ws.wait(Duration::from_millis(10)).expect("triggered"), vec![cond.id()]);
        cond.clear(StatusMask::DATA_AVAILABLE);
        assert!(!cond.trigger_value());
    }

    #[test]
    fn test_attach_detach() {
        let ws = WaitSet::new();
        let guard = Arc::new(GuardCondition::new());
        ws.attach_condition(guard.clone()).expect("attach");
        assert!(ws.attach_condition(guard.clone()).is_err());
        ws.detach_condition(guard.id()).expect("detach");
        assert!(ws.conditions().is_empty());
        assert!(matches!(ws.detach_condition(guard.id()), Err(Error::BadParameter(_))));
    }
}
