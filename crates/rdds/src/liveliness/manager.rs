// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveliness manager: lease bookkeeping for a set of writers.
//!
//! ```text
//!  NotAsserted ──assert──▶ Alive ──lease expires──▶ NotAlive
//!                            ▲                         │
//!                            └────────assert───────────┘
//! ```
//!
//! A single timer tracks the nearest deadline (linear scan, recomputed after
//! every change). Each transition into or out of `Alive` invokes the callback
//! exactly once, without the entries lock held. Assertion and expiry hold the
//! dispatch lock across collect and notify, so callbacks observe transitions
//! in the order they were applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, ReentrantMutex};

use crate::core::{EventThread, GuidPrefix, TimerAction, TimerHandle, DURATION_INFINITE, GUID};
use crate::qos::LivelinessKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivelinessStatus {
    NotAsserted,
    Alive,
    NotAlive,
}

/// Tracked state of one writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivelinessData {
    pub guid: GUID,
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
    pub status: LivelinessStatus,
    /// `None` while not asserted, or for an infinite lease.
    pub next_deadline: Option<Instant>,
}

impl LivelinessData {
    fn assert_at(&mut self, now: Instant) -> bool {
        let recovered = self.status != LivelinessStatus::Alive;
        self.status = LivelinessStatus::Alive;
        self.next_deadline = if self.lease_duration == DURATION_INFINITE {
            None
        } else {
            now.checked_add(self.lease_duration)
        };
        recovered
    }
}

/// Reported once per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivelinessTransition {
    pub guid: GUID,
    pub kind: LivelinessKind,
    pub alive: bool,
    /// Status before the transition.
    pub previous: LivelinessStatus,
}

pub type LivelinessCallback = Arc<dyn Fn(LivelinessTransition) + Send + Sync>;

pub struct LivelinessManager {
    entries: Mutex<Vec<LivelinessData>>,
    manage_automatic: bool,
    callback: Option<LivelinessCallback>,
    /// Serializes collect + notify. Reentrant so a callback may assert again.
    dispatch: ReentrantMutex<()>,
    timer: Mutex<Option<TimerHandle>>,
}

impl LivelinessManager {
    /// With `manage_automatic = false`, AUTOMATIC writers are not tracked
    /// (their liveliness follows the participant's).
    pub fn new(callback: Option<LivelinessCallback>, manage_automatic: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            manage_automatic,
            callback,
            dispatch: ReentrantMutex::new(()),
            timer: Mutex::new(None),
        }
    }

    /// Start tracking `guid`. False if it is already tracked or not managed.
    pub fn add_writer(&self, guid: GUID, kind: LivelinessKind, lease_duration: Duration) -> bool {
        if !self.manage_automatic && kind == LivelinessKind::Automatic {
            return false;
        }
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.guid == guid) {
            return false;
        }
        entries.push(LivelinessData {
            guid,
            kind,
            lease_duration,
            status: LivelinessStatus::NotAsserted,
            next_deadline: None,
        });
        true
    }

    pub fn remove_writer(&self, guid: &GUID) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.guid != *guid);
            entries.len() != before
        };
        if removed {
            self.rearm();
        }
        removed
    }

    pub fn is_tracked(&self, guid: &GUID) -> bool {
        self.entries.lock().iter().any(|e| e.guid == *guid)
    }

    /// Assert one writer.
    pub fn assert_writer(&self, guid: &GUID) -> bool {
        self.assert_where(|e| e.guid == *guid)
    }

    /// Assert every writer of `kind`.
    pub fn assert_kind(&self, kind: LivelinessKind) -> bool {
        self.assert_where(|e| e.kind == kind)
    }

    /// Assert every writer of `kind` owned by participant `prefix` (WLP).
    pub fn assert_participant(&self, prefix: &GuidPrefix, kind: LivelinessKind) -> bool {
        self.assert_where(|e| e.guid.prefix == *prefix && e.kind == kind)
    }

    fn assert_where(&self, pred: impl Fn(&LivelinessData) -> bool) -> bool {
        let _dispatch = self.dispatch.lock();
        let now = Instant::now();
        let mut transitions = Vec::new();
        let mut any = false;
        {
            let mut entries = self.entries.lock();
            for entry in entries.iter_mut().filter(|e| pred(e)) {
                any = true;
                let previous = entry.status;
                if entry.assert_at(now) {
                    transitions.push(LivelinessTransition {
                        guid: entry.guid,
                        kind: entry.kind,
                        alive: true,
                        previous,
                    });
                }
            }
        }
        if any {
            self.rearm();
        }
        self.notify(transitions);
        any
    }

    /// Expire overdue writers. Returns the next deadline, if any.
    pub fn check_expirations(&self, now: Instant) -> Option<Instant> {
        let _dispatch = self.dispatch.lock();
        let mut transitions = Vec::new();
        let next = {
            let mut entries = self.entries.lock();
            for entry in entries.iter_mut() {
                if entry.status == LivelinessStatus::Alive && entry.next_deadline.is_some_and(|d| d <= now) {
                    entry.status = LivelinessStatus::NotAlive;
                    entry.next_deadline = None;
                    transitions.push(LivelinessTransition {
                        guid: entry.guid,
                        kind: entry.kind,
                        alive: false,
                        previous: LivelinessStatus::Alive,
                    });
                }
            }
            Self::nearest(&entries)
        };
        for t in &transitions {
            log::debug!("[LIVELINESS] {} lost liveliness ({:?})", t.guid, t.kind);
        }
        self.notify(transitions);
        next
    }

    fn nearest(entries: &[LivelinessData]) -> Option<Instant> {
        entries.iter().filter_map(|e| e.next_deadline).min()
    }

    fn notify(&self, transitions: Vec<LivelinessTransition>) {
        if let Some(cb) = &self.callback {
            for t in transitions {
                cb(t);
            }
        }
    }

    pub fn status_of(&self, guid: &GUID) -> Option<LivelinessStatus> {
        self.entries.lock().iter().find(|e| e.guid == *guid).map(|e| e.status)
    }

    pub fn liveliness_data(&self) -> Vec<LivelinessData> {
        self.entries.lock().clone()
    }

    // ========================================================================
    // Timer
    // ========================================================================

    pub fn attach_timer(self: &Arc<Self>, events: &EventThread) {
        let weak = Arc::downgrade(self);
        let handle = events.create_idle(move || {
            let Some(manager) = weak.upgrade() else {
                return TimerAction::Stop;
            };
            let now = Instant::now();
            match manager.check_expirations(now) {
                Some(next) => TimerAction::RearmAfter(next.saturating_duration_since(now)),
                None => TimerAction::Stop,
            }
        });
        *self.timer.lock() = Some(handle);
        self.rearm();
    }

    fn rearm(&self) {
        let next = Self::nearest(&self.entries.lock());
        if let Some(timer) = self.timer.lock().as_ref() {
            match next {
                Some(deadline) => {
                    timer.restart(deadline.saturating_duration_since(Instant::now()));
                }
                None => timer.disarm(),
            }
        }
    }

    pub fn detach_timer(&self) {
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}

impl std::fmt::Debug for LivelinessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivelinessManager")
            .field("writers", &self.entries.lock().len())
            .field("manage_automatic", &self.manage_automatic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityId;

    fn guid(n: u32) -> GUID {
        GUID::new(GuidPrefix([1; 12]), EntityId::user_writer(n, false))
    }

    fn recording() -> (Arc<Mutex<Vec<LivelinessTransition>>>, LivelinessCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, Arc::new(move |t| sink.lock().push(t)))
    }

    #[test]
    fn test_writer_added_once() {
        let m = LivelinessManager::new(None, true);
        assert!(m.add_writer(guid(1), LivelinessKind::Automatic, Duration::from_secs(1)));
        assert!(!m.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_secs(2)));
        assert!(m.remove_writer(&guid(1)));
        assert!(!m.remove_writer(&guid(1)));
    }

    #[test]
    fn test_unmanaged_automatic_is_ignored() {
        let m = LivelinessManager::new(None, false);
        assert!(!m.add_writer(guid(1), LivelinessKind::Automatic, Duration::from_secs(1)));
        assert!(m.add_writer(guid(2), LivelinessKind::ManualByTopic, Duration::from_secs(1)));
    }

    #[test]
    fn test_assert_by_kind() {
        let m = LivelinessManager::new(None, true);
        m.add_writer(guid(1), LivelinessKind::Automatic, Duration::from_secs(10));
        m.add_writer(guid(2), LivelinessKind::ManualByParticipant, Duration::from_secs(10));
        m.add_writer(guid(3), LivelinessKind::ManualByTopic, Duration::from_secs(10));
        assert!(m.assert_kind(LivelinessKind::Automatic));
        let data = m.liveliness_data();
        assert_eq!(data[0].status, LivelinessStatus::Alive);
        assert_eq!(data[1].status, LivelinessStatus::NotAsserted);
        assert_eq!(data[2].status, LivelinessStatus::NotAsserted);
        assert!(data[0].next_deadline.unwrap() > Instant::now());
    }

    #[test]
    fn test_one_notification_per_transition() {
        let (log, cb) = recording();
        let m = LivelinessManager::new(Some(cb), true);
        m.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(10));
        m.assert_writer(&guid(1));
        m.assert_writer(&guid(1));
        assert_eq!(log.lock().len(), 1);
        assert!(log.lock()[0].alive);
        assert_eq!(log.lock()[0].previous, LivelinessStatus::NotAsserted);

        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(m.check_expirations(later), None);
        assert_eq!(m.check_expirations(later), None);
        assert_eq!(log.lock().len(), 2);
        assert!(!log.lock()[1].alive);
        assert_eq!(m.status_of(&guid(1)), Some(LivelinessStatus::NotAlive));

        m.assert_writer(&guid(1));
        assert_eq!(log.lock().len(), 3);
        assert_eq!(log.lock()[2].previous, LivelinessStatus::NotAlive);
    }

    #[test]
    fn test_infinite_lease_never_expires() {
        let m = LivelinessManager::new(None, true);
        m.add_writer(guid(1), LivelinessKind::Automatic, DURATION_INFINITE);
        m.assert_writer(&guid(1));
        assert_eq!(m.check_expirations(Instant::now() + Duration::from_secs(3600)), None);
        assert_eq!(m.status_of(&guid(1)), Some(LivelinessStatus::Alive));
    }

    #[test]
    fn test_participant_assertion_scoped_by_prefix_and_kind() {
        let m = LivelinessManager::new(None, true);
        let other = GUID::new(GuidPrefix([2; 12]), EntityId::user_writer(1, false));
        m.add_writer(guid(1), LivelinessKind::ManualByParticipant, Duration::from_secs(1));
        m.add_writer(other, LivelinessKind::ManualByParticipant, Duration::from_secs(1));
        assert!(m.assert_participant(&GuidPrefix([2; 12]), LivelinessKind::ManualByParticipant));
        assert_eq!(m.status_of(&guid(1)), Some(LivelinessStatus::NotAsserted));
        assert_eq!(m.status_of(&other), Some(LivelinessStatus::Alive));
    }

    #[test]
    fn test_concurrent_assert_and_expiry_alternate() {
        let (log, cb) = recording();
        let m = Arc::new(LivelinessManager::new(Some(cb), true));
        m.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_micros(50));

        let expirer = {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    m.check_expirations(Instant::now() + Duration::from_millis(1));
                }
            })
        };
        for _ in 0..2000 {
            m.assert_writer(&guid(1));
        }
        expirer.join().unwrap();

        // Delivered transitions strictly alternate alive / not-alive.
        let log = log.lock();
        assert!(!log.is_empty());
        assert!(log[0].alive);
        for pair in log.windows(2) {
            assert_ne!(pair[0].alive, pair[1].alive, "out of order: {:?}", pair);
        }
    }

    #[test]
    fn test_callback_may_reassert() {
        let slot: Arc<Mutex<Option<Arc<LivelinessManager>>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let cb: LivelinessCallback = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            Arc::new(move |t: LivelinessTransition| {
                count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if !t.alive {
                    if let Some(m) = slot.lock().as_ref() {
                        m.assert_writer(&t.guid);
                    }
                }
            })
        };
        let m = Arc::new(LivelinessManager::new(Some(cb), true));
        *slot.lock() = Some(Arc::clone(&m));
        m.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(10));
        m.assert_writer(&guid(1));
        m.check_expirations(Instant::now() + Duration::from_millis(50));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(m.status_of(&guid(1)), Some(LivelinessStatus::Alive));
        slot.lock().take();
    }

    #[test]
    fn test_timer_expires_writer() {
        let (log, cb) = recording();
        let events = EventThread::spawn("liveliness-test").unwrap();
        let m = Arc::new(LivelinessManager::new(Some(cb), true));
        m.attach_timer(&events);
        m.add_writer(guid(1), LivelinessKind::ManualByTopic, Duration::from_millis(20));
        m.assert_writer(&guid(1));
        let deadline = Instant::now() + Duration::from_secs(2);
        while log.lock().len() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(log.lock().len(), 2);
        m.detach_timer();
        events.shutdown();
    }
}
