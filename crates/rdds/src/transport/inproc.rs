// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport
//!
//! An [`InProcessNetwork`] plays the role of the wire: every input channel
//! gets its own delivery thread fed by a crossbeam channel, so reception is
//! asynchronous and per-channel FIFO, like a socket. Multicast locators fan
//! out to every participant that opened them; a unicast locator can only be
//! opened once.
//!
//! An optional [`DropPolicy`] decides per datagram whether the "wire" loses
//! it, which is how the loss tests are driven.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};

use super::{ReceiverResource, Transport};
use crate::core::Locator;
use crate::dds::{Error, Result};
use crate::protocol::submessage::{SUBMSG_ACKNACK, SUBMSG_DATA, SUBMSG_GAP, SUBMSG_HEARTBEAT};
use crate::protocol::RtpsMessage;

/// Returns true to drop the datagram addressed to the locator.
pub type DropPolicy = Arc<dyn Fn(&Locator, &[u8]) -> bool + Send + Sync>;

type Datagram = (Locator, Vec<u8>);

struct InputChannel {
    owner: u64,
    sender: Sender<Datagram>,
    handle: JoinHandle<()>,
}

/// Wire-level counters. Submessage counts include dropped datagrams.
#[derive(Debug, Default)]
pub struct NetworkStats {
    datagrams_sent: AtomicU64,
    datagrams_dropped: AtomicU64,
    data: AtomicU64,
    heartbeats: AtomicU64,
    acknacks: AtomicU64,
    gaps: AtomicU64,
}

impl NetworkStats {
    fn record(&self, bytes: &[u8]) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        let Ok(msg) = RtpsMessage::parse(bytes) else {
            return;
        };
        for sub in &msg.submessages {
            let counter = match sub.id() {
                SUBMSG_DATA => &self.data,
                SUBMSG_HEARTBEAT => &self.heartbeats,
                SUBMSG_ACKNACK => &self.acknacks,
                SUBMSG_GAP => &self.gaps,
                _ => continue,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    pub fn datagrams_dropped(&self) -> u64 {
        self.datagrams_dropped.load(Ordering::Relaxed)
    }

    pub fn data(&self) -> u64 {
        self.data.load(Ordering::Relaxed)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn acknacks(&self) -> u64 {
        self.acknacks.load(Ordering::Relaxed)
    }

    pub fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }
}

/// Shared "wire" between in-process participants.
pub struct InProcessNetwork {
    channels: RwLock<HashMap<Locator, Vec<InputChannel>>>,
    drop_policy: RwLock<Option<DropPolicy>>,
    next_owner: AtomicU64,
    stats: NetworkStats,
    /// Serializes open/close so delivery threads are joined outside the map lock.
    lifecycle: Mutex<()>,
}

impl InProcessNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: RwLock::new(HashMap::new()),
            drop_policy: RwLock::new(None),
            next_owner: AtomicU64::new(1),
            stats: NetworkStats::default(),
            lifecycle: Mutex::new(()),
        })
    }

    /// Transport endpoint for one participant; `source` is reported to
    /// receivers as the datagram origin.
    pub fn transport(self: &Arc<Self>, source: Locator) -> Arc<InProcessTransport> {
        Arc::new(InProcessTransport {
            network: Arc::clone(self),
            owner: self.next_owner.fetch_add(1, Ordering::Relaxed),
            source,
        })
    }

    pub fn set_drop_policy(&self, policy: Option<DropPolicy>) {
        *self.drop_policy.write() = policy;
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Number of open input channels on `locator`.
    pub fn listeners(&self, locator: &Locator) -> usize {
        self.channels.read().get(locator).map_or(0, Vec::len)
    }

    fn deliver(&self, source: &Locator, dest: &Locator, bytes: &[u8]) {
        self.stats.record(bytes);
        let dropped = self
            .drop_policy
            .read()
            .as_ref()
            .is_some_and(|policy| policy(dest, bytes));
        if dropped {
            self.stats.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let channels = self.channels.read();
        if let Some(list) = channels.get(dest) {
            for ch in list {
                // Receiver gone means the channel is closing; the datagram is lost.
                let _ = ch.sender.send((*source, bytes.to_vec()));
            }
        }
    }

    fn open(&self, owner: u64, locator: &Locator, receiver: Arc<dyn ReceiverResource>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        {
            let channels = self.channels.read();
            if let Some(list) = channels.get(locator) {
                if list.iter().any(|c| c.owner == owner) {
                    return Ok(());
                }
                if !locator.is_multicast() && !list.is_empty() {
                    return Err(Error::Transport(format!("{} already in use", locator)));
                }
            }
        }

        let (sender, rx) = channel::unbounded::<Datagram>();
        let handle = thread::Builder::new()
            .name(format!("rdds-inproc-{}", locator.port))
            .spawn(move || {
                for (source, bytes) in rx {
                    receiver.on_data_received(&source, &bytes);
                }
            })
            .map_err(|e| Error::Transport(format!("delivery thread spawn failed: {}", e)))?;

        log::debug!("[INPROC] owner {} listening on {}", owner, locator);
        self.channels
            .write()
            .entry(*locator)
            .or_default()
            .push(InputChannel {
                owner,
                sender,
                handle,
            });
        Ok(())
    }

    fn close(&self, owner: u64, locator: &Locator) {
        let _lifecycle = self.lifecycle.lock();
        let removed: Vec<InputChannel> = {
            let mut channels = self.channels.write();
            let Some(list) = channels.get_mut(locator) else {
                return;
            };
            let (mine, others): (Vec<_>, Vec<_>) = list.drain(..).partition(|c| c.owner == owner);
            *list = others;
            if list.is_empty() {
                channels.remove(locator);
            }
            mine
        };
        for ch in removed {
            let InputChannel { sender, handle, .. } = ch;
            // Disconnect, then wait for queued datagrams to drain.
            drop(sender);
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        log::debug!("[INPROC] owner {} closed {}", owner, locator);
    }
}

impl std::fmt::Debug for InProcessNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessNetwork")
            .field("locators", &self.channels.read().len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// One participant's handle on an [`InProcessNetwork`].
pub struct InProcessTransport {
    network: Arc<InProcessNetwork>,
    owner: u64,
    source: Locator,
}

impl InProcessTransport {
    pub fn network(&self) -> &Arc<InProcessNetwork> {
        &self.network
    }

    pub fn source(&self) -> Locator {
        self.source
    }
}

impl Transport for InProcessTransport {
    fn send(&self, dest: &Locator, bytes: &[u8]) -> Result<()> {
        if !dest.is_valid() {
            return Err(Error::BadParameter(format!("invalid locator {}", dest)));
        }
        self.network.deliver(&self.source, dest, bytes);
        Ok(())
    }

    fn open_output_channel(&self, dest: &Locator) -> Result<()> {
        if dest.is_valid() {
            Ok(())
        } else {
            Err(Error::BadParameter(format!("invalid locator {}", dest)))
        }
    }

    fn open_input_channel(
        &self,
        locator: &Locator,
        receiver: Arc<dyn ReceiverResource>,
    ) -> Result<()> {
        self.network.open(self.owner, locator, receiver)
    }

    fn close_input_channel(&self, locator: &Locator) {
        self.network.close(self.owner, locator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collect(Mutex<Vec<(Locator, Vec<u8>)>>);

    impl ReceiverResource for Collect {
        fn on_data_received(&self, source: &Locator, bytes: &[u8]) {
            self.0.lock().push((*source, bytes.to_vec()));
        }
    }

    fn loc(port: u32) -> Locator {
        Locator::udpv4(Ipv4Addr::new(127, 0, 0, 1), port)
    }

    fn wait_len(c: &Collect, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if c.0.lock().len() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_unicast_delivery_in_order() {
        let net = InProcessNetwork::new();
        let a = net.transport(loc(1000));
        let b = net.transport(loc(2000));
        let rx = Arc::new(Collect::default());
        b.open_input_channel(&loc(2000), rx.clone()).unwrap();
        for i in 0..10u8 {
            a.send(&loc(2000), &[i]).unwrap();
        }
        assert!(wait_len(&rx, 10));
        let got: Vec<u8> = rx.0.lock().iter().map(|(_, b)| b[0]).collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert_eq!(rx.0.lock()[0].0, loc(1000));
        assert_eq!(net.stats().datagrams_sent(), 10);
    }

    #[test]
    fn test_unicast_locator_is_exclusive() {
        let net = InProcessNetwork::new();
        let a = net.transport(loc(1));
        let b = net.transport(loc(2));
        a.open_input_channel(&loc(7410), Arc::new(Collect::default())).unwrap();
        assert!(b
            .open_input_channel(&loc(7410), Arc::new(Collect::default()))
            .is_err());
        a.close_input_channel(&loc(7410));
        assert!(b
            .open_input_channel(&loc(7410), Arc::new(Collect::default()))
            .is_ok());
    }

    #[test]
    fn test_multicast_fans_out() {
        let net = InProcessNetwork::new();
        let group = Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400);
        let rx1 = Arc::new(Collect::default());
        let rx2 = Arc::new(Collect::default());
        net.transport(loc(1)).open_input_channel(&group, rx1.clone()).unwrap();
        net.transport(loc(2)).open_input_channel(&group, rx2.clone()).unwrap();
        assert_eq!(net.listeners(&group), 2);
        net.transport(loc(3)).send(&group, b"hi").unwrap();
        assert!(wait_len(&rx1, 1));
        assert!(wait_len(&rx2, 1));
    }

    #[test]
    fn test_drop_policy() {
        let net = InProcessNetwork::new();
        let rx = Arc::new(Collect::default());
        let t = net.transport(loc(1));
        t.open_input_channel(&loc(5), rx.clone()).unwrap();
        net.set_drop_policy(Some(Arc::new(|_: &Locator, bytes: &[u8]| bytes[0] % 2 == 0)));
        for i in 0..6u8 {
            t.send(&loc(5), &[i]).unwrap();
        }
        assert!(wait_len(&rx, 3));
        t.close_input_channel(&loc(5));
        assert_eq!(rx.0.lock().len(), 3);
        assert_eq!(net.stats().datagrams_dropped(), 3);
    }
}
