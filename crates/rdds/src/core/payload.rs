// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted payload pool
//!
//! Serialized sample bytes are shared between the writer History (retention)
//! and the send path (in-flight messages). A [`Payload`] is a cheap clone of
//! an `Arc` around a pooled buffer; when the last clone drops, the buffer is
//! cleared and pushed back onto the pool's free list.
//!
//! ```text
//! PayloadPool ──allocate──> Payload ──clone──> History entry
//!      ^                        └─────clone──> outgoing DATA
//!      └──────── last drop returns Vec<u8> to the free list
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::queue::ArrayQueue;

use crate::dds::{Error, Result};

/// Fixed-capacity pool of reusable byte buffers.
pub struct PayloadPool {
    free: ArrayQueue<Vec<u8>>,
    max_buffers: usize,
    in_use: AtomicUsize,
}

impl PayloadPool {
    /// Create a pool allowing at most `max_buffers` live payloads.
    pub fn new(max_buffers: usize) -> Arc<Self> {
        let capacity = max_buffers.clamp(1, 4096);
        Arc::new(Self {
            free: ArrayQueue::new(capacity),
            max_buffers,
            in_use: AtomicUsize::new(0),
        })
    }

    /// Copy `data` into a pooled buffer.
    ///
    /// # Errors
    /// `ResourceLimitExceeded` when `max_buffers` payloads are already alive.
    pub fn allocate(self: &Arc<Self>, data: &[u8]) -> Result<Payload> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.max_buffers {
                return Err(Error::ResourceLimitExceeded(format!(
                    "payload pool exhausted ({} buffers)",
                    self.max_buffers
                )));
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let mut buf = self.free.pop().unwrap_or_default();
        buf.extend_from_slice(data);
        Ok(Payload(Arc::new(PooledBuffer {
            data: buf,
            pool: Arc::downgrade(self),
        })))
    }

    /// Number of payloads currently alive.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of recycled buffers waiting on the free list.
    pub fn free_buffers(&self) -> usize {
        self.free.len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        buf.clear();
        // Full free list: let the buffer drop.
        let _ = self.free.push(buf);
    }
}

struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PayloadPool>,
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

/// Shared, immutable serialized payload.
#[derive(Clone)]
pub struct Payload(Arc<PooledBuffer>);

impl Payload {
    /// Wrap bytes that do not belong to any pool (received data, tests).
    pub fn from_vec(data: Vec<u8>) -> Self {
        Payload(Arc::new(PooledBuffer {
            data,
            pool: Weak::new(),
        }))
    }

    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0.data
    }

    /// Number of live references (History + in-flight sends).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0.data
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes, refs={})", self.len(), self.ref_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_drop_returns_buffer() {
        let pool = PayloadPool::new(4);
        let p = pool.allocate(b"hello").unwrap();
        let in_flight = p.clone();
        assert_eq!(pool.in_use(), 1);
        assert_eq!(p.ref_count(), 2);

        drop(p);
        assert_eq!(pool.in_use(), 1, "in-flight clone still holds the buffer");
        assert_eq!(&*in_flight, b"hello");

        drop(in_flight);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn test_exhaustion_reports_resource_limit() {
        let pool = PayloadPool::new(2);
        let _a = pool.allocate(b"a").unwrap();
        let _b = pool.allocate(b"b").unwrap();
        assert!(matches!(
            pool.allocate(b"c"),
            Err(Error::ResourceLimitExceeded(_))
        ));
    }

    #[test]
    fn test_recycled_buffer_is_clean() {
        let pool = PayloadPool::new(1);
        drop(pool.allocate(b"long payload bytes").unwrap());
        let p = pool.allocate(b"x").unwrap();
        assert_eq!(p.as_slice(), b"x");
    }

    #[test]
    fn test_unpooled_payload_outlives_pool() {
        let pool = PayloadPool::new(1);
        let p = pool.allocate(b"abc").unwrap();
        drop(pool);
        assert_eq!(p.as_slice(), b"abc");
    }
}
