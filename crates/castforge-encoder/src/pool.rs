//! Pooled packet buffers with outstanding-buffer accounting.
//!
//! Every encode allocates at least two buffers (body, then frame), so
//! buffers are recycled through a [`BufferPool`] instead of hitting the
//! allocator each time. The pool also counts how many buffers are alive
//! ("outstanding"), which is how tests prove that a failed encode leaves
//! nothing behind and that a released cache frees every buffer once.
//!
//! # Lifecycle of a buffer
//!
//! ```text
//! acquire() ──→ PacketBuf (append) ──→ trim() ──→ freeze() ──→ Bytes
//!                   │                                  │
//!                   └── drop ──→ back to pool ←── last clone dropped
//! ```
//!
//! A frozen buffer is a reference-counted [`Bytes`] whose owner is the
//! `PacketBuf` itself, so the storage goes back to the pool exactly once,
//! when the last clone is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Sizing for a [`BufferPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of a freshly allocated buffer.
    pub initial_capacity: usize,

    /// How many idle buffers the pool keeps. Extra returns are freed.
    pub max_pooled: usize,

    /// Buffers that grew past this capacity are freed instead of pooled,
    /// so one huge packet doesn't pin memory forever.
    pub max_retained_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            max_pooled: 1024,
            max_retained_capacity: 64 * 1024,
        }
    }
}

/// A snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Buffers created from scratch.
    pub allocations: u64,
    /// Acquires served from the idle list.
    pub reuses: u64,
    /// Buffers currently alive (held by an encoder, a cache, or a borrower).
    pub outstanding: usize,
    /// Idle buffers waiting in the pool.
    pub pooled: usize,
}

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// A thread-safe pool of byte buffers.
///
/// Cheap to clone: clones share the same idle list and counters.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    config: PoolConfig,
    outstanding: AtomicUsize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl BufferPool {
    /// Creates an empty pool. Buffers are allocated on demand.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                config,
                outstanding: AtomicUsize::new(0),
                allocations: AtomicU64::new(0),
                reuses: AtomicU64::new(0),
            }),
        }
    }

    /// Acquires an empty buffer with the configured initial capacity.
    pub fn acquire(&self) -> PacketBuf {
        self.acquire_with_capacity(self.inner.config.initial_capacity)
    }

    /// Acquires an empty buffer that can hold at least `capacity` bytes
    /// without growing.
    pub fn acquire_with_capacity(&self, capacity: usize) -> PacketBuf {
        // Pop under the lock, grow outside it.
        let recycled = self.inner.free.lock().pop();
        let data = match recycled {
            Some(mut data) => {
                self.inner.reuses.fetch_add(1, Ordering::Relaxed);
                data.reserve(capacity);
                data
            }
            None => {
                self.inner.allocations.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(capacity)
            }
        };
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        PacketBuf {
            data,
            pool: self.clone(),
        }
    }

    /// Number of buffers currently alive.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.inner.allocations.load(Ordering::Relaxed),
            reuses: self.inner.reuses.load(Ordering::Relaxed),
            outstanding: self.outstanding(),
            pooled: self.inner.free.lock().len(),
        }
    }

    /// The pool's sizing.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn recycle(&self, mut data: Vec<u8>) {
        self.inner.outstanding.fetch_sub(1, Ordering::AcqRel);

        let capacity = data.capacity();
        if capacity == 0 || capacity > self.inner.config.max_retained_capacity {
            return;
        }
        let mut free = self.inner.free.lock();
        if free.len() < self.inner.config.max_pooled {
            data.clear();
            free.push(data);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PacketBuf
// ---------------------------------------------------------------------------

/// An owned, growable byte buffer borrowed from a [`BufferPool`].
///
/// Dropping it returns the storage to the pool. Freezing it hands the
/// storage to a reference-counted [`Bytes`] instead.
pub struct PacketBuf {
    data: Vec<u8>,
    pool: BufferPool,
}

impl PacketBuf {
    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes the buffer can hold before it has to grow.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for writers. `Vec<u8>` implements `bytes::BufMut`.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Appends `bytes` to the end of the buffer.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Shrinks the capacity down to the written length.
    pub fn trim(&mut self) {
        self.data.shrink_to_fit();
    }

    /// Converts the buffer into an immutable, reference-counted [`Bytes`].
    ///
    /// The buffer still counts as outstanding until every clone of the
    /// returned `Bytes` has been dropped.
    pub fn freeze(self) -> Bytes {
        Bytes::from_owner(self)
    }
}

impl Deref for PacketBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PacketBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .finish()
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.recycle(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_counts_outstanding_until_drop() {
        let pool = BufferPool::default();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.outstanding(), 2);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_dropped_buffer_is_reused_and_cleared() {
        let pool = BufferPool::default();
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"stale");
        drop(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
    }

    #[test]
    fn test_acquire_with_capacity_reserves_space() {
        let pool = BufferPool::default();
        let buf = pool.acquire_with_capacity(4096);
        assert!(buf.capacity() >= 4096);
    }

    #[test]
    fn test_trim_shrinks_to_written_length() {
        let pool = BufferPool::default();
        let mut buf = pool.acquire_with_capacity(1024);
        buf.extend_from_slice(&[7; 10]);
        buf.trim();
        assert_eq!(buf.len(), 10);
        assert!(buf.capacity() < 1024);
    }

    #[test]
    fn test_frozen_buffer_stays_outstanding_until_last_clone_drops() {
        let pool = BufferPool::default();
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"shared");
        let bytes = buf.freeze();
        let view = bytes.clone();
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(&view[..], b"shared");

        drop(bytes);
        assert_eq!(pool.outstanding(), 1);
        drop(view);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_oversized_buffer_is_not_pooled() {
        let pool = BufferPool::new(PoolConfig {
            max_retained_capacity: 64,
            ..PoolConfig::default()
        });
        let mut buf = pool.acquire_with_capacity(16);
        buf.extend_from_slice(&[0; 1000]);
        drop(buf);

        assert_eq!(pool.stats().pooled, 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_pool_keeps_at_most_max_pooled() {
        let pool = BufferPool::new(PoolConfig {
            max_pooled: 2,
            ..PoolConfig::default()
        });
        let bufs: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(bufs);
        assert_eq!(pool.stats().pooled, 2);
    }

    #[test]
    fn test_pool_config_deserializes_with_defaults() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "max_pooled": 8 }"#).unwrap();
        assert_eq!(config.max_pooled, 8);
        assert_eq!(config.initial_capacity, 256);
    }
}
