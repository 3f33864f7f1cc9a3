//! Worker-local zlib compressors.
//!
//! A deflate stream is stateful and can't be shared between threads, so
//! each worker thread lazily creates its own. Streams live in a
//! thread-local map keyed by an owner id, so an encoder's compressor on
//! one thread never collides with another encoder's.
//!
//! A stream is torn down either explicitly, by the worker that owns it
//! ([`WorkerCompressors::release_current_worker`]), or implicitly when
//! the thread exits and its thread-locals are dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ZlibCompressor;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static COMPRESSORS: RefCell<HashMap<u64, ZlibCompressor>> =
        RefCell::new(HashMap::new());
}

/// A handle to one owner's per-thread compressors.
///
/// Clones share the owner id, so an encoder rebuilt with new settings
/// keeps using (and later releases) the same streams.
#[derive(Debug, Clone)]
pub struct WorkerCompressors {
    owner: u64,
}

impl WorkerCompressors {
    /// Allocates a fresh owner id. No stream is created until first use.
    pub fn new() -> Self {
        Self {
            owner: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The id this handle's streams are keyed by.
    pub fn owner_id(&self) -> u64 {
        self.owner
    }

    /// Runs `f` with the calling thread's compressor, creating it on first
    /// use. A stream created for a different level is replaced.
    pub fn with_compressor<R>(
        &self,
        level: u32,
        f: impl FnOnce(&mut ZlibCompressor) -> R,
    ) -> R {
        let level = level.min(9);
        COMPRESSORS.with_borrow_mut(|compressors| {
            let compressor = compressors.entry(self.owner).or_insert_with(|| {
                tracing::debug!(owner = self.owner, level, "creating worker compressor");
                ZlibCompressor::new(level)
            });
            if compressor.level() != level {
                tracing::debug!(
                    owner = self.owner,
                    from = compressor.level(),
                    to = level,
                    "recreating worker compressor for new level"
                );
                *compressor = ZlibCompressor::new(level);
            }
            f(compressor)
        })
    }

    /// Drops the calling thread's compressor for this owner.
    ///
    /// Returns `true` if there was one. Other threads' compressors are
    /// untouched; each worker releases its own.
    pub fn release_current_worker(&self) -> bool {
        let released =
            COMPRESSORS.with_borrow_mut(|compressors| compressors.remove(&self.owner).is_some());
        if released {
            tracing::debug!(owner = self.owner, "released worker compressor");
        }
        released
    }

    /// Whether the calling thread currently holds a compressor for this owner.
    pub fn is_active_on_current_worker(&self) -> bool {
        COMPRESSORS.with_borrow(|compressors| compressors.contains_key(&self.owner))
    }
}

impl Default for WorkerCompressors {
    fn default() -> Self {
        Self::new()
    }
}
