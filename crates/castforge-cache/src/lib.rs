//! Prepared packets for many protocol versions at once.
//!
//! Broadcasting the same packets to thousands of peers shouldn't mean
//! encoding them thousands of times. A [`VersionedPacketCache`] encodes
//! each packet once per protocol version (and optionally once more
//! without compression), then hands out shared, reference-counted views
//! of those bytes to every connection on that version.
//!
//! # Lifecycle
//!
//! ```text
//! Building ──build()──→ Built ──release()──→ Released
//!  prepare*()            packets(v)           (everything freed)
//! ```
//!
//! # Key types
//!
//! - [`VersionedPacketCache`]: the cache itself
//! - [`CacheState`]: where a cache is in its lifecycle
//! - [`CacheError`]: what can go wrong

mod cache;
mod error;

pub use cache::{CacheState, VersionedPacketCache};
pub use error::CacheError;
