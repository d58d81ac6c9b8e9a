//! Durable client-side storage: a SQLite-backed key-value store and the
//! per-feed fallback cache built on top of it.

mod cache;
mod kv;

pub use cache::{CachedFeed, FeedCache};
pub use kv::KvStore;
