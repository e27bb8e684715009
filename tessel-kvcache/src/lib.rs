//! Tessel KV cache: per-layer past key/value slots swapped wholesale each step.

pub mod cache;

pub use cache::KvCache;
