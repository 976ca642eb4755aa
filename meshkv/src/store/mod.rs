//! Shard storage: an append-only binary log over a fixed region.
//!
//! - [`record`]: the on-region record schema and a bounds-checked reader
//! - [`ShardStore`]: put / pull / clear over one region

pub mod record;
mod shard_store;

pub use shard_store::{ShardStore, DEFAULT_ALIGNMENT};
