//! Replicated Cache Module
//!
//! The key/value cache the registries are built on.
//!
//! ## Core Concepts
//! - **Ownership**: `ConsistentHash` assigns every key a primary owner among the members
//!   of the current topology. Registries use it to decide which member repairs an entry.
//! - **Events**: Writes raise `Created`, `Modified` and `Removed` events on every member,
//!   flagged with whether the write originated locally. Rebalances raise
//!   `TopologyChanged` carrying the consistent hash before and after.
//! - **Flags**: Writes accept per-call `Flag`s such as `SkipListenerNotification`.
//!
//! ## Submodules
//! - **`types`**: The `ReplicatedCache` contract, events, listeners and flags.
//! - **`hash`**: Segment-based consistent hash.
//! - **`memory`**: In-process implementation shared by all members of a test cluster.

pub mod hash;
pub mod memory;
pub mod types;

pub use hash::ConsistentHash;
pub use memory::{InMemoryCache, InMemoryCacheCluster};
pub use types::{
    CacheEvent, CacheKey, CacheListener, CacheValue, ComputeFn, Flag, ListenerId,
    ReplicatedCache, TopologyChange,
};

#[cfg(test)]
mod tests;
