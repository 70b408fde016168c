use super::hash::ConsistentHash;
use crate::error::CacheResult;
use crate::membership::types::Address;

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Bounds of a cache key.
pub trait CacheKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds of a cache value.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + 'static {}

/// Per-invocation options of a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Return only once the write is visible on every member.
    ForceSynchronous,
    /// The caller does not need the previous value.
    IgnoreReturnValues,
    /// Lock the key for the duration of the write.
    ForceWriteLock,
    /// Do not raise entry events for the write.
    SkipListenerNotification,
}

impl Flag {
    pub fn is_set(flags: &[Flag], flag: Flag) -> bool {
        flags.contains(&flag)
    }
}

/// Topology of the cache before and after a rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    pub start: ConsistentHash,
    pub end: ConsistentHash,
}

impl TopologyChange {
    /// Whether the member list differs between the two topologies.
    pub fn members_changed(&self) -> bool {
        self.start.members() != self.end.members()
    }

    /// Members present at the start and absent at the end.
    pub fn left_members(&self) -> Vec<Address> {
        self.start
            .members()
            .iter()
            .filter(|member| !self.end.contains(member))
            .cloned()
            .collect()
    }

    /// Whether `address` rejoined, i.e. is only part of the end topology.
    pub fn joined(&self, address: &Address) -> bool {
        !self.start.contains(address) && self.end.contains(address)
    }
}

/// Notification raised by a replicated cache.
///
/// `origin_local` is set on the member whose handle performed the write.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<K, V> {
    Created {
        key: K,
        value: V,
        origin_local: bool,
    },
    Modified {
        key: K,
        value: V,
        origin_local: bool,
    },
    Removed {
        key: K,
        old_value: V,
        origin_local: bool,
    },
    TopologyChanged(TopologyChange),
}

/// Receives the events of a replicated cache.
///
/// Invoked synchronously on the thread that performed the write or installed the
/// topology; implementations must hand off any real work.
pub trait CacheListener<K, V>: Send + Sync + 'static {
    fn on_event(&self, event: &CacheEvent<K, V>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Remapping function of [`ReplicatedCache::compute`]; returning `None` removes the entry.
pub type ComputeFn<V> = Box<dyn FnOnce(Option<&V>) -> Option<V> + Send>;

/// A key/value cache replicated across the members of a group.
#[async_trait]
pub trait ReplicatedCache<K: CacheKey, V: CacheValue>: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Address of the member this handle belongs to.
    fn local_address(&self) -> &Address;

    /// Consistent hash of the installed topology.
    fn consistent_hash(&self) -> ConsistentHash;

    async fn get(&self, key: &K) -> CacheResult<Option<V>>;

    /// Stores `value`, returning the previous value.
    async fn put(&self, key: K, value: V, flags: &[Flag]) -> CacheResult<Option<V>>;

    /// Stores `value` only if `key` is absent, returning the existing value otherwise.
    async fn put_if_absent(&self, key: K, value: V, flags: &[Flag]) -> CacheResult<Option<V>>;

    async fn remove(&self, key: &K, flags: &[Flag]) -> CacheResult<Option<V>>;

    /// Atomically remaps the value of `key`, returning the new value.
    async fn compute(&self, key: K, remap: ComputeFn<V>, flags: &[Flag]) -> CacheResult<Option<V>>;

    async fn keys(&self) -> CacheResult<Vec<K>>;

    fn add_listener(&self, listener: Arc<dyn CacheListener<K, V>>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}
