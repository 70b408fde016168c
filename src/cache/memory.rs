//! In-Memory Replicated Cache
//!
//! A replicated cache whose members share one concurrent store inside the process.
//! Each member holds an [`InMemoryCache`] handle; writes through any handle are
//! immediately visible to all of them, and entry events are raised on every member
//! with `origin_local` set on the writer's side only.
//!
//! Topology is driven explicitly: `rebalance` installs the consistent hash for a new
//! member list and raises `TopologyChanged` on every joined member, and `leave`
//! stops a member's handle without touching the entries it wrote, the way a crashed
//! member leaves them behind.
//!
//! Writes are applied synchronously under the key's shard lock, which satisfies
//! `ForceSynchronous` and `ForceWriteLock` without further work.

use super::hash::ConsistentHash;
use super::types::{
    CacheEvent, CacheKey, CacheListener, CacheValue, ComputeFn, Flag, ListenerId,
    ReplicatedCache, TopologyChange,
};
use crate::error::{CacheError, CacheResult};
use crate::membership::types::Address;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct MemberState<K, V> {
    listeners: DashMap<u64, Arc<dyn CacheListener<K, V>>>,
}

struct ClusterShared<K, V> {
    name: String,
    store: DashMap<K, V>,
    members: DashMap<Address, Arc<MemberState<K, V>>>,
    topology: RwLock<ConsistentHash>,
    next_listener: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> ClusterShared<K, V> {
    /// Raises an event on every joined member; `event` is told whether the member is
    /// `origin`.
    fn emit(&self, origin: &Address, event: impl Fn(bool) -> CacheEvent<K, V>) {
        let targets: Vec<(bool, Arc<dyn CacheListener<K, V>>)> = self
            .members
            .iter()
            .flat_map(|member| {
                let local = member.key() == origin;
                member
                    .listeners
                    .iter()
                    .map(|listener| (local, listener.value().clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (local, listener) in targets {
            listener.on_event(&event(local));
        }
    }
}

/// The shared store and topology of an in-memory cache.
pub struct InMemoryCacheCluster<K, V> {
    shared: Arc<ClusterShared<K, V>>,
}

impl<K, V> Clone for InMemoryCacheCluster<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> InMemoryCacheCluster<K, V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(ClusterShared {
                name: name.into(),
                store: DashMap::new(),
                members: DashMap::new(),
                topology: RwLock::new(ConsistentHash::new(Vec::new())),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the cache on `address`. The topology is unchanged until `rebalance`.
    pub fn join(&self, address: Address) -> Arc<InMemoryCache<K, V>> {
        self.shared
            .members
            .entry(address.clone())
            .or_insert_with(|| {
                Arc::new(MemberState {
                    listeners: DashMap::new(),
                })
            });
        tracing::debug!("Cache {} started on {}", self.shared.name, address);

        Arc::new(InMemoryCache {
            shared: self.shared.clone(),
            address,
        })
    }

    /// Stops the cache on `address`; its listeners are dropped, its entries stay.
    pub fn leave(&self, address: &Address) {
        if self.shared.members.remove(address).is_some() {
            tracing::debug!("Cache {} stopped on {}", self.shared.name, address);
        }
    }

    /// Installs the topology of `members` and notifies every joined member.
    pub fn rebalance(&self, members: impl IntoIterator<Item = Address>) {
        let end = ConsistentHash::new(members);
        let start = std::mem::replace(&mut *self.shared.topology.write(), end.clone());

        tracing::info!(
            "Cache {} rebalanced from {} to {} members",
            self.shared.name,
            start.members().len(),
            end.members().len()
        );

        let change = TopologyChange { start, end };
        // Topology events have no originating member.
        let nobody = Address(String::new());
        self.shared
            .emit(&nobody, |_| CacheEvent::TopologyChanged(change.clone()));
    }

    pub fn topology(&self) -> ConsistentHash {
        self.shared.topology.read().clone()
    }

    /// Number of entries in the shared store.
    pub fn len(&self) -> usize {
        self.shared.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.store.is_empty()
    }
}

/// One member's handle on an [`InMemoryCacheCluster`].
pub struct InMemoryCache<K, V> {
    shared: Arc<ClusterShared<K, V>>,
    address: Address,
}

impl<K: CacheKey, V: CacheValue> InMemoryCache<K, V> {
    fn check_running(&self) -> CacheResult<()> {
        if self.shared.members.contains_key(&self.address) {
            Ok(())
        } else {
            Err(CacheError::Stopped(self.shared.name.clone()))
        }
    }

    fn emit(&self, flags: &[Flag], event: impl Fn(bool) -> CacheEvent<K, V>) {
        if !Flag::is_set(flags, Flag::SkipListenerNotification) {
            self.shared.emit(&self.address, event);
        }
    }
}

fn returned<V>(flags: &[Flag], value: Option<V>) -> Option<V> {
    if Flag::is_set(flags, Flag::IgnoreReturnValues) {
        None
    } else {
        value
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> ReplicatedCache<K, V> for InMemoryCache<K, V> {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn local_address(&self) -> &Address {
        &self.address
    }

    fn consistent_hash(&self) -> ConsistentHash {
        self.shared.topology.read().clone()
    }

    async fn get(&self, key: &K) -> CacheResult<Option<V>> {
        self.check_running()?;
        Ok(self.shared.store.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: K, value: V, flags: &[Flag]) -> CacheResult<Option<V>> {
        self.check_running()?;
        let previous = self.shared.store.insert(key.clone(), value.clone());

        let created = previous.is_none();
        self.emit(flags, |origin_local| {
            if created {
                CacheEvent::Created {
                    key: key.clone(),
                    value: value.clone(),
                    origin_local,
                }
            } else {
                CacheEvent::Modified {
                    key: key.clone(),
                    value: value.clone(),
                    origin_local,
                }
            }
        });
        Ok(returned(flags, previous))
    }

    async fn put_if_absent(&self, key: K, value: V, flags: &[Flag]) -> CacheResult<Option<V>> {
        self.check_running()?;
        let existing = match self.shared.store.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
                None
            }
        };

        if existing.is_none() {
            self.emit(flags, |origin_local| CacheEvent::Created {
                key: key.clone(),
                value: value.clone(),
                origin_local,
            });
        }
        Ok(returned(flags, existing))
    }

    async fn remove(&self, key: &K, flags: &[Flag]) -> CacheResult<Option<V>> {
        self.check_running()?;
        let removed = self.shared.store.remove(key).map(|(_, value)| value);

        if let Some(old_value) = &removed {
            self.emit(flags, |origin_local| CacheEvent::Removed {
                key: key.clone(),
                old_value: old_value.clone(),
                origin_local,
            });
        }
        Ok(returned(flags, removed))
    }

    async fn compute(&self, key: K, remap: ComputeFn<V>, flags: &[Flag]) -> CacheResult<Option<V>> {
        self.check_running()?;
        let (previous, next) = match self.shared.store.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.get().clone();
                match remap(Some(&previous)) {
                    Some(next) => {
                        entry.insert(next.clone());
                        (Some(previous), Some(next))
                    }
                    None => {
                        entry.remove();
                        (Some(previous), None)
                    }
                }
            }
            Entry::Vacant(entry) => match remap(None) {
                Some(next) => {
                    entry.insert(next.clone());
                    (None, Some(next))
                }
                None => (None, None),
            },
        };

        match (previous, &next) {
            (None, Some(value)) => self.emit(flags, |origin_local| CacheEvent::Created {
                key: key.clone(),
                value: value.clone(),
                origin_local,
            }),
            (Some(_), Some(value)) => self.emit(flags, |origin_local| CacheEvent::Modified {
                key: key.clone(),
                value: value.clone(),
                origin_local,
            }),
            (Some(old_value), None) => self.emit(flags, |origin_local| CacheEvent::Removed {
                key: key.clone(),
                old_value: old_value.clone(),
                origin_local,
            }),
            (None, None) => {}
        }
        Ok(returned(flags, next))
    }

    async fn keys(&self) -> CacheResult<Vec<K>> {
        self.check_running()?;
        Ok(self
            .shared
            .store
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn add_listener(&self, listener: Arc<dyn CacheListener<K, V>>) -> ListenerId {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Some(member) = self.shared.members.get(&self.address) {
            member.listeners.insert(id, listener);
        }
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Some(member) = self.shared.members.get(&self.address) {
            member.listeners.remove(&id.0);
        }
    }
}
