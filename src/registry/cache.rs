//! Cache Registry
//!
//! Every member publishes one `(K, V)` entry into a replicated cache keyed by its own
//! address, and reads the entries of all live members. Entry events raised by other
//! members are forwarded to registered listeners.
//!
//! ## Topology Repair
//! When the cache topology changes, entries of departed members are removed by the
//! member that is primary owner of their key under the new topology, so exactly one
//! member deletes each orphan. A member that rejoins after a merge re-publishes its
//! own entry if the other partition purged it. Repairs run on a spawned task and
//! notify the local listeners with the same events a remote write would have raised.

use super::types::{RegistryEvent, RegistryListener};
use crate::cache::types::{
    CacheEvent, CacheKey, CacheListener, CacheValue, Flag, ListenerId, ReplicatedCache,
    TopologyChange,
};
use crate::error::RegistryResult;
use crate::listener::{ListenerWorker, Listeners, Registration};
use crate::membership::group::Group;
use crate::membership::types::{Address, Node};

use anyhow::Context;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

struct RegistryShared<K: CacheKey, V: CacheValue> {
    group: Arc<dyn Group>,
    cache: Arc<dyn ReplicatedCache<Address, (K, V)>>,
    runtime: Handle,
    local: Address,
    entry: (K, V),
    listeners: Arc<Listeners<RegistryEvent<K, V>>>,
}

pub struct CacheRegistry<K: CacheKey, V: CacheValue> {
    shared: Arc<RegistryShared<K, V>>,
    cache_listener: ListenerId,
}

impl<K: CacheKey, V: CacheValue> CacheRegistry<K, V> {
    /// Publishes `(key, value)` as the entry of the local member and starts listening
    /// to the cache.
    pub async fn create(
        group: Arc<dyn Group>,
        cache: Arc<dyn ReplicatedCache<Address, (K, V)>>,
        key: K,
        value: V,
    ) -> RegistryResult<Self> {
        let local = group.local_member().address().clone();
        let entry = (key, value);
        cache
            .put(
                local.clone(),
                entry.clone(),
                &[Flag::ForceSynchronous, Flag::IgnoreReturnValues],
            )
            .await?;

        let shared = Arc::new(RegistryShared {
            runtime: Handle::current(),
            listeners: Listeners::new(),
            group,
            cache,
            local,
            entry,
        });
        let cache_listener = shared.cache.add_listener(Arc::new(CacheEventHandler {
            shared: Arc::downgrade(&shared),
        }));

        tracing::debug!(
            "Registry {} published entry of {}",
            shared.cache.name(),
            shared.local
        );
        Ok(Self {
            shared,
            cache_listener,
        })
    }

    pub fn group(&self) -> &dyn Group {
        self.shared.group.as_ref()
    }

    /// Entries of the members of the current membership.
    pub async fn entries(&self) -> RegistryResult<HashMap<K, V>> {
        let membership = self.shared.group.membership();
        let mut entries = HashMap::with_capacity(membership.members().len());
        for member in membership.members() {
            if let Some((key, value)) = self.shared.cache.get(member.address()).await? {
                entries.insert(key, value);
            }
        }
        Ok(entries)
    }

    pub async fn entry(&self, node: &Node) -> RegistryResult<Option<(K, V)>> {
        Ok(self.shared.cache.get(node.address()).await?)
    }

    /// Subscribes `listener` on a dedicated worker.
    pub fn register(&self, listener: Arc<dyn RegistryListener<K, V>>) -> Registration {
        let name = format!("registry:{}", self.shared.cache.name());
        let worker = ListenerWorker::spawn(
            &self.shared.runtime,
            name,
            move |event: RegistryEvent<K, V>| {
                listener
                    .registry_changed(&event)
                    .with_context(|| describe(&event))
            },
        );
        self.shared.listeners.add(worker)
    }

    /// Removes the local entry and releases every listener.
    ///
    /// A failed removal is only logged: the remaining members purge the entry once
    /// this member leaves.
    pub async fn close(self) {
        self.shared.cache.remove_listener(self.cache_listener);
        if let Err(e) = self
            .shared
            .cache
            .remove(&self.shared.local, &[Flag::IgnoreReturnValues])
            .await
        {
            tracing::debug!(
                "Could not remove entry of {} from {}: {}",
                self.shared.local,
                self.shared.cache.name(),
                e
            );
        }
        self.shared.listeners.clear();
    }
}

impl<K: CacheKey, V: CacheValue> Drop for CacheRegistry<K, V> {
    fn drop(&mut self) {
        self.shared.cache.remove_listener(self.cache_listener);
        self.shared.listeners.clear();
    }
}

/// Listener failure context: the event kind and the keys of the affected entries.
pub(crate) fn describe<K: CacheKey, V>(event: &RegistryEvent<K, V>) -> String {
    let mut keys: Vec<String> = event.entries().keys().map(|key| format!("{:?}", key)).collect();
    keys.sort();
    format!("{} notification of entries [{}]", event.kind(), keys.join(", "))
}

/// Departed members whose entries the member at `local` has to remove.
pub(crate) fn orphaned_members(change: &TopologyChange, local: &Address) -> Vec<Address> {
    change
        .left_members()
        .into_iter()
        .filter(|member| change.end.is_primary(member, local))
        .collect()
}

impl<K: CacheKey, V: CacheValue> RegistryShared<K, V> {
    fn notify(&self, event: RegistryEvent<K, V>) {
        self.listeners.notify(&event);
    }

    async fn repair(self: Arc<Self>, change: TopologyChange) {
        let orphaned = orphaned_members(&change, &self.local);
        let mut removed = HashMap::new();
        if !orphaned.is_empty() {
            match self.cache.keys().await {
                Ok(keys) => {
                    for key in keys.iter().filter(|key| orphaned.contains(key)) {
                        let flags = [Flag::ForceSynchronous, Flag::ForceWriteLock];
                        match self.cache.remove(key, &flags).await {
                            Ok(Some((entry_key, value))) => {
                                removed.insert(entry_key, value);
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!(
                                "Failed to remove entry of departed member {} from {}: {}",
                                key,
                                self.cache.name(),
                                e
                            ),
                        }
                    }
                }
                Err(e) => tracing::warn!(
                    "Failed to list entries of {} for repair: {}",
                    self.cache.name(),
                    e
                ),
            }
        }

        let mut created = HashMap::new();
        if change.joined(&self.local) {
            let (key, value) = self.entry.clone();
            let restored = self
                .cache
                .put_if_absent(
                    self.local.clone(),
                    (key.clone(), value.clone()),
                    &[Flag::ForceSynchronous],
                )
                .await;
            match restored {
                Ok(None) => {
                    tracing::info!(
                        "Restored entry of {} in {} after merge",
                        self.local,
                        self.cache.name()
                    );
                    created.insert(key, value);
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::warn!(
                    "Failed to restore entry of {} in {}: {}",
                    self.local,
                    self.cache.name(),
                    e
                ),
            }
        }

        if !removed.is_empty() {
            tracing::info!(
                "Removed {} entries of departed members from {}",
                removed.len(),
                self.cache.name()
            );
            self.notify(RegistryEvent::Removed(removed));
        }
        if !created.is_empty() {
            self.notify(RegistryEvent::Created(created));
        }
    }
}

/// Cache listener of a registry; holds the registry weakly.
struct CacheEventHandler<K: CacheKey, V: CacheValue> {
    shared: Weak<RegistryShared<K, V>>,
}

impl<K: CacheKey, V: CacheValue> CacheListener<Address, (K, V)> for CacheEventHandler<K, V> {
    fn on_event(&self, event: &CacheEvent<Address, (K, V)>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match event {
            CacheEvent::Created {
                value: (key, value),
                origin_local: false,
                ..
            } => shared.notify(RegistryEvent::Created(HashMap::from([(
                key.clone(),
                value.clone(),
            )]))),
            CacheEvent::Modified {
                value: (key, value),
                origin_local: false,
                ..
            } => shared.notify(RegistryEvent::Modified(HashMap::from([(
                key.clone(),
                value.clone(),
            )]))),
            CacheEvent::Removed {
                old_value: (key, value),
                origin_local: false,
                ..
            } => shared.notify(RegistryEvent::Removed(HashMap::from([(
                key.clone(),
                value.clone(),
            )]))),
            CacheEvent::TopologyChanged(change) if change.members_changed() => {
                let runtime = shared.runtime.clone();
                runtime.spawn(shared.repair(change.clone()));
            }
            _ => {}
        }
    }
}
