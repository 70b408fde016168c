//! Service Provider Registry
//!
//! Tracks which members provide which services. Each service is one cache entry whose
//! value is the set of addresses of its providers; members add and remove only their
//! own address with atomic `compute` calls, so concurrent registrants never overwrite
//! each other.
//!
//! ## Topology Repair
//! After a topology change every member strips the departed addresses from the
//! services whose key it primarily owns, and a member rejoining after a merge
//! re-asserts its own registrations. Repairs are ordinary cache writes, so listeners
//! observe them like any other change.

use super::types::ServiceProviderListener;
use crate::cache::types::{
    CacheEvent, CacheKey, CacheListener, ComputeFn, Flag, ListenerId, ReplicatedCache,
    TopologyChange,
};
use crate::error::{RegistryError, RegistryResult};
use crate::listener::ListenerWorker;
use crate::membership::group::Group;
use crate::membership::types::{Address, Node};

use anyhow::Context;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

/// Addresses of the members providing a service.
pub type ProviderSet = BTreeSet<Address>;

fn add_provider(address: Address) -> ComputeFn<ProviderSet> {
    Box::new(move |current| {
        let mut providers = current.cloned().unwrap_or_default();
        providers.insert(address);
        Some(providers)
    })
}

fn remove_providers(addresses: Vec<Address>) -> ComputeFn<ProviderSet> {
    Box::new(move |current| {
        let mut providers = current?.clone();
        for address in &addresses {
            providers.remove(address);
        }
        (!providers.is_empty()).then_some(providers)
    })
}

struct ProviderShared<S: CacheKey> {
    group: Arc<dyn Group>,
    cache: Arc<dyn ReplicatedCache<S, ProviderSet>>,
    runtime: Handle,
    local: Address,
    /// Services registered by the local member, with their listener if any.
    services: DashMap<S, Option<ListenerWorker<BTreeSet<Node>>>>,
}

pub struct ServiceProviderRegistry<S: CacheKey> {
    shared: Arc<ProviderShared<S>>,
    cache_listener: ListenerId,
}

impl<S: CacheKey> ServiceProviderRegistry<S> {
    pub async fn new(group: Arc<dyn Group>, cache: Arc<dyn ReplicatedCache<S, ProviderSet>>) -> Self {
        let shared = Arc::new(ProviderShared {
            local: group.local_member().address().clone(),
            runtime: Handle::current(),
            services: DashMap::new(),
            group,
            cache,
        });
        let cache_listener = shared.cache.add_listener(Arc::new(ProviderEventHandler {
            shared: Arc::downgrade(&shared),
        }));
        Self {
            shared,
            cache_listener,
        }
    }

    pub fn group(&self) -> &dyn Group {
        self.shared.group.as_ref()
    }

    /// Registers the local member as a provider of `service`.
    pub async fn register(&self, service: S) -> RegistryResult<ServiceProviderRegistration<S>> {
        self.register_worker(service, None).await
    }

    /// Registers the local member as a provider of `service`; `listener` receives the
    /// provider set whenever it changes.
    pub async fn register_with_listener(
        &self,
        service: S,
        listener: Arc<dyn ServiceProviderListener>,
    ) -> RegistryResult<ServiceProviderRegistration<S>> {
        let label = format!("{:?}", service);
        let worker = ListenerWorker::spawn(
            &self.shared.runtime,
            format!("service:{}", label),
            move |providers: BTreeSet<Node>| {
                listener.providers_changed(&providers).with_context(|| {
                    format!("providers of {} changed to {} members", label, providers.len())
                })
            },
        );
        self.register_worker(service, Some(worker)).await
    }

    async fn register_worker(
        &self,
        service: S,
        worker: Option<ListenerWorker<BTreeSet<Node>>>,
    ) -> RegistryResult<ServiceProviderRegistration<S>> {
        match self.shared.services.entry(service.clone()) {
            Entry::Occupied(_) => {
                return Err(RegistryError::DuplicateRegistration(format!("{:?}", service)));
            }
            Entry::Vacant(entry) => {
                entry.insert(worker);
            }
        }

        let added = self
            .shared
            .cache
            .compute(
                service.clone(),
                add_provider(self.shared.local.clone()),
                &[Flag::ForceSynchronous, Flag::IgnoreReturnValues],
            )
            .await;
        if let Err(e) = added {
            self.shared.services.remove(&service);
            return Err(e.into());
        }

        tracing::debug!("Registered {} as provider of {:?}", self.shared.local, service);
        Ok(ServiceProviderRegistration {
            shared: self.shared.clone(),
            service,
            active: true,
        })
    }

    /// Members currently providing `service`.
    pub async fn providers(&self, service: &S) -> RegistryResult<BTreeSet<Node>> {
        self.shared.providers(service).await
    }

    /// Every service with at least one provider.
    pub async fn services(&self) -> RegistryResult<HashSet<S>> {
        Ok(self.shared.cache.keys().await?.into_iter().collect())
    }

    /// Stops listening to the cache. Outstanding registrations stay valid until closed.
    pub fn close(self) {}
}

impl<S: CacheKey> Drop for ServiceProviderRegistry<S> {
    fn drop(&mut self) {
        self.shared.cache.remove_listener(self.cache_listener);
    }
}

/// The local member's registration as provider of one service.
///
/// Closing it, or dropping it, withdraws the local member from the provider set.
pub struct ServiceProviderRegistration<S: CacheKey> {
    shared: Arc<ProviderShared<S>>,
    service: S,
    active: bool,
}

impl<S: CacheKey> ServiceProviderRegistration<S> {
    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn providers(&self) -> RegistryResult<BTreeSet<Node>> {
        self.shared.providers(&self.service).await
    }

    pub async fn close(mut self) {
        self.active = false;
        self.shared.unregister(&self.service).await;
    }
}

impl<S: CacheKey> Drop for ServiceProviderRegistration<S> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let shared = self.shared.clone();
        let service = self.service.clone();
        self.shared.runtime.spawn(async move {
            shared.unregister(&service).await;
        });
    }
}

impl<S: CacheKey> ProviderShared<S> {
    fn nodes(&self, addresses: &ProviderSet) -> BTreeSet<Node> {
        addresses
            .iter()
            .map(|address| self.group.create_node(address))
            .collect()
    }

    async fn providers(&self, service: &S) -> RegistryResult<BTreeSet<Node>> {
        let addresses = self.cache.get(service).await?.unwrap_or_default();
        Ok(self.nodes(&addresses))
    }

    async fn unregister(&self, service: &S) {
        if let Some((_, Some(worker))) = self.services.remove(service) {
            worker.close();
        }

        let removed = self
            .cache
            .compute(
                service.clone(),
                remove_providers(vec![self.local.clone()]),
                &[Flag::ForceSynchronous, Flag::IgnoreReturnValues],
            )
            .await;
        match removed {
            Ok(_) => tracing::debug!("Unregistered {} as provider of {:?}", self.local, service),
            Err(e) => tracing::warn!(
                "Failed to unregister {} as provider of {:?}: {}",
                self.local,
                service,
                e
            ),
        }
    }

    fn providers_changed(&self, service: &S, addresses: &ProviderSet) {
        if let Some(entry) = self.services.get(service)
            && let Some(worker) = entry.value()
        {
            worker.submit(self.nodes(addresses));
        }
    }

    async fn repair(self: Arc<Self>, change: TopologyChange) {
        let left = change.left_members();
        if !left.is_empty() {
            match self.cache.keys().await {
                Ok(keys) => {
                    for service in keys
                        .into_iter()
                        .filter(|service| change.end.is_primary(service, &self.local))
                    {
                        self.purge(service, &left).await;
                    }
                }
                Err(e) => tracing::warn!(
                    "Failed to list services of {} for repair: {}",
                    self.cache.name(),
                    e
                ),
            }
        }

        if change.joined(&self.local) {
            let services: Vec<S> = self.services.iter().map(|entry| entry.key().clone()).collect();
            for service in services {
                self.reassert(service).await;
            }
        }
    }

    /// Removes `left` from the providers of `service` if any of them is listed.
    async fn purge(&self, service: S, left: &[Address]) {
        let stale = match self.cache.get(&service).await {
            Ok(Some(providers)) => left.iter().any(|address| providers.contains(address)),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Failed to read providers of {:?}: {}", service, e);
                false
            }
        };
        if !stale {
            return;
        }

        let flags = [
            Flag::ForceSynchronous,
            Flag::IgnoreReturnValues,
            Flag::ForceWriteLock,
        ];
        match self
            .cache
            .compute(service.clone(), remove_providers(left.to_vec()), &flags)
            .await
        {
            Ok(_) => tracing::info!(
                "Removed departed providers of {:?} from {}",
                service,
                self.cache.name()
            ),
            Err(e) => tracing::warn!(
                "Failed to remove departed providers of {:?} from {}: {}",
                service,
                self.cache.name(),
                e
            ),
        }
    }

    /// Adds the local member back to `service` if a merge lost it.
    async fn reassert(&self, service: S) {
        let present = match self.cache.get(&service).await {
            Ok(providers) => providers.is_some_and(|providers| providers.contains(&self.local)),
            Err(e) => {
                tracing::warn!("Failed to read providers of {:?}: {}", service, e);
                return;
            }
        };
        if present {
            return;
        }

        let added = self
            .cache
            .compute(
                service.clone(),
                add_provider(self.local.clone()),
                &[Flag::ForceSynchronous, Flag::IgnoreReturnValues],
            )
            .await;
        match added {
            Ok(_) => tracing::info!(
                "Restored {} as provider of {:?} after merge",
                self.local,
                service
            ),
            Err(e) => tracing::warn!(
                "Failed to restore {} as provider of {:?}: {}",
                self.local,
                service,
                e
            ),
        }
    }
}

/// Cache listener of a service provider registry; holds the registry weakly.
struct ProviderEventHandler<S: CacheKey> {
    shared: Weak<ProviderShared<S>>,
}

impl<S: CacheKey> CacheListener<S, ProviderSet> for ProviderEventHandler<S> {
    fn on_event(&self, event: &CacheEvent<S, ProviderSet>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match event {
            CacheEvent::Created { key, value, .. } | CacheEvent::Modified { key, value, .. } => {
                shared.providers_changed(key, value);
            }
            CacheEvent::Removed { key, .. } => shared.providers_changed(key, &ProviderSet::new()),
            CacheEvent::TopologyChanged(change) if change.members_changed() => {
                let runtime = shared.runtime.clone();
                runtime.spawn(shared.repair(change.clone()));
            }
            CacheEvent::TopologyChanged(_) => {}
        }
    }
}
