//! In-Process Network
//!
//! A transport fabric connecting endpoints that live in the same process. Endpoints
//! are grouped into partitions; each partition has its own view, and requests only
//! reach members of the sender's partition. `split` and `heal` reproduce network
//! partitions and the merge views installed when they heal.

use super::types::{Receiver, ReplyFuture, Transport, View, ViewId};
use crate::error::TransportError;
use crate::membership::types::Address;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct NetworkState {
    next_view_id: u64,
    partitions: Vec<Vec<Address>>,
}

struct NetworkShared {
    cluster: String,
    endpoints: DashMap<Address, Arc<InProcessTransport>>,
    state: Mutex<NetworkState>,
}

/// Shared fabric that endpoints connect to.
#[derive(Clone)]
pub struct InProcessNetwork {
    shared: Arc<NetworkShared>,
}

impl InProcessNetwork {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(NetworkShared {
                cluster: cluster.into(),
                endpoints: DashMap::new(),
                state: Mutex::new(NetworkState {
                    next_view_id: 1,
                    partitions: Vec::new(),
                }),
            }),
        }
    }

    /// Connects a new endpoint named `name`; it joins the first partition.
    pub fn connect(&self, name: impl Into<String>) -> Arc<InProcessTransport> {
        let address = Address::random();
        let endpoint = Arc::new(InProcessTransport {
            network: Arc::downgrade(&self.shared),
            cluster: self.shared.cluster.clone(),
            address: address.clone(),
            name: name.into(),
            view: RwLock::new(View {
                id: ViewId(0),
                members: vec![address.clone()],
                merged: false,
            }),
            receiver: RwLock::new(None),
            open: AtomicBool::new(true),
        });
        self.shared.endpoints.insert(address.clone(), endpoint.clone());

        tracing::info!(
            "Endpoint {} ({}) connected to {}",
            endpoint.name,
            address,
            self.shared.cluster
        );

        let installed = {
            let mut state = self.shared.state.lock();
            if state.partitions.is_empty() {
                state.partitions.push(Vec::new());
            }
            state.partitions[0].push(address);
            let members = state.partitions[0].clone();
            self.install(&mut state, members, false)
        };
        self.deliver(installed);

        endpoint
    }

    /// Disconnects the endpoint at `address`; its partition installs a new view.
    pub fn disconnect(&self, address: &Address) {
        let Some((_, endpoint)) = self.shared.endpoints.remove(address) else {
            return;
        };
        endpoint.open.store(false, Ordering::SeqCst);
        *endpoint.receiver.write() = None;

        let installed = {
            let mut state = self.shared.state.lock();
            let mut remaining = None;
            for partition in state.partitions.iter_mut() {
                if let Some(index) = partition.iter().position(|member| member == address) {
                    partition.remove(index);
                    remaining = Some(partition.clone());
                }
            }
            state.partitions.retain(|partition| !partition.is_empty());
            match remaining {
                Some(members) if !members.is_empty() => self.install(&mut state, members, false),
                _ => Vec::new(),
            }
        };

        tracing::info!("Endpoint {} disconnected", address);
        self.deliver(installed);
    }

    /// Splits the connected endpoints into the given partitions.
    ///
    /// Endpoints not named in any group form one extra partition.
    pub fn split(&self, groups: &[Vec<Address>]) {
        let installed = {
            let mut state = self.shared.state.lock();
            let mut partitions: Vec<Vec<Address>> = groups
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .filter(|address| self.shared.endpoints.contains_key(*address))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .filter(|group| !group.is_empty())
                .collect();

            let rest: Vec<Address> = state
                .partitions
                .iter()
                .flatten()
                .filter(|address| !partitions.iter().any(|group| group.contains(*address)))
                .cloned()
                .collect();
            if !rest.is_empty() {
                partitions.push(rest);
            }

            state.partitions = partitions.clone();
            partitions
                .into_iter()
                .flat_map(|members| self.install(&mut state, members, false))
                .collect::<Vec<_>>()
        };

        tracing::info!("Network {} split", self.shared.cluster);
        self.deliver(installed);
    }

    /// Heals all partitions into one and installs a merge view on every endpoint.
    pub fn heal(&self) {
        let installed = {
            let mut state = self.shared.state.lock();
            if state.partitions.len() < 2 {
                return;
            }
            let members: Vec<Address> = state.partitions.iter().flatten().cloned().collect();
            state.partitions = vec![members.clone()];
            self.install(&mut state, members, true)
        };

        tracing::info!("Network {} healed", self.shared.cluster);
        self.deliver(installed);
    }

    pub fn endpoint(&self, address: &Address) -> Option<Arc<InProcessTransport>> {
        self.shared.endpoints.get(address).map(|entry| entry.clone())
    }

    /// Stores `view` on each member and returns the receivers to notify.
    fn install(
        &self,
        state: &mut NetworkState,
        members: Vec<Address>,
        merged: bool,
    ) -> Vec<(Arc<dyn Receiver>, View)> {
        let view = View {
            id: ViewId(state.next_view_id),
            members,
            merged,
        };
        state.next_view_id += 1;

        tracing::debug!("Installing view {:?} with {} members", view.id, view.members.len());

        view.members
            .iter()
            .filter_map(|address| self.shared.endpoints.get(address).map(|entry| entry.clone()))
            .filter_map(|endpoint| {
                *endpoint.view.write() = view.clone();
                endpoint
                    .receiver
                    .read()
                    .clone()
                    .map(|receiver| (receiver, view.clone()))
            })
            .collect()
    }

    /// Delivers views outside the state lock so receivers may call back into the network.
    fn deliver(&self, installed: Vec<(Arc<dyn Receiver>, View)>) {
        for (receiver, view) in installed {
            receiver.view_accepted(&view);
        }
    }
}

/// One endpoint of an [`InProcessNetwork`].
pub struct InProcessTransport {
    network: Weak<NetworkShared>,
    cluster: String,
    address: Address,
    name: String,
    view: RwLock<View>,
    receiver: RwLock<Option<Arc<dyn Receiver>>>,
    open: AtomicBool,
}

impl InProcessTransport {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Transport for InProcessTransport {
    fn cluster_name(&self) -> &str {
        &self.cluster
    }

    fn local_address(&self) -> Address {
        self.address.clone()
    }

    fn logical_name(&self, address: &Address) -> Option<String> {
        let network = self.network.upgrade()?;
        let endpoint = network.endpoints.get(address)?;
        Some(endpoint.name.clone())
    }

    fn view(&self) -> View {
        self.view.read().clone()
    }

    fn send(
        &self,
        target: &Address,
        request: Bytes,
        timeout: Duration,
    ) -> Result<ReplyFuture, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let network = self.network.upgrade().ok_or(TransportError::Closed)?;

        let unreachable = TransportError::Unreachable(target.clone());
        if !self.view.read().contains(target) {
            return Ok(futures::future::ready(Err(unreachable)).boxed());
        }
        let receiver = network
            .endpoints
            .get(target)
            .and_then(|endpoint| endpoint.receiver.read().clone());
        let Some(receiver) = receiver else {
            return Ok(futures::future::ready(Err(unreachable)).boxed());
        };

        // The remote side runs to completion even if the caller stops waiting.
        let handling = tokio::spawn(receiver.handle(&self.address, request));
        let target = target.clone();
        Ok(async move {
            match tokio::time::timeout(timeout, handling).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(TransportError::Unreachable(target)),
                Err(_) => Err(TransportError::Timeout {
                    address: target,
                    timeout,
                }),
            }
        }
        .boxed())
    }

    fn set_receiver(&self, receiver: Option<Arc<dyn Receiver>>) {
        *self.receiver.write() = receiver;
    }
}
