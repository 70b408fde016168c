use super::types::{Address, Membership, Node};
use crate::listener::{ListenerWorker, Listeners, Registration};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Receives membership changes of a [`Group`].
///
/// Invoked on the listener's own worker, never on the transport thread that
/// delivered the view.
pub trait GroupListener: Send + Sync + 'static {
    /// `merged` is set when `current` is the result of healing a partition.
    fn membership_changed(
        &self,
        previous: &Membership,
        current: &Membership,
        merged: bool,
    ) -> anyhow::Result<()>;
}

impl<F> GroupListener for F
where
    F: Fn(&Membership, &Membership, bool) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn membership_changed(
        &self,
        previous: &Membership,
        current: &Membership,
        merged: bool,
    ) -> anyhow::Result<()> {
        self(previous, current, merged)
    }
}

/// A membership change as queued on a listener worker.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub previous: Membership,
    pub current: Membership,
    pub merged: bool,
}

/// Read-only view of the group this process belongs to.
pub trait Group: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn local_member(&self) -> Node;

    /// Current membership snapshot.
    fn membership(&self) -> Membership;

    /// Resolves the node for a transport address, creating and caching it on first use.
    fn create_node(&self, address: &Address) -> Node;

    /// Subscribes `listener` to membership changes.
    fn register(&self, listener: Arc<dyn GroupListener>) -> Registration;

    /// Whether this group can never contain other members.
    fn is_singleton(&self) -> bool;
}

/// Spawns the worker that feeds `listener` for `group`.
pub(crate) fn group_listener_worker(
    runtime: &Handle,
    group: &str,
    listener: Arc<dyn GroupListener>,
) -> ListenerWorker<MembershipEvent> {
    ListenerWorker::spawn(runtime, format!("group:{}", group), move |event: MembershipEvent| {
        listener.membership_changed(&event.previous, &event.current, event.merged)
    })
}

/// Cache of the nodes created for transport addresses.
///
/// Entries are evicted when their member leaves the view so a returning address is
/// resolved afresh.
#[derive(Default)]
pub struct NodeCache {
    nodes: DashMap<Address, Node>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, address: &Address, name: impl FnOnce() -> String) -> Node {
        if let Some(node) = self.nodes.get(address) {
            return node.clone();
        }
        self.nodes
            .entry(address.clone())
            .or_insert_with(|| Node::new(address.clone(), name()))
            .clone()
    }

    pub fn evict<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) {
        for address in addresses {
            if self.nodes.remove(address).is_some() {
                tracing::trace!("Evicted node for {}", address);
            }
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Group of a non-clustered process: the local member only, forever.
pub struct LocalGroup {
    name: String,
    local: Node,
}

impl LocalGroup {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>) -> Arc<Self> {
        let node_name = node_name.into();
        Arc::new(Self {
            name: name.into(),
            local: Node::new(Address(node_name.clone()), node_name),
        })
    }
}

impl Group for LocalGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_member(&self) -> Node {
        self.local.clone()
    }

    fn membership(&self) -> Membership {
        Membership::singleton(self.local.clone())
    }

    fn create_node(&self, address: &Address) -> Node {
        if address == self.local.address() {
            return self.local.clone();
        }
        Node::new(address.clone(), address.0.clone())
    }

    fn register(&self, _listener: Arc<dyn GroupListener>) -> Registration {
        // Membership of a local group never changes.
        Registration::empty()
    }

    fn is_singleton(&self) -> bool {
        true
    }
}

/// Fans a membership change out to every registered group listener.
pub(crate) fn notify_group_listeners(
    listeners: &Listeners<MembershipEvent>,
    previous: Membership,
    current: Membership,
    merged: bool,
) {
    if listeners.is_empty() {
        return;
    }
    listeners.notify(&MembershipEvent {
        previous,
        current,
        merged,
    });
}
