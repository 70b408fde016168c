use crate::membership::types::Node;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

/// Change to the entries of a [`CacheRegistry`](super::CacheRegistry).
#[derive(Debug, Clone)]
pub enum RegistryEvent<K, V> {
    Created(HashMap<K, V>),
    Modified(HashMap<K, V>),
    Removed(HashMap<K, V>),
}

impl<K, V> RegistryEvent<K, V> {
    pub fn kind(&self) -> RegistryEventKind {
        match self {
            Self::Created(_) => RegistryEventKind::Created,
            Self::Modified(_) => RegistryEventKind::Modified,
            Self::Removed(_) => RegistryEventKind::Removed,
        }
    }

    pub fn entries(&self) -> &HashMap<K, V> {
        match self {
            Self::Created(entries) | Self::Modified(entries) | Self::Removed(entries) => entries,
        }
    }
}

// Comparing the entry maps needs `K: Eq + Hash`, which a derive would not require.
impl<K: Eq + Hash, V: PartialEq> PartialEq for RegistryEvent<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.entries() == other.entries()
    }
}

impl<K: Eq + Hash, V: Eq> Eq for RegistryEvent<K, V> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryEventKind {
    Created,
    Modified,
    Removed,
}

impl fmt::Display for RegistryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Receives entry changes made by other members, and repairs performed locally.
///
/// Runs on the listener's own worker; an error is logged and delivery continues.
pub trait RegistryListener<K, V>: Send + Sync + 'static {
    fn registry_changed(&self, event: &RegistryEvent<K, V>) -> anyhow::Result<()>;
}

impl<K, V, F> RegistryListener<K, V> for F
where
    F: Fn(&RegistryEvent<K, V>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn registry_changed(&self, event: &RegistryEvent<K, V>) -> anyhow::Result<()> {
        self(event)
    }
}

/// Receives the new provider set of one service whenever it changes.
pub trait ServiceProviderListener: Send + Sync + 'static {
    fn providers_changed(&self, providers: &BTreeSet<Node>) -> anyhow::Result<()>;
}

impl<F> ServiceProviderListener for F
where
    F: Fn(&BTreeSet<Node>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn providers_changed(&self, providers: &BTreeSet<Node>) -> anyhow::Result<()> {
        self(providers)
    }
}
