use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Transport address of a group member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub String);

impl Address {
    /// Generates a fresh, globally unique address.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A member of the group.
///
/// Carries the transport address and a human readable name. Two nodes are equal
/// when their addresses are equal; the name is informational only.
#[derive(Debug, Clone)]
pub struct Node {
    address: Address,
    name: String,
}

impl Node {
    pub fn new(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Immutable snapshot of the group at one view.
///
/// Member order is the view order; the first member is the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    local: Node,
    members: Vec<Node>,
}

impl Membership {
    pub fn new(local: Node, members: Vec<Node>) -> Self {
        Self { local, members }
    }

    /// Membership of a group containing only the local member.
    pub fn singleton(local: Node) -> Self {
        Self {
            members: vec![local.clone()],
            local,
        }
    }

    pub fn local_member(&self) -> &Node {
        &self.local
    }

    pub fn members(&self) -> &[Node] {
        &self.members
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.members.contains(node)
    }

    pub fn coordinator(&self) -> Option<&Node> {
        self.members.first()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator() == Some(&self.local)
    }

    /// Members of `previous` absent from `current`.
    pub fn left_members(previous: &Membership, current: &Membership) -> Vec<Node> {
        previous
            .members
            .iter()
            .filter(|member| !current.contains(member))
            .cloned()
            .collect()
    }

    /// Members of `current` absent from `previous`.
    pub fn joined_members(previous: &Membership, current: &Membership) -> Vec<Node> {
        Self::left_members(current, previous)
    }
}
