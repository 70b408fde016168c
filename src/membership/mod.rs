//! Group Membership Module
//!
//! The read-only model of the group this process belongs to. Membership itself is
//! provided by the transport; this module only gives it a shape.
//!
//! ## Core Concepts
//! - **Node**: a member identity (transport address plus display name), equal by address.
//! - **Membership**: an immutable, ordered snapshot of the members at one view.
//! - **Group**: access to the current membership and subscription to its changes.

pub mod group;
pub mod types;

pub use group::{Group, GroupListener, LocalGroup, MembershipEvent, NodeCache};
pub use types::{Address, Membership, Node};

#[cfg(test)]
mod tests;
