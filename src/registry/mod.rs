//! Registry Module
//!
//! Cache-backed registries shared by the members of a group.
//!
//! ## Core Concepts
//! - **Cache Registry**: each member publishes exactly one entry, keyed by its own
//!   address, and reads the entries of every live member.
//! - **Service Provider Registry**: services map to the set of members providing them;
//!   members add or remove only themselves.
//! - **Repair**: after a topology change the primary owner of an orphaned key cleans it
//!   up, and a member rejoining after a merge restores what it had published.
//! - **Notification**: listeners run on their own workers, never on the cache's thread.

pub mod cache;
pub mod provider;
pub mod types;

pub use cache::CacheRegistry;
pub use provider::{ProviderSet, ServiceProviderRegistration, ServiceProviderRegistry};
pub use types::{RegistryEvent, RegistryEventKind, RegistryListener, ServiceProviderListener};
