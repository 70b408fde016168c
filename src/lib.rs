//! Cluster Command Dispatch Library
//!
//! Group-wide command execution and cache-backed registries for a set of members that
//! share a group-communication channel. The binary (`main.rs`) runs an in-process
//! demonstration cluster on top of it.
//!
//! ## Architecture Modules
//! - **`transport`**: The messaging contract (request/response plus group views) and an
//!   in-process network with partition and merge support.
//! - **`membership`**: Nodes, membership snapshots and the `Group` abstraction.
//! - **`marshal`**: Pluggable byte encoding of commands and replies.
//! - **`dispatcher`**: Command dispatchers. A factory multiplexes many dispatchers over
//!   one transport; a local dispatcher serves non-clustered deployments.
//! - **`cache`**: The replicated cache contract, its consistent hash and an in-memory
//!   implementation.
//! - **`registry`**: The per-member entry registry and the service provider registry,
//!   including their repair after topology changes.
//! - **`listener`**: Dedicated, ordered delivery workers shared by every listener API.
//! - **`config`** / **`error`**: Tunables and the error types of each layer.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod marshal;
pub mod membership;
pub mod registry;
pub mod transport;
