//! Error Types
//!
//! Typed failures surfaced by the dispatcher, the registries and the collaborators
//! they consume. Command bodies and listener callbacks report their own failures
//! through `anyhow::Error`; those are converted into strings at the boundary.

use crate::membership::types::{Address, Node};
use std::time::Duration;
use thiserror::Error;

/// Failures of the consumed messaging transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("member {0} is unreachable")]
    Unreachable(Address),
    #[error("request to {address} timed out after {timeout:?}")]
    Timeout { address: Address, timeout: Duration },
}

/// Failures while encoding or decoding wire payloads.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the consumed replicated cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache {0} is stopped")]
    Stopped(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

/// Failures reported by a dispatcher or its factory.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A dispatcher is already registered under this id.
    #[error("a command dispatcher is already registered for service {0}")]
    DuplicateRegistration(String),
    /// The factory was closed.
    #[error("command dispatcher factory is closed")]
    Closed,
    #[error("node {0} is unreachable")]
    Unreachable(Node),
    #[error("command sent to {node} timed out after {timeout:?}")]
    Timeout { node: Node, timeout: Duration },
    #[error("command was cancelled")]
    Cancelled,
    /// The command itself raised on the executing member.
    #[error("command failed on {node}: {message}")]
    CommandFailed { node: Node, message: String },
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error(transparent)]
    Transport(TransportError),
}

impl DispatchError {
    /// Maps a transport failure for a request sent to `node`.
    pub fn from_transport(node: &Node, error: TransportError) -> Self {
        match error {
            TransportError::Unreachable(_) => Self::Unreachable(node.clone()),
            TransportError::Timeout { timeout, .. } => Self::Timeout {
                node: node.clone(),
                timeout,
            },
            other => Self::Transport(other),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failures reported by the registries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("service {0} is already registered by this member")]
    DuplicateRegistration(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
pub type CacheResult<T> = Result<T, CacheError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
