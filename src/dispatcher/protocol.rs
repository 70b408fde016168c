//! Command Wire Protocol
//!
//! Envelopes exchanged between dispatcher factories. A request names the target
//! dispatcher id and carries the marshalled command; the reply carries the
//! marshalled result, the failure message of a command that raised, or the
//! "no such service" marker when the id is not registered on the receiver.

use serde::{Deserialize, Serialize};

/// Version of the envelope format; requests with another version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    pub version: u8,
    /// Dispatcher id the command is addressed to.
    pub service: String,
    /// The marshalled command.
    pub command: Vec<u8>,
}

impl CommandRequest {
    pub fn new(service: &str, command: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service: service.to_string(),
            command,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandReply {
    /// The marshalled command result.
    Success(Vec<u8>),
    /// The command raised, or the request could not be processed.
    Failure(String),
    NoSuchService,
}
