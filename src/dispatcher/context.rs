//! Dispatcher Context Registry
//!
//! Maps dispatcher ids to the contexts their commands execute against. Each entry is
//! type-erased behind [`ServiceContext`] so one factory can serve dispatchers of any
//! command type: the entry decodes the command, runs it through the dispatcher's
//! contextualizer and encodes the reply.

use super::protocol::CommandReply;
use super::types::{Command, Contextualizer, contextualized};
use crate::error::{DispatchError, DispatchResult};
use crate::marshal::Marshaller;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Server side of one registered dispatcher.
pub trait ServiceContext: Send + Sync + 'static {
    /// Decodes and executes a marshalled command, producing the reply.
    fn execute(&self, command: &[u8]) -> CommandReply;
}

/// Runs `command` against `context` inside `contextualizer`.
///
/// Errors and panics raised by the command are returned as messages.
pub(crate) fn run_command<Cmd: Command>(
    command: &Cmd,
    context: &Cmd::Context,
    contextualizer: &dyn Contextualizer,
) -> Result<Cmd::Output, String> {
    let outcome = contextualized(contextualizer, || {
        panic::catch_unwind(AssertUnwindSafe(|| command.execute(context)))
    });
    match outcome {
        Some(Ok(Ok(value))) => Ok(value),
        Some(Ok(Err(e))) => Err(format!("{:#}", e)),
        Some(Err(_)) => Err("command panicked".to_string()),
        None => Err("contextualizer did not run the command".to_string()),
    }
}

/// The context registered for a dispatcher id: the execution context, the marshaller
/// for commands and results, and the contextualizer.
pub struct DispatcherContext<Cmd: Command, M> {
    service: String,
    context: Arc<Cmd::Context>,
    marshaller: Arc<M>,
    contextualizer: Arc<dyn Contextualizer>,
    _command: PhantomData<fn() -> Cmd>,
}

impl<Cmd: Command, M: Marshaller> DispatcherContext<Cmd, M> {
    pub fn new(
        service: &str,
        context: Arc<Cmd::Context>,
        marshaller: Arc<M>,
        contextualizer: Arc<dyn Contextualizer>,
    ) -> Self {
        Self {
            service: service.to_string(),
            context,
            marshaller,
            contextualizer,
            _command: PhantomData,
        }
    }
}

impl<Cmd: Command, M: Marshaller> ServiceContext for DispatcherContext<Cmd, M> {
    fn execute(&self, command: &[u8]) -> CommandReply {
        let command: Cmd = match self.marshaller.unmarshal(command) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!("Failed to unmarshal command for {}: {}", self.service, e);
                return CommandReply::Failure(format!("undecodable command: {}", e));
            }
        };

        match run_command(&command, &self.context, self.contextualizer.as_ref()) {
            Ok(value) => match self.marshaller.marshal(&value) {
                Ok(bytes) => CommandReply::Success(bytes.to_vec()),
                Err(e) => {
                    tracing::error!("Failed to marshal result of {}: {}", self.service, e);
                    CommandReply::Failure(format!("unmarshallable result: {}", e))
                }
            },
            Err(message) => {
                tracing::debug!("Command for {} failed: {}", self.service, message);
                CommandReply::Failure(message)
            }
        }
    }
}

/// Dispatcher id to context map owned by a factory.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: DashMap<String, Arc<dyn ServiceContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `context` under `id`; an id can only be registered once at a time.
    pub fn register(&self, id: &str, context: Arc<dyn ServiceContext>) -> DispatchResult<()> {
        match self.contexts.entry(id.to_string()) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateRegistration(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(context);
                tracing::debug!("Registered command dispatcher: {}", id);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.contexts.remove(id).is_some();
        if removed {
            tracing::debug!("Unregistered command dispatcher: {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ServiceContext>> {
        self.contexts.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.contexts.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
