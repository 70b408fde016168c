use crate::error::{DispatchError, DispatchResult};
use crate::membership::types::Node;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// A unit of work executed against the context registered for a dispatcher.
///
/// Commands travel over the wire, so the same type must be used by every member
/// registering the dispatcher id. Multi-operation services typically use an enum.
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The execution context registered with the dispatcher.
    type Context: Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn execute(&self, context: &Self::Context) -> anyhow::Result<Self::Output>;
}

/// Re-establishes the ambient context of a dispatcher around command execution.
pub trait Contextualizer: Send + Sync + 'static {
    /// Runs `task` inside the context. Must invoke `task` exactly once.
    fn contextualize(&self, task: &mut dyn FnMut());
}

/// Executes commands inside a `tracing` span naming the dispatcher.
pub struct SpanContextualizer {
    span: tracing::Span,
}

impl SpanContextualizer {
    pub fn new(service: &str) -> Self {
        Self {
            span: tracing::info_span!("command", service = %service),
        }
    }
}

impl Contextualizer for SpanContextualizer {
    fn contextualize(&self, task: &mut dyn FnMut()) {
        let _entered = self.span.enter();
        task();
    }
}

/// Runs `f` through `contextualizer`, returning `None` if it never ran.
pub(crate) fn contextualized<R>(
    contextualizer: &dyn Contextualizer,
    f: impl FnOnce() -> R,
) -> Option<R> {
    let mut f = Some(f);
    let mut result = None;
    contextualizer.contextualize(&mut || {
        if let Some(f) = f.take() {
            result = Some(f());
        }
    });
    result
}

/// A handle executing commands of one type on members of the group.
pub trait CommandDispatcher<Cmd: Command>: Send + Sync {
    /// The id the dispatcher is registered under.
    fn id(&self) -> &str;

    /// The context commands execute against on this member.
    fn context(&self) -> &Cmd::Context;

    /// Executes `command` on `member`.
    ///
    /// The local member is served in-process without marshalling. An `Err` means the
    /// command could not be sent; failures after sending resolve the future.
    fn execute_on_member(
        &self,
        command: &Cmd,
        member: &Node,
    ) -> DispatchResult<CommandFuture<Cmd::Output>>;

    /// Executes `command` on every current member except `excluded`.
    fn execute_on_group(
        &self,
        command: &Cmd,
        excluded: &[Node],
    ) -> DispatchResult<GroupResponses<Cmd::Output>>;
}

/// Result of a command sent to one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The command ran and produced a value.
    Executed(T),
    /// The member has no dispatcher registered under the id, typically because it
    /// closed it concurrently. Not an error.
    NoSuchService,
}

impl<T> Outcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Executed(value) => Some(value),
            Self::NoSuchService => None,
        }
    }

    pub fn is_no_such_service(&self) -> bool {
        matches!(self, Self::NoSuchService)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Executed(value) => Outcome::Executed(f(value)),
            Self::NoSuchService => Outcome::NoSuchService,
        }
    }
}

pub type CommandResult<T> = DispatchResult<Outcome<T>>;

enum FutureState<T> {
    Ready(Option<CommandResult<T>>),
    Spawned(JoinHandle<CommandResult<T>>),
}

/// Pending result of a command sent to one member.
///
/// Locally executed commands are already resolved; remote ones complete when the
/// reply arrives, the request times out, or the future is cancelled.
pub struct CommandFuture<T> {
    state: FutureState<T>,
}

// No field is structurally pinned.
impl<T> Unpin for CommandFuture<T> {}

impl<T> CommandFuture<T> {
    pub(crate) fn ready(result: CommandResult<T>) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }

    pub(crate) fn spawned(handle: JoinHandle<CommandResult<T>>) -> Self {
        Self {
            state: FutureState::Spawned(handle),
        }
    }

    /// Stops waiting for the reply. The member still executes the command.
    ///
    /// Returns `false` when the future had already completed.
    pub fn cancel(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => false,
            FutureState::Spawned(handle) => {
                if handle.is_finished() {
                    return false;
                }
                handle.abort();
                true
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => true,
            FutureState::Spawned(handle) => handle.is_finished(),
        }
    }
}

impl<T> Future for CommandFuture<T> {
    type Output = CommandResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(DispatchError::Cancelled)))
            }
            FutureState::Spawned(handle) => Pin::new(handle).poll(cx).map(|joined| match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(DispatchError::Cancelled),
                Err(e) => std::panic::resume_unwind(e.into_panic()),
            }),
        }
    }
}

const PENDING: u8 = 0;
const SETTLED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared between a remote response in a [`GroupResponses`] and the task awaiting
/// its reply. Whichever side moves it out of "pending" first decides the outcome: a
/// reply that settles first stays in the map, a cancel that wins removes the entry.
#[derive(Clone)]
pub(crate) struct Settlement(Arc<AtomicU8>);

impl Settlement {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(PENDING)))
    }

    /// Marks the reply as arrived. Returns `false` if the response was cancelled first.
    pub(crate) fn settle(&self) -> bool {
        self.transition(SETTLED)
    }

    fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Per-member results of a command sent to the group.
///
/// A future cancelled through [`GroupResponses::cancel`] is pruned from the map;
/// futures that complete or fail stay visible.
pub struct GroupResponses<T> {
    responses: DashMap<Node, CommandFuture<T>>,
    settlements: DashMap<Node, Settlement>,
}

impl<T: Send + 'static> GroupResponses<T> {
    pub(crate) fn new() -> Self {
        Self {
            responses: DashMap::new(),
            settlements: DashMap::new(),
        }
    }

    pub(crate) fn insert(&self, node: Node, future: CommandFuture<T>) {
        self.responses.insert(node, future);
    }

    /// Settlement to hand to the task awaiting the reply of `node`.
    pub(crate) fn settlement(&self, node: &Node) -> Settlement {
        self.settlements
            .entry(node.clone())
            .or_insert_with(Settlement::new)
            .clone()
    }

    /// Cancels every pending future.
    pub(crate) fn cancel_all(&self) {
        let nodes: Vec<Node> = self
            .settlements
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for node in nodes {
            self.cancel(&node);
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.responses.contains_key(node)
    }

    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.responses.iter().map(|entry| entry.key().clone()).collect();
        nodes.sort();
        nodes
    }

    /// Cancels the future for `node` and prunes it from the map.
    ///
    /// Returns `false`, leaving the entry in place, when there is no remote response
    /// for `node` or its reply already arrived.
    pub fn cancel(&self, node: &Node) -> bool {
        let won = self
            .settlements
            .get(node)
            .is_some_and(|settlement| settlement.cancel());
        if !won {
            return false;
        }
        if let Some((_, future)) = self.responses.remove(node) {
            future.cancel();
            tracing::trace!("Pruned cancelled response of {}", node);
        }
        true
    }

    /// Removes and returns the future for `node`.
    pub fn take(&self, node: &Node) -> Option<CommandFuture<T>> {
        self.settlements.remove(node);
        self.responses.remove(node).map(|(_, future)| future)
    }

    /// Waits for every remaining future.
    pub async fn collect(self) -> HashMap<Node, CommandResult<T>> {
        let nodes = self.nodes();
        let mut results = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if let Some(future) = self.take(&node) {
                results.insert(node, future.await);
            }
        }
        results
    }
}
