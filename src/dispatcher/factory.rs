//! Channel Command Dispatcher Factory
//!
//! Owns the shared transport endpoint and multiplexes every dispatcher created from
//! it: outbound commands are wrapped in a [`CommandRequest`] naming the dispatcher id,
//! inbound requests are routed to the context registered under that id and executed
//! on the bounded [`CommandExecutor`].
//!
//! The factory is also the [`Group`] of the endpoint. Each installed view evicts the
//! nodes of departed members and is forwarded to the registered group listeners.

use super::channel::ChannelCommandDispatcher;
use super::context::{ContextRegistry, DispatcherContext};
use super::executor::CommandExecutor;
use super::local::LocalCommandDispatcher;
use super::protocol::{CommandReply, CommandRequest, PROTOCOL_VERSION};
use super::types::{
    Command, CommandFuture, CommandResult, Contextualizer, Outcome, Settlement, SpanContextualizer,
};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::listener::{Listeners, Registration};
use crate::marshal::{BincodeMarshaller, Marshaller};
use crate::membership::group::{
    Group, GroupListener, MembershipEvent, NodeCache, group_listener_worker,
    notify_group_listeners,
};
use crate::membership::types::{Address, Membership, Node};
use crate::transport::types::{Receiver, Transport, View};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

pub struct ChannelCommandDispatcherFactory<M: Marshaller = BincodeMarshaller> {
    transport: Arc<dyn Transport>,
    marshaller: Arc<M>,
    config: DispatcherConfig,
    runtime: Handle,
    local: Node,
    nodes: NodeCache,
    view: RwLock<View>,
    contexts: ContextRegistry,
    executor: CommandExecutor,
    listeners: Arc<Listeners<MembershipEvent>>,
    closed: AtomicBool,
}

impl<M: Marshaller> ChannelCommandDispatcherFactory<M> {
    /// Creates the factory and installs it as the up-handler of `transport`.
    pub async fn new(
        transport: Arc<dyn Transport>,
        marshaller: M,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        let local_address = transport.local_address();
        let nodes = NodeCache::new();
        let local = nodes.get_or_create(&local_address, || {
            transport
                .logical_name(&local_address)
                .unwrap_or_else(|| local_address.0.clone())
        });

        let factory = Arc::new(Self {
            view: RwLock::new(transport.view()),
            marshaller: Arc::new(marshaller),
            runtime: Handle::current(),
            executor: CommandExecutor::new(config.executor_threads),
            listeners: Listeners::new(),
            contexts: ContextRegistry::new(),
            closed: AtomicBool::new(false),
            transport,
            config,
            local,
            nodes,
        });

        factory.transport.set_receiver(Some(Arc::new(InboundHandler {
            factory: Arc::downgrade(&factory),
            marshaller: factory.marshaller.clone(),
        })));

        tracing::info!(
            "Command dispatcher factory started for {} on {}",
            factory.transport.cluster_name(),
            factory.local
        );
        factory
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn marshaller(&self) -> &M {
        &self.marshaller
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Registers `context` under `id`, executing inbound commands inside a span named
    /// after the id.
    pub fn create_command_dispatcher<Cmd: Command>(
        self: &Arc<Self>,
        id: &str,
        context: Cmd::Context,
    ) -> DispatchResult<ChannelCommandDispatcher<Cmd, M>> {
        self.create_command_dispatcher_with(id, context, Arc::new(SpanContextualizer::new(id)))
    }

    /// Registers `context` under `id`; commands run through `contextualizer`.
    ///
    /// Fails with `DuplicateRegistration` while another dispatcher holds the id.
    pub fn create_command_dispatcher_with<Cmd: Command>(
        self: &Arc<Self>,
        id: &str,
        context: Cmd::Context,
        contextualizer: Arc<dyn Contextualizer>,
    ) -> DispatchResult<ChannelCommandDispatcher<Cmd, M>> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let context = Arc::new(context);
        self.contexts.register(
            id,
            Arc::new(DispatcherContext::<Cmd, M>::new(
                id,
                context.clone(),
                self.marshaller.clone(),
                contextualizer.clone(),
            )),
        )?;

        let local = LocalCommandDispatcher::new(id, self.local.clone(), context, contextualizer);
        Ok(ChannelCommandDispatcher::new(
            self.clone(),
            local,
            self.config.request_timeout(),
        ))
    }

    pub(crate) fn unregister(&self, id: &str) -> bool {
        self.contexts.unregister(id)
    }

    /// Sends a marshalled command for dispatcher `service` to `member`.
    ///
    /// The reply is awaited on a spawned task, which settles `settlement` when the
    /// reply arrives.
    pub(crate) fn send<T>(
        &self,
        service: &str,
        command: Bytes,
        member: &Node,
        timeout: Duration,
        settlement: Option<Settlement>,
    ) -> DispatchResult<CommandFuture<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        let request = CommandRequest::new(service, command.to_vec());
        let payload = self.marshaller.marshal(&request)?;

        let reply = {
            let _entered = self.runtime.enter();
            self.transport
                .send(member.address(), payload, timeout)
                .map_err(|e| DispatchError::from_transport(member, e))?
        };

        let marshaller = self.marshaller.clone();
        let node = member.clone();
        let handle = self.runtime.spawn(async move {
            let result = match reply.await {
                Ok(bytes) => decode_reply(marshaller.as_ref(), &node, &bytes),
                Err(e) => Err(DispatchError::from_transport(&node, e)),
            };
            if let Some(settlement) = settlement {
                settlement.settle();
            }
            result
        });
        Ok(CommandFuture::spawned(handle))
    }

    /// Stops serving commands.
    ///
    /// New registrations fail and inbound requests answer "no such service"; inbound
    /// commands already running get the configured drain timeout to finish.
    pub async fn close(&self) -> DispatchResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }

        if !self.executor.shutdown(self.config.drain_timeout()).await {
            tracing::warn!("Closed dispatcher factory before inbound commands finished");
        }
        self.transport.set_receiver(None);
        self.listeners.clear();

        tracing::info!("Command dispatcher factory on {} closed", self.local);
        Ok(())
    }

    fn membership_of(&self, view: &View) -> Membership {
        let members = view
            .members
            .iter()
            .map(|address| self.create_node(address))
            .collect();
        Membership::new(self.local.clone(), members)
    }

    async fn process(&self, sender: &Address, request: &[u8]) -> CommandReply {
        let request: CommandRequest = match self.marshaller.unmarshal(request) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("Failed to unmarshal request from {}: {}", sender, e);
                return CommandReply::Failure(format!("undecodable request: {}", e));
            }
        };
        if request.version != PROTOCOL_VERSION {
            tracing::warn!(
                "Rejecting request from {} with protocol version {}",
                sender,
                request.version
            );
            return CommandReply::Failure(format!(
                "unsupported protocol version {}",
                request.version
            ));
        }
        if self.is_closed() {
            return CommandReply::NoSuchService;
        }

        let Some(context) = self.contexts.get(&request.service) else {
            tracing::debug!("No dispatcher registered for {} (from {})", request.service, sender);
            return CommandReply::NoSuchService;
        };

        let command = request.command;
        self.executor
            .execute(move || context.execute(&command))
            .await
            .unwrap_or(CommandReply::NoSuchService)
    }

    fn view_accepted(&self, view: &View) {
        let previous = std::mem::replace(&mut *self.view.write(), view.clone());
        if previous.id == view.id {
            return;
        }

        let previous_membership = self.membership_of(&previous);
        self.nodes.evict(View::left_members(&previous, view));
        let current_membership = self.membership_of(view);

        tracing::info!(
            "View {:?} accepted on {}: {} members{}",
            view.id,
            self.local,
            view.members.len(),
            if view.merged { " (merge)" } else { "" }
        );
        notify_group_listeners(
            &self.listeners,
            previous_membership,
            current_membership,
            view.merged,
        );
    }
}

fn decode_reply<T, M>(marshaller: &M, node: &Node, bytes: &[u8]) -> CommandResult<T>
where
    T: DeserializeOwned,
    M: Marshaller,
{
    match marshaller.unmarshal::<CommandReply>(bytes)? {
        CommandReply::Success(value) => Ok(Outcome::Executed(marshaller.unmarshal(&value)?)),
        CommandReply::Failure(message) => Err(DispatchError::CommandFailed {
            node: node.clone(),
            message,
        }),
        CommandReply::NoSuchService => Ok(Outcome::NoSuchService),
    }
}

impl<M: Marshaller> Group for ChannelCommandDispatcherFactory<M> {
    fn name(&self) -> &str {
        self.transport.cluster_name()
    }

    fn local_member(&self) -> Node {
        self.local.clone()
    }

    fn membership(&self) -> Membership {
        let view = self.view.read().clone();
        self.membership_of(&view)
    }

    fn create_node(&self, address: &Address) -> Node {
        self.nodes.get_or_create(address, || {
            self.transport
                .logical_name(address)
                .unwrap_or_else(|| address.0.clone())
        })
    }

    fn register(&self, listener: Arc<dyn GroupListener>) -> Registration {
        let worker = group_listener_worker(&self.runtime, self.name(), listener);
        self.listeners.add(worker)
    }

    fn is_singleton(&self) -> bool {
        false
    }
}

/// Up-handler installed on the transport.
///
/// Holds the factory weakly so the transport does not keep it alive.
struct InboundHandler<M: Marshaller> {
    factory: Weak<ChannelCommandDispatcherFactory<M>>,
    marshaller: Arc<M>,
}

impl<M: Marshaller> Receiver for InboundHandler<M> {
    fn handle(&self, sender: &Address, request: Bytes) -> BoxFuture<'static, Bytes> {
        let factory = self.factory.upgrade();
        let marshaller = self.marshaller.clone();
        let sender = sender.clone();
        async move {
            let reply = match factory {
                Some(factory) => factory.process(&sender, &request).await,
                None => CommandReply::NoSuchService,
            };
            marshaller.marshal(&reply).unwrap_or_else(|e| {
                tracing::error!("Failed to marshal reply to {}: {}", sender, e);
                Bytes::new()
            })
        }
        .boxed()
    }

    fn view_accepted(&self, view: &View) {
        if let Some(factory) = self.factory.upgrade() {
            factory.view_accepted(view);
        }
    }
}
