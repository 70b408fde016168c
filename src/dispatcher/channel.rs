use super::factory::ChannelCommandDispatcherFactory;
use super::local::LocalCommandDispatcher;
use super::types::{Command, CommandDispatcher, CommandFuture, GroupResponses};
use crate::error::DispatchResult;
use crate::marshal::{BincodeMarshaller, Marshaller};
use crate::membership::group::Group;
use crate::membership::types::Node;

use std::sync::Arc;
use std::time::Duration;

/// Dispatcher handle registered under one id of a [`ChannelCommandDispatcherFactory`].
///
/// Commands addressed to the local member take the in-process path; all others are
/// marshalled and sent through the factory's transport. Closing or dropping the
/// handle unregisters the id.
pub struct ChannelCommandDispatcher<Cmd: Command, M: Marshaller = BincodeMarshaller> {
    factory: Arc<ChannelCommandDispatcherFactory<M>>,
    local: LocalCommandDispatcher<Cmd>,
    timeout: Duration,
}

impl<Cmd: Command, M: Marshaller> ChannelCommandDispatcher<Cmd, M> {
    pub(crate) fn new(
        factory: Arc<ChannelCommandDispatcherFactory<M>>,
        local: LocalCommandDispatcher<Cmd>,
        timeout: Duration,
    ) -> Self {
        Self {
            factory,
            local,
            timeout,
        }
    }

    /// Uses `timeout` for remote commands instead of the factory default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn group(&self) -> &ChannelCommandDispatcherFactory<M> {
        &self.factory
    }

    /// Unregisters the dispatcher. Inbound commands for its id now answer
    /// "no such service".
    pub fn close(self) {}
}

impl<Cmd: Command, M: Marshaller> CommandDispatcher<Cmd> for ChannelCommandDispatcher<Cmd, M> {
    fn id(&self) -> &str {
        self.local.id()
    }

    fn context(&self) -> &Cmd::Context {
        self.local.context()
    }

    fn execute_on_member(
        &self,
        command: &Cmd,
        member: &Node,
    ) -> DispatchResult<CommandFuture<Cmd::Output>> {
        if member == self.local.local_member() {
            return self.local.execute_on_member(command, member);
        }
        let payload = self.factory.marshaller().marshal(command)?;
        self.factory
            .send(self.id(), payload, member, self.timeout, None)
    }

    fn execute_on_group(
        &self,
        command: &Cmd,
        excluded: &[Node],
    ) -> DispatchResult<GroupResponses<Cmd::Output>> {
        let responses = GroupResponses::new();
        let membership = self.factory.membership();
        let (local, remote): (Vec<&Node>, Vec<&Node>) = membership
            .members()
            .iter()
            .filter(|member| !excluded.contains(member))
            .partition(|member| *member == self.local.local_member());

        for member in local {
            responses.insert(member.clone(), CommandFuture::ready(self.local.execute(command)));
        }
        if remote.is_empty() {
            return Ok(responses);
        }

        let payload = self.factory.marshaller().marshal(command)?;
        for member in remote {
            let sent = self.factory.send(
                self.id(),
                payload.clone(),
                member,
                self.timeout,
                Some(responses.settlement(member)),
            );
            match sent {
                Ok(future) => responses.insert(member.clone(), future),
                Err(e) => {
                    tracing::warn!(
                        "Failed to send command of {} to {}, cancelling {} issued requests: {}",
                        self.id(),
                        member,
                        responses.len(),
                        e
                    );
                    responses.cancel_all();
                    return Err(e);
                }
            }
        }
        Ok(responses)
    }
}

impl<Cmd: Command, M: Marshaller> Drop for ChannelCommandDispatcher<Cmd, M> {
    fn drop(&mut self) {
        self.factory.unregister(self.local.id());
    }
}
