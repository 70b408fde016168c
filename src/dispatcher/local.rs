use super::context::run_command;
use super::types::{
    Command, CommandDispatcher, CommandFuture, CommandResult, Contextualizer, GroupResponses,
    Outcome, SpanContextualizer,
};
use crate::error::{DispatchError, DispatchResult};
use crate::membership::group::Group;
use crate::membership::types::Node;

use std::sync::Arc;

/// Dispatcher that only ever reaches the local member.
///
/// Used as the in-process fast path of a channel dispatcher and, on its own, by
/// processes that are not clustered. Commands are executed directly against the
/// context: nothing is marshalled and no transport is involved.
pub struct LocalCommandDispatcher<Cmd: Command> {
    id: String,
    local: Node,
    context: Arc<Cmd::Context>,
    contextualizer: Arc<dyn Contextualizer>,
}

impl<Cmd: Command> LocalCommandDispatcher<Cmd> {
    pub fn new(
        id: &str,
        local: Node,
        context: Arc<Cmd::Context>,
        contextualizer: Arc<dyn Contextualizer>,
    ) -> Self {
        Self {
            id: id.to_string(),
            local,
            context,
            contextualizer,
        }
    }

    /// Dispatcher for the local member of `group`, executing inside a span named after `id`.
    pub fn standalone(group: &dyn Group, id: &str, context: Cmd::Context) -> Self {
        Self::new(
            id,
            group.local_member(),
            Arc::new(context),
            Arc::new(SpanContextualizer::new(id)),
        )
    }

    pub fn local_member(&self) -> &Node {
        &self.local
    }

    /// Executes `command` in-process.
    pub fn execute(&self, command: &Cmd) -> CommandResult<Cmd::Output> {
        run_command(command, &self.context, self.contextualizer.as_ref())
            .map(Outcome::Executed)
            .map_err(|message| DispatchError::CommandFailed {
                node: self.local.clone(),
                message,
            })
    }
}

impl<Cmd: Command> CommandDispatcher<Cmd> for LocalCommandDispatcher<Cmd> {
    fn id(&self) -> &str {
        &self.id
    }

    fn context(&self) -> &Cmd::Context {
        &self.context
    }

    fn execute_on_member(
        &self,
        command: &Cmd,
        member: &Node,
    ) -> DispatchResult<CommandFuture<Cmd::Output>> {
        if member != &self.local {
            return Ok(CommandFuture::ready(Err(DispatchError::Unreachable(
                member.clone(),
            ))));
        }
        Ok(CommandFuture::ready(self.execute(command)))
    }

    fn execute_on_group(
        &self,
        command: &Cmd,
        excluded: &[Node],
    ) -> DispatchResult<GroupResponses<Cmd::Output>> {
        let responses = GroupResponses::new();
        if !excluded.contains(&self.local) {
            responses.insert(self.local.clone(), CommandFuture::ready(self.execute(command)));
        }
        Ok(responses)
    }
}
