//! Command Dispatcher Module
//!
//! Executes commands on members of the group and collects per-member results.
//!
//! ## Architecture Overview
//! 1. **Registration**: A caller registers a context under a dispatcher id with the
//!    `ChannelCommandDispatcherFactory`. Ids are exclusive; the returned handle
//!    unregisters the id when closed or dropped.
//! 2. **Dispatch**: Commands for the local member run in-process through the
//!    `LocalCommandDispatcher`. Commands for other members are marshalled into a
//!    versioned request envelope and sent over the shared transport with a timeout.
//! 3. **Serving**: Inbound requests are routed by id to the registered context and
//!    executed on a bounded executor, inside the dispatcher's contextualizer. An
//!    unknown id is answered with "no such service", which callers observe as
//!    `Outcome::NoSuchService`.
//! 4. **Group fan-out**: `execute_on_group` sends to every current member at once. A
//!    future cancelled by the caller is pruned from the response map.
//!
//! ## Submodules
//! - **`types`**: `Command`, `Contextualizer`, `Outcome`, `CommandFuture`, `GroupResponses`
//!   and the `CommandDispatcher` trait.
//! - **`protocol`**: Request and reply envelopes.
//! - **`context`**: Id to context registry owned by the factory.
//! - **`executor`**: Bounded executor for inbound command bodies.
//! - **`local`**: In-process dispatcher.
//! - **`channel`**: Transport-backed dispatcher handle.
//! - **`factory`**: The factory, also the `Group` of its endpoint.

pub mod channel;
pub mod context;
pub mod executor;
pub mod factory;
pub mod local;
pub mod protocol;
pub mod types;

pub use channel::ChannelCommandDispatcher;
pub use factory::ChannelCommandDispatcherFactory;
pub use local::LocalCommandDispatcher;
pub use types::{
    Command, CommandDispatcher, CommandFuture, CommandResult, Contextualizer, GroupResponses,
    Outcome, SpanContextualizer,
};
