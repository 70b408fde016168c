//! Transport Module
//!
//! The messaging primitive consumed by the command dispatcher: point-to-point
//! request/response between members plus delivery of group views.
//!
//! ## Submodules
//! - **`types`**: the `Transport` and `Receiver` contracts and the `View` model.
//! - **`network`**: an in-process fabric implementing `Transport`, with partition and
//!   merge support, used to run several members inside one process.

pub mod network;
pub mod types;

pub use network::{InProcessNetwork, InProcessTransport};
pub use types::{Receiver, ReplyFuture, Transport, View, ViewId};

#[cfg(test)]
mod tests;
