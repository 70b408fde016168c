use crate::error::TransportError;
use crate::membership::types::Address;

use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of an installed view, increasing per network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(pub u64);

/// Group view delivered by the transport.
///
/// `merged` is set when the view was installed by healing a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub id: ViewId,
    pub members: Vec<Address>,
    pub merged: bool,
}

impl View {
    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Addresses of `previous` that are absent from `current`.
    pub fn left_members<'a>(previous: &'a View, current: &View) -> Vec<&'a Address> {
        previous
            .members
            .iter()
            .filter(|address| !current.contains(address))
            .collect()
    }
}

/// Reply to a point-to-point request, resolved once the target answers.
pub type ReplyFuture = BoxFuture<'static, Result<Bytes, TransportError>>;

/// Up-handler installed on a transport: serves inbound requests and observes views.
pub trait Receiver: Send + Sync + 'static {
    /// Answers a request sent by `sender`.
    fn handle(&self, sender: &Address, request: Bytes) -> BoxFuture<'static, Bytes>;

    /// Called on the transport thread whenever a new view is installed.
    fn view_accepted(&self, view: &View);
}

/// Point-to-point request/response messaging between group members.
pub trait Transport: Send + Sync + 'static {
    /// Name of the group this transport is connected to.
    fn cluster_name(&self) -> &str;

    fn local_address(&self) -> Address;

    /// Human readable name registered for `address`, if known.
    fn logical_name(&self, address: &Address) -> Option<String>;

    /// The view currently installed on this member.
    fn view(&self) -> View;

    /// Sends `request` to `target`.
    ///
    /// An `Err` means the request could not be sent at all; failures after sending
    /// (unreachable target, timeout) resolve the returned future instead.
    fn send(
        &self,
        target: &Address,
        request: Bytes,
        timeout: Duration,
    ) -> Result<ReplyFuture, TransportError>;

    /// Installs (or with `None`, removes) the up-handler.
    fn set_receiver(&self, receiver: Option<Arc<dyn Receiver>>);
}
