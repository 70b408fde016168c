//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Views**: join, leave, split and merge views installed by the in-process network.
//! - **Requests**: delivery, unreachable targets, timeouts and closed endpoints.

#[cfg(test)]
mod tests {
    use crate::error::TransportError;
    use crate::membership::types::Address;
    use crate::transport::network::InProcessNetwork;
    use crate::transport::types::{Receiver, Transport, View};
    use bytes::Bytes;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    /// Echoes requests after `delay` and records every view it sees.
    #[derive(Default)]
    struct EchoReceiver {
        delay: Duration,
        views: Mutex<Vec<View>>,
    }

    impl Receiver for EchoReceiver {
        fn handle(&self, _sender: &Address, request: Bytes) -> BoxFuture<'static, Bytes> {
            let delay = self.delay;
            async move {
                tokio::time::sleep(delay).await;
                request
            }
            .boxed()
        }

        fn view_accepted(&self, view: &View) {
            self.views.lock().push(view.clone());
        }
    }

    // ============================================================
    // VIEW TESTS
    // ============================================================

    #[tokio::test]
    async fn test_connect_installs_shared_view() {
        let network = InProcessNetwork::new("views");
        let a = network.connect("a");
        let b = network.connect("b");

        assert_eq!(a.view(), b.view());
        assert_eq!(a.view().members, vec![a.local_address(), b.local_address()]);
        assert!(!a.view().merged);
        assert_eq!(a.logical_name(&b.local_address()).as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_remaining_members() {
        let network = InProcessNetwork::new("leave");
        let a = network.connect("a");
        let b = network.connect("b");
        let receiver = Arc::new(EchoReceiver::default());
        a.set_receiver(Some(receiver.clone()));

        network.disconnect(&b.local_address());

        let views = receiver.views.lock();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].members, vec![a.local_address()]);
        assert!(!b.is_open());
    }

    #[tokio::test]
    async fn test_split_and_heal_produce_merge_view() {
        let network = InProcessNetwork::new("partition");
        let a = network.connect("a");
        let b = network.connect("b");
        let c = network.connect("c");

        network.split(&[vec![a.local_address()], vec![b.local_address(), c.local_address()]]);
        assert_eq!(a.view().members, vec![a.local_address()]);
        assert_eq!(b.view().members, vec![b.local_address(), c.local_address()]);

        network.heal();
        let view = a.view();
        assert!(view.merged);
        assert_eq!(view.members.len(), 3);
        assert_eq!(view, c.view());
    }

    #[test]
    fn test_view_left_members() {
        let previous = View {
            id: crate::transport::types::ViewId(1),
            members: vec![Address::from("a"), Address::from("b")],
            merged: false,
        };
        let current = View {
            id: crate::transport::types::ViewId(2),
            members: vec![Address::from("a")],
            merged: false,
        };
        assert_eq!(View::left_members(&previous, &current), vec![&Address::from("b")]);
    }

    // ============================================================
    // REQUEST TESTS
    // ============================================================

    #[tokio::test]
    async fn test_send_reaches_receiver() {
        let network = InProcessNetwork::new("echo");
        let a = network.connect("a");
        let b = network.connect("b");
        b.set_receiver(Some(Arc::new(EchoReceiver::default())));

        let reply = a
            .send(&b.local_address(), Bytes::from_static(b"ping"), Duration::from_secs(1))
            .expect("send")
            .await
            .expect("reply");
        assert_eq!(reply, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn test_send_to_other_partition_is_unreachable() {
        let network = InProcessNetwork::new("unreachable");
        let a = network.connect("a");
        let b = network.connect("b");
        b.set_receiver(Some(Arc::new(EchoReceiver::default())));
        network.split(&[vec![a.local_address()], vec![b.local_address()]]);

        let result = a
            .send(&b.local_address(), Bytes::new(), Duration::from_secs(1))
            .expect("send")
            .await;
        assert_eq!(result, Err(TransportError::Unreachable(b.local_address())));
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let network = InProcessNetwork::new("slow");
        let a = network.connect("a");
        let b = network.connect("b");
        b.set_receiver(Some(Arc::new(EchoReceiver {
            delay: Duration::from_secs(5),
            ..Default::default()
        })));

        let result = a
            .send(&b.local_address(), Bytes::new(), Duration::from_millis(20))
            .expect("send")
            .await;
        assert!(matches!(result, Err(TransportError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_send_from_closed_endpoint_fails_immediately() {
        let network = InProcessNetwork::new("closed");
        let a = network.connect("a");
        let b = network.connect("b");
        network.disconnect(&a.local_address());

        let result = a.send(&b.local_address(), Bytes::new(), Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
