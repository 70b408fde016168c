//! Cache Module Tests
//!
//! ## Test Scopes
//! - **Ownership**: determinism and distribution of the consistent hash.
//! - **Writes**: read-your-writes across members, put/put_if_absent/remove/compute.
//! - **Events**: origin flags, suppressed notifications, topology changes.
//! - **Lifecycle**: stopped members.

#[cfg(test)]
mod tests {
    use crate::cache::{
        CacheEvent, CacheListener, ConsistentHash, Flag, InMemoryCacheCluster, ReplicatedCache,
    };
    use crate::error::CacheError;
    use crate::membership::types::Address;

    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<CacheEvent<String, u32>>>,
    }

    impl CacheListener<String, u32> for Recorder {
        fn on_event(&self, event: &CacheEvent<String, u32>) {
            self.events.lock().push(event.clone());
        }
    }

    fn addresses(names: &[&str]) -> Vec<Address> {
        names.iter().map(|name| Address::from(*name)).collect()
    }

    // ============================================================
    // Ownership
    // ============================================================

    #[test]
    fn test_segment_is_deterministic() {
        let hash = ConsistentHash::new(addresses(&["a", "b", "c"]));

        let first = hash.segment("book_100");
        assert_eq!(first, hash.segment("book_100"));
        assert!(first < ConsistentHash::DEFAULT_SEGMENTS);
    }

    #[test]
    fn test_segments_are_stable_across_builds() {
        let hash = ConsistentHash::new(addresses(&["a", "b", "c"]));
        assert_eq!(hash.segment("book_100"), 64);
        assert_eq!(hash.segment(&Address::from("a")), 37);
        assert_eq!(
            ConsistentHash::with_segments(7, Vec::new()).segment("key-0"),
            6
        );
    }

    #[test]
    fn test_member_order_does_not_change_ownership() {
        let forward = ConsistentHash::new(addresses(&["a", "b", "c"]));
        let backward = ConsistentHash::new(addresses(&["c", "b", "a", "b"]));

        assert_eq!(forward, backward);
        for i in 0..100 {
            let key = format!("key-{}", i);
            assert_eq!(forward.primary_owner(&key), backward.primary_owner(&key));
        }
    }

    #[test]
    fn test_every_member_owns_some_segments() {
        let hash = ConsistentHash::new(addresses(&["a", "b", "c"]));
        let mut counts: HashMap<Address, usize> = HashMap::new();
        for i in 0..600 {
            let owner = hash.primary_owner(&format!("key-{}", i)).unwrap();
            *counts.entry(owner.clone()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|count| *count > 100));
    }

    #[test]
    fn test_owners_start_with_primary_and_are_distinct() {
        let hash = ConsistentHash::new(addresses(&["a", "b", "c"]));
        let owners = hash.owners("key", 5);

        assert_eq!(owners.len(), 3);
        assert_eq!(Some(owners[0]), hash.primary_owner("key"));
        assert!(hash.is_primary("key", owners[0]));
        assert!(!hash.is_primary("key", owners[1]));
        let distinct: BTreeSet<_> = owners.into_iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_empty_topology_has_no_owner() {
        let hash = ConsistentHash::new(Vec::new());
        assert_eq!(hash.primary_owner("key"), None);
        assert!(hash.owners("key", 1).is_empty());
    }

    // ============================================================
    // Writes and events
    // ============================================================

    #[tokio::test]
    async fn test_writes_are_visible_on_every_member() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("shared");
        let a = cluster.join("a".into());
        let b = cluster.join("b".into());

        assert_eq!(a.put("k".into(), 1, &[]).await.unwrap(), None);
        assert_eq!(b.get(&"k".to_string()).await.unwrap(), Some(1));
        assert_eq!(b.put("k".into(), 2, &[]).await.unwrap(), Some(1));
        assert_eq!(
            a.put("k".into(), 3, &[Flag::IgnoreReturnValues]).await.unwrap(),
            None
        );
        assert_eq!(b.remove(&"k".to_string(), &[]).await.unwrap(), Some(3));
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn test_events_carry_origin() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("events");
        let a = cluster.join("a".into());
        let b = cluster.join("b".into());
        let on_a = Arc::new(Recorder::default());
        let on_b = Arc::new(Recorder::default());
        a.add_listener(on_a.clone());
        b.add_listener(on_b.clone());

        a.put("k".into(), 1, &[]).await.unwrap();
        a.put("k".into(), 2, &[]).await.unwrap();
        b.remove(&"k".to_string(), &[]).await.unwrap();

        assert_eq!(
            *on_a.events.lock(),
            vec![
                CacheEvent::Created { key: "k".into(), value: 1, origin_local: true },
                CacheEvent::Modified { key: "k".into(), value: 2, origin_local: true },
                CacheEvent::Removed { key: "k".into(), old_value: 2, origin_local: false },
            ]
        );
        assert_eq!(
            *on_b.events.lock(),
            vec![
                CacheEvent::Created { key: "k".into(), value: 1, origin_local: false },
                CacheEvent::Modified { key: "k".into(), value: 2, origin_local: false },
                CacheEvent::Removed { key: "k".into(), old_value: 2, origin_local: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing_value() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("absent");
        let a = cluster.join("a".into());
        let recorder = Arc::new(Recorder::default());
        a.add_listener(recorder.clone());

        assert_eq!(a.put_if_absent("k".into(), 1, &[]).await.unwrap(), None);
        assert_eq!(a.put_if_absent("k".into(), 2, &[]).await.unwrap(), Some(1));
        assert_eq!(a.get(&"k".to_string()).await.unwrap(), Some(1));
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_compute_creates_modifies_and_removes() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("compute");
        let a = cluster.join("a".into());
        let recorder = Arc::new(Recorder::default());
        a.add_listener(recorder.clone());

        let increment = || -> crate::cache::ComputeFn<u32> {
            Box::new(|current| Some(current.copied().unwrap_or(0) + 1))
        };
        assert_eq!(a.compute("k".into(), increment(), &[]).await.unwrap(), Some(1));
        assert_eq!(a.compute("k".into(), increment(), &[]).await.unwrap(), Some(2));
        assert_eq!(
            a.compute("k".into(), Box::new(|_| None), &[]).await.unwrap(),
            None
        );
        assert_eq!(
            a.compute("other".into(), Box::new(|_| None), &[]).await.unwrap(),
            None
        );

        let events = recorder.events.lock();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], CacheEvent::Created { value: 1, .. }));
        assert!(matches!(events[1], CacheEvent::Modified { value: 2, .. }));
        assert!(matches!(events[2], CacheEvent::Removed { old_value: 2, .. }));
    }

    #[tokio::test]
    async fn test_skip_listener_notification() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("quiet");
        let a = cluster.join("a".into());
        let recorder = Arc::new(Recorder::default());
        let id = a.add_listener(recorder.clone());

        a.put("k".into(), 1, &[Flag::SkipListenerNotification]).await.unwrap();
        assert!(recorder.events.lock().is_empty());

        a.remove_listener(id);
        a.remove(&"k".to_string(), &[]).await.unwrap();
        assert!(recorder.events.lock().is_empty());
    }

    // ============================================================
    // Topology and lifecycle
    // ============================================================

    #[tokio::test]
    async fn test_rebalance_reports_start_and_end() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("topology");
        let a = cluster.join("a".into());
        let _b = cluster.join("b".into());
        let recorder = Arc::new(Recorder::default());
        a.add_listener(recorder.clone());

        cluster.rebalance(addresses(&["a", "b"]));
        cluster.rebalance(addresses(&["a"]));

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        let CacheEvent::TopologyChanged(change) = &events[1] else {
            panic!("expected a topology change, got {:?}", events[1]);
        };
        assert!(change.members_changed());
        assert_eq!(change.left_members(), addresses(&["b"]));
        assert!(!change.joined(&"a".into()));
        assert_eq!(a.consistent_hash(), change.end);
    }

    #[tokio::test]
    async fn test_stopped_member_rejects_operations_but_entries_stay() {
        let cluster = InMemoryCacheCluster::<String, u32>::new("stopped");
        let a = cluster.join("a".into());
        let b = cluster.join("b".into());
        b.put("k".into(), 7, &[]).await.unwrap();

        cluster.leave(&"b".into());

        assert_eq!(
            b.get(&"k".to_string()).await,
            Err(CacheError::Stopped("stopped".to_string()))
        );
        assert_eq!(a.get(&"k".to_string()).await.unwrap(), Some(7));
        assert_eq!(a.keys().await.unwrap(), vec!["k".to_string()]);
    }
}
