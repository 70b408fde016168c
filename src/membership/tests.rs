//! Membership Module Tests
//!
//! ## Test Scopes
//! - **Node identity**: equality and hashing by address only.
//! - **Membership**: view diffs and coordinator selection.
//! - **NodeCache / LocalGroup**: lazy node creation, eviction and singleton behaviour.

#[cfg(test)]
mod tests {
    use crate::membership::group::{Group, LocalGroup, NodeCache};
    use crate::membership::types::{Address, Membership, Node};
    use std::collections::HashSet;

    fn node(name: &str) -> Node {
        Node::new(Address::from(name), name)
    }

    // ============================================================
    // NODE TESTS
    // ============================================================

    #[test]
    fn test_address_is_unique() {
        assert_ne!(Address::random(), Address::random());
    }

    #[test]
    fn test_node_equality_ignores_name() {
        let a = Node::new(Address::from("a"), "alpha");
        let renamed = Node::new(Address::from("a"), "other name");
        let b = Node::new(Address::from("b"), "alpha");

        assert_eq!(a, renamed);
        assert_ne!(a, b);

        let set: HashSet<Node> = [a, renamed, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_node_display_uses_name() {
        let node = Node::new(Address::from("10.0.0.1:7600"), "node-1");
        assert_eq!(node.to_string(), "node-1");
        assert_eq!(node.address().to_string(), "10.0.0.1:7600");
    }

    // ============================================================
    // MEMBERSHIP TESTS
    // ============================================================

    #[test]
    fn test_left_and_joined_members() {
        let previous = Membership::new(node("a"), vec![node("a"), node("b"), node("c")]);
        let current = Membership::new(node("a"), vec![node("a"), node("c"), node("d")]);

        assert_eq!(Membership::left_members(&previous, &current), vec![node("b")]);
        assert_eq!(Membership::joined_members(&previous, &current), vec![node("d")]);
        assert!(Membership::left_members(&current, &current).is_empty());
    }

    #[test]
    fn test_coordinator_is_first_member() {
        let membership = Membership::new(node("b"), vec![node("a"), node("b")]);
        assert_eq!(membership.coordinator(), Some(&node("a")));
        assert!(!membership.is_coordinator());

        let singleton = Membership::singleton(node("b"));
        assert!(singleton.is_coordinator());
        assert_eq!(singleton.members().len(), 1);
    }

    // ============================================================
    // NODE CACHE TESTS
    // ============================================================

    #[test]
    fn test_node_cache_creates_once() {
        let cache = NodeCache::new();
        let address = Address::from("a");

        let first = cache.get_or_create(&address, || "first".to_string());
        let second = cache.get_or_create(&address, || "second".to_string());

        assert_eq!(first.name(), "first");
        assert_eq!(second.name(), "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_node_cache_eviction_recreates() {
        let cache = NodeCache::new();
        let address = Address::from("a");
        cache.get_or_create(&address, || "old".to_string());

        cache.evict([&address]);
        assert!(!cache.contains(&address));

        let recreated = cache.get_or_create(&address, || "new".to_string());
        assert_eq!(recreated.name(), "new");
    }

    // ============================================================
    // LOCAL GROUP TESTS
    // ============================================================

    #[test]
    fn test_local_group_is_singleton() {
        let group = LocalGroup::new("local", "solo");

        assert!(group.is_singleton());
        assert_eq!(group.name(), "local");
        assert_eq!(group.membership().members(), &[group.local_member()]);
        assert_eq!(
            group.create_node(group.local_member().address()).name(),
            "solo"
        );
    }
}
