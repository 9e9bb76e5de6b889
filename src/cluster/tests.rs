//! Cluster Module Tests
//!
//! ## Test Scopes
//! - **Capacity**: slot accounting under sequential and concurrent reserve/release.
//! - **Membership**: registration rules, the single `ExecutorLost` publication and the
//!   Alive -> Suspect -> Dead detector.

#[cfg(test)]
mod tests {
    use crate::cluster::capacity::CapacityRegistry;
    use crate::cluster::service::ClusterMembership;
    use crate::cluster::types::{ClusterEvent, ExecutorId, ExecutorState};
    use crate::config::ClusterConfig;
    use crate::error::RuntimeError;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn endpoint() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    fn membership() -> Arc<ClusterMembership> {
        let config = ClusterConfig {
            suspect_timeout_ms: 5_000,
            dead_timeout_ms: 10_000,
            ..ClusterConfig::default()
        };
        ClusterMembership::new(config, CapacityRegistry::new())
    }

    // ============================================================
    // CAPACITY REGISTRY
    // ============================================================

    #[test]
    fn test_reserve_succeeds_only_while_slots_are_free() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 2).unwrap();

        assert!(registry.reserve(&exec));
        assert!(registry.reserve(&exec));
        assert!(!registry.reserve(&exec), "Third reservation must fail");

        let usage = registry.usage(&exec).unwrap();
        assert_eq!(usage.used, 2);
        assert_eq!(usage.free(), 0);
    }

    #[test]
    fn test_release_never_goes_below_zero() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 1).unwrap();

        registry.release(&exec);
        registry.release(&exec);

        assert_eq!(registry.usage(&exec).unwrap().used, 0);
        assert!(registry.reserve(&exec));
        assert!(!registry.reserve(&exec));
    }

    #[test]
    fn test_reserve_on_unknown_executor_fails() {
        let registry = CapacityRegistry::new();

        assert!(!registry.reserve(&ExecutorId::from("ghost")));
        assert!(registry.try_reserve(&ExecutorId::from("ghost")).is_none());
    }

    #[test]
    fn test_concurrent_reserve_never_exceeds_capacity() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 5).unwrap();
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let exec = exec.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if registry.reserve(&exec) {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 5);
        assert_eq!(registry.usage(&exec).unwrap().used, 5);
    }

    #[test]
    fn test_concurrent_reserve_release_pairs_are_balanced() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 3).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let exec = exec.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(slot) = registry.try_reserve(&exec) {
                            let usage = registry.usage(&exec).unwrap();
                            assert!(usage.used <= usage.capacity);
                            drop(slot);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.usage(&exec).unwrap().used, 0, "No slot may leak");
    }

    #[test]
    fn test_reservation_guard_releases_on_drop() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 1).unwrap();

        let slot = registry.try_reserve(&exec).expect("slot should be free");
        assert_eq!(slot.executor(), &exec);
        assert!(registry.try_reserve(&exec).is_none());

        drop(slot);

        assert_eq!(registry.usage(&exec).unwrap().used, 0);
        assert!(registry.try_reserve(&exec).is_some());
    }

    #[test]
    fn test_stale_reservation_does_not_touch_reregistered_executor() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        registry.add_executor(exec.clone(), 1).unwrap();
        let stale = registry.try_reserve(&exec).unwrap();

        registry.remove_executor(&exec);
        registry.add_executor(exec.clone(), 1).unwrap();
        let fresh = registry.try_reserve(&exec).unwrap();
        drop(stale);

        assert_eq!(registry.usage(&exec).unwrap().used, 1);
        drop(fresh);
        assert_eq!(registry.usage(&exec).unwrap().used, 0);
    }

    #[test]
    fn test_snapshot_is_ordered_by_executor_id() {
        let registry = CapacityRegistry::new();
        for id in ["exec-c", "exec-a", "exec-b"] {
            registry.add_executor(ExecutorId::from(id), 1).unwrap();
        }
        registry.reserve(&ExecutorId::from("exec-b"));

        let snapshot = registry.snapshot();
        let ids: Vec<&str> = snapshot.keys().map(|id| id.0.as_str()).collect();

        assert_eq!(ids, vec!["exec-a", "exec-b", "exec-c"]);
        assert_eq!(snapshot[&ExecutorId::from("exec-b")].used, 1);
    }

    #[test]
    fn test_duplicate_executor_in_registry_is_rejected() {
        let registry = CapacityRegistry::new();
        registry.add_executor(ExecutorId::from("exec-1"), 1).unwrap();

        let result = registry.add_executor(ExecutorId::from("exec-1"), 4);

        assert!(matches!(result, Err(RuntimeError::DuplicateExecutor(_))));
    }

    #[test]
    fn test_concurrent_add_admits_exactly_one() {
        let registry = CapacityRegistry::new();
        let exec = ExecutorId::from("exec-1");
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=8)
            .map(|capacity| {
                let registry = registry.clone();
                let exec = exec.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    if registry.add_executor(exec, capacity).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert!(registry.reserve(&exec));
        assert_eq!(registry.usage(&exec).unwrap().used, 1);
    }

    // ============================================================
    // MEMBERSHIP
    // ============================================================

    #[test]
    fn test_register_adds_capacity_and_endpoint() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");

        membership
            .register_executor(exec.clone(), 4, endpoint())
            .unwrap();

        assert!(membership.is_alive(&exec));
        assert_eq!(membership.endpoint(&exec), Some(endpoint()));
        assert_eq!(membership.capacity().usage(&exec).unwrap().capacity, 4);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");
        membership
            .register_executor(exec.clone(), 1, endpoint())
            .unwrap();

        let result = membership.register_executor(exec, 1, endpoint());

        assert!(matches!(result, Err(RuntimeError::DuplicateExecutor(_))));
    }

    #[tokio::test]
    async fn test_deregister_publishes_executor_lost_once() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");
        membership
            .register_executor(exec.clone(), 1, endpoint())
            .unwrap();
        let mut events = membership.subscribe();

        membership.deregister_executor(&exec).unwrap();
        membership.deregister_executor(&exec).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::ExecutorLost(exec.clone())
        );
        assert!(events.try_recv().is_err(), "Loss must be announced exactly once");
        assert!(!membership.is_alive(&exec));
        assert_eq!(membership.endpoint(&exec), None);
        assert!(membership.capacity().usage(&exec).is_none());
    }

    #[test]
    fn test_deregister_unknown_executor_fails() {
        let membership = membership();

        let result = membership.deregister_executor(&ExecutorId::from("ghost"));

        assert!(matches!(result, Err(RuntimeError::UnknownExecutor(_))));
    }

    #[test]
    fn test_dead_executor_can_rejoin() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");
        membership
            .register_executor(exec.clone(), 1, endpoint())
            .unwrap();
        membership.deregister_executor(&exec).unwrap();

        membership
            .register_executor(exec.clone(), 2, endpoint())
            .unwrap();

        assert!(membership.is_alive(&exec));
        assert_eq!(membership.capacity().usage(&exec).unwrap().capacity, 2);
    }

    #[test]
    fn test_failure_detector_suspects_then_declares_dead() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");
        membership
            .register_executor(exec.clone(), 1, endpoint())
            .unwrap();
        let start = Instant::now();

        let lost = membership.detect_failures(start + Duration::from_secs(6));
        assert!(lost.is_empty());
        assert_eq!(
            membership.get_member(&exec).unwrap().state,
            ExecutorState::Suspect
        );

        let lost = membership.detect_failures(start + Duration::from_secs(11));
        assert_eq!(lost, vec![exec.clone()]);
        assert_eq!(
            membership.get_member(&exec).unwrap().state,
            ExecutorState::Dead
        );
    }

    #[test]
    fn test_heartbeat_refutes_suspicion() {
        let membership = membership();
        let exec = ExecutorId::from("exec-1");
        membership
            .register_executor(exec.clone(), 1, endpoint())
            .unwrap();

        membership.report_unreachable(&exec);
        assert_eq!(
            membership.get_member(&exec).unwrap().state,
            ExecutorState::Suspect
        );
        assert!(membership.is_alive(&exec));
        assert!(!membership.is_schedulable(&exec));

        membership.heartbeat(&exec);
        assert_eq!(
            membership.get_member(&exec).unwrap().state,
            ExecutorState::Alive
        );
        assert!(membership.is_schedulable(&exec));
    }

    #[test]
    fn test_alive_executors_sorted_and_exclude_dead() {
        let membership = membership();
        for id in ["exec-b", "exec-a", "exec-c"] {
            membership
                .register_executor(ExecutorId::from(id), 1, endpoint())
                .unwrap();
        }
        membership
            .deregister_executor(&ExecutorId::from("exec-c"))
            .unwrap();

        let alive: Vec<String> = membership
            .alive_executors()
            .into_iter()
            .map(|info| info.id.0)
            .collect();

        assert_eq!(alive, vec!["exec-a".to_string(), "exec-b".to_string()]);
    }
}
