//! Scheduler Module Tests
//!
//! ## Test Scopes
//! - **Plan**: validation, sub-range counts and consumer spans.
//! - **Policy**: candidate ordering.
//! - **Scheduler**: slot-bounded admission, retries up to the attempt bound, scheduling
//!   timeouts, dispatch failures, executor loss, recomputation and cancellation. The
//!   executors are simulated by a dispatcher that hands launches to the test.

#[cfg(test)]
mod tests {
    use crate::cluster::capacity::{CapacityRegistry, SlotUsage};
    use crate::cluster::service::ClusterMembership;
    use crate::cluster::types::{ExecutorId, ExecutorState};
    use crate::config::{ClusterConfig, SchedulerConfig};
    use crate::error::{ErrorKind, RuntimeError, RuntimeResult};
    use crate::scheduler::dispatch::TaskGroupDispatcher;
    use crate::scheduler::plan::PhysicalPlan;
    use crate::scheduler::policy::{FirstFitPolicy, LeastLoadedPolicy, SchedulingPolicy};
    use crate::scheduler::scheduler::TaskGroupScheduler;
    use crate::scheduler::types::*;
    use crate::shuffle::directory::BlockDirectory;
    use crate::shuffle::types::{BlockId, BlockLocation, SubRangeSpan};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(3);

    /// Hands every accepted launch to the test instead of running it.
    struct MockDispatcher {
        launches: mpsc::UnboundedSender<TaskGroupLaunch>,
        reject_next: AtomicUsize,
        /// Executors no launch can be delivered to.
        detached: Mutex<Vec<ExecutorId>>,
        cancels: Mutex<Vec<(TaskGroupId, u32)>>,
    }

    #[async_trait]
    impl TaskGroupDispatcher for MockDispatcher {
        async fn dispatch(&self, launch: TaskGroupLaunch) -> RuntimeResult<()> {
            let rejected = self
                .reject_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(RuntimeError::Io("dispatch refused".to_string()));
            }
            if self.detached.lock().unwrap().contains(&launch.executor) {
                return Err(RuntimeError::ExecutorLost(launch.executor));
            }
            let _ = self.launches.send(launch);
            Ok(())
        }

        async fn cancel(
            &self,
            _job_id: &JobId,
            _executor: &ExecutorId,
            task_group: TaskGroupId,
            attempt: u32,
        ) {
            self.cancels.lock().unwrap().push((task_group, attempt));
        }
    }

    struct Harness {
        membership: Arc<ClusterMembership>,
        directory: Arc<BlockDirectory>,
        dispatcher: Arc<MockDispatcher>,
        launches: mpsc::UnboundedReceiver<TaskGroupLaunch>,
    }

    impl Harness {
        fn new(executors: &[(&str, usize)]) -> Self {
            let membership = ClusterMembership::new(ClusterConfig::default(), CapacityRegistry::new());
            for (i, (id, capacity)) in executors.iter().enumerate() {
                let endpoint = format!("127.0.0.1:{}", 7100 + i).parse().unwrap();
                membership
                    .register_executor(ExecutorId::from(*id), *capacity, endpoint)
                    .unwrap();
            }
            let (tx, launches) = mpsc::unbounded_channel();
            Self {
                membership,
                directory: BlockDirectory::new(),
                dispatcher: Arc::new(MockDispatcher {
                    launches: tx,
                    reject_next: AtomicUsize::new(0),
                    detached: Mutex::new(Vec::new()),
                    cancels: Mutex::new(Vec::new()),
                }),
                launches,
            }
        }

        fn scheduler(&self, plan: PhysicalPlan, config: SchedulerConfig) -> TaskGroupScheduler {
            TaskGroupScheduler::new(
                JobId::new(),
                Arc::new(plan),
                config,
                self.membership.clone(),
                self.directory.clone(),
                self.dispatcher.clone(),
            )
            .unwrap()
        }

        async fn next_launch(&mut self) -> TaskGroupLaunch {
            tokio::time::timeout(WAIT, self.launches.recv())
                .await
                .expect("timed out waiting for a launch")
                .expect("dispatcher closed")
        }

        async fn assert_no_launch(&mut self, within: Duration) {
            if let Ok(Some(launch)) = tokio::time::timeout(within, self.launches.recv()).await {
                panic!("Unexpected launch of {}", launch.task_group);
            }
        }

        fn used(&self, executor: &str) -> usize {
            self.membership
                .capacity()
                .usage(&ExecutorId::from(executor))
                .map(|usage| usage.used)
                .unwrap_or(0)
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            scheduler_timeout_ms: 5_000,
            tick_interval_ms: 10,
            ..SchedulerConfig::default()
        }
    }

    fn single_stage(parallelism: u32) -> PhysicalPlan {
        let mut builder = PhysicalPlan::builder();
        builder.stage("work", parallelism, &[]);
        builder.build(10).unwrap()
    }

    fn output_of(launch: &TaskGroupLaunch) -> BlockLocation {
        BlockLocation {
            producer: launch.task_group,
            executor: launch.executor.clone(),
            endpoint: "127.0.0.1:7100".parse().unwrap(),
            sub_range_count: launch.output.sub_range_count(),
        }
    }

    fn start(launch: &TaskGroupLaunch) {
        let _ = launch.reports.send(SchedulerEvent::Running {
            task_group: launch.task_group,
            attempt: launch.attempt,
        });
    }

    fn complete(launch: &TaskGroupLaunch) {
        start(launch);
        let _ = launch.reports.send(SchedulerEvent::Completed {
            task_group: launch.task_group,
            attempt: launch.attempt,
            output: output_of(launch),
        });
    }

    fn fail(launch: &TaskGroupLaunch, error: RuntimeError) {
        let _ = launch.reports.send(SchedulerEvent::Failed {
            task_group: launch.task_group,
            attempt: launch.attempt,
            error,
        });
    }

    async fn wait_status<F>(status: &mut watch::Receiver<JobStatus>, predicate: F) -> JobStatus
    where
        F: FnMut(&JobStatus) -> bool,
    {
        tokio::time::timeout(WAIT, status.wait_for(predicate))
            .await
            .expect("timed out waiting for job status")
            .expect("scheduler dropped")
            .clone()
    }

    async fn outcome(job: JoinHandle<JobOutcome>) -> JobOutcome {
        tokio::time::timeout(WAIT, job)
            .await
            .expect("job did not finish")
            .unwrap()
    }

    // ============================================================
    // PHYSICAL PLAN
    // ============================================================

    #[test]
    fn test_plan_fixes_sub_ranges_from_consumer_parallelism() {
        let mut builder = PhysicalPlan::builder();
        let map = builder.stage("map", 4, &[]);
        let reduce = builder.stage("reduce", 3, &[map]);
        let plan = builder.build(5).unwrap();

        let map_stage = plan.stage(map).unwrap();
        assert_eq!(map_stage.output.sub_range_count(), 15);
        assert_eq!(map_stage.children, vec![reduce]);
        assert!(plan.stage(reduce).unwrap().is_sink());
        assert_eq!(plan.stage(reduce).unwrap().output.sub_range_count(), 1);
        assert_eq!(plan.task_group_count(), 7);
        assert_eq!(
            plan.input_span(TaskGroupId::new(1, 2), map).unwrap(),
            SubRangeSpan::new(10, 15)
        );
    }

    #[test]
    fn test_second_consumer_with_other_parallelism_gets_even_spans() {
        let mut builder = PhysicalPlan::builder();
        let source = builder.stage("source", 2, &[]);
        builder.stage("wide", 4, &[source]);
        let narrow = builder.stage("narrow", 3, &[source]);
        let plan = builder.build(2).unwrap();

        // 2 x 4 sub-ranges split three ways: 3 + 3 + 2.
        let spans: Vec<SubRangeSpan> = (0..3)
            .map(|i| plan.input_span(TaskGroupId::new(narrow.0, i), source).unwrap())
            .collect();
        assert_eq!(
            spans,
            vec![
                SubRangeSpan::new(0, 3),
                SubRangeSpan::new(3, 6),
                SubRangeSpan::new(6, 8)
            ]
        );
    }

    #[test]
    fn test_invalid_plans_are_rejected() {
        assert!(PhysicalPlan::from_specs(Vec::new(), 1).is_err());

        let mut zero = PhysicalPlan::builder();
        zero.stage("zero", 0, &[]);
        assert!(matches!(zero.build(1), Err(RuntimeError::InvalidPlan(_))));

        let mut forward = PhysicalPlan::builder();
        forward.stage("reads-later", 1, &[StageId(1)]);
        forward.stage("later", 1, &[]);
        assert!(forward.build(1).is_err());

        let mut too_wide = PhysicalPlan::builder();
        let source = too_wide.stage("source", 1, &[]);
        too_wide.stage("narrow", 1, &[source]);
        too_wide.stage("wide", 5, &[source]);
        assert!(too_wide.build(2).is_err(), "5 consumers cannot share 2 sub-ranges");
    }

    // ============================================================
    // POLICY
    // ============================================================

    fn snapshot(entries: &[(&str, usize, usize)]) -> BTreeMap<ExecutorId, SlotUsage> {
        entries
            .iter()
            .map(|(id, used, capacity)| {
                (
                    ExecutorId::from(*id),
                    SlotUsage {
                        used: *used,
                        capacity: *capacity,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_first_fit_orders_by_id_and_skips_full() {
        let snapshot = snapshot(&[("exec-c", 0, 1), ("exec-a", 1, 1), ("exec-b", 0, 2)]);

        let candidates = FirstFitPolicy.candidates(&TaskGroupId::new(0, 0), &snapshot);

        assert_eq!(
            candidates,
            vec![ExecutorId::from("exec-b"), ExecutorId::from("exec-c")]
        );
    }

    #[test]
    fn test_least_loaded_prefers_most_free_slots() {
        let snapshot = snapshot(&[("exec-a", 1, 2), ("exec-b", 0, 3), ("exec-c", 0, 1)]);

        let candidates = LeastLoadedPolicy.candidates(&TaskGroupId::new(0, 0), &snapshot);

        assert_eq!(
            candidates,
            vec![
                ExecutorId::from("exec-b"),
                ExecutorId::from("exec-a"),
                ExecutorId::from("exec-c")
            ]
        );
    }

    // ============================================================
    // ADMISSION
    // ============================================================

    #[tokio::test]
    async fn test_capacity_two_runs_two_of_three_until_a_slot_frees() {
        let mut h = Harness::new(&[("exec-a", 2)]);
        let scheduler = h.scheduler(single_stage(3), config());
        let mut status = scheduler.status();
        let job = tokio::spawn(scheduler.run());

        let first = h.next_launch().await;
        let second = h.next_launch().await;
        h.assert_no_launch(Duration::from_millis(200)).await;
        assert_eq!(h.used("exec-a"), 2);
        let snapshot = wait_status(&mut status, |s| {
            s.count_in(TaskGroupState::Scheduled) == 2 && s.count_in(TaskGroupState::Pending) == 1
        })
        .await;
        assert_eq!(
            snapshot.get(&TaskGroupId::new(0, 2)).unwrap().state,
            TaskGroupState::Pending
        );

        complete(&first);
        let third = h.next_launch().await;
        assert_eq!(third.task_group, TaskGroupId::new(0, 2));
        assert!(h.used("exec-a") <= 2);

        complete(&second);
        complete(&third);
        assert!(outcome(job).await.is_completed());
        assert_eq!(h.used("exec-a"), 0, "Every slot must be released");
    }

    #[tokio::test]
    async fn test_first_fit_breaks_ties_by_executor_id() {
        let mut h = Harness::new(&[("exec-b", 1), ("exec-a", 1)]);
        let job = tokio::spawn(h.scheduler(single_stage(2), config()).run());

        let first = h.next_launch().await;
        let second = h.next_launch().await;

        assert_eq!(first.executor, ExecutorId::from("exec-a"));
        assert_eq!(second.executor, ExecutorId::from("exec-b"));
        assert_eq!(first.attempt, 1);
        complete(&first);
        complete(&second);
        assert!(outcome(job).await.is_completed());
    }

    #[tokio::test]
    async fn test_stage_waits_for_parent_stage() {
        let mut h = Harness::new(&[("exec-a", 4)]);
        let mut builder = PhysicalPlan::builder();
        let map = builder.stage("map", 2, &[]);
        builder.stage("reduce", 1, &[map]);
        let job = tokio::spawn(h.scheduler(builder.build(3).unwrap(), config()).run());

        let map_0 = h.next_launch().await;
        let map_1 = h.next_launch().await;
        complete(&map_0);
        h.assert_no_launch(Duration::from_millis(150)).await;
        complete(&map_1);

        let reduce = h.next_launch().await;
        assert_eq!(reduce.handler, "reduce");
        assert_eq!(reduce.inputs.len(), 1);
        assert_eq!(reduce.inputs[0].span, SubRangeSpan::new(0, 3));
        let producers: Vec<TaskGroupId> =
            reduce.inputs[0].producers.iter().map(|p| p.producer).collect();
        assert_eq!(producers, vec![map_0.task_group, map_1.task_group]);

        complete(&reduce);
        assert!(outcome(job).await.is_completed());
    }

    // ============================================================
    // RETRIES AND TIMEOUTS
    // ============================================================

    #[tokio::test]
    async fn test_task_group_failing_every_attempt_aborts_job() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let mut status;
        let job = {
            let scheduler = h.scheduler(single_stage(1), config());
            status = scheduler.status();
            tokio::spawn(scheduler.run())
        };

        for expected in 1..=3 {
            let launch = h.next_launch().await;
            assert_eq!(launch.attempt, expected);
            fail(&launch, RuntimeError::TaskExecution(format!("boom {}", expected)));
        }

        match outcome(job).await {
            JobOutcome::Failed(failure) => {
                assert_eq!(failure.task_group, TaskGroupId::new(0, 0));
                assert_eq!(failure.attempts.len(), 3);
                assert_eq!(failure.last_error_kind(), Some(ErrorKind::TaskExecution));
                assert!(matches!(
                    failure.error,
                    RuntimeError::MaxAttemptsExceeded { max_attempts: 3, .. }
                ));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        let last = wait_status(&mut status, |s| s.finished).await;
        let entry = last.get(&TaskGroupId::new(0, 0)).unwrap();
        assert_eq!(entry.state, TaskGroupState::Aborted);
        assert!(entry.attempt <= 3);
        assert_eq!(h.used("exec-a"), 0);
    }

    #[tokio::test]
    async fn test_unacknowledged_dispatch_times_out() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let config = SchedulerConfig {
            scheduler_timeout_ms: 100,
            max_schedule_attempt: 2,
            ..config()
        };
        let job = tokio::spawn(h.scheduler(single_stage(1), config).run());

        let first = h.next_launch().await;
        let second = h.next_launch().await;
        assert_eq!(second.attempt, 2);

        match outcome(job).await {
            JobOutcome::Failed(failure) => {
                let kinds: Vec<ErrorKind> = failure.attempts.iter().map(|a| a.error).collect();
                assert_eq!(
                    kinds,
                    vec![ErrorKind::SchedulingTimeout, ErrorKind::SchedulingTimeout]
                );
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        let cancels = h.dispatcher.cancels.lock().unwrap().clone();
        assert!(cancels.contains(&(first.task_group, 1)));
        assert_eq!(h.used("exec-a"), 0);
    }

    #[tokio::test]
    async fn test_running_acknowledgement_stops_the_timeout() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let config = SchedulerConfig {
            scheduler_timeout_ms: 100,
            ..config()
        };
        let job = tokio::spawn(h.scheduler(single_stage(1), config).run());

        let launch = h.next_launch().await;
        start(&launch);
        h.assert_no_launch(Duration::from_millis(300)).await;

        complete(&launch);
        assert!(outcome(job).await.is_completed());
    }

    #[tokio::test]
    async fn test_failed_dispatch_releases_slot_and_retries() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        h.dispatcher.reject_next.store(1, Ordering::SeqCst);
        let job = tokio::spawn(h.scheduler(single_stage(1), config()).run());

        let launch = h.next_launch().await;

        assert_eq!(launch.attempt, 2, "Rejected dispatch counts as an attempt");
        assert_eq!(h.used("exec-a"), 1);
        complete(&launch);
        assert!(outcome(job).await.is_completed());
        assert_eq!(h.used("exec-a"), 0);
    }

    #[tokio::test]
    async fn test_undeliverable_executor_is_deregistered_and_work_moves() {
        let mut h = Harness::new(&[("exec-a", 1), ("exec-b", 2)]);
        h.dispatcher
            .detached
            .lock()
            .unwrap()
            .push(ExecutorId::from("exec-a"));
        let job = tokio::spawn(h.scheduler(single_stage(1), config()).run());

        let launch = h.next_launch().await;

        assert_eq!(launch.executor, ExecutorId::from("exec-b"));
        assert_eq!(launch.attempt, 2);
        assert!(!h.membership.is_alive(&ExecutorId::from("exec-a")));
        complete(&launch);
        assert!(outcome(job).await.is_completed());
        assert_eq!(h.used("exec-b"), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_suspects_peer_and_skips_it() {
        let mut h = Harness::new(&[("exec-a", 1), ("exec-b", 1)]);
        let exec_a = ExecutorId::from("exec-a");
        let exec_a_endpoint = h.membership.endpoint(&exec_a).unwrap();
        let scheduler = h.scheduler(single_stage(2), config());
        let mut status = scheduler.status();
        let job = tokio::spawn(scheduler.run());

        let first = h.next_launch().await;
        let second = h.next_launch().await;
        assert_eq!(first.executor, exec_a);
        assert_eq!(second.executor, ExecutorId::from("exec-b"));

        complete(&first);
        wait_status(&mut status, |s| s.count_in(TaskGroupState::Completed) == 1).await;
        fail(
            &second,
            RuntimeError::TransportConnectFailure {
                endpoint: exec_a_endpoint,
                attempts: 3,
                reason: "connection refused".to_string(),
            },
        );

        // exec-a has a free slot but is suspect, so the retry stays on exec-b.
        let retry = h.next_launch().await;
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.executor, ExecutorId::from("exec-b"));
        assert_eq!(
            h.membership.get_member(&exec_a).unwrap().state,
            ExecutorState::Suspect
        );
        assert!(h.membership.is_alive(&exec_a), "Suspicion alone removes nothing");

        h.membership.heartbeat(&exec_a);
        assert!(h.membership.is_schedulable(&exec_a));
        complete(&retry);
        assert!(outcome(job).await.is_completed());
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let scheduler = h.scheduler(single_stage(1), config());
        let mut status = scheduler.status();
        let job = tokio::spawn(scheduler.run());

        let launch = h.next_launch().await;
        let _ = launch.reports.send(SchedulerEvent::Completed {
            task_group: launch.task_group,
            attempt: launch.attempt + 5,
            output: output_of(&launch),
        });
        start(&launch);

        let snapshot = wait_status(&mut status, |s| s.count_in(TaskGroupState::Running) == 1).await;
        assert_eq!(snapshot.count_in(TaskGroupState::Completed), 0);
        complete(&launch);
        assert!(outcome(job).await.is_completed());
    }

    // ============================================================
    // EXECUTOR LOSS
    // ============================================================

    #[tokio::test]
    async fn test_running_task_group_reenters_pending_on_executor_loss() {
        let mut h = Harness::new(&[("exec-a", 1), ("exec-b", 1)]);
        let scheduler = h.scheduler(single_stage(1), config());
        let mut status = scheduler.status();
        let job = tokio::spawn(scheduler.run());

        let first = h.next_launch().await;
        assert_eq!(first.executor, ExecutorId::from("exec-a"));
        start(&first);
        wait_status(&mut status, |s| s.count_in(TaskGroupState::Running) == 1).await;

        h.membership
            .deregister_executor(&ExecutorId::from("exec-a"))
            .unwrap();

        let retry = h.next_launch().await;
        assert_eq!(retry.attempt, first.attempt + 1);
        assert_eq!(retry.executor, ExecutorId::from("exec-b"));

        // A late report from the lost executor changes nothing.
        complete(&first);
        complete(&retry);
        assert!(outcome(job).await.is_completed());
        assert_eq!(h.used("exec-b"), 0);
    }

    #[tokio::test]
    async fn test_lost_completed_outputs_are_recomputed() {
        let mut h = Harness::new(&[("exec-a", 2), ("exec-b", 1)]);
        let mut builder = PhysicalPlan::builder();
        let map = builder.stage("map", 2, &[]);
        builder.stage("reduce", 1, &[map]);
        let job = tokio::spawn(h.scheduler(builder.build(2).unwrap(), config()).run());

        let map_0 = h.next_launch().await;
        let map_1 = h.next_launch().await;
        assert_eq!(map_1.executor, ExecutorId::from("exec-a"));
        complete(&map_0);
        complete(&map_1);
        let reduce = h.next_launch().await;
        start(&reduce);

        h.membership
            .deregister_executor(&ExecutorId::from("exec-a"))
            .unwrap();

        // exec-b has one slot: the maps rerun one at a time, then the reduce.
        let map_0_retry = h.next_launch().await;
        assert_eq!(map_0_retry.task_group, map_0.task_group);
        assert_eq!(map_0_retry.attempt, 2);
        assert_eq!(map_0_retry.executor, ExecutorId::from("exec-b"));
        complete(&map_0_retry);
        let map_1_retry = h.next_launch().await;
        assert_eq!(map_1_retry.task_group, map_1.task_group);
        complete(&map_1_retry);

        let reduce_retry = h.next_launch().await;
        assert_eq!(reduce_retry.task_group, reduce.task_group);
        assert_eq!(reduce_retry.attempt, 2);
        assert!(reduce_retry.inputs[0]
            .producers
            .iter()
            .all(|p| p.executor == ExecutorId::from("exec-b")));
        complete(&reduce_retry);

        assert!(outcome(job).await.is_completed());
    }

    #[tokio::test]
    async fn test_missing_block_reruns_its_producer() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let mut builder = PhysicalPlan::builder();
        let map = builder.stage("map", 1, &[]);
        builder.stage("reduce", 1, &[map]);
        let job = tokio::spawn(h.scheduler(builder.build(1).unwrap(), config()).run());

        let map_launch = h.next_launch().await;
        complete(&map_launch);
        let reduce = h.next_launch().await;
        start(&reduce);
        fail(
            &reduce,
            RuntimeError::BlockNotFound(BlockId::new(map_launch.task_group, 0)),
        );

        let rerun = h.next_launch().await;
        assert_eq!(rerun.task_group, map_launch.task_group);
        assert_eq!(rerun.attempt, 2);
        complete(&rerun);
        let reduce_retry = h.next_launch().await;
        assert_eq!(reduce_retry.attempt, 2);
        complete(&reduce_retry);

        assert!(outcome(job).await.is_completed());
    }

    // ============================================================
    // CANCELLATION
    // ============================================================

    #[tokio::test]
    async fn test_cancel_stops_job_and_releases_slots() {
        let mut h = Harness::new(&[("exec-a", 1)]);
        let scheduler = h.scheduler(single_stage(2), config());
        let canceller = scheduler.canceller();
        let mut status = scheduler.status();
        let job = tokio::spawn(scheduler.run());

        let running = h.next_launch().await;
        start(&running);
        wait_status(&mut status, |s| s.count_in(TaskGroupState::Running) == 1).await;
        canceller.notify_one();

        assert!(matches!(outcome(job).await, JobOutcome::Cancelled));
        let last = wait_status(&mut status, |s| s.finished).await;
        assert_eq!(last.count_in(TaskGroupState::Cancelled), 2);
        assert_eq!(h.used("exec-a"), 0);
        assert_eq!(
            h.dispatcher.cancels.lock().unwrap().clone(),
            vec![(running.task_group, 1)]
        );
    }
}
