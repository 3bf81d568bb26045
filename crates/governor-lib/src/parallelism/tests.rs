//! Scenario tests for the parallelism controller
//!
//! Resource pressure comes from a `ManualSampler`, so every decision is
//! deterministic regardless of the host.

mod bookkeeping_tests {
    use crate::parallelism::{ParallelismConfig, ParallelismController};
    use crate::resource::{ManualSampler, WorkloadGauge};
    use std::sync::Arc;

    fn controller(cpus: usize, ceiling: usize) -> Arc<ParallelismController> {
        Arc::new(ParallelismController::new(
            ParallelismConfig::for_cpus(cpus).with_initial_ceiling(ceiling),
            Arc::new(ManualSampler::new(0.5, 0.5)),
            Arc::new(WorkloadGauge::new(ceiling)),
        ))
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let controller = controller(4, 4);
        assert!(controller.start_test("create_budget", 5, 1.0));
        assert!(!controller.start_test("create_budget", 5, 1.0));
        assert_eq!(controller.active_count(), 1);
    }

    #[test]
    fn test_finish_unknown_is_noop() {
        let controller = controller(4, 4);
        assert!(controller.finish_test("never_started", true).is_none());
        assert_eq!(controller.active_count(), 0);

        controller.start_test("a", 5, 1.0);
        assert!(controller.finish_test("a", false).is_some());
        // Second finish of the same name does not underflow
        assert!(controller.finish_test("a", false).is_none());

        let metrics = controller.get_current_metrics();
        assert_eq!(metrics.active_tests, 0);
        assert_eq!(metrics.failed_tests, 1);
        assert_eq!(metrics.completed_tests, 0);
    }

    #[test]
    fn test_priority_and_weight_are_sanitized() {
        let controller = controller(4, 4);
        controller.start_test("urgent", 42, f64::NAN);
        controller.start_test("lazy", -3, 0.0);

        let executions = controller.active_executions();
        let urgent = executions.iter().find(|e| e.name == "urgent").unwrap();
        let lazy = executions.iter().find(|e| e.name == "lazy").unwrap();
        assert_eq!(urgent.priority, 10);
        assert_eq!(urgent.weight, 1.0);
        assert_eq!(lazy.priority, 1);
        assert_eq!(lazy.weight, 1.0);
    }

    #[tokio::test]
    async fn test_active_count_matches_starts_minus_finishes() {
        let controller = controller(4, 4);

        let mut handles = Vec::new();
        for i in 0..50 {
            let controller = Arc::clone(&controller);
            handles.push(tokio::spawn(async move {
                let name = format!("test_{}", i);
                controller.start_test(&name, 5, 1.0);
                if i % 2 == 0 {
                    controller.finish_test(&name, i % 4 == 0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = controller.get_current_metrics();
        assert_eq!(metrics.active_tests, 25);
        assert_eq!(metrics.completed_tests + metrics.failed_tests, 25);
        assert_eq!(metrics.completed_tests, 13);
    }

    #[test]
    fn test_gauge_follows_active_executions() {
        let gauge = Arc::new(WorkloadGauge::new(4));
        let controller = ParallelismController::new(
            ParallelismConfig::for_cpus(4).with_initial_ceiling(4),
            Arc::new(ManualSampler::idle()),
            Arc::clone(&gauge),
        );

        controller.start_test("a", 5, 1.0);
        controller.start_test("b", 5, 1.0);
        assert_eq!(gauge.in_flight(), 2);
        assert!((gauge.load_ratio() - 0.5).abs() < f64::EPSILON);

        controller.finish_test("a", true);
        assert_eq!(gauge.in_flight(), 1);
    }
}

mod ceiling_rule_tests {
    use crate::models::ResourceSnapshot;
    use crate::parallelism::{
        next_ceiling, ParallelismConfig, ParallelismController, REASON_HIGH_USAGE,
        REASON_LOW_ACTIVITY, REASON_LOW_USAGE, REASON_SATURATED, REASON_STABLE,
    };
    use crate::resource::{ManualSampler, WorkloadGauge};
    use std::sync::Arc;

    fn snapshot(cpu: f64, memory: f64) -> ResourceSnapshot {
        ResourceSnapshot::with_utilization(cpu, memory)
    }

    #[test]
    fn test_rules_in_order() {
        let config = ParallelismConfig::for_cpus(8);
        assert_eq!(config.step, 2);
        assert_eq!(config.max_ceiling(), 32);

        assert_eq!(
            next_ceiling(&config, 8, 0, &snapshot(0.1, 0.1)),
            (10, REASON_LOW_USAGE)
        );
        assert_eq!(
            next_ceiling(&config, 8, 8, &snapshot(0.9, 0.1)),
            (6, REASON_HIGH_USAGE)
        );
        assert_eq!(
            next_ceiling(&config, 8, 8, &snapshot(0.5, 0.9)),
            (6, REASON_HIGH_USAGE)
        );
        assert_eq!(
            next_ceiling(&config, 8, 3, &snapshot(0.5, 0.5)),
            (7, REASON_LOW_ACTIVITY)
        );
        assert_eq!(
            next_ceiling(&config, 8, 8, &snapshot(0.5, 0.5)),
            (9, REASON_SATURATED)
        );
        assert_eq!(
            next_ceiling(&config, 8, 5, &snapshot(0.5, 0.5)),
            (8, REASON_STABLE)
        );
    }

    #[test]
    fn test_ceiling_stays_within_bounds() {
        let config = ParallelismConfig::for_cpus(2);
        let max = config.max_ceiling();
        let loads = [0.0, 0.2, 0.35, 0.5, 0.82, 0.9, 1.0];

        for ceiling in 1..=max {
            for active in [0, 1, ceiling / 2, ceiling, ceiling * 3] {
                for cpu in loads {
                    for memory in loads {
                        let (next, _) =
                            next_ceiling(&config, ceiling, active, &snapshot(cpu, memory));
                        assert!((1..=max).contains(&next));
                        assert!(next.abs_diff(ceiling) <= config.step);
                    }
                }
            }
        }
    }

    #[test]
    fn test_initial_ceiling_is_clamped() {
        let controller = ParallelismController::new(
            ParallelismConfig::for_cpus(2).with_initial_ceiling(100),
            Arc::new(ManualSampler::idle()),
            Arc::new(WorkloadGauge::new(1)),
        );
        assert_eq!(controller.ceiling(), 8);
    }

    #[tokio::test]
    async fn test_twenty_concurrent_starts_under_ceiling_four() {
        let controller = Arc::new(ParallelismController::new(
            ParallelismConfig::for_cpus(4).with_initial_ceiling(4),
            Arc::new(ManualSampler::new(0.5, 0.5)),
            Arc::new(WorkloadGauge::new(4)),
        ));

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.start_test(&format!("t{}", i), 5, 1.0) })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let event = controller.optimize_parallelism();

        assert_eq!(event.active_tests, 20);
        assert_eq!(event.old_ceiling, 4);
        assert!(event.new_ceiling >= event.old_ceiling);
        assert_eq!(event.reason, REASON_SATURATED);
    }

    #[test]
    fn test_history_is_bounded() {
        let controller = ParallelismController::new(
            ParallelismConfig::for_cpus(4),
            Arc::new(ManualSampler::new(0.5, 0.5)),
            Arc::new(WorkloadGauge::new(4)),
        );

        for _ in 0..150 {
            controller.optimize_parallelism();
        }

        assert_eq!(controller.get_optimization_history().len(), 100);
        assert_eq!(controller.history_summary().total_events, 100);
    }
}

mod auto_loop_tests {
    use crate::parallelism::{ParallelismConfig, ParallelismController};
    use crate::resource::{ManualSampler, WorkloadGauge};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[tokio::test(start_paused = true)]
    async fn test_auto_loop_drives_limiter() {
        let sampler = Arc::new(ManualSampler::new(0.1, 0.1));
        let controller = Arc::new(ParallelismController::new(
            ParallelismConfig::for_cpus(4)
                .with_initial_ceiling(2)
                .with_interval(Duration::from_secs(10)),
            sampler.clone(),
            Arc::new(WorkloadGauge::new(2)),
        ));
        let limiter = controller.limiter();

        // Manual decisions leave the limiter alone
        controller.optimize_parallelism();
        assert_eq!(controller.ceiling(), 3);
        assert_eq!(limiter.limit(), 2);

        let (tx, rx) = broadcast::channel(1);
        let handle = controller.start_auto_optimization(rx);
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert!(controller.is_auto_optimizing());
        assert_eq!(controller.ceiling(), 5);
        assert_eq!(limiter.limit(), 5);

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(!controller.is_auto_optimizing());
        assert_eq!(controller.get_optimization_history().len(), 3);
    }
}
