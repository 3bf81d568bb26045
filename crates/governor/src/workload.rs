//! Synthetic soak workload
//!
//! Runs a batch of fake budgeting tests through the governor against the
//! in-memory storage, then clears the touched tables.

use governor_lib::storage::{InMemoryStorage, StorageHandle};
use governor_lib::telemetry::DatabaseOp;
use governor_lib::{Governor, TestOutcome, TestSpec};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Tables the soak tests write to
pub const WORKLOAD_TABLES: &[&str] = &["users", "groups", "budgets", "expenses"];

const TAG_SETS: &[&[&str]] = &[
    &["unit"],
    &["db"],
    &["db", "slow"],
    &["integration", "db"],
    &["serial"],
    &["external", "network"],
];

/// Every Nth test fails an assertion
const FAILING_TEST_INTERVAL: usize = 17;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_cleaned: u64,
}

/// Name, tags and expected duration of the `index`-th soak test
pub fn test_spec(index: usize) -> TestSpec {
    let tags = TAG_SETS[index % TAG_SETS.len()];
    let table = WORKLOAD_TABLES[index % WORKLOAD_TABLES.len()];
    TestSpec::new(format!("soak_{}_{}", table, index))
        .with_tags(tags.iter().copied())
        .with_priority((index % 10) as i32 + 1)
}

async fn soak_test(
    governor: &Governor,
    storage: &InMemoryStorage,
    index: usize,
    work: Duration,
) -> TestOutcome<(), String> {
    let spec = test_spec(index);
    let table = WORKLOAD_TABLES[index % WORKLOAD_TABLES.len()];
    let retry = Arc::clone(governor.retry());

    governor
        .run_test(&spec, |session| async move {
            let _lease = storage.acquire().await.map_err(|e| e.to_string())?;

            let started = Instant::now();
            let statement = format!("INSERT INTO {} (name) VALUES ('soak_{}')", table, index);
            retry
                .execute_statement(storage, &statement)
                .await
                .map_err(|e| e.to_string())?;
            storage.insert_rows(table, 1);
            session.add_database_op(DatabaseOp::Create, 1, started.elapsed());

            tokio::time::sleep(work).await;

            let ok = index % FAILING_TEST_INTERVAL != 0;
            session.add_assertion(ok);
            if ok {
                Ok(())
            } else {
                Err(format!("assertion failed in soak test {}", index))
            }
        })
        .await
}

/// Run `tests` soak tests concurrently, bounded by the governor's limiter
pub async fn run_workload(
    governor: Arc<Governor>,
    storage: InMemoryStorage,
    tests: usize,
    work: Duration,
) -> WorkloadReport {
    info!(tests, engine = %storage.engine(), "Starting soak workload");

    let handles: Vec<_> = (0..tests)
        .map(|index| {
            let governor = Arc::clone(&governor);
            let storage = storage.clone();
            tokio::spawn(async move { soak_test(&governor, &storage, index, work).await })
        })
        .collect();

    let mut report = WorkloadReport::default();
    for handle in handles {
        match handle.await {
            Ok(TestOutcome::Passed(())) => report.passed += 1,
            Ok(TestOutcome::Failed(_)) => report.failed += 1,
            Ok(TestOutcome::Skipped { .. }) => report.skipped += 1,
            Err(e) => {
                warn!(error = %e, "Soak test task panicked");
                report.failed += 1;
            }
        }
    }

    match governor.table_cleaner().clean(WORKLOAD_TABLES).await {
        Ok(cleanup) => report.rows_cleaned = cleanup.rows_deleted,
        Err(e) => warn!(error = %e, "Failed to clean soak tables"),
    }

    info!(
        passed = report.passed,
        failed = report.failed,
        skipped = report.skipped,
        rows_cleaned = report.rows_cleaned,
        "Soak workload finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor_lib::models::StorageEngine;
    use governor_lib::parallelism::ParallelismConfig;
    use governor_lib::resource::ManualSampler;
    use governor_lib::skip::SkipEnvironment;
    use governor_lib::storage::RetryPolicy;
    use governor_lib::GovernorSettings;

    #[test]
    fn test_specs_rotate_tags() {
        assert_eq!(test_spec(0).tags, vec!["unit"]);
        assert_eq!(test_spec(2).tags, vec!["db", "slow"]);
        assert_eq!(test_spec(0).name, "soak_users_0");
        assert_eq!(test_spec(13).priority, 4);
    }

    #[tokio::test]
    async fn test_workload_runs_and_cleans() {
        let storage =
            InMemoryStorage::new(StorageEngine::Sqlite, InMemoryStorage::default_settings(5));
        storage.set_failure_interval(10);

        let governor = Arc::new(
            Governor::builder(GovernorSettings::default(), Arc::new(storage.clone()))
                .sampler(Arc::new(ManualSampler::new(0.4, 0.2)))
                .parallelism_config(ParallelismConfig::for_cpus(2).with_initial_ceiling(4))
                .retry_policy(RetryPolicy {
                    base_delay: Duration::from_millis(1),
                    ..Default::default()
                })
                .skip_probe(SkipEnvironment {
                    skip_slow: true,
                    skip_integration: false,
                    skip_external: true,
                    parallel_safe: false,
                    cpu_count: 2,
                    os: "linux".to_string(),
                })
                .build()
                .unwrap(),
        );

        let report =
            run_workload(Arc::clone(&governor), storage.clone(), 24, Duration::from_millis(1)).await;

        // Tag sets 2 (slow) and 5 (external) skip: 8 of 24
        assert_eq!(report.skipped, 8);
        assert_eq!(report.passed + report.failed, 16);
        assert_eq!(report.failed, 1);
        assert!(governor.retry().retry_count() > 0);
        for table in WORKLOAD_TABLES {
            assert_eq!(storage.row_count(table), 0);
        }
        assert_eq!(governor.telemetry().len(), 24);
        assert_eq!(governor.parallelism().active_count(), 0);
    }
}
