use super::export::{render, ExportDocument, ExportFormat};
use super::{MetricsSummary, TestMetrics, TestSession};
use crate::error::{GovernorError, Result};
use crate::models::{ResourceSnapshot, StorageEngine, TestStatus};
use crate::observability::StructuredLogger;
use crate::resource::ResourceSampler;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Collector-wide defaults stamped on every record
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub metrics_dir: PathBuf,
    pub environment: String,
    pub database_engine: StorageEngine,
    pub parallel: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_dir: PathBuf::from("test-metrics"),
            environment: "test".to_string(),
            database_engine: StorageEngine::default(),
            parallel: true,
        }
    }
}

struct Inner {
    config: TelemetryConfig,
    log: Mutex<Vec<TestMetrics>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    logger: Option<StructuredLogger>,
}

/// Append-only log of test records
///
/// Clones share the same log.
#[derive(Clone)]
pub struct TelemetryCollector {
    inner: Arc<Inner>,
}

impl TelemetryCollector {
    pub fn new(config: TelemetryConfig) -> Self {
        Self::build(config, None, None)
    }

    /// Collector that stamps memory readings from `sampler` on each record
    pub fn with_sampler(
        config: TelemetryConfig,
        sampler: Arc<dyn ResourceSampler>,
        logger: Option<StructuredLogger>,
    ) -> Self {
        Self::build(config, Some(sampler), logger)
    }

    fn build(
        config: TelemetryConfig,
        sampler: Option<Arc<dyn ResourceSampler>>,
        logger: Option<StructuredLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                log: Mutex::new(Vec::new()),
                sampler,
                logger,
            }),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub(crate) fn sample(&self) -> Option<ResourceSnapshot> {
        self.inner.sampler.as_ref().map(|s| s.sample())
    }

    /// Open a session for `name`
    pub fn start_test<S: AsRef<str>>(&self, name: &str, tags: &[S]) -> TestSession {
        let config = &self.inner.config;
        let mut metrics = TestMetrics::new(name, config.database_engine, config.parallel);
        metrics.tags = tags.iter().map(|t| t.as_ref().to_string()).collect();
        if let Some(snapshot) = self.sample() {
            metrics.memory.start_resident_bytes = snapshot.resident_bytes;
        }
        debug!(test = %name, "Telemetry session started");
        TestSession::new(metrics, self.clone())
    }

    /// Append a skipped test without opening a session
    pub fn record_skipped<S: AsRef<str>>(&self, name: &str, tags: &[S], reason: &str) {
        let config = &self.inner.config;
        let mut metrics = TestMetrics::new(name, config.database_engine, config.parallel);
        metrics.tags = tags.iter().map(|t| t.as_ref().to_string()).collect();
        metrics.status = TestStatus::Skipped;
        metrics.end_time = Some(metrics.start_time);
        metrics.metadata.insert("skip_reason".to_string(), reason.to_string());
        self.record(metrics);
    }

    /// Append a finished record
    pub fn record(&self, metrics: TestMetrics) {
        self.inner.log.lock().push(metrics);
    }

    /// Copy of every record, in completion order
    pub fn metrics(&self) -> Vec<TestMetrics> {
        self.inner.log.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generate_summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(&self.inner.log.lock())
    }

    /// Write the log to a timestamped file under the metrics directory
    pub async fn export_metrics(&self, format: ExportFormat) -> Result<PathBuf> {
        let dir = self.inner.config.metrics_dir.clone();
        self.export_to(&dir, format).await
    }

    /// Write the log to a timestamped file under `dir`
    pub async fn export_to(&self, dir: &Path, format: ExportFormat) -> Result<PathBuf> {
        let tests = self.metrics();
        let document = ExportDocument {
            exported_at: Utc::now(),
            environment: self.inner.config.environment.clone(),
            summary: MetricsSummary::from_metrics(&tests),
            tests,
        };

        let body = render(&document, format)?;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            GovernorError::Export(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let stem = format!(
            "test-metrics-{}",
            document.exported_at.format("%Y%m%d-%H%M%S%.3f")
        );
        let path = write_new_file(dir, &stem, format.extension(), body.as_bytes()).await?;

        if let Some(logger) = &self.inner.logger {
            logger.log_export(format.as_str(), &path, document.tests.len());
        }
        Ok(path)
    }
}

/// Write `body` to `<stem>.<ext>`, or `<stem>-<n>.<ext>` when taken
async fn write_new_file(dir: &Path, stem: &str, extension: &str, body: &[u8]) -> Result<PathBuf> {
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{}.{}", stem, extension),
            n => format!("{}-{}.{}", stem, n, extension),
        };
        let path = dir.join(name);
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        match opened {
            Ok(mut file) => {
                file.write_all(body).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(GovernorError::Export(format!(
                    "cannot write {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ManualSampler;
    use crate::telemetry::{load_metrics, DatabaseOp, DROPPED_SESSION_ERROR};
    use std::time::Duration;
    use tempfile::TempDir;

    fn collector(dir: &Path) -> TelemetryCollector {
        TelemetryCollector::new(TelemetryConfig {
            metrics_dir: dir.to_path_buf(),
            environment: "ci".to_string(),
            database_engine: StorageEngine::Postgres,
            parallel: true,
        })
    }

    #[test]
    fn test_session_accumulates() {
        let collector = TelemetryCollector::new(TelemetryConfig::default());
        let mut session = collector.start_test("create_expense", &["db"]);
        session.add_assertion(true);
        session.add_assertion(false);
        session.add_database_op(DatabaseOp::Create, 3, Duration::from_millis(4));
        session.add_database_op(DatabaseOp::Query, 2, Duration::from_millis(1));
        session.set_metadata("user", "alice");

        let record = session.end(TestStatus::Failed, Some("assertion failed".into()));

        assert_eq!(record.assertions.total, 2);
        assert_eq!(record.assertions.failed, 1);
        assert_eq!(record.database.records_created, 3);
        assert_eq!(record.database.queries, 3);
        assert!((record.database.query_time_ms - 5.0).abs() < 1e-9);
        assert_eq!(record.metadata["user"], "alice");
        assert!(record.end_time.is_some());
        assert_eq!(collector.metrics(), vec![record]);
    }

    #[test]
    fn test_dropped_session_is_recorded_as_failed() {
        let collector = TelemetryCollector::new(TelemetryConfig::default());
        {
            let mut session = collector.start_test("panicky", &[] as &[&str]);
            session.add_assertion(true);
        }

        let records = collector.metrics();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TestStatus::Failed);
        assert_eq!(records[0].error.as_deref(), Some(DROPPED_SESSION_ERROR));
    }

    #[test]
    fn test_memory_readings_from_sampler() {
        let sampler = Arc::new(ManualSampler::new(0.1, 0.25));
        let collector =
            TelemetryCollector::with_sampler(TelemetryConfig::default(), sampler, None);

        let record = collector
            .start_test("t", &["unit"])
            .end(TestStatus::Passed, None);
        assert_eq!(record.memory.memory_utilization, 0.25);
    }

    #[test]
    fn test_record_skipped() {
        let collector = TelemetryCollector::new(TelemetryConfig::default());
        collector.record_skipped("slow_report", &["slow"], "Slow tests disabled");

        let records = collector.metrics();
        assert_eq!(records[0].status, TestStatus::Skipped);
        assert_eq!(records[0].metadata["skip_reason"], "Slow tests disabled");
        assert_eq!(collector.generate_summary().skipped, 1);
    }

    #[tokio::test]
    async fn test_json_export_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(temp_dir.path());

        for i in 0..5 {
            let session = collector.start_test(&format!("test_{}", i), &["unit"]);
            let status = if i == 3 {
                TestStatus::Failed
            } else {
                TestStatus::Passed
            };
            session.end(status, None);
        }
        let originals = collector.metrics();

        let path = collector.export_metrics(ExportFormat::Json).await.unwrap();
        assert!(path.starts_with(temp_dir.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

        let document = load_metrics(&path).await.unwrap();
        assert_eq!(document.environment, "ci");
        assert_eq!(document.tests.len(), 5);
        for (loaded, original) in document.tests.iter().zip(&originals) {
            assert_eq!(loaded.name, original.name);
            assert_eq!(loaded.status, original.status);
            assert_eq!(loaded.duration_ms, original.duration_ms);
        }
        assert_eq!(document.summary.failed, 1);
    }

    #[tokio::test]
    async fn test_json_export_preserves_measured_durations() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(temp_dir.path());

        for i in 0..2_000u64 {
            let mut record =
                TestMetrics::new(format!("timed_{}", i), StorageEngine::Postgres, true);
            record.status = TestStatus::Passed;
            let elapsed = Duration::from_nanos(i * 7_919 + 194_728);
            record.duration_ms = elapsed.as_secs_f64() * 1000.0;
            collector.record(record);
        }
        let originals = collector.metrics();

        let path = collector.export_metrics(ExportFormat::Json).await.unwrap();
        let document = load_metrics(&path).await.unwrap();

        assert_eq!(document.tests.len(), originals.len());
        for (loaded, original) in document.tests.iter().zip(&originals) {
            assert_eq!(loaded.duration_ms, original.duration_ms, "{}", original.name);
        }
    }

    #[tokio::test]
    async fn test_export_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();

        let first = write_new_file(temp_dir.path(), "test-metrics-x", "json", b"first")
            .await
            .unwrap();
        let second = write_new_file(temp_dir.path(), "test-metrics-x", "json", b"second")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().and_then(|n| n.to_str()),
            Some("test-metrics-x-1.json")
        );
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_csv_and_summary_exports() {
        let temp_dir = TempDir::new().unwrap();
        let collector = collector(temp_dir.path());
        collector
            .start_test("quoted, name", &["unit"])
            .end(TestStatus::Passed, None);

        let csv_path = collector.export_metrics(ExportFormat::Csv).await.unwrap();
        let csv = tokio::fs::read_to_string(&csv_path).await.unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(crate::telemetry::CSV_HEADER));
        assert!(lines.next().unwrap().starts_with("\"quoted, name\",passed,"));

        let text_path = collector.export_metrics(ExportFormat::Summary).await.unwrap();
        let text = tokio::fs::read_to_string(&text_path).await.unwrap();
        assert!(text.contains("Total tests: 1"));
    }
}
