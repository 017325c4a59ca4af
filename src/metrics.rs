// Ledger Metrics
//
// Counters for point-of-sale transactions, imports, reversals, campaign
// firings and outbound dispatches, plus timing of the transactional flows.

use serde::Serialize;
use utoipa::ToSchema;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Flows slower than this are counted and logged (500ms)
const SLOW_OPERATION_THRESHOLD_MS: u64 = 500;

/// Shared counters, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct LedgerMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    pos_transactions: AtomicU64,
    pos_failures: AtomicU64,
    import_batches: AtomicU64,
    sales_imported: AtomicU64,
    sales_skipped: AtomicU64,
    reversals: AtomicU64,
    campaigns_fired: AtomicU64,
    dispatches_sent: AtomicU64,
    dispatches_failed: AtomicU64,

    // Timing metrics (in microseconds)
    total_pos_time_us: AtomicU64,
    total_import_time_us: AtomicU64,
    slow_operations: AtomicU64,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pos_failure(&self) {
        self.inner.pos_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sales_imported(&self, count: u64) {
        self.inner.sales_imported.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sales_skipped(&self, count: u64) {
        self.inner.sales_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_reversal(&self) {
        self.inner.reversals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_campaigns_fired(&self, count: u64) {
        self.inner.campaigns_fired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, delivered: bool) {
        if delivered {
            self.inner.dispatches_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.dispatches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Start timing a point-of-sale transaction
    pub fn start_pos_transaction(&self) -> OperationTimer {
        OperationTimer::new(OperationType::PosTransaction, self.clone())
    }

    /// Start timing an import batch
    pub fn start_import_batch(&self) -> OperationTimer {
        OperationTimer::new(OperationType::ImportBatch, self.clone())
    }

    fn record_operation(&self, operation_type: OperationType, duration: Duration) {
        let (count, total) = match operation_type {
            OperationType::PosTransaction => (&self.inner.pos_transactions, &self.inner.total_pos_time_us),
            OperationType::ImportBatch => (&self.inner.import_batches, &self.inner.total_import_time_us),
        };
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        if duration.as_millis() as u64 > SLOW_OPERATION_THRESHOLD_MS {
            self.inner.slow_operations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                operation = ?operation_type,
                elapsed_ms = duration.as_millis() as u64,
                "Slow ledger operation"
            );
        }
    }

    fn average_ms(count: &AtomicU64, total_us: &AtomicU64) -> f64 {
        let count = count.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            (total_us.load(Ordering::Relaxed) as f64 / count as f64) / 1000.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = &self.inner;
        MetricsSummary {
            pos_transactions: inner.pos_transactions.load(Ordering::Relaxed),
            pos_failures: inner.pos_failures.load(Ordering::Relaxed),
            avg_pos_time_ms: Self::average_ms(&inner.pos_transactions, &inner.total_pos_time_us),
            import_batches: inner.import_batches.load(Ordering::Relaxed),
            avg_import_time_ms: Self::average_ms(&inner.import_batches, &inner.total_import_time_us),
            sales_imported: inner.sales_imported.load(Ordering::Relaxed),
            sales_skipped: inner.sales_skipped.load(Ordering::Relaxed),
            reversals: inner.reversals.load(Ordering::Relaxed),
            campaigns_fired: inner.campaigns_fired.load(Ordering::Relaxed),
            dispatches_sent: inner.dispatches_sent.load(Ordering::Relaxed),
            dispatches_failed: inner.dispatches_failed.load(Ordering::Relaxed),
            slow_operations: inner.slow_operations.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        tracing::info!(
            pos_transactions = summary.pos_transactions,
            pos_failures = summary.pos_failures,
            avg_pos_time_ms = summary.avg_pos_time_ms,
            import_batches = summary.import_batches,
            sales_imported = summary.sales_imported,
            sales_skipped = summary.sales_skipped,
            reversals = summary.reversals,
            campaigns_fired = summary.campaigns_fired,
            dispatches_sent = summary.dispatches_sent,
            dispatches_failed = summary.dispatches_failed,
            slow_operations = summary.slow_operations,
            "Ledger metrics"
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum OperationType {
    PosTransaction,
    ImportBatch,
}

/// Records the elapsed time when dropped
pub struct OperationTimer {
    start: Instant,
    operation_type: OperationType,
    metrics: LedgerMetrics,
}

impl OperationTimer {
    fn new(operation_type: OperationType, metrics: LedgerMetrics) -> Self {
        Self {
            start: Instant::now(),
            operation_type,
            metrics,
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        self.metrics
            .record_operation(self.operation_type, self.start.elapsed());
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsSummary {
    pub pos_transactions: u64,
    pub pos_failures: u64,
    pub avg_pos_time_ms: f64,
    pub import_batches: u64,
    pub avg_import_time_ms: f64,
    pub sales_imported: u64,
    pub sales_skipped: u64,
    pub reversals: u64,
    pub campaigns_fired: u64,
    pub dispatches_sent: u64,
    pub dispatches_failed: u64,
    pub slow_operations: u64,
}
