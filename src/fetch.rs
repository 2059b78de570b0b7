//! Sequential multi-partition fetching under a time budget.

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::metrics::METRICS;
use crate::partition::TablePrefix;
use crate::source::{ColumnFilter, FetchRequest, Record, RowSource};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Budget for one partition table.
    pub fetch_timeout: Duration,
    /// Budget for every partition of one report together.
    pub request_deadline: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(30),
        }
    }
}

/// Fetches one logical table across yearly partitions.
pub struct PartitionFetcher<'a> {
    source: &'a dyn RowSource,
    policy: FetchPolicy,
}

impl<'a> PartitionFetcher<'a> {
    pub fn new(source: &'a dyn RowSource, policy: FetchPolicy) -> Self {
        Self { source, policy }
    }

    /// Fetches `prefix_{year}` for each year in order, one at a time, handing
    /// each partition's rows to `consume` before moving to the next. The first
    /// failure aborts the whole run. Returns the number of rows consumed.
    pub async fn for_each_partition<F>(
        &self,
        prefix: TablePrefix,
        years: &[i32],
        columns: &[String],
        filters: &[ColumnFilter],
        mut consume: F,
    ) -> AnalyticsResult<usize>
    where
        F: FnMut(&str, Vec<Record>) -> AnalyticsResult<()>,
    {
        let deadline = Instant::now() + self.policy.request_deadline;
        let mut total_rows = 0;

        for &year in years {
            let table = prefix.table_name(year);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                METRICS.record_partition_fetch(prefix.as_str(), "deadline", 0, Duration::ZERO);
                return Err(AnalyticsError::DeadlineExceeded {
                    table,
                    budget: self.policy.request_deadline,
                });
            }
            let budget = remaining.min(self.policy.fetch_timeout);

            let request = FetchRequest::new(&table, columns).with_filters(filters);
            let started = Instant::now();
            let outcome = timeout(budget, self.source.fetch(&request)).await;
            let elapsed = started.elapsed();

            let records = match outcome {
                Ok(Ok(records)) => records,
                Ok(Err(error)) => {
                    METRICS.record_partition_fetch(prefix.as_str(), "error", 0, elapsed);
                    warn!(%table, %error, "partition fetch failed");
                    return Err(error);
                }
                Err(_) => {
                    METRICS.record_partition_fetch(prefix.as_str(), "timeout", 0, elapsed);
                    warn!(%table, elapsed_ms = elapsed.as_millis() as u64, "partition fetch timed out");
                    return Err(if budget < self.policy.fetch_timeout {
                        AnalyticsError::DeadlineExceeded {
                            table,
                            budget: self.policy.request_deadline,
                        }
                    } else {
                        AnalyticsError::FetchTimeout { table, elapsed }
                    });
                }
            };

            let rows = records.len();
            METRICS.record_partition_fetch(prefix.as_str(), "success", rows, elapsed);
            debug!(
                %table,
                rows,
                elapsed_ms = elapsed.as_millis() as u64,
                "partition fetched"
            );
            total_rows += rows;
            consume(&table, records)?;
        }

        Ok(total_rows)
    }
}
