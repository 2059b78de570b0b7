//! Row sources: where partition rows come from.
//!
//! [`RowSource`] is the seam between the aggregation layer and the database.
//! The PostgreSQL implementation serves production traffic; the in-memory
//! implementation backs tests and local fixtures.

pub mod memory;
pub mod postgres;
mod value;

pub use memory::MemoryRowSource;
pub use postgres::PostgresRowSource;
pub use value::{CellValue, Record};

use crate::error::AnalyticsResult;
use async_trait::async_trait;

/// Matches every row when used as a filter value.
pub const MATCH_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    All,
    Exact(String),
}

impl FilterValue {
    pub fn parse(raw: &str) -> Self {
        if raw == MATCH_ALL {
            FilterValue::All
        } else {
            FilterValue::Exact(raw.to_string())
        }
    }

    /// Null cells never satisfy an exact match.
    pub fn matches(&self, cell: &CellValue) -> bool {
        match self {
            FilterValue::All => true,
            FilterValue::Exact(expected) => match cell {
                CellValue::Null => false,
                other => other.as_text().is_some_and(|text| &text == expected),
            },
        }
    }
}

/// Equality predicate on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFilter {
    pub column: String,
    pub value: FilterValue,
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// A read-only projection of one partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<ColumnFilter>,
}

impl FetchRequest {
    pub fn new(table: impl Into<String>, columns: &[String]) -> Self {
        Self {
            table: table.into(),
            columns: columns.to_vec(),
            filters: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: &[ColumnFilter]) -> Self {
        self.filters = filters.to_vec();
        self
    }
}

#[async_trait]
pub trait RowSource: Send + Sync {
    /// Short label used in logs and health details.
    fn kind(&self) -> &'static str;

    /// Fetch every row of `request.table` that passes the filters, projected
    /// to `request.columns` in order. A missing table or unreachable backend
    /// is reported as `PartitionUnavailable`.
    async fn fetch(&self, request: &FetchRequest) -> AnalyticsResult<Vec<Record>>;

    /// Cheap round trip proving the backend answers.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Release pooled resources. Called once during shutdown.
    async fn close(&self) {}
}
