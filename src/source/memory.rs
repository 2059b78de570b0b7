use super::{CellValue, FetchRequest, Record, RowSource};
use crate::error::{AnalyticsError, AnalyticsResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

/// Row source over tables held in memory.
///
/// Behaves like the database for everything the reports rely on: unknown
/// tables and columns fail as unavailable partitions, exact filters never match
/// null cells, and projection follows the requested column order.
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: RwLock<HashMap<String, MemoryTable>>,
    fetch_delay: Option<Duration>,
    fetch_log: RwLock<Vec<String>>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<R>(self, name: &str, columns: &[&str], rows: R) -> Self
    where
        R: IntoIterator<Item = Vec<CellValue>>,
    {
        self.insert_table(name, columns, rows);
        self
    }

    /// Every fetch sleeps this long first.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn insert_table<R>(&self, name: &str, columns: &[&str], rows: R)
    where
        R: IntoIterator<Item = Vec<CellValue>>,
    {
        let table = MemoryTable {
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows: rows.into_iter().collect(),
        };
        self.tables.write().insert(name.to_string(), table);
    }

    /// Tables fetched so far, in order.
    pub fn fetched_tables(&self) -> Vec<String> {
        self.fetch_log.read().clone()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, request: &FetchRequest) -> AnalyticsResult<Vec<Record>> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetch_log.write().push(request.table.clone());

        let tables = self.tables.read();
        let table = tables.get(&request.table).ok_or_else(|| {
            AnalyticsError::partition_unavailable(&request.table, "table does not exist")
        })?;

        let position = |column: &str| {
            table
                .columns
                .iter()
                .position(|candidate| candidate == column)
                .ok_or_else(|| {
                    AnalyticsError::partition_unavailable(
                        &request.table,
                        format!("column missing: {column}"),
                    )
                })
        };
        let projection = request
            .columns
            .iter()
            .map(|column| position(column))
            .collect::<AnalyticsResult<Vec<_>>>()?;
        let filters = request
            .filters
            .iter()
            .map(|filter| position(&filter.column).map(|index| (index, &filter.value)))
            .collect::<AnalyticsResult<Vec<_>>>()?;

        let cell = |row: &[CellValue], index: usize| {
            row.get(index).cloned().unwrap_or(CellValue::Null)
        };
        Ok(table
            .rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(index, value)| value.matches(&cell(row.as_slice(), *index)))
            })
            .map(|row| {
                projection
                    .iter()
                    .map(|index| cell(row.as_slice(), *index))
                    .collect::<Record>()
            })
            .collect())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
