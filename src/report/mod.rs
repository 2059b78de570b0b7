//! The three sales reports.
//!
//! Each report resolves its partitions, streams every partition through an
//! aggregator keyed by an insertion-ordered map, and finishes into the JSON
//! response shape. Rankings use stable sorts so equal measures keep the order
//! in which their groups were first seen.

pub mod order_trends;
pub mod sales_location;
pub mod top_products;

pub use order_trends::{OrderTrendsAggregator, OrderTrendsResponse, TrendPoint};
pub use sales_location::{
    CountrySales, LocationAggregator, LocationParams, ProvinceSales, SalesByLocationResponse,
};
pub use top_products::{
    ProductId, ProductQuantity, ProductRevenue, TopProductsAggregator, TopProductsResponse,
};

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::fetch::FetchPolicy;
use crate::partition::{ALL_YEARS, PartitionResolver};
use crate::source::{CellValue, Record};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;

/// Length of every truncated ranking.
pub const TOP_N: usize = 5;

/// Placeholder for missing location fields.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Everything a report needs besides the row source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSettings {
    pub resolver: PartitionResolver,
    pub fetch_policy: FetchPolicy,
    pub price_column: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            resolver: PartitionResolver::default(),
            fetch_policy: FetchPolicy::default(),
            price_column: "price".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    TopProducts,
    SalesByLocation,
    OrderTrends,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::TopProducts => "top_products",
            ReportKind::SalesByLocation => "sales_by_location",
            ReportKind::OrderTrends => "order_trends",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `?year=` query parameter shared by every report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct YearParams {
    #[serde(default = "all")]
    pub year: String,
}

impl Default for YearParams {
    fn default() -> Self {
        Self { year: all() }
    }
}

impl YearParams {
    pub fn year(year: impl Into<String>) -> Self {
        Self { year: year.into() }
    }
}

pub(crate) fn all() -> String {
    ALL_YEARS.to_string()
}

/// Typed reads from a fetched record, reporting failures against the table
/// and column they came from.
pub(crate) struct RowReader<'a> {
    table: &'a str,
    columns: &'a [String],
}

impl<'a> RowReader<'a> {
    pub(crate) fn new(table: &'a str, columns: &'a [String]) -> Self {
        Self { table, columns }
    }

    pub(crate) fn malformed(&self, index: usize, cell: &CellValue) -> AnalyticsError {
        self.invalid(index, cell)
    }

    pub(crate) fn invalid(&self, index: usize, value: impl fmt::Display) -> AnalyticsError {
        AnalyticsError::MalformedRow {
            table: self.table.to_string(),
            column: self
                .columns
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("#{index}")),
            value: value.to_string(),
        }
    }

    /// Blank cells read as `None`. NaN and infinities are malformed.
    pub(crate) fn number(&self, record: &Record, index: usize) -> AnalyticsResult<Option<f64>> {
        let cell = record.get(index);
        if cell.is_blank() {
            return Ok(None);
        }
        cell.as_f64()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or_else(|| self.malformed(index, cell))
    }

    /// Blank cells are malformed too.
    pub(crate) fn required_integer(&self, record: &Record, index: usize) -> AnalyticsResult<i64> {
        let cell = record.get(index);
        cell.as_i64().ok_or_else(|| self.malformed(index, cell))
    }

    pub(crate) fn text(&self, record: &Record, index: usize) -> Option<String> {
        let cell = record.get(index);
        if cell.is_blank() { None } else { cell.as_text() }
    }

    /// `YYYY-MM` of a timestamp cell; blank cells read as `None`.
    pub(crate) fn month(&self, record: &Record, index: usize) -> AnalyticsResult<Option<String>> {
        let cell = record.get(index);
        if cell.is_blank() {
            return Ok(None);
        }
        cell.as_timestamp()
            .map(|ts| Some(ts.format("%Y-%m").to_string()))
            .ok_or_else(|| self.malformed(index, cell))
    }
}

/// Stable descending order on a float measure.
pub(crate) fn descending(left: f64, right: f64) -> Ordering {
    right.total_cmp(&left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn columns() -> Vec<String> {
        vec!["created_at".into(), "price".into(), "quantity".into()]
    }

    #[test]
    fn reader_defaults_and_failures() {
        let columns = columns();
        let reader = RowReader::new("orders_2023", &columns);
        let record = Record::new(vec![
            CellValue::Null,
            CellValue::from("abc"),
            CellValue::from(""),
        ]);

        assert_eq!(reader.month(&record, 0).unwrap(), None);
        assert_matches!(
            reader.number(&record, 1),
            Err(AnalyticsError::MalformedRow { column, value, .. }) if column == "price" && value == "abc"
        );
        assert_matches!(
            reader.required_integer(&record, 2),
            Err(AnalyticsError::MalformedRow { column, .. }) if column == "quantity"
        );
        assert_eq!(reader.text(&record, 2), None);
    }

    #[test]
    fn non_finite_numbers_are_malformed() {
        let columns = columns();
        let reader = RowReader::new("order_line_items_2023", &columns);
        for cell in [
            CellValue::Float(f64::NAN),
            CellValue::Float(f64::INFINITY),
            CellValue::from("NaN"),
            CellValue::from("-inf"),
        ] {
            let record = Record::new(vec![CellValue::Null, cell, CellValue::Int(1)]);
            assert_matches!(
                reader.number(&record, 1),
                Err(AnalyticsError::MalformedRow { column, .. }) if column == "price"
            );
        }

        let record = Record::new(vec![CellValue::Null, CellValue::Float(-2.5), CellValue::Int(1)]);
        assert_eq!(reader.number(&record, 1).unwrap(), Some(-2.5));
    }

    #[test]
    fn month_formats_year_and_month() {
        let columns = columns();
        let reader = RowReader::new("orders_2024", &columns);
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let record = Record::new(vec![CellValue::Timestamp(ts)]);
        assert_eq!(reader.month(&record, 0).unwrap().as_deref(), Some("2024-02"));
    }

    #[test]
    fn year_params_default_to_all() {
        let params: YearParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, YearParams::default());
        assert_eq!(params.year, "all");
    }
}
