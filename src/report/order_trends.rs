//! Monthly revenue and order counts with month-over-month change.

use super::{ReportSettings, RowReader, YearParams};
use crate::error::AnalyticsResult;
use crate::fetch::PartitionFetcher;
use crate::partition::TablePrefix;
use crate::source::{Record, RowSource};
use indexmap::IndexMap;
use serde::Serialize;

const CREATED_AT_COLUMN: &str = "created_at";
const TOTAL_PRICE_COLUMN: &str = "total_price_set_shop_money_amount";

const CREATED_AT: usize = 0;
const REVENUE: usize = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// `YYYY-MM`
    pub date: String,
    pub revenue: f64,
    pub order_count: u64,
    /// Percent change against the previous month; `null` for the first month
    /// and after a month with zero revenue.
    pub revenue_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTrendsResponse {
    pub trends: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, Default)]
struct MonthTotals {
    revenue: f64,
    order_count: u64,
}

#[derive(Debug, Default)]
pub struct OrderTrendsAggregator {
    months: IndexMap<String, MonthTotals>,
}

impl OrderTrendsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, month: String, revenue: f64) {
        let totals = self.months.entry(month).or_default();
        totals.revenue += revenue;
        totals.order_count += 1;
    }

    /// Only months with at least one order appear; gaps are not filled.
    pub fn finish(mut self) -> OrderTrendsResponse {
        self.months.sort_keys();

        let mut previous: Option<f64> = None;
        let trends = self
            .months
            .into_iter()
            .map(|(date, totals)| {
                let revenue_change = previous.and_then(|prev| percent_change(prev, totals.revenue));
                previous = Some(totals.revenue);
                TrendPoint {
                    date,
                    revenue: totals.revenue,
                    order_count: totals.order_count,
                    revenue_change,
                }
            })
            .collect();

        OrderTrendsResponse { trends }
    }
}

/// `None` when the ratio is undefined.
pub(crate) fn percent_change(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    let change = (current - previous) / previous * 100.0;
    change.is_finite().then_some(change)
}

/// Revenue is validated before the month so a bad amount is reported even on
/// rows that would otherwise be skipped for a missing timestamp.
fn read_order(reader: &RowReader<'_>, record: &Record) -> AnalyticsResult<Option<(String, f64)>> {
    let revenue = reader.number(record, REVENUE)?.unwrap_or(0.0);
    Ok(reader
        .month(record, CREATED_AT)?
        .map(|month| (month, revenue)))
}

pub async fn run(
    source: &dyn RowSource,
    settings: &ReportSettings,
    params: &YearParams,
) -> AnalyticsResult<OrderTrendsResponse> {
    let years = settings.resolver.resolve(&params.year)?;
    let columns = [CREATED_AT_COLUMN, TOTAL_PRICE_COLUMN]
        .map(String::from)
        .to_vec();

    let mut aggregator = OrderTrendsAggregator::new();
    let rows = PartitionFetcher::new(source, settings.fetch_policy)
        .for_each_partition(
            TablePrefix::Orders,
            &years,
            &columns,
            &[],
            |table, records| {
                let reader = RowReader::new(table, &columns);
                for record in &records {
                    if let Some((month, revenue)) = read_order(&reader, record)? {
                        aggregator.ingest(month, revenue);
                    }
                }
                Ok(())
            },
        )
        .await?;
    tracing::Span::current().record("rows", rows as u64);

    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::source::{CellValue, MemoryRowSource};
    use assert_matches::assert_matches;

    fn trends(points: &[(&str, f64)]) -> Vec<TrendPoint> {
        let mut aggregator = OrderTrendsAggregator::new();
        for (month, revenue) in points {
            aggregator.ingest(month.to_string(), *revenue);
        }
        aggregator.finish().trends
    }

    #[test]
    fn change_is_relative_to_previous_month() {
        let points = trends(&[("2023-01", 100.0), ("2023-02", 150.0), ("2023-03", 0.0)]);
        let changes = points.iter().map(|p| p.revenue_change).collect::<Vec<_>>();
        assert_eq!(changes, vec![None, Some(50.0), Some(-100.0)]);
    }

    #[test]
    fn change_after_zero_month_is_null() {
        let points = trends(&[("2023-01", 0.0), ("2023-02", 50.0)]);
        let changes = points.iter().map(|p| p.revenue_change).collect::<Vec<_>>();
        assert_eq!(changes, vec![None, None]);
    }

    #[test]
    fn months_sorted_and_counted() {
        let points = trends(&[
            ("2024-03", 5.0),
            ("2023-12", 1.0),
            ("2024-03", 7.0),
            ("2024-01", 2.0),
        ]);
        let summary = points
            .iter()
            .map(|p| (p.date.as_str(), p.revenue, p.order_count))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![("2023-12", 1.0, 1), ("2024-01", 2.0, 1), ("2024-03", 12.0, 2)]
        );
    }

    #[test]
    fn null_change_serializes_as_json_null() {
        let points = trends(&[("2023-01", 10.0)]);
        let json = serde_json::to_value(&points[0]).unwrap();
        assert!(json["revenue_change"].is_null());
    }

    #[tokio::test]
    async fn skips_orders_without_timestamp() {
        let source = MemoryRowSource::new().with_table(
            "orders_2023",
            &[CREATED_AT_COLUMN, TOTAL_PRICE_COLUMN],
            vec![
                vec![CellValue::from("2023-05-02 10:00:00"), CellValue::from("20.5")],
                vec![CellValue::Null, CellValue::from(99.0)],
                vec![CellValue::from("2023-05-20T08:00:00Z"), CellValue::Null],
            ],
        );
        let response = run(&source, &ReportSettings::default(), &YearParams::year("2023"))
            .await
            .unwrap();
        assert_eq!(response.trends.len(), 1);
        assert_eq!(response.trends[0].date, "2023-05");
        assert_eq!(response.trends[0].revenue, 20.5);
        assert_eq!(response.trends[0].order_count, 2);
    }

    #[tokio::test]
    async fn malformed_revenue_fails_report() {
        let source = MemoryRowSource::new().with_table(
            "orders_2023",
            &[CREATED_AT_COLUMN, TOTAL_PRICE_COLUMN],
            vec![vec![CellValue::Null, CellValue::from("n/a")]],
        );
        let result = run(&source, &ReportSettings::default(), &YearParams::year("2023")).await;
        assert_matches!(result, Err(AnalyticsError::MalformedRow { .. }));
    }
}
