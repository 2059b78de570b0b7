//! Revenue and order counts by country and by province.

use super::{ReportSettings, RowReader, TOP_N, UNKNOWN_LOCATION, all, descending};
use crate::error::AnalyticsResult;
use crate::fetch::PartitionFetcher;
use crate::partition::TablePrefix;
use crate::source::{ColumnFilter, FilterValue, Record, RowSource};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const TOTAL_PRICE_COLUMN: &str = "total_price_set_shop_money_amount";
const COUNTRY_COLUMN: &str = "shipping_address_country";
const PROVINCE_COLUMN: &str = "shipping_address_province";

const REVENUE: usize = 0;
const COUNTRY: usize = 1;
const PROVINCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationParams {
    #[serde(default = "all")]
    pub year: String,
    #[serde(default = "all")]
    pub country: String,
}

impl Default for LocationParams {
    fn default() -> Self {
        Self {
            year: all(),
            country: all(),
        }
    }
}

/// One order reduced to its location and revenue.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub country: String,
    pub province: String,
    pub revenue: f64,
}

impl LocationRow {
    pub(crate) fn read(reader: &RowReader<'_>, record: &Record) -> AnalyticsResult<Self> {
        Ok(Self {
            revenue: reader.number(record, REVENUE)?.unwrap_or(0.0),
            country: reader
                .text(record, COUNTRY)
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            province: reader
                .text(record, PROVINCE)
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SalesTotals {
    revenue: f64,
    order_count: u64,
}

impl SalesTotals {
    fn add(&mut self, revenue: f64) {
        self.revenue += revenue;
        self.order_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountrySales {
    pub country: String,
    pub revenue: f64,
    pub order_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvinceSales {
    pub country: String,
    pub province: String,
    pub revenue: f64,
    pub order_count: u64,
}

/// `by_province` groups on `(country, province)`; older client docs call
/// this list `by_city`, the wire name stays `by_province`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesByLocationResponse {
    pub by_country: Vec<CountrySales>,
    pub by_province: Vec<ProvinceSales>,
}

#[derive(Debug, Default)]
pub struct LocationAggregator {
    countries: IndexMap<String, SalesTotals>,
    provinces: IndexMap<(String, String), SalesTotals>,
}

impl LocationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, row: LocationRow) {
        self.countries
            .entry(row.country.clone())
            .or_default()
            .add(row.revenue);
        self.provinces
            .entry((row.country, row.province))
            .or_default()
            .add(row.revenue);
    }

    /// Countries are all returned; provinces are cut to the top five.
    pub fn finish(self) -> SalesByLocationResponse {
        let mut by_country = self
            .countries
            .into_iter()
            .map(|(country, totals)| CountrySales {
                country,
                revenue: totals.revenue,
                order_count: totals.order_count,
            })
            .collect::<Vec<_>>();
        by_country.sort_by(|a, b| descending(a.revenue, b.revenue));

        let mut by_province = self
            .provinces
            .into_iter()
            .map(|((country, province), totals)| ProvinceSales {
                country,
                province,
                revenue: totals.revenue,
                order_count: totals.order_count,
            })
            .collect::<Vec<_>>();
        by_province.sort_by(|a, b| descending(a.revenue, b.revenue));
        by_province.truncate(TOP_N);

        SalesByLocationResponse {
            by_country,
            by_province,
        }
    }
}

pub async fn run(
    source: &dyn RowSource,
    settings: &ReportSettings,
    params: &LocationParams,
) -> AnalyticsResult<SalesByLocationResponse> {
    let years = settings.resolver.resolve(&params.year)?;
    let columns = [TOTAL_PRICE_COLUMN, COUNTRY_COLUMN, PROVINCE_COLUMN]
        .map(String::from)
        .to_vec();
    let filters = [ColumnFilter::new(
        COUNTRY_COLUMN,
        FilterValue::parse(&params.country),
    )];

    let mut aggregator = LocationAggregator::new();
    let rows = PartitionFetcher::new(source, settings.fetch_policy)
        .for_each_partition(
            TablePrefix::Orders,
            &years,
            &columns,
            &filters,
            |table, records| {
                let reader = RowReader::new(table, &columns);
                for record in &records {
                    aggregator.ingest(LocationRow::read(&reader, record)?);
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
    use crate::source::CellValue;

    fn row(country: &str, province: &str, revenue: f64) -> LocationRow {
        LocationRow {
            country: country.into(),
            province: province.into(),
            revenue,
        }
    }

    #[test]
    fn countries_sorted_by_revenue_and_fully_listed() {
        let mut aggregator = LocationAggregator::new();
        aggregator.ingest(row("Canada", "Ontario", 10.0));
        aggregator.ingest(row("France", "Île-de-France", 50.0));
        aggregator.ingest(row("Canada", "Quebec", 45.0));
        aggregator.ingest(row("Japan", "Tokyo", 1.0));
        let response = aggregator.finish();

        let countries = response
            .by_country
            .iter()
            .map(|c| (c.country.as_str(), c.revenue, c.order_count))
            .collect::<Vec<_>>();
        assert_eq!(
            countries,
            vec![("Canada", 55.0, 2), ("France", 50.0, 1), ("Japan", 1.0, 1)]
        );
    }

    #[test]
    fn provinces_truncated_to_five() {
        let mut aggregator = LocationAggregator::new();
        for (i, province) in ["A", "B", "C", "D", "E", "F", "G"].iter().enumerate() {
            aggregator.ingest(row("Canada", province, i as f64));
        }
        let response = aggregator.finish();
        assert_eq!(response.by_province.len(), 5);
        assert_eq!(response.by_province[0].province, "G");
        assert_eq!(response.by_province[4].province, "C");
        assert_eq!(response.by_country.len(), 1);
        assert_eq!(response.by_country[0].order_count, 7);
    }

    #[test]
    fn same_province_name_in_two_countries_stays_apart() {
        let mut aggregator = LocationAggregator::new();
        aggregator.ingest(row("Canada", "Georgia", 1.0));
        aggregator.ingest(row("United States", "Georgia", 2.0));
        let response = aggregator.finish();
        assert_eq!(response.by_province.len(), 2);
    }

    #[test]
    fn missing_values_default() {
        let columns = [TOTAL_PRICE_COLUMN, COUNTRY_COLUMN, PROVINCE_COLUMN]
            .map(String::from)
            .to_vec();
        let reader = RowReader::new("orders_2023", &columns);
        let record = Record::new(vec![CellValue::Null, CellValue::Null, CellValue::from("")]);
        assert_eq!(
            LocationRow::read(&reader, &record).unwrap(),
            row("Unknown", "Unknown", 0.0)
        );
    }

    #[test]
    fn response_uses_by_province_key() {
        let response = LocationAggregator::new().finish();
        let json = serde_json::to_value(response).unwrap();
        assert!(json.get("by_province").is_some());
        assert!(json.get("by_city").is_none());
    }
}
