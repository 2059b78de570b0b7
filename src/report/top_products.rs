//! Best-selling products by quantity and by revenue.

use super::{ReportSettings, RowReader, TOP_N, YearParams, descending};
use crate::error::AnalyticsResult;
use crate::fetch::PartitionFetcher;
use crate::partition::TablePrefix;
use crate::source::{CellValue, Record, RowSource};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

const PRODUCT_ID: usize = 0;
const NAME: usize = 1;
const QUANTITY: usize = 2;
const UNIT_PRICE: usize = 3;

/// Product identifiers keep the type they were stored with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ProductId {
    Int(i64),
    Text(String),
}

impl ProductId {
    fn from_cell(cell: &CellValue) -> Option<Self> {
        match cell {
            CellValue::Null => None,
            CellValue::Int(id) => Some(ProductId::Int(*id)),
            CellValue::Float(id) if id.fract() == 0.0 && id.is_finite() => {
                Some(ProductId::Int(*id as i64))
            }
            other => other.as_text().map(ProductId::Text),
        }
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        ProductId::Int(id)
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        ProductId::Text(id.to_string())
    }
}

/// One order line, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl LineItem {
    /// Numeric columns are validated first; rows without a product id or name
    /// are then skipped (`Ok(None)`), as they cannot be grouped.
    pub(crate) fn read(reader: &RowReader<'_>, record: &Record) -> AnalyticsResult<Option<Self>> {
        let quantity = reader.required_integer(record, QUANTITY)?;
        let unit_price = reader.number(record, UNIT_PRICE)?.unwrap_or(0.0);

        let Some(product_id) = ProductId::from_cell(record.get(PRODUCT_ID)) else {
            return Ok(None);
        };
        let Some(name) = record.get(NAME).as_text() else {
            return Ok(None);
        };

        Ok(Some(Self {
            product_id,
            name,
            quantity,
            unit_price,
        }))
    }

    pub fn revenue(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProductKey {
    product_id: ProductId,
    name: String,
}

/// A product's summed quantity left the `i64` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityOverflow {
    pub product_id: ProductId,
    pub total: i64,
    pub quantity: i64,
}

impl fmt::Display for QuantityOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (adding to a running total of {} overflows)",
            self.quantity, self.total
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ProductTotals {
    quantity: i64,
    revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductQuantity {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRevenue {
    pub product_id: ProductId,
    pub name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProductsResponse {
    pub top_by_quantity: Vec<ProductQuantity>,
    pub top_by_revenue: Vec<ProductRevenue>,
}

/// Sums quantity and revenue per `(product_id, name)`. The same product seen
/// in several years is added together.
#[derive(Debug, Default)]
pub struct TopProductsAggregator {
    groups: IndexMap<ProductKey, ProductTotals>,
}

impl TopProductsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity totals are exact: a total that would overflow is rejected and
    /// leaves the group unchanged.
    pub fn ingest(&mut self, item: LineItem) -> Result<(), QuantityOverflow> {
        let revenue = item.revenue();
        let totals = self
            .groups
            .entry(ProductKey {
                product_id: item.product_id.clone(),
                name: item.name,
            })
            .or_default();
        let Some(quantity) = totals.quantity.checked_add(item.quantity) else {
            return Err(QuantityOverflow {
                product_id: item.product_id,
                total: totals.quantity,
                quantity: item.quantity,
            });
        };
        totals.quantity = quantity;
        totals.revenue += revenue;
        Ok(())
    }

    pub fn finish(self) -> TopProductsResponse {
        let mut by_quantity = self
            .groups
            .iter()
            .map(|(key, totals)| ProductQuantity {
                product_id: key.product_id.clone(),
                name: key.name.clone(),
                quantity: totals.quantity,
            })
            .collect::<Vec<_>>();
        by_quantity.sort_by(|a, b| b.quantity.cmp(&a.quantity));
        by_quantity.truncate(TOP_N);

        let mut by_revenue = self
            .groups
            .into_iter()
            .map(|(key, totals)| ProductRevenue {
                product_id: key.product_id,
                name: key.name,
                revenue: totals.revenue,
            })
            .collect::<Vec<_>>();
        by_revenue.sort_by(|a, b| descending(a.revenue, b.revenue));
        by_revenue.truncate(TOP_N);

        TopProductsResponse {
            top_by_quantity: by_quantity,
            top_by_revenue: by_revenue,
        }
    }
}

pub async fn run(
    source: &dyn RowSource,
    settings: &ReportSettings,
    params: &YearParams,
) -> AnalyticsResult<TopProductsResponse> {
    let years = settings.resolver.resolve(&params.year)?;
    let columns = vec![
        "product_id".to_string(),
        "name".to_string(),
        "quantity".to_string(),
        settings.price_column.clone(),
    ];

    let mut aggregator = TopProductsAggregator::new();
    let rows = PartitionFetcher::new(source, settings.fetch_policy)
        .for_each_partition(
            TablePrefix::OrderLineItems,
            &years,
            &columns,
            &[],
            |table, records| {
                let reader = RowReader::new(table, &columns);
                for record in &records {
                    if let Some(item) = LineItem::read(&reader, record)? {
                        aggregator
                            .ingest(item)
                            .map_err(|overflow| reader.invalid(QUANTITY, overflow))?;
                    }
                }
                Ok(())
            },
        )
        .await?;
    tracing::Span::current().record("rows", rows as u64);

    Ok(aggregator.finish())
}
