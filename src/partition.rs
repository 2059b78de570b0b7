//! Mapping from a `year` filter to the physical yearly tables.

use crate::error::{AnalyticsError, AnalyticsResult};
use std::fmt;
use std::ops::RangeInclusive;

pub const ALL_YEARS: &str = "all";
pub const DEFAULT_FIRST_YEAR: i32 = 2022;
pub const DEFAULT_LAST_YEAR: i32 = 2025;

/// Logical entity stored as one table per year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TablePrefix {
    OrderLineItems,
    Orders,
}

impl TablePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            TablePrefix::OrderLineItems => "order_line_items",
            TablePrefix::Orders => "orders",
        }
    }

    pub fn table_name(&self, year: i32) -> String {
        format!("{}_{}", self.as_str(), year)
    }
}

impl fmt::Display for TablePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves `year` filters against the supported partition range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionResolver {
    supported: RangeInclusive<i32>,
}

impl Default for PartitionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_YEAR..=DEFAULT_LAST_YEAR)
    }
}

impl PartitionResolver {
    pub fn new(supported: RangeInclusive<i32>) -> Self {
        Self { supported }
    }

    pub fn supported(&self) -> &RangeInclusive<i32> {
        &self.supported
    }

    /// Exactly `"all"` yields every supported year ascending; anything else
    /// must parse as a single integer, surrounding whitespace allowed.
    /// Explicit years are not range-checked, a year with no table fails later
    /// when its partition is fetched.
    pub fn resolve(&self, year_filter: &str) -> AnalyticsResult<Vec<i32>> {
        if year_filter == ALL_YEARS {
            return Ok(self.supported.clone().collect());
        }
        year_filter
            .trim()
            .parse::<i32>()
            .map(|year| vec![year])
            .map_err(|_| AnalyticsError::invalid_year(year_filter))
    }
}
