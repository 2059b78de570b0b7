use super::{CellValue, FetchRequest, FilterValue, Record, RowSource};
use crate::config::DatabaseConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;

const UNDEFINED_TABLE: &str = "42P01";
const UNDEFINED_COLUMN: &str = "42703";

/// PostgreSQL-backed row source over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresRowSource {
    pool: PgPool,
}

impl PostgresRowSource {
    /// Builds the pool without connecting; connections open on first use.
    pub fn connect_lazy(
        database: &DatabaseConfig,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Self {
        let options = PgConnectOptions::new()
            .host(&database.host)
            .port(database.port)
            .username(&database.user)
            .password(&database.password)
            .database(&database.name)
            .application_name(env!("CARGO_PKG_NAME"));
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);
        Self { pool }
    }
}

#[async_trait]
impl RowSource for PostgresRowSource {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn fetch(&self, request: &FetchRequest) -> AnalyticsResult<Vec<Record>> {
        let statement = SelectStatement::build(request);
        debug!(table = %request.table, sql = %statement.sql, "fetching partition");

        // Scoped to this partition: returned to the pool on every exit path.
        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(|error| unavailable(&request.table, error))?;

        let mut query = sqlx::query(&statement.sql);
        for value in &statement.binds {
            query = query.bind(value.as_str());
        }
        let rows = query
            .fetch_all(&mut *connection)
            .await
            .map_err(|error| unavailable(&request.table, error))?;

        rows.iter()
            .map(|row| decode_row(&request.table, row))
            .collect()
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Statement text plus positional bind values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectStatement {
    pub sql: String,
    pub binds: Vec<String>,
}

impl SelectStatement {
    /// Identifiers are quoted; filter values only ever travel as binds.
    pub(crate) fn build(request: &FetchRequest) -> Self {
        let projection = request
            .columns
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {projection} FROM {}",
            quote_identifier(&request.table)
        );

        let mut binds = Vec::new();
        let mut predicates = Vec::new();
        for filter in &request.filters {
            if let FilterValue::Exact(value) = &filter.value {
                binds.push(value.clone());
                predicates.push(format!(
                    "{} = ${}",
                    quote_identifier(&filter.column),
                    binds.len()
                ));
            }
        }
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        Self { sql, binds }
    }
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn unavailable(table: &str, error: sqlx::Error) -> AnalyticsError {
    let reason = match &error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
            "table does not exist".to_string()
        }
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_COLUMN) => {
            format!("column missing: {}", db.message())
        }
        sqlx::Error::PoolTimedOut => "timed out waiting for a database connection".to_string(),
        other => other.to_string(),
    };
    AnalyticsError::partition_unavailable(table, reason)
}

fn decode_row(table: &str, row: &PgRow) -> AnalyticsResult<Record> {
    (0..row.len())
        .map(|index| {
            decode_cell(row, index).map_err(|error| {
                let column = row.column(index);
                AnalyticsError::MalformedRow {
                    table: table.to_string(),
                    column: column.name().to_string(),
                    value: format!("<undecodable {}: {error}>", column.type_info().name()),
                }
            })
        })
        .collect()
}

fn decode_cell(row: &PgRow, index: usize) -> Result<CellValue, sqlx::Error> {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    let cell = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(CellValue::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|value| CellValue::Int(value.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|value| CellValue::Int(value.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(CellValue::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|value| CellValue::Float(value.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(CellValue::Float),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(index)?
            .map(|value| match value.to_f64() {
                Some(float) => CellValue::Float(float),
                None => CellValue::Text(value.to_string()),
            }),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(CellValue::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|value| CellValue::Timestamp(value.naive_utc())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|value| CellValue::Timestamp(value.and_time(NaiveTime::MIN))),
        _ => row.try_get::<Option<String>, _>(index)?.map(CellValue::Text),
    };
    Ok(cell.unwrap_or(CellValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ColumnFilter;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn select_projects_requested_columns_in_order() {
        let request = FetchRequest::new(
            "order_line_items_2023",
            &columns(&["product_id", "name", "quantity", "price"]),
        );
        let statement = SelectStatement::build(&request);
        assert_eq!(
            statement.sql,
            r#"SELECT "product_id", "name", "quantity", "price" FROM "order_line_items_2023""#
        );
        assert!(statement.binds.is_empty());
    }

    #[test]
    fn all_filter_adds_no_predicate() {
        let request = FetchRequest::new("orders_2024", &columns(&["shipping_address_country"]))
            .with_filters(&[ColumnFilter::new(
                "shipping_address_country",
                FilterValue::All,
            )]);
        let statement = SelectStatement::build(&request);
        assert!(!statement.sql.contains("WHERE"));
        assert!(statement.binds.is_empty());
    }

    #[test]
    fn exact_filter_is_bound_not_interpolated() {
        let hostile = "x' OR '1'='1";
        let request = FetchRequest::new("orders_2024", &columns(&["shipping_address_country"]))
            .with_filters(&[ColumnFilter::new(
                "shipping_address_country",
                FilterValue::Exact(hostile.to_string()),
            )]);
        let statement = SelectStatement::build(&request);
        assert!(statement.sql.ends_with(r#"WHERE "shipping_address_country" = $1"#));
        assert!(!statement.sql.contains(hostile));
        assert_eq!(statement.binds, vec![hostile.to_string()]);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("orders_-5"), r#""orders_-5""#);
        assert_eq!(quote_identifier(r#"a"b"#), r#""a""b""#);
    }
}
