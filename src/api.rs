//! HTTP handlers for the report endpoints.

use crate::error::{AnalyticsError, AnalyticsResult};
use crate::logging::{log_report_duration, report_span};
use crate::metrics::RequestMetrics;
use crate::report::{
    self, LocationParams, OrderTrendsResponse, ReportKind, SalesByLocationResponse,
    TopProductsResponse, YearParams,
};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    routing::get,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span};

pub const TOP_PRODUCTS_PATH: &str = "/api/top-products";
pub const SALES_BY_LOCATION_PATH: &str = "/api/sales-by-location";
pub const ORDER_TRENDS_PATH: &str = "/api/order-trends";

pub fn report_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(TOP_PRODUCTS_PATH, get(top_products_handler))
        .route(SALES_BY_LOCATION_PATH, get(sales_by_location_handler))
        .route(ORDER_TRENDS_PATH, get(order_trends_handler))
}

pub async fn top_products_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<YearParams>, QueryRejection>,
) -> AnalyticsResult<Json<TopProductsResponse>> {
    serve(ReportKind::TopProducts, query, move |params| async move {
        report::top_products::run(state.source(), state.settings(), &params).await
    })
    .await
}

pub async fn sales_by_location_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LocationParams>, QueryRejection>,
) -> AnalyticsResult<Json<SalesByLocationResponse>> {
    serve(ReportKind::SalesByLocation, query, move |params| async move {
        report::sales_location::run(state.source(), state.settings(), &params).await
    })
    .await
}

pub async fn order_trends_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<YearParams>, QueryRejection>,
) -> AnalyticsResult<Json<OrderTrendsResponse>> {
    serve(ReportKind::OrderTrends, query, move |params| async move {
        report::order_trends::run(state.source(), state.settings(), &params).await
    })
    .await
}

/// Query parameters that annotate the report span.
trait ReportQuery {
    fn record(&self, span: &Span);
}

impl ReportQuery for YearParams {
    fn record(&self, span: &Span) {
        span.record("year", self.year.as_str());
    }
}

impl ReportQuery for LocationParams {
    fn record(&self, span: &Span) {
        span.record("year", self.year.as_str());
        span.record("country", self.country.as_str());
    }
}

/// Runs one report inside its span and request metrics. Rejected query
/// strings are counted like any other failed report.
async fn serve<P, T, F, Fut>(
    kind: ReportKind,
    query: Result<Query<P>, QueryRejection>,
    run: F,
) -> AnalyticsResult<Json<T>>
where
    P: ReportQuery,
    F: FnOnce(P) -> Fut,
    Fut: Future<Output = AnalyticsResult<T>>,
{
    let metrics = RequestMetrics::new(kind.as_str());
    let span = report_span(kind.as_str());
    let started = Instant::now();

    let result = async {
        let params = query_params(query)?;
        params.record(&Span::current());
        run(params).await
    }
    .instrument(span)
    .await;
    log_report_duration(kind.as_str(), started.elapsed());

    match result {
        Ok(body) => {
            metrics.success();
            Ok(Json(body))
        }
        Err(error) => {
            metrics.error(error.code().as_str());
            Err(error)
        }
    }
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AnalyticsResult<T> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| AnalyticsError::InvalidFilter {
            parameter: "query",
            value: String::new(),
            reason: rejection.body_text(),
        })
}
