use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use sales_analytics::{
    AppState, ReportSettings, build_router,
    metrics::{ErrorLabels, METRICS},
    partition::PartitionResolver,
    source::{CellValue, MemoryRowSource},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const LINE_ITEM_COLUMNS: &[&str] = &["product_id", "name", "quantity", "price"];
const ORDER_COLUMNS: &[&str] = &[
    "created_at",
    "total_price_set_shop_money_amount",
    "shipping_address_country",
    "shipping_address_province",
];

fn line_item(id: i64, name: &str, quantity: i64, price: f64) -> Vec<CellValue> {
    vec![id.into(), name.into(), quantity.into(), price.into()]
}

fn order(created_at: &str, total: &str, country: Option<&str>, province: Option<&str>) -> Vec<CellValue> {
    vec![created_at.into(), total.into(), country.into(), province.into()]
}

fn fixture_source() -> MemoryRowSource {
    MemoryRowSource::new()
        .with_table(
            "order_line_items_2022",
            LINE_ITEM_COLUMNS,
            vec![
                line_item(1, "Widget", 2, 10.0),
                line_item(1, "Widget", 3, 10.0),
                line_item(2, "Gadget", 1, 100.0),
            ],
        )
        .with_table(
            "order_line_items_2023",
            LINE_ITEM_COLUMNS,
            vec![line_item(3, "Doohickey", 4, 5.0), line_item(2, "Gadget", 1, 100.0)],
        )
        .with_table(
            "orders_2022",
            ORDER_COLUMNS,
            vec![
                order("2022-11-03 09:00:00", "100.00", Some("Canada"), Some("Ontario")),
                order("2022-12-24 18:30:00", "150.00", Some("Canada"), Some("Quebec")),
                order("2022-12-30 12:00:00", "20.00", Some("France"), None),
            ],
        )
        .with_table(
            "orders_2023",
            ORDER_COLUMNS,
            vec![
                order("2023-01-15T10:00:00Z", "0", Some("Canada"), Some("Ontario")),
                order("2023-02-01 08:00:00", "50.00", None, None),
            ],
        )
}

fn router_with(source: MemoryRowSource) -> Router {
    let settings = ReportSettings {
        resolver: PartitionResolver::new(2022..=2023),
        ..ReportSettings::default()
    };
    build_router(Arc::new(AppState::new(settings, Arc::new(source))))
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn top_products_for_single_year() {
    // Arrange
    let router = router_with(fixture_source());

    // Act
    let (status, json) = get_json(router, "/api/top-products?year=2022").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({
            "top_by_quantity": [
                {"product_id": 1, "name": "Widget", "quantity": 5},
                {"product_id": 2, "name": "Gadget", "quantity": 1}
            ],
            "top_by_revenue": [
                {"product_id": 2, "name": "Gadget", "revenue": 100.0},
                {"product_id": 1, "name": "Widget", "revenue": 50.0}
            ]
        })
    );
}

#[tokio::test]
async fn top_products_combines_years_by_default() {
    let (status, json) = get_json(router_with(fixture_source()), "/api/top-products").await;

    assert_eq!(status, StatusCode::OK);
    let by_revenue = json["top_by_revenue"].as_array().unwrap();
    assert_eq!(by_revenue[0]["name"], "Gadget");
    assert_eq!(by_revenue[0]["revenue"], 200.0);
    let by_quantity = json["top_by_quantity"].as_array().unwrap();
    assert_eq!(by_quantity[0]["name"], "Widget");
    assert_eq!(by_quantity[1]["name"], "Doohickey");
}

#[tokio::test]
async fn non_numeric_year_is_bad_request() {
    let source = Arc::new(fixture_source());
    let settings = ReportSettings {
        resolver: PartitionResolver::new(2022..=2023),
        ..ReportSettings::default()
    };
    let router = build_router(Arc::new(AppState::new(settings, source.clone())));

    let (status, json) = get_json(router, "/api/order-trends?year=foo").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_filter");
    assert!(source.fetched_tables().is_empty());
}

#[tokio::test]
async fn padded_all_is_not_all() {
    let (status, json) = get_json(router_with(fixture_source()), "/api/top-products?year=all%20").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_filter");
}

#[tokio::test]
async fn rejected_query_string_is_counted_as_error() {
    let invalid_filters = || {
        METRICS
            .report_errors_total
            .get_or_create(&ErrorLabels {
                report: "sales_by_location".to_string(),
                error_type: "invalid_filter".to_string(),
            })
            .get()
    };
    let before = invalid_filters();

    // A repeated key fails query deserialization before any report code runs.
    let (status, json) = get_json(
        router_with(fixture_source()),
        "/api/sales-by-location?country=Canada&country=France",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_filter");
    assert!(invalid_filters() > before);
}

#[tokio::test(start_paused = true)]
async fn slow_partition_is_gateway_timeout() {
    let source = fixture_source().with_fetch_delay(Duration::from_secs(60));

    let (status, json) = get_json(router_with(source), "/api/order-trends?year=2022").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["error"]["code"], "timeout");
    assert_eq!(json["error"]["retryable"], true);
    assert!(json["error"]["message"].as_str().unwrap().contains("orders_2022"));
}

#[tokio::test]
async fn missing_partition_is_service_unavailable() {
    let (status, json) = get_json(router_with(fixture_source()), "/api/top-products?year=1999").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "partition_unavailable");
    assert!(json["error"]["message"].as_str().unwrap().contains("order_line_items_1999"));
}

#[tokio::test]
async fn malformed_quantity_is_internal_error() {
    let source = MemoryRowSource::new().with_table(
        "order_line_items_2022",
        LINE_ITEM_COLUMNS,
        vec![vec![
            CellValue::Int(1),
            CellValue::from("Widget"),
            CellValue::from("lots"),
            CellValue::Float(1.0),
        ]],
    );

    let (status, json) = get_json(router_with(source), "/api/top-products?year=2022").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "malformed_row");
}

#[tokio::test]
async fn sales_by_location_counts_every_order() {
    let (status, json) = get_json(router_with(fixture_source()), "/api/sales-by-location").await;

    assert_eq!(status, StatusCode::OK);
    let by_country = json["by_country"].as_array().unwrap();
    let countries = by_country
        .iter()
        .map(|c| c["country"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(countries, vec!["Canada", "Unknown", "France"]);
    let orders: u64 = by_country.iter().map(|c| c["order_count"].as_u64().unwrap()).sum();
    assert_eq!(orders, 5);

    let first_province = &json["by_province"][0];
    assert_eq!(first_province["country"], "Canada");
    assert_eq!(first_province["province"], "Quebec");
    assert_eq!(first_province["revenue"], 150.0);
}

#[tokio::test]
async fn country_filter_yields_single_country() {
    let (status, json) = get_json(
        router_with(fixture_source()),
        "/api/sales-by-location?year=all&country=Canada",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["by_country"],
        json!([{"country": "Canada", "revenue": 250.0, "order_count": 3}])
    );
    assert!(
        json["by_province"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["country"] == "Canada")
    );
}

#[tokio::test]
async fn order_trends_reports_month_over_month_change() {
    let (status, json) = get_json(router_with(fixture_source()), "/api/order-trends").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["trends"],
        json!([
            {"date": "2022-11", "revenue": 100.0, "order_count": 1, "revenue_change": null},
            {"date": "2022-12", "revenue": 170.0, "order_count": 2, "revenue_change": 70.0},
            {"date": "2023-01", "revenue": 0.0, "order_count": 1, "revenue_change": -100.0},
            {"date": "2023-02", "revenue": 50.0, "order_count": 1, "revenue_change": null}
        ])
    );
}

#[tokio::test]
async fn single_year_is_subset_of_all_years() {
    let (_, all) = get_json(router_with(fixture_source()), "/api/order-trends?year=all").await;
    let (_, only_2023) = get_json(router_with(fixture_source()), "/api/order-trends?year=2023").await;

    let all_2023 = all["trends"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|point| point["date"].as_str().unwrap().starts_with("2023-"))
        .map(|point| (point["date"].clone(), point["revenue"].clone(), point["order_count"].clone()))
        .collect::<Vec<_>>();
    let only = only_2023["trends"]
        .as_array()
        .unwrap()
        .iter()
        .map(|point| (point["date"].clone(), point["revenue"].clone(), point["order_count"].clone()))
        .collect::<Vec<_>>();
    assert_eq!(all_2023, only);
}

#[tokio::test]
async fn empty_partitions_return_empty_lists() {
    let source = MemoryRowSource::new()
        .with_table("orders_2022", ORDER_COLUMNS, Vec::new())
        .with_table("orders_2023", ORDER_COLUMNS, Vec::new());

    let (status, json) = get_json(router_with(source), "/api/sales-by-location").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"by_country": [], "by_province": []}));
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let router = router_with(fixture_source());

    let (status, json) = get_json(router.clone(), "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);

    let (_, _) = get_json(router.clone(), "/api/top-products?year=2022").await;
    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/openmetrics-text")
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("report_requests_total"));
}
