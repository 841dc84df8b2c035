mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::TestApp;

fn order_body(customer_id: &str, items: &[(i64, &str)]) -> serde_json::Value {
    json!({
        "date": "2025-08-01",
        "payment_method": "credit card",
        "customer_id": customer_id,
        "items": items
            .iter()
            .map(|(id, kind)| json!({ "product_id": id, "kind": kind }))
            .collect::<Vec<_>>(),
    })
}

#[tokio::test]
async fn customer_fields_are_normalized() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30.123.456", " Ana.Perez@Example.com ").await;

    assert_eq!(customer["national_id"], "30123456");
    assert_eq!(customer["email"], "ana.perez@example.com");
    assert_eq!(customer["first_name"], "ANA");

    let id = customer["id"].as_str().unwrap();
    let (status, fetched) = app
        .call(Method::GET, &format!("/api/customers/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], customer["id"]);
}

#[tokio::test]
async fn duplicate_customer_is_rejected() {
    let app = TestApp::new().await;
    app.create_customer("30123456", "ana@example.com").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/api/customers",
            Some(json!({
                "first_name": "Otra",
                "last_name": "Persona",
                "national_id": "40111222",
                "email": "ANA@example.com",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn deleted_customer_is_not_found() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let uri = format!("/api/customers/{}", customer["id"].as_str().unwrap());

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "customer_not_found");

    let (_, list) = app.call(Method::GET, "/api/customers", None).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn order_total_is_sum_of_remote_prices() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    let (status, order) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(customer_id, &[(1, "service"), (2, "bundle")])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["total_cents"], 12_000_000);
    assert_eq!(order["customer"]["id"], customer["id"]);

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["product_id"], 1);
    assert_eq!(items[0]["unit_price_cents"], 4_500_000);
    assert_eq!(items[1]["kind"], "bundle");
    assert_eq!(items[1]["unit_price_cents"], 7_500_000);
}

#[tokio::test]
async fn pricing_failure_writes_nothing() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    let (status, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(customer_id, &[(1, "service"), (99, "service"), (98, "bundle")])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "partial_batch_failure");
    let failures = body["error"]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0]["index"], 1);
    assert_eq!(failures[1]["product_id"], 98);

    let (status, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(customer_id, &[(1, "service"), (4, "service")])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_product_price");

    assert!(app.store.orders().await.is_empty());
    assert!(app.store.line_items().await.is_empty());
}

#[tokio::test]
async fn order_for_unknown_customer_is_not_found() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(
                "550e8400-e29b-41d4-a716-446655440000",
                &[(1, "service")],
            )),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "customer_not_found");
}

#[tokio::test]
async fn invalid_order_bodies_are_unprocessable() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    for body in [
        order_body(customer_id, &[]),
        order_body(customer_id, &[(1, "subscription")]),
        order_body(customer_id, &[(0, "service")]),
        json!({ "payment_method": "cash", "customer_id": "nope", "items": [] }),
        json!({ "customer_id": customer_id, "items": [{ "product_id": 1, "kind": "service" }] }),
    ] {
        let (status, response) = app.call(Method::POST, "/api/orders", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{response}");
        assert_eq!(response["error"]["code"], "validation_error");
    }
}

#[tokio::test]
async fn update_replaces_every_item() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    let (_, order) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(customer_id, &[(1, "service"), (2, "bundle")])),
        )
        .await;
    let uri = format!("/api/orders/{}", order["id"].as_str().unwrap());

    let (status, updated) = app
        .call(
            Method::PUT,
            &uri,
            Some(order_body(customer_id, &[(3, "service")])),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["total_cents"], 3_000_000);
    assert_eq!(updated["items"].as_array().unwrap().len(), 1);

    let (_, fetched) = app.call(Method::GET, &uri, None).await;
    assert_eq!(fetched["items"].as_array().unwrap().len(), 1);
    assert_eq!(fetched["items"][0]["product_id"], 3);

    let (_, history) = app
        .call(Method::GET, &format!("{uri}?include_deleted=true"), None)
        .await;
    assert_eq!(history["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn delete_is_soft_and_cascades() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    let (_, order) = app
        .call(
            Method::POST,
            "/api/orders",
            Some(order_body(customer_id, &[(1, "service"), (2, "bundle")])),
        )
        .await;
    let uri = format!("/api/orders/{}", order["id"].as_str().unwrap());

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "order_not_found");

    let (status, deleted) = app
        .call(Method::GET, &format!("{uri}?include_deleted=true"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(deleted["deleted_at"].is_string());
    let items = deleted["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item["deleted_at"].is_string()));

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    for (date, method) in [("2025-08-01", "Credit Card"), ("2025-08-15", "cash"), ("2025-09-02", "debit card")] {
        let mut body = order_body(customer_id, &[(1, "service")]);
        body["date"] = json!(date);
        body["payment_method"] = json!(method);
        let (status, _) = app.call(Method::POST, "/api/orders", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, page) = app
        .call(Method::GET, "/api/orders?per_page=2&page=1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 3);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["data"][0]["date"], "2025-09-02");

    let (_, cards) = app
        .call(Method::GET, "/api/orders?payment_method=CARD", None)
        .await;
    assert_eq!(cards["total"], 2);

    let (_, august) = app
        .call(
            Method::GET,
            "/api/orders?date_from=2025-08-01&date_to=2025-08-31",
            None,
        )
        .await;
    assert_eq!(august["total"], 2);

    let (status, _) = app
        .call(
            Method::GET,
            "/api/orders?date_from=2025-09-01&date_to=2025-08-01",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn statistics_cover_the_period() {
    let app = TestApp::new().await;
    let customer = app.create_customer("30123456", "ana@example.com").await;
    let customer_id = customer["id"].as_str().unwrap();

    for (items, method) in [(vec![(1, "service")], "cash"), (vec![(2, "bundle")], "card")] {
        let mut body = order_body(customer_id, &items);
        body["payment_method"] = json!(method);
        app.call(Method::POST, "/api/orders", Some(body)).await;
    }

    let (status, stats) = app
        .call(
            Method::GET,
            "/api/orders/stats?date_from=2025-08-01&date_to=2025-08-31",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{stats}");
    assert_eq!(stats["total_orders"], 2);
    assert_eq!(stats["total_cents"], 12_000_000);
    assert_eq!(stats["average_cents"], 6_000_000.0);
    assert_eq!(stats["by_payment_method"].as_array().unwrap().len(), 2);
    assert_eq!(stats["period"]["from"], "2025-08-01");

    let (status, body) = app
        .call(
            Method::GET,
            "/api/orders/stats?date_from=2025-09-01&date_to=2025-08-01",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
}
