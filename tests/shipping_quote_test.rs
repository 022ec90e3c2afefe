mod common;

use axum::http::{Method, StatusCode};
use common::{decimal_field, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn quote_applies_linear_weight_formula() {
    let app = TestApp::new().await;
    // 2 × 1.5kg = 3kg total; billable weight above the first unit is 2kg
    let product_id = app
        .seed_product("Tênis Urbano", dec!(199.90), Some(1.5), 10)
        .await;
    app.seed_shipping_method("Econômico", dec!(15), dec!(2), None)
        .await;

    let (status, body) = app
        .request_anon(
            Method::POST,
            "/api/v1/shipping/calculate",
            Some(json!({
                "items": [{"product_id": product_id, "quantity": 2}],
                "zip_code": "01310-100",
                "cart_total": "399.80"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let methods = body["methods"].as_array().unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(decimal_field(&methods[0]["cost"]), dec!(19.00));
    assert_eq!(methods[0]["is_free"], false);
    assert_eq!(methods[0]["estimated_days"]["min"], 3);
    assert_eq!(methods[0]["estimated_days"]["max"], 8);
}

#[tokio::test]
async fn missing_weight_defaults_to_half_unit() {
    let app = TestApp::new().await;
    // 4 × 0.5kg default = 2kg; 1kg billable
    let product_id = app.seed_product("Meia Kit", dec!(29.90), None, 30).await;
    app.seed_shipping_method("Econômico", dec!(10), dec!(4), None)
        .await;

    let (status, body) = app
        .request_anon(
            Method::POST,
            "/api/v1/shipping/calculate",
            Some(json!({
                "items": [{"product_id": product_id, "quantity": 4}],
                "zip_code": "01310100",
                "cart_total": "119.60"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["methods"][0]["cost"]), dec!(14.00));
}

#[tokio::test]
async fn subtotal_at_free_threshold_zeroes_the_cost() {
    let app = TestApp::new().await;
    let product_id = app
        .seed_product("Tênis Urbano", dec!(199.90), Some(1.5), 10)
        .await;
    app.seed_shipping_method("Expresso", dec!(30), dec!(5), Some(dec!(300)))
        .await;

    let (status, body) = app
        .request_anon(
            Method::POST,
            "/api/v1/shipping/calculate",
            Some(json!({
                "items": [{"product_id": product_id, "quantity": 2}],
                "zip_code": "01310100",
                "cart_total": "399.80"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal_field(&body["methods"][0]["cost"]), dec!(0));
    assert_eq!(body["methods"][0]["is_free"], true);
}

#[tokio::test]
async fn every_active_method_is_returned() {
    let app = TestApp::new().await;
    let product_id = app
        .seed_product("Caneca Esmaltada", dec!(39.90), Some(0.4), 5)
        .await;
    app.seed_shipping_method("Econômico", dec!(15), dec!(2), None)
        .await;
    app.seed_shipping_method("Expresso", dec!(30), dec!(5), Some(dec!(300)))
        .await;

    let (status, body) = app
        .request_anon(
            Method::POST,
            "/api/v1/shipping/calculate",
            Some(json!({
                "items": [{"product_id": product_id, "quantity": 1}],
                "zip_code": "01310100",
                "cart_total": "39.90"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["methods"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_zip_is_rejected_before_any_lookup() {
    let app = TestApp::new().await;
    let product_id = app
        .seed_product("Caneca Esmaltada", dec!(39.90), Some(0.4), 5)
        .await;

    for bad_zip in ["1234567", "123456789", "abcdefgh", ""] {
        let (status, body) = app
            .request_anon(
                Method::POST,
                "/api/v1/shipping/calculate",
                Some(json!({
                    "items": [{"product_id": product_id, "quantity": 1}],
                    "zip_code": bad_zip,
                    "cart_total": "39.90"
                })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "zip {:?}", bad_zip);
        assert!(body["message"].as_str().unwrap().contains("CEP"));
    }
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request_anon(
            Method::POST,
            "/api/v1/shipping/calculate",
            Some(json!({
                "items": [],
                "zip_code": "01310100",
                "cart_total": "0"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("carrinho vazio"));
}

#[tokio::test]
async fn methods_listing_returns_active_methods() {
    let app = TestApp::new().await;
    app.seed_shipping_method("Econômico", dec!(15), dec!(2), None)
        .await;

    let (status, body) = app
        .request_anon(Method::GET, "/api/v1/shipping/methods", None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Econômico");
}
