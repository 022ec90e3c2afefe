use chrono::{Datelike, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use vitrine_api::psp::{
    CardFields, EncryptionHandle, GatewayChargeStatus, HttpPspGateway, PspError, PspGateway,
    SdkState,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn card_fields() -> CardFields {
    CardFields {
        number: "4539620659922097".to_string(),
        holder_name: "Ana Souza".to_string(),
        holder_cpf: "12173958658".to_string(),
        expiry_month: 12,
        expiry_year: Utc::now().year() + 2,
        cvv: "123".to_string(),
    }
}

#[tokio::test]
async fn public_key_fetch_and_tokenization_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public-keys/card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "public_key": "PUB-WIREMOCK"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cards/tokenize"))
        .and(body_partial_json(serde_json::json!({
            "public_key": "PUB-WIREMOCK",
            "holder_cpf": "12173958658"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "tok_wiremock_1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Arc::new(HttpPspGateway::new(server.uri(), None));
    let handle = EncryptionHandle::new(gateway, None);

    let card = handle.encrypt(&card_fields()).await.unwrap();
    assert_eq!(card.blob, "tok_wiremock_1");
    assert_eq!(handle.state().await, SdkState::Ready);
}

#[tokio::test]
async fn concurrent_encrypts_share_one_key_fetch() {
    let server = MockServer::start().await;

    // expect(1): a duplicate key fetch fails the test
    Mock::given(method("GET"))
        .and(path("/public-keys/card"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "public_key": "PUB-ONCE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/cards/tokenize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": "tok_shared"
        })))
        .mount(&server)
        .await;

    let gateway = Arc::new(HttpPspGateway::new(server.uri(), None));
    let handle = Arc::new(EncryptionHandle::new(gateway, None));

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.encrypt(&card_fields()).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().blob, "tok_shared");
    }
}

#[tokio::test]
async fn gateway_field_errors_surface_as_structured_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/cards/tokenize"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error_messages": [
                {"parameter_name": "number", "description": "card bin not accepted"},
                {"parameter_name": "cvv", "description": "security code mismatch"}
            ]
        })))
        .mount(&server)
        .await;

    let gateway = Arc::new(HttpPspGateway::new(server.uri(), None));
    let handle = EncryptionHandle::new(gateway, Some("PUB-STATIC".to_string()));

    match handle.encrypt(&card_fields()).await {
        Err(PspError::Rejected(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].field, "number");
            assert_eq!(errors[1].message, "security code mismatch");
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn declined_charges_carry_the_issuer_reason() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/charges"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "ch_declined_1",
            "status": "DECLINED",
            "decline_reason": "insufficient funds"
        })))
        .mount(&server)
        .await;

    let gateway = HttpPspGateway::new(server.uri(), None);
    match gateway.charge_card("VIT-TEST01", dec!(100), "tok_x").await {
        Err(PspError::Declined(reason)) => assert_eq!(reason, "insufficient funds"),
        other => panic!("expected Declined, got {:?}", other),
    }
}

#[tokio::test]
async fn pix_qr_issuance_carries_expiry_and_image() {
    let server = MockServer::start().await;
    let expires = Utc::now() + chrono::Duration::minutes(30);

    Mock::given(method("POST"))
        .and(path("/qr-codes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "pix_1",
            "text": "00020126580014br.gov.bcb.pix",
            "image_base64": "aW1hZ2U=",
            "expiration_date": expires
        })))
        .mount(&server)
        .await;

    let gateway = HttpPspGateway::new(server.uri(), None);
    let qr = gateway
        .create_pix_qr("VIT-TEST02", dec!(59.90), std::time::Duration::from_secs(1800))
        .await
        .unwrap();

    assert_eq!(qr.charge_id, "pix_1");
    assert!(qr.payload.contains("br.gov.bcb.pix"));
    assert_eq!(qr.image_base64, "aW1hZ2U=");
    assert!(qr.expires_at > Utc::now());
}

#[tokio::test]
async fn unreachable_gateway_maps_to_transport_error() {
    // Nothing listens on this port
    let gateway = HttpPspGateway::new("http://127.0.0.1:1", None);
    match gateway.fetch_public_key().await {
        Err(PspError::Transport(_)) => {}
        other => panic!("expected Transport, got {:?}", other),
    }
}

#[tokio::test]
async fn charge_status_polling_parses_gateway_states() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/charges/ch_77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "PAID"
        })))
        .mount(&server)
        .await;

    let gateway = HttpPspGateway::new(server.uri(), None);
    let status = gateway.charge_status("ch_77").await.unwrap();
    assert_eq!(status, GatewayChargeStatus::Paid);
}
