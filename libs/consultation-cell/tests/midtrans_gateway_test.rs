// libs/consultation-cell/tests/midtrans_gateway_test.rs
use serde_json::json;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consultation_cell::models::ConsultationError;
use consultation_cell::services::midtrans::{MidtransClient, PaymentGateway};
use shared_config::ClinicConfig;

fn client_for(server: &MockServer) -> MidtransClient {
    let config = ClinicConfig {
        midtrans_base_url: server.uri(),
        midtrans_server_key: "SB-Mid-server-testkey".to_string(),
        ..ClinicConfig::default()
    };
    MidtransClient::new(&config)
}

#[tokio::test]
async fn create_order_returns_the_redirect_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "transaction_details": { "order_id": "ORDER-abc", "gross_amount": 100_000 }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "66e4fa55",
            "redirect_url": "https://app.sandbox.midtrans.com/snap/v2/vtweb/66e4fa55"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let link = client_for(&server)
        .create_order("ORDER-abc", 100_000, "Consultation with Dr. Ratna", "Budi", "budi@mail.test")
        .await
        .unwrap();
    assert_eq!(link, "https://app.sandbox.midtrans.com/snap/v2/vtweb/66e4fa55");
}

#[tokio::test]
async fn gateway_errors_surface_with_the_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error_messages": ["Access denied"]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_order("ORDER-abc", 100_000, "Consultation", "Budi", "budi@mail.test")
        .await
        .unwrap_err();
    match err {
        ConsultationError::GatewayError(msg) => assert!(msg.contains("401")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn missing_redirect_url_is_a_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "token": "66e4fa55" })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_order("ORDER-abc", 100_000, "Consultation", "Budi", "budi@mail.test")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsultationError::GatewayError(_)));
}

#[tokio::test]
async fn refund_posts_to_the_order_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/ORDER-abc/refund"))
        .and(body_partial_json(json!({
            "refund_key": "REFUND-ORDER-abc",
            "amount": 100_000
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "200",
            "refund_amount": "100000.00"
        })))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .refund("ORDER-abc", 100_000, "nobody joined")
        .await
        .unwrap();
}
