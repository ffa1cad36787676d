//! Midtrans adapter tests against a local mock server

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use core_kernel::{AdapterHealth, CircuitBreakerConfig, HealthCheckable, Money};
use domain_billing::{
    ChargeItem, ChargeRequest, GatewayError, GatewayReference, OrderId, PaymentChannel, PaymentGatewayPort,
};
use infra_gateway::{MidtransAdapter, MidtransConfig};
use test_utils::{NotificationBuilder, StringFixtures};

fn config(server: &MockServer) -> MidtransConfig {
    MidtransConfig::sandbox()
        .with_base_url(server.uri())
        .with_server_key(StringFixtures::server_key())
}

fn adapter(server: &MockServer) -> MidtransAdapter {
    MidtransAdapter::new(config(server)).unwrap()
}

fn request(channel: PaymentChannel) -> ChargeRequest {
    ChargeRequest {
        order_id: OrderId::new("SCH-20240715-0001"),
        amount: Money::idr(150_000),
        channel,
        items: vec![ChargeItem {
            id: "spp-juli".into(),
            name: "SPP Juli".into(),
            price: Money::idr(150_000),
        }],
        customer_name: Some("Budi".into()),
    }
}

#[tokio::test]
async fn test_bank_transfer_returns_virtual_account() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "201",
            "status_message": "Success, Bank Transfer transaction is created",
            "transaction_id": "9aed5972-5b6a-401e-894b-a32c91ed1a3a",
            "order_id": "SCH-20240715-0001",
            "gross_amount": "150000.00",
            "transaction_status": "pending",
            "va_numbers": [{ "bank": "bni", "va_number": "9888123412341234" }],
            "expiry_time": "2024-07-16 10:00:00"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = adapter(&server)
        .charge(&request(PaymentChannel::BankTransfer { bank: "bni".into() }))
        .await
        .unwrap();

    assert_eq!(
        response.reference,
        GatewayReference::VirtualAccount {
            bank: "bni".into(),
            va_number: "9888123412341234".into()
        }
    );
    assert_eq!(
        response.expires_at.unwrap().to_rfc3339(),
        "2024-07-16T03:00:00+00:00"
    );
    assert_eq!(
        response.gateway_transaction_id.as_deref(),
        Some("9aed5972-5b6a-401e-894b-a32c91ed1a3a")
    );
    assert_eq!(response.raw_request["transaction_details"]["gross_amount"], 150_000);
    assert_eq!(response.raw_response["transaction_status"], "pending");
}

#[tokio::test]
async fn test_permata_returns_its_own_number() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "201",
            "permata_va_number": "263113320491111"
        })))
        .mount(&server)
        .await;

    let response = adapter(&server).charge(&request(PaymentChannel::PermataVa)).await.unwrap();

    assert_eq!(
        response.reference,
        GatewayReference::PermataVirtualAccount {
            va_number: "263113320491111".into()
        }
    );
    assert!(response.expires_at.is_some());
}

#[tokio::test]
async fn test_mandiri_bill_returns_biller_code_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "201",
            "biller_code": "70012",
            "bill_key": "990000000260"
        })))
        .mount(&server)
        .await;

    let response = adapter(&server).charge(&request(PaymentChannel::MandiriBill)).await.unwrap();

    assert_eq!(
        response.reference,
        GatewayReference::BillPayment {
            biller_code: "70012".into(),
            bill_key: "990000000260".into()
        }
    );
    assert_eq!(response.raw_request["payment_type"], "echannel");
}

#[tokio::test]
async fn test_card_returns_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "token": "66e4fa55-fdac-4ef9-91b5-733b97d1b862",
            "redirect_url": "https://app.sandbox.midtrans.com/snap/v2/vtweb/66e4fa55"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = adapter(&server).charge(&request(PaymentChannel::CreditCard)).await.unwrap();

    assert!(matches!(
        response.reference,
        GatewayReference::Redirect { ref token, .. } if token == "66e4fa55-fdac-4ef9-91b5-733b97d1b862"
    ));
    assert_eq!(response.raw_request["enabled_payments"][0], "credit_card");
}

#[tokio::test]
async fn test_rejection_keeps_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "406",
            "status_message": "The request could not be processed due to duplicate order_id"
        })))
        .mount(&server)
        .await;

    let failure = adapter(&server)
        .charge(&request(PaymentChannel::PermataVa))
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        GatewayError::Rejected { ref status_code, .. } if status_code == "406"
    ));
    assert!(failure.raw_request.is_some());
    assert_eq!(failure.raw_response.unwrap()["status_code"], "406");
}

#[tokio::test]
async fn test_snap_error_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/snap/v1/transactions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error_messages": ["Access denied due to unauthorized transaction"]
        })))
        .mount(&server)
        .await;

    let failure = adapter(&server)
        .charge(&request(PaymentChannel::EWallet { provider: "gopay".into() }))
        .await
        .unwrap_err();

    assert_eq!(
        failure.error,
        GatewayError::Rejected {
            status_code: "401".into(),
            message: "Access denied due to unauthorized transaction".into()
        }
    );
}

#[tokio::test]
async fn test_slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status_code": "201", "permata_va_number": "1" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.timeout_secs = 1;
    let failure = MidtransAdapter::new(cfg)
        .unwrap()
        .charge(&request(PaymentChannel::PermataVa))
        .await
        .unwrap_err();

    assert_eq!(failure.error, GatewayError::Timeout(Duration::from_secs(1)));
    assert!(failure.raw_request.is_some());
    assert!(failure.raw_response.is_none());
}

#[tokio::test]
async fn test_non_json_answer_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let failure = adapter(&server)
        .charge(&request(PaymentChannel::PermataVa))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, GatewayError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "status_code": "503",
            "status_message": "Service unavailable"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout_secs: 60,
        success_threshold: 1,
    });
    let gateway = MidtransAdapter::new(cfg).unwrap();
    let req = request(PaymentChannel::PermataVa);

    for _ in 0..2 {
        let failure = gateway.charge(&req).await.unwrap_err();
        assert!(matches!(failure.error, GatewayError::Rejected { .. }));
    }

    let failure = gateway.charge(&req).await.unwrap_err();
    assert_eq!(failure.error, GatewayError::CircuitOpen);
    assert!(failure.raw_request.is_none());
    assert_eq!(gateway.health_check().await.status, AdapterHealth::Degraded);
}

#[tokio::test]
async fn test_rejections_do_not_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "400",
            "status_message": "Validation error"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 2,
        reset_timeout_secs: 60,
        success_threshold: 1,
    });
    let gateway = MidtransAdapter::new(cfg).unwrap();

    for _ in 0..3 {
        let failure = gateway.charge(&request(PaymentChannel::PermataVa)).await.unwrap_err();
        assert!(matches!(failure.error, GatewayError::Rejected { .. }));
    }
    assert!(!gateway.is_circuit_open().await);
}

#[tokio::test]
async fn test_verify_notification_uses_server_key() {
    let server = MockServer::start().await;
    let gateway = adapter(&server);

    let genuine = NotificationBuilder::settlement("SCH-20240715-0001").build_with_fixture_key();
    let forged = NotificationBuilder::settlement("SCH-20240715-0001").build_signed("another-key");
    let unsigned = NotificationBuilder::settlement("SCH-20240715-0001").build();

    assert!(gateway.verify_notification(&genuine));
    assert!(!gateway.verify_notification(&forged));
    assert!(!gateway.verify_notification(&unsigned));
}
