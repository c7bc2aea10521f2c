mod common;

use common::{SECRET_KEY, configure, gateway, payment_request};
use paygate::application::gateway::{Caller, Gateway};
use paygate::application::webhook::{InboundWebhook, WebhookAck};
use paygate::domain::ports::EffectKind;
use paygate::domain::status::PaymentStatus;
use paygate::domain::tenant::Environment;
use paygate::error::GatewayError;
use paygate::providers::simulator::{SIGNATURE_HEADER, SimulatorProvider};
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::BTreeMap;

const PROCESSOR_IP: &str = "198.51.100.10";

fn webhook(body: &str, signature: Option<String>) -> InboundWebhook {
    webhook_for("ABC", body, signature)
}

fn webhook_for(tenant: &str, body: &str, signature: Option<String>) -> InboundWebhook {
    let mut headers = BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]);
    if let Some(signature) = signature {
        headers.insert(SIGNATURE_HEADER.to_string(), signature);
    }
    InboundWebhook {
        query: format!("tenantId={}&environment=sandbox", tenant),
        headers,
        body: body.as_bytes().to_vec(),
    }
}

fn signed(body: &str) -> InboundWebhook {
    let signature = SimulatorProvider::sign_webhook(SECRET_KEY, body.as_bytes()).unwrap();
    webhook(body, Some(signature))
}

async fn paid(gateway: &Gateway) -> String {
    configure(gateway, "ABC").await;
    gateway
        .create_payment(
            &Caller::tenant("ABC"),
            "simulator",
            Environment::Sandbox,
            payment_request(dec!(42.50), "5528790000000008"),
        )
        .await
        .unwrap()
        .payment_id
}

#[tokio::test]
async fn test_valid_webhook_records_verified_effect() {
    let gateway = gateway();
    let payment_id = paid(&gateway).await;

    // The processor claims failure; the status query says otherwise and wins.
    let body = json!({ "paymentId": payment_id, "status": "failed" }).to_string();
    let ack = gateway
        .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", signed(&body))
        .await
        .unwrap();
    assert_eq!(
        ack,
        WebhookAck::Accepted {
            payment_id: payment_id.clone()
        }
    );
    assert_eq!(ack.http_status(), 200);

    gateway.drain_webhooks().await;
    let effects = gateway.payment_effects(&Caller::tenant("ABC"), &payment_id).await.unwrap();
    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].kind, EffectKind::Success);
    assert_eq!(effects[0].status, PaymentStatus::Successful);
    assert_eq!(effects[0].amount, dec!(42.50));
    assert_eq!(effects[0].tenant_id.as_str(), "ABC");
}

#[tokio::test]
async fn test_duplicate_delivery_applies_once() {
    let gateway = gateway();
    let payment_id = paid(&gateway).await;
    let body = json!({ "paymentId": payment_id, "status": "successful" }).to_string();

    for _ in 0..3 {
        let ack = gateway
            .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", signed(&body))
            .await
            .unwrap();
        assert_eq!(ack.http_status(), 200);
    }

    gateway.drain_webhooks().await;
    assert_eq!(gateway.payment_effects(&Caller::tenant("ABC"), &payment_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_signature_is_rejected_and_nothing_runs() {
    let gateway = gateway();
    let payment_id = paid(&gateway).await;
    let body = json!({ "paymentId": payment_id, "status": "successful" }).to_string();

    let forged = SimulatorProvider::sign_webhook("sk_wrong_secret_key_value", body.as_bytes()).unwrap();
    let ack = gateway
        .handle_webhook(
            &Caller::anonymous(PROCESSOR_IP),
            "simulator",
            webhook(&body, Some(forged)),
        )
        .await
        .unwrap();
    assert!(matches!(ack, WebhookAck::Rejected { .. }));
    assert_eq!(ack.http_status(), 400);

    let unsigned = gateway
        .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", webhook(&body, None))
        .await
        .unwrap();
    assert_eq!(unsigned.http_status(), 400);

    gateway.drain_webhooks().await;
    assert!(gateway.payment_effects(&Caller::tenant("ABC"), &payment_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_webhook_without_tenant_is_rejected() {
    let gateway = gateway();
    let body = json!({ "paymentId": "p-1" }).to_string();
    let mut inbound = signed(&body);
    inbound.query = String::new();

    let ack = gateway
        .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", inbound)
        .await
        .unwrap();
    assert_eq!(ack, WebhookAck::Rejected {
        reason: "missing tenantId".to_string()
    });
}

#[tokio::test]
async fn test_webhook_for_unconfigured_tenant_is_a_configuration_error() {
    let gateway = gateway();
    let body = json!({ "paymentId": "p-1" }).to_string();

    let err = gateway
        .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", signed(&body))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));
}

#[tokio::test]
async fn test_tenants_reusing_a_reference_keep_separate_effects() {
    let gateway = gateway();
    let mut ids = Vec::new();
    for tenant in ["ABC", "XYZ"] {
        configure(&gateway, tenant).await;
        let mut request = payment_request(dec!(10), "5528790000000008");
        request.reference_id = Some("order-1".to_string());
        let created = gateway
            .create_payment(&Caller::tenant(tenant), "simulator", Environment::Sandbox, request)
            .await
            .unwrap();
        ids.push(created.payment_id);
    }
    assert_eq!(ids[0], ids[1]);

    let body = json!({ "paymentId": "order-1", "status": "successful" }).to_string();
    for tenant in ["ABC", "XYZ"] {
        let signature = SimulatorProvider::sign_webhook(SECRET_KEY, body.as_bytes()).unwrap();
        let ack = gateway
            .handle_webhook(
                &Caller::anonymous(PROCESSOR_IP),
                "simulator",
                webhook_for(tenant, &body, Some(signature)),
            )
            .await
            .unwrap();
        assert_eq!(ack.http_status(), 200);
    }
    gateway.drain_webhooks().await;

    for tenant in ["ABC", "XYZ"] {
        let effects = gateway
            .payment_effects(&Caller::tenant(tenant), "order-1")
            .await
            .unwrap();
        assert_eq!(effects.len(), 1, "tenant {}", tenant);
        assert_eq!(effects[0].tenant_id.as_str(), tenant);
    }
    assert!(
        gateway
            .payment_effects(&Caller::tenant("OTHER"), "order-1")
            .await
            .unwrap()
            .is_empty()
    );
    assert!(matches!(
        gateway
            .payment_effects(&Caller::anonymous(PROCESSOR_IP), "order-1")
            .await,
        Err(GatewayError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_processor_address_is_not_held_to_the_anonymous_ceiling() {
    let gateway = gateway();
    let payment_id = paid(&gateway).await;
    let body = json!({ "paymentId": payment_id, "status": "successful" }).to_string();

    for _ in 0..30 {
        let ack = gateway
            .handle_webhook(&Caller::anonymous(PROCESSOR_IP), "simulator", signed(&body))
            .await
            .unwrap();
        assert_eq!(ack.http_status(), 200);
    }
    gateway.drain_webhooks().await;
}
