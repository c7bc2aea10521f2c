#![allow(dead_code)]

use paygate::application::gateway::{Caller, Gateway};
use paygate::application::rate_limit::ManualClock;
use paygate::config::Settings;
use paygate::domain::payment::{Amount, CardData, Currency, Customer, PaymentRequest};
use paygate::domain::tenant::{CredentialMap, Environment};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const BASE_URL: &str = "https://pay.example.com";
pub const SECRET_KEY: &str = "sk_test_abcdefghijklmnop";

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.gateway.base_url = BASE_URL.to_string();
    settings.gateway.callback_secret = "integration-callback-secret-0123456789".to_string();
    settings
}

/// A gateway whose rate limiter only moves when the returned clock does.
pub fn gateway_with_clock(settings: Settings) -> (Gateway, ManualClock) {
    let clock = ManualClock::new();
    let gateway = Gateway::builder(settings)
        .clock(Arc::new(clock.clone()))
        .build();
    (gateway, clock)
}

pub fn gateway() -> Gateway {
    gateway_with_clock(settings()).0
}

pub fn simulator_credentials(secret_key: &str) -> CredentialMap {
    CredentialMap::from([
        ("api_key".to_string(), "pk_test_12345678".to_string()),
        ("secret_key".to_string(), secret_key.to_string()),
    ])
}

pub async fn configure(gateway: &Gateway, tenant: &str) {
    gateway
        .set_config(
            &Caller::tenant(tenant),
            "simulator",
            Environment::Sandbox,
            simulator_credentials(SECRET_KEY),
        )
        .await
        .unwrap();
}

pub fn payment_request(amount: Decimal, card_number: &str) -> PaymentRequest {
    PaymentRequest {
        amount: Amount::new(amount).unwrap(),
        currency: Currency::new("TRY").unwrap(),
        customer: Customer {
            name: "Ada".to_string(),
            surname: Some("Lovelace".to_string()),
            email: "ada@example.com".to_string(),
            phone: None,
            identity_number: None,
            address: None,
        },
        card: Some(CardData {
            holder_name: "Ada Lovelace".to_string(),
            number: card_number.to_string(),
            expire_month: "12".to_string(),
            expire_year: "2030".to_string(),
            cvv: "123".to_string(),
        }),
        items: vec![],
        description: None,
        callback_url: None,
        success_url: None,
        error_url: None,
        use_3d: false,
        installment_count: 1,
        tenant_id: None,
        conversation_id: Some("conv-1".to_string()),
        reference_id: None,
        client_ip: None,
        user_agent: None,
        metadata: BTreeMap::new(),
    }
}

pub fn three_d_request(amount: Decimal, card_number: &str) -> PaymentRequest {
    let mut request = payment_request(amount, card_number);
    request.use_3d = true;
    request.callback_url = Some("https://shop.test/return".to_string());
    request.success_url = Some("https://shop.test/thanks".to_string());
    request.error_url = Some("https://shop.test/oops".to_string());
    request
}

/// Pulls the signed `state` token out of the `returnUrl` embedded in a challenge URL.
pub fn state_token(redirect_url: &str) -> String {
    let challenge = url::Url::parse(redirect_url).unwrap();
    let return_url = challenge
        .query_pairs()
        .find(|(k, _)| k == "returnUrl")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    url::Url::parse(&return_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
