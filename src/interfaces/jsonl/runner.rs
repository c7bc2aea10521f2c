use super::command_reader::{Command, CommandLine};
use crate::application::callback::CallbackOutcome;
use crate::application::gateway::{Caller, Gateway};
use crate::application::webhook::InboundWebhook;
use crate::domain::tenant::TenantId;
use crate::error::Result;
use crate::interfaces::payload::{RequestPayload, parse_query};
use serde_json::{Value, json};

impl CommandLine {
    pub fn caller(&self) -> Caller {
        Caller {
            tenant: self.tenant.clone().map(TenantId::new),
            ip: self.ip.clone(),
            deadline: None,
        }
    }
}

fn callback_json(outcome: &CallbackOutcome) -> Value {
    match outcome {
        CallbackOutcome::Completed {
            response,
            target,
            html,
        } => json!({
            "outcome": "completed",
            "httpStatus": outcome.http_status(),
            "paymentId": response.payment_id,
            "status": response.status,
            "target": target,
            "html": html,
        }),
        CallbackOutcome::Failed {
            payment_id,
            target,
            html,
        } => json!({
            "outcome": "failed",
            "httpStatus": outcome.http_status(),
            "paymentId": payment_id,
            "target": target,
            "html": html,
        }),
        CallbackOutcome::Rejected { reason, html } => json!({
            "outcome": "rejected",
            "httpStatus": outcome.http_status(),
            "reason": reason,
            "html": html,
        }),
    }
}

/// Runs one command against the gateway and renders its result as JSON.
pub async fn run_command(gateway: &Gateway, line: CommandLine) -> Result<Value> {
    let caller = line.caller();
    let value = match line.command {
        Command::Providers => json!(gateway.provider_names()),
        Command::RequiredConfig {
            provider,
            environment,
        } => json!(gateway.required_config(&caller, &provider, environment)?),
        Command::SetConfig {
            provider,
            environment,
            credentials,
        } => {
            gateway
                .set_config(&caller, &provider, environment, credentials)
                .await?;
            json!({ "saved": true })
        }
        Command::GetConfig {
            provider,
            environment,
        } => json!(gateway.get_config(&caller, &provider, environment).await?),
        Command::ListConfigs => json!(gateway.list_configs(&caller).await?),
        Command::DeleteConfig {
            provider,
            environment,
        } => json!({ "removed": gateway.delete_config(&caller, &provider, environment).await? }),
        Command::WebhookUrl {
            provider,
            environment,
        } => json!(gateway.webhook_url(&caller, &provider, environment)?),
        Command::CreatePayment {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .create_payment(&caller, &provider, environment, request)
                .await?
        ),
        Command::Complete3DPayment {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .complete_3d_payment(&caller, &provider, environment, request)
                .await?
        ),
        Command::PaymentStatus {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .get_payment_status(&caller, &provider, environment, request)
                .await?
        ),
        Command::CancelPayment {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .cancel_payment(&caller, &provider, environment, request)
                .await?
        ),
        Command::Refund {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .refund_payment(&caller, &provider, environment, request)
                .await?
        ),
        Command::Installments {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .get_installment_count(&caller, &provider, environment, request)
                .await?
        ),
        Command::Commission {
            provider,
            environment,
            request,
        } => json!(
            gateway
                .get_commission(&caller, &provider, environment, request)
                .await?
        ),
        Command::Callback {
            provider,
            query,
            form,
            json,
        } => {
            let payload = RequestPayload {
                query: parse_query(&query)?,
                form,
                json,
            };
            callback_json(&gateway.handle_callback(&caller, &provider, &payload).await?)
        }
        Command::Webhook {
            provider,
            query,
            headers,
            body,
        } => {
            let webhook = InboundWebhook {
                query,
                headers,
                body: body.into_bytes(),
            };
            let ack = gateway.handle_webhook(&caller, &provider, webhook).await?;
            json!({ "httpStatus": ack.http_status(), "ack": ack })
        }
        Command::Effects { payment_id } => {
            gateway.drain_webhooks().await;
            json!(gateway.payment_effects(&caller, &payment_id).await?)
        }
    };
    Ok(value)
}
