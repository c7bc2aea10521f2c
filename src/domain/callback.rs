use crate::domain::tenant::{Environment, TenantId};
use serde::{Deserialize, Serialize};

/// Gateway context carried through the card issuer's redirect round trip.
///
/// Fully self-describing: the callback may land on a different process than
/// the one that started the payment, so nothing here refers to server-side state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackState {
    pub payment_id: String,
    pub tenant_id: TenantId,
    pub provider_name: String,
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub original_callback_url: String,
    pub success_url: String,
    pub error_url: String,
    /// Unix seconds.
    pub issued_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
}

impl CallbackState {
    pub fn is_expired_at(&self, now: i64, max_age_secs: i64) -> bool {
        now > self.expires_at || now.saturating_sub(self.issued_at) > max_age_secs
    }

    /// Identifies this state in the redemption ledger.
    pub fn redemption_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.tenant_id, self.provider_name, self.environment, self.payment_id, self.issued_at
        )
    }
}
