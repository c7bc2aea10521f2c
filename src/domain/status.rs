use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical payment status every plugin maps its processor codes onto.
///
/// `Pending` and `Processing` are transient. The others are terminal for the
/// operation that produced them; a `Successful` payment only becomes `Refunded`
/// through a separate refund operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Successful,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_transient()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "successful" | "success" => Ok(Self::Successful),
            "failed" | "failure" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}
