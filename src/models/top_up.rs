use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpSource {
    /// Charged by the scheduled auto-top-up job.
    AutoTopUp,
    /// Paid through a hosted checkout page.
    Checkout,
    /// Learned about only through a payment webhook.
    Webhook,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

str_enum!(TopUpStatus {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
});

str_enum!(TopUpSource {
    AutoTopUp => "auto_top_up",
    Checkout => "checkout",
    Webhook => "webhook",
});

/// A wallet credit attempt. Amounts are in microcents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpTransaction {
    pub id: Uuid,
    pub org_id: String,
    pub amount: i64,
    /// Payment-provider reference (e.g. a PaymentIntent id). Unique.
    pub payment_reference: Option<String>,
    pub source: TopUpSource,
    pub status: TopUpStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_round_trip() {
        assert_eq!("auto_top_up".parse::<TopUpSource>(), Ok(TopUpSource::AutoTopUp));
        assert_eq!(TopUpStatus::Succeeded.to_string(), "succeeded");
        assert!("refunded".parse::<TopUpStatus>().is_err());
    }
}
