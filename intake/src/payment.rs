use bytes::BytesMut;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use time::OffsetDateTime;
use tokio_postgres::types::{IsNull, ToSql, Type};

/// Which upstream processor ultimately accepted a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Default,
    Fallback,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Default => write!(f, "default"),
            Handler::Fallback => write!(f, "fallback"),
        }
    }
}

impl ToSql for Handler {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.to_string().to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
    }

    tokio_postgres::types::to_sql_checked!();
}

/// A payment as decoded off the wire on `/payments`, before the worker
/// stamps `requested_at`. `correlation_id` is an opaque client-supplied
/// string, not necessarily a UUID.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequestBody {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
}

/// The unit of work owned by a single worker from dequeue to completion,
/// then recycled into the job pool. `requested_at` starts unset and is
/// stamped exactly once, by the worker, just before the first upstream
/// attempt; it is never touched again across retries.
#[derive(Debug, Clone)]
pub struct Job {
    pub correlation_id: String,
    pub amount: Decimal,
    pub requested_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn from_body(body: PaymentRequestBody) -> Self {
        Self {
            correlation_id: body.correlation_id,
            amount: body.amount.round_dp(2),
            requested_at: None,
        }
    }

    /// Resets a pooled job for reuse. Called by the pool before handing
    /// the job back out, never while it is still owned by a worker.
    pub fn reset(&mut self) {
        self.correlation_id.clear();
        self.amount = Decimal::ZERO;
        self.requested_at = None;
    }

    pub fn requested_at(&self) -> OffsetDateTime {
        self.requested_at
            .expect("requested_at must be stamped before use")
    }
}

impl Default for Job {
    fn default() -> Self {
        Self {
            correlation_id: String::new(),
            amount: Decimal::ZERO,
            requested_at: None,
        }
    }
}

/// The upstream request body: `{"correlationId","amount","requestedAt"}`.
#[derive(Debug, Serialize)]
pub struct UpstreamPaymentRequest<'a> {
    #[serde(rename = "correlationId")]
    pub correlation_id: &'a str,
    pub amount: Decimal,
    #[serde(rename = "requestedAt", with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessorSummary {
    #[serde(rename = "totalRequests")]
    pub total_requests: i64,
    #[serde(rename = "totalAmount")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_is_rounded_to_two_decimals_at_construction() {
        let body = PaymentRequestBody {
            correlation_id: "a1".to_string(),
            amount: Decimal::new(19904, 3), // 19.904, unambiguous under any rounding rule
        };
        let job = Job::from_body(body);
        assert_eq!(job.amount.to_string(), "19.90");
    }

    #[test]
    fn handler_displays_as_lowercase_name() {
        assert_eq!(Handler::Default.to_string(), "default");
        assert_eq!(Handler::Fallback.to_string(), "fallback");
    }
}
