use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

/// Property display fields embedded in a due summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySummary {
    pub name: String,
    pub address: String,
}

/// The tenant's next due invoice, computed fresh on every fetch from the
/// tenancy and payment records. Wire format is camelCase because the mobile
/// client consumes it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentDue {
    pub payment_id: Option<String>,
    pub property: Option<PropertySummary>,
    pub period_month: u32,
    pub period_year: i32,
    pub base_amount: f64,
    pub late_fee_amount: f64,
    pub late_fee_per_day: f64,
    pub billing_grace_last_day: u32,
    pub total_amount: f64,
    pub has_due: bool,
    pub is_overdue: bool,
}

impl RentDue {
    /// The "all settled" summary returned when no pending invoice exists.
    pub fn settled() -> Self {
        Self {
            payment_id: None,
            property: None,
            period_month: 0,
            period_year: 0,
            base_amount: 0.0,
            late_fee_amount: 0.0,
            late_fee_per_day: 0.0,
            billing_grace_last_day: 0,
            total_amount: 0.0,
            has_due: false,
            is_overdue: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNotes {
    pub is_test_payment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutPrefill {
    pub name: String,
    pub email: String,
    pub contact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutTheme {
    pub color: String,
}

/// Gateway order descriptor returned by the create-order endpoint. Ephemeral;
/// exists only to drive one checkout session. `amount` is in paise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub razorpay_key_id: String,
    pub notes: OrderNotes,
    pub prefill: CheckoutPrefill,
    pub theme: CheckoutTheme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub status: String,
}

/// Optional client-assisted confirmation payload for the verify endpoint.
/// Field names follow the Razorpay checkout success callback.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct VerifyPaymentInput {
    #[validate(length(max = 128))]
    pub razorpay_order_id: Option<String>,
    #[validate(length(max = 128))]
    pub razorpay_payment_id: Option<String>,
    #[validate(length(max = 256))]
    pub razorpay_signature: Option<String>,
}

impl VerifyPaymentInput {
    pub fn signature_fields(&self) -> Option<(&str, &str, &str)> {
        match (
            self.razorpay_order_id.as_deref(),
            self.razorpay_payment_id.as_deref(),
            self.razorpay_signature.as_deref(),
        ) {
            (Some(order_id), Some(payment_id), Some(signature))
                if !order_id.is_empty() && !payment_id.is_empty() && !signature.is_empty() =>
            {
                Some((order_id, payment_id, signature))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIdPath {
    pub payment_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsQuery {
    pub limit: Option<i64>,
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}
