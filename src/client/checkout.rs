use serde::Serialize;

use crate::schemas::{CheckoutPrefill, CheckoutTheme, OrderNotes, PaymentOrder};

/// Everything the gateway's checkout surface needs to open a payment sheet.
/// Field names match the Razorpay checkout options object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutDescriptor {
    pub key: String,
    pub amount: i64,
    pub currency: String,
    pub order_id: String,
    pub prefill: CheckoutPrefill,
    pub theme: CheckoutTheme,
    pub notes: OrderNotes,
}

impl CheckoutDescriptor {
    pub fn from_order(order: &PaymentOrder) -> Self {
        Self {
            key: order.razorpay_key_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            order_id: order.order_id.clone(),
            prefill: order.prefill.clone(),
            theme: order.theme.clone(),
            notes: order.notes.clone(),
        }
    }
}

/// What the gateway hands back on a successful checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSuccess {
    pub razorpay_payment_id: String,
    pub razorpay_order_id: String,
    pub razorpay_signature: String,
}

/// A failed or abandoned checkout. These surface to the user immediately
/// and never enter the verification loop.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutFailure {
    Cancelled,
    Network(String),
    Failed {
        code: String,
        description: Option<String>,
    },
}

impl CheckoutFailure {
    pub fn user_message(&self) -> String {
        match self {
            Self::Cancelled => "Payment cancelled.".to_string(),
            Self::Network(_) => "Network error".to_string(),
            Self::Failed { code, description } => {
                if code == "NETWORK_ERROR" {
                    "Network error".to_string()
                } else {
                    description
                        .clone()
                        .filter(|text| !text.trim().is_empty())
                        .unwrap_or_else(|| "Payment failed.".to_string())
                }
            }
        }
    }
}

/// Capability interface for opening a checkout surface. Implementations are
/// chosen at composition time (hosted page, native SDK shim, test double) —
/// there is no runtime platform branching in the flow itself.
#[allow(async_fn_in_trait)]
pub trait CheckoutProvider {
    async fn open(&self, descriptor: &CheckoutDescriptor) -> Result<CheckoutSuccess, CheckoutFailure>;
}

/// Adapter that delegates to a closure supplied by the embedding shell (the
/// layer that actually owns a webview or SDK binding).
pub struct CallbackCheckout<F> {
    open_fn: F,
}

impl<F> CallbackCheckout<F> {
    pub fn new(open_fn: F) -> Self {
        Self { open_fn }
    }
}

impl<F, Fut> CheckoutProvider for CallbackCheckout<F>
where
    F: Fn(CheckoutDescriptor) -> Fut,
    Fut: std::future::Future<Output = Result<CheckoutSuccess, CheckoutFailure>>,
{
    async fn open(&self, descriptor: &CheckoutDescriptor) -> Result<CheckoutSuccess, CheckoutFailure> {
        (self.open_fn)(descriptor.clone()).await
    }
}
