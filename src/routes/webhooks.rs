use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{list_rows, update_row};
use crate::services::razorpay;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/webhooks/razorpay", axum::routing::post(razorpay_webhook))
}

/// Authoritative payment confirmation path. Razorpay delivers events signed
/// with the webhook secret; a captured payment flips the matching rent
/// payment row to PAID regardless of what the client has seen.
async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    let secret = state
        .config
        .razorpay_webhook_secret
        .as_deref()
        .ok_or_else(|| {
            AppError::Dependency("Razorpay webhook secret is not configured.".to_string())
        })?;

    let signature = headers
        .get("x-razorpay-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !razorpay::verify_webhook_signature(&body, signature, secret) {
        return Err(AppError::Unauthorized(
            "Invalid webhook signature.".to_string(),
        ));
    }

    let event: Value = serde_json::from_str(&body)
        .map_err(|_| AppError::BadRequest("Malformed webhook payload.".to_string()))?;
    let event_type = event.get("event").and_then(Value::as_str).unwrap_or_default();

    match paid_order_reference(event_type, &event) {
        Some((order_id, gateway_payment_id)) => {
            settle_by_order_id(&state, &order_id, gateway_payment_id.as_deref()).await?;
        }
        None => {
            tracing::debug!(event = %event_type, "Ignoring Razorpay event");
        }
    }

    Ok(StatusCode::OK)
}

/// Extract the gateway order id (and payment id when present) from events
/// that mean "this order is paid".
fn paid_order_reference(event_type: &str, event: &Value) -> Option<(String, Option<String>)> {
    match event_type {
        "payment.captured" => {
            let entity = event
                .get("payload")?
                .get("payment")?
                .get("entity")?;
            let order_id = entity.get("order_id")?.as_str()?.to_string();
            let payment_id = entity
                .get("id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            Some((order_id, payment_id))
        }
        "order.paid" => {
            let entity = event.get("payload")?.get("order")?.get("entity")?;
            let order_id = entity.get("id")?.as_str()?.to_string();
            Some((order_id, None))
        }
        _ => None,
    }
}

async fn settle_by_order_id(
    state: &AppState,
    order_id: &str,
    gateway_payment_id: Option<&str>,
) -> AppResult<()> {
    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })?;

    let mut filters = Map::new();
    filters.insert(
        "gateway_order_id".to_string(),
        Value::String(order_id.to_string()),
    );
    let rows = list_rows(pool, "rent_payments", Some(&filters), 1, "created_at", false).await?;

    let Some(payment) = rows.into_iter().next() else {
        tracing::warn!(order_id = %order_id, "Webhook for unknown gateway order");
        return Ok(());
    };

    let payment_id = payment
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let status = payment
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if status == "PAID" {
        return Ok(()); // replayed event; nothing to do
    }

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::String("PAID".to_string()));
    patch.insert(
        "paid_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    if let Some(reference) = gateway_payment_id {
        patch.insert(
            "gateway_payment_id".to_string(),
            Value::String(reference.to_string()),
        );
    }
    update_row(pool, "rent_payments", &payment_id, &patch, "id").await?;

    tracing::info!(payment_id = %payment_id, order_id = %order_id, "Payment settled via webhook");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::paid_order_reference;

    #[test]
    fn extracts_captured_payment() {
        let event = json!({
            "event": "payment.captured",
            "payload": { "payment": { "entity": {
                "id": "pay_abc",
                "order_id": "order_xyz",
                "amount": 500000
            }}}
        });
        assert_eq!(
            paid_order_reference("payment.captured", &event),
            Some(("order_xyz".to_string(), Some("pay_abc".to_string())))
        );
    }

    #[test]
    fn extracts_order_paid() {
        let event = json!({
            "event": "order.paid",
            "payload": { "order": { "entity": { "id": "order_xyz" } } }
        });
        assert_eq!(
            paid_order_reference("order.paid", &event),
            Some(("order_xyz".to_string(), None))
        );
    }

    #[test]
    fn ignores_unrelated_events() {
        let event = json!({
            "event": "payment.failed",
            "payload": { "payment": { "entity": { "id": "pay_abc", "order_id": "order_xyz" } } }
        });
        assert_eq!(paid_order_reference("payment.failed", &event), None);
        assert_eq!(paid_order_reference("payment.captured", &json!({})), None);
    }
}
