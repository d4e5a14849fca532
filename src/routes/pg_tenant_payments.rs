use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::auth::require_tenant_id;
use crate::error::{AppError, AppResult};
use crate::repository::table_service::{get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, validate_input, CheckoutPrefill, CheckoutTheme, OrderNotes, PaymentIdPath,
    PaymentOrder, PaymentsQuery, VerificationResult, VerifyPaymentInput,
};
use crate::services::razorpay;
use crate::services::rent_due::{due_from_rows, today_in_property_tz};
use crate::services::{invoice, rent_due};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/pg-tenant/payments/next-due",
            axum::routing::get(next_due),
        )
        .route("/pg-tenant/payments", axum::routing::get(list_payments))
        .route(
            "/pg-tenant/payments/{payment_id}/create-order",
            axum::routing::post(create_order),
        )
        .route(
            "/pg-tenant/payments/{payment_id}/verify",
            axum::routing::post(verify_payment),
        )
        .route(
            "/pg-tenant/payments/{payment_id}/generate-invoice",
            axum::routing::post(generate_invoice),
        )
}

/// Current due summary for the authenticated tenant. Computed fresh on every
/// call; the client's Due Refresher hits this repeatedly and it must stay
/// idempotent.
async fn next_due(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let tenant_id = require_tenant_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let due = rent_due::next_due_for_tenant(pool, &state.config, &tenant_id).await?;
    Ok(Json(serde_json::to_value(due).map_err(|e| {
        AppError::Internal(format!("Failed to serialize due summary: {e}"))
    })?))
}

/// The tenant's payment history, newest first.
async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let tenant_id = require_tenant_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let Some(tenancy) = active_tenancy(&state, &tenant_id).await? else {
        return Ok(Json(json!({ "data": [] })));
    };

    let mut filters = Map::new();
    filters.insert(
        "tenancy_id".to_string(),
        Value::String(value_str(&tenancy, "id")),
    );

    let rows = list_rows(
        pool,
        "rent_payments",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 100),
        "due_date",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

/// Create a Razorpay order for a due invoice. Refuses outright when the
/// invoice is not pending — a settled invoice must never reach the gateway.
async fn create_order(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
) -> AppResult<Json<PaymentOrder>> {
    let tenant_id = require_tenant_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (payment, tenancy) = payment_for_tenant(&state, &path.payment_id, &tenant_id).await?;

    match value_str(&payment, "status").as_str() {
        "PAID" => {
            return Err(AppError::Conflict(
                "This invoice is already paid.".to_string(),
            ))
        }
        "PENDING" => {}
        _ => {
            return Err(AppError::UnprocessableEntity(
                "This invoice is not due for payment.".to_string(),
            ))
        }
    }

    let (key_id, key_secret) = state.config.razorpay_keys().ok_or_else(|| {
        AppError::Dependency("Payment gateway is not configured.".to_string())
    })?;

    let property = match value_str_opt(&tenancy, "property_id") {
        Some(property_id) => get_row(pool, "pg_properties", &property_id, "id").await.ok(),
        None => None,
    };
    let today = today_in_property_tz(&state.config, property.as_ref());
    let due = due_from_rows(&state.config, &payment, &tenancy, property.as_ref(), today);
    if !due.has_due {
        return Err(AppError::UnprocessableEntity(
            "This invoice is not due for payment.".to_string(),
        ));
    }

    let amount_paise = razorpay::amount_in_paise(due.total_amount);
    let order = razorpay::create_order(
        &state.http_client,
        key_id,
        key_secret,
        amount_paise,
        &state.config.default_currency,
        &path.payment_id,
        state.config.razorpay_test_mode,
    )
    .await
    .map_err(AppError::Dependency)?;

    let order_id = order
        .get("order_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if order_id.is_empty() {
        return Err(AppError::Dependency(
            "Payment gateway returned no order id.".to_string(),
        ));
    }

    // Snapshot the order reference and the late fee the order was priced
    // with, so verification and receipts see the same numbers. This write
    // must land before the client sees the order: the webhook and the
    // signature-less verify path both find the row by gateway_order_id.
    let patch = order_snapshot_patch(&order_id, due.late_fee_amount);
    update_row(pool, "rent_payments", &path.payment_id, &patch, "id")
        .await
        .map_err(|error| {
            tracing::error!(
                payment_id = %path.payment_id,
                order_id = %order_id,
                error = %error,
                "Failed to record gateway order on payment row"
            );
            AppError::Dependency("Could not record the payment order. Try again.".to_string())
        })?;

    let tenant_user = get_row(pool, "pg_tenant_users", &tenant_id, "id").await.ok();

    Ok(Json(PaymentOrder {
        order_id,
        amount: amount_paise,
        currency: state.config.default_currency.clone(),
        razorpay_key_id: key_id.to_string(),
        notes: OrderNotes {
            is_test_payment: state.config.razorpay_test_mode,
        },
        prefill: CheckoutPrefill {
            name: tenant_user
                .as_ref()
                .map(|row| value_str(row, "full_name"))
                .unwrap_or_default(),
            email: tenant_user
                .as_ref()
                .map(|row| value_str(row, "email"))
                .unwrap_or_default(),
            contact: tenant_user
                .as_ref()
                .map(|row| value_str(row, "phone"))
                .unwrap_or_default(),
        },
        theme: CheckoutTheme {
            color: state.config.checkout_theme_color.clone(),
        },
    }))
}

/// Report whether the payment has been confirmed server-side.
///
/// The client polls this after the gateway's success callback because the
/// webhook may lag. When the client supplies the checkout signature triple
/// the row can be confirmed directly; otherwise we consult the gateway's
/// order state, and failing that leave the row for the webhook.
async fn verify_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
    payload: Option<Json<VerifyPaymentInput>>,
) -> AppResult<Json<VerificationResult>> {
    let tenant_id = require_tenant_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (payment, _tenancy) = payment_for_tenant(&state, &path.payment_id, &tenant_id).await?;

    let status = value_str(&payment, "status");
    if status == "PAID" {
        return Ok(Json(VerificationResult {
            verified: true,
            status,
        }));
    }

    if let Some(Json(input)) = payload.as_ref() {
        validate_input(input)?;
        if let Some((order_id, gateway_payment_id, signature)) = input.signature_fields() {
            let (_, key_secret) = state.config.razorpay_keys().ok_or_else(|| {
                AppError::Dependency("Payment gateway is not configured.".to_string())
            })?;

            if !razorpay::verify_checkout_signature(
                order_id,
                gateway_payment_id,
                signature,
                key_secret,
            ) {
                return Err(AppError::BadRequest(
                    "Invalid payment signature.".to_string(),
                ));
            }

            let updated = mark_paid(&state, &path.payment_id, Some(gateway_payment_id)).await?;
            return Ok(Json(VerificationResult {
                verified: true,
                status: value_str(&updated, "status"),
            }));
        }
    }

    // No signature supplied: ask the gateway about the order directly.
    if let (Some((key_id, key_secret)), Some(order_id)) = (
        state.config.razorpay_keys(),
        value_str_opt(&payment, "gateway_order_id"),
    ) {
        match razorpay::fetch_order(&state.http_client, key_id, key_secret, &order_id).await {
            Ok(order) if order.get("status").and_then(Value::as_str) == Some("paid") => {
                let updated = mark_paid(&state, &path.payment_id, None).await?;
                return Ok(Json(VerificationResult {
                    verified: true,
                    status: value_str(&updated, "status"),
                }));
            }
            Ok(_) => {}
            Err(error) => {
                // Treated as "not yet verified"; the client retries.
                tracing::warn!(error = %error, payment_id = %path.payment_id, "Order lookup failed during verification");
            }
        }
    }

    Ok(Json(VerificationResult {
        verified: false,
        status,
    }))
}

/// Render the rent receipt for a settled invoice as a downloadable document.
async fn generate_invoice(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let tenant_id = require_tenant_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let (payment, tenancy) = payment_for_tenant(&state, &path.payment_id, &tenant_id).await?;
    if value_str(&payment, "status") != "PAID" {
        return Err(AppError::Conflict(
            "An invoice is available only after payment.".to_string(),
        ));
    }

    let property = match value_str_opt(&tenancy, "property_id") {
        Some(property_id) => get_row(pool, "pg_properties", &property_id, "id").await.ok(),
        None => None,
    };
    let tenant_name = get_row(pool, "pg_tenant_users", &tenant_id, "id")
        .await
        .map(|row| value_str(&row, "full_name"))
        .unwrap_or_default();

    let html = invoice::render_invoice_html(&state.config, &payment, property.as_ref(), &tenant_name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"rent-receipt-{}.html\"", path.payment_id),
            ),
        ],
        html,
    ))
}

/// Fetch a payment row and its tenancy, enforcing that the row belongs to
/// the caller. A foreign row reads as "not found" rather than "forbidden".
async fn payment_for_tenant(
    state: &AppState,
    payment_id: &str,
    tenant_id: &str,
) -> AppResult<(Value, Value)> {
    let pool = db_pool(state)?;

    let payment = get_row(pool, "rent_payments", payment_id, "id").await?;
    let tenancy_id = value_str(&payment, "tenancy_id");
    if tenancy_id.is_empty() {
        return Err(AppError::NotFound("Payment record not found.".to_string()));
    }

    let tenancy = get_row(pool, "pg_tenancies", &tenancy_id, "id").await?;
    if value_str(&tenancy, "tenant_user_id") != tenant_id {
        return Err(AppError::NotFound("Payment record not found.".to_string()));
    }

    Ok((payment, tenancy))
}

async fn active_tenancy(state: &AppState, tenant_id: &str) -> AppResult<Option<Value>> {
    let pool = db_pool(state)?;

    let mut filters = Map::new();
    filters.insert(
        "tenant_user_id".to_string(),
        Value::String(tenant_id.to_string()),
    );
    filters.insert("status".to_string(), Value::String("ACTIVE".to_string()));

    let rows = list_rows(pool, "pg_tenancies", Some(&filters), 1, "created_at", false).await?;
    Ok(rows.into_iter().next())
}

async fn mark_paid(
    state: &AppState,
    payment_id: &str,
    gateway_payment_id: Option<&str>,
) -> AppResult<Value> {
    let pool = db_pool(state)?;

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
    update_row(pool, "rent_payments", payment_id, &patch, "id").await
}

/// The fields stamped onto a payment row once its gateway order exists.
fn order_snapshot_patch(order_id: &str, late_fee_amount: f64) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(
        "gateway_order_id".to_string(),
        Value::String(order_id.to_string()),
    );
    patch.insert("late_fee_amount".to_string(), json!(late_fee_amount));
    patch
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    value_str_opt(row, key).unwrap_or_default()
}

fn value_str_opt(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{order_snapshot_patch, value_str, value_str_opt};

    #[test]
    fn snapshot_patch_carries_settlement_keys() {
        // Webhook settlement and signature-less verification both look the
        // row up by gateway_order_id; the patch must always include it.
        let patch = order_snapshot_patch("order_xyz", 150.0);
        assert_eq!(
            patch.get("gateway_order_id"),
            Some(&Value::String("order_xyz".to_string()))
        );
        assert_eq!(patch.get("late_fee_amount"), Some(&json!(150.0)));
        assert_eq!(patch.len(), 2);
    }

    #[test]
    fn row_string_helpers_trim_and_reject_empty() {
        let row = json!({"status": " PENDING ", "note": "", "amount": 5});
        assert_eq!(value_str(&row, "status"), "PENDING");
        assert_eq!(value_str_opt(&row, "note"), None);
        assert_eq!(value_str_opt(&row, "amount"), None);
        assert_eq!(value_str(&row, "missing"), "");
    }
}
