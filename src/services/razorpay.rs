use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const RZP_API_BASE: &str = "https://api.razorpay.com";

/// Convert a rupee amount to paise, the smallest currency unit Razorpay
/// expects in order payloads.
pub fn amount_in_paise(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Create a Razorpay order for one due invoice.
pub async fn create_order(
    http_client: &Client,
    key_id: &str,
    key_secret: &str,
    amount_paise: i64,
    currency: &str,
    receipt: &str,
    is_test_payment: bool,
) -> Result<Value, String> {
    let response = http_client
        .post(format!("{RZP_API_BASE}/v1/orders"))
        .basic_auth(key_id, Some(key_secret))
        .json(&json!({
            "amount": amount_paise,
            "currency": currency.to_uppercase(),
            "receipt": receipt,
            "notes": { "is_test_payment": is_test_payment },
        }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Razorpay order request failed");
            "Razorpay order request failed.".to_string()
        })?;

    let status = response.status();
    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        Ok(json!({
            "order_id": resp_body.get("id").and_then(Value::as_str).unwrap_or(""),
            "amount": resp_body.get("amount").and_then(Value::as_i64).unwrap_or(amount_paise),
            "currency": resp_body.get("currency").and_then(Value::as_str).unwrap_or(currency),
            "status": resp_body.get("status").and_then(Value::as_str).unwrap_or("created"),
        }))
    } else {
        let error_msg = resp_body
            .get("error")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Razorpay error");
        Err(format!("Razorpay API error ({status}): {error_msg}"))
    }
}

/// Look up an order's current state; `status == "paid"` once Razorpay has
/// captured the full amount.
pub async fn fetch_order(
    http_client: &Client,
    key_id: &str,
    key_secret: &str,
    order_id: &str,
) -> Result<Value, String> {
    let response = http_client
        .get(format!("{RZP_API_BASE}/v1/orders/{order_id}"))
        .basic_auth(key_id, Some(key_secret))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Razorpay order lookup failed");
            "Razorpay order lookup failed.".to_string()
        })?;

    let status = response.status();
    let resp_body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if status.is_success() {
        Ok(json!({
            "id": resp_body.get("id").and_then(Value::as_str).unwrap_or(""),
            "status": resp_body.get("status").and_then(Value::as_str).unwrap_or("unknown"),
            "amount": resp_body.get("amount").and_then(Value::as_i64).unwrap_or(0),
            "amount_paid": resp_body.get("amount_paid").and_then(Value::as_i64).unwrap_or(0),
        }))
    } else {
        Err(format!("Razorpay order lookup error ({status})"))
    }
}

/// Verify the signature Razorpay's checkout hands the client on success:
/// HMAC-SHA256 over `"<order_id>|<payment_id>"` with the key secret,
/// hex-encoded. Constant-time comparison via the Mac verifier.
pub fn verify_checkout_signature(
    order_id: &str,
    payment_id: &str,
    signature_hex: &str,
    key_secret: &str,
) -> bool {
    verify_hmac_hex(&format!("{order_id}|{payment_id}"), signature_hex, key_secret)
}

/// Verify the `X-Razorpay-Signature` webhook header: HMAC-SHA256 over the
/// raw request body with the webhook secret, hex-encoded.
pub fn verify_webhook_signature(payload: &str, signature_hex: &str, webhook_secret: &str) -> bool {
    verify_hmac_hex(payload, signature_hex, webhook_secret)
}

fn verify_hmac_hex(message: &str, signature_hex: &str, secret: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());

    let Ok(expected_bytes) = hex_decode(signature_hex.trim()) else {
        return false;
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    // Reject non-ASCII before slicing; the signature arrives in a JSON body,
    // not just a header, so arbitrary UTF-8 reaches this point.
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}
