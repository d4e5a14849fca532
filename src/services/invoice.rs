use serde_json::Value;

use crate::config::AppConfig;

const MONTH_NAMES: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Render a rent receipt as a standalone HTML document for download.
pub fn render_invoice_html(
    config: &AppConfig,
    payment: &Value,
    property: Option<&Value>,
    tenant_name: &str,
) -> String {
    let payment_id = str_field(payment, "id").unwrap_or_default();
    let month = num_field(payment, "period_month") as usize;
    let year = num_field(payment, "period_year") as i64;
    let base_amount = num_field(payment, "amount");
    let late_fee = num_field(payment, "late_fee_amount");
    let total = base_amount + late_fee;
    let paid_at = str_field(payment, "paid_at").unwrap_or_else(|| "—".to_string());
    let reference = str_field(payment, "gateway_payment_id")
        .or_else(|| str_field(payment, "gateway_order_id"))
        .unwrap_or_else(|| "—".to_string());

    let period = format!(
        "{} {year}",
        MONTH_NAMES
            .get(month.saturating_sub(1))
            .copied()
            .unwrap_or("Unknown")
    );
    let property_name = property
        .and_then(|row| str_field(row, "name"))
        .unwrap_or_default();
    let property_address = property
        .and_then(|row| str_field(row, "address"))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n\
         <html><head><meta charset=\"utf-8\"><title>Rent Receipt {payment_id}</title></head>\n\
         <body>\n\
         <h1>{app_name} — Rent Receipt</h1>\n\
         <p><strong>Receipt for:</strong> {tenant}</p>\n\
         <p><strong>Property:</strong> {property_name}<br>{property_address}</p>\n\
         <table>\n\
         <tr><td>Billing period</td><td>{period}</td></tr>\n\
         <tr><td>Base rent</td><td>{currency} {base_amount:.2}</td></tr>\n\
         <tr><td>Late fee</td><td>{currency} {late_fee:.2}</td></tr>\n\
         <tr><td><strong>Total paid</strong></td><td><strong>{currency} {total:.2}</strong></td></tr>\n\
         <tr><td>Paid at</td><td>{paid_at}</td></tr>\n\
         <tr><td>Gateway reference</td><td>{reference}</td></tr>\n\
         <tr><td>Receipt no.</td><td>{payment_id}</td></tr>\n\
         </table>\n\
         </body></html>\n",
        app_name = escape_html(&config.app_name),
        tenant = escape_html(tenant_name),
        property_name = escape_html(&property_name),
        property_address = escape_html(&property_address),
        period = escape_html(&period),
        currency = escape_html(&config.default_currency),
        paid_at = escape_html(&paid_at),
        reference = escape_html(&reference),
        payment_id = escape_html(&payment_id),
    )
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn num_field(row: &Value, key: &str) -> f64 {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        })
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{escape_html, render_invoice_html};
    use crate::config::AppConfig;

    #[test]
    fn receipt_includes_amounts_and_period() {
        let config = AppConfig::from_env();
        let payment = json!({
            "id": "pay-1",
            "period_month": 3,
            "period_year": 2024,
            "amount": 5000.0,
            "late_fee_amount": 150.0,
            "paid_at": "2024-03-09T10:00:00Z",
            "gateway_payment_id": "pay_RZP123"
        });
        let property = json!({"name": "Sunrise PG", "address": "12 MG Road"});

        let html = render_invoice_html(&config, &payment, Some(&property), "Asha Rao");
        assert!(html.contains("March 2024"));
        assert!(html.contains("5000.00"));
        assert!(html.contains("5150.00"));
        assert!(html.contains("Sunrise PG"));
        assert!(html.contains("pay_RZP123"));
        assert!(html.contains("Asha Rao"));
    }

    #[test]
    fn escapes_markup_in_fields() {
        assert_eq!(escape_html("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }
}
