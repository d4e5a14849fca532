use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::repository::table_service::{get_row, list_rows};
use crate::schemas::{PropertySummary, RentDue};

/// Billing terms for one pending invoice, extracted from the tenancy and
/// payment rows.
#[derive(Debug, Clone)]
pub struct DueTerms {
    pub base_amount: f64,
    pub late_fee_per_day: f64,
    pub billing_grace_last_day: u32,
    pub period_month: u32,
    pub period_year: i32,
}

/// Compute the due summary for one pending invoice.
///
/// The late fee accrues per day strictly after the grace day of the due
/// month; on or before it the fee is zero. `total_amount` is always
/// `base_amount + late_fee_amount`.
pub fn compute_rent_due(terms: &DueTerms, today: NaiveDate) -> RentDue {
    let grace_last = grace_date(
        terms.period_year,
        terms.period_month,
        terms.billing_grace_last_day,
    );
    let days_late = (today - grace_last).num_days().max(0);
    let late_fee_amount = days_late as f64 * terms.late_fee_per_day;

    RentDue {
        payment_id: None,
        property: None,
        period_month: terms.period_month,
        period_year: terms.period_year,
        base_amount: terms.base_amount,
        late_fee_amount,
        late_fee_per_day: terms.late_fee_per_day,
        billing_grace_last_day: terms.billing_grace_last_day,
        total_amount: terms.base_amount + late_fee_amount,
        has_due: true,
        is_overdue: days_late > 0,
    }
}

/// Last day of the grace period, clamped into the due month (a grace day of
/// 30 in February means the last day of February). An invalid year/month
/// resolves to January 1 of the given year rather than panicking on a
/// corrupt row.
fn grace_date(year: i32, month: u32, grace_day: u32) -> NaiveDate {
    let day = grace_day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
        .unwrap_or(NaiveDate::MIN)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// "Today" in the property's timezone, falling back to the configured
/// default. Billing days roll over on local midnight, not UTC.
pub fn today_in_property_tz(config: &AppConfig, property: Option<&Value>) -> NaiveDate {
    let tz_name = property
        .and_then(|row| row.get("timezone"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(&config.default_timezone);

    let tz: chrono_tz::Tz = tz_name
        .parse()
        .unwrap_or(chrono_tz::Asia::Kolkata);
    Utc::now().with_timezone(&tz).date_naive()
}

/// Build the due summary for a specific payment row given its tenancy and
/// property rows.
pub fn due_from_rows(
    config: &AppConfig,
    payment: &Value,
    tenancy: &Value,
    property: Option<&Value>,
    today: NaiveDate,
) -> RentDue {
    let terms = DueTerms {
        base_amount: num_field(payment, "amount"),
        late_fee_per_day: opt_num_field(tenancy, "late_fee_per_day")
            .unwrap_or(config.default_late_fee_per_day),
        billing_grace_last_day: opt_num_field(tenancy, "billing_grace_day")
            .map(|value| value as u32)
            .filter(|day| *day >= 1)
            .unwrap_or(config.default_billing_grace_day),
        period_month: num_field(payment, "period_month") as u32,
        period_year: num_field(payment, "period_year") as i32,
    };

    let mut due = compute_rent_due(&terms, today);
    due.payment_id = str_field(payment, "id");
    due.property = property.map(|row| PropertySummary {
        name: str_field(row, "name").unwrap_or_default(),
        address: str_field(row, "address").unwrap_or_default(),
    });
    due
}

/// Fetch the tenant's next due invoice: earliest PENDING payment row of the
/// active tenancy. Returns the settled summary when nothing is pending.
pub async fn next_due_for_tenant(
    pool: &PgPool,
    config: &AppConfig,
    tenant_user_id: &str,
) -> AppResult<RentDue> {
    let mut tenancy_filters = Map::new();
    tenancy_filters.insert(
        "tenant_user_id".to_string(),
        Value::String(tenant_user_id.to_string()),
    );
    tenancy_filters.insert("status".to_string(), Value::String("ACTIVE".to_string()));

    let tenancies = list_rows(
        pool,
        "pg_tenancies",
        Some(&tenancy_filters),
        1,
        "created_at",
        false,
    )
    .await?;
    let Some(tenancy) = tenancies.into_iter().next() else {
        return Ok(RentDue::settled());
    };

    let Some(tenancy_id) = str_field(&tenancy, "id") else {
        return Ok(RentDue::settled());
    };

    let mut payment_filters = Map::new();
    payment_filters.insert("tenancy_id".to_string(), Value::String(tenancy_id));
    payment_filters.insert("status".to_string(), Value::String("PENDING".to_string()));

    let payments = list_rows(
        pool,
        "rent_payments",
        Some(&payment_filters),
        1,
        "due_date",
        true,
    )
    .await?;
    let Some(payment) = payments.into_iter().next() else {
        return Ok(RentDue::settled());
    };

    let property = match str_field(&tenancy, "property_id") {
        Some(property_id) => get_row(pool, "pg_properties", &property_id, "id").await.ok(),
        None => None,
    };

    let today = today_in_property_tz(config, property.as_ref());
    Ok(due_from_rows(
        config,
        &payment,
        &tenancy,
        property.as_ref(),
        today,
    ))
}

fn num_field(row: &Value, key: &str) -> f64 {
    opt_num_field(row, key).unwrap_or(0.0)
}

fn opt_num_field(row: &Value, key: &str) -> Option<f64> {
    row.as_object().and_then(|obj| obj.get(key)).and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    })
}

fn str_field(row: &Value, key: &str) -> Option<String> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{compute_rent_due, days_in_month, due_from_rows, grace_date, DueTerms};
    use crate::config::AppConfig;

    fn march_terms() -> DueTerms {
        DueTerms {
            base_amount: 5000.0,
            late_fee_per_day: 50.0,
            billing_grace_last_day: 5,
            period_month: 3,
            period_year: 2024,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn no_late_fee_within_grace() {
        let due = compute_rent_due(&march_terms(), date(2024, 3, 5));
        assert_eq!(due.late_fee_amount, 0.0);
        assert_eq!(due.total_amount, 5000.0);
        assert!(!due.is_overdue);
        assert!(due.has_due);
    }

    #[test]
    fn late_fee_accrues_per_day_after_grace() {
        let due = compute_rent_due(&march_terms(), date(2024, 3, 8));
        assert_eq!(due.late_fee_amount, 150.0);
        assert_eq!(due.total_amount, 5150.0);
        assert!(due.is_overdue);
    }

    #[test]
    fn total_is_always_base_plus_late_fee() {
        for day in 1..=31 {
            let due = compute_rent_due(&march_terms(), date(2024, 3, day));
            assert_eq!(due.total_amount, due.base_amount + due.late_fee_amount);
        }
    }

    #[test]
    fn grace_day_clamps_to_short_months() {
        assert_eq!(grace_date(2024, 2, 30), date(2024, 2, 29));
        assert_eq!(grace_date(2023, 2, 30), date(2023, 2, 28));
        assert_eq!(grace_date(2024, 3, 5), date(2024, 3, 5));
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
    }

    #[test]
    fn builds_due_from_db_rows() {
        let config = AppConfig::from_env();
        let payment = json!({
            "id": "pay-row-1",
            "amount": 5000,
            "period_month": 3,
            "period_year": 2024,
            "status": "PENDING"
        });
        let tenancy = json!({
            "id": "ten-1",
            "late_fee_per_day": 50,
            "billing_grace_day": 5
        });
        let property = json!({
            "name": "Sunrise PG",
            "address": "12 MG Road, Bengaluru"
        });

        let due = due_from_rows(
            &config,
            &payment,
            &tenancy,
            Some(&property),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
        );
        assert_eq!(due.payment_id.as_deref(), Some("pay-row-1"));
        assert_eq!(due.base_amount, 5000.0);
        assert_eq!(due.late_fee_amount, 0.0);
        assert_eq!(due.property.as_ref().unwrap().name, "Sunrise PG");
        assert!(due.has_due);
        assert!(!due.is_overdue);
    }
}
