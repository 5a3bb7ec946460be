// src/models/training.rs

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use validator::Validate;

/// Represents the 'workshops' table: a training program.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Workshop {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Represents the 'batches' table: one cohort of a workshop.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub workshop_id: i64,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Represents the 'class_schedules' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClassSchedule {
    pub id: i64,
    pub batch_id: i64,
    pub topic: String,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub meeting_link: Option<String>,

    /// One-shot flags, set once the matching reminder went out.
    pub reminder_3hr_sent: bool,
    pub reminder_30min_sent: bool,

    pub created_at: DateTime<Utc>,
}

pub const CLASS_COLUMNS: &str = "id, batch_id, topic, description, start_time, end_time, \
     meeting_link, reminder_3hr_sent, reminder_30min_sent, created_at";

/// Represents the 'coupons' table: a single-use enrollment code.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub batch_id: i64,
    pub assigned_to: Option<i64>,

    /// Rolling lifetime, used when no fixed end date is set.
    pub valid_days: Option<i32>,
    pub enrollment_valid_from: Option<NaiveDate>,
    pub enrollment_valid_until: Option<NaiveDate>,

    pub payment_amount: Option<BigDecimal>,
    pub payment_date: Option<NaiveDate>,
    pub next_payment_date: Option<NaiveDate>,

    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

pub const COUPON_COLUMNS: &str = "id, code, batch_id, assigned_to, valid_days, enrollment_valid_from, \
     enrollment_valid_until, payment_amount, payment_date, next_payment_date, is_used, created_at";

/// Enrollment joined with its batch and workshop names.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnrollmentDetail {
    pub id: i64,
    pub user_id: i64,
    pub batch_id: i64,
    pub batch_name: String,
    pub workshop_title: String,
    pub enrolled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EnrollmentDetail {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// One payment line derived from a coupon.
#[derive(Debug, Serialize, PartialEq)]
pub struct PaymentRecord {
    pub amount: Option<BigDecimal>,
    pub date: Option<NaiveDate>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub next_due: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub program: String,
    pub batch: String,
    pub status: &'static str,
    pub expires_at: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
    pub history: Vec<PaymentRecord>,
}

/// Coupon joined with batch/workshop for the payment history page.
#[derive(Debug, FromRow)]
pub struct CouponHistoryRow {
    pub code: String,
    pub batch_name: String,
    pub workshop_title: String,
    pub valid_days: Option<i32>,
    pub enrollment_valid_from: Option<NaiveDate>,
    pub enrollment_valid_until: Option<NaiveDate>,
    pub payment_amount: Option<BigDecimal>,
    pub payment_date: Option<NaiveDate>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryEntry {
    pub program: String,
    pub batch: String,
    pub amount: Option<BigDecimal>,
    pub date: NaiveDate,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub code: String,
    pub status: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RedeemCouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub coupon_code: String,
}

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateWorkshopRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    pub workshop_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClassRequest {
    pub batch_id: i64,
    #[validate(length(min = 1, max = 255))]
    pub topic: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[validate(length(max = 500), custom(function = validate_meeting_link))]
    pub meeting_link: Option<String>,
}

/// DTO for updating a class. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClassRequest {
    #[validate(length(min = 1, max = 255))]
    pub topic: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[validate(length(max = 500), custom(function = validate_meeting_link))]
    pub meeting_link: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    pub batch_id: i64,
    pub assigned_to: Option<i64>,
    #[validate(range(min = 1, max = 3650))]
    pub valid_days: Option<i32>,
    pub enrollment_valid_from: Option<NaiveDate>,
    pub enrollment_valid_until: Option<NaiveDate>,
    #[validate(custom(function = validate_payment_amount))]
    pub payment_amount: Option<BigDecimal>,
    pub payment_date: Option<NaiveDate>,
    pub next_payment_date: Option<NaiveDate>,
}

/// DTO for updating a coupon. Fields are optional; the code never changes.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCouponRequest {
    pub assigned_to: Option<i64>,
    #[validate(range(min = 1, max = 3650))]
    pub valid_days: Option<i32>,
    pub enrollment_valid_from: Option<NaiveDate>,
    pub enrollment_valid_until: Option<NaiveDate>,
    #[validate(custom(function = validate_payment_amount))]
    pub payment_amount: Option<BigDecimal>,
    pub payment_date: Option<NaiveDate>,
    pub next_payment_date: Option<NaiveDate>,
}

/// Amounts fit NUMERIC(10, 2): non-negative, at most two decimals.
fn validate_payment_amount(amount: &BigDecimal) -> Result<(), validator::ValidationError> {
    if *amount < BigDecimal::from(0) || *amount >= BigDecimal::from(100_000_000) {
        return Err(validator::ValidationError::new("amount_out_of_range"));
    }
    if amount.with_scale(2) != *amount {
        return Err(validator::ValidationError::new("amount_precision"));
    }
    Ok(())
}

/// Meeting links must be absolute http(s) URLs.
fn validate_meeting_link(link: &str) -> Result<(), validator::ValidationError> {
    match Url::parse(link) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_url")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meeting_link_must_be_http_url() {
        assert!(validate_meeting_link("https://meet.example.com/abc").is_ok());
        assert!(validate_meeting_link("javascript:alert(1)").is_err());
        assert!(validate_meeting_link("not a url").is_err());
    }

    #[test]
    fn payment_amount_is_money() {
        let amount = |s: &str| s.parse::<BigDecimal>().unwrap();
        assert!(validate_payment_amount(&amount("1500")).is_ok());
        assert!(validate_payment_amount(&amount("19.99")).is_ok());
        assert!(validate_payment_amount(&amount("19.990")).is_ok());
        assert!(validate_payment_amount(&amount("19.999")).is_err());
        assert!(validate_payment_amount(&amount("-1")).is_err());
        assert!(validate_payment_amount(&amount("100000000")).is_err());
    }

    #[test]
    fn coupon_request_reads_decimal_amounts() {
        let req: CreateCouponRequest =
            serde_json::from_str(r#"{"batch_id": 1, "payment_amount": "1234.56"}"#).unwrap();
        assert_eq!(req.payment_amount, Some("1234.56".parse().unwrap()));
        assert!(req.validate().is_ok());
    }
}
