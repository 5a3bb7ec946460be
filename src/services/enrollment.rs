//! Coupon redemption and enrollment expiry bookkeeping.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::{
    config::DEFAULT_COUPON_VALID_DAYS,
    error::AppError,
    models::training::{
        COUPON_COLUMNS, Coupon, CouponHistoryRow, EnrollmentDetail, PaymentHistoryEntry,
        PaymentRecord, SubscriptionInfo,
    },
};

/// Why a coupon cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    Unknown,
    AlreadyUsed,
    AssignedToOther,
    Expired,
}

impl RedeemError {
    pub fn message(&self) -> &'static str {
        match self {
            RedeemError::Unknown => "Invalid access code.",
            RedeemError::AlreadyUsed => "This code has already been used.",
            RedeemError::AssignedToOther => "This code is not assigned to you.",
            RedeemError::Expired => "This coupon has expired.",
        }
    }
}

impl From<RedeemError> for AppError {
    fn from(err: RedeemError) -> Self {
        match err {
            RedeemError::Unknown => AppError::NotFound(err.message().to_string()),
            RedeemError::AssignedToOther => AppError::Forbidden(err.message().to_string()),
            RedeemError::AlreadyUsed | RedeemError::Expired => {
                AppError::BadRequest(err.message().to_string())
            }
        }
    }
}

/// Codes are matched upper-cased with surrounding whitespace removed.
pub fn normalize_coupon_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// 12 upper-case characters taken from a random UUID.
pub fn generate_coupon_code() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase().chars().take(12).collect()
}

pub fn check_redeemable(coupon: &Coupon, user_id: i64, today: NaiveDate) -> Result<(), RedeemError> {
    if coupon.is_used {
        return Err(RedeemError::AlreadyUsed);
    }
    if coupon.assigned_to.is_some_and(|owner| owner != user_id) {
        return Err(RedeemError::AssignedToOther);
    }
    if coupon.enrollment_valid_until.is_some_and(|until| until < today) {
        return Err(RedeemError::Expired);
    }
    Ok(())
}

/// Last representable instant of `date` in UTC.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN);
    date.and_time(last).and_utc()
}

/// Expiry granted by a freshly redeemed coupon: the fixed end date when set,
/// otherwise a rolling number of days from now.
pub fn initial_expiry(coupon: &Coupon, now: DateTime<Utc>) -> DateTime<Utc> {
    match coupon.enrollment_valid_until {
        Some(until) => end_of_day(until),
        None => {
            let days = coupon.valid_days.unwrap_or(DEFAULT_COUPON_VALID_DAYS).max(0);
            now + Duration::days(days as i64)
        }
    }
}

/// Latest fixed end date across the coupons, as an end-of-day instant.
pub fn max_fixed_expiry(coupons: &[Coupon]) -> Option<DateTime<Utc>> {
    coupons
        .iter()
        .filter_map(|c| c.enrollment_valid_until)
        .max()
        .map(end_of_day)
}

#[derive(Debug, Serialize)]
pub struct RedeemOutcome {
    pub batch_id: i64,
    pub workshop_title: String,
    pub expires_at: DateTime<Utc>,
}

/// Consumes a coupon for `user_id` and enrolls them in its batch.
///
/// The coupon row is locked and flipped with `is_used = FALSE` in the
/// predicate, so two concurrent redemptions cannot both succeed.
pub async fn redeem_coupon(
    pool: &PgPool,
    user_id: i64,
    raw_code: &str,
    now: DateTime<Utc>,
) -> Result<RedeemOutcome, AppError> {
    let code = normalize_coupon_code(raw_code);
    if code.is_empty() {
        return Err(RedeemError::Unknown.into());
    }

    let mut tx = pool.begin().await?;

    let coupon = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE code = $1 FOR UPDATE"
    ))
    .bind(&code)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(RedeemError::Unknown)?;

    check_redeemable(&coupon, user_id, now.date_naive())?;

    let consumed = sqlx::query(
        r#"
        UPDATE coupons
        SET is_used = TRUE, assigned_to = COALESCE(assigned_to, $2)
        WHERE id = $1 AND is_used = FALSE
        "#,
    )
    .bind(coupon.id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if consumed.rows_affected() == 0 {
        return Err(RedeemError::AlreadyUsed.into());
    }

    let granted = initial_expiry(&coupon, now);

    // Existing enrollments are only ever extended by a redemption.
    sqlx::query(
        r#"
        INSERT INTO enrollments (user_id, batch_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, batch_id) DO UPDATE SET
            expires_at = GREATEST(enrollments.expires_at, EXCLUDED.expires_at)
        "#,
    )
    .bind(user_id)
    .bind(coupon.batch_id)
    .bind(granted)
    .execute(&mut *tx)
    .await?;

    let synced = sync_enrollment_expiry(&mut tx, user_id, coupon.batch_id).await?;

    let (workshop_title,): (String,) = sqlx::query_as(
        "SELECT w.title FROM batches b JOIN workshops w ON w.id = b.workshop_id WHERE b.id = $1",
    )
    .bind(coupon.batch_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(user_id, coupon_id = coupon.id, batch_id = coupon.batch_id, "Coupon redeemed");

    Ok(RedeemOutcome {
        batch_id: coupon.batch_id,
        workshop_title,
        expires_at: synced.unwrap_or(granted),
    })
}

/// Sets the enrollment's expiry to the latest fixed coupon date of the
/// user/batch. Does nothing when there is no enrollment or no fixed date.
/// Returns the expiry that was written.
pub async fn sync_enrollment_expiry(
    conn: &mut PgConnection,
    user_id: i64,
    batch_id: i64,
) -> Result<Option<DateTime<Utc>>, AppError> {
    let coupons = sqlx::query_as::<_, Coupon>(&format!(
        "SELECT {COUPON_COLUMNS} FROM coupons WHERE assigned_to = $1 AND batch_id = $2"
    ))
    .bind(user_id)
    .bind(batch_id)
    .fetch_all(&mut *conn)
    .await?;

    let Some(max_expiry) = max_fixed_expiry(&coupons) else {
        return Ok(None);
    };

    let updated = sqlx::query(
        "UPDATE enrollments SET expires_at = $3 WHERE user_id = $1 AND batch_id = $2",
    )
    .bind(user_id)
    .bind(batch_id)
    .bind(max_expiry)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    tracing::debug!(user_id, batch_id, %max_expiry, "Enrollment expiry synced from coupons");
    Ok(Some(max_expiry))
}

pub fn payment_records(coupons: &[Coupon]) -> Vec<PaymentRecord> {
    coupons
        .iter()
        .map(|c| PaymentRecord {
            amount: c.payment_amount.clone(),
            date: c.payment_date,
            valid_from: c.enrollment_valid_from,
            valid_until: c.enrollment_valid_until,
            next_due: c.next_payment_date,
        })
        .collect()
}

/// Status shown next to a coupon in the payment history.
pub fn coupon_status(
    valid_until: Option<NaiveDate>,
    valid_days: Option<i32>,
    is_used: bool,
    today: NaiveDate,
) -> &'static str {
    match (valid_until, valid_days) {
        (Some(until), _) if until >= today => "Active",
        (None, Some(_)) if is_used => "Redeemed",
        (None, Some(_)) => "Unused",
        _ => "Expired",
    }
}

pub fn payment_history(rows: Vec<CouponHistoryRow>, today: NaiveDate) -> Vec<PaymentHistoryEntry> {
    rows.into_iter()
        .map(|row| PaymentHistoryEntry {
            status: coupon_status(row.enrollment_valid_until, row.valid_days, row.is_used, today),
            program: row.workshop_title,
            batch: row.batch_name,
            amount: row.payment_amount,
            date: row.payment_date.unwrap_or_else(|| row.created_at.date_naive()),
            valid_from: row.enrollment_valid_from,
            valid_until: row.enrollment_valid_until,
            code: row.code,
        })
        .collect()
}

/// Validity and payment summary for each enrollment.
pub async fn subscription_info(
    pool: &PgPool,
    user_id: i64,
    enrollments: &[EnrollmentDetail],
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionInfo>, AppError> {
    let mut info = Vec::with_capacity(enrollments.len());
    for enrollment in enrollments {
        let coupons = crate::services::access::coupons_for(pool, user_id, enrollment.batch_id).await?;
        info.push(SubscriptionInfo {
            program: enrollment.workshop_title.clone(),
            batch: enrollment.batch_name.clone(),
            status: if enrollment.is_active(now) { "Active" } else { "Expired" },
            expires_at: enrollment.expires_at,
            joined_at: enrollment.enrolled_at,
            history: payment_records(&coupons),
        });
    }
    Ok(info)
}

pub async fn enrollments_for(pool: &PgPool, user_id: i64) -> Result<Vec<EnrollmentDetail>, AppError> {
    let rows = sqlx::query_as::<_, EnrollmentDetail>(
        r#"
        SELECT e.id, e.user_id, e.batch_id, b.name AS batch_name, w.title AS workshop_title,
               e.enrolled_at, e.expires_at
        FROM enrollments e
        JOIN batches b ON b.id = e.batch_id
        JOIN workshops w ON w.id = b.workshop_id
        WHERE e.user_id = $1
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Enrollments that pass the coupon reconciliation rule right now.
pub async fn valid_enrollments(
    pool: &PgPool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<EnrollmentDetail>, AppError> {
    let mut valid = Vec::new();
    for enrollment in enrollments_for(pool, user_id).await? {
        if !enrollment.is_active(now) {
            continue;
        }
        let coupons = crate::services::access::coupons_for(pool, user_id, enrollment.batch_id).await?;
        if crate::services::access::enrollment_valid(enrollment.expires_at, &coupons, now) {
            valid.push(enrollment);
        }
    }
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn coupon() -> Coupon {
        Coupon {
            id: 7,
            code: "ABCDEF123456".to_string(),
            batch_id: 3,
            assigned_to: None,
            valid_days: Some(30),
            enrollment_valid_from: None,
            enrollment_valid_until: None,
            payment_amount: Some(BigDecimal::from(1500)),
            payment_date: Some(date(2025, 6, 1)),
            next_payment_date: None,
            is_used: false,
            created_at: now(),
        }
    }

    #[test]
    fn past_dated_coupon_is_rejected() {
        let mut c = coupon();
        c.enrollment_valid_until = Some(date(2025, 6, 14));
        assert_eq!(check_redeemable(&c, 1, now().date_naive()), Err(RedeemError::Expired));

        c.enrollment_valid_until = Some(date(2025, 6, 15));
        assert_eq!(check_redeemable(&c, 1, now().date_naive()), Ok(()));
    }

    #[test]
    fn used_and_foreign_coupons_are_rejected() {
        let mut c = coupon();
        c.is_used = true;
        assert_eq!(check_redeemable(&c, 1, now().date_naive()), Err(RedeemError::AlreadyUsed));

        let mut c = coupon();
        c.assigned_to = Some(2);
        assert_eq!(check_redeemable(&c, 1, now().date_naive()), Err(RedeemError::AssignedToOther));
        assert_eq!(check_redeemable(&c, 2, now().date_naive()), Ok(()));
    }

    #[test]
    fn fixed_date_wins_over_valid_days() {
        let mut c = coupon();
        c.enrollment_valid_until = Some(date(2025, 7, 1));
        assert_eq!(initial_expiry(&c, now()), end_of_day(date(2025, 7, 1)));
    }

    #[test]
    fn rolling_expiry_counts_from_now() {
        let mut c = coupon();
        c.valid_days = Some(10);
        assert_eq!(initial_expiry(&c, now()), now() + Duration::days(10));

        c.valid_days = None;
        assert_eq!(initial_expiry(&c, now()), now() + Duration::days(30));
    }

    #[test]
    fn max_fixed_expiry_takes_latest_date() {
        let mut a = coupon();
        a.enrollment_valid_until = Some(date(2025, 7, 1));
        let mut b = coupon();
        b.enrollment_valid_until = Some(date(2025, 9, 30));
        let c = coupon();

        assert_eq!(max_fixed_expiry(&[a, b, c.clone()]), Some(end_of_day(date(2025, 9, 30))));
        assert_eq!(max_fixed_expiry(&[c]), None);
    }

    #[test]
    fn end_of_day_is_last_microsecond() {
        let eod = end_of_day(date(2025, 1, 31));
        assert_eq!(eod.date_naive(), date(2025, 1, 31));
        assert_eq!((eod + Duration::microseconds(1)).date_naive(), date(2025, 2, 1));
    }

    #[test]
    fn generated_codes_are_twelve_upper_chars() {
        let code = generate_coupon_code();
        assert_eq!(code.len(), 12);
        assert_eq!(code, code.to_uppercase());
        assert_ne!(code, generate_coupon_code());
    }

    #[test]
    fn coupon_status_labels() {
        let today = date(2025, 6, 15);
        assert_eq!(coupon_status(Some(date(2025, 6, 15)), None, true, today), "Active");
        assert_eq!(coupon_status(Some(date(2025, 6, 1)), Some(30), true, today), "Expired");
        assert_eq!(coupon_status(None, Some(30), true, today), "Redeemed");
        assert_eq!(coupon_status(None, Some(30), false, today), "Unused");
        assert_eq!(coupon_status(None, None, true, today), "Expired");
    }

    #[test]
    fn normalizes_codes() {
        assert_eq!(normalize_coupon_code("  abcd-12 "), "ABCD-12");
    }
}
