// src/handlers/training.rs

use std::collections::BTreeMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use validator::Validate;

use crate::{
    error::AppError,
    models::training::{CalendarParams, CouponHistoryRow, RedeemCouponRequest},
    services::{
        calendar::{self, EventStatus},
        enrollment,
    },
    utils::jwt::Claims,
};

/// Redeems an enrollment coupon for the caller.
pub async fn redeem_coupon(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RedeemCouponRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let outcome = enrollment::redeem_coupon(&pool, user_id, &payload.coupon_code, Utc::now()).await?;

    Ok(Json(json!({
        "message": format!("Success! You are now enrolled in {}.", outcome.workshop_title),
        "batch_id": outcome.batch_id,
        "expires_at": outcome.expires_at,
    })))
}

#[derive(Debug, FromRow)]
struct CalendarRow {
    id: i64,
    batch_id: i64,
    batch_name: String,
    topic: String,
    description: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    attended: bool,
}

#[derive(Debug, Serialize)]
struct CalendarEvent {
    id: i64,
    batch_id: i64,
    batch: String,
    topic: String,
    description: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: EventStatus,
}

fn events_by_day(rows: Vec<CalendarRow>, now: DateTime<Utc>) -> BTreeMap<u32, Vec<CalendarEvent>> {
    let mut days: BTreeMap<u32, Vec<CalendarEvent>> = BTreeMap::new();
    for row in rows {
        days.entry(row.start_time.day()).or_default().push(CalendarEvent {
            status: calendar::event_status(row.attended, row.end_time, now),
            id: row.id,
            batch_id: row.batch_id,
            batch: row.batch_name,
            topic: row.topic,
            description: row.description,
            start_time: row.start_time,
            end_time: row.end_time,
        });
    }
    days
}

/// Training gatekeeper and monthly class calendar.
pub async fn program_calendar(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<CalendarParams>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let valid = enrollment::valid_enrollments(&pool, user_id, now).await?;
    if valid.is_empty() {
        let all = enrollment::enrollments_for(&pool, user_id).await?;
        let info = enrollment::subscription_info(&pool, user_id, &all, now).await?;
        return Ok(Json(json!({
            "enrolled": false,
            "subscription_info": info,
        })));
    }

    let (year, month) = calendar::resolve_month(params.year, params.month, now.date_naive());
    let (start, end) = calendar::month_bounds(year, month)
        .ok_or_else(|| AppError::BadRequest("Invalid month".to_string()))?;
    let batch_ids: Vec<i64> = valid.iter().map(|e| e.batch_id).collect();

    let rows = sqlx::query_as::<_, CalendarRow>(
        r#"
        SELECT cs.id, cs.batch_id, b.name AS batch_name, cs.topic, cs.description,
               cs.start_time, cs.end_time,
               EXISTS (
                   SELECT 1 FROM attendances at
                   WHERE at.class_schedule_id = cs.id AND at.user_id = $1
               ) AS attended
        FROM class_schedules cs
        JOIN batches b ON b.id = cs.batch_id
        WHERE cs.batch_id = ANY($2)
          AND cs.start_time >= $3 AND cs.start_time < $4
        ORDER BY cs.start_time
        "#,
    )
    .bind(user_id)
    .bind(&batch_ids)
    .bind(start)
    .bind(end)
    .fetch_all(&pool)
    .await?;

    let (prev_year, prev_month) = calendar::previous_month(year, month);
    let (next_year, next_month) = calendar::next_month(year, month);
    let subscriptions = enrollment::subscription_info(&pool, user_id, &valid, now).await?;

    Ok(Json(json!({
        "enrolled": true,
        "year": year,
        "month": month,
        "month_name": calendar::month_name(month),
        "weeks": calendar::month_grid(year, month),
        "events": events_by_day(rows, now),
        "prev": { "year": prev_year, "month": prev_month },
        "next": { "year": next_year, "month": next_month },
        "subscription_info": subscriptions,
    })))
}

/// Records attendance (once) and hands out the meeting link.
pub async fn join_class(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(class_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let class: Option<(i64, Option<String>)> =
        sqlx::query_as("SELECT batch_id, meeting_link FROM class_schedules WHERE id = $1")
            .bind(class_id)
            .fetch_optional(&pool)
            .await?;
    let (batch_id, meeting_link) = class.ok_or_else(|| AppError::NotFound("Class not found".to_string()))?;

    let enrolled = enrollment::valid_enrollments(&pool, user_id, now)
        .await?
        .iter()
        .any(|e| e.batch_id == batch_id);
    if !enrolled {
        return Err(AppError::Forbidden(
            "You are not enrolled in this batch or your access has expired.".to_string(),
        ));
    }

    let link = meeting_link
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("The meeting link is not available yet.".to_string()))?;

    let recorded = sqlx::query(
        r#"
        INSERT INTO attendances (user_id, class_schedule_id, joined_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, class_schedule_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(class_id)
    .bind(now)
    .execute(&pool)
    .await?;

    if recorded.rows_affected() > 0 {
        tracing::info!(user_id, class_id, "Attendance recorded");
    }

    Ok(Json(json!({ "meeting_link": link })))
}

/// Coupons assigned to the caller, newest first.
pub async fn payment_history(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let rows = sqlx::query_as::<_, CouponHistoryRow>(
        r#"
        SELECT c.code, b.name AS batch_name, w.title AS workshop_title, c.valid_days,
               c.enrollment_valid_from, c.enrollment_valid_until, c.payment_amount,
               c.payment_date, c.is_used, c.created_at
        FROM coupons c
        JOIN batches b ON b.id = c.batch_id
        JOIN workshops w ON w.id = b.workshop_id
        WHERE c.assigned_to = $1
        ORDER BY c.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(enrollment::payment_history(rows, Utc::now().date_naive())))
}

/// Every enrollment of the caller with its validity and payments.
pub async fn subscriptions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let all = enrollment::enrollments_for(&pool, user_id).await?;
    let info = enrollment::subscription_info(&pool, user_id, &all, now).await?;

    Ok(Json(info))
}
