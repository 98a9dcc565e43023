use std::env;

use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::{unique_violation, AppError},
    models::{RatingRow, STATUS_COMPLETED},
    workflow::appointments::require_appointment,
};

const TOKEN_TTL_DAYS: i64 = 30;
const MAX_COMMENT_LEN: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct RatingLink {
    pub token: String,
    pub url: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub appointment_id: String,
    pub mechanic_id: String,
    pub mechanic_name: String,
    pub client_name: String,
    pub vehicle_info: String,
    pub service_name: Option<String>,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingSubmission {
    pub token: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct LiveTokenRow {
    id: String,
    appointment_id: String,
    mechanic_id: Option<String>,
}

/// Issues a single-use rating token for a completed appointment with an
/// assigned mechanic. More than one live token may exist per appointment;
/// the rating uniqueness constraint at submission time is the guard that
/// matters.
pub async fn generate_link(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<RatingLink, AppError> {
    let appointment = require_appointment(pool, appointment_id).await?;

    if appointment.status != STATUS_COMPLETED {
        return Err(AppError::validation(
            "Appointment must be completed to generate rating link",
        ));
    }
    if appointment.mechanic_id.is_none() {
        return Err(AppError::validation(
            "Appointment does not have an assigned mechanic",
        ));
    }
    if rating_exists(pool, appointment_id).await? {
        return Err(AppError::conflict("This appointment has already been rated"));
    }

    let token = generate_token();
    let expires_at = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).to_rfc3339();
    sqlx::query(
        r#"INSERT INTO rating_tokens (id, appointment_id, token, expires_at, used, created_at)
           VALUES (?, ?, ?, ?, 0, ?)"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(&token)
    .bind(&expires_at)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let base = env::var("RATING_URL_BASE").unwrap_or_else(|_| "http://localhost:5173".to_string());
    let url = format!("{}/rate/{}", base.trim_end_matches('/'), token);

    Ok(RatingLink {
        token,
        url,
        expires_at,
    })
}

/// Public metadata behind a token, for rendering the rating form. Invalid,
/// already-used and expired tokens all read as absent; the response does
/// not say which.
pub async fn token_info(pool: &SqlitePool, token: &str) -> Result<TokenInfo, AppError> {
    sqlx::query_as::<_, TokenInfo>(
        r#"SELECT a.id AS appointment_id, a.date, a.time,
                  m.id AS mechanic_id, m.name AS mechanic_name,
                  c.name AS client_name,
                  v.make || ' ' || v.model AS vehicle_info,
                  s.name AS service_name
           FROM rating_tokens rt
           JOIN appointments a ON rt.appointment_id = a.id
           JOIN clients c ON a.client_id = c.id
           JOIN vehicles v ON a.vehicle_id = v.id
           LEFT JOIN services s ON a.service_id = s.id
           JOIN users m ON a.mechanic_id = m.id
           WHERE rt.token = ? AND rt.used = 0 AND rt.expires_at > ?
           LIMIT 1"#,
    )
    .bind(token)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Rating token"))
}

/// Records the rating and consumes the token in one transaction, so a
/// crash can no longer leave a live token behind a written rating. The
/// unique constraint on the appointment id is the authoritative duplicate
/// guard regardless of how many tokens were issued.
pub async fn submit(pool: &SqlitePool, submission: RatingSubmission) -> Result<RatingRow, AppError> {
    if !(1..=5).contains(&submission.rating) {
        return Err(AppError::validation("Rating must be between 1 and 5"));
    }
    if submission
        .comment
        .as_deref()
        .is_some_and(|value| value.len() > MAX_COMMENT_LEN)
    {
        return Err(AppError::validation(
            "Comments must not exceed 1000 characters",
        ));
    }

    let mut tx = pool.begin().await?;

    let live = sqlx::query_as::<_, LiveTokenRow>(
        r#"SELECT rt.id, rt.appointment_id, a.mechanic_id
           FROM rating_tokens rt
           JOIN appointments a ON rt.appointment_id = a.id
           WHERE rt.token = ? AND rt.used = 0 AND rt.expires_at > ?
           LIMIT 1"#,
    )
    .bind(&submission.token)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Rating token"))?;

    let mechanic_id = live.mechanic_id.ok_or_else(|| {
        AppError::validation("Appointment does not have an assigned mechanic")
    })?;

    let existing = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM ratings WHERE appointment_id = ? LIMIT 1",
    )
    .bind(&live.appointment_id)
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        return Err(AppError::conflict("This appointment has already been rated"));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO ratings (id, appointment_id, mechanic_id, rating, comment, client_name, client_email, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(&live.appointment_id)
    .bind(&mechanic_id)
    .bind(submission.rating)
    .bind(&submission.comment)
    .bind(&submission.client_name)
    .bind(&submission.client_email)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(|err| unique_violation(err, "This appointment has already been rated"))?;

    sqlx::query("UPDATE rating_tokens SET used = 1 WHERE id = ?")
        .bind(&live.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    sqlx::query_as::<_, RatingRow>("SELECT * FROM ratings WHERE id = ? LIMIT 1")
        .bind(&id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Rating"))
}

pub async fn average_for_mechanic(
    pool: &SqlitePool,
    mechanic_id: &str,
) -> Result<f64, AppError> {
    let avg = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(AVG(rating), 0.0) FROM ratings WHERE mechanic_id = ?",
    )
    .bind(mechanic_id)
    .fetch_one(pool)
    .await?;
    Ok(avg)
}

async fn rating_exists(pool: &SqlitePool, appointment_id: &str) -> Result<bool, AppError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM ratings WHERE appointment_id = ? LIMIT 1",
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
