use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::{unique_violation, AppError},
    models::{AppointmentDetailRow, AppointmentRow, APPOINTMENT_STATUSES, ROLE_MECHANIC, STATUS_PENDING},
};

const MAX_NOTES_LEN: usize = 1000;

const DETAIL_COLUMNS: &str = r#"a.id, a.client_id, a.vehicle_id, a.service_id, a.mechanic_id,
       a.date, a.time, a.status, a.notes, a.invoice_id,
       c.name AS client_name, c.email AS client_email,
       v.make AS vehicle_make, v.model AS vehicle_model, v.license_plate,
       s.name AS service_name, s.price_cents AS service_price_cents,
       m.name AS mechanic_name"#;

#[derive(Debug, Clone, Deserialize)]
pub struct NewAppointment {
    pub client_id: String,
    pub vehicle_id: String,
    pub service_id: Option<String>,
    pub mechanic_id: Option<String>,
    pub date: String,
    pub time: String,
    pub notes: Option<String>,
    // Contact fields for the self-healing client insert on public bookings.
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
}

/// Creates an appointment in the `pending` state. An unknown client id is
/// healed into a minimal client record from the supplied contact fields,
/// so public bookings never fail on a missing client row.
pub async fn create(pool: &SqlitePool, input: NewAppointment) -> Result<AppointmentRow, AppError> {
    if input.client_id.trim().is_empty() {
        return Err(AppError::validation("Client ID is required"));
    }
    if input.vehicle_id.trim().is_empty() {
        return Err(AppError::validation("Vehicle ID is required"));
    }
    validate_date(&input.date)?;
    validate_time(&input.time)?;
    validate_notes(input.notes.as_deref())?;

    ensure_client(pool, &input).await?;

    let vehicle =
        sqlx::query_as::<_, (String,)>("SELECT id FROM vehicles WHERE id = ? LIMIT 1")
            .bind(&input.vehicle_id)
            .fetch_optional(pool)
            .await?;
    if vehicle.is_none() {
        return Err(AppError::validation("Invalid vehicle ID"));
    }

    if let Some(mechanic_id) = input.mechanic_id.as_deref() {
        require_mechanic(pool, mechanic_id).await?;
    }

    let id = new_id();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"INSERT INTO appointments
           (id, client_id, vehicle_id, service_id, mechanic_id, date, time, status, notes, invoice_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)"#,
    )
    .bind(&id)
    .bind(&input.client_id)
    .bind(&input.vehicle_id)
    .bind(&input.service_id)
    .bind(&input.mechanic_id)
    .bind(&input.date)
    .bind(&input.time)
    .bind(STATUS_PENDING)
    .bind(&input.notes)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    require_appointment(pool, &id).await
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<AppointmentDetailRow, AppError> {
    let query = format!(
        r#"SELECT {DETAIL_COLUMNS}
           FROM appointments a
           LEFT JOIN clients c ON a.client_id = c.id
           LEFT JOIN vehicles v ON a.vehicle_id = v.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN users m ON a.mechanic_id = m.id
           WHERE a.id = ?
           LIMIT 1"#
    );
    sqlx::query_as::<_, AppointmentDetailRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
}

pub async fn list(
    pool: &SqlitePool,
    status: Option<&str>,
) -> Result<Vec<AppointmentDetailRow>, AppError> {
    let base = format!(
        r#"SELECT {DETAIL_COLUMNS}
           FROM appointments a
           LEFT JOIN clients c ON a.client_id = c.id
           LEFT JOIN vehicles v ON a.vehicle_id = v.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN users m ON a.mechanic_id = m.id"#
    );
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, AppointmentDetailRow>(&format!(
                "{base} WHERE a.status = ? ORDER BY a.date DESC, a.time DESC"
            ))
            .bind(status)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, AppointmentDetailRow>(&format!(
                "{base} ORDER BY a.date DESC, a.time DESC"
            ))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Appointments visible to a mechanic: their own plus unassigned pending
/// requests they may claim.
pub async fn list_for_mechanic(
    pool: &SqlitePool,
    mechanic_id: &str,
) -> Result<Vec<AppointmentDetailRow>, AppError> {
    let query = format!(
        r#"SELECT {DETAIL_COLUMNS}
           FROM appointments a
           LEFT JOIN clients c ON a.client_id = c.id
           LEFT JOIN vehicles v ON a.vehicle_id = v.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN users m ON a.mechanic_id = m.id
           WHERE a.mechanic_id = ? OR (a.mechanic_id IS NULL AND a.status = ?)
           ORDER BY a.date DESC, a.time DESC"#
    );
    let rows = sqlx::query_as::<_, AppointmentDetailRow>(&query)
        .bind(mechanic_id)
        .bind(STATUS_PENDING)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Sets the appointment status. Any status may follow any other: the shop
/// relies on this for operator correction, so there is no transition guard
/// beyond the value check.
pub async fn update_status(
    pool: &SqlitePool,
    id: &str,
    status: &str,
) -> Result<AppointmentRow, AppError> {
    if !APPOINTMENT_STATUSES.contains(&status) {
        return Err(AppError::validation(format!(
            "Status must be one of: {}",
            APPOINTMENT_STATUSES.join(", ")
        )));
    }
    require_appointment(pool, id).await?;

    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    require_appointment(pool, id).await
}

/// Assigns or clears the mechanic. Clearing is always allowed; a non-null
/// id must reference an active user with the mechanic role.
pub async fn assign_mechanic(
    pool: &SqlitePool,
    id: &str,
    mechanic_id: Option<&str>,
) -> Result<AppointmentRow, AppError> {
    require_appointment(pool, id).await?;

    if let Some(mechanic_id) = mechanic_id {
        require_mechanic(pool, mechanic_id).await?;
    }

    sqlx::query("UPDATE appointments SET mechanic_id = ?, updated_at = ? WHERE id = ?")
        .bind(mechanic_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(pool)
        .await?;

    require_appointment(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: &str) -> Result<(), AppError> {
    require_appointment(pool, id).await?;
    sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn require_appointment(
    pool: &SqlitePool,
    id: &str,
) -> Result<AppointmentRow, AppError> {
    sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Appointment"))
}

async fn require_mechanic(pool: &SqlitePool, mechanic_id: &str) -> Result<(), AppError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT id FROM users WHERE id = ? AND role = ? AND active = 1 LIMIT 1",
    )
    .bind(mechanic_id)
    .bind(ROLE_MECHANIC)
    .fetch_optional(pool)
    .await?;
    if row.is_none() {
        return Err(AppError::validation("Invalid mechanic ID"));
    }
    Ok(())
}

async fn ensure_client(pool: &SqlitePool, input: &NewAppointment) -> Result<(), AppError> {
    let existing =
        sqlx::query_as::<_, (String,)>("SELECT id FROM clients WHERE id = ? LIMIT 1")
            .bind(&input.client_id)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Ok(());
    }

    let email = input
        .client_email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::validation("Client email is required when booking as a new client")
        })?;
    let name = input
        .client_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("Client");
    let phone = input.client_phone.as_deref().unwrap_or("");

    sqlx::query(
        "INSERT INTO clients (id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&input.client_id)
    .bind(name)
    .bind(email)
    .bind(phone)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .map_err(|err| unique_violation(err, "Email already exists"))?;

    Ok(())
}

fn validate_date(date: &str) -> Result<(), AppError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| AppError::validation("Date must be in YYYY-MM-DD format"))
}

fn validate_time(time: &str) -> Result<(), AppError> {
    NaiveTime::parse_from_str(time, "%H:%M")
        .map(|_| ())
        .map_err(|_| AppError::validation("Time must be in HH:MM format (24-hour)"))
}

fn validate_notes(notes: Option<&str>) -> Result<(), AppError> {
    if notes.is_some_and(|value| value.len() > MAX_NOTES_LEN) {
        return Err(AppError::validation("Notes must not exceed 1000 characters"));
    }
    Ok(())
}
