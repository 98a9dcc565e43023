use std::{env, fs, path::Path};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    auth::{hash_password, new_id},
    models::{AppointmentDetailRow, ROLE_ADMIN},
};

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else if let Some(path) = db_url.strip_prefix("sqlite:") {
        Some(path)
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_admin(pool).await?;
    seed_services(pool).await?;
    Ok(())
}

/// Appends an audit entry. Best effort: a failed audit write never fails
/// the operation it describes.
pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let _ = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .bind(appointment_id)
    .execute(pool)
    .await;
}

pub async fn fetch_appointment_detail(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Option<AppointmentDetailRow> {
    sqlx::query_as::<_, AppointmentDetailRow>(
        r#"SELECT a.id, a.client_id, a.vehicle_id, a.service_id, a.mechanic_id,
                  a.date, a.time, a.status, a.notes, a.invoice_id,
                  c.name AS client_name, c.email AS client_email,
                  v.make AS vehicle_make, v.model AS vehicle_model, v.license_plate,
                  s.name AS service_name, s.price_cents AS service_price_cents,
                  m.name AS mechanic_name
           FROM appointments a
           LEFT JOIN clients c ON a.client_id = c.id
           LEFT JOIN vehicles v ON a.vehicle_id = v.id
           LEFT JOIN services s ON a.service_id = s.id
           LEFT JOIN users m ON a.mechanic_id = m.id
           WHERE a.id = ?
           LIMIT 1"#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
    .unwrap_or(None)
}

async fn seed_admin(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing =
        sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
            .bind(ROLE_ADMIN)
            .fetch_optional(pool)
            .await?;

    if existing.is_some() {
        return Ok(());
    }

    let email = env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@garagedesk.local".to_string());
    let password = env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let name = env::var("ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_string());

    if password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, NULL, ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(email)
    .bind(name)
    .bind(ROLE_ADMIN)
    .bind(password_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM services LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let catalog: &[(&str, &str, i64, i64)] = &[
        ("Oil Change", "Engine oil and filter change", 5000, 30),
        ("Tire Rotation & Balancing", "Rotation and balancing of all four wheels", 4000, 45),
        ("Wheel Alignment", "Computerized steering alignment", 6000, 60),
        ("Brake Inspection", "Brake system inspection and adjustment", 3500, 30),
        ("Tire Replacement", "Professional fitting of new and used tires", 8000, 60),
        ("Tire Repair", "Punctures, sidewall cuts and minor damage", 1500, 30),
        ("General Maintenance", "Full suspension system check", 6000, 90),
        ("Vehicle Inspection", "Roadworthiness and emissions check", 12000, 90),
    ];

    let now = Utc::now().to_rfc3339();
    for (name, description, price_cents, duration_minutes) in catalog {
        sqlx::query(
            r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(description)
        .bind(price_cents)
        .bind(duration_minutes)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}
