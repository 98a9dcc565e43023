use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::AppError,
    models::{InvoiceRow, InvoiceServiceLine, INVOICE_PAID, INVOICE_PENDING, STATUS_COMPLETED},
};

/// Joined row for invoice generation. INNER JOINs: an appointment without
/// a resolvable client, vehicle and service cannot be invoiced and reads
/// as absent, matching the lookup the generation path has always used.
#[derive(Debug, sqlx::FromRow)]
struct InvoiceSourceRow {
    status: String,
    invoice_id: Option<String>,
    client_name: String,
    client_email: String,
    make: String,
    model: String,
    license_plate: String,
    service_id: String,
    service_name: String,
    service_price_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub client_name: String,
    pub client_email: String,
    pub vehicle_info: String,
    pub services: Vec<InvoiceServiceLine>,
    pub total_cents: Option<i64>,
    pub status: Option<String>,
}

/// Derives an invoice from a completed appointment: a denormalized
/// snapshot of the linked service's name and price at generation time,
/// written together with the appointment link-back in one transaction.
/// A second call for the same appointment fails with a conflict.
pub async fn generate_from_appointment(
    pool: &SqlitePool,
    appointment_id: &str,
) -> Result<InvoiceRow, AppError> {
    let mut tx = pool.begin().await?;

    let source = sqlx::query_as::<_, InvoiceSourceRow>(
        r#"SELECT a.status, a.invoice_id,
                  c.name AS client_name, c.email AS client_email,
                  v.make, v.model, v.license_plate,
                  s.id AS service_id, s.name AS service_name, s.price_cents AS service_price_cents
           FROM appointments a
           JOIN clients c ON a.client_id = c.id
           JOIN vehicles v ON a.vehicle_id = v.id
           JOIN services s ON a.service_id = s.id
           WHERE a.id = ?
           LIMIT 1"#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Appointment"))?;

    if source.status != STATUS_COMPLETED {
        return Err(AppError::validation(
            "Appointment must be completed to generate invoice",
        ));
    }
    if source.invoice_id.is_some() {
        return Err(AppError::conflict("Appointment already has an invoice"));
    }

    let invoice_id = format!("INV-{}", Utc::now().timestamp_millis());
    let vehicle_info = format!(
        "{} {} ({})",
        source.make, source.model, source.license_plate
    );
    let services = vec![InvoiceServiceLine {
        id: source.service_id,
        name: source.service_name,
        price_cents: source.service_price_cents,
    }];
    let total_cents = source.service_price_cents;
    let services_json = serde_json::to_string(&services)
        .map_err(|_| AppError::validation("Invalid invoice service lines"))?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO invoices (id, client_name, client_email, vehicle_info, services, total_cents, status, date, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&invoice_id)
    .bind(&source.client_name)
    .bind(&source.client_email)
    .bind(&vehicle_info)
    .bind(&services_json)
    .bind(total_cents)
    .bind(INVOICE_PAID)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE appointments SET invoice_id = ?, updated_at = ? WHERE id = ?")
        .bind(&invoice_id)
        .bind(&now)
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    require_invoice(pool, &invoice_id).await
}

pub async fn create(pool: &SqlitePool, input: NewInvoice) -> Result<InvoiceRow, AppError> {
    if input.client_name.trim().is_empty() {
        return Err(AppError::validation("Client name is required"));
    }
    if input.client_email.trim().is_empty() {
        return Err(AppError::validation("Client email is required"));
    }
    if input.services.is_empty() {
        return Err(AppError::validation("At least one service line is required"));
    }
    let status = input.status.as_deref().unwrap_or(INVOICE_PENDING);
    if status != INVOICE_PENDING && status != INVOICE_PAID {
        return Err(AppError::validation("Status must be one of: pending, paid"));
    }

    let total_cents = input
        .total_cents
        .unwrap_or_else(|| input.services.iter().map(|line| line.price_cents).sum());
    let services_json = serde_json::to_string(&input.services)
        .map_err(|_| AppError::validation("Invalid invoice service lines"))?;
    let id = new_id();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO invoices (id, client_name, client_email, vehicle_info, services, total_cents, status, date, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(input.client_name.trim())
    .bind(input.client_email.trim())
    .bind(&input.vehicle_info)
    .bind(&services_json)
    .bind(total_cents)
    .bind(status)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    require_invoice(pool, &id).await
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<InvoiceRow>, AppError> {
    let rows = sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices ORDER BY date DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<InvoiceRow, AppError> {
    require_invoice(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: &str) -> Result<(), AppError> {
    require_invoice(pool, id).await?;
    sqlx::query("DELETE FROM invoices WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn require_invoice(pool: &SqlitePool, id: &str) -> Result<InvoiceRow, AppError> {
    sqlx::query_as::<_, InvoiceRow>("SELECT * FROM invoices WHERE id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Invoice"))
}
