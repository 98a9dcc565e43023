use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MECHANIC: &str = "mechanic";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_CANCELLED: &str = "cancelled";

pub const APPOINTMENT_STATUSES: [&str; 4] = [
    STATUS_PENDING,
    STATUS_CONFIRMED,
    STATUS_COMPLETED,
    STATUS_CANCELLED,
];

pub const INVOICE_PENDING: &str = "pending";
pub const INVOICE_PAID: &str = "paid";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub active: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ClientRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub duration_minutes: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VehicleRow {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i64,
    pub license_plate: String,
    pub client_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub client_id: String,
    pub vehicle_id: String,
    pub service_id: Option<String>,
    pub mechanic_id: Option<String>,
    pub date: String,
    pub time: String,
    pub status: String,
    pub notes: Option<String>,
    pub invoice_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Appointment joined with the names a caller actually wants to show:
/// client, vehicle, service and mechanic resolved in one query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentDetailRow {
    pub id: String,
    pub client_id: String,
    pub vehicle_id: String,
    pub service_id: Option<String>,
    pub mechanic_id: Option<String>,
    pub date: String,
    pub time: String,
    pub status: String,
    pub notes: Option<String>,
    pub invoice_id: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub license_plate: Option<String>,
    pub service_name: Option<String>,
    pub service_price_cents: Option<i64>,
    pub mechanic_name: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub id: String,
    pub client_name: String,
    pub client_email: String,
    pub vehicle_info: String,
    pub services: String,
    pub total_cents: i64,
    pub status: String,
    pub date: String,
    pub created_at: String,
}

/// One denormalized line inside an invoice's `services` JSON column.
/// A value copy taken at generation time, never a live reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceServiceLine {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RatingRow {
    pub id: String,
    pub appointment_id: String,
    pub mechanic_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RatingTokenRow {
    pub id: String,
    pub appointment_id: String,
    pub token: String,
    pub expires_at: String,
    pub used: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}
