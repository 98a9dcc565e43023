use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::models::AppointmentDetailRow;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: Option<String>,
    pub status: Option<String>,
    pub client_name: Option<String>,
    pub vehicle: Option<String>,
    pub service: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub mechanic_id: Option<String>,
    pub mechanic_name: Option<String>,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: AppointmentDetailRow) -> Self {
        let vehicle = match (row.vehicle_make, row.vehicle_model) {
            (Some(make), Some(model)) => Some(format!("{make} {model}")),
            _ => None,
        };
        Self {
            kind: kind.to_string(),
            appointment_id: Some(row.id),
            status: Some(row.status),
            client_name: row.client_name,
            vehicle,
            service: row.service_name,
            date: Some(row.date),
            time: Some(row.time),
            mechanic_id: row.mechanic_id,
            mechanic_name: row.mechanic_name,
        }
    }
}
