use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    auth::{mechanic_validator, AuthUser},
    db::{fetch_appointment_detail, log_activity},
    error::AppError,
    models::{
        AppointmentDetailRow, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_CONFIRMED,
        STATUS_PENDING,
    },
    state::{AppState, ServerEvent},
    workflow::appointments,
};

#[derive(Serialize)]
struct AppointmentView {
    id: String,
    client_name: Option<String>,
    vehicle: Option<String>,
    license_plate: Option<String>,
    service_name: Option<String>,
    date: String,
    time: String,
    status: String,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/mechanic")
            .wrap(HttpAuthentication::basic(mechanic_validator))
            .service(web::resource("/stats").route(web::get().to(stats)))
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}/status")
                    .route(web::post().to(update_status)),
            ),
    );
}

async fn stats(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let total = count(&state, "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ?", &auth.id).await?;
    let pending = count(
        &state,
        "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ? AND status = 'pending'",
        &auth.id,
    )
    .await?;
    let confirmed = count(
        &state,
        "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ? AND status = 'confirmed'",
        &auth.id,
    )
    .await?;
    let completed = count(
        &state,
        "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ? AND status = 'completed'",
        &auth.id,
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "total": total,
        "pending": pending,
        "confirmed": confirmed,
        "completed": completed,
    })))
}

async fn list_appointments(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let rows = appointments::list_for_mechanic(&state.db, &auth.id).await?;
    let views: Vec<AppointmentView> = rows.into_iter().map(to_view).collect();
    Ok(HttpResponse::Ok().json(views))
}

/// A mechanic may update their own appointments and may claim an
/// unassigned one by confirming it.
async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    payload: web::Json<StatusPayload>,
) -> Result<HttpResponse, AppError> {
    let appointment_id = path.into_inner();
    let status = payload.into_inner().status;
    let allowed = [STATUS_PENDING, STATUS_CONFIRMED, STATUS_COMPLETED, STATUS_CANCELLED];
    if !allowed.contains(&status.as_str()) {
        return Err(AppError::validation(format!(
            "Status must be one of: {}",
            allowed.join(", ")
        )));
    }

    let current = appointments::require_appointment(&state.db, &appointment_id).await?;
    let can_edit = current.mechanic_id.is_none()
        || current.mechanic_id.as_deref() == Some(auth.id.as_str());
    if !can_edit {
        return Ok(HttpResponse::Forbidden().json(json!({
            "error": { "code": "FORBIDDEN", "message": "Not allowed" }
        })));
    }

    if current.mechanic_id.is_none() && status == STATUS_CONFIRMED {
        appointments::assign_mechanic(&state.db, &appointment_id, Some(&auth.id)).await?;
    }
    appointments::update_status(&state.db, &appointment_id, &status).await?;

    log_activity(
        &state.db,
        "mechanic_status_update",
        &format!("{} set appointment {} to {}.", auth.name, appointment_id, status),
        Some(&auth.id),
        Some(&appointment_id),
    )
    .await;

    if let Some(row) = fetch_appointment_detail(&state.db, &appointment_id).await {
        let _ = state
            .events
            .send(ServerEvent::from_row("appointment_updated", row.clone()));
        return Ok(HttpResponse::Ok().json(to_view(row)));
    }

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

fn to_view(row: AppointmentDetailRow) -> AppointmentView {
    let vehicle = match (&row.vehicle_make, &row.vehicle_model) {
        (Some(make), Some(model)) => Some(format!("{make} {model}")),
        _ => None,
    };
    AppointmentView {
        id: row.id,
        client_name: row.client_name,
        vehicle,
        license_plate: row.license_plate,
        service_name: row.service_name,
        date: row.date,
        time: row.time,
        status: row.status,
        notes: row.notes,
    }
}

async fn count(state: &web::Data<AppState>, query: &str, param: &str) -> Result<i64, AppError> {
    Ok(sqlx::query_scalar::<_, i64>(query)
        .bind(param)
        .fetch_one(&state.db)
        .await?)
}
