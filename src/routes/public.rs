use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

use crate::{
    db::{fetch_appointment_detail, log_activity},
    error::AppError,
    models::{AppointmentDetailRow, ServiceRow, UserRow, ROLE_MECHANIC},
    state::{AppState, ServerEvent},
    workflow::{appointments, ratings},
};

#[derive(Serialize)]
struct AppointmentView {
    id: String,
    client_id: String,
    client_name: Option<String>,
    vehicle_id: String,
    vehicle: Option<String>,
    license_plate: Option<String>,
    service_id: Option<String>,
    service_name: Option<String>,
    mechanic_id: Option<String>,
    mechanic_name: Option<String>,
    date: String,
    time: String,
    status: String,
    notes: Option<String>,
    invoice_id: Option<String>,
}

#[derive(Serialize)]
struct MechanicSummary {
    id: String,
    name: String,
    average_rating: f64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/api/services").route(web::get().to(list_services)))
        .service(web::resource("/api/mechanics/available").route(web::get().to(available_mechanics)))
        .service(web::resource("/api/appointments").route(web::post().to(create_appointment)))
        .service(web::resource("/api/ratings/token/{token}").route(web::get().to(rating_token_info)))
        .service(web::resource("/api/ratings/submit").route(web::post().to(submit_rating)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, ServiceRow>("SELECT * FROM services ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn available_mechanics(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM users WHERE role = ? AND active = 1 ORDER BY name",
    )
    .bind(ROLE_MECHANIC)
    .fetch_all(&state.db)
    .await?;

    let mut mechanics = Vec::with_capacity(rows.len());
    for user in rows {
        let average_rating = ratings::average_for_mechanic(&state.db, &user.id).await?;
        mechanics.push(MechanicSummary {
            id: user.id,
            name: user.name,
            average_rating,
        });
    }
    Ok(HttpResponse::Ok().json(mechanics))
}

async fn create_appointment(
    state: web::Data<AppState>,
    payload: web::Json<appointments::NewAppointment>,
) -> Result<HttpResponse, AppError> {
    let created = appointments::create(&state.db, payload.into_inner()).await?;

    log_activity(
        &state.db,
        "appointment_created",
        &format!("New appointment requested for {}.", created.date),
        None,
        Some(&created.id),
    )
    .await;

    if let Some(row) = fetch_appointment_detail(&state.db, &created.id).await {
        let _ = state
            .events
            .send(ServerEvent::from_row("appointment_created", row.clone()));
        return Ok(HttpResponse::Created().json(to_view(row)));
    }

    Ok(HttpResponse::Created().json(json!({ "id": created.id })))
}

async fn rating_token_info(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let token = path.into_inner();
    let info = ratings::token_info(&state.db, &token).await?;
    Ok(HttpResponse::Ok().json(info))
}

async fn submit_rating(
    state: web::Data<AppState>,
    payload: web::Json<ratings::RatingSubmission>,
) -> Result<HttpResponse, AppError> {
    let rating = ratings::submit(&state.db, payload.into_inner()).await?;

    log_activity(
        &state.db,
        "rating_submitted",
        &format!("Rating of {} submitted for mechanic.", rating.rating),
        None,
        Some(&rating.appointment_id),
    )
    .await;

    Ok(HttpResponse::Created().json(rating))
}

fn to_view(row: AppointmentDetailRow) -> AppointmentView {
    let vehicle = match (&row.vehicle_make, &row.vehicle_model) {
        (Some(make), Some(model)) => Some(format!("{make} {model}")),
        _ => None,
    };
    AppointmentView {
        id: row.id,
        client_id: row.client_id,
        client_name: row.client_name,
        vehicle_id: row.vehicle_id,
        vehicle,
        license_plate: row.license_plate,
        service_id: row.service_id,
        service_name: row.service_name,
        mechanic_id: row.mechanic_id,
        mechanic_name: row.mechanic_name,
        date: row.date,
        time: row.time,
        status: row.status,
        notes: row.notes,
        invoice_id: row.invoice_id,
    }
}
