use actix_web::{web, HttpResponse};
use actix_web_httpauth::middleware::HttpAuthentication;
use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    auth::{admin_validator, hash_password, new_id, AuthUser},
    db::{fetch_appointment_detail, log_activity},
    error::{unique_violation, AppError},
    models::{
        ActivityRow, AppointmentDetailRow, ClientRow, ServiceRow, UserRow, VehicleRow,
        ROLE_MECHANIC, STATUS_CANCELLED, STATUS_COMPLETED, STATUS_CONFIRMED, STATUS_PENDING,
    },
    state::{AppState, ServerEvent},
    workflow::{appointments, invoices, ratings},
};

#[derive(Serialize)]
struct AppointmentView {
    id: String,
    client_id: String,
    client_name: Option<String>,
    client_email: Option<String>,
    vehicle_id: String,
    vehicle: Option<String>,
    license_plate: Option<String>,
    service_id: Option<String>,
    service_name: Option<String>,
    service_price_cents: Option<i64>,
    mechanic_id: Option<String>,
    mechanic_name: Option<String>,
    date: String,
    time: String,
    status: String,
    notes: Option<String>,
    invoice_id: Option<String>,
}

#[derive(Serialize)]
struct InvoiceView {
    id: String,
    client_name: String,
    client_email: String,
    vehicle_info: String,
    services: serde_json::Value,
    total_cents: i64,
    status: String,
    date: String,
}

#[derive(Serialize)]
struct MechanicView {
    id: String,
    name: String,
    email: String,
    phone: Option<String>,
    active: bool,
    total_appointments: i64,
    completed_appointments: i64,
    average_rating: f64,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
}

#[derive(Deserialize)]
struct AssignPayload {
    mechanic_id: Option<String>,
}

#[derive(Deserialize)]
struct GenerateLinkPayload {
    appointment_id: String,
}

#[derive(Deserialize)]
struct ClientPayload {
    name: String,
    email: String,
    phone: Option<String>,
}

#[derive(Deserialize)]
struct ClientUpdatePayload {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Deserialize)]
struct VehiclePayload {
    make: String,
    model: String,
    year: i64,
    license_plate: String,
    client_id: String,
}

#[derive(Deserialize)]
struct VehicleUpdatePayload {
    make: Option<String>,
    model: Option<String>,
    year: Option<i64>,
    license_plate: Option<String>,
}

#[derive(Deserialize)]
struct ServicePayload {
    name: String,
    description: Option<String>,
    price_cents: i64,
    duration_minutes: i64,
}

#[derive(Deserialize)]
struct ServiceUpdatePayload {
    name: Option<String>,
    description: Option<String>,
    price_cents: Option<i64>,
    duration_minutes: Option<i64>,
}

#[derive(Deserialize)]
struct MechanicPayload {
    name: String,
    email: String,
    phone: Option<String>,
}

#[derive(Deserialize)]
struct MechanicUpdatePayload {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

#[derive(Deserialize)]
struct ReportQuery {
    start: Option<String>,
    end: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .service(web::resource("/stats").route(web::get().to(stats)))
            .service(web::resource("/reports").route(web::get().to(reports)))
            .service(
                web::resource("/clients")
                    .route(web::get().to(list_clients))
                    .route(web::post().to(create_client)),
            )
            .service(
                web::resource("/clients/{id}")
                    .route(web::get().to(get_client))
                    .route(web::put().to(update_client))
                    .route(web::delete().to(delete_client)),
            )
            .service(
                web::resource("/clients/{id}/vehicles").route(web::get().to(vehicles_by_client)),
            )
            .service(
                web::resource("/vehicles")
                    .route(web::get().to(list_vehicles))
                    .route(web::post().to(create_vehicle)),
            )
            .service(
                web::resource("/vehicles/{id}")
                    .route(web::get().to(get_vehicle))
                    .route(web::put().to(update_vehicle))
                    .route(web::delete().to(delete_vehicle)),
            )
            .service(web::resource("/services").route(web::post().to(create_service)))
            .service(
                web::resource("/services/{id}")
                    .route(web::get().to(get_service))
                    .route(web::put().to(update_service))
                    .route(web::delete().to(delete_service)),
            )
            .service(
                web::resource("/mechanics")
                    .route(web::get().to(list_mechanics))
                    .route(web::post().to(create_mechanic)),
            )
            .service(
                web::resource("/mechanics/{id}")
                    .route(web::put().to(update_mechanic))
                    .route(web::delete().to(delete_mechanic)),
            )
            .service(
                web::resource("/mechanics/{id}/regenerate-password")
                    .route(web::post().to(regenerate_mechanic_password)),
            )
            .service(web::resource("/appointments").route(web::get().to(list_appointments)))
            .service(
                web::resource("/appointments/{id}")
                    .route(web::get().to(get_appointment))
                    .route(web::delete().to(delete_appointment)),
            )
            .service(
                web::resource("/appointments/{id}/status")
                    .route(web::post().to(update_appointment_status)),
            )
            .service(
                web::resource("/appointments/{id}/mechanic")
                    .route(web::post().to(assign_mechanic)),
            )
            .service(
                web::resource("/invoices")
                    .route(web::get().to(list_invoices))
                    .route(web::post().to(create_invoice)),
            )
            .service(
                web::resource("/invoices/{id}")
                    .route(web::get().to(get_invoice))
                    .route(web::delete().to(delete_invoice)),
            )
            .service(
                web::resource("/invoices/from-appointment/{id}")
                    .route(web::post().to(invoice_from_appointment)),
            )
            .service(
                web::resource("/ratings/generate-link")
                    .route(web::post().to(generate_rating_link)),
            ),
    );
}

async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let total = count(&state.db, "SELECT COUNT(*) FROM appointments", None).await?;
    let pending = count(
        &state.db,
        "SELECT COUNT(*) FROM appointments WHERE status = ?",
        Some(STATUS_PENDING),
    )
    .await?;
    let confirmed = count(
        &state.db,
        "SELECT COUNT(*) FROM appointments WHERE status = ?",
        Some(STATUS_CONFIRMED),
    )
    .await?;
    let completed = count(
        &state.db,
        "SELECT COUNT(*) FROM appointments WHERE status = ?",
        Some(STATUS_COMPLETED),
    )
    .await?;
    let cancelled = count(
        &state.db,
        "SELECT COUNT(*) FROM appointments WHERE status = ?",
        Some(STATUS_CANCELLED),
    )
    .await?;
    let clients = count(&state.db, "SELECT COUNT(*) FROM clients", None).await?;
    let invoices = count(&state.db, "SELECT COUNT(*) FROM invoices", None).await?;

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "appointments": {
            "total": total,
            "pending": pending,
            "confirmed": confirmed,
            "completed": completed,
            "cancelled": cancelled,
        },
        "clients": clients,
        "invoices": invoices,
        "activities": activities
            .into_iter()
            .map(|row| json!({ "message": row.message, "created_at": row.created_at }))
            .collect::<Vec<_>>(),
    })))
}

async fn reports(
    state: web::Data<AppState>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse, AppError> {
    let start = parse_report_date(query.start.as_deref(), "start")?;
    let end = parse_report_date(query.end.as_deref(), "end")?;

    #[derive(sqlx::FromRow)]
    struct Totals {
        total: i64,
        completed: i64,
        pending: i64,
        cancelled: i64,
    }
    let totals = sqlx::query_as::<_, Totals>(
        r#"SELECT COUNT(*) AS total,
                  COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                  COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                  COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled
           FROM appointments
           WHERE date >= ? AND date <= ?"#,
    )
    .bind(&start)
    .bind(&end)
    .fetch_one(&state.db)
    .await?;

    #[derive(sqlx::FromRow)]
    struct ServiceBreakdown {
        service_name: String,
        count: i64,
        revenue_cents: i64,
    }
    let services = sqlx::query_as::<_, ServiceBreakdown>(
        r#"SELECT s.name AS service_name, COUNT(a.id) AS count,
                  COALESCE(SUM(s.price_cents), 0) AS revenue_cents
           FROM appointments a
           JOIN services s ON a.service_id = s.id
           WHERE a.date >= ? AND a.date <= ? AND a.status = 'completed'
           GROUP BY s.id, s.name
           ORDER BY count DESC"#,
    )
    .bind(&start)
    .bind(&end)
    .fetch_all(&state.db)
    .await?;

    #[derive(sqlx::FromRow)]
    struct DayCount {
        date: String,
        count: i64,
    }
    let by_day = sqlx::query_as::<_, DayCount>(
        r#"SELECT date, COUNT(*) AS count
           FROM appointments
           WHERE date >= ? AND date <= ?
           GROUP BY date
           ORDER BY date"#,
    )
    .bind(&start)
    .bind(&end)
    .fetch_all(&state.db)
    .await?;

    let total_revenue_cents: i64 = services.iter().map(|row| row.revenue_cents).sum();

    Ok(HttpResponse::Ok().json(json!({
        "start": start,
        "end": end,
        "totals": {
            "total": totals.total,
            "completed": totals.completed,
            "pending": totals.pending,
            "cancelled": totals.cancelled,
        },
        "services": services
            .into_iter()
            .map(|row| json!({
                "service_name": row.service_name,
                "count": row.count,
                "revenue_cents": row.revenue_cents,
            }))
            .collect::<Vec<_>>(),
        "appointments_by_day": by_day
            .into_iter()
            .map(|row| json!({ "date": row.date, "count": row.count }))
            .collect::<Vec<_>>(),
        "total_revenue_cents": total_revenue_cents,
    })))
}

async fn list_clients(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn get_client(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let row = require_client(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn create_client(
    state: web::Data<AppState>,
    payload: web::Json<ClientPayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    if payload.email.trim().is_empty() {
        return Err(AppError::validation("Email is required"));
    }

    let id = new_id();
    sqlx::query("INSERT INTO clients (id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(payload.name.trim())
        .bind(payload.email.trim())
        .bind(payload.phone.as_deref().unwrap_or(""))
        .bind(Utc::now().to_rfc3339())
        .execute(&state.db)
        .await
        .map_err(|err| unique_violation(err, "Email already exists"))?;

    let row = require_client(&state.db, &id).await?;
    Ok(HttpResponse::Created().json(row))
}

async fn update_client(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ClientUpdatePayload>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_client(&state.db, &id).await?;

    let payload = payload.into_inner();
    sqlx::query(
        r#"UPDATE clients
           SET name = COALESCE(?, name),
               email = COALESCE(?, email),
               phone = COALESCE(?, phone)
           WHERE id = ?"#,
    )
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|err| unique_violation(err, "Email already exists"))?;

    let row = require_client(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn delete_client(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_client(&state.db, &id).await?;
    sqlx::query("DELETE FROM clients WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_vehicles(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles ORDER BY make, model")
        .fetch_all(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn vehicles_by_client(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let client_id = path.into_inner();
    let rows = sqlx::query_as::<_, VehicleRow>(
        "SELECT * FROM vehicles WHERE client_id = ? ORDER BY make, model",
    )
    .bind(&client_id)
    .fetch_all(&state.db)
    .await?;
    Ok(HttpResponse::Ok().json(rows))
}

async fn get_vehicle(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let row = require_vehicle(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn create_vehicle(
    state: web::Data<AppState>,
    payload: web::Json<VehiclePayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    if payload.make.trim().is_empty() || payload.model.trim().is_empty() {
        return Err(AppError::validation("Make and model are required"));
    }
    if payload.license_plate.trim().is_empty() {
        return Err(AppError::validation("License plate is required"));
    }
    require_client(&state.db, &payload.client_id).await?;

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO vehicles (id, make, model, year, license_plate, client_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(payload.make.trim())
    .bind(payload.model.trim())
    .bind(payload.year)
    .bind(payload.license_plate.trim())
    .bind(&payload.client_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .map_err(|err| unique_violation(err, "License plate already registered"))?;

    let row = require_vehicle(&state.db, &id).await?;
    Ok(HttpResponse::Created().json(row))
}

async fn update_vehicle(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<VehicleUpdatePayload>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_vehicle(&state.db, &id).await?;

    let payload = payload.into_inner();
    sqlx::query(
        r#"UPDATE vehicles
           SET make = COALESCE(?, make),
               model = COALESCE(?, model),
               year = COALESCE(?, year),
               license_plate = COALESCE(?, license_plate)
           WHERE id = ?"#,
    )
    .bind(&payload.make)
    .bind(&payload.model)
    .bind(payload.year)
    .bind(&payload.license_plate)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|err| unique_violation(err, "License plate already registered"))?;

    let row = require_vehicle(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn delete_vehicle(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_vehicle(&state.db, &id).await?;
    sqlx::query("DELETE FROM vehicles WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn get_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let row = require_service(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn create_service(
    state: web::Data<AppState>,
    payload: web::Json<ServicePayload>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    if payload.price_cents < 0 {
        return Err(AppError::validation("Price must not be negative"));
    }

    let id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(payload.name.trim())
    .bind(&payload.description)
    .bind(payload.price_cents)
    .bind(payload.duration_minutes)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    let row = require_service(&state.db, &id).await?;
    Ok(HttpResponse::Created().json(row))
}

async fn update_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ServiceUpdatePayload>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_service(&state.db, &id).await?;

    let payload = payload.into_inner();
    if payload.price_cents.is_some_and(|price| price < 0) {
        return Err(AppError::validation("Price must not be negative"));
    }
    sqlx::query(
        r#"UPDATE services
           SET name = COALESCE(?, name),
               description = COALESCE(?, description),
               price_cents = COALESCE(?, price_cents),
               duration_minutes = COALESCE(?, duration_minutes)
           WHERE id = ?"#,
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(payload.price_cents)
    .bind(payload.duration_minutes)
    .bind(&id)
    .execute(&state.db)
    .await?;

    let row = require_service(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(row))
}

async fn delete_service(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_service(&state.db, &id).await?;
    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_mechanics(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, UserRow>(
        "SELECT * FROM users WHERE role = ? ORDER BY name",
    )
    .bind(ROLE_MECHANIC)
    .fetch_all(&state.db)
    .await?;

    let mut mechanics = Vec::with_capacity(rows.len());
    for user in rows {
        let total = count(
            &state.db,
            "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ?",
            Some(user.id.as_str()),
        )
        .await?;
        let completed = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM appointments WHERE mechanic_id = ? AND status = ?",
        )
        .bind(&user.id)
        .bind(STATUS_COMPLETED)
        .fetch_one(&state.db)
        .await?;
        let average_rating = ratings::average_for_mechanic(&state.db, &user.id).await?;
        mechanics.push(MechanicView {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            active: user.active == 1,
            total_appointments: total,
            completed_appointments: completed,
            average_rating,
        });
    }
    Ok(HttpResponse::Ok().json(mechanics))
}

async fn create_mechanic(
    state: web::Data<AppState>,
    payload: web::Json<MechanicPayload>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    if payload.name.trim().is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    if payload.email.trim().is_empty() {
        return Err(AppError::validation("Email is required"));
    }

    let password = generate_password();
    let password_hash = hash_password(&password)
        .map_err(|_| AppError::validation("Password hash failed"))?;
    let id = new_id();

    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, 1, ?)"#,
    )
    .bind(&id)
    .bind(payload.email.trim())
    .bind(payload.name.trim())
    .bind(&payload.phone)
    .bind(ROLE_MECHANIC)
    .bind(&password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .map_err(|err| unique_violation(err, "Email already registered"))?;

    log_activity(
        &state.db,
        "mechanic_created",
        &format!("{} created a new mechanic profile.", auth.name),
        Some(&auth.id),
        None,
    )
    .await;

    // The generated password is returned exactly once.
    Ok(HttpResponse::Created().json(json!({
        "mechanic": {
            "id": id,
            "name": payload.name.trim(),
            "email": payload.email.trim(),
            "phone": payload.phone,
        },
        "credentials": {
            "email": payload.email.trim(),
            "password": password,
        }
    })))
}

async fn update_mechanic(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<MechanicUpdatePayload>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_mechanic_user(&state.db, &id).await?;

    let payload = payload.into_inner();
    sqlx::query(
        r#"UPDATE users
           SET name = COALESCE(?, name),
               email = COALESCE(?, email),
               phone = COALESCE(?, phone)
           WHERE id = ?"#,
    )
    .bind(&payload.name)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|err| unique_violation(err, "Email already registered"))?;

    let user = require_mechanic_user(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "phone": user.phone,
    })))
}

async fn regenerate_mechanic_password(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let user = require_mechanic_user(&state.db, &id).await?;

    let password = generate_password();
    let password_hash = hash_password(&password)
        .map_err(|_| AppError::validation("Password hash failed"))?;
    sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "email": user.email,
        "password": password,
    })))
}

async fn delete_mechanic(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    require_mechanic_user(&state.db, &id).await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_appointments(
    state: web::Data<AppState>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse, AppError> {
    let rows = appointments::list(&state.db, query.status.as_deref()).await?;
    let views: Vec<AppointmentView> = rows.into_iter().map(to_view).collect();
    Ok(HttpResponse::Ok().json(views))
}

async fn get_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let row = appointments::get(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(to_view(row)))
}

async fn update_appointment_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusPayload>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let updated = appointments::update_status(&state.db, &id, &payload.status).await?;

    log_activity(
        &state.db,
        "appointment_updated",
        &format!("{} set appointment {} to {}.", auth.name, id, updated.status),
        Some(&auth.id),
        Some(&id),
    )
    .await;
    broadcast(&state, "appointment_updated", &id).await;

    let row = appointments::get(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(to_view(row)))
}

async fn assign_mechanic(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AssignPayload>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    appointments::assign_mechanic(&state.db, &id, payload.mechanic_id.as_deref()).await?;

    let message = match payload.mechanic_id.as_deref() {
        Some(_) => format!("{} assigned a mechanic to appointment {}.", auth.name, id),
        None => format!("{} cleared the mechanic on appointment {}.", auth.name, id),
    };
    log_activity(&state.db, "mechanic_assigned", &message, Some(&auth.id), Some(&id)).await;
    broadcast(&state, "appointment_updated", &id).await;

    let row = appointments::get(&state.db, &id).await?;
    Ok(HttpResponse::Ok().json(to_view(row)))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    appointments::delete(&state.db, &id).await?;

    log_activity(
        &state.db,
        "appointment_deleted",
        &format!("{} deleted appointment {}.", auth.name, id),
        Some(&auth.id),
        Some(&id),
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn list_invoices(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let rows = invoices::list(&state.db).await?;
    let views: Vec<InvoiceView> = rows.into_iter().map(invoice_view).collect();
    Ok(HttpResponse::Ok().json(views))
}

async fn get_invoice(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let row = invoices::get(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(invoice_view(row)))
}

async fn create_invoice(
    state: web::Data<AppState>,
    payload: web::Json<invoices::NewInvoice>,
) -> Result<HttpResponse, AppError> {
    let row = invoices::create(&state.db, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(invoice_view(row)))
}

async fn delete_invoice(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    invoices::delete(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

async fn invoice_from_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let appointment_id = path.into_inner();
    let invoice = invoices::generate_from_appointment(&state.db, &appointment_id).await?;

    log_activity(
        &state.db,
        "invoice_generated",
        &format!("{} generated invoice {} from appointment {}.", auth.name, invoice.id, appointment_id),
        Some(&auth.id),
        Some(&appointment_id),
    )
    .await;

    Ok(HttpResponse::Created().json(invoice_view(invoice)))
}

async fn generate_rating_link(
    state: web::Data<AppState>,
    payload: web::Json<GenerateLinkPayload>,
    auth: web::ReqData<AuthUser>,
) -> Result<HttpResponse, AppError> {
    let link = ratings::generate_link(&state.db, &payload.appointment_id).await?;

    log_activity(
        &state.db,
        "rating_link_generated",
        &format!("{} generated a rating link for appointment {}.", auth.name, payload.appointment_id),
        Some(&auth.id),
        Some(&payload.appointment_id),
    )
    .await;

    Ok(HttpResponse::Created().json(link))
}

async fn broadcast(state: &web::Data<AppState>, kind: &str, appointment_id: &str) {
    if let Some(row) = fetch_appointment_detail(&state.db, appointment_id).await {
        let _ = state.events.send(ServerEvent::from_row(kind, row));
    }
}

fn parse_report_date(value: Option<&str>, field: &str) -> Result<String, AppError> {
    let value = value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::validation(format!("{field} date is required")))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("{field} date must be in YYYY-MM-DD format")))?;
    Ok(value.to_string())
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

async fn count(
    pool: &SqlitePool,
    query: &str,
    param: Option<&str>,
) -> Result<i64, AppError> {
    let mut q = sqlx::query_scalar::<_, i64>(query);
    if let Some(param) = param {
        q = q.bind(param);
    }
    Ok(q.fetch_one(pool).await?)
}

async fn require_client(pool: &SqlitePool, id: &str) -> Result<ClientRow, AppError> {
    sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Client"))
}

async fn require_vehicle(pool: &SqlitePool, id: &str) -> Result<VehicleRow, AppError> {
    sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles WHERE id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))
}

async fn require_service(pool: &SqlitePool, id: &str) -> Result<ServiceRow, AppError> {
    sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE id = ? LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Service"))
}

async fn require_mechanic_user(pool: &SqlitePool, id: &str) -> Result<UserRow, AppError> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ? AND role = ? LIMIT 1")
        .bind(id)
        .bind(ROLE_MECHANIC)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Mechanic"))
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
        client_email: row.client_email,
        vehicle_id: row.vehicle_id,
        vehicle,
        license_plate: row.license_plate,
        service_id: row.service_id,
        service_name: row.service_name,
        service_price_cents: row.service_price_cents,
        mechanic_id: row.mechanic_id,
        mechanic_name: row.mechanic_name,
        date: row.date,
        time: row.time,
        status: row.status,
        notes: row.notes,
        invoice_id: row.invoice_id,
    }
}

fn invoice_view(row: crate::models::InvoiceRow) -> InvoiceView {
    let services = serde_json::from_str(&row.services).unwrap_or_else(|_| json!([]));
    InvoiceView {
        id: row.id,
        client_name: row.client_name,
        client_email: row.client_email,
        vehicle_info: row.vehicle_info,
        services,
        total_cents: row.total_cents,
        status: row.status,
        date: row.date,
    }
}
