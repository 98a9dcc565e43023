use std::str::FromStr;

use actix_web::{test, web, App};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use garagedesk::{auth::new_id, db, routes, state::AppState};

async fn setup_state() -> AppState {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect");
    db::run_migrations(&pool).await.expect("migrations");

    let (events, _) = broadcast::channel(32);
    AppState { db: pool, events }
}

async fn seed_booking_fixtures(pool: &SqlitePool) -> (String, String) {
    let client_id = new_id();
    sqlx::query("INSERT INTO clients (id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&client_id)
        .bind("Test Client")
        .bind(format!("{client_id}@example.com"))
        .bind("")
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("client");

    let vehicle_id = new_id();
    sqlx::query(
        r#"INSERT INTO vehicles (id, make, model, year, license_plate, client_id, created_at)
           VALUES (?, 'Honda', 'Civic', 2021, ?, ?, ?)"#,
    )
    .bind(&vehicle_id)
    .bind(format!("TST-{}", &vehicle_id[..8]))
    .bind(&client_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("vehicle");

    (client_id, vehicle_id)
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(routes::public::configure)
                .configure(routes::events::configure)
                .configure(routes::admin::configure)
                .configure(routes::mechanic::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_responds_ok() {
    let state = setup_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn service_catalog_is_public() {
    let state = setup_state().await;
    sqlx::query(
        r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, created_at)
           VALUES (?, 'Brake Inspection', NULL, 3500, 30, ?)"#,
    )
    .bind(new_id())
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .expect("service");

    let app = test_app!(state);
    let req = test::TestRequest::get().uri("/api/services").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let services = body.as_array().expect("array");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["name"], "Brake Inspection");
    assert_eq!(services[0]["price_cents"], 3500);
}

#[actix_web::test]
async fn public_booking_creates_pending_appointment() {
    let state = setup_state().await;
    let (client_id, vehicle_id) = seed_booking_fixtures(&state.db).await;

    let app = test_app!(state);
    let req = test::TestRequest::post()
        .uri("/api/appointments")
        .set_json(json!({
            "client_id": client_id,
            "vehicle_id": vehicle_id,
            "date": "2026-10-05",
            "time": "14:00",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["vehicle"], "Honda Civic");
}

#[actix_web::test]
async fn rating_submission_rejects_out_of_range_value() {
    let state = setup_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/ratings/submit")
        .set_json(json!({ "token": "whatever", "rating": 7 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn unknown_rating_token_is_not_found() {
    let state = setup_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::get()
        .uri("/api/ratings/token/no-such-token")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[actix_web::test]
async fn admin_surface_requires_credentials() {
    let state = setup_state().await;
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/api/admin/stats").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}
