use std::str::FromStr;

use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use garagedesk::{
    auth::new_id,
    db,
    error::AppError,
    models::{InvoiceServiceLine, STATUS_COMPLETED, STATUS_CONFIRMED, STATUS_PENDING},
    workflow::{appointments, invoices, ratings},
};

async fn setup() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("options")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

async fn seed_client(pool: &SqlitePool) -> String {
    let id = new_id();
    sqlx::query("INSERT INTO clients (id, name, email, phone, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind("Maria Lopez")
        .bind(format!("{id}@example.com"))
        .bind("555-0100")
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("seed client");
    id
}

async fn seed_vehicle(pool: &SqlitePool, client_id: &str) -> String {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO vehicles (id, make, model, year, license_plate, client_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind("Toyota")
    .bind("Corolla")
    .bind(2019)
    .bind(format!("PLT-{}", &id[..8]))
    .bind(client_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("seed vehicle");
    id
}

async fn seed_service(pool: &SqlitePool, price_cents: i64) -> String {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, name, description, price_cents, duration_minutes, created_at)
           VALUES (?, ?, NULL, ?, 30, ?)"#,
    )
    .bind(&id)
    .bind("Oil Change")
    .bind(price_cents)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("seed service");
    id
}

async fn seed_mechanic(pool: &SqlitePool) -> String {
    let id = new_id();
    sqlx::query(
        r#"INSERT INTO users (id, email, name, phone, role, password_hash, active, created_at)
           VALUES (?, ?, ?, NULL, 'mechanic', 'test-hash', 1, ?)"#,
    )
    .bind(&id)
    .bind(format!("{id}@shop.example"))
    .bind("Jordan Reyes")
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .expect("seed mechanic");
    id
}

fn booking(client_id: &str, vehicle_id: &str, service_id: Option<&str>) -> appointments::NewAppointment {
    appointments::NewAppointment {
        client_id: client_id.to_string(),
        vehicle_id: vehicle_id.to_string(),
        service_id: service_id.map(str::to_string),
        mechanic_id: None,
        date: "2026-09-01".to_string(),
        time: "10:30".to_string(),
        notes: None,
        client_name: None,
        client_email: None,
        client_phone: None,
    }
}

/// Create → assign mechanic → complete → ready for invoice/rating.
async fn completed_appointment(pool: &SqlitePool) -> (String, String, i64) {
    let client = seed_client(pool).await;
    let vehicle = seed_vehicle(pool, &client).await;
    let service = seed_service(pool, 5000).await;
    let mechanic = seed_mechanic(pool).await;

    let created = appointments::create(pool, booking(&client, &vehicle, Some(&service)))
        .await
        .expect("create");
    appointments::assign_mechanic(pool, &created.id, Some(&mechanic))
        .await
        .expect("assign");
    appointments::update_status(pool, &created.id, STATUS_COMPLETED)
        .await
        .expect("complete");

    (created.id, mechanic, 5000)
}

#[tokio::test]
async fn create_starts_pending_without_invoice() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;

    let created = appointments::create(&pool, booking(&client, &vehicle, None))
        .await
        .expect("create");

    assert_eq!(created.status, STATUS_PENDING);
    assert!(created.mechanic_id.is_none());
    assert!(created.invoice_id.is_none());
}

#[tokio::test]
async fn create_heals_unknown_client_from_contact_fields() {
    let pool = setup().await;
    let known = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &known).await;

    let new_client_id = new_id();
    let mut input = booking(&new_client_id, &vehicle, None);
    input.client_name = Some("Walk-in Customer".to_string());
    input.client_email = Some("walkin@example.com".to_string());

    appointments::create(&pool, input).await.expect("create");

    let healed = sqlx::query_as::<_, (String, String)>(
        "SELECT name, email FROM clients WHERE id = ?",
    )
    .bind(&new_client_id)
    .fetch_one(&pool)
    .await
    .expect("healed client");
    assert_eq!(healed.0, "Walk-in Customer");
    assert_eq!(healed.1, "walkin@example.com");
}

#[tokio::test]
async fn create_requires_contact_for_unknown_client() {
    let pool = setup().await;
    let known = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &known).await;

    let err = appointments::create(&pool, booking(&new_id(), &vehicle, None))
        .await
        .expect_err("should fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn create_rejects_non_mechanic_assignment() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;

    let mut input = booking(&client, &vehicle, None);
    input.mechanic_id = Some(new_id());

    let err = appointments::create(&pool, input).await.expect_err("should fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn create_rejects_malformed_date() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;

    let mut input = booking(&client, &vehicle, None);
    input.date = "01/09/2026".to_string();

    let err = appointments::create(&pool, input).await.expect_err("should fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn update_status_missing_appointment_is_not_found() {
    let pool = setup().await;
    let err = appointments::update_status(&pool, &new_id(), STATUS_CONFIRMED)
        .await
        .expect_err("should fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn update_status_rejects_unknown_value() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let created = appointments::create(&pool, booking(&client, &vehicle, None))
        .await
        .expect("create");

    let err = appointments::update_status(&pool, &created.id, "done")
        .await
        .expect_err("should fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn assign_mechanic_validates_role_and_allows_clearing() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let mechanic = seed_mechanic(&pool).await;
    let created = appointments::create(&pool, booking(&client, &vehicle, None))
        .await
        .expect("create");

    let err = appointments::assign_mechanic(&pool, &created.id, Some(&new_id()))
        .await
        .expect_err("unknown mechanic");
    assert!(matches!(err, AppError::Validation(_)));

    let assigned = appointments::assign_mechanic(&pool, &created.id, Some(&mechanic))
        .await
        .expect("assign");
    assert_eq!(assigned.mechanic_id.as_deref(), Some(mechanic.as_str()));

    let cleared = appointments::assign_mechanic(&pool, &created.id, None)
        .await
        .expect("clear");
    assert!(cleared.mechanic_id.is_none());
}

#[tokio::test]
async fn delete_removes_appointment() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let created = appointments::create(&pool, booking(&client, &vehicle, None))
        .await
        .expect("create");

    appointments::delete(&pool, &created.id).await.expect("delete");

    let err = appointments::get(&pool, &created.id).await.expect_err("gone");
    assert!(matches!(err, AppError::NotFound(_)));

    let err = appointments::delete(&pool, &created.id).await.expect_err("gone");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn invoice_generation_snapshots_service_and_links_back() {
    let pool = setup().await;
    let (appointment_id, _, price) = completed_appointment(&pool).await;

    let invoice = invoices::generate_from_appointment(&pool, &appointment_id)
        .await
        .expect("generate");

    assert_eq!(invoice.total_cents, price);
    assert_eq!(invoice.status, "paid");
    assert!(invoice.vehicle_info.contains("Toyota Corolla"));

    let lines: Vec<InvoiceServiceLine> =
        serde_json::from_str(&invoice.services).expect("service lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].name, "Oil Change");
    assert_eq!(lines[0].price_cents, price);

    let appointment = appointments::get(&pool, &appointment_id).await.expect("get");
    assert_eq!(appointment.invoice_id.as_deref(), Some(invoice.id.as_str()));
    assert_eq!(appointment.status, STATUS_COMPLETED);
}

#[tokio::test]
async fn second_invoice_generation_conflicts() {
    let pool = setup().await;
    let (appointment_id, _, _) = completed_appointment(&pool).await;

    invoices::generate_from_appointment(&pool, &appointment_id)
        .await
        .expect("first");
    let err = invoices::generate_from_appointment(&pool, &appointment_id)
        .await
        .expect_err("second must conflict");
    assert!(matches!(err, AppError::Conflict(_)));

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn invoice_requires_completed_appointment() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let service = seed_service(&pool, 4000).await;
    let created = appointments::create(&pool, booking(&client, &vehicle, Some(&service)))
        .await
        .expect("create");

    let err = invoices::generate_from_appointment(&pool, &created.id)
        .await
        .expect_err("pending must fail");
    assert!(matches!(err, AppError::Validation(_)));

    let err = invoices::generate_from_appointment(&pool, &new_id())
        .await
        .expect_err("missing must fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn invoice_snapshot_ignores_later_catalog_changes() {
    let pool = setup().await;
    let (appointment_id, _, price) = completed_appointment(&pool).await;

    let invoice = invoices::generate_from_appointment(&pool, &appointment_id)
        .await
        .expect("generate");

    sqlx::query("UPDATE services SET price_cents = 99999, name = 'Renamed'")
        .execute(&pool)
        .await
        .expect("mutate catalog");

    let reread = invoices::get(&pool, &invoice.id).await.expect("reread");
    assert_eq!(reread.total_cents, price);
    let lines: Vec<InvoiceServiceLine> =
        serde_json::from_str(&reread.services).expect("service lines");
    assert_eq!(lines[0].name, "Oil Change");
}

#[tokio::test]
async fn rating_round_trip_accepts_token_exactly_once() {
    let pool = setup().await;
    let (appointment_id, mechanic_id, _) = completed_appointment(&pool).await;

    let link = ratings::generate_link(&pool, &appointment_id)
        .await
        .expect("generate link");
    assert!(link.url.ends_with(&format!("/rate/{}", link.token)));

    let expires = chrono::DateTime::parse_from_rfc3339(&link.expires_at).expect("expiry");
    let days = (expires.with_timezone(&Utc) - Utc::now()).num_days();
    assert!((29..=30).contains(&days), "expiry {days} days out");

    let info = ratings::token_info(&pool, &link.token).await.expect("info");
    assert_eq!(info.appointment_id, appointment_id);
    assert_eq!(info.mechanic_id, mechanic_id);
    assert_eq!(info.mechanic_name, "Jordan Reyes");
    assert_eq!(info.vehicle_info, "Toyota Corolla");

    let rating = ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token: link.token.clone(),
            rating: 5,
            comment: Some("Great service".to_string()),
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect("submit");
    assert_eq!(rating.rating, 5);
    assert_eq!(rating.mechanic_id, mechanic_id);

    // Token is consumed: both the info lookup and a resubmission read it as absent.
    let err = ratings::token_info(&pool, &link.token).await.expect_err("used");
    assert!(matches!(err, AppError::NotFound(_)));

    let err = ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token: link.token,
            rating: 3,
            comment: None,
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect_err("resubmission");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn generate_link_preconditions() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let service = seed_service(&pool, 4000).await;
    let created = appointments::create(&pool, booking(&client, &vehicle, Some(&service)))
        .await
        .expect("create");

    // Pending appointment.
    let err = ratings::generate_link(&pool, &created.id).await.expect_err("pending");
    assert!(matches!(err, AppError::Validation(_)));

    // Completed but unassigned.
    appointments::update_status(&pool, &created.id, STATUS_COMPLETED)
        .await
        .expect("complete");
    let err = ratings::generate_link(&pool, &created.id).await.expect_err("no mechanic");
    assert!(matches!(err, AppError::Validation(_)));

    // Missing appointment.
    let err = ratings::generate_link(&pool, &new_id()).await.expect_err("missing");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn generate_link_conflicts_once_rated() {
    let pool = setup().await;
    let (appointment_id, _, _) = completed_appointment(&pool).await;

    let link = ratings::generate_link(&pool, &appointment_id).await.expect("link");
    ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token: link.token,
            rating: 4,
            comment: None,
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect("submit");

    let err = ratings::generate_link(&pool, &appointment_id)
        .await
        .expect_err("already rated");
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn expired_token_reads_as_absent() {
    let pool = setup().await;
    let (appointment_id, _, _) = completed_appointment(&pool).await;

    let token = "a".repeat(64);
    sqlx::query(
        r#"INSERT INTO rating_tokens (id, appointment_id, token, expires_at, used, created_at)
           VALUES (?, ?, ?, ?, 0, ?)"#,
    )
    .bind(new_id())
    .bind(&appointment_id)
    .bind(&token)
    .bind((Utc::now() - Duration::days(1)).to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(&pool)
    .await
    .expect("insert expired token");

    let err = ratings::token_info(&pool, &token).await.expect_err("expired");
    assert!(matches!(err, AppError::NotFound(_)));

    let err = ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token,
            rating: 5,
            comment: None,
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect_err("expired");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn rating_value_bounds() {
    let pool = setup().await;

    for bad in [0, 6] {
        let err = ratings::submit(
            &pool,
            ratings::RatingSubmission {
                token: "irrelevant".to_string(),
                rating: bad,
                comment: None,
                client_name: None,
                client_email: None,
            },
        )
        .await
        .expect_err("out of range");
        assert!(matches!(err, AppError::Validation(_)), "rating {bad}");
    }

    for good in [1, 5] {
        let (appointment_id, _, _) = completed_appointment(&pool).await;
        let link = ratings::generate_link(&pool, &appointment_id).await.expect("link");
        let rating = ratings::submit(
            &pool,
            ratings::RatingSubmission {
                token: link.token,
                rating: good,
                comment: None,
                client_name: None,
                client_email: None,
            },
        )
        .await
        .expect("in range");
        assert_eq!(rating.rating, good);
    }
}

#[tokio::test]
async fn multiple_live_tokens_permit_only_one_rating() {
    let pool = setup().await;
    let (appointment_id, _, _) = completed_appointment(&pool).await;

    let first = ratings::generate_link(&pool, &appointment_id).await.expect("first");
    let second = ratings::generate_link(&pool, &appointment_id).await.expect("second");
    assert_ne!(first.token, second.token);

    ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token: first.token,
            rating: 5,
            comment: None,
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect("first submission");

    // The second token is still unused and unexpired, but the rating
    // uniqueness guard rejects the submission.
    let err = ratings::submit(
        &pool,
        ratings::RatingSubmission {
            token: second.token,
            rating: 1,
            comment: None,
            client_name: None,
            client_email: None,
        },
    )
    .await
    .expect_err("duplicate rating");
    assert!(matches!(err, AppError::Conflict(_)));

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ratings")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(total, 1);
}

#[tokio::test]
async fn average_rating_per_mechanic() {
    let pool = setup().await;
    let client = seed_client(&pool).await;
    let vehicle = seed_vehicle(&pool, &client).await;
    let service = seed_service(&pool, 4000).await;
    let mechanic = seed_mechanic(&pool).await;

    for value in [4i64, 5i64] {
        let created = appointments::create(&pool, booking(&client, &vehicle, Some(&service)))
            .await
            .expect("create");
        appointments::assign_mechanic(&pool, &created.id, Some(&mechanic))
            .await
            .expect("assign");
        appointments::update_status(&pool, &created.id, STATUS_COMPLETED)
            .await
            .expect("complete");
        let link = ratings::generate_link(&pool, &created.id).await.expect("link");
        ratings::submit(
            &pool,
            ratings::RatingSubmission {
                token: link.token,
                rating: value,
                comment: None,
                client_name: None,
                client_email: None,
            },
        )
        .await
        .expect("submit");
    }

    let avg = ratings::average_for_mechanic(&pool, &mechanic).await.expect("avg");
    assert!((avg - 4.5).abs() < f64::EPSILON);

    let unrated = ratings::average_for_mechanic(&pool, &new_id()).await.expect("avg");
    assert_eq!(unrated, 0.0);
}
