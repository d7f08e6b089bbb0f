// End-to-end tests driving the real router with an in-memory SQLite database
// and no object store configured (saves report backup "skipped").

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use floorsafe_server::{
    build_router, config::Config, db::Database, handlers::ws::create_room_registry, AppState,
};

static NEXT_DB: AtomicU64 = AtomicU64::new(0);

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: String::new(),
        jwt_secret: "test-secret-for-integration-tests".to_string(),
        s3_endpoint: String::new(),
        s3_bucket: "floorsafe".to_string(),
        s3_region: "eu-central-1".to_string(),
        s3_access_key: String::new(),
        s3_secret_key: String::new(),
        s3_url_expiry_secs: 3600,
    }
}

async fn test_state() -> AppState {
    // Unique shared-cache name so parallel tests never share a database
    let db_name = format!(
        "floorsafe_test_{}_{}",
        std::process::id(),
        NEXT_DB.fetch_add(1, Ordering::Relaxed)
    );
    let url = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let db = Database::connect(&url).await.expect("connect test db");
    db.run_migrations().await.expect("run migrations");

    AppState {
        db,
        config: test_config(),
        storage: None,
        rooms: create_room_registry(),
    }
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = request(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "a-long-enough-password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

async fn create_floorplan(app: &Router, token: &str, name: &str, width: f64, height: f64) -> i64 {
    let (status, body) = request(
        app,
        "POST",
        "/api/floorplans",
        Some(token),
        Some(json!({ "name": name, "width": width, "height": height })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create failed: {body}");
    body["id"].as_i64().unwrap()
}

async fn save_elements(app: &Router, token: &str, floorplan_id: i64, elements: Value) -> Value {
    let (status, body) = request(
        app,
        "PUT",
        &format!("/api/floorplans/{floorplan_id}/elements"),
        Some(token),
        Some(json!({ "elements": elements })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "save failed: {body}");
    body
}

fn machine(id: &str) -> Value {
    json!({
        "id": id,
        "element_type": "machine",
        "start": {"x": 2.0, "y": 3.0},
        "end": {"x": 4.0, "y": 5.0},
        "width": 0.2,
        "properties": {"name": "Machine"}
    })
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let state = test_state().await;
    let app = build_router(state);

    let (status, _) = request(&app, "GET", "/api/floorplans", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn floorplan_dimensions_must_be_positive() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;

    let (status, _) = request(
        &app,
        "POST",
        "/api/floorplans",
        Some(&token),
        Some(json!({ "name": "Bad", "width": 0.0, "height": 20.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn save_then_load_round_trips_the_element_list() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;

    let elements = json!([{
        "id": "w1",
        "element_type": "wall",
        "start": {"x": 0.0, "y": 0.0},
        "end": {"x": 10.0, "y": 0.0}
    }]);
    let saved = save_elements(&app, &token, id, elements.clone()).await;
    assert_eq!(saved["status"], "saved");
    assert_eq!(saved["backup"], "skipped");

    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/floorplans/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["width"], 30.0);
    assert_eq!(body["height"], 20.0);
    assert_eq!(body["elements"], elements);
}

#[tokio::test]
async fn malformed_save_payload_is_a_validation_error() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;

    let (status, _) = request(
        &app,
        "PUT",
        &format!("/api/floorplans/{id}/elements"),
        Some(&token),
        Some(json!({ "elements": {"not": "a list"} })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn foreign_floorplans_read_as_not_found() {
    let state = test_state().await;
    let app = build_router(state);
    let owner = register(&app, "alice").await;
    let other = register(&app, "bob").await;
    let id = create_floorplan(&app, &owner, "Plant A", 30.0, 20.0).await;

    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/floorplans/{id}"),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_orders_by_most_recently_updated() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let first = create_floorplan(&app, &token, "First", 10.0, 10.0).await;
    let _second = create_floorplan(&app, &token, "Second", 10.0, 10.0).await;

    // Saving the first floorplan makes it the most recently updated
    save_elements(&app, &token, first, json!([])).await;

    let (status, body) = request(&app, "GET", "/api/floorplans", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["floorplans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["First", "Second"]);
}

#[tokio::test]
async fn saving_machines_creates_stub_records_idempotently() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;

    let elements = json!([machine("m1"), machine("m2"), {
        "id": "w1",
        "element_type": "wall",
        "start": {"x": 0.0, "y": 0.0},
        "end": {"x": 5.0, "y": 0.0}
    }]);
    save_elements(&app, &token, id, elements.clone()).await;

    let names = sqlx::query_as::<_, (String, String)>(
        "SELECT element_id, name FROM elements WHERE floorplan_id = ? ORDER BY element_id",
    )
    .bind(id)
    .fetch_all(&state.db.pool)
    .await
    .unwrap();
    assert_eq!(
        names,
        vec![
            ("m1".to_string(), "New Machine".to_string()),
            ("m2".to_string(), "New Machine".to_string())
        ]
    );

    // Saving again must not duplicate the stubs
    save_elements(&app, &token, id, elements).await;
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM elements WHERE floorplan_id = ?")
            .bind(id)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn removing_an_element_keeps_its_safety_records() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;

    save_elements(&app, &token, id, json!([machine("m1")])).await;

    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/risks"),
        Some(&token),
        Some(json!({
            "description": "Rotating parts",
            "frequency": 2,
            "severity": 3,
            "probability": 4
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Element leaves the canvas; the record and its risks stay behind
    save_elements(&app, &token, id, json!([])).await;

    let records =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM elements WHERE floorplan_id = ?")
            .bind(id)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
    assert_eq!(records, 1);

    let risks = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM risk_assessments")
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert_eq!(risks, 1);

    // The orphaned record stays readable
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/elements/{id}/m1/record"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "New Machine");
}

#[tokio::test]
async fn walls_never_get_safety_records() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;

    save_elements(
        &app,
        &token,
        id,
        json!([{
            "id": "w1",
            "element_type": "wall",
            "start": {"x": 0.0, "y": 0.0},
            "end": {"x": 5.0, "y": 0.0}
        }]),
    )
    .await;

    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM elements WHERE floorplan_id = ?")
            .bind(id)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
    assert_eq!(count, 0);

    // Viewing a wall's record is a validation error, not a lazy create
    let (status, _) = request(
        &app,
        "GET",
        &format!("/api/elements/{id}/w1/record"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn risk_score_is_computed_server_side() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("m1")])).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/risks"),
        Some(&token),
        Some(json!({
            "description": "Crush hazard",
            "frequency": 2,
            "severity": 3,
            "probability": 4,
            "technical_measures": ["Guard rail"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_score"], 24);
    assert_eq!(body["technical_measures"], json!(["Guard rail"]));

    // Out-of-range factors are rejected
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/risks"),
        Some(&token),
        Some(json!({
            "description": "Bad",
            "frequency": 6,
            "severity": 3,
            "probability": 4
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn risk_updates_are_scoped_to_their_element() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("m1"), machine("m2")])).await;

    let (_, risk) = request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/risks"),
        Some(&token),
        Some(json!({
            "description": "Crush hazard",
            "frequency": 1,
            "severity": 1,
            "probability": 1
        })),
    )
    .await;
    let risk_id = risk["id"].as_i64().unwrap();

    // Updating through the wrong element is NotFound
    let (status, _) = request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m2/risks/{risk_id}"),
        Some(&token),
        Some(json!({
            "description": "Changed",
            "frequency": 2,
            "severity": 2,
            "probability": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Through the right element it recomputes the score
    let (status, body) = request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m1/risks/{risk_id}"),
        Some(&token),
        Some(json!({
            "description": "Changed",
            "frequency": 2,
            "severity": 2,
            "probability": 2
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_score"], 8);
}

#[tokio::test]
async fn instructions_upsert_applies_zip_truncation() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("m1")])).await;

    let (status, body) = request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m1/instructions"),
        Some(&token),
        Some(json!({
            "hazard_symbols": ["GHS02", "GHS05"],
            "hazard_texts": ["Flammable"],
            "maintenance_disposal": "Drain before service"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["hazard_symbols"],
        json!([{"symbol": "GHS02", "text": "Flammable"}])
    );
    assert_eq!(body["maintenance_disposal"], "Drain before service");

    // Second upsert overwrites instead of inserting a second row
    let (status, body) = request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m1/instructions"),
        Some(&token),
        Some(json!({
            "hazard_symbols": ["GHS07"],
            "hazard_texts": ["Irritant"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["hazard_symbols"],
        json!([{"symbol": "GHS07", "text": "Irritant"}])
    );

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM operating_instructions")
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn training_records_round_trip_document_ids() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("m1")])).await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/trainings"),
        Some(&token),
        Some(json!({
            "employee_name": "J. Weber",
            "training_name": "Press operation",
            "training_date": "2025-03-01",
            "document_ids": [17, 23]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Stored as an opaque list; referenced documents are not validated
    assert_eq!(body["document_ids"], json!([17, 23]));

    let record_id = body["id"].as_i64().unwrap();
    let (status, body) = request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m1/trainings/{record_id}"),
        Some(&token),
        Some(json!({
            "employee_name": "J. Weber",
            "training_name": "Press operation (refresher)",
            "training_date": "2026-03-01",
            "document_ids": []
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["training_name"], "Press operation (refresher)");

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/api/elements/{id}/m1/trainings/{record_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_a_floorplan_cascades_to_all_safety_rows() {
    let state = test_state().await;
    let app = build_router(state.clone());
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("m1")])).await;

    request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/risks"),
        Some(&token),
        Some(json!({
            "description": "Crush hazard",
            "frequency": 1,
            "severity": 2,
            "probability": 3
        })),
    )
    .await;
    request(
        &app,
        "PUT",
        &format!("/api/elements/{id}/m1/instructions"),
        Some(&token),
        Some(json!({
            "hazard_symbols": ["GHS02"],
            "hazard_texts": ["Flammable"]
        })),
    )
    .await;
    request(
        &app,
        "POST",
        &format!("/api/elements/{id}/m1/trainings"),
        Some(&token),
        Some(json!({
            "employee_name": "J. Weber",
            "training_name": "Intro",
            "training_date": "2025-01-01"
        })),
    )
    .await;

    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/api/floorplans/{id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for table in [
        "floorplans",
        "elements",
        "risk_assessments",
        "operating_instructions",
        "training_records",
        "documents",
    ] {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
        assert_eq!(count, 0, "{table} not cascaded");
    }
}

#[tokio::test]
async fn uploads_are_refused_without_an_object_store() {
    let state = test_state().await;
    let app = build_router(state);
    let token = register(&app, "alice").await;
    let id = create_floorplan(&app, &token, "Plant A", 30.0, 20.0).await;
    save_elements(&app, &token, id, json!([machine("cl1")])).await;

    let boundary = "test-boundary";
    let body = format!(
        "--{boundary}\r\ncontent-disposition: form-data; name=\"document\"; filename=\"manual.pdf\"\r\ncontent-type: application/pdf\r\n\r\npdf bytes\r\n--{boundary}--\r\n"
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/documents/{id}/cl1"))
                .header("Authorization", format!("Bearer {token}"))
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    // No metadata row without a stored object
    let (status, body) = request(
        &app,
        "GET",
        &format!("/api/documents/{id}/cl1"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"], json!([]));
}
