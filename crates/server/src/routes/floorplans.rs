use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{
    db::models::{Element, Floorplan},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{storage::ObjectStore, sync},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_floorplans).post(create_floorplan))
        .route("/:id", get(get_floorplan).delete(delete_floorplan))
        .route("/:id/elements", put(save_elements))
}

#[derive(Debug, Deserialize)]
pub struct CreateFloorplanRequest {
    pub name: String,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Serialize)]
pub struct FloorplanSummary {
    pub id: i64,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct FloorplanResponse {
    pub id: i64,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub elements: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct FloorplanListResponse {
    pub floorplans: Vec<FloorplanSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SaveElementsRequest {
    pub elements: Value,
}

#[derive(Debug, Serialize)]
pub struct SaveElementsResponse {
    pub status: String,
    /// "ok", "skipped" (no store configured) or "failed"; the database save
    /// already succeeded in every case.
    pub backup: String,
    pub updated_at: String,
}

/// Fetch a floorplan scoped to its owner. A floorplan that exists but belongs
/// to someone else is reported as NotFound; this is the sole authorization
/// check for floorplan access.
pub async fn fetch_owned_floorplan(
    pool: &SqlitePool,
    floorplan_id: i64,
    user_id: i64,
) -> Result<Floorplan> {
    sqlx::query_as::<_, Floorplan>("SELECT * FROM floorplans WHERE id = ? AND user_id = ?")
        .bind(floorplan_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Floorplan not found".to_string()))
}

/// Validate a save payload: must be a JSON array of well-formed elements with
/// unique ids. Returns the parsed list for the synchronizer; the raw value is
/// what gets stored, so unknown element fields survive round trips.
pub fn parse_elements(value: &Value) -> Result<Vec<Element>> {
    let Some(items) = value.as_array() else {
        return Err(AppError::Validation(
            "Elements payload must be a JSON array".to_string(),
        ));
    };

    let elements: Vec<Element> = items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone())
                .map_err(|e| AppError::Validation(format!("Malformed element: {e}")))
        })
        .collect::<Result<_>>()?;

    let mut seen = std::collections::HashSet::new();
    for element in &elements {
        if !seen.insert(element.id.as_str()) {
            return Err(AppError::Validation(format!(
                "Duplicate element id: {}",
                element.id
            )));
        }
    }

    Ok(elements)
}

async fn list_floorplans(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<FloorplanListResponse>> {
    let rows = sqlx::query_as::<_, Floorplan>(
        "SELECT * FROM floorplans WHERE user_id = ? ORDER BY updated_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db.pool)
    .await?;

    let floorplans = rows
        .into_iter()
        .map(|f| FloorplanSummary {
            id: f.id,
            name: f.name,
            width: f.width,
            height: f.height,
            created_at: f.created_at,
            updated_at: f.updated_at,
        })
        .collect();

    Ok(Json(FloorplanListResponse { floorplans }))
}

async fn create_floorplan(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateFloorplanRequest>,
) -> Result<Json<FloorplanResponse>> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation(
            "Floorplan name is required".to_string(),
        ));
    }
    if body.width <= 0.0 || body.height <= 0.0 {
        return Err(AppError::Validation(
            "Width and height must be positive".to_string(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    let floorplan_id = sqlx::query(
        "INSERT INTO floorplans (user_id, name, width, height, data, created_at, updated_at) VALUES (?, ?, ?, ?, '[]', ?, ?)",
    )
    .bind(user.id)
    .bind(&body.name)
    .bind(body.width)
    .bind(body.height)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?
    .last_insert_rowid();

    Ok(Json(FloorplanResponse {
        id: floorplan_id,
        name: body.name,
        width: body.width,
        height: body.height,
        elements: json!([]),
        created_at: now.clone(),
        updated_at: now,
    }))
}

async fn get_floorplan(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<FloorplanResponse>> {
    let floorplan = fetch_owned_floorplan(&state.db.pool, id, user.id).await?;

    let elements: Value = serde_json::from_str(&floorplan.data)
        .map_err(|e| AppError::Internal(format!("Corrupt floorplan data: {e}")))?;

    Ok(Json(FloorplanResponse {
        id: floorplan.id,
        name: floorplan.name,
        width: floorplan.width,
        height: floorplan.height,
        elements,
        created_at: floorplan.created_at,
        updated_at: floorplan.updated_at,
    }))
}

/// Full-list replacement: the entire data blob is overwritten on every save.
/// Last write wins; there is no version token, so two concurrent editors can
/// silently clobber each other. Known limitation.
async fn save_elements(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<SaveElementsRequest>,
) -> Result<Json<SaveElementsResponse>> {
    let floorplan = fetch_owned_floorplan(&state.db.pool, id, user.id).await?;
    let elements = parse_elements(&body.elements)?;

    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE floorplans SET data = ?, updated_at = ? WHERE id = ?")
        .bind(body.elements.to_string())
        .bind(&now)
        .bind(id)
        .execute(&state.db.pool)
        .await?;

    sync::sync_special_elements(&state.db.pool, id, &elements).await?;

    // Mirror to the object store after the database commit. Backup failure is
    // a warning, never a rollback.
    let backup = match &state.storage {
        Some(store) => {
            let document = json!({
                "id": floorplan.id,
                "name": floorplan.name,
                "width": floorplan.width,
                "height": floorplan.height,
                "elements": body.elements,
            });
            let key = ObjectStore::floorplan_backup_key(id);
            match store
                .put_object(&key, document.to_string().into_bytes(), "application/json")
                .await
            {
                Ok(()) => "ok",
                Err(e) => {
                    tracing::warn!("floorplan {id} saved but backup failed: {e}");
                    "failed"
                }
            }
        }
        None => "skipped",
    };

    Ok(Json(SaveElementsResponse {
        status: "saved".to_string(),
        backup: backup.to_string(),
        updated_at: now,
    }))
}

/// Deleting a floorplan removes every dependent row in one transaction. The
/// schema declares the cascades too, but the contract is enforced here
/// explicitly rather than left to pragma behavior.
async fn delete_floorplan(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    fetch_owned_floorplan(&state.db.pool, id, user.id).await?;

    let mut tx = state.db.pool.begin().await?;

    for table in [
        "risk_assessments",
        "operating_instructions",
        "training_records",
    ] {
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE element_id IN (SELECT id FROM elements WHERE floorplan_id = ?)"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM elements WHERE floorplan_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE floorplan_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM floorplans WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(json!({ "status": "deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_must_be_an_array() {
        let err = parse_elements(&json!({"elements": []})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let payload = json!([
            {"id": "w1", "element_type": "wall"},
            {"id": "w1", "element_type": "window"}
        ]);
        let err = parse_elements(&payload).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_elements(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn well_formed_elements_parse() {
        let payload = json!([
            {"id": "w1", "element_type": "wall", "start": {"x": 0, "y": 0}, "end": {"x": 10, "y": 0}, "width": 0.2},
            {"id": "m1", "element_type": "machine", "start": {"x": 2, "y": 3}, "end": {"x": 4, "y": 5}, "properties": {"name": "Press"}}
        ]);
        let elements = parse_elements(&payload).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1].properties["name"], "Press");
    }
}
