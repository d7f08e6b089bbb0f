use axum::{
    extract::{Multipart, Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    db::models::Document,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::floorplans::fetch_owned_floorplan,
    services::storage::ObjectStore,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/:floorplan_id/:element_id",
        get(list_documents).post(upload_document),
    )
}

#[derive(Debug, Deserialize)]
pub struct DocumentPath {
    pub floorplan_id: i64,
    pub element_id: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub floorplan_id: i64,
    pub element_id: String,
    pub filename: String,
    pub storage_key: String,
    pub upload_date: String,
    /// Presigned retrieval URL, generated on read and never stored. Absent
    /// when no object store is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

async fn list_documents(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<DocumentPath>,
) -> Result<Json<Value>> {
    fetch_owned_floorplan(&state.db.pool, path.floorplan_id, user.id).await?;

    let rows = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE floorplan_id = ? AND element_id = ? ORDER BY id ASC",
    )
    .bind(path.floorplan_id)
    .bind(&path.element_id)
    .fetch_all(&state.db.pool)
    .await?;

    let documents: Vec<DocumentResponse> = rows
        .into_iter()
        .map(|doc| {
            let url = state
                .storage
                .as_ref()
                .map(|store| store.presign_get(&doc.storage_key));
            DocumentResponse {
                id: doc.id,
                floorplan_id: doc.floorplan_id,
                element_id: doc.element_id,
                filename: doc.filename,
                storage_key: doc.storage_key,
                upload_date: doc.upload_date,
                url,
            }
        })
        .collect();

    Ok(Json(json!({ "documents": documents })))
}

/// Accept one uploaded file bound to (floorplan, element). The object store
/// write happens first; the metadata row is only inserted once the bytes are
/// safely stored.
async fn upload_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<DocumentPath>,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>> {
    fetch_owned_floorplan(&state.db.pool, path.floorplan_id, user.id).await?;

    let Some(store) = &state.storage else {
        return Err(AppError::Storage(
            "No object store configured for uploads".to_string(),
        ));
    };

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?
    {
        if field.name() == Some("document") {
            let filename = field
                .file_name()
                .map(|f| f.to_string())
                .ok_or_else(|| AppError::Validation("No file selected".to_string()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?;
            upload = Some((filename, bytes.to_vec()));
        }
    }

    let Some((filename, bytes)) = upload else {
        return Err(AppError::Validation("No file selected".to_string()));
    };

    let now = Utc::now();
    let storage_key = ObjectStore::document_key(path.floorplan_id, &path.element_id, &filename, now);

    store
        .put_object(&storage_key, bytes, "application/octet-stream")
        .await?;

    let upload_date = now.to_rfc3339();
    let document_id = sqlx::query(
        r#"
        INSERT INTO documents (floorplan_id, element_id, filename, storage_key, upload_date)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(path.floorplan_id)
    .bind(&path.element_id)
    .bind(&filename)
    .bind(&storage_key)
    .bind(&upload_date)
    .execute(&state.db.pool)
    .await?
    .last_insert_rowid();

    let url = store.presign_get(&storage_key);

    Ok(Json(DocumentResponse {
        id: document_id,
        floorplan_id: path.floorplan_id,
        element_id: path.element_id,
        filename,
        storage_key,
        upload_date,
        url: Some(url),
    }))
}
