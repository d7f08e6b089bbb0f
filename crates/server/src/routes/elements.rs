// Safety-record surface for special elements: the per-element record itself,
// its risk assessments, operating instructions and training records. All
// children hang off the numeric record row, which is created lazily the first
// time a special element is saved or viewed.

use axum::{
    extract::{Path, State},
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    db::models::{ElementRecord, OperatingInstruction, RiskAssessment, TrainingRecord},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::floorplans::fetch_owned_floorplan,
    services::sync,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/:floorplan_id/:element_id/record",
            get(get_record).put(update_record),
        )
        .route(
            "/:floorplan_id/:element_id/risks",
            get(list_risks).post(create_risk),
        )
        .route(
            "/:floorplan_id/:element_id/risks/:risk_id",
            put(update_risk).delete(delete_risk),
        )
        .route(
            "/:floorplan_id/:element_id/instructions",
            get(get_instructions).put(upsert_instructions),
        )
        .route(
            "/:floorplan_id/:element_id/trainings",
            get(list_trainings).post(create_training),
        )
        .route(
            "/:floorplan_id/:element_id/trainings/:record_id",
            put(update_training).delete(delete_training),
        )
}

#[derive(Debug, Deserialize)]
pub struct ElementPath {
    pub floorplan_id: i64,
    pub element_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RiskPath {
    pub floorplan_id: i64,
    pub element_id: String,
    pub risk_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TrainingPath {
    pub floorplan_id: i64,
    pub element_id: String,
    pub record_id: i64,
}

/// Resolve the safety record behind (floorplan, element), creating a stub on
/// first view. An orphaned record (element no longer on the canvas) stays
/// reachable; a brand-new record requires the element to exist in the data
/// blob and be of a special type.
async fn resolve_record(
    state: &AppState,
    user: &AuthUser,
    floorplan_id: i64,
    element_id: &str,
) -> Result<ElementRecord> {
    let floorplan = fetch_owned_floorplan(&state.db.pool, floorplan_id, user.id).await?;

    let existing = sqlx::query_as::<_, ElementRecord>(
        "SELECT * FROM elements WHERE floorplan_id = ? AND element_id = ?",
    )
    .bind(floorplan_id)
    .bind(element_id)
    .fetch_optional(&state.db.pool)
    .await?;

    if let Some(record) = existing {
        return Ok(record);
    }

    let elements = crate::routes::floorplans::parse_elements(
        &serde_json::from_str(&floorplan.data)
            .map_err(|e| AppError::Internal(format!("Corrupt floorplan data: {e}")))?,
    )?;

    let element = elements
        .iter()
        .find(|e| e.id == element_id)
        .ok_or_else(|| AppError::NotFound("Element not found".to_string()))?;

    if !element.element_type.is_special() {
        return Err(AppError::Validation(
            "This element type does not carry safety records".to_string(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO elements (floorplan_id, element_id, element_type, name, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(floorplan_id)
    .bind(element_id)
    .bind(element.element_type.as_str())
    .bind(sync::stub_name(element.element_type))
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    let record = sqlx::query_as::<_, ElementRecord>(
        "SELECT * FROM elements WHERE floorplan_id = ? AND element_id = ?",
    )
    .bind(floorplan_id)
    .bind(element_id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(record)
}

/// Stored JSON lists are read permissively; anything unreadable collapses to
/// empty rather than failing the request.
fn parse_list(stored: &str) -> Value {
    serde_json::from_str(stored).unwrap_or_else(|_| json!([]))
}

// ---------------------------------------------------------------------------
// Element record (basic safety info)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateRecordRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dangers: String,
    #[serde(default)]
    pub safety_instructions: String,
    #[serde(default)]
    pub trained_employees: Vec<String>,
    #[serde(default)]
    pub maintenance_schedule: String,
    #[serde(default)]
    pub last_maintenance: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub id: i64,
    pub floorplan_id: i64,
    pub element_id: String,
    pub element_type: String,
    pub name: String,
    pub description: String,
    pub dangers: String,
    pub safety_instructions: String,
    pub trained_employees: Value,
    pub maintenance_schedule: String,
    pub last_maintenance: Option<String>,
    pub updated_at: String,
}

impl From<ElementRecord> for RecordResponse {
    fn from(record: ElementRecord) -> Self {
        let trained_employees = parse_list(&record.trained_employees);
        Self {
            id: record.id,
            floorplan_id: record.floorplan_id,
            element_id: record.element_id,
            element_type: record.element_type,
            name: record.name,
            description: record.description,
            dangers: record.dangers,
            safety_instructions: record.safety_instructions,
            trained_employees,
            maintenance_schedule: record.maintenance_schedule,
            last_maintenance: record.last_maintenance,
            updated_at: record.updated_at,
        }
    }
}

async fn get_record(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
) -> Result<Json<RecordResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;
    Ok(Json(record.into()))
}

async fn update_record(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
    Json(body): Json<UpdateRecordRequest>,
) -> Result<Json<RecordResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE elements
        SET name = ?, description = ?, dangers = ?, safety_instructions = ?,
            trained_employees = ?, maintenance_schedule = ?, last_maintenance = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&body.name)
    .bind(&body.description)
    .bind(&body.dangers)
    .bind(&body.safety_instructions)
    .bind(serde_json::to_string(&body.trained_employees).unwrap_or_else(|_| "[]".to_string()))
    .bind(&body.maintenance_schedule)
    .bind(&body.last_maintenance)
    .bind(&now)
    .bind(record.id)
    .execute(&state.db.pool)
    .await?;

    let updated = sqlx::query_as::<_, ElementRecord>("SELECT * FROM elements WHERE id = ?")
        .bind(record.id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(updated.into()))
}

// ---------------------------------------------------------------------------
// Risk assessments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RiskRequest {
    pub description: String,
    pub frequency: i64,
    pub severity: i64,
    pub probability: i64,
    #[serde(default)]
    pub technical_measures: Vec<String>,
    #[serde(default)]
    pub organizational_measures: Vec<String>,
    #[serde(default)]
    pub personal_measures: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RiskResponse {
    pub id: i64,
    pub element_id: i64,
    pub description: String,
    pub frequency: i64,
    pub severity: i64,
    pub probability: i64,
    pub risk_score: i64,
    pub technical_measures: Value,
    pub organizational_measures: Value,
    pub personal_measures: Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<RiskAssessment> for RiskResponse {
    fn from(risk: RiskAssessment) -> Self {
        Self {
            id: risk.id,
            element_id: risk.element_id,
            description: risk.description,
            frequency: risk.frequency,
            severity: risk.severity,
            probability: risk.probability,
            risk_score: risk.risk_score,
            technical_measures: parse_list(&risk.technical_measures),
            organizational_measures: parse_list(&risk.organizational_measures),
            personal_measures: parse_list(&risk.personal_measures),
            created_at: risk.created_at,
            updated_at: risk.updated_at,
        }
    }
}

/// The score is never taken from the client; it is always the product of the
/// three factors, each constrained to 1..=5.
pub fn compute_risk_score(frequency: i64, severity: i64, probability: i64) -> Result<i64> {
    for (label, value) in [
        ("frequency", frequency),
        ("severity", severity),
        ("probability", probability),
    ] {
        if !(1..=5).contains(&value) {
            return Err(AppError::Validation(format!(
                "{label} must be between 1 and 5"
            )));
        }
    }
    Ok(frequency * severity * probability)
}

async fn list_risks(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
) -> Result<Json<Value>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    // Insertion order is the contract.
    let risks = sqlx::query_as::<_, RiskAssessment>(
        "SELECT * FROM risk_assessments WHERE element_id = ? ORDER BY id ASC",
    )
    .bind(record.id)
    .fetch_all(&state.db.pool)
    .await?;

    let risks: Vec<RiskResponse> = risks.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "risks": risks })))
}

async fn create_risk(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
    Json(body): Json<RiskRequest>,
) -> Result<Json<RiskResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;
    let risk_score = compute_risk_score(body.frequency, body.severity, body.probability)?;

    let now = Utc::now().to_rfc3339();
    let risk_id = sqlx::query(
        r#"
        INSERT INTO risk_assessments
            (element_id, description, frequency, severity, probability, risk_score,
             technical_measures, organizational_measures, personal_measures,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id)
    .bind(&body.description)
    .bind(body.frequency)
    .bind(body.severity)
    .bind(body.probability)
    .bind(risk_score)
    .bind(serde_json::to_string(&body.technical_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&body.organizational_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&body.personal_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?
    .last_insert_rowid();

    let risk = sqlx::query_as::<_, RiskAssessment>("SELECT * FROM risk_assessments WHERE id = ?")
        .bind(risk_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(risk.into()))
}

async fn update_risk(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<RiskPath>,
    Json(body): Json<RiskRequest>,
) -> Result<Json<RiskResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;
    let risk_score = compute_risk_score(body.frequency, body.severity, body.probability)?;

    // The risk must belong to this element's record.
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM risk_assessments WHERE id = ? AND element_id = ?",
    )
    .bind(path.risk_id)
    .bind(record.id)
    .fetch_optional(&state.db.pool)
    .await?;

    if existing.is_none() {
        return Err(AppError::NotFound("Risk assessment not found".to_string()));
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE risk_assessments
        SET description = ?, frequency = ?, severity = ?, probability = ?,
            risk_score = ?, technical_measures = ?, organizational_measures = ?,
            personal_measures = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&body.description)
    .bind(body.frequency)
    .bind(body.severity)
    .bind(body.probability)
    .bind(risk_score)
    .bind(serde_json::to_string(&body.technical_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&body.organizational_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&body.personal_measures).unwrap_or_else(|_| "[]".to_string()))
    .bind(&now)
    .bind(path.risk_id)
    .execute(&state.db.pool)
    .await?;

    let risk = sqlx::query_as::<_, RiskAssessment>("SELECT * FROM risk_assessments WHERE id = ?")
        .bind(path.risk_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(risk.into()))
}

async fn delete_risk(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<RiskPath>,
) -> Result<Json<Value>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let deleted = sqlx::query("DELETE FROM risk_assessments WHERE id = ? AND element_id = ?")
        .bind(path.risk_id)
        .bind(record.id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Risk assessment not found".to_string()));
    }

    Ok(Json(json!({ "status": "deleted" })))
}

// ---------------------------------------------------------------------------
// Operating instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolText {
    pub symbol: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct InstructionsRequest {
    #[serde(default)]
    pub hazard_symbols: Vec<String>,
    #[serde(default)]
    pub hazard_texts: Vec<String>,
    #[serde(default)]
    pub protection_symbols: Vec<String>,
    #[serde(default)]
    pub protection_texts: Vec<String>,
    #[serde(default)]
    pub first_aid_symbols: Vec<String>,
    #[serde(default)]
    pub first_aid_texts: Vec<String>,
    #[serde(default)]
    pub emergency_symbols: Vec<String>,
    #[serde(default)]
    pub emergency_texts: Vec<String>,
    #[serde(default)]
    pub maintenance_disposal: String,
}

#[derive(Debug, Serialize)]
pub struct InstructionsResponse {
    pub element_id: i64,
    pub hazard_symbols: Value,
    pub protection_measures: Value,
    pub first_aid: Value,
    pub emergency_procedures: Value,
    pub maintenance_disposal: String,
    pub updated_at: String,
}

impl From<OperatingInstruction> for InstructionsResponse {
    fn from(instruction: OperatingInstruction) -> Self {
        Self {
            element_id: instruction.element_id,
            hazard_symbols: parse_list(&instruction.hazard_symbols),
            protection_measures: parse_list(&instruction.protection_measures),
            first_aid: parse_list(&instruction.first_aid),
            emergency_procedures: parse_list(&instruction.emergency_procedures),
            maintenance_disposal: instruction.maintenance_disposal,
            updated_at: instruction.updated_at,
        }
    }
}

/// Zip semantics: pair symbol and text lists index-wise, truncate to the
/// shorter list, drop pairs where either side is empty.
pub fn zip_pairs(symbols: &[String], texts: &[String]) -> Vec<SymbolText> {
    symbols
        .iter()
        .zip(texts.iter())
        .filter(|(symbol, text)| !symbol.is_empty() && !text.is_empty())
        .map(|(symbol, text)| SymbolText {
            symbol: symbol.clone(),
            text: text.clone(),
        })
        .collect()
}

async fn get_instructions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
) -> Result<Json<Value>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let instruction = sqlx::query_as::<_, OperatingInstruction>(
        "SELECT * FROM operating_instructions WHERE element_id = ?",
    )
    .bind(record.id)
    .fetch_optional(&state.db.pool)
    .await?;

    Ok(Json(json!({
        "instructions": instruction.map(InstructionsResponse::from)
    })))
}

/// At most one instruction sheet per element: creates on first write,
/// overwrites every field afterwards.
async fn upsert_instructions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
    Json(body): Json<InstructionsRequest>,
) -> Result<Json<InstructionsResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let hazard = zip_pairs(&body.hazard_symbols, &body.hazard_texts);
    let protection = zip_pairs(&body.protection_symbols, &body.protection_texts);
    let first_aid = zip_pairs(&body.first_aid_symbols, &body.first_aid_texts);
    let emergency = zip_pairs(&body.emergency_symbols, &body.emergency_texts);

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO operating_instructions
            (element_id, hazard_symbols, protection_measures, first_aid,
             emergency_procedures, maintenance_disposal, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(element_id) DO UPDATE SET
            hazard_symbols = excluded.hazard_symbols,
            protection_measures = excluded.protection_measures,
            first_aid = excluded.first_aid,
            emergency_procedures = excluded.emergency_procedures,
            maintenance_disposal = excluded.maintenance_disposal,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.id)
    .bind(serde_json::to_string(&hazard).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&protection).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&first_aid).unwrap_or_else(|_| "[]".to_string()))
    .bind(serde_json::to_string(&emergency).unwrap_or_else(|_| "[]".to_string()))
    .bind(&body.maintenance_disposal)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    let instruction = sqlx::query_as::<_, OperatingInstruction>(
        "SELECT * FROM operating_instructions WHERE element_id = ?",
    )
    .bind(record.id)
    .fetch_one(&state.db.pool)
    .await?;

    Ok(Json(instruction.into()))
}

// ---------------------------------------------------------------------------
// Training records
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TrainingRequest {
    pub employee_name: String,
    pub training_name: String,
    pub training_date: String,
    /// Opaque foreign keys into the documents table; not validated here.
    #[serde(default)]
    pub document_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct TrainingResponse {
    pub id: i64,
    pub element_id: i64,
    pub employee_name: String,
    pub training_name: String,
    pub training_date: String,
    pub document_ids: Value,
    pub created_at: String,
}

impl From<TrainingRecord> for TrainingResponse {
    fn from(record: TrainingRecord) -> Self {
        Self {
            id: record.id,
            element_id: record.element_id,
            employee_name: record.employee_name,
            training_name: record.training_name,
            training_date: record.training_date,
            document_ids: parse_list(&record.document_ids),
            created_at: record.created_at,
        }
    }
}

async fn list_trainings(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
) -> Result<Json<Value>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let records = sqlx::query_as::<_, TrainingRecord>(
        "SELECT * FROM training_records WHERE element_id = ? ORDER BY id ASC",
    )
    .bind(record.id)
    .fetch_all(&state.db.pool)
    .await?;

    let trainings: Vec<TrainingResponse> = records.into_iter().map(Into::into).collect();
    Ok(Json(json!({ "trainings": trainings })))
}

async fn create_training(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<ElementPath>,
    Json(body): Json<TrainingRequest>,
) -> Result<Json<TrainingResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    if body.employee_name.trim().is_empty() {
        return Err(AppError::Validation("Employee name is required".to_string()));
    }

    let now = Utc::now().to_rfc3339();
    let training_id = sqlx::query(
        r#"
        INSERT INTO training_records
            (element_id, employee_name, training_name, training_date, document_ids, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id)
    .bind(&body.employee_name)
    .bind(&body.training_name)
    .bind(&body.training_date)
    .bind(serde_json::to_string(&body.document_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(&now)
    .execute(&state.db.pool)
    .await?
    .last_insert_rowid();

    let training = sqlx::query_as::<_, TrainingRecord>("SELECT * FROM training_records WHERE id = ?")
        .bind(training_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(training.into()))
}

async fn update_training(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<TrainingPath>,
    Json(body): Json<TrainingRequest>,
) -> Result<Json<TrainingResponse>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let updated = sqlx::query(
        r#"
        UPDATE training_records
        SET employee_name = ?, training_name = ?, training_date = ?, document_ids = ?
        WHERE id = ? AND element_id = ?
        "#,
    )
    .bind(&body.employee_name)
    .bind(&body.training_name)
    .bind(&body.training_date)
    .bind(serde_json::to_string(&body.document_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(path.record_id)
    .bind(record.id)
    .execute(&state.db.pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound("Training record not found".to_string()));
    }

    let training = sqlx::query_as::<_, TrainingRecord>("SELECT * FROM training_records WHERE id = ?")
        .bind(path.record_id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(training.into()))
}

async fn delete_training(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<TrainingPath>,
) -> Result<Json<Value>> {
    let record = resolve_record(&state, &user, path.floorplan_id, &path.element_id).await?;

    let deleted = sqlx::query("DELETE FROM training_records WHERE id = ? AND element_id = ?")
        .bind(path.record_id)
        .bind(record.id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(AppError::NotFound("Training record not found".to_string()));
    }

    Ok(Json(json!({ "status": "deleted" })))
}
