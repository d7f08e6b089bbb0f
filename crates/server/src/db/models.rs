use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub company_name: Option<String>,
    pub created_at: String,
}

/// One floorplan row. `data` is the JSON text of the element array; it always
/// parses to an array, possibly empty.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Floorplan {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub data: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Safety record for a special element, keyed by the owning floorplan and the
/// client-generated element id. Upserted by the synchronizer on every save.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ElementRecord {
    pub id: i64,
    pub floorplan_id: i64,
    pub element_id: String,
    pub element_type: String,
    pub name: String,
    pub description: String,
    pub dangers: String,
    pub safety_instructions: String,
    pub trained_employees: String,
    pub maintenance_schedule: String,
    pub last_maintenance: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RiskAssessment {
    pub id: i64,
    pub element_id: i64,
    pub description: String,
    pub frequency: i64,
    pub severity: i64,
    pub probability: i64,
    pub risk_score: i64,
    pub technical_measures: String,
    pub organizational_measures: String,
    pub personal_measures: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OperatingInstruction {
    pub id: i64,
    pub element_id: i64,
    pub hazard_symbols: String,
    pub protection_measures: String,
    pub first_aid: String,
    pub emergency_procedures: String,
    pub maintenance_disposal: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrainingRecord {
    pub id: i64,
    pub element_id: i64,
    pub employee_name: String,
    pub training_name: String,
    pub training_date: String,
    pub document_ids: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: i64,
    pub floorplan_id: i64,
    pub element_id: String,
    pub filename: String,
    pub storage_key: String,
    pub upload_date: String,
}

// ---------------------------------------------------------------------------
// Element document model (stored inside Floorplan.data, never its own row)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementType {
    Wall,
    DoorStandard,
    DoorEmergency,
    Window,
    Machine,
    Closet,
    EmergencyRoute,
    EmergencyKit,
}

impl ElementType {
    /// Special types carry attached safety records.
    pub fn is_special(self) -> bool {
        matches!(
            self,
            ElementType::Machine | ElementType::Closet | ElementType::EmergencyKit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::Wall => "wall",
            ElementType::DoorStandard => "door-standard",
            ElementType::DoorEmergency => "door-emergency",
            ElementType::Window => "window",
            ElementType::Machine => "machine",
            ElementType::Closet => "closet",
            ElementType::EmergencyRoute => "emergency-route",
            ElementType::EmergencyKit => "emergency-kit",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ElementType::Wall => "Wall",
            ElementType::DoorStandard => "Standard Door",
            ElementType::DoorEmergency => "Emergency Door",
            ElementType::Window => "Window",
            ElementType::Machine => "Machine",
            ElementType::Closet => "Safety Closet",
            ElementType::EmergencyRoute => "Emergency Route",
            ElementType::EmergencyKit => "Emergency Kit",
        }
    }
}

/// One drawable unit inside a floorplan's data blob. Geometry fields are only
/// meaningful per type (start/end for line-like types, width/height/radius
/// for the rest), so everything past id and type is optional and unknown keys
/// pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub element_type: ElementType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
