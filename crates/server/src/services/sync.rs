// Special-element synchronizer. After every save the safety-record table is
// reconciled against the new element list: upsert-only, never delete. Records
// for elements removed from the canvas are kept on purpose; compliance data
// (risk assessments, training records) must survive a redraw.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    db::models::{Element, ElementType},
    error::Result,
};

/// Default name given to a freshly stubbed safety record.
pub fn stub_name(element_type: ElementType) -> String {
    format!("New {}", element_type.display_name())
}

/// Reconcile the elements table with the element list just written to the
/// floorplan row. Special elements get a stub record on first sight and a
/// timestamp touch afterwards; everything else is skipped.
pub async fn sync_special_elements(
    pool: &SqlitePool,
    floorplan_id: i64,
    elements: &[Element],
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    for element in elements {
        if !element.element_type.is_special() {
            continue;
        }

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM elements WHERE floorplan_id = ? AND element_id = ?",
        )
        .bind(floorplan_id)
        .bind(&element.id)
        .fetch_optional(pool)
        .await?;

        match existing {
            // Geometry and type changes are not propagated; only the
            // timestamp moves.
            Some(record_id) => {
                sqlx::query("UPDATE elements SET updated_at = ? WHERE id = ?")
                    .bind(&now)
                    .bind(record_id)
                    .execute(pool)
                    .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO elements (floorplan_id, element_id, element_type, name, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(floorplan_id)
                .bind(&element.id)
                .bind(element.element_type.as_str())
                .bind(stub_name(element.element_type))
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_names_follow_the_display_name() {
        assert_eq!(stub_name(ElementType::Machine), "New Machine");
        assert_eq!(stub_name(ElementType::Closet), "New Safety Closet");
        assert_eq!(stub_name(ElementType::EmergencyKit), "New Emergency Kit");
    }
}
