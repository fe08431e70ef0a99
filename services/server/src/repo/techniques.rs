use adem_core::Technique;
use sqlx::{PgPool, Row};
use tracing::warn;

fn row_to_technique(row: &sqlx::postgres::PgRow) -> Option<Technique> {
    let name: String = row.get("name");
    let protocol_json: serde_json::Value = row.get("protocol");
    let protocol = match serde_json::from_value(protocol_json) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(technique = %name, error = %e, "skipping technique with invalid protocol");
            return None;
        }
    };
    Some(Technique {
        name,
        description: row.get("description"),
        param_version: row.get("param_version"),
        show_in_app: row.get("show_in_app"),
        protocol,
        is_active: row.get("is_active"),
    })
}

/// All techniques that have not been soft-deleted.
pub async fn list_active(pool: &PgPool) -> Result<Vec<Technique>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM techniques WHERE is_active ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().filter_map(row_to_technique).collect())
}

/// The app-facing subset.
pub async fn list_public(pool: &PgPool) -> Result<Vec<Technique>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM techniques WHERE show_in_app AND is_active ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().filter_map(row_to_technique).collect())
}

pub async fn find_active(pool: &PgPool, name: &str) -> Result<Option<Technique>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM techniques WHERE name = $1 AND is_active")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().and_then(row_to_technique))
}

/// Create or fully replace a technique document (revives soft-deleted rows).
pub async fn upsert(pool: &PgPool, technique: &Technique) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO techniques (name, description, param_version, show_in_app, protocol, is_active)
           VALUES ($1, $2, $3, $4, $5, true)
           ON CONFLICT (name) DO UPDATE SET
               description = EXCLUDED.description,
               param_version = EXCLUDED.param_version,
               show_in_app = EXCLUDED.show_in_app,
               protocol = EXCLUDED.protocol,
               is_active = true,
               updated_at = now()"#,
    )
    .bind(&technique.name)
    .bind(&technique.description)
    .bind(&technique.param_version)
    .bind(technique.show_in_app)
    .bind(serde_json::to_value(&technique.protocol).unwrap_or_else(|_| serde_json::json!([])))
    .execute(pool)
    .await?;
    Ok(())
}

/// Soft delete; returns false when the technique does not exist.
pub async fn soft_delete(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE techniques SET is_active = false, updated_at = now() WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
