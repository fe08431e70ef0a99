use adem_core::FeedbackRules;
use sqlx::{PgPool, Row};

pub struct StoredRules {
    pub rules: FeedbackRules,
    pub version: i32,
}

/// Load the singleton rules document, if one has been written.
pub async fn load(pool: &PgPool) -> Result<Option<StoredRules>, sqlx::Error> {
    let row = sqlx::query("SELECT rules, version FROM feedback_rules WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|row| {
        let rules_json: serde_json::Value = row.get("rules");
        serde_json::from_value(rules_json).ok().map(|rules| StoredRules {
            rules,
            version: row.get("version"),
        })
    }))
}

/// Write the singleton document, bumping its version. Returns the stored
/// version number.
pub async fn upsert(pool: &PgPool, rules: &FeedbackRules) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO feedback_rules (id, rules, version)
           VALUES (1, $1, 1)
           ON CONFLICT (id) DO UPDATE SET
               rules = EXCLUDED.rules,
               version = feedback_rules.version + 1,
               updated_at = now()
           RETURNING version"#,
    )
    .bind(serde_json::to_value(rules).unwrap_or_else(|_| serde_json::json!({})))
    .fetch_one(pool)
    .await?;
    Ok(row.get("version"))
}
