use adem_core::{ParameterSet, DEFAULT_PARAM_VERSION};
use sqlx::{PgPool, Row};
use tracing::warn;

fn row_to_params(row: &sqlx::postgres::PgRow) -> Option<ParameterSet> {
    let version: String = row.get("version");
    let params_json: serde_json::Value = row.get("params");
    match serde_json::from_value::<ParameterSet>(params_json) {
        Ok(mut params) => {
            // The key columns win over whatever the document says.
            params.version = version;
            params.is_default = row.get("is_default");
            Some(params)
        }
        Err(e) => {
            warn!(version = %version, error = %e, "skipping parameter set with invalid document");
            None
        }
    }
}

pub async fn list_versions(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query("SELECT version FROM parameter_sets ORDER BY version")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("version")).collect())
}

pub async fn find(pool: &PgPool, version: &str) -> Result<Option<ParameterSet>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM parameter_sets WHERE version = $1")
        .bind(version)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().and_then(row_to_params))
}

pub async fn insert(pool: &PgPool, params: &ParameterSet) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO parameter_sets (version, params, is_default) VALUES ($1, $2, $3)")
        .bind(&params.version)
        .bind(serde_json::to_value(params).unwrap_or_else(|_| serde_json::json!({})))
        .bind(params.is_default)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update(pool: &PgPool, params: &ParameterSet) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE parameter_sets SET params = $2, is_default = $3 WHERE version = $1",
    )
    .bind(&params.version)
    .bind(serde_json::to_value(params).unwrap_or_else(|_| serde_json::json!({})))
    .bind(params.is_default)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Outcome of a parameter resolution: the snapshot plus whether the asked
/// version was found as stored (`exact`), or a fallback was substituted.
pub struct Resolution {
    pub params: ParameterSet,
    pub exact: bool,
}

/// Resolve a version with the fallback cascade: requested version →
/// `v1_default` → any stored set → built-in defaults.
pub async fn resolve(pool: &PgPool, version: Option<&str>) -> Result<Resolution, sqlx::Error> {
    if let Some(version) = version {
        if let Some(params) = find(pool, version).await? {
            return Ok(Resolution {
                params,
                exact: true,
            });
        }
    }
    if let Some(params) = find(pool, DEFAULT_PARAM_VERSION).await? {
        return Ok(Resolution {
            params,
            exact: version.is_none() || version == Some(DEFAULT_PARAM_VERSION),
        });
    }
    let row = sqlx::query("SELECT * FROM parameter_sets ORDER BY version LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if let Some(params) = row.as_ref().and_then(row_to_params) {
        return Ok(Resolution {
            params,
            exact: false,
        });
    }
    Ok(Resolution {
        params: ParameterSet::default(),
        exact: false,
    })
}

/// Resolve through a technique's configured parameter version.
pub async fn resolve_by_technique(pool: &PgPool, name: &str) -> Result<Resolution, sqlx::Error> {
    let technique = crate::repo::techniques::find_active(pool, name).await?;
    resolve(pool, technique.as_ref().map(|t| t.param_version.as_str())).await
}
