use adem_core::{Session, SessionStatus};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn row_to_session(row: &sqlx::postgres::PgRow) -> Session {
    let status: String = row.get("status");
    Session {
        session_id: row.get("session_id"),
        device_id: row.get("device_id"),
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        ended_at: row.get::<Option<DateTime<Utc>>, _>("ended_at"),
        technique_name: row.get("technique_name"),
        param_version: row.get("param_version"),
        target_rr: row.get("target_rr"),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Completed),
        last_emitted_ts: row.get("last_emitted_ts"),
    }
}

pub async fn insert(pool: &PgPool, session: &Session) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO sessions
           (session_id, device_id, started_at, ended_at, technique_name,
            param_version, target_rr, status, last_emitted_ts)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(session.session_id)
    .bind(&session.device_id)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(&session.technique_name)
    .bind(&session.param_version)
    .bind(session.target_rr)
    .bind(session.status.as_str())
    .bind(session.last_emitted_ts)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_by_id(pool: &PgPool, session_id: Uuid) -> Result<Option<Session>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM sessions WHERE session_id = $1")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_session))
}

/// The device's single active session, if any.
pub async fn find_active(pool: &PgPool, device_id: &str) -> Result<Option<Session>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT * FROM sessions WHERE device_id = $1 AND status = 'active' ORDER BY started_at DESC LIMIT 1",
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_session))
}

/// Terminate a session: set `ended_at` and the terminal status.
pub async fn end(
    pool: &PgPool,
    session_id: Uuid,
    ended_at: DateTime<Utc>,
    status: SessionStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET ended_at = $2, status = $3 WHERE session_id = $1")
        .bind(session_id)
        .bind(ended_at)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// In-place breath-target update on an already-active session.
pub async fn update_target(
    pool: &PgPool,
    session_id: Uuid,
    technique_name: Option<&str>,
    target_rr: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET technique_name = $2, target_rr = $3 WHERE session_id = $1")
        .bind(session_id)
        .bind(technique_name)
        .bind(target_rr)
        .execute(pool)
        .await?;
    Ok(())
}

/// Partial update from the REST surface; absent fields stay untouched.
pub async fn update_fields(
    pool: &PgPool,
    session_id: Uuid,
    technique_name: Option<&str>,
    param_version: Option<&str>,
    target_rr: Option<f64>,
) -> Result<Option<Session>, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE sessions
           SET technique_name = COALESCE($2, technique_name),
               param_version = COALESCE($3, param_version),
               target_rr = COALESCE($4, target_rr)
           WHERE session_id = $1
           RETURNING *"#,
    )
    .bind(session_id)
    .bind(technique_name)
    .bind(param_version)
    .bind(target_rr)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_session))
}

/// Advance the derived-record watermark; never moves it backwards.
pub async fn update_last_emitted(
    pool: &PgPool,
    session_id: Uuid,
    last_emitted_ts: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sessions SET last_emitted_ts = GREATEST(last_emitted_ts, $2) WHERE session_id = $1",
    )
    .bind(session_id)
    .bind(last_emitted_ts)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct SessionFilter<'a> {
    pub device_id: Option<&'a str>,
    pub status: Option<SessionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub skip: i64,
}

pub async fn list(pool: &PgPool, filter: &SessionFilter<'_>) -> Result<Vec<Session>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM sessions
           WHERE ($1::text IS NULL OR device_id = $1)
             AND ($2::text IS NULL OR status = $2)
             AND ($3::timestamptz IS NULL OR started_at >= $3)
             AND ($4::timestamptz IS NULL OR started_at <= $4)
           ORDER BY started_at DESC
           LIMIT $5 OFFSET $6"#,
    )
    .bind(filter.device_id)
    .bind(filter.status.map(SessionStatus::as_str))
    .bind(filter.start_date)
    .bind(filter.end_date)
    .bind(filter.limit)
    .bind(filter.skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_session).collect())
}
