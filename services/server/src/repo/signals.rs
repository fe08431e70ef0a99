use adem_core::{BreathCycle, SignalKind, SignalPayload, SignalRecord};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

fn row_to_record(row: &sqlx::postgres::PgRow) -> Option<SignalRecord> {
    let signal: String = row.get("signal");
    let kind = SignalKind::parse(&signal)?;
    let payload_json: serde_json::Value = row.get("payload");
    let payload = match SignalPayload::from_json(kind, payload_json) {
        Ok(p) => p,
        Err(e) => {
            warn!(signal = %signal, error = %e, "skipping signal row with invalid payload");
            return None;
        }
    };
    Some(SignalRecord {
        device_id: row.get("device_id"),
        session_id: row.get("session_id"),
        signal: kind,
        ts: row.get("ts"),
        dt: row.get("dt"),
        payload,
    })
}

pub async fn insert(pool: &PgPool, record: &SignalRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO signals (device_id, session_id, signal, ts, dt, payload)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(&record.device_id)
    .bind(record.session_id)
    .bind(record.signal.as_str())
    .bind(record.ts)
    .bind(&record.dt)
    .bind(record.payload.to_json())
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a derivation batch atomically.
pub async fn insert_batch(pool: &PgPool, records: &[SignalRecord]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for record in records {
        sqlx::query(
            r#"INSERT INTO signals (device_id, session_id, signal, ts, dt, payload)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&record.device_id)
        .bind(record.session_id)
        .bind(record.signal.as_str())
        .bind(record.ts)
        .bind(&record.dt)
        .bind(record.payload.to_json())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub struct SignalFilter<'a> {
    pub device_id: Option<&'a str>,
    pub session_id: Option<Uuid>,
    pub signal: Option<SignalKind>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub limit: i64,
    pub skip: i64,
}

/// Filtered query, newest first.
pub async fn query(pool: &PgPool, filter: &SignalFilter<'_>) -> Result<Vec<SignalRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM signals
           WHERE ($1::text IS NULL OR device_id = $1)
             AND ($2::uuid IS NULL OR session_id = $2)
             AND ($3::text IS NULL OR signal = $3)
             AND ($4::bigint IS NULL OR ts >= $4)
             AND ($5::bigint IS NULL OR ts <= $5)
           ORDER BY ts DESC
           LIMIT $6 OFFSET $7"#,
    )
    .bind(filter.device_id)
    .bind(filter.session_id)
    .bind(filter.signal.map(SignalKind::as_str))
    .bind(filter.start_ts)
    .bind(filter.end_ts)
    .bind(filter.limit)
    .bind(filter.skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().filter_map(row_to_record).collect())
}

/// Bounded backfill, newest first.
pub async fn recent(
    pool: &PgPool,
    signal: SignalKind,
    device_id: Option<&str>,
    limit: i64,
) -> Result<Vec<SignalRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM signals
           WHERE signal = $1 AND ($2::text IS NULL OR device_id = $2)
           ORDER BY ts DESC
           LIMIT $3"#,
    )
    .bind(signal.as_str())
    .bind(device_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().filter_map(row_to_record).collect())
}

/// The breath cycle announced by the session's most recent `BreathTarget`.
pub async fn latest_breath_cycle(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Option<BreathCycle>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT payload FROM signals
           WHERE session_id = $1 AND signal = 'BreathTarget'
           ORDER BY ts DESC
           LIMIT 1"#,
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.and_then(|row| {
        let payload: serde_json::Value = row.get("payload");
        payload
            .get("breath_cycle")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }))
}
