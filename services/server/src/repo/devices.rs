use adem_core::Device;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

fn row_to_device(row: &sqlx::postgres::PgRow) -> Device {
    Device {
        device_id: row.get("device_id"),
        name: row.get("name"),
        device_type: row.get("device_type"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        last_seen: row.get::<DateTime<Utc>, _>("last_seen"),
    }
}

/// Record an observation of a device: create it on first sight, bump
/// `last_seen` afterwards.
pub async fn observe(pool: &PgPool, device_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO devices (device_id) VALUES ($1)
           ON CONFLICT (device_id) DO UPDATE SET last_seen = now()"#,
    )
    .bind(device_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find(pool: &PgPool, device_id: &str) -> Result<Option<Device>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM devices WHERE device_id = $1")
        .bind(device_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_device))
}

pub async fn list(pool: &PgPool, limit: i64, skip: i64) -> Result<Vec<Device>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM devices ORDER BY last_seen DESC LIMIT $1 OFFSET $2")
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(row_to_device).collect())
}

pub async fn insert(pool: &PgPool, device: &Device) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO devices (device_id, name, device_type, created_at, last_seen)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(&device.device_id)
    .bind(&device.name)
    .bind(&device.device_type)
    .bind(device.created_at)
    .bind(device.last_seen)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ensure a device row exists without touching an existing one.
pub async fn ensure(pool: &PgPool, device_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO devices (device_id) VALUES ($1) ON CONFLICT (device_id) DO NOTHING")
        .bind(device_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update(
    pool: &PgPool,
    device_id: &str,
    name: Option<&str>,
    device_type: Option<&str>,
) -> Result<Option<Device>, sqlx::Error> {
    let row = sqlx::query(
        r#"UPDATE devices
           SET name = COALESCE($2, name),
               device_type = COALESCE($3, device_type)
           WHERE device_id = $1
           RETURNING *"#,
    )
    .bind(device_id)
    .bind(name)
    .bind(device_type)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_device))
}
