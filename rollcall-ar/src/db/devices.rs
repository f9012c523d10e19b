//! Scanner device registry

use rollcall_common::db::models::Device;
use rollcall_common::time::now;
use rollcall_common::Result;
use sqlx::SqlitePool;

/// Register a device or update its name and room
pub async fn register_device(
    pool: &SqlitePool,
    device_id: &str,
    device_name: &str,
    room_number: &str,
) -> Result<Device> {
    let ts = now();

    sqlx::query(
        r#"
        INSERT INTO devices (device_id, device_name, room_number, last_ping, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (device_id) DO UPDATE SET
            device_name = excluded.device_name,
            room_number = excluded.room_number,
            last_ping = excluded.last_ping,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(device_id)
    .bind(device_name)
    .bind(room_number)
    .bind(ts)
    .bind(ts)
    .bind(ts)
    .execute(pool)
    .await?;

    Ok(Device {
        device_id: device_id.to_string(),
        device_name: device_name.to_string(),
        room_number: room_number.to_string(),
        last_ping: Some(ts),
    })
}

/// Refresh `last_ping`; returns false for unknown devices
pub async fn record_ping(pool: &SqlitePool, device_id: &str) -> Result<bool> {
    let ts = now();
    let result = sqlx::query("UPDATE devices SET last_ping = ?, updated_at = ? WHERE device_id = ?")
        .bind(ts)
        .bind(ts)
        .bind(device_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_device(pool: &SqlitePool, device_id: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "SELECT device_id, device_name, room_number, last_ping FROM devices WHERE device_id = ?",
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;

    Ok(device)
}
