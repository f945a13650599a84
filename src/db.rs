use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params_from_iter, types::Value};

use crate::error::StoreError;
use crate::reading::{DeviceMetadata, SensorReading};

pub const DB_FILE: &str = "./home-iot.db";

/// Narrows a readings scan. Empty `device_ids` means every device.
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_ids: Vec<String>,
    pub since: Option<DateTime<Utc>>,
}

impl ReadingFilter {
    pub fn devices<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_ids: ids.into_iter().map(Into::into).collect(),
            since: None,
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

#[derive(Debug)]
pub struct DB {
    conn: Connection,
}

impl DB {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                timezone TEXT NOT NULL,
                unit TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS readings_device_timestamp
                ON readings (device_id, timestamp);
            ",
        )?;
        Ok(())
    }

    pub fn insert_device(&self, device: &DeviceMetadata) -> Result<(), StoreError> {
        self.conn.execute(
            r"
            INSERT INTO devices (id, name, timezone, unit) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                timezone = excluded.timezone,
                unit = excluded.unit",
            rusqlite::params![device.id, device.name, device.timezone, device.unit],
        )?;
        Ok(())
    }

    pub fn insert_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO readings (device_id, timestamp, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                reading.device_id,
                reading.timestamp.timestamp_millis(),
                reading.payload.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn device(&self, id: &str) -> Result<Option<DeviceMetadata>, StoreError> {
        let device = self
            .conn
            .query_row(
                "SELECT id, name, timezone, unit FROM devices WHERE id = ?1",
                [id],
                |row| {
                    Ok(DeviceMetadata {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        timezone: row.get(2)?,
                        unit: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(device)
    }

    /// Readings matching `filter`, oldest first.
    pub fn readings(&self, filter: &ReadingFilter) -> Result<Vec<SensorReading>, StoreError> {
        let mut sql = String::from("SELECT id, device_id, timestamp, payload FROM readings");
        let mut clauses = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if !filter.device_ids.is_empty() {
            let placeholders = vec!["?"; filter.device_ids.len()].join(", ");
            clauses.push(format!("device_id IN ({placeholders})"));
            params.extend(filter.device_ids.iter().cloned().map(Value::Text));
        }
        if let Some(since) = filter.since {
            clauses.push("timestamp >= ?".to_string());
            params.push(Value::Integer(since.timestamp_millis()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, device_id, millis, payload)| {
                let timestamp = DateTime::from_timestamp_millis(millis)
                    .ok_or(StoreError::InvalidTimestamp { id, millis })?;
                let payload = serde_json::from_str(&payload)
                    .map_err(|source| StoreError::CorruptPayload { id, source })?;
                Ok(SensorReading {
                    device_id,
                    timestamp,
                    payload,
                })
            })
            .collect()
    }

    pub fn count_readings(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub(crate) fn insert_raw_payload(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO readings (device_id, timestamp, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![device_id, timestamp.timestamp_millis(), payload],
        )?;
        Ok(())
    }
}
