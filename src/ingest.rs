use std::io::BufRead;

use anyhow::Context;
use serde::Deserialize;

use crate::db::DB;
use crate::reading::{DeviceMetadata, SensorReading};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Record {
    Device(DeviceMetadata),
    Reading(SensorReading),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub devices: usize,
    pub readings: usize,
}

pub fn ingest<R: BufRead>(db: &DB, reader: R) -> Result<IngestStats, anyhow::Error> {
    let mut stats = IngestStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("Failed to read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("Invalid record on line {line_no}"))?;
        match record {
            Record::Device(device) => {
                db.insert_device(&device)
                    .with_context(|| format!("Failed to store device on line {line_no}"))?;
                stats.devices += 1;
            }
            Record::Reading(reading) => {
                db.insert_reading(&reading)
                    .with_context(|| format!("Failed to store reading on line {line_no}"))?;
                stats.readings += 1;
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ReadingFilter;
    use std::io::Cursor;

    fn db() -> DB {
        let db = DB::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    #[test]
    fn test_ingest_devices_and_readings() {
        let db = db();
        let input = r#"
{"device": {"id": "fridge-1", "name": "Kitchen fridge", "timezone": "America/Los_Angeles", "unit": "% RH"}}

{"reading": {"device_id": "fridge-1", "timestamp": "2026-10-16T09:30:00Z", "payload": {"Moisture Meter - Fridge 1": 38.2}}}
{"reading": {"device_id": "fridge-1", "timestamp": "2026-10-16T09:31:00-07:00", "payload": {"Moisture Meter - Fridge 1": "38.4"}}}
"#;
        let stats = ingest(&db, Cursor::new(input)).unwrap();
        assert_eq!(stats, IngestStats { devices: 1, readings: 2 });
        assert!(db.device("fridge-1").unwrap().is_some());
        assert_eq!(db.readings(&ReadingFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_ingest_reports_line_number() {
        let db = db();
        let input = r#"{"device": {"id": "x", "name": "x", "timezone": "UTC", "unit": "A"}}
{"sensor": {}}
"#;
        let err = ingest(&db, Cursor::new(input)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid record on line 2");
    }
}
