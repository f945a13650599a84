use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::config::{AnalyticsConfig, MeteredField};
use crate::db::{DB, ReadingFilter};
use crate::error::QueryError;
use crate::reading::{DeviceMetadata, SensorReading};

pub const QUESTIONS: [(&str, &str); 3] = [
    (
        "1",
        "What is the average moisture inside my kitchen fridge in the past three hours?",
    ),
    (
        "2",
        "What is the average water consumption per cycle in my smart dishwasher?",
    ),
    (
        "3",
        "Which device consumed more electricity among my three IoT devices (two refrigerators and a dishwasher)?",
    ),
];

pub const EXIT_CODE: &str = "4";

const NO_WATER_DATA: &str = "No water consumption readings found for the dishwasher.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    FridgeMoisture,
    DishwasherWater,
    TopConsumer,
    Menu,
    Exit,
}

impl Query {
    /// Accepts a numeric code, the full question text, or a keyword.
    pub fn parse(selector: &str) -> Option<Query> {
        let selector = selector.trim();
        let query = match selector {
            "1" => Query::FridgeMoisture,
            "2" => Query::DishwasherWater,
            "3" => Query::TopConsumer,
            EXIT_CODE => Query::Exit,
            s if s.eq_ignore_ascii_case("exit") || s.eq_ignore_ascii_case("quit") => Query::Exit,
            s if s.eq_ignore_ascii_case("menu") || s.eq_ignore_ascii_case("help") => Query::Menu,
            s => {
                let (code, _) = QUESTIONS
                    .iter()
                    .find(|(_, question)| question.eq_ignore_ascii_case(s))?;
                return Query::parse(code);
            }
        };
        Some(query)
    }
}

pub fn menu_text() -> String {
    let mut menu = String::from("Select a query:\n");
    for (code, question) in QUESTIONS {
        menu.push_str(&format!("{code}. {question}\n"));
    }
    menu.push_str(&format!("{EXIT_CODE}. Exit"));
    menu
}

pub fn unknown_query_text() -> String {
    let listed: Vec<String> = QUESTIONS
        .iter()
        .map(|(code, question)| format!("{code}. {question}"))
        .collect();
    format!(
        "Sorry, this query cannot be processed. Please try one of the following:\n{}",
        listed.join("\n")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub text: String,
    pub records: usize,
}

impl QueryResult {
    fn new(text: impl Into<String>, records: usize) -> Self {
        Self {
            text: text.into(),
            records,
        }
    }
}

#[derive(Debug)]
pub struct QueryEngine {
    db: DB,
    config: AnalyticsConfig,
    reference_tz: Tz,
}

impl QueryEngine {
    pub fn new(db: DB, config: AnalyticsConfig) -> Result<Self, QueryError> {
        let reference_tz = config
            .reference_timezone
            .parse::<Tz>()
            .map_err(|_| QueryError::InvalidReferenceTimezone(config.reference_timezone.clone()))?;
        Ok(Self {
            db,
            config,
            reference_tz,
        })
    }

    pub fn db(&self) -> &DB {
        &self.db
    }

    pub fn run(&self, query: Query) -> Result<QueryResult, QueryError> {
        self.run_at(query, Utc::now())
    }

    pub fn run_at(&self, query: Query, now: DateTime<Utc>) -> Result<QueryResult, QueryError> {
        let result = match query {
            Query::FridgeMoisture => self.fridge_moisture(now)?,
            Query::DishwasherWater => self.dishwasher_water()?,
            Query::TopConsumer => self.top_consumer(now)?,
            Query::Menu => QueryResult::new(menu_text(), 0),
            Query::Exit => return Err(QueryError::Unsupported("exit ends the session")),
        };
        log::info!("{query:?} answered from {} records", result.records);
        Ok(result)
    }

    fn window_start(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueryError> {
        let hours = self.config.window_hours;
        let local = now.with_timezone(&self.reference_tz);
        let start = TimeDelta::try_hours(hours)
            .and_then(|window| local.checked_sub_signed(window))
            .ok_or(QueryError::WindowOutOfRange(hours))?;
        Ok(start.with_timezone(&Utc))
    }

    fn no_data_in_window(&self, kind: &str) -> QueryResult {
        QueryResult::new(
            format!(
                "No {kind} readings found in the past {} hours.",
                self.config.window_hours
            ),
            0,
        )
    }

    fn device(&self, id: &str) -> Result<DeviceMetadata, QueryError> {
        self.db
            .device(id)?
            .ok_or_else(|| QueryError::DeviceNotFound(id.to_string()))
    }

    fn fridge_moisture(&self, now: DateTime<Utc>) -> Result<QueryResult, QueryError> {
        let sources = &self.config.fridge_moisture;
        let devices = sources
            .iter()
            .map(|s| self.device(&s.device_id))
            .collect::<Result<Vec<_>, _>>()?;

        let since = self.window_start(now)?;
        let filter =
            ReadingFilter::devices(sources.iter().map(|s| s.device_id.as_str())).since(since);
        let readings = self.db.readings(&filter)?;
        let values = collect_values(&readings, sources);

        let Some(average) = mean(&values) else {
            return Ok(self.no_data_in_window("moisture"));
        };

        let first = &devices[0];
        let tz = device_timezone(first)?;
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        let text = format!(
            "Average moisture inside {} over the past {} hours: {} ({} readings since {})",
            names.join(", "),
            self.config.window_hours,
            format_measure(average, &first.unit),
            values.len(),
            since.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z"),
        );
        Ok(QueryResult::new(text, values.len()))
    }

    fn dishwasher_water(&self) -> Result<QueryResult, QueryError> {
        let source = &self.config.dishwasher_water;
        let device = self.device(&source.device_id)?;

        let readings = self
            .db
            .readings(&ReadingFilter::devices([source.device_id.as_str()]))?;
        let values = collect_values(&readings, std::slice::from_ref(source));

        let Some(average) = mean(&values) else {
            return Ok(QueryResult::new(NO_WATER_DATA, 0));
        };

        let text = format!(
            "Average water consumption per cycle of {}: {} ({} cycles)",
            device.name,
            format_measure(average, &device.unit),
            values.len(),
        );
        Ok(QueryResult::new(text, values.len()))
    }

    fn top_consumer(&self, now: DateTime<Utc>) -> Result<QueryResult, QueryError> {
        let consumers = &self.config.consumers;
        let devices = consumers
            .iter()
            .map(|c| self.device(&c.device_id))
            .collect::<Result<Vec<_>, _>>()?;

        let since = self.window_start(now)?;
        let filter =
            ReadingFilter::devices(consumers.iter().map(|c| c.device_id.as_str())).since(since);
        let readings = self.db.readings(&filter)?;

        let interval_hours = self.config.reading_interval_secs as f64 / 3600.0;
        let mut totals = vec![0.0; consumers.len()];
        let mut records = 0;
        for reading in &readings {
            for (i, consumer) in consumers.iter().enumerate() {
                if reading.device_id != consumer.device_id {
                    continue;
                }
                if let Some(amps) = reading.metered(&consumer.field) {
                    totals[i] += energy_kwh(amps, self.config.voltage, interval_hours);
                    records += 1;
                }
            }
        }

        if records == 0 {
            return Ok(self.no_data_in_window("electricity"));
        }

        let named: Vec<(&str, f64)> = devices
            .iter()
            .map(|d| d.name.as_str())
            .zip(totals.iter().copied())
            .collect();
        let Some(top) = top_consumer(&named) else {
            return Ok(self.no_data_in_window("electricity"));
        };

        let mut text = format!(
            "Electricity consumption over the past {} hours:\n",
            self.config.window_hours
        );
        for (name, kwh) in &named {
            text.push_str(&format!("  {name}: {kwh:.3} kWh\n"));
        }
        let (top_name, top_kwh) = named[top];
        text.push_str(&format!("Top consumer: {top_name} ({top_kwh:.3} kWh)"));
        Ok(QueryResult::new(text, records))
    }
}

fn device_timezone(device: &DeviceMetadata) -> Result<Tz, QueryError> {
    device
        .timezone
        .parse::<Tz>()
        .map_err(|_| QueryError::InvalidTimezone {
            device: device.id.clone(),
            timezone: device.timezone.clone(),
        })
}

fn collect_values(readings: &[SensorReading], sources: &[MeteredField]) -> Vec<f64> {
    readings
        .iter()
        .flat_map(|r| {
            sources
                .iter()
                .filter(move |s| s.device_id == r.device_id)
                .filter_map(move |s| r.metered(&s.field))
        })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Energy of one ammeter reading in kWh.
pub fn energy_kwh(amps: f64, voltage: f64, interval_hours: f64) -> f64 {
    amps * voltage * interval_hours / 1000.0
}

/// Index of the largest total. Exact ties go to the earliest entry.
pub fn top_consumer(totals: &[(&str, f64)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, (_, kwh)) in totals.iter().enumerate() {
        match best {
            Some(b) if totals[b].1 >= *kwh => {}
            _ => best = Some(i),
        }
    }
    best
}

/// `%`-style units attach directly to the number; others are space separated.
pub fn format_measure(value: f64, unit: &str) -> String {
    if unit.starts_with('%') {
        format!("{value:.2}{unit}")
    } else {
        format!("{value:.2} {unit}")
    }
}
