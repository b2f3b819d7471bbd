use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::{BoundingBox, MapMarker};

/// Identity used to collapse repeated reports of the same station
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StationKey {
    Id(String),
    /// Stations without an id are identified by name and exact position
    Site {
        name: Option<String>,
        latitude: u64,
        longitude: u64,
    },
}

impl StationKey {
    pub fn new(id: Option<&str>, name: Option<&str>, latitude: f64, longitude: f64) -> Self {
        match id {
            Some(id) if !id.is_empty() => StationKey::Id(id.to_string()),
            _ => StationKey::Site {
                name: name.map(str::to_string),
                latitude: latitude.to_bits(),
                longitude: longitude.to_bits(),
            },
        }
    }
}

/// Common shape of every record kind that flows through merge, filtering and
/// the output writers.
pub trait StationRecord {
    /// Flat row written to CSV and GeoJSON, fields in `COLUMNS` order
    type Row: Serialize;
    /// Row written by the parquet record writer
    type Parquet;

    const COLUMNS: &'static [&'static str];
    const LATITUDE_COLUMN: &'static str = "lat";
    const LONGITUDE_COLUMN: &'static str = "lon";

    fn key(&self) -> StationKey;
    /// Ordering signal for "latest wins", compared as a plain string
    fn timestamp(&self) -> Option<&str>;
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
    fn row(&self) -> Self::Row;
    fn parquet_row(&self) -> Self::Parquet;
    fn marker(&self) -> MapMarker;
}

/// Keeps the latest record per station.
///
/// Records are stable-sorted by timestamp string (missing timestamps first) and
/// the last record of each station survives, in that sorted order. When no
/// record carries a timestamp there is nothing to order by and the input is
/// returned untouched.
pub fn latest_per_station<T: StationRecord>(records: Vec<T>) -> Vec<T> {
    if records.iter().all(|record| record.timestamp().is_none()) {
        return records;
    }

    let mut sorted = records;
    sorted.sort_by(|a, b| a.timestamp().cmp(&b.timestamp()));

    let mut last_seen: HashMap<StationKey, usize> = HashMap::new();
    for (index, record) in sorted.iter().enumerate() {
        last_seen.insert(record.key(), index);
    }

    sorted
        .into_iter()
        .enumerate()
        .filter(|(index, record)| last_seen.get(&record.key()) == Some(index))
        .map(|(_, record)| record)
        .collect()
}

pub fn filter_to_box<T: StationRecord>(records: Vec<T>, bbox: &BoundingBox) -> Vec<T> {
    records
        .into_iter()
        .filter(|record| bbox.contains(record.longitude(), record.latitude()))
        .collect()
}

/// Lenient numeric coercion: anything that isn't a finite number is absent
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First present, non-empty string among `keys`
pub fn first_string(properties: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| properties.get(*key).and_then(value_as_string))
}
