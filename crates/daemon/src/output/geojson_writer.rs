use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Error};
use aqhi_core::ensure_parent_dir;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::StationRecord;

#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Point,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Point {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// `[lon, lat]`
    pub coordinates: [f64; 2],
}

pub fn to_feature<T: StationRecord>(record: &T) -> Result<Feature, Error> {
    let mut properties = match serde_json::to_value(record.row())? {
        Value::Object(map) => map,
        other => return Err(anyhow!("row did not serialize to an object: {}", other)),
    };
    properties.shift_remove(T::LATITUDE_COLUMN);
    properties.shift_remove(T::LONGITUDE_COLUMN);

    Ok(Feature {
        kind: "Feature",
        geometry: Point {
            kind: "Point",
            coordinates: [record.longitude(), record.latitude()],
        },
        properties,
    })
}

pub fn to_feature_collection<T: StationRecord>(records: &[T]) -> Result<FeatureCollection, Error> {
    Ok(FeatureCollection {
        kind: "FeatureCollection",
        features: records.iter().map(to_feature).collect::<Result<_, _>>()?,
    })
}

pub fn write_geojson<T: StationRecord>(records: &[T], path: &Path) -> Result<usize, Error> {
    let collection = to_feature_collection(records)?;
    ensure_parent_dir(path)?;
    let file =
        File::create(path).map_err(|e| anyhow!("failed to create {}: {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(collection.features.len())
}
