use std::sync::Arc;

use anyhow::{anyhow, Error};
use maud::html;
use parquet_derive::ParquetRecordWriter;
use serde::Serialize;
use slog::{info, warn, Logger};

use crate::{
    aqhi_color, fetch_all_features, filter_realtime_observation_urls, first_string,
    parse_master_list, parse_number, value_as_f64, BoundingBox, Element, Fetch, GeoFeature,
    IndexFilter, MapMarker, RunError, StationKey, StationRecord,
};

/// Canonical fields recognised in station XML documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Latitude,
    Longitude,
    Index,
    Observed,
}

/// Tag aliases used across the regional AQHI XML feeds
const TAG_ALIASES: &[(&str, Field)] = &[
    ("name", Field::Name),
    ("community", Field::Name),
    ("location_name_en", Field::Name),
    ("latitude", Field::Latitude),
    ("lat", Field::Latitude),
    ("longitude", Field::Longitude),
    ("lon", Field::Longitude),
    ("air_quality_health_index", Field::Index),
    ("aqhi", Field::Index),
    ("index", Field::Index),
    ("observation_datetime", Field::Observed),
    ("datetime", Field::Observed),
    ("date", Field::Observed),
    ("time", Field::Observed),
];

fn canonical_field(tag: &str) -> Option<Field> {
    TAG_ALIASES
        .iter()
        .find(|(alias, _)| *alias == tag)
        .map(|(_, field)| *field)
}

/// Observation as read from a source, before coordinates are known to exist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationReading {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub aqhi: Option<f64>,
    pub observed: Option<String>,
}

impl ObservationReading {
    /// Reads a station node whose children carry position and index
    pub fn from_element(node: &Element) -> Self {
        let mut reading = ObservationReading::default();
        for child in &node.children {
            let text = child.text.as_str();
            match canonical_field(&child.tag) {
                Some(Field::Name) if !text.is_empty() => reading.name = Some(text.to_string()),
                Some(Field::Latitude) => {
                    if let Some(value) = parse_number(text) {
                        reading.latitude = Some(value);
                    }
                }
                Some(Field::Longitude) => {
                    if let Some(value) = parse_number(text) {
                        reading.longitude = Some(value);
                    }
                }
                Some(Field::Index) => {
                    if let Some(value) = parse_number(text) {
                        reading.aqhi = Some(value);
                    }
                }
                Some(Field::Observed) if !text.is_empty() => {
                    reading.observed = Some(text.to_string())
                }
                _ => {}
            }
        }
        reading
    }

    pub fn from_feature(feature: &GeoFeature) -> Self {
        let (longitude, latitude) = feature.coordinates();
        ObservationReading {
            id: first_string(&feature.properties, &["id", "location_id"]),
            name: first_string(&feature.properties, &["location_name_en", "location_name_fr"]),
            province: first_string(&feature.properties, &["province"]),
            latitude,
            longitude,
            aqhi: feature.property("aqhi").and_then(value_as_f64),
            observed: first_string(&feature.properties, &["observation_datetime"]),
        }
    }
}

/// A node is a station when its children name a latitude, a longitude and an index
fn is_station_node(node: &Element) -> bool {
    let fields: Vec<Field> = node
        .children
        .iter()
        .filter_map(|child| canonical_field(&child.tag))
        .collect();
    [Field::Latitude, Field::Longitude, Field::Index]
        .iter()
        .all(|required| fields.contains(required))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub aqhi: Option<f64>,
    pub observed: Option<String>,
    pub source_file: Option<String>,
}

impl TryFrom<ObservationReading> for Observation {
    type Error = anyhow::Error;
    fn try_from(val: ObservationReading) -> Result<Self, Self::Error> {
        let (Some(latitude), Some(longitude)) = (val.latitude, val.longitude) else {
            return Err(anyhow!(
                "observation {:?} is missing a coordinate",
                val.id.as_ref().or(val.name.as_ref())
            ));
        };
        Ok(Observation {
            id: val.id,
            name: val.name,
            province: val.province,
            latitude,
            longitude,
            aqhi: val.aqhi,
            observed: val.observed,
            source_file: None,
        })
    }
}

impl Observation {
    pub fn color(&self) -> &'static str {
        aqhi_color(self.aqhi)
    }
}

/// Every station found in one XML document; errors only when the document
/// itself can't be parsed.
pub fn extract_xml_observations(raw: &[u8]) -> Result<Vec<Observation>, Error> {
    let root = Element::parse(raw)?;
    Ok(root
        .descendants()
        .filter(|node| is_station_node(node))
        .map(ObservationReading::from_element)
        .filter_map(|reading| Observation::try_from(reading).ok())
        .collect())
}

pub fn observations_from_features(features: &[GeoFeature]) -> Vec<Observation> {
    features
        .iter()
        .map(ObservationReading::from_feature)
        .filter_map(|reading| Observation::try_from(reading).ok())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ObservationRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub aqhi: Option<f64>,
    pub observed: Option<String>,
    pub source_file: Option<String>,
    pub color: &'static str,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, ParquetRecordWriter)]
pub struct ObservationParquet {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub aqhi: Option<f64>,
    pub observed: Option<String>,
    pub source_file: Option<String>,
    pub color: String,
    pub lat: f64,
    pub lon: f64,
}

impl StationRecord for Observation {
    type Row = ObservationRow;
    type Parquet = ObservationParquet;

    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "province",
        "aqhi",
        "observed",
        "source_file",
        "color",
        "lat",
        "lon",
    ];

    fn key(&self) -> StationKey {
        StationKey::new(
            self.id.as_deref(),
            self.name.as_deref(),
            self.latitude,
            self.longitude,
        )
    }

    fn timestamp(&self) -> Option<&str> {
        self.observed.as_deref()
    }

    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }

    fn row(&self) -> ObservationRow {
        ObservationRow {
            id: self.id.clone(),
            name: self.name.clone(),
            province: self.province.clone(),
            aqhi: self.aqhi,
            observed: self.observed.clone(),
            source_file: self.source_file.clone(),
            color: self.color(),
            lat: self.latitude,
            lon: self.longitude,
        }
    }

    fn parquet_row(&self) -> ObservationParquet {
        let row = self.row();
        ObservationParquet {
            id: row.id,
            name: row.name,
            province: row.province,
            aqhi: row.aqhi,
            observed: row.observed,
            source_file: row.source_file,
            color: row.color.to_string(),
            lat: row.lat,
            lon: row.lon,
        }
    }

    fn marker(&self) -> MapMarker {
        let popup = html! {
            b { (self.name.as_deref().unwrap_or("(unknown)")) }
            br;
            "AQHI: " (self.aqhi.map(|v| v.to_string()).unwrap_or_else(|| String::from("—")))
            br;
            (self.observed.as_deref().unwrap_or(""))
        };
        MapMarker {
            latitude: self.latitude,
            longitude: self.longitude,
            color: self.color(),
            popup: popup.into_string(),
        }
    }
}

pub struct ObservationService {
    pub logger: Logger,
    pub fetcher: Arc<dyn Fetch>,
}

impl ObservationService {
    pub fn new(logger: Logger, fetcher: Arc<dyn Fetch>) -> Self {
        ObservationService { logger, fetcher }
    }

    /// Resolves the master index to realtime observation documents and
    /// extracts every station from each of them. Documents that fail to
    /// download or parse are skipped.
    pub async fn get_xml_index_observations(
        &self,
        master_url: &str,
        filter: &IndexFilter,
    ) -> Result<Vec<Observation>, RunError> {
        info!(self.logger, "fetching master index from {}", master_url);
        let master = self
            .fetcher
            .get(master_url, &[])
            .await
            .map_err(|source| RunError::MasterIndex {
                url: master_url.to_string(),
                source,
            })?;

        let all_urls = parse_master_list(&master);
        let urls = filter_realtime_observation_urls(&all_urls, filter);
        info!(
            self.logger,
            "master index lists {} documents, {} selected",
            all_urls.len(),
            urls.len()
        );
        if urls.is_empty() {
            return Err(RunError::NoSources);
        }

        let total = urls.len();
        let mut observations = vec![];
        for (done, url) in urls.iter().enumerate() {
            match self.fetch_document(url).await {
                Ok(found) => observations.extend(found),
                Err(err) => warn!(self.logger, "failed {}: {}", url, err),
            }
            let progress = ((done + 1) as f64 / total as f64) * 100_f64;
            info!(
                self.logger,
                "downloaded {}/{} documents, progress: {:.2}%",
                done + 1,
                total,
                progress
            );
        }

        if observations.is_empty() {
            return Err(RunError::NoRecords("observation"));
        }
        Ok(observations)
    }

    async fn fetch_document(&self, url: &str) -> Result<Vec<Observation>, Error> {
        let raw = self.fetcher.get(url, &[]).await?;
        let mut found = extract_xml_observations(&raw)?;
        for observation in found.iter_mut() {
            observation.source_file = Some(url.to_string());
        }
        Ok(found)
    }

    pub async fn get_geomet_observations(
        &self,
        api_url: &str,
        bbox: Option<&BoundingBox>,
        page_size: usize,
    ) -> Result<Vec<Observation>, Error> {
        info!(self.logger, "fetching observations from {}", api_url);
        let features =
            fetch_all_features(self.fetcher.as_ref(), &self.logger, api_url, bbox, page_size)
                .await?;
        let observations = observations_from_features(&features);
        info!(
            self.logger,
            "{} observation features, {} with coordinates",
            features.len(),
            observations.len()
        );
        Ok(observations)
    }
}
