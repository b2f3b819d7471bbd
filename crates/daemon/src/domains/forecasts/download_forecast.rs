use std::sync::Arc;

use anyhow::{anyhow, Error};
use maud::html;
use parquet_derive::ParquetRecordWriter;
use serde::Serialize;
use serde_json::Value;
use slog::{info, Logger};

use crate::{
    aqhi_color, fetch_all_features, first_string, value_as_f64, BoundingBox, Fetch, GeoFeature,
    MapMarker, StationKey, StationRecord,
};

/// Number of upcoming periods published per station
pub const FORECAST_PERIODS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastPeriod {
    /// e.g. "Tonight", "Tomorrow"
    pub label: Option<String>,
    pub aqhi: Option<f64>,
}

impl ForecastPeriod {
    fn from_value(period: Option<&Value>) -> Self {
        let Some(period) = period.filter(|p| p.is_object()) else {
            return ForecastPeriod::default();
        };
        ForecastPeriod {
            label: first_string(period, &["forecast_period_en", "forecast_period_fr"]),
            aqhi: period.get("aqhi").and_then(value_as_f64),
        }
    }

    pub fn color(&self) -> &'static str {
        aqhi_color(self.aqhi)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastReading {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub forecast_datetime: Option<String>,
    pub publication_datetime: Option<String>,
    pub periods: [ForecastPeriod; FORECAST_PERIODS],
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ForecastReading {
    pub fn from_feature(feature: &GeoFeature) -> Self {
        let (longitude, latitude) = feature.coordinates();
        let periods_node = feature.property("forecast_period");
        ForecastReading {
            id: first_string(&feature.properties, &["id", "location_id"]),
            name: first_string(&feature.properties, &["location_name_en", "location_name_fr"]),
            province: first_string(&feature.properties, &["province"]),
            forecast_datetime: first_string(&feature.properties, &["forecast_datetime"]),
            publication_datetime: first_string(&feature.properties, &["publication_datetime"]),
            periods: std::array::from_fn(|index| {
                let key = format!("period_{}", index + 1);
                ForecastPeriod::from_value(periods_node.and_then(|node| node.get(&key)))
            }),
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub forecast_datetime: Option<String>,
    pub publication_datetime: Option<String>,
    pub periods: [ForecastPeriod; FORECAST_PERIODS],
    pub latitude: f64,
    pub longitude: f64,
}

impl TryFrom<ForecastReading> for Forecast {
    type Error = anyhow::Error;
    fn try_from(val: ForecastReading) -> Result<Self, Self::Error> {
        let (Some(latitude), Some(longitude)) = (val.latitude, val.longitude) else {
            return Err(anyhow!(
                "forecast {:?} is missing a coordinate",
                val.id.as_ref().or(val.name.as_ref())
            ));
        };
        Ok(Forecast {
            id: val.id,
            name: val.name,
            province: val.province,
            forecast_datetime: val.forecast_datetime,
            publication_datetime: val.publication_datetime,
            periods: val.periods,
            latitude,
            longitude,
        })
    }
}

impl Forecast {
    /// The next period is the one shown on the map
    pub fn next_period(&self) -> &ForecastPeriod {
        &self.periods[0]
    }
}

pub fn forecasts_from_features(features: &[GeoFeature]) -> Vec<Forecast> {
    features
        .iter()
        .map(ForecastReading::from_feature)
        .filter_map(|reading| Forecast::try_from(reading).ok())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ForecastRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub forecast_datetime: Option<String>,
    pub publication_datetime: Option<String>,
    pub p1_label: Option<String>,
    pub p1_aqhi: Option<f64>,
    pub p2_label: Option<String>,
    pub p2_aqhi: Option<f64>,
    pub p3_label: Option<String>,
    pub p3_aqhi: Option<f64>,
    pub p4_label: Option<String>,
    pub p4_aqhi: Option<f64>,
    pub p5_label: Option<String>,
    pub p5_aqhi: Option<f64>,
    pub p1_color: &'static str,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, ParquetRecordWriter)]
pub struct ForecastParquet {
    pub id: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub forecast_datetime: Option<String>,
    pub publication_datetime: Option<String>,
    pub p1_label: Option<String>,
    pub p1_aqhi: Option<f64>,
    pub p2_label: Option<String>,
    pub p2_aqhi: Option<f64>,
    pub p3_label: Option<String>,
    pub p3_aqhi: Option<f64>,
    pub p4_label: Option<String>,
    pub p4_aqhi: Option<f64>,
    pub p5_label: Option<String>,
    pub p5_aqhi: Option<f64>,
    pub p1_color: String,
    pub lat: f64,
    pub lon: f64,
}

impl StationRecord for Forecast {
    type Row = ForecastRow;
    type Parquet = ForecastParquet;

    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "province",
        "forecast_datetime",
        "publication_datetime",
        "p1_label",
        "p1_aqhi",
        "p2_label",
        "p2_aqhi",
        "p3_label",
        "p3_aqhi",
        "p4_label",
        "p4_aqhi",
        "p5_label",
        "p5_aqhi",
        "p1_color",
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
        self.forecast_datetime.as_deref()
    }

    fn latitude(&self) -> f64 {
        self.latitude
    }

    fn longitude(&self) -> f64 {
        self.longitude
    }

    fn row(&self) -> ForecastRow {
        let [p1, p2, p3, p4, p5] = self.periods.clone();
        ForecastRow {
            id: self.id.clone(),
            name: self.name.clone(),
            province: self.province.clone(),
            forecast_datetime: self.forecast_datetime.clone(),
            publication_datetime: self.publication_datetime.clone(),
            p1_color: p1.color(),
            p1_label: p1.label,
            p1_aqhi: p1.aqhi,
            p2_label: p2.label,
            p2_aqhi: p2.aqhi,
            p3_label: p3.label,
            p3_aqhi: p3.aqhi,
            p4_label: p4.label,
            p4_aqhi: p4.aqhi,
            p5_label: p5.label,
            p5_aqhi: p5.aqhi,
            lat: self.latitude,
            lon: self.longitude,
        }
    }

    fn parquet_row(&self) -> ForecastParquet {
        let row = self.row();
        ForecastParquet {
            id: row.id,
            name: row.name,
            province: row.province,
            forecast_datetime: row.forecast_datetime,
            publication_datetime: row.publication_datetime,
            p1_label: row.p1_label,
            p1_aqhi: row.p1_aqhi,
            p2_label: row.p2_label,
            p2_aqhi: row.p2_aqhi,
            p3_label: row.p3_label,
            p3_aqhi: row.p3_aqhi,
            p4_label: row.p4_label,
            p4_aqhi: row.p4_aqhi,
            p5_label: row.p5_label,
            p5_aqhi: row.p5_aqhi,
            p1_color: row.p1_color.to_string(),
            lat: row.lat,
            lon: row.lon,
        }
    }

    fn marker(&self) -> MapMarker {
        let next = self.next_period();
        let popup = html! {
            b { (self.name.as_deref().unwrap_or("(unknown)")) }
            br;
            (next.label.as_deref().unwrap_or("Next period")) ": "
            (next.aqhi.map(|v| v.to_string()).unwrap_or_else(|| String::from("—")))
            br;
            "Issued: " (self.publication_datetime.as_deref().unwrap_or(""))
        };
        MapMarker {
            latitude: self.latitude,
            longitude: self.longitude,
            color: next.color(),
            popup: popup.into_string(),
        }
    }
}

pub struct ForecastService {
    pub fetcher: Arc<dyn Fetch>,
    pub logger: Logger,
}

impl ForecastService {
    pub fn new(logger: Logger, fetcher: Arc<dyn Fetch>) -> Self {
        ForecastService { logger, fetcher }
    }

    pub async fn get_geomet_forecasts(
        &self,
        api_url: &str,
        bbox: Option<&BoundingBox>,
        page_size: usize,
    ) -> Result<Vec<Forecast>, Error> {
        info!(self.logger, "fetching forecasts from {}", api_url);
        let features =
            fetch_all_features(self.fetcher.as_ref(), &self.logger, api_url, bbox, page_size)
                .await?;
        let forecasts = forecasts_from_features(&features);
        info!(
            self.logger,
            "{} forecast features, {} with coordinates",
            features.len(),
            forecasts.len()
        );
        Ok(forecasts)
    }
}
