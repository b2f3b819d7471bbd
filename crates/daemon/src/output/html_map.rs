use std::fs;
use std::path::Path;

use anyhow::{anyhow, Error};
use aqhi_core::ensure_parent_dir;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{StationRecord, AQHI_COLORS, MISSING_COLOR};

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

const MAP_STYLE: &str = r#"
html, body { height: 100%; margin: 0; }
#map { height: 100%; width: 100%; }
.legend { background: white; padding: 6px 8px; font: 12px sans-serif; line-height: 18px; border-radius: 4px; box-shadow: 0 0 12px rgba(0,0,0,0.2); }
.legend i { width: 14px; height: 14px; float: left; margin-right: 6px; opacity: 0.9; }
.generated { font-size: 10px; color: #555; margin-top: 4px; }
"#;

/// Reads `MAP_LAYERS` and the center set just before it.
const MAP_SCRIPT: &str = r#"
const map = L.map('map').setView(MAP_CENTER, 5);
L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
  maxZoom: 18,
  attribution: '&copy; OpenStreetMap contributors'
}).addTo(map);
const overlays = {};
for (const layer of MAP_LAYERS) {
  const group = L.layerGroup();
  for (const m of layer.markers) {
    L.circleMarker([m.lat, m.lon], {
      radius: 7, color: '#333333', weight: 1, fillColor: m.color, fillOpacity: 0.85
    }).bindPopup(m.popup).addTo(group);
  }
  if (layer.show) { group.addTo(map); }
  overlays[layer.name] = group;
}
L.control.layers(null, overlays, { collapsed: false }).addTo(map);
const legend = L.control({ position: 'bottomright' });
legend.onAdd = function () { return document.getElementById('legend'); };
legend.addTo(map);
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    pub color: &'static str,
    /// Already-escaped HTML
    pub popup: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapLayer {
    pub name: String,
    /// Visible when the page loads
    pub show: bool,
    pub markers: Vec<MapMarker>,
}

impl MapLayer {
    pub fn from_records<T: StationRecord>(name: &str, show: bool, records: &[T]) -> Self {
        MapLayer {
            name: name.to_string(),
            show,
            markers: records.iter().map(StationRecord::marker).collect(),
        }
    }
}

/// Median latitude and longitude of the first layer with markers
pub fn map_center(layers: &[MapLayer]) -> Option<(f64, f64)> {
    let markers = &layers.iter().find(|layer| !layer.markers.is_empty())?.markers;
    let latitude = median(markers.iter().map(|m| m.latitude).collect())?;
    let longitude = median(markers.iter().map(|m| m.longitude).collect())?;
    Some((latitude, longitude))
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn legend(generated: &str) -> Markup {
    html! {
        div id="legend" class="legend" {
            strong { "AQHI" }
            br;
            @for (band, color) in AQHI_COLORS.iter().enumerate() {
                i style={"background:" (color)} {}
                @if band + 1 < AQHI_COLORS.len() {
                    (band + 1)
                } @else {
                    "10+"
                }
                br;
            }
            i style={"background:" (MISSING_COLOR)} {}
            "missing"
            div class="generated" { "Generated " (generated) }
        }
    }
}

/// JSON that is safe to drop inside a `<script>` element
fn script_json<T: Serialize>(value: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

/// Renders a standalone Leaflet page, `None` when no layer has a marker.
pub fn render_map(
    title: &str,
    layers: &[MapLayer],
    generated: &str,
) -> Result<Option<String>, Error> {
    let Some((latitude, longitude)) = map_center(layers) else {
        return Ok(None);
    };
    let data = format!(
        "const MAP_CENTER = {};\nconst MAP_LAYERS = {};",
        script_json(&[latitude, longitude])?,
        script_json(&layers)?
    );

    let page = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                link rel="stylesheet" href=(LEAFLET_CSS);
                script src=(LEAFLET_JS) {}
                style { (PreEscaped(MAP_STYLE)) }
            }
            body {
                div id="map" {}
                (legend(generated))
                script { (PreEscaped(data)) }
                script { (PreEscaped(MAP_SCRIPT)) }
            }
        }
    };
    Ok(Some(page.into_string()))
}

/// Writes the map and returns how many markers it holds, `None` when there
/// was nothing to map and no file was written.
pub fn write_html_map(path: &Path, title: &str, layers: &[MapLayer]) -> Result<Option<usize>, Error> {
    let generated = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let Some(page) = render_map(title, layers, &generated)? else {
        return Ok(None);
    };
    ensure_parent_dir(path)?;
    fs::write(path, page).map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))?;
    Ok(Some(layers.iter().map(|layer| layer.markers.len()).sum()))
}
