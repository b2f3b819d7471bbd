use std::fs;

use aqhi_daemon::{
    aqhi_color, aqhi_color_from_text, extract_xml_observations, filter_realtime_observation_urls,
    forecasts_from_features, parse_master_list, prepare, write_csv, write_geojson, write_html_map,
    BoundingBox, GeoFeature, IndexFilter, MapLayer, StationRecord,
};
use serde_json::{json, Value};

const MASTER_INDEX: &str = r#"<?xml version="1.0"?>
<AQHI_XML_File_List>
  <file><url>https://dd.weather.gc.ca/air_quality/aqhi/pnr/observation/realtime/xml/AQ_OBS_PNR_2024010100.xml</url></file>
  <file><url>https://dd.weather.gc.ca/air_quality/aqhi/pnr/observation/realtime/xml/AQ_OBS_PNR_2024010101.xml</url></file>
  <file><url>https://dd.weather.gc.ca/air_quality/aqhi/pyr/observation/realtime/xml/AQ_OBS_PYR_2024010101.xml</url></file>
  <file><url>https://dd.weather.gc.ca/air_quality/aqhi/pnr/forecast/realtime/xml/AQ_FCST_PNR_2024010101.xml</url></file>
</AQHI_XML_File_List>"#;

const EARLY: &str = r#"<root>
  <station><name>Calgary</name><lat>51.05</lat><lon>-114.07</lon><aqhi>2</aqhi><datetime>2024-01-01T00:00</datetime></station>
  <station><name>Vancouver</name><lat>49.28</lat><lon>-123.12</lon><aqhi>3</aqhi><datetime>2024-01-01T00:00</datetime></station>
</root>"#;

const LATE: &str = r#"<root>
  <station><name>Calgary</name><lat>51.05</lat><lon>-114.07</lon><aqhi>7.5</aqhi><datetime>2024-01-02T00:00</datetime></station>
  <station><name>Lost</name><lon>-114.0</lon><aqhi>1</aqhi></station>
</root>"#;

#[test]
fn test_xml_pipeline_end_to_end() {
    let urls = parse_master_list(MASTER_INDEX.as_bytes());
    assert_eq!(urls.len(), 4);
    let filter = IndexFilter {
        regions: vec![String::from("pnr")],
        limit: Some(300),
    };
    let selected = filter_realtime_observation_urls(&urls, &filter);
    assert_eq!(selected.len(), 2);
    assert!(selected[0].ends_with("2024010100.xml"));

    let mut observations = extract_xml_observations(EARLY.as_bytes()).unwrap();
    observations.extend(extract_xml_observations(LATE.as_bytes()).unwrap());
    assert_eq!(observations.len(), 3);

    let bbox = BoundingBox::new(-121.0, 48.0, -108.0, 61.0).unwrap();
    let points = prepare(observations, Some(&bbox));
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].name.as_deref(), Some("Calgary"));
    assert_eq!(points[0].aqhi, Some(7.5));
    assert_eq!(points[0].color(), "#fe0002");
    assert_eq!(aqhi_color_from_text("7.5"), points[0].color());

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("data").join("aqhi_points.csv");
    let geojson_path = dir.path().join("data").join("aqhi_points.geojson");
    let html_path = dir.path().join("data").join("aqhi_map.html");

    assert_eq!(write_csv(&points, &csv_path).unwrap(), 1);
    assert_eq!(write_geojson(&points, &geojson_path).unwrap(), 1);
    let layers = vec![MapLayer::from_records("AQHI (observed)", true, &points)];
    assert_eq!(write_html_map(&html_path, "AQHI", &layers).unwrap(), Some(1));

    let csv = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(
        csv.lines().next().unwrap(),
        "id,name,province,aqhi,observed,source_file,color,lat,lon"
    );
    assert_eq!(
        csv.lines().nth(1).unwrap(),
        ",Calgary,,7.5,2024-01-02T00:00,,#fe0002,51.05,-114.07"
    );

    let geojson: Value = serde_json::from_str(&fs::read_to_string(&geojson_path).unwrap()).unwrap();
    let feature = &geojson["features"][0];
    assert_eq!(feature["geometry"]["coordinates"], json!([-114.07, 51.05]));
    assert_eq!(feature["properties"]["color"], "#fe0002");
    assert_eq!(feature["properties"]["id"], Value::Null);
    assert!(feature["properties"].get("lat").is_none());

    let html = fs::read_to_string(&html_path).unwrap();
    assert!(html.contains("leaflet@1.9.4"));
    assert!(html.contains("Calgary"));
}

#[test]
fn test_forecast_pipeline_keeps_latest_issue() {
    let features: Vec<GeoFeature> = serde_json::from_value(json!([
        {
            "properties": {
                "location_id": "FAMXK",
                "location_name_en": "Calgary",
                "forecast_datetime": "2024-07-01T10:00:00Z",
                "publication_datetime": "2024-07-01T10:40:00Z",
                "forecast_period": {"period_1": {"aqhi": 3, "forecast_period_en": "Today"}}
            },
            "geometry": {"type": "Point", "coordinates": [-114.07, 51.05]}
        },
        {
            "properties": {
                "location_id": "FAMXK",
                "location_name_en": "Calgary",
                "forecast_datetime": "2024-07-01T22:00:00Z",
                "publication_datetime": "2024-07-01T22:40:00Z",
                "forecast_period": {"period_1": {"aqhi": 11, "forecast_period_en": "Tonight"}}
            },
            "geometry": {"type": "Point", "coordinates": [-114.07, 51.05]}
        },
        {
            "properties": {"location_id": "NOGEOM"},
            "geometry": null
        }
    ]))
    .unwrap();

    let forecasts = prepare(forecasts_from_features(&features), None);
    assert_eq!(forecasts.len(), 1);
    let next = forecasts[0].next_period();
    assert_eq!(next.label.as_deref(), Some("Tonight"));
    assert_eq!(next.color(), aqhi_color(Some(11.0)));

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("aqhi_forecasts.csv");
    write_csv(&forecasts, &csv_path).unwrap();
    let csv = fs::read_to_string(&csv_path).unwrap();
    let header: Vec<&str> = csv.lines().next().unwrap().split(',').collect();
    assert_eq!(header, aqhi_daemon::Forecast::COLUMNS);
    assert!(csv.contains("#640100"));
}
