use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;
use aqhi_core::DEFAULT_PAGE_SIZE;
use parquet::record::RecordWriter;
use slog::{error, info, warn, Logger};
use tokio::time::interval;

use crate::{
    filter_to_box, latest_per_station, write_csv, write_geojson, write_html_map, write_parquet,
    BoundingBox, Cli, Fetch, ForecastService, IndexFilter, Layer, MapLayer, ObservationService,
    RunError, SourceMode, StationRecord,
};

const OBSERVED_LAYER: &str = "AQHI (observed)";
const FORECAST_LAYER: &str = "AQHI (forecast: next period)";
const MAP_TITLE: &str = "AQHI map";

/// Where one record kind is written
#[derive(Debug, Clone)]
pub struct LayerOutput {
    pub csv: PathBuf,
    pub geojson: PathBuf,
    /// Written next to the CSV when requested
    pub parquet: Option<PathBuf>,
}

impl LayerOutput {
    pub fn new(csv: PathBuf, geojson: PathBuf, parquet: bool) -> Self {
        let parquet = parquet.then(|| csv.with_extension("parquet"));
        LayerOutput {
            csv,
            geojson,
            parquet,
        }
    }

    fn in_dir(dir: &Path, stem: &str, parquet: bool) -> Self {
        LayerOutput::new(
            dir.join(format!("{}.csv", stem)),
            dir.join(format!("{}.geojson", stem)),
            parquet,
        )
    }
}

/// One full pass: fetch, merge, filter and write every output.
pub async fn run(cli: &Cli, logger: &Logger, fetcher: Arc<dyn Fetch>) -> Result<(), Error> {
    let bbox = cli.bounding_box()?;
    if let Some(bbox) = bbox.as_ref() {
        info!(logger, "limiting to bounding box {}", bbox);
    }
    match cli.source() {
        SourceMode::XmlIndex => process_xml_index(cli, logger, fetcher, bbox.as_ref()).await,
        SourceMode::Geomet => process_geomet(cli, logger, fetcher, bbox.as_ref()).await,
    }
}

/// Runs every `period` until `shutdown` resolves. A failed run is logged and
/// the next tick runs again.
pub async fn run_on_interval<F>(
    cli: &Cli,
    logger: &Logger,
    fetcher: Arc<dyn Fetch>,
    period: Duration,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    info!(logger, "Wait time between data pulls: {} seconds", period.as_secs());
    tokio::pin!(shutdown);

    let mut run_interval = interval(period);
    loop {
        tokio::select! {
            _ = run_interval.tick() => {
                match run(cli, logger, fetcher.clone()).await {
                    Ok(_) => info!(logger, "Finished processing data, waiting {} seconds for next run", period.as_secs()),
                    Err(err) => error!(logger, "Error processing data: {}", err)
                }
            }
            _ = &mut shutdown => {
                info!(logger, "Shutting down");
                break;
            }
        }
    }
}

/// Latest record per station, then the optional bounding box
pub fn prepare<T: StationRecord>(records: Vec<T>, bbox: Option<&BoundingBox>) -> Vec<T> {
    let merged = latest_per_station(records);
    match bbox {
        Some(bbox) => filter_to_box(merged, bbox),
        None => merged,
    }
}

pub async fn process_xml_index(
    cli: &Cli,
    logger: &Logger,
    fetcher: Arc<dyn Fetch>,
    bbox: Option<&BoundingBox>,
) -> Result<(), Error> {
    let filter = IndexFilter {
        regions: cli.regions(),
        limit: Some(cli.limit()),
    };
    let service = ObservationService::new(logger.clone(), fetcher);
    let observations = service
        .get_xml_index_observations(&cli.master_url(), &filter)
        .await?;
    let parsed = observations.len();

    let points = prepare(observations, bbox);
    info!(
        logger,
        "{} observations parsed, {} stations kept",
        parsed,
        points.len()
    );

    let output = LayerOutput::new(cli.out_csv(), cli.out_geojson(), cli.parquet());
    write_layer(logger, &points, &output)?;

    if let Some(path) = cli.out_html() {
        draw_map(
            logger,
            &path,
            &[MapLayer::from_records(OBSERVED_LAYER, true, &points)],
        );
    }
    Ok(())
}

pub async fn process_geomet(
    cli: &Cli,
    logger: &Logger,
    fetcher: Arc<dyn Fetch>,
    bbox: Option<&BoundingBox>,
) -> Result<(), Error> {
    let out_dir = cli.out_dir();
    let mut map_layers = vec![];
    let mut total = 0;
    // first collection that could not be fetched, reported once the rest is written
    let mut unreachable: Option<RunError> = None;

    for layer in cli.layers() {
        match layer {
            Layer::Observations => {
                let service = ObservationService::new(logger.clone(), fetcher.clone());
                let fetched = service
                    .get_geomet_observations(&cli.observations_url(), bbox, DEFAULT_PAGE_SIZE)
                    .await;
                let observations = match fetched {
                    Ok(observations) => prepare(observations, bbox),
                    Err(source) => {
                        warn!(logger, "observations layer failed: {}", source);
                        unreachable.get_or_insert(RunError::Unreachable {
                            url: cli.observations_url(),
                            source,
                        });
                        continue;
                    }
                };
                let output = LayerOutput::in_dir(&out_dir, "aqhi_observations", cli.parquet());
                write_layer(logger, &observations, &output)?;
                total += observations.len();
                map_layers.push(MapLayer::from_records(OBSERVED_LAYER, true, &observations));
            }
            Layer::Forecasts => {
                let service = ForecastService::new(logger.clone(), fetcher.clone());
                let fetched = service
                    .get_geomet_forecasts(&cli.forecasts_url(), bbox, DEFAULT_PAGE_SIZE)
                    .await;
                let forecasts = match fetched {
                    Ok(forecasts) => prepare(forecasts, bbox),
                    Err(source) => {
                        warn!(logger, "forecasts layer failed: {}", source);
                        unreachable.get_or_insert(RunError::Unreachable {
                            url: cli.forecasts_url(),
                            source,
                        });
                        continue;
                    }
                };
                let output = LayerOutput::in_dir(&out_dir, "aqhi_forecasts", cli.parquet());
                write_layer(logger, &forecasts, &output)?;
                total += forecasts.len();
                map_layers.push(MapLayer::from_records(FORECAST_LAYER, false, &forecasts));
            }
        }
    }

    if let Some(path) = cli.out_html() {
        draw_map(logger, &path, &map_layers);
    }

    if let Some(err) = unreachable {
        return Err(err.into());
    }
    if total == 0 {
        return Err(RunError::NoRecords("geomet").into());
    }
    Ok(())
}

/// CSV and GeoJSON always, parquet when asked for
pub fn write_layer<T>(logger: &Logger, records: &[T], output: &LayerOutput) -> Result<(), Error>
where
    T: StationRecord,
    for<'a> &'a [T::Parquet]: RecordWriter<T::Parquet>,
{
    let rows = write_csv(records, &output.csv)?;
    info!(logger, "Wrote {} ({} rows)", output.csv.display(), rows);

    let features = write_geojson(records, &output.geojson)?;
    info!(logger, "Wrote {} ({} rows)", output.geojson.display(), features);

    if let Some(path) = output.parquet.as_ref() {
        let rows = write_parquet(records, path)?;
        info!(logger, "Wrote {} ({} rows)", path.display(), rows);
    }
    Ok(())
}

/// The map is a convenience; failing to draw it never fails the run.
fn draw_map(logger: &Logger, path: &Path, layers: &[MapLayer]) {
    match write_html_map(path, MAP_TITLE, layers) {
        Ok(Some(markers)) => info!(logger, "Wrote {} ({} markers)", path.display(), markers),
        Ok(None) => info!(logger, "No data to map; skipping HTML map"),
        Err(err) => warn!(logger, "failed to write map {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockFetch;
    use anyhow::anyhow;
    use serde_json::json;
    use slog::o;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const MASTER: &str = "https://dd.example.test/AQHI_XML_File_List.xml";
    const ATL_DOC: &str =
        "https://dd.example.test/air_quality/aqhi/atl/observation/realtime/xml/AQ_OBS_ATL_2024010215.xml";
    const ONT_DOC: &str =
        "https://dd.example.test/air_quality/aqhi/ont/observation/realtime/xml/AQ_OBS_ONT_2024010215.xml";
    const OBS_API: &str = "https://api.example.test/collections/aqhi-observations-realtime/items";
    const FCST_API: &str = "https://api.example.test/collections/aqhi-forecasts-realtime/items";

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn master_index() -> Vec<u8> {
        format!("<files><url>{}</url><url>{}</url></files>", ATL_DOC, ONT_DOC).into_bytes()
    }

    fn station_doc(name: &str, lat: f64, lon: f64, aqhi: &str, when: &str) -> Vec<u8> {
        format!(
            "<root><station><name>{}</name><lat>{}</lat><lon>{}</lon><aqhi>{}</aqhi><datetime>{}</datetime></station></root>",
            name, lat, lon, aqhi, when
        )
        .into_bytes()
    }

    fn cli_in(dir: &Path) -> Cli {
        Cli {
            master_url: Some(MASTER.to_string()),
            observations_url: Some(OBS_API.to_string()),
            forecasts_url: Some(FCST_API.to_string()),
            out_dir: Some(dir.display().to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_xml_index_run_writes_all_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path());

        let mut fetcher = MockFetch::new();
        fetcher
            .expect_get()
            .withf(|url, _| url == MASTER)
            .returning(|_, _| Ok(master_index()));
        fetcher
            .expect_get()
            .withf(|url, _| url == ATL_DOC)
            .returning(|_, _| {
                Ok(station_doc("Halifax", 44.65, -63.57, "3", "2024-01-02T15:00:00Z"))
            });
        fetcher
            .expect_get()
            .withf(|url, _| url == ONT_DOC)
            .returning(|_, _| Err(anyhow!("404 Not Found")));

        run(&cli, &logger(), Arc::new(fetcher)).await.unwrap();

        let csv = fs::read_to_string(dir.path().join("aqhi_points.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().contains("Halifax"));
        assert!(csv.contains(ATL_DOC));
        assert!(dir.path().join("aqhi_points.geojson").exists());
        assert!(dir.path().join("aqhi_map.html").exists());
        assert!(!dir.path().join("aqhi_points.parquet").exists());
    }

    #[tokio::test]
    async fn test_xml_index_bbox_can_empty_the_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_in(dir.path());
        cli.regions = Some(vec![String::from("atl")]);
        cli.bbox = Some(vec![-121.0, 48.0, -108.0, 61.0]);
        cli.parquet = true;

        let mut fetcher = MockFetch::new();
        fetcher
            .expect_get()
            .withf(|url, _| url == MASTER)
            .returning(|_, _| Ok(master_index()));
        fetcher
            .expect_get()
            .withf(|url, _| url == ATL_DOC)
            .times(1)
            .returning(|_, _| {
                Ok(station_doc("Halifax", 44.65, -63.57, "3", "2024-01-02T15:00:00Z"))
            });

        run(&cli, &logger(), Arc::new(fetcher)).await.unwrap();

        let csv = fs::read_to_string(dir.path().join("aqhi_points.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(dir.path().join("aqhi_points.parquet").exists());
        assert!(!dir.path().join("aqhi_map.html").exists());
    }

    #[tokio::test]
    async fn test_xml_index_unreachable_master_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path());
        let mut fetcher = MockFetch::new();
        fetcher
            .expect_get()
            .returning(|_, _| Err(anyhow!("connection refused")));

        let err = run(&cli, &logger(), Arc::new(fetcher)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::MasterIndex { .. })
        ));
    }

    fn page(features: Vec<serde_json::Value>) -> Vec<u8> {
        serde_json::to_vec(&json!({"type": "FeatureCollection", "features": features, "links": []}))
            .unwrap()
    }

    #[tokio::test]
    async fn test_geomet_unreachable_collection_fails_after_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_in(dir.path());
        cli.source = Some(SourceMode::Geomet);
        cli.out_html = Some(dir.path().join("map.html").display().to_string());

        let mut fetcher = MockFetch::new();
        fetcher
            .expect_get()
            .withf(|url, _| url == OBS_API)
            .returning(|_, _| Err(anyhow!("503 Service Unavailable")));
        fetcher
            .expect_get()
            .withf(|url, _| url == FCST_API)
            .returning(|_, _| {
                Ok(page(vec![json!({
                    "properties": {
                        "location_id": "CAQHI",
                        "location_name_en": "Calgary",
                        "forecast_datetime": "2024-07-01T10:00:00Z",
                        "publication_datetime": "2024-07-01T10:40:00Z",
                        "forecast_period": {"period_1": {"aqhi": 7.5, "forecast_period_en": "Today"}}
                    },
                    "geometry": {"type": "Point", "coordinates": [-114.07, 51.05]}
                })]))
            });

        let err = run(&cli, &logger(), Arc::new(fetcher)).await.unwrap_err();
        match err.downcast_ref::<RunError>() {
            Some(RunError::Unreachable { url, .. }) => assert_eq!(url, OBS_API),
            other => panic!("expected an unreachable collection, got {:?}", other),
        }

        assert!(!dir.path().join("aqhi_observations.csv").exists());
        let csv = fs::read_to_string(dir.path().join("aqhi_forecasts.csv")).unwrap();
        assert!(csv.lines().nth(1).unwrap().contains("#fe0002"));
        let html = fs::read_to_string(dir.path().join("map.html")).unwrap();
        assert!(html.contains(FORECAST_LAYER));
    }

    #[tokio::test]
    async fn test_geomet_without_records_fails_after_writing_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_in(dir.path());
        cli.source = Some(SourceMode::Geomet);
        cli.layers = Some(vec![Layer::Observations]);

        let mut fetcher = MockFetch::new();
        fetcher
            .expect_get()
            .withf(|url, _| url == OBS_API)
            .times(1)
            .returning(|_, _| Ok(page(vec![])));

        let err = run(&cli, &logger(), Arc::new(fetcher)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::NoRecords(_))
        ));
        let csv = fs::read_to_string(dir.path().join("aqhi_observations.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(!dir.path().join("aqhi_forecasts.csv").exists());
    }

    #[tokio::test]
    async fn test_interval_keeps_running_after_failed_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(Notify::new());

        let mut fetcher = MockFetch::new();
        let (counter, notifier) = (calls.clone(), stop.clone());
        fetcher.expect_get().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                notifier.notify_one();
            }
            Err(anyhow!("connection refused"))
        });

        let shutdown = {
            let stop = stop.clone();
            async move { stop.notified().await }
        };
        tokio::time::timeout(
            Duration::from_secs(5),
            run_on_interval(
                &cli,
                &logger(),
                Arc::new(fetcher),
                Duration::from_millis(5),
                shutdown,
            ),
        )
        .await
        .expect("loop stops once shutdown resolves");

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(!dir.path().join("aqhi_points.csv").exists());
    }

    #[tokio::test]
    async fn test_inverted_bbox_is_rejected_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = cli_in(dir.path());
        cli.bbox = Some(vec![-100.0, 48.0, -120.0, 61.0]);

        let fetcher = MockFetch::new();
        let err = run(&cli, &logger(), Arc::new(fetcher)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::InvalidOption(_))
        ));
    }
}
