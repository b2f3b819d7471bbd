use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Error};
use aqhi_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_FORECASTS_API, DEFAULT_MASTER_LIST_URL,
    DEFAULT_OBSERVATIONS_API, DEFAULT_TIMEOUT_SECS, DEFAULT_XML_LIMIT,
};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use reqwest::Client;
use serde::Deserialize;
use slog::{debug, o, Drain, Level, Logger};

use crate::{BoundingBox, RunError};

/// Upstream the station data is read from
#[derive(ValueEnum, Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Realtime observation XML documents listed in the datamart master index
    #[default]
    XmlIndex,
    /// GeoMet OGC API collections (observations and forecasts)
    Geomet,
}

/// GeoMet collection written as its own set of output files
#[derive(ValueEnum, Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Observations,
    Forecasts,
}

#[derive(Parser, Clone, Debug, Deserialize, Default)]
#[command(
    author,
    version,
    about = "AQHI fetcher - turns Canadian AQHI observations and forecasts into CSV, GeoJSON and an HTML map"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $AQHI_CONFIG, ./aqhi.toml,
    /// $XDG_CONFIG_HOME/aqhi-map/aqhi.toml, /etc/aqhi-map/aqhi.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "AQHI_LEVEL")]
    pub level: Option<String>,

    /// Data source: xml-index or geomet
    #[arg(short, long, value_enum, env = "AQHI_SOURCE")]
    pub source: Option<SourceMode>,

    /// Master index XML url (xml-index source)
    #[arg(long, env = "AQHI_MASTER_URL")]
    pub master_url: Option<String>,

    /// Observations collection items url (geomet source)
    #[arg(long, env = "AQHI_OBSERVATIONS_URL")]
    pub observations_url: Option<String>,

    /// Forecasts collection items url (geomet source)
    #[arg(long, env = "AQHI_FORECASTS_URL")]
    pub forecasts_url: Option<String>,

    /// Region filter for the xml-index source: atl ont pnr pyr que
    #[arg(long, num_args = 1..)]
    pub regions: Option<Vec<String>>,

    /// Max XML files to parse, newest first (0 parses all)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Bounding box filter: W S E N
    #[arg(
        long,
        num_args = 4,
        value_names = ["WEST", "SOUTH", "EAST", "NORTH"],
        allow_negative_numbers = true
    )]
    pub bbox: Option<Vec<f64>>,

    /// GeoMet layers to fetch, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    pub layers: Option<Vec<Layer>>,

    /// Output directory
    #[arg(short, long, env = "AQHI_OUT_DIR")]
    pub out_dir: Option<String>,

    /// CSV output path (xml-index source)
    #[arg(long)]
    pub out_csv: Option<String>,

    /// GeoJSON output path (xml-index source)
    #[arg(long)]
    pub out_geojson: Option<String>,

    /// HTML map output path, an empty value disables the map
    #[arg(long, alias = "html")]
    pub out_html: Option<String>,

    /// Also write every layer as parquet next to its CSV
    #[arg(long)]
    #[serde(default)]
    pub parquet: bool,

    /// Request timeout in seconds
    #[arg(short, long, env = "AQHI_TIMEOUT")]
    pub timeout: Option<u64>,

    /// HTTP User-Agent header for upstream requests
    #[arg(short, long, env = "AQHI_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Re-run every N seconds instead of exiting after one run
    #[arg(long, env = "AQHI_SLEEP_INTERVAL")]
    pub sleep_interval: Option<u64>,
}

impl Cli {
    pub fn source(&self) -> SourceMode {
        self.source.unwrap_or_default()
    }

    pub fn master_url(&self) -> String {
        self.master_url
            .clone()
            .unwrap_or_else(|| DEFAULT_MASTER_LIST_URL.to_string())
    }

    pub fn observations_url(&self) -> String {
        self.observations_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OBSERVATIONS_API.to_string())
    }

    pub fn forecasts_url(&self) -> String {
        self.forecasts_url
            .clone()
            .unwrap_or_else(|| DEFAULT_FORECASTS_API.to_string())
    }

    pub fn regions(&self) -> Vec<String> {
        self.regions.clone().unwrap_or_default()
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_XML_LIMIT)
    }

    pub fn bounding_box(&self) -> Result<Option<BoundingBox>, RunError> {
        self.bbox
            .as_deref()
            .map(BoundingBox::from_values)
            .transpose()
    }

    pub fn layers(&self) -> Vec<Layer> {
        let requested = self
            .layers
            .clone()
            .unwrap_or_else(|| vec![Layer::Observations, Layer::Forecasts]);
        [Layer::Observations, Layer::Forecasts]
            .into_iter()
            .filter(|layer| requested.contains(layer))
            .collect()
    }

    pub fn out_dir(&self) -> PathBuf {
        PathBuf::from(self.out_dir.clone().unwrap_or_else(|| "data".to_string()))
    }

    pub fn out_csv(&self) -> PathBuf {
        self.out_csv
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.out_dir().join("aqhi_points.csv"))
    }

    pub fn out_geojson(&self) -> PathBuf {
        self.out_geojson
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.out_dir().join("aqhi_points.geojson"))
    }

    /// The xml-index source draws a map unless told otherwise, geomet only on request
    pub fn out_html(&self) -> Option<PathBuf> {
        match (&self.out_html, self.source()) {
            (Some(path), _) if path.trim().is_empty() => None,
            (Some(path), _) => Some(PathBuf::from(path)),
            (None, SourceMode::XmlIndex) => Some(self.out_dir().join("aqhi_map.html")),
            (None, SourceMode::Geomet) => None,
        }
    }

    pub fn parquet(&self) -> bool {
        self.parquet
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("aqhi-map/{}", env!("CARGO_PKG_VERSION")))
    }

    pub fn sleep_interval(&self) -> Option<u64> {
        self.sleep_interval.filter(|secs| *secs > 0)
    }

    /// CLI values win, the config file fills whatever the CLI left unset
    pub fn merge(self, file_config: Cli) -> Cli {
        Cli {
            config: self.config,
            level: self.level.or(file_config.level),
            source: self.source.or(file_config.source),
            master_url: self.master_url.or(file_config.master_url),
            observations_url: self.observations_url.or(file_config.observations_url),
            forecasts_url: self.forecasts_url.or(file_config.forecasts_url),
            regions: self.regions.or(file_config.regions),
            limit: self.limit.or(file_config.limit),
            bbox: self.bbox.or(file_config.bbox),
            layers: self.layers.or(file_config.layers),
            out_dir: self.out_dir.or(file_config.out_dir),
            out_csv: self.out_csv.or(file_config.out_csv),
            out_geojson: self.out_geojson.or(file_config.out_geojson),
            out_html: self.out_html.or(file_config.out_html),
            parquet: self.parquet || file_config.parquet,
            timeout: self.timeout.or(file_config.timeout),
            user_agent: self.user_agent.or(file_config.user_agent),
            sleep_interval: self.sleep_interval.or(file_config.sleep_interval),
        }
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> Result<(Cli, ConfigSource), Error> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("AQHI_CONFIG", "aqhi.toml")
    };

    let file_config: Cli = load_config(&source)?;
    Ok((cli_args.merge(file_config), source))
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "warn" | "warning" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let log_level = match cli.level.as_ref() {
        Some(level) => parse_level(level),
        None => parse_level(&env::var("RUST_LOG").unwrap_or_default()),
    };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

/// HTTP seam used by every source; mocked in tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetch: Send + Sync {
    /// GET `url` with extra query parameters and return the raw body.
    /// Non-success statuses are errors.
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<Vec<u8>, Error>;
}

pub struct HttpFetcher {
    logger: Logger,
    client: Client,
}

impl HttpFetcher {
    pub fn new(logger: Logger, user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("error building http client: {}", e))?;
        Ok(Self { logger, client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<Vec<u8>, Error> {
        debug!(self.logger, "requesting: {}", url; "params" => query.len());
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("error sending request: {}", e))?;
        if !response.status().is_success() {
            return Err(anyhow!("error response from request: {}", response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| anyhow!("error reading body of request: {}", e))?;
        Ok(body.to_vec())
    }
}
