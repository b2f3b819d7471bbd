//! AQHI core library
//!
//! Shared pieces for the fetcher binary:
//! - Configuration loading (XDG-compliant)
//! - File system utilities
//! - Upstream endpoints and defaults

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::{create_dir_all, ensure_parent_dir};

/// Application name used for XDG paths
pub const APP_NAME: &str = "aqhi-map";

/// Master index listing every AQHI XML document on the datamart
pub const DEFAULT_MASTER_LIST_URL: &str =
    "https://dd.weather.gc.ca/air_quality/doc/AQHI_XML_File_List.xml";

/// GeoMet OGC API collection of realtime observations
pub const DEFAULT_OBSERVATIONS_API: &str =
    "https://api.weather.gc.ca/collections/aqhi-observations-realtime/items";

/// GeoMet OGC API collection of realtime forecasts
pub const DEFAULT_FORECASTS_API: &str =
    "https://api.weather.gc.ca/collections/aqhi-forecasts-realtime/items";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default number of newest XML documents parsed in xml-index mode
pub const DEFAULT_XML_LIMIT: usize = 300;

/// Page size requested from the OGC API
pub const DEFAULT_PAGE_SIZE: usize = 1000;
