mod csv_writer;
mod geojson_writer;
mod html_map;
mod parquet_writer;

pub use csv_writer::*;
pub use geojson_writer::*;
pub use html_map::*;
pub use parquet_writer::*;
