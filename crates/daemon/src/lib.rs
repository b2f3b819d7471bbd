mod bounding_box;
mod domains;
mod error;
mod output;
mod palette;
mod runner;
mod station;
mod utils;
mod xml_tree;

pub use bounding_box::*;
pub use domains::*;
pub use error::*;
pub use output::*;
pub use palette::*;
pub use runner::*;
pub use station::*;
pub use utils::*;
pub use xml_tree::*;
