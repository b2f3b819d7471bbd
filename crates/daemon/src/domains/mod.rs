mod forecasts;
mod observations;
mod sources;

pub use forecasts::*;
pub use observations::*;
pub use sources::*;
