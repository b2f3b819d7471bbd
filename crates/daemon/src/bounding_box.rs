use std::fmt;

use crate::RunError;

/// Geographic box in degrees, `(west, south, east, north)`, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, RunError> {
        if ![west, south, east, north].iter().all(|v| v.is_finite()) {
            return Err(RunError::InvalidOption(String::from(
                "bbox values must be finite numbers",
            )));
        }
        if west > east || south > north {
            return Err(RunError::InvalidOption(format!(
                "bbox must be ordered W S E N, got {} {} {} {}",
                west, south, east, north
            )));
        }
        Ok(BoundingBox {
            west,
            south,
            east,
            north,
        })
    }

    /// Build from the four `W S E N` values given on the command line or in config
    pub fn from_values(values: &[f64]) -> Result<Self, RunError> {
        match values {
            [west, south, east, north] => BoundingBox::new(*west, *south, *east, *north),
            _ => Err(RunError::InvalidOption(format!(
                "bbox needs exactly 4 values (W S E N), got {}",
                values.len()
            ))),
        }
    }

    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        (self.west..=self.east).contains(&longitude) && (self.south..=self.north).contains(&latitude)
    }

    /// `W,S,E,N` as expected by the OGC API `bbox` query parameter
    pub fn to_query_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}
