//! Ranging measurements and their display model

use serde::{Deserialize, Serialize};

/// Value shown for a field before any measurement arrives, and after a reset
pub const DISPLAY_BASELINE: &str = "0.00";

/// One position report. Fields are present depending on device capability.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurement {
    pub distance_m: Option<f64>,
    pub azimuth_deg: Option<f64>,
    pub elevation_deg: Option<f64>,
}

impl Measurement {
    pub fn distance(distance_m: f64) -> Self {
        Self {
            distance_m: Some(distance_m),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.distance_m.is_none() && self.azimuth_deg.is_none() && self.elevation_deg.is_none()
    }
}

/// Formatted distance/azimuth/elevation fields as the presentation layer
/// shows them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementDisplay {
    pub distance: String,
    pub azimuth: String,
    pub elevation: String,
}

impl Default for MeasurementDisplay {
    fn default() -> Self {
        Self::baseline()
    }
}

impl MeasurementDisplay {
    pub fn baseline() -> Self {
        Self {
            distance: DISPLAY_BASELINE.to_string(),
            azimuth: DISPLAY_BASELINE.to_string(),
            elevation: DISPLAY_BASELINE.to_string(),
        }
    }

    /// Overwrite the fields present in `m`; absent fields keep their last value.
    pub fn apply(&mut self, m: &Measurement) {
        if let Some(distance) = m.distance_m {
            self.distance = format_value(distance);
        }
        if let Some(azimuth) = m.azimuth_deg {
            self.azimuth = format_value(azimuth);
        }
        if let Some(elevation) = m.elevation_deg {
            self.elevation = format_value(elevation);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::baseline();
    }

    pub fn is_baseline(&self) -> bool {
        *self == Self::baseline()
    }
}

fn format_value(value: f64) -> String {
    format!("{:.2}", value)
}
