//! Measurement tool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MapResult;
use crate::persist::{PersistenceConfig, DEFAULT_SAVE_DELAY};
use crate::projection::Projection;
use crate::snap::{MOUSE_TOLERANCE_PX, TOUCH_TOLERANCE_PX};

/// Settings of the measurement tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Quiet period before a burst of edits is saved.
    pub save_delay_ms: u64,
    /// Running inside a constrained host. Saves immediately.
    pub embedded: bool,
    /// Projection of sketch coordinates, used for statistics.
    pub projection: Projection,
    /// Projection written to stored documents.
    pub storage_projection: Projection,
    /// Snap tolerance for mouse and pen input.
    pub mouse_tolerance_px: f32,
    /// Snap tolerance for touch input.
    pub touch_tolerance_px: f32,
    /// A previously stored sketch to reload on activation.
    pub restore_file_id: Option<String>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            // fits: the default is a whole number of milliseconds
            #[allow(clippy::cast_possible_truncation)]
            save_delay_ms: DEFAULT_SAVE_DELAY.as_millis() as u64,
            embedded: false,
            projection: Projection::WebMercator,
            storage_projection: Projection::Wgs84,
            mouse_tolerance_px: MOUSE_TOLERANCE_PX,
            touch_tolerance_px: TOUCH_TOLERANCE_PX,
            restore_file_id: None,
        }
    }
}

impl MeasurementConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MapError::Serialization`] for malformed JSON.
    pub fn from_json(json: &str) -> MapResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The save delay actually used: zero when embedded.
    #[must_use]
    pub const fn effective_save_delay(&self) -> Duration {
        if self.embedded {
            Duration::ZERO
        } else {
            Duration::from_millis(self.save_delay_ms)
        }
    }

    /// Debouncer settings derived from this config.
    #[must_use]
    pub const fn persistence(&self) -> PersistenceConfig {
        PersistenceConfig {
            delay: self.effective_save_delay(),
            source_projection: self.projection,
            target_projection: self.storage_projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeasurementConfig::default();
        assert_eq!(config.effective_save_delay(), Duration::from_millis(1000));
        assert_eq!(config.projection, Projection::WebMercator);
        assert!(config.restore_file_id.is_none());
    }

    #[test]
    fn test_embedded_saves_immediately() {
        let config = MeasurementConfig::from_json(r#"{"embedded": true, "save_delay_ms": 500}"#).expect("parse");
        assert_eq!(config.effective_save_delay(), Duration::ZERO);
        assert_eq!(config.persistence().delay, Duration::ZERO);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MeasurementConfig::from_json(r#"{"projection": "planar"}"#).expect("parse");
        assert_eq!(config.projection, Projection::Planar);
        assert_eq!(config.storage_projection, Projection::Wgs84);
        assert!((config.touch_tolerance_px - 12.0).abs() < f32::EPSILON);
        assert!(MeasurementConfig::from_json("{").is_err());
    }
}
