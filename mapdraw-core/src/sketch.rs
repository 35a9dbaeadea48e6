//! Point-count and ring-closure tracking for the sketch being drawn.

use crate::geometry::{Feature, FeatureId, Geometry};

/// Tracks the evolving geometry of one in-progress sketch feature.
///
/// Closure flags are only evaluated while the vertex count is stable, that is
/// while the user hovers instead of adding or removing a point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SketchSession {
    tracked: Option<FeatureId>,
    point_count: usize,
    snap_on_last_point: bool,
    finish_on_first_point: bool,
}

impl SketchSession {
    /// Create an empty, detached session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `feature`, resetting all counters.
    pub fn activate(&mut self, feature: &Feature) {
        tracing::debug!(feature = %feature.id, "sketch session attached");
        self.tracked = Some(feature.id);
        self.point_count = 1;
        self.snap_on_last_point = false;
        self.finish_on_first_point = false;
    }

    /// Stop tracking and zero every field.
    pub fn deactivate(&mut self) {
        if let Some(id) = self.tracked.take() {
            tracing::debug!(feature = %id, "sketch session detached");
        }
        self.point_count = 0;
        self.snap_on_last_point = false;
        self.finish_on_first_point = false;
    }

    /// Whether a sketch feature is being tracked.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.tracked.is_some()
    }

    /// The tracked feature, if any.
    #[must_use]
    pub const fn tracked(&self) -> Option<FeatureId> {
        self.tracked
    }

    /// Number of sketch vertices, excluding a ring's closing vertex.
    #[must_use]
    pub const fn point_count(&self) -> usize {
        self.point_count
    }

    /// True iff the last two vertices coincide.
    #[must_use]
    pub const fn is_snap_on_last_point(&self) -> bool {
        self.snap_on_last_point
    }

    /// True iff the last vertex reached the first one without having been
    /// snapped on the previous vertex the tick before.
    #[must_use]
    pub const fn is_finish_on_first_point(&self) -> bool {
        self.finish_on_first_point
    }

    /// Feed a geometry mutation of the sketch feature.
    ///
    /// A different feature than the tracked one restarts the session.
    pub fn on_geometry_change(&mut self, feature: &Feature) {
        if self.tracked != Some(feature.id) {
            self.activate(feature);
        }
        self.observe(&feature.geometry);
    }

    fn observe(&mut self, geometry: &Geometry) {
        let line = geometry.line_view();
        if line.len() != self.point_count {
            self.point_count = line.len();
            return;
        }
        if let (Some(first), [.., second_last, last]) = (line.first(), line) {
            // reads the previous tick's flag, so one coincidence never reports both
            self.finish_on_first_point = !self.snap_on_last_point && first == last;
            self.snap_on_last_point = last == second_last;
        }
    }
}
