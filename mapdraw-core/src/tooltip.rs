//! Pointer tooltips for the measurement tool.

use crate::geometry::GeometryKind;
use crate::measure::{MeasureState, MeasureStateType};
use crate::snap::SnapType;

/// Maps a measurement state to tooltip text. `None` hides the tooltip.
pub type TooltipProvider = dyn Fn(&MeasureState) -> Option<String>;

/// Default English tooltips.
#[must_use]
pub fn measure_tooltip(state: &MeasureState) -> Option<String> {
    if state.dragging {
        return None;
    }
    let text = match state.state_type {
        MeasureStateType::Overlay => return None,
        MeasureStateType::Active => "Click to start measurement",
        MeasureStateType::Draw => match (state.snap, state.point_count) {
            (Some(SnapType::FirstPoint), _) => "Click on first point to close the polygon",
            (Some(SnapType::LastPoint), _) => "Click on last point to finish the line",
            (_, 0..=1) => "Click to continue drawing",
            _ => "Click to add a point, double-click to finish",
        },
        MeasureStateType::Modify => match state.snap {
            Some(SnapType::Vertex) if state.geometry_kind == Some(GeometryKind::Point) => "Drag to move the point",
            Some(SnapType::Vertex) => "Drag to move the vertex, press Delete to remove the selection",
            Some(SnapType::Edge) => "Click to add a point on the edge",
            Some(SnapType::Face) => "Click to select",
            _ => "Click outside to finish editing",
        },
        MeasureStateType::Select => match state.snap {
            Some(_) => "Click to select",
            None => "Click to start measurement",
        },
    };
    Some(text.to_string())
}
