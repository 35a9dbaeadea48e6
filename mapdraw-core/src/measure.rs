//! Interaction state of the measurement tool.
//!
//! Every relevant event is reduced into a fresh [`MeasureState`]. Listeners
//! are notified only when the new state differs by value from the previous one.

use serde::{Deserialize, Serialize};

use crate::geometry::{Coordinate, GeometryKind, Pixel};
use crate::observe::{Disposer, Observable};
use crate::sketch::SketchSession;
use crate::snap::SnapType;

/// Which interaction the tool is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureStateType {
    /// Drawing is armed but no sketch has been started.
    Active,
    /// A sketch is in progress.
    Draw,
    /// Features are selected and can be edited.
    Modify,
    /// Modify tooling is armed but nothing is selected.
    Select,
    /// A measurement overlay is being dragged.
    Overlay,
}

/// Snapshot of the measurement interaction.
///
/// Recomputed on every event and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureState {
    /// The interaction the tool is in.
    #[serde(rename = "type")]
    pub state_type: MeasureStateType,
    /// What the pointer is snapped to.
    pub snap: Option<SnapType>,
    /// Last known pointer position.
    pub coordinate: Option<Coordinate>,
    /// Sketch vertices, excluding a ring's closing vertex.
    pub point_count: usize,
    /// Whether a drag gesture is in progress.
    pub dragging: bool,
    /// Kind of the first selected feature while modifying.
    pub geometry_kind: Option<GeometryKind>,
}

/// Everything the resolver looks at for one event.
#[derive(Debug, Clone, Copy)]
pub struct ResolverInput<'a> {
    /// Pointer map position, if known.
    pub coordinate: Option<Coordinate>,
    /// Pointer screen position, if known.
    pub pixel: Option<Pixel>,
    /// Whether a drag gesture is in progress.
    pub dragging: bool,
    /// Whether a measurement overlay is flagged draggable.
    pub overlay_draggable: bool,
    /// Whether the draw sub-interaction is active.
    pub draw_active: bool,
    /// Whether the modify sub-interaction is active.
    pub modify_active: bool,
    /// The sketch tracker.
    pub sketch: &'a SketchSession,
    /// Raw snap classification at the pointer.
    pub snap: Option<SnapType>,
    /// Kinds of the currently selected features, in selection order.
    pub selection: &'a [GeometryKind],
    /// Number of features already stored in the drawing layer.
    pub persisted_features: usize,
}

/// Reduce the previous state and the current inputs into a new state.
///
/// Rules are checked in priority order; the first match wins:
/// overlay drag, then draw, then modify, then the fallback.
#[must_use]
pub fn resolve(previous: Option<&MeasureState>, input: &ResolverInput<'_>) -> MeasureState {
    let mut state = MeasureState {
        state_type: MeasureStateType::Active,
        snap: None,
        coordinate: input.coordinate,
        point_count: input.sketch.point_count(),
        dragging: input.dragging,
        geometry_kind: None,
    };

    if input.overlay_draggable {
        state.state_type = MeasureStateType::Overlay;
        return state;
    }

    if input.draw_active {
        state.snap = input.snap;
        if input.sketch.is_active() {
            state.state_type = MeasureStateType::Draw;
            if input.sketch.is_finish_on_first_point() {
                state.snap = Some(SnapType::FirstPoint);
            } else if input.sketch.is_snap_on_last_point() {
                state.snap = Some(SnapType::LastPoint);
            }
        }
        return state;
    }

    if input.modify_active {
        state.snap = input.snap;
        match input.selection.first() {
            None => state.state_type = MeasureStateType::Select,
            Some(kind) => {
                state.state_type = MeasureStateType::Modify;
                state.geometry_kind = Some(*kind);
            }
        }
        return state;
    }

    let detached = input.coordinate.is_none() && input.pixel.is_none();
    state.state_type = match previous {
        Some(prev) if detached && prev.state_type == MeasureStateType::Modify => {
            MeasureStateType::Select
        }
        None if input.persisted_features > 0 => MeasureStateType::Select,
        Some(prev) => prev.state_type,
        None => MeasureStateType::Active,
    };
    state
}

/// Holds the current [`MeasureState`] and notifies listeners on change.
#[derive(Debug, Clone)]
pub struct InteractionStateResolver {
    state: Observable<Option<MeasureState>>,
}

impl Default for InteractionStateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionStateResolver {
    /// Create a resolver with no state yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Observable::new(None),
        }
    }

    /// The current state, if any event has been resolved since the last reset.
    #[must_use]
    pub fn current(&self) -> Option<MeasureState> {
        self.state.get()
    }

    /// Recompute the state. Returns the new state only if it changed.
    pub fn update(&self, input: &ResolverInput<'_>) -> Option<MeasureState> {
        let previous = self.current();
        let next = resolve(previous.as_ref(), input);
        if previous.as_ref() == Some(&next) {
            return None;
        }
        tracing::debug!(state = ?next.state_type, snap = ?next.snap, points = next.point_count, "measure state changed");
        self.state.set(Some(next.clone()));
        Some(next)
    }

    /// Forget the current state, e.g. when the tool is deactivated.
    pub fn reset(&self) {
        self.state.set(None);
    }

    /// Register a listener for state changes.
    pub fn observe(&self, mut listener: impl FnMut(&MeasureState) + 'static) -> Disposer {
        self.state.observe(|s: &Option<MeasureState>| s.clone(), move |state| {
            if let Some(state) = state {
                listener(state);
            }
        })
    }
}
