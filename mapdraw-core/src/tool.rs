//! The measurement tool.
//!
//! Owns the drawing layer and turns raw input events into sketch edits,
//! selection changes and a stream of [`MeasureState`] values. Finished
//! sketches, vertex drags and deletions are handed to the persistence
//! debouncer, which stores the whole layer once the edits settle.
//!
//! The in-progress sketch is always a ring: the committed vertices, a floating
//! vertex following the pointer, and the closing vertex. It only becomes a
//! polygon if the user closes it on its first point; otherwise it is finished
//! as a line.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MeasurementConfig;
use crate::document;
use crate::error::MapResult;
use crate::event::{InputEvent, KeyAction, PointerEvent, PointerKind, PointerPhase};
use crate::geometry::{
    closest_on_segment, pixel_distance_sq, Coordinate, Feature, FeatureId, Geometry, GeometryKind, Pixel,
    Viewport,
};
use crate::handler::{HandlerOptions, LayerHandler, MapContext};
use crate::layers::LayerConstraints;
use crate::measure::{InteractionStateResolver, MeasureState, ResolverInput};
use crate::observe::Disposer;
use crate::persist::PersistenceDebouncer;
use crate::sketch::SketchSession;
use crate::snap::{classify_with_tolerance, HitTest, LayerHitTester, SnapType, VertexHit};
use crate::stats::{rectify, GeometryStats, GeometryStatsEngine};
use crate::storage::StoreResult;
use crate::tooltip::{measure_tooltip, TooltipProvider};
use crate::vector::{SharedLayer, VectorLayer};

/// Id of the measurement layer and of the tool itself.
pub const MEASURE_LAYER_ID: &str = "measure";

#[derive(Debug, Clone)]
struct Sketch {
    id: FeatureId,
    committed: Vec<Coordinate>,
    floating: Coordinate,
}

impl Sketch {
    fn start(at: Coordinate) -> Self {
        Self {
            id: FeatureId::new(),
            committed: vec![at],
            floating: at,
        }
    }

    fn geometry(&self) -> Geometry {
        let mut vertices = self.committed.clone();
        vertices.push(self.floating);
        Geometry::polygon_from_vertices(&vertices)
    }

    fn feature(&self) -> Feature {
        Feature::new(self.geometry()).with_id(self.id)
    }

    /// The committed vertices as a polygon if closed, as a line otherwise.
    fn finished(&self, closed: bool) -> Feature {
        let outline = Geometry::polygon_from_vertices(&self.committed);
        Feature::new(rectify(&outline, true, closed).into_owned()).with_id(self.id)
    }
}

#[derive(Debug, Clone, Copy)]
struct VertexDrag {
    feature: FeatureId,
    index: usize,
    changed: bool,
}

/// Vertex hits come from the selection, body hits from the whole layer.
struct ModifyHitTest<'a> {
    selected: LayerHitTester<'a>,
    layer: LayerHitTester<'a>,
}

impl HitTest for ModifyHitTest<'_> {
    fn vertex_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<VertexHit> {
        self.selected.vertex_hits(pixel, tolerance)
    }

    fn feature_hits(&self, pixel: Pixel, tolerance: f32) -> Vec<&Feature> {
        self.layer.feature_hits(pixel, tolerance)
    }

    fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.layer.feature(id)
    }
}

/// Draws, edits and measures sketches on the measurement layer.
pub struct MeasurementTool {
    options: HandlerOptions,
    config: MeasurementConfig,
    engine: GeometryStatsEngine,
    viewport: Viewport,
    layer: SharedLayer,
    debouncer: Option<PersistenceDebouncer>,
    resolver: InteractionStateResolver,
    session: SketchSession,
    sketch: Option<Sketch>,
    draw_active: bool,
    modify_active: bool,
    suspended: Option<(bool, bool)>,
    overlay_draggable: bool,
    selection: Vec<FeatureId>,
    drag: Option<VertexDrag>,
    snap: Option<SnapType>,
    coordinate: Option<Coordinate>,
    pixel: Option<Pixel>,
    pointer_kind: PointerKind,
    dragging: bool,
    tooltip_provider: Rc<TooltipProvider>,
    tooltip: Rc<RefCell<Option<String>>>,
    subscriptions: Option<Disposer>,
}

impl std::fmt::Debug for MeasurementTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementTool")
            .field("options", &self.options)
            .field("draw_active", &self.draw_active)
            .field("modify_active", &self.modify_active)
            .field("selection", &self.selection)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Default for MeasurementTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementTool {
    /// Create an inactive tool. Activate it through [`LayerHandler::on_activate`].
    #[must_use]
    pub fn new() -> Self {
        let config = MeasurementConfig::default();
        Self {
            options: HandlerOptions {
                layer_id: MEASURE_LAYER_ID.to_string(),
                label: "Measurement".to_string(),
                constraints: LayerConstraints {
                    always_top: true,
                    hidden: true,
                },
            },
            engine: GeometryStatsEngine::new(config.projection),
            config,
            viewport: Viewport::default(),
            layer: SharedLayer::new(VectorLayer::new(MEASURE_LAYER_ID)),
            debouncer: None,
            resolver: InteractionStateResolver::new(),
            session: SketchSession::new(),
            sketch: None,
            draw_active: false,
            modify_active: false,
            suspended: None,
            overlay_draggable: false,
            selection: Vec::new(),
            drag: None,
            snap: None,
            coordinate: None,
            pixel: None,
            pointer_kind: PointerKind::Mouse,
            dragging: false,
            tooltip_provider: Rc::new(measure_tooltip),
            tooltip: Rc::new(RefCell::new(None)),
            subscriptions: None,
        }
    }

    /// Replace the tooltip text provider.
    #[must_use]
    pub fn with_tooltip_provider(mut self, provider: impl Fn(&MeasureState) -> Option<String> + 'static) -> Self {
        self.tooltip_provider = Rc::new(provider);
        self
    }

    /// Set the viewport used for hit testing.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// The measurement layer.
    #[must_use]
    pub fn layer(&self) -> &SharedLayer {
        &self.layer
    }

    /// The current interaction state.
    #[must_use]
    pub fn state(&self) -> Option<MeasureState> {
        self.resolver.current()
    }

    /// The current tooltip text.
    #[must_use]
    pub fn tooltip(&self) -> Option<String> {
        self.tooltip.borrow().clone()
    }

    /// Selected feature ids.
    #[must_use]
    pub fn selection(&self) -> &[FeatureId] {
        &self.selection
    }

    /// Whether a sketch is in progress.
    #[must_use]
    pub const fn is_drawing(&self) -> bool {
        self.sketch.is_some()
    }

    /// The in-progress sketch including its floating vertex.
    #[must_use]
    pub fn sketch_geometry(&self) -> Option<Geometry> {
        self.sketch.as_ref().map(Sketch::geometry)
    }

    /// Ids returned by the latest successful save.
    #[must_use]
    pub fn store_result(&self) -> Option<StoreResult> {
        self.debouncer.as_ref().and_then(PersistenceDebouncer::last_result)
    }

    /// Register a listener for state changes. It is released on deactivation.
    pub fn on_state_change(&mut self, listener: impl FnMut(&MeasureState) + 'static) {
        let disposer = self.resolver.observe(listener);
        self.subscriptions.get_or_insert_with(Disposer::new).merge(disposer);
    }

    /// Statistics of what the user is looking at.
    ///
    /// While drawing this is the rectified sketch; otherwise the sum over the
    /// selection.
    #[must_use]
    pub fn stats(&self) -> GeometryStats {
        if let Some(sketch) = &self.sketch {
            return self
                .engine
                .effective_stats(&sketch.geometry(), true, self.session.is_finish_on_first_point());
        }
        let layer = self.layer.read();
        self.engine
            .aggregate(self.selection.iter().filter_map(|id| layer.get(*id)).map(|f| &f.geometry))
    }

    /// Select features of the measurement layer and switch to editing.
    ///
    /// Unknown ids are ignored. An empty selection re-enables drawing.
    pub fn select(&mut self, ids: &[FeatureId]) -> Option<MeasureState> {
        {
            let layer = self.layer.read();
            self.selection = ids.iter().copied().filter(|id| layer.get(*id).is_some()).collect();
        }
        if self.selection.is_empty() {
            self.enable_draw();
        } else {
            self.abort_sketch();
            self.enable_modify();
        }
        self.recompute()
    }

    /// Temporarily disable drawing and editing, e.g. while another tool has focus.
    pub fn suspend(&mut self) -> Option<MeasureState> {
        if self.suspended.is_none() {
            self.suspended = Some((self.draw_active, self.modify_active));
            self.draw_active = false;
            self.modify_active = false;
        }
        self.recompute()
    }

    /// Undo [`Self::suspend`].
    pub fn resume(&mut self) -> Option<MeasureState> {
        if let Some((draw, modify)) = self.suspended.take() {
            self.draw_active = draw;
            self.modify_active = modify;
        }
        self.recompute()
    }

    /// Persist pending edits now.
    pub async fn flush(&self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.flush().await;
        }
    }

    /// Feed one input event. Returns the new state if it changed.
    pub fn handle_event(&mut self, event: &InputEvent) -> Option<MeasureState> {
        match event {
            InputEvent::Pointer(pointer) => self.on_pointer(pointer),
            InputEvent::Key { .. } => match KeyAction::from_event(event) {
                Some(KeyAction::RemoveLast) => self.remove_last(),
                Some(KeyAction::Reset) => self.reset(),
                None => {}
            },
            InputEvent::OverlayDrag { draggable } => self.overlay_draggable = *draggable,
        }
        self.snap = self.pixel.and_then(|pixel| self.classify(pixel));
        self.recompute()
    }

    fn on_pointer(&mut self, pointer: &PointerEvent) {
        self.dragging = pointer.dragging;
        self.pointer_kind = pointer.kind;
        self.pixel = pointer.pixel;
        self.coordinate = pointer.coordinate;

        match pointer.phase {
            PointerPhase::Move => {
                if self.drag.is_some() {
                    if let Some(to) = pointer.coordinate.filter(|_| pointer.dragging) {
                        self.drag_to(to);
                    }
                } else if self.draw_active {
                    if let Some(at) = pointer.coordinate {
                        self.move_floating(at);
                    }
                }
            }
            PointerPhase::Click => {
                if self.draw_active {
                    if let Some(at) = pointer.coordinate {
                        self.move_floating(at);
                        self.draw_click(at);
                    }
                } else if self.modify_active {
                    if let Some(pixel) = pointer.pixel {
                        self.modify_click(pixel);
                    }
                }
            }
            PointerPhase::DoubleClick => {
                if self.draw_active {
                    self.finish_on_double_click(pointer.coordinate);
                }
            }
            PointerPhase::Down => {
                if self.modify_active {
                    if let Some(pixel) = pointer.pixel {
                        self.begin_drag(pixel);
                    }
                }
            }
            PointerPhase::Up => self.end_drag(),
        }
    }

    fn tolerance(&self) -> f32 {
        match self.pointer_kind {
            PointerKind::Touch => self.config.touch_tolerance_px,
            PointerKind::Mouse | PointerKind::Pen => self.config.mouse_tolerance_px,
        }
    }

    fn classify(&self, pixel: Pixel) -> Option<SnapType> {
        let layer = self.layer.read();
        let all = LayerHitTester::new(layer.features(), &self.viewport);
        if !self.modify_active {
            return classify_with_tolerance(pixel, self.tolerance(), &all);
        }
        let selected = self.selected_features(&layer);
        let overlay = ModifyHitTest {
            selected: LayerHitTester::new(&selected, &self.viewport),
            layer: all,
        };
        classify_with_tolerance(pixel, self.tolerance(), &overlay)
    }

    fn selected_features(&self, layer: &VectorLayer) -> Vec<Feature> {
        self.selection.iter().filter_map(|id| layer.get(*id).cloned()).collect()
    }

    fn move_floating(&mut self, at: Coordinate) {
        let Some(sketch) = &self.sketch else {
            return;
        };
        let at = self.snap_to_vertex(sketch, at);
        if let Some(sketch) = &mut self.sketch {
            sketch.floating = at;
            self.session.on_geometry_change(&sketch.feature());
        }
    }

    /// The first vertex (closing a polygon) or the last one (ending a line)
    /// when the pointer is within tolerance of it, `at` otherwise.
    fn snap_to_vertex(&self, sketch: &Sketch, at: Coordinate) -> Coordinate {
        let pixel = self.pixel.unwrap_or_else(|| self.viewport.to_pixel(at));
        let tolerance = self.tolerance();
        let committed = &sketch.committed;
        let first = committed.first().filter(|_| committed.len() >= 3);
        let last = committed.last().filter(|_| committed.len() >= 2);
        [first, last]
            .into_iter()
            .flatten()
            .find(|vertex| pixel_distance_sq(self.viewport.to_pixel(**vertex), pixel) <= tolerance * tolerance)
            .copied()
            .unwrap_or(at)
    }

    fn draw_click(&mut self, at: Coordinate) {
        let Some(sketch) = &mut self.sketch else {
            let sketch = Sketch::start(at);
            let feature = sketch.feature();
            self.session.activate(&feature);
            self.session.on_geometry_change(&feature);
            self.sketch = Some(sketch);
            return;
        };

        let committed = sketch.committed.len();
        if self.session.is_finish_on_first_point() {
            if committed >= 3 {
                self.finish(true);
            }
        } else if self.session.is_snap_on_last_point() {
            if committed >= 2 {
                self.finish(false);
            }
        } else {
            sketch.committed.push(sketch.floating);
            self.session.on_geometry_change(&sketch.feature());
        }
    }

    fn finish_on_double_click(&mut self, at: Option<Coordinate>) {
        let Some(sketch) = &mut self.sketch else {
            return;
        };
        if let Some(at) = at {
            if sketch.committed.last() != Some(&at) {
                sketch.committed.push(at);
            }
        }
        if sketch.committed.len() >= 2 {
            self.finish(false);
        }
    }

    fn finish(&mut self, closed: bool) {
        let Some(sketch) = self.sketch.take() else {
            return;
        };
        let feature = sketch.finished(closed);
        let id = feature.id;
        tracing::debug!(feature = %id, kind = ?feature.geometry.kind(), "sketch finished");
        self.layer.write().upsert(feature);
        self.session.deactivate();
        self.selection = vec![id];
        self.enable_modify();
        self.notify_mutated();
    }

    fn abort_sketch(&mut self) {
        if self.sketch.take().is_some() {
            tracing::debug!("sketch aborted");
        }
        self.session.deactivate();
    }

    fn modify_click(&mut self, pixel: Pixel) {
        let hit = {
            let layer = self.layer.read();
            LayerHitTester::new(layer.features(), &self.viewport)
                .feature_hits(pixel, self.tolerance())
                .first()
                .map(|f| f.id)
        };
        match hit {
            Some(id) => self.selection = vec![id],
            None => {
                self.selection.clear();
                self.enable_draw();
            }
        }
    }

    fn begin_drag(&mut self, pixel: Pixel) {
        let tolerance = self.tolerance();
        let target = {
            let layer = self.layer.read();
            let selected = self.selected_features(&layer);
            let tester = LayerHitTester::new(&selected, &self.viewport);
            tester.vertex_hits(pixel, tolerance).into_iter().next().and_then(|hit| {
                let owner = layer.get(hit.owner)?;
                match owner.geometry.line_view().iter().position(|c| *c == hit.coordinate) {
                    Some(index) => Some((hit.owner, index, None)),
                    None => {
                        let segment = self.nearest_segment(&owner.geometry, pixel)?;
                        Some((hit.owner, segment + 1, Some(hit.coordinate)))
                    }
                }
            })
        };
        let Some((feature, index, insert)) = target else {
            return;
        };

        let mut changed = false;
        if let Some(at) = insert {
            let mut layer = self.layer.write();
            changed = layer
                .get_mut(feature)
                .is_some_and(|f| f.geometry.insert_vertex(index, at));
            if !changed {
                return;
            }
        }
        tracing::debug!(feature = %feature, index, inserted = changed, "vertex drag started");
        self.drag = Some(VertexDrag {
            feature,
            index,
            changed,
        });
    }

    fn nearest_segment(&self, geometry: &Geometry, pixel: Pixel) -> Option<usize> {
        geometry
            .segments()
            .map(|(a, b)| {
                let closest = closest_on_segment(pixel, self.viewport.to_pixel(a), self.viewport.to_pixel(b));
                pixel_distance_sq(pixel, closest)
            })
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }

    fn drag_to(&mut self, to: Coordinate) {
        let Some(drag) = &mut self.drag else {
            return;
        };
        let mut layer = self.layer.write();
        if let Some(feature) = layer.get_mut(drag.feature) {
            drag.changed |= feature.geometry.move_vertex(drag.index, to);
        }
    }

    fn end_drag(&mut self) {
        if let Some(drag) = self.drag.take() {
            if drag.changed {
                self.notify_mutated();
            }
        }
    }

    fn remove_last(&mut self) {
        if let Some(sketch) = &mut self.sketch {
            sketch.committed.pop();
            if sketch.committed.is_empty() {
                self.abort_sketch();
            } else {
                self.session.on_geometry_change(&sketch.feature());
            }
            return;
        }
        if self.selection.is_empty() {
            return;
        }
        {
            let mut layer = self.layer.write();
            for id in self.selection.drain(..) {
                if let Err(e) = layer.remove(id) {
                    tracing::warn!("Failed to remove selected feature: {e}");
                }
            }
        }
        self.drag = None;
        self.notify_mutated();
    }

    fn reset(&mut self) {
        self.abort_sketch();
        self.selection.clear();
        self.drag = None;
        self.enable_draw();
    }

    fn enable_draw(&mut self) {
        self.draw_active = true;
        self.modify_active = false;
    }

    fn enable_modify(&mut self) {
        self.draw_active = false;
        self.modify_active = true;
    }

    fn notify_mutated(&self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.notify_mutated();
        }
    }

    fn recompute(&self) -> Option<MeasureState> {
        let (selection, persisted_features) = {
            let layer = self.layer.read();
            let kinds: Vec<GeometryKind> = self
                .selection
                .iter()
                .filter_map(|id| layer.get(*id))
                .map(|f| f.geometry.kind())
                .collect();
            (kinds, layer.len())
        };
        self.resolver.update(&ResolverInput {
            coordinate: self.coordinate,
            pixel: self.pixel,
            dragging: self.dragging,
            overlay_draggable: self.overlay_draggable,
            draw_active: self.draw_active,
            modify_active: self.modify_active,
            sketch: &self.session,
            snap: self.snap,
            selection: &selection,
            persisted_features,
        })
    }

    async fn restore(&self, ctx: &MapContext, file_id: &str) -> MapResult<Vec<Feature>> {
        let Some(stored) = ctx.storage.load(file_id).await? else {
            tracing::warn!(file_id, "stored sketch not found, starting empty");
            return Ok(Vec::new());
        };
        let layer = document::decode(
            file_id,
            stored.document_type,
            &stored.data,
            self.config.storage_projection,
            self.config.projection,
        )?;
        tracing::info!(file_id, features = layer.len(), "restored stored sketch");
        Ok(layer.features().to_vec())
    }
}

#[async_trait(?Send)]
impl LayerHandler for MeasurementTool {
    fn id(&self) -> &str {
        MEASURE_LAYER_ID
    }

    fn options(&self) -> &HandlerOptions {
        &self.options
    }

    async fn on_activate(&mut self, ctx: &MapContext) -> MapResult<SharedLayer> {
        if self.debouncer.is_some() {
            tracing::warn!(layer = %self.options.layer_id, "measurement tool already active, deactivating first");
            self.on_deactivate(ctx).await;
        }
        self.config = ctx.config.clone();
        self.engine = GeometryStatsEngine::new(self.config.projection);

        let restored = match self.config.restore_file_id.clone() {
            Some(file_id) => self.restore(ctx, &file_id).await?,
            None => Vec::new(),
        };
        let restored_any = !restored.is_empty();
        {
            let mut layer = self.layer.write();
            layer.clear();
            for feature in restored {
                layer.upsert(feature);
            }
        }

        self.debouncer = Some(PersistenceDebouncer::spawn(
            self.layer.clone(),
            Arc::clone(&ctx.serializer),
            Arc::clone(&ctx.storage),
            self.config.persistence(),
        ));

        let tooltip = Rc::clone(&self.tooltip);
        let provider = Rc::clone(&self.tooltip_provider);
        let disposer = self.resolver.observe(move |state| *tooltip.borrow_mut() = provider(state));
        self.subscriptions.get_or_insert_with(Disposer::new).merge(disposer);

        // first state is computed before any interaction is armed
        self.recompute();
        if restored_any {
            self.enable_modify();
        } else {
            self.enable_draw();
        }

        tracing::info!(layer = %self.options.layer_id, restored = restored_any, "measurement tool activated");
        Ok(self.layer.clone())
    }

    async fn on_deactivate(&mut self, _ctx: &MapContext) {
        if let Some(debouncer) = self.debouncer.take() {
            debouncer.shutdown().await;
        }
        if let Some(subscriptions) = self.subscriptions.take() {
            subscriptions.dispose();
        }
        self.session.deactivate();
        self.sketch = None;
        self.selection.clear();
        self.drag = None;
        self.draw_active = false;
        self.modify_active = false;
        self.suspended = None;
        self.overlay_draggable = false;
        self.resolver.reset();
        *self.tooltip.borrow_mut() = None;
        tracing::info!(layer = %self.options.layer_id, "measurement tool deactivated");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::*;
    use crate::document::{DocumentSerializer, DocumentType, GeoJsonSerializer};
    use crate::event::KeyModifiers;
    use crate::measure::MeasureStateType;
    use crate::projection::Projection;
    use crate::resources::ResourceCatalog;
    use crate::storage::{DocumentStorage, MemoryDocumentStorage};

    fn context(storage: Arc<MemoryDocumentStorage>) -> MapContext {
        let config = MeasurementConfig {
            projection: Projection::Planar,
            storage_projection: Projection::Planar,
            ..MeasurementConfig::default()
        };
        MapContext::new(Arc::new(ResourceCatalog::new()), storage, Arc::new(GeoJsonSerializer), config)
    }

    /// Pixel and map coordinate agree up to the sign of y.
    fn viewport() -> Viewport {
        Viewport::new(Coordinate::new(400.0, -300.0), 1.0, 800.0, 600.0)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pointer(phase: PointerPhase, x: f64, y: f64) -> InputEvent {
        InputEvent::Pointer(PointerEvent::new(
            phase,
            Pixel::new(x as f32, -y as f32),
            Coordinate::new(x, y),
        ))
    }

    fn drag(phase: PointerPhase, x: f64, y: f64) -> InputEvent {
        let InputEvent::Pointer(event) = pointer(phase, x, y) else {
            unreachable!()
        };
        InputEvent::Pointer(event.dragging())
    }

    fn key_up(key: &str) -> InputEvent {
        InputEvent::Key {
            key: key.to_string(),
            pressed: false,
            modifiers: KeyModifiers::default(),
        }
    }

    async fn active_tool(storage: &Arc<MemoryDocumentStorage>) -> (MeasurementTool, MapContext) {
        let ctx = context(storage.clone());
        let mut tool = MeasurementTool::new();
        tool.set_viewport(viewport());
        tool.on_activate(&ctx).await.expect("activate");
        (tool, ctx)
    }

    fn add_point(tool: &mut MeasurementTool, x: f64, y: f64) {
        tool.handle_event(&pointer(PointerPhase::Move, x, y));
        tool.handle_event(&pointer(PointerPhase::Click, x, y));
    }

    fn draw_triangle(tool: &mut MeasurementTool) {
        add_point(tool, 0.0, 0.0);
        add_point(tool, 100.0, 0.0);
        add_point(tool, 100.0, 100.0);
        tool.handle_event(&pointer(PointerPhase::Move, 50.0, 50.0));
        tool.handle_event(&pointer(PointerPhase::Move, 0.0, 0.0));
        tool.handle_event(&pointer(PointerPhase::Click, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_on_first_point_makes_polygon() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        assert_eq!(tool.state().map(|s| s.state_type), Some(MeasureStateType::Active));

        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 100.0, 0.0);
        add_point(&mut tool, 100.0, 100.0);
        tool.handle_event(&pointer(PointerPhase::Move, 50.0, 50.0));
        let closing = tool
            .handle_event(&pointer(PointerPhase::Move, 0.0, 0.0))
            .expect("state changed");
        assert_eq!(closing.state_type, MeasureStateType::Draw);
        assert_eq!(closing.snap, Some(SnapType::FirstPoint));
        assert_eq!(tool.tooltip().as_deref(), Some("Click on first point to close the polygon"));

        let finished = tool
            .handle_event(&pointer(PointerPhase::Click, 0.0, 0.0))
            .expect("state changed");
        assert_eq!(finished.state_type, MeasureStateType::Modify);
        assert_eq!(finished.geometry_kind, Some(GeometryKind::Polygon));
        assert!(!tool.is_drawing());

        let stats = tool.stats();
        assert!((stats.area.expect("area") - 5000.0).abs() < 1e-9);
        assert!((stats.length - (200.0 + 100.0 * 2f64.sqrt())).abs() < 1e-9);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(storage.store_count(), 1);
        assert!(tool.store_result().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_on_last_point_finishes_line() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;

        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 30.0, 0.0);
        tool.handle_event(&pointer(PointerPhase::Click, 30.0, 0.0));

        let state = tool.state().expect("state");
        assert_eq!(state.geometry_kind, Some(GeometryKind::LineString));
        let stats = tool.stats();
        assert!((stats.length - 30.0).abs() < 1e-9);
        assert_eq!(stats.area, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_ring_measures_as_line_while_drawing() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;

        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 10.0, 0.0);
        add_point(&mut tool, 10.0, 10.0);
        tool.handle_event(&pointer(PointerPhase::Move, 0.0, 10.0));

        assert_eq!(tool.state().map(|s| s.point_count), Some(4));
        let stats = tool.stats();
        assert!((stats.length - 30.0).abs() < 1e-9);
        assert_eq!(stats.area, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_points_then_aborts() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;

        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 10.0, 0.0);
        tool.handle_event(&pointer(PointerPhase::Move, 20.0, 0.0));
        assert_eq!(tool.state().map(|s| s.point_count), Some(3));

        // key down does nothing
        tool.handle_event(&InputEvent::Key {
            key: "Delete".to_string(),
            pressed: true,
            modifiers: KeyModifiers::default(),
        });
        assert_eq!(tool.state().map(|s| s.point_count), Some(3));

        tool.handle_event(&key_up("Delete"));
        assert_eq!(tool.state().map(|s| s.point_count), Some(2));

        let state = tool.handle_event(&key_up("Delete")).expect("state changed");
        assert!(!tool.is_drawing());
        assert_eq!(state.state_type, MeasureStateType::Active);
        assert_eq!(state.point_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_selection() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        draw_triangle(&mut tool);
        assert_eq!(tool.layer().read().len(), 1);

        let state = tool.handle_event(&key_up("Delete")).expect("state changed");
        assert_eq!(state.state_type, MeasureStateType::Select);
        assert!(tool.layer().read().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dragging_vertex_and_edge() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        draw_triangle(&mut tool);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(storage.store_count(), 1);

        tool.handle_event(&pointer(PointerPhase::Move, 100.0, 0.0));
        assert_eq!(tool.state().and_then(|s| s.snap), Some(SnapType::Vertex));
        tool.handle_event(&pointer(PointerPhase::Down, 100.0, 0.0));
        tool.handle_event(&drag(PointerPhase::Move, 120.0, 0.0));
        tool.handle_event(&pointer(PointerPhase::Up, 120.0, 0.0));

        let id = tool.selection()[0];
        let moved = tool.layer().read().get(id).expect("feature").geometry.clone();
        assert!(moved.has_vertex(Coordinate::new(120.0, 0.0)));

        // the edge from (0,0) to (120,0)
        tool.handle_event(&pointer(PointerPhase::Move, 50.0, 0.0));
        assert_eq!(tool.state().and_then(|s| s.snap), Some(SnapType::Edge));
        tool.handle_event(&pointer(PointerPhase::Down, 50.0, 0.0));
        tool.handle_event(&drag(PointerPhase::Move, 50.0, -20.0));
        tool.handle_event(&pointer(PointerPhase::Up, 50.0, -20.0));

        let edited = tool.layer().read().get(id).expect("feature").geometry.clone();
        assert_eq!(edited.line_view().len(), 4);
        assert!(edited.has_vertex(Coordinate::new(50.0, -20.0)));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(storage.store_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_outside_selection_rearms_drawing() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        draw_triangle(&mut tool);

        let state = tool
            .handle_event(&pointer(PointerPhase::Click, 500.0, 500.0))
            .expect("state changed");
        assert_eq!(state.state_type, MeasureStateType::Active);
        assert!(tool.selection().is_empty());
        assert_eq!(tool.stats(), GeometryStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_starts_over() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 10.0, 0.0);

        let state = tool.handle_event(&key_up("Escape")).expect("state changed");
        assert_eq!(state.state_type, MeasureStateType::Active);
        assert!(!tool.is_drawing());
        assert!(tool.layer().read().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_drag_suppresses_feedback() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        add_point(&mut tool, 0.0, 0.0);

        let state = tool
            .handle_event(&InputEvent::OverlayDrag { draggable: true })
            .expect("state changed");
        assert_eq!(state.state_type, MeasureStateType::Overlay);
        assert_eq!(tool.tooltip(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_tool_degrades_to_select() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        draw_triangle(&mut tool);
        tool.suspend();
        let state = tool
            .handle_event(&InputEvent::Pointer(PointerEvent::detached(PointerPhase::Move)))
            .expect("state changed");
        assert_eq!(state.state_type, MeasureStateType::Select);

        let resumed = tool.resume().expect("state changed");
        assert_eq!(resumed.state_type, MeasureStateType::Modify);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_releases_listeners_and_persists() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, ctx) = active_tool(&storage).await;
        let changes = Rc::new(Cell::new(0));
        let seen = Rc::clone(&changes);
        tool.on_state_change(move |_| seen.set(seen.get() + 1));

        draw_triangle(&mut tool);
        let before = changes.get();
        assert!(before > 0);

        tool.on_deactivate(&ctx).await;
        assert_eq!(storage.store_count(), 1);
        assert_eq!(tool.state(), None);

        tool.handle_event(&pointer(PointerPhase::Move, 1.0, 1.0));
        assert_eq!(changes.get(), before);
        assert_eq!(tool.tooltip(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_stored_sketch() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let document = GeoJsonSerializer
            .serialize(
                &VectorLayer::with_features(
                    "measure",
                    vec![Feature::new(Geometry::LineString(vec![
                        Coordinate::new(0.0, 0.0),
                        Coordinate::new(3.0, 4.0),
                    ]))],
                ),
                Projection::Planar,
                Projection::Planar,
            )
            .expect("document");
        let ids = storage
            .store(&document, DocumentType::GeoJson)
            .await
            .expect("store")
            .expect("ids");

        let mut ctx = context(storage.clone());
        ctx.config.restore_file_id = Some(ids.file_id);
        let mut tool = MeasurementTool::new();
        let layer = tool.on_activate(&ctx).await.expect("activate");

        assert_eq!(layer.read().len(), 1);
        assert!(layer.ptr_eq(tool.layer()));
        assert_eq!(tool.state().map(|s| s.state_type), Some(MeasureStateType::Select));
    }

    #[tokio::test]
    async fn test_unsupported_stored_document_fails_activation() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let ids = storage
            .store("<kml/>", DocumentType::Kml)
            .await
            .expect("store")
            .expect("ids");
        let mut ctx = context(storage);
        ctx.config.restore_file_id = Some(ids.file_id.clone());

        let err = MeasurementTool::new().on_activate(&ctx).await.expect_err("should fail");
        assert!(matches!(err, crate::MapError::UnsupportedFormat { ref id, .. } if *id == ids.file_id));
    }

    fn touch(phase: PointerPhase, x: f64, y: f64) -> InputEvent {
        let InputEvent::Pointer(event) = pointer(phase, x, y) else {
            unreachable!()
        };
        InputEvent::Pointer(event.with_kind(PointerKind::Touch))
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_near_first_point_closes_polygon() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 100.0, 0.0);
        add_point(&mut tool, 100.0, 100.0);

        // 2 px right and 1 px below the first vertex
        tool.handle_event(&pointer(PointerPhase::Move, 2.0, -1.0));
        let finished = tool
            .handle_event(&pointer(PointerPhase::Click, 2.0, -1.0))
            .expect("state changed");
        assert_eq!(finished.state_type, MeasureStateType::Modify);
        assert_eq!(finished.geometry_kind, Some(GeometryKind::Polygon));
        assert!((tool.stats().area.expect("area") - 5000.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_near_last_point_finishes_line() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 30.0, 0.0);

        tool.handle_event(&pointer(PointerPhase::Move, 31.0, 2.0));
        tool.handle_event(&pointer(PointerPhase::Click, 31.0, 2.0));

        assert!(!tool.is_drawing());
        assert_eq!(tool.state().and_then(|s| s.geometry_kind), Some(GeometryKind::LineString));
        assert!((tool.stats().length - 30.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_snaps_from_further_away() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let (mut tool, _ctx) = active_tool(&storage).await;
        add_point(&mut tool, 0.0, 0.0);
        add_point(&mut tool, 100.0, 0.0);
        add_point(&mut tool, 100.0, 100.0);

        // 10 px away: outside the mouse tolerance, inside the touch one
        tool.handle_event(&pointer(PointerPhase::Move, 8.0, 6.0));
        assert!(tool.is_drawing());
        assert_ne!(tool.state().and_then(|s| s.snap), Some(SnapType::FirstPoint));

        tool.handle_event(&touch(PointerPhase::Move, 8.0, 6.0));
        tool.handle_event(&touch(PointerPhase::Click, 8.0, 6.0));
        assert!(!tool.is_drawing());
        assert_eq!(tool.state().and_then(|s| s.geometry_kind), Some(GeometryKind::Polygon));
        assert!((tool.stats().area.expect("area") - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_measure_layer_stays_on_top_and_unlisted() {
        let tool = MeasurementTool::new();
        let mut list = crate::layers::LayerList::new();
        list.add(tool.options().descriptor(), None);
        list.add(crate::layers::LayerDescriptor::new("osm", "osm"), None);

        let ids: Vec<&str> = list.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["osm", MEASURE_LAYER_ID]);
        assert_eq!(list.get(MEASURE_LAYER_ID).map(|l| l.geo_resource_id.as_str()), Some(MEASURE_LAYER_ID));
        assert_eq!(list.listed().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_activation_replaces_the_first() {
        let storage = Arc::new(MemoryDocumentStorage::new());
        let ctx = context(storage.clone());
        let calls = Rc::new(Cell::new(0));
        let counted = Rc::clone(&calls);
        let mut tool = MeasurementTool::new().with_tooltip_provider(move |state| {
            counted.set(counted.get() + 1);
            measure_tooltip(state)
        });
        tool.set_viewport(viewport());
        tool.on_activate(&ctx).await.expect("first activation");
        tool.on_activate(&ctx).await.expect("second activation");

        calls.set(0);
        assert!(tool.handle_event(&pointer(PointerPhase::Click, 0.0, 0.0)).is_some());
        assert_eq!(calls.get(), 1);

        add_point(&mut tool, 100.0, 0.0);
        add_point(&mut tool, 100.0, 100.0);
        add_point(&mut tool, 0.0, 0.0);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(storage.store_count(), 1);

        tool.on_deactivate(&ctx).await;
        assert_eq!(storage.store_count(), 1);
    }
}
