//! Keeps the rendered layer stack in sync with the logical layer list.
//!
//! Each pass diffs the logical list against the stack and issues the minimal
//! set of add/remove/move/style commands. Sources that are still loading get a
//! placeholder at their final position so render order never jumps; the
//! placeholder is swapped for the real layer in place once the source
//! resolves. A resolution that arrives after its layer was removed (or
//! re-added) no longer matches the placeholder token and is dropped.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{try_join_all, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::error::{MapError, MapResult};
use crate::layers::{LayerDescriptor, LayerList};
use crate::projection::Projection;
use crate::resources::{GeoResource, GeoResourceKind, GeoResourceResolver, ResourceLookup};
use crate::vector::VectorLayer;

/// Aggregates nested deeper than this are treated as broken.
const MAX_GROUP_DEPTH: usize = 8;

/// What a rendered layer draws.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedContent {
    /// Stand-in while the source is loading.
    Placeholder {
        /// Identifies the resolution this placeholder waits for.
        token: u64,
    },
    /// Vector features.
    Vector {
        /// Backing geo resource.
        resource_id: String,
        /// Mutable feature buffer.
        buffer: VectorLayer,
    },
    /// Raster imagery.
    Raster {
        /// Backing geo resource.
        resource_id: String,
        /// Tile or image URL.
        url: String,
    },
    /// Several layers rendered as one.
    Group {
        /// Backing geo resource.
        resource_id: String,
        /// Members, bottom first.
        children: Vec<RenderedLayer>,
    },
}

/// A rendered layer handle.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLayer {
    /// Logical layer id (resource id for group members).
    pub id: String,
    /// Whether the layer is drawn.
    pub visible: bool,
    /// Opacity in `[0, 1]`.
    pub opacity: f32,
    /// What the layer draws.
    pub content: RenderedContent,
}

impl RenderedLayer {
    /// Whether this is a placeholder for a loading source.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        matches!(self.content, RenderedContent::Placeholder { .. })
    }

    /// The feature buffer of a vector layer.
    #[must_use]
    pub fn buffer(&self) -> Option<&VectorLayer> {
        match &self.content {
            RenderedContent::Vector { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// Release render resources, recursing into groups.
    pub fn detach(&mut self) {
        match &mut self.content {
            RenderedContent::Vector { buffer, .. } => buffer.clear(),
            RenderedContent::Group { children, .. } => children.iter_mut().for_each(Self::detach),
            RenderedContent::Placeholder { .. } | RenderedContent::Raster { .. } => {}
        }
    }

    const fn placeholder_token(&self) -> Option<u64> {
        match self.content {
            RenderedContent::Placeholder { token } => Some(token),
            _ => None,
        }
    }
}

/// The ordered set of rendered layers, bottom first.
#[derive(Debug, Clone, Default)]
pub struct LayerStack {
    layers: Vec<RenderedLayer>,
    disposed: bool,
}

impl LayerStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered layer ids in render order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// Iterate rendered layers in render order.
    pub fn iter(&self) -> impl Iterator<Item = &RenderedLayer> {
        self.layers.iter()
    }

    /// Render position of a layer.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Get a rendered layer.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RenderedLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Number of rendered layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether nothing is rendered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Tear the surface down. Later reconciliation fails with [`MapError::SurfaceGone`].
    pub fn dispose(&mut self) {
        for layer in &mut self.layers {
            layer.detach();
        }
        self.layers.clear();
        self.disposed = true;
    }

    /// Whether the surface was torn down.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn insert(&mut self, index: usize, layer: RenderedLayer) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
    }

    fn remove(&mut self, id: &str) -> Option<RenderedLayer> {
        let index = self.position(id)?;
        Some(self.layers.remove(index))
    }

    fn move_to(&mut self, from: usize, to: usize) {
        let layer = self.layers.remove(from);
        let to = to.min(self.layers.len());
        self.layers.insert(to, layer);
    }
}

/// A change applied to the layer stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RenderCommand {
    /// A real layer was inserted.
    Add {
        /// Layer id.
        id: String,
        /// Render position.
        index: usize,
    },
    /// A placeholder was inserted for a loading source.
    AddPlaceholder {
        /// Layer id.
        id: String,
        /// Render position.
        index: usize,
    },
    /// A placeholder was replaced by the real layer at the same position.
    Swap {
        /// Layer id.
        id: String,
        /// Render position.
        index: usize,
    },
    /// A layer was detached and removed.
    Remove {
        /// Layer id.
        id: String,
    },
    /// A layer changed render position.
    Move {
        /// Layer id.
        id: String,
        /// Old position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// Visibility changed.
    SetVisible {
        /// Layer id.
        id: String,
        /// New visibility.
        visible: bool,
    },
    /// Opacity changed.
    SetOpacity {
        /// Layer id.
        id: String,
        /// New opacity.
        opacity: f32,
    },
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Commands applied to the stack, in order.
    pub commands: Vec<RenderCommand>,
    /// Layers that could not be rendered and must leave the logical list.
    pub evicted: Vec<(String, MapError)>,
}

impl Reconciliation {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.evicted.is_empty()
    }

    /// Remove the evicted layers from the logical list.
    pub fn apply_evictions(&self, list: &mut LayerList) {
        for (id, _) in &self.evicted {
            // already gone is fine
            let _ = list.remove(id);
        }
    }
}

/// What happened when a pending source finished loading.
#[derive(Debug)]
pub enum ResolutionOutcome {
    /// The placeholder was replaced by the real layer.
    Swapped {
        /// Layer id.
        id: String,
        /// Render position (unchanged).
        index: usize,
    },
    /// The layer was removed or re-added meanwhile; nothing changed.
    Stale {
        /// Layer id.
        id: String,
    },
    /// The source failed; the placeholder was removed.
    Failed {
        /// Layer id.
        id: String,
        /// Why.
        error: MapError,
    },
}

impl ResolutionOutcome {
    /// The command applied to the stack, if any.
    #[must_use]
    pub fn command(&self) -> Option<RenderCommand> {
        match self {
            Self::Swapped { id, index } => Some(RenderCommand::Swap {
                id: id.clone(),
                index: *index,
            }),
            Self::Failed { id, .. } => Some(RenderCommand::Remove { id: id.clone() }),
            Self::Stale { .. } => None,
        }
    }
}

/// A geo resource together with its resolved aggregate members.
#[derive(Debug, Clone)]
struct ResolvedSource {
    resource: GeoResource,
    members: Vec<ResolvedSource>,
}

struct PendingResolution {
    layer_id: String,
    token: u64,
    result: MapResult<ResolvedSource>,
}

/// Diffs logical layers against the layer stack.
pub struct LayerReconciler {
    resolver: Arc<dyn GeoResourceResolver>,
    projection: Projection,
    pending: FuturesUnordered<BoxFuture<'static, PendingResolution>>,
    next_token: u64,
}

impl std::fmt::Debug for LayerReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerReconciler")
            .field("projection", &self.projection)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl LayerReconciler {
    /// Create a reconciler. Vector documents are decoded into `projection`.
    #[must_use]
    pub fn new(resolver: Arc<dyn GeoResourceResolver>, projection: Projection) -> Self {
        Self {
            resolver,
            projection,
            pending: FuturesUnordered::new(),
            next_token: 0,
        }
    }

    /// Number of sources still loading (stale ones included).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Bring `stack` in line with `layers`.
    ///
    /// Per-layer failures do not abort the pass; those layers are reported in
    /// [`Reconciliation::evicted`].
    ///
    /// # Errors
    ///
    /// Returns [`MapError::SurfaceGone`] if the stack was disposed.
    pub fn reconcile(&mut self, layers: &[LayerDescriptor], stack: &mut LayerStack) -> MapResult<Reconciliation> {
        if stack.is_disposed() {
            return Err(MapError::SurfaceGone);
        }
        let mut outcome = Reconciliation::default();

        let target_ids: HashSet<&str> = layers.iter().map(|l| l.id.as_str()).collect();
        let to_remove: Vec<String> = stack
            .iter()
            .filter(|l| !target_ids.contains(l.id.as_str()))
            .map(|l| l.id.clone())
            .collect();
        for id in to_remove {
            if let Some(mut layer) = stack.remove(&id) {
                layer.detach();
                tracing::debug!(layer = %id, "layer removed");
                outcome.commands.push(RenderCommand::Remove { id });
            }
        }

        let mut placed = HashSet::new();
        let mut slot = 0;
        for layer in layers {
            if !placed.insert(layer.id.as_str()) {
                tracing::warn!(layer = %layer.id, "duplicate layer id ignored");
                continue;
            }
            if let Some(from) = stack.position(&layer.id) {
                if from != slot {
                    stack.move_to(from, slot);
                    outcome.commands.push(RenderCommand::Move {
                        id: layer.id.clone(),
                        from,
                        to: slot,
                    });
                }
                Self::apply_deltas(layer, &mut stack.layers[slot], &mut outcome.commands);
                slot += 1;
                continue;
            }

            match self.add(layer, slot, stack) {
                Ok(command) => {
                    outcome.commands.push(command);
                    slot += 1;
                }
                Err(error) => {
                    log_eviction(&layer.id, &error);
                    outcome.evicted.push((layer.id.clone(), error));
                }
            }
        }

        Ok(outcome)
    }

    fn apply_deltas(layer: &LayerDescriptor, rendered: &mut RenderedLayer, commands: &mut Vec<RenderCommand>) {
        if rendered.visible != layer.visible {
            rendered.visible = layer.visible;
            commands.push(RenderCommand::SetVisible {
                id: layer.id.clone(),
                visible: layer.visible,
            });
        }
        #[allow(clippy::float_cmp)]
        if rendered.opacity != layer.opacity {
            rendered.opacity = layer.opacity;
            commands.push(RenderCommand::SetOpacity {
                id: layer.id.clone(),
                opacity: layer.opacity,
            });
        }
    }

    fn add(&mut self, layer: &LayerDescriptor, index: usize, stack: &mut LayerStack) -> MapResult<RenderCommand> {
        let mut source = resolve_source(Arc::clone(&self.resolver), layer.geo_resource_id.clone(), 0);

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match source.as_mut().poll(&mut cx) {
            Poll::Ready(resolved) => {
                let content = build_content(&resolved?, self.projection)?;
                stack.insert(index, Self::handle(layer, content));
                tracing::debug!(layer = %layer.id, index, "layer added");
                Ok(RenderCommand::Add {
                    id: layer.id.clone(),
                    index,
                })
            }
            Poll::Pending => {
                let token = self.next_token;
                self.next_token += 1;
                stack.insert(index, Self::handle(layer, RenderedContent::Placeholder { token }));

                let layer_id = layer.id.clone();
                self.pending.push(
                    async move {
                        PendingResolution {
                            layer_id,
                            token,
                            result: source.await,
                        }
                    }
                    .boxed(),
                );
                tracing::debug!(layer = %layer.id, index, "placeholder added while source loads");
                Ok(RenderCommand::AddPlaceholder {
                    id: layer.id.clone(),
                    index,
                })
            }
        }
    }

    fn handle(layer: &LayerDescriptor, content: RenderedContent) -> RenderedLayer {
        RenderedLayer {
            id: layer.id.clone(),
            visible: layer.visible,
            opacity: layer.opacity,
            content,
        }
    }

    /// Wait for the next pending source and apply it to `stack`.
    ///
    /// Returns `None` once nothing is pending.
    pub async fn next_resolution(&mut self, stack: &mut LayerStack) -> Option<ResolutionOutcome> {
        let PendingResolution { layer_id, token, result } = self.pending.next().await?;

        let position = stack
            .position(&layer_id)
            .filter(|&i| stack.layers[i].placeholder_token() == Some(token));
        let Some(index) = position else {
            tracing::debug!(layer = %layer_id, "dropping stale resolution");
            return Some(ResolutionOutcome::Stale { id: layer_id });
        };

        match result.and_then(|resolved| build_content(&resolved, self.projection)) {
            Ok(content) => {
                stack.layers[index].content = content;
                tracing::debug!(layer = %layer_id, index, "placeholder swapped");
                Some(ResolutionOutcome::Swapped { id: layer_id, index })
            }
            Err(error) => {
                stack.remove(&layer_id);
                log_eviction(&layer_id, &error);
                Some(ResolutionOutcome::Failed { id: layer_id, error })
            }
        }
    }

    /// Drain every pending source, evicting failed layers from `list`.
    pub async fn settle(&mut self, stack: &mut LayerStack, list: &mut LayerList) -> Vec<ResolutionOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_resolution(stack).await {
            if let ResolutionOutcome::Failed { id, .. } = &outcome {
                let _ = list.remove(id);
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Unsupported formats are errors in the stored data; anything else is a source failure.
fn log_eviction(layer_id: &str, error: &MapError) {
    match error {
        MapError::UnsupportedFormat { .. } => {
            tracing::error!(layer = %layer_id, "cannot load layer: {error}");
        }
        _ => tracing::warn!(layer = %layer_id, "layer source failed to load: {error}"),
    }
}

/// Look up a resource and, for aggregates, all of its members.
///
/// The top-level lookup happens immediately; the returned future completes on
/// its first poll when everything is already available.
fn resolve_source(
    resolver: Arc<dyn GeoResourceResolver>,
    id: String,
    depth: usize,
) -> BoxFuture<'static, MapResult<ResolvedSource>> {
    let lookup = resolver.by_id(&id);
    async move {
        if depth > MAX_GROUP_DEPTH {
            return Err(MapError::ResolutionFailed {
                id,
                reason: "aggregate nesting too deep".to_string(),
            });
        }
        let resource = match lookup {
            None => return Err(MapError::ResourceNotFound(id)),
            Some(ResourceLookup::Ready(resource)) => resource,
            Some(ResourceLookup::Pending(future)) => future.await?,
        };
        let members = match &resource.kind {
            GeoResourceKind::Aggregate { members } => {
                try_join_all(
                    members
                        .iter()
                        .map(|m| resolve_source(Arc::clone(&resolver), m.clone(), depth + 1)),
                )
                .await?
            }
            _ => Vec::new(),
        };
        Ok(ResolvedSource { resource, members })
    }
    .boxed()
}

fn build_content(source: &ResolvedSource, projection: Projection) -> MapResult<RenderedContent> {
    let resource_id = source.resource.id.clone();
    Ok(match &source.resource.kind {
        GeoResourceKind::Vector(_) => RenderedContent::Vector {
            buffer: source
                .resource
                .feature_buffer(projection)?
                .unwrap_or_else(|| VectorLayer::new(resource_id.clone())),
            resource_id,
        },
        GeoResourceKind::Raster { url } => RenderedContent::Raster {
            resource_id,
            url: url.clone(),
        },
        GeoResourceKind::Aggregate { .. } => RenderedContent::Group {
            resource_id,
            children: source
                .members
                .iter()
                .map(|member| {
                    Ok(RenderedLayer {
                        id: member.resource.id.clone(),
                        visible: true,
                        opacity: 1.0,
                        content: build_content(member, projection)?,
                    })
                })
                .collect::<MapResult<Vec<_>>>()?,
        },
    })
}
