//! The declarative, ordered list of logical map layers.
//!
//! The list is the source of truth the reconciler renders from. After every
//! operation it is normalized: layers with the always-top constraint move to
//! the end (keeping their relative order), then all layers are re-indexed so
//! `z_index` equals array position.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{MapError, MapResult};

/// Per-layer constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerConstraints {
    /// Keep the layer above every layer without this flag.
    #[serde(default)]
    pub always_top: bool,
    /// Hide the layer from layer panels (it is still rendered).
    #[serde(default)]
    pub hidden: bool,
}

/// A logical layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Unique layer id.
    pub id: String,
    /// The geo resource backing the layer.
    pub geo_resource_id: String,
    /// Whether the layer is drawn.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Opacity in `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Render position, 0 is the bottom.
    #[serde(default)]
    pub z_index: usize,
    /// Constraints.
    #[serde(default)]
    pub constraints: LayerConstraints,
}

const fn default_visible() -> bool {
    true
}

const fn default_opacity() -> f32 {
    1.0
}

impl LayerDescriptor {
    /// Create a visible, opaque layer for `geo_resource_id`.
    #[must_use]
    pub fn new(id: impl Into<String>, geo_resource_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geo_resource_id: geo_resource_id.into(),
            visible: true,
            opacity: 1.0,
            z_index: 0,
            constraints: LayerConstraints::default(),
        }
    }

    /// Set visibility.
    #[must_use]
    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set opacity, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// Set the requested z-index.
    #[must_use]
    pub fn with_z_index(mut self, z_index: usize) -> Self {
        self.z_index = z_index;
        self
    }

    /// Set constraints.
    #[must_use]
    pub fn with_constraints(mut self, constraints: LayerConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Mark the layer as always on top.
    #[must_use]
    pub fn always_top(mut self) -> Self {
        self.constraints.always_top = true;
        self
    }
}

/// A partial update of a layer's properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerChange {
    /// New visibility.
    pub visible: Option<bool>,
    /// New opacity.
    pub opacity: Option<f32>,
    /// New position.
    pub z_index: Option<usize>,
}

/// Move always-top layers to the end, then re-index 0..n-1.
///
/// The sort is stable, so layers keep their relative order within each group.
pub fn normalize(layers: &mut [LayerDescriptor]) {
    layers.sort_by_key(|l| l.constraints.always_top);
    for (index, layer) in layers.iter_mut().enumerate() {
        layer.z_index = index;
    }
}

/// Ordered list of logical layers, always normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerList {
    layers: Vec<LayerDescriptor>,
}

impl LayerList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from descriptors, ordering them by their requested z-index.
    ///
    /// When an id repeats, the last descriptor with that id wins.
    #[must_use]
    pub fn from_descriptors(layers: Vec<LayerDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut layers: Vec<LayerDescriptor> = layers
            .into_iter()
            .rev()
            .filter(|l| seen.insert(l.id.clone()))
            .collect();
        layers.reverse();
        for layer in &mut layers {
            layer.opacity = layer.opacity.clamp(0.0, 1.0);
        }
        layers.sort_by_key(|l| l.z_index);
        normalize(&mut layers);
        Self { layers }
    }

    /// Layers in render order, bottom first.
    #[must_use]
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Iterate layers in render order.
    pub fn iter(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter()
    }

    /// Get a layer by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Layers that should appear in layer panels.
    pub fn listed(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter().filter(|l| !l.constraints.hidden)
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Add a layer at `position` (default: on top), replacing a layer with the same id.
    pub fn add(&mut self, mut layer: LayerDescriptor, position: Option<usize>) {
        self.layers.retain(|l| l.id != layer.id);
        layer.opacity = layer.opacity.clamp(0.0, 1.0);
        let index = position.unwrap_or(self.layers.len()).min(self.layers.len());
        self.layers.insert(index, layer);
        normalize(&mut self.layers);
    }

    /// Remove a layer.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LayerNotFound`] if no layer has that id.
    pub fn remove(&mut self, id: &str) -> MapResult<LayerDescriptor> {
        let index = self.index_of(id)?;
        let removed = self.layers.remove(index);
        normalize(&mut self.layers);
        Ok(removed)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LayerNotFound`] if no layer has that id.
    pub fn modify(&mut self, id: &str, change: LayerChange) -> MapResult<()> {
        let index = self.index_of(id)?;
        let layer = &mut self.layers[index];
        if let Some(visible) = change.visible {
            layer.visible = visible;
        }
        if let Some(opacity) = change.opacity {
            layer.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(z_index) = change.z_index {
            let layer = self.layers.remove(index);
            let target = z_index.min(self.layers.len());
            self.layers.insert(target, layer);
        }
        normalize(&mut self.layers);
        Ok(())
    }

    /// Replace a layer's constraints.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LayerNotFound`] if no layer has that id.
    pub fn set_constraints(&mut self, id: &str, constraints: LayerConstraints) -> MapResult<()> {
        let index = self.index_of(id)?;
        self.layers[index].constraints = constraints;
        normalize(&mut self.layers);
        Ok(())
    }

    fn index_of(&self, id: &str) -> MapResult<usize> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| MapError::LayerNotFound(id.to_string()))
    }
}
