//! Mutable feature buffers backing vector layers.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{MapError, MapResult};
use crate::geometry::{Feature, FeatureId};

/// Features drawn by one vector layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorLayer {
    /// Layer ID.
    pub id: String,
    /// Features, in insertion order.
    features: Vec<Feature>,
}

impl VectorLayer {
    /// Create an empty layer.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            features: Vec::new(),
        }
    }

    /// Create a layer holding `features`.
    #[must_use]
    pub fn with_features(id: impl Into<String>, features: Vec<Feature>) -> Self {
        Self {
            id: id.into(),
            features,
        }
    }

    /// All features.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Add a feature, replacing one with the same ID.
    pub fn upsert(&mut self, feature: Feature) {
        match self.features.iter_mut().find(|f| f.id == feature.id) {
            Some(existing) => *existing = feature,
            None => self.features.push(feature),
        }
    }

    /// Get a feature by ID.
    #[must_use]
    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }

    /// Get a mutable feature by ID.
    pub fn get_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.id == id)
    }

    /// Remove a feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature is not found.
    pub fn remove(&mut self, id: FeatureId) -> MapResult<Feature> {
        let index = self
            .features
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| MapError::FeatureNotFound(id.to_string()))?;
        Ok(self.features.remove(index))
    }

    /// Drop every feature and release the buffer's memory.
    pub fn clear(&mut self) {
        self.features = Vec::new();
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the layer holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A vector layer shared between the tool and the persistence task.
#[derive(Debug, Clone, Default)]
pub struct SharedLayer(Arc<RwLock<VectorLayer>>);

impl SharedLayer {
    /// Wrap a layer.
    #[must_use]
    pub fn new(layer: VectorLayer) -> Self {
        Self(Arc::new(RwLock::new(layer)))
    }

    /// Read access. A poisoned lock is recovered.
    pub fn read(&self) -> RwLockReadGuard<'_, VectorLayer> {
        self.0.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Write access. A poisoned lock is recovered.
    pub fn write(&self) -> RwLockWriteGuard<'_, VectorLayer> {
        self.0.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Whether both handles point at the same buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
