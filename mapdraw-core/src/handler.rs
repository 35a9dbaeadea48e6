//! Lifecycle interface for components that own a map layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MeasurementConfig;
use crate::document::DocumentSerializer;
use crate::error::MapResult;
use crate::layers::{LayerConstraints, LayerDescriptor};
use crate::reconcile::LayerReconciler;
use crate::resources::GeoResourceResolver;
use crate::storage::DocumentStorage;
use crate::vector::SharedLayer;

/// Collaborators handed to layer handlers.
#[derive(Clone)]
pub struct MapContext {
    /// Looks up geo resources.
    pub resolver: Arc<dyn GeoResourceResolver>,
    /// Persists documents.
    pub storage: Arc<dyn DocumentStorage>,
    /// Encodes layers into documents.
    pub serializer: Arc<dyn DocumentSerializer>,
    /// Measurement settings.
    pub config: MeasurementConfig,
}

impl std::fmt::Debug for MapContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MapContext {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn GeoResourceResolver>,
        storage: Arc<dyn DocumentStorage>,
        serializer: Arc<dyn DocumentSerializer>,
        config: MeasurementConfig,
    ) -> Self {
        Self {
            resolver,
            storage,
            serializer,
            config,
        }
    }

    /// A layer reconciler backed by this context's resolver.
    #[must_use]
    pub fn reconciler(&self) -> LayerReconciler {
        LayerReconciler::new(Arc::clone(&self.resolver), self.config.projection)
    }
}

/// Describes the layer a handler owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Id of the owned layer (also its geo resource id).
    pub layer_id: String,
    /// Human readable label.
    pub label: String,
    /// Constraints of the owned layer.
    pub constraints: LayerConstraints,
}

impl HandlerOptions {
    /// Logical layer entry for the owned layer.
    #[must_use]
    pub fn descriptor(&self) -> LayerDescriptor {
        LayerDescriptor::new(self.layer_id.clone(), self.layer_id.clone()).with_constraints(self.constraints)
    }
}

/// A component that owns a map layer while it is active.
///
/// Handlers live on the UI thread, so the futures they return need not be `Send`.
#[async_trait(?Send)]
pub trait LayerHandler {
    /// Unique handler id.
    fn id(&self) -> &str;

    /// The owned layer's description.
    fn options(&self) -> &HandlerOptions;

    /// Start the handler and return the layer it draws into.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler's initial state cannot be loaded.
    async fn on_activate(&mut self, ctx: &MapContext) -> MapResult<SharedLayer>;

    /// Stop the handler, releasing every subscription it registered.
    async fn on_deactivate(&mut self, ctx: &MapContext);
}
