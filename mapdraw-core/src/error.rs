//! Error types for map operations.

use thiserror::Error;

use crate::document::DocumentType;

/// Result type for map operations.
pub type MapResult<T> = Result<T, MapError>;

/// Errors that can occur in map operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// Logical layer not found in the layer list.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Feature not found in a vector layer.
    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    /// No geo resource is registered under the given id.
    #[error("Geo resource not found: {0}")]
    ResourceNotFound(String),

    /// A layer's backing source could not be loaded.
    #[error("Failed to resolve geo resource {id}: {reason}")]
    ResolutionFailed {
        /// Geo resource id.
        id: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A stored document declares a type no decoder exists for.
    #[error("Unsupported document type {document_type} for geo resource {id}")]
    UnsupportedFormat {
        /// Id of the resource that carried the document.
        id: String,
        /// The declared document type.
        document_type: DocumentType,
    },

    /// A document could be parsed but does not describe vector data.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend rejected the operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The rendering surface is gone; nothing can be reconciled any more.
    #[error("Map surface is no longer available")]
    SurfaceGone,
}
