//! Geo resources: the data sources logical layers point at.
//!
//! Some resources are known up front, others (remote capabilities, stored
//! documents) only become available later. A lookup therefore yields either a
//! ready resource or a [`GeoResourceFuture`] that resolves at most once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};

use crate::document::{self, DocumentType};
use crate::error::{MapError, MapResult};
use crate::geometry::Feature;
use crate::projection::Projection;
use crate::vector::VectorLayer;

/// Where a vector resource gets its features from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum VectorSource {
    /// Features held in memory.
    Features {
        /// The features.
        features: Vec<Feature>,
    },
    /// A serialized document that still has to be decoded.
    Document {
        /// Declared type of `data`.
        document_type: DocumentType,
        /// The document.
        data: String,
        /// Projection of the document's coordinates.
        #[serde(default = "wgs84")]
        projection: Projection,
    },
}

const fn wgs84() -> Projection {
    Projection::Wgs84
}

/// The kind of data a geo resource provides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GeoResourceKind {
    /// Vector features.
    Vector(VectorSource),
    /// Raster tiles or images.
    Raster {
        /// Tile or image URL template.
        url: String,
    },
    /// A group of other resources rendered together.
    Aggregate {
        /// Member resource ids, bottom first.
        members: Vec<String>,
    },
}

/// A resolved geo resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoResource {
    /// Resource id.
    pub id: String,
    /// Human readable label.
    #[serde(default)]
    pub label: String,
    /// What the resource provides.
    #[serde(flatten)]
    pub kind: GeoResourceKind,
}

impl GeoResource {
    /// Create a resource.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: GeoResourceKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }

    /// A vector resource holding `features`.
    #[must_use]
    pub fn vector(id: impl Into<String>, features: Vec<Feature>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, GeoResourceKind::Vector(VectorSource::Features { features }))
    }

    /// A raster resource.
    #[must_use]
    pub fn raster(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, GeoResourceKind::Raster { url: url.into() })
    }

    /// Build the feature buffer of a vector resource, decoding documents.
    ///
    /// Returns `None` for non-vector resources.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::UnsupportedFormat`] (naming this resource) when a
    /// document has no decoder, or a decoding error for malformed documents.
    pub fn feature_buffer(&self, target: Projection) -> MapResult<Option<VectorLayer>> {
        match &self.kind {
            GeoResourceKind::Vector(VectorSource::Features { features }) => {
                Ok(Some(VectorLayer::with_features(self.id.clone(), features.clone())))
            }
            GeoResourceKind::Vector(VectorSource::Document {
                document_type,
                data,
                projection,
            }) => document::decode(&self.id, *document_type, data, *projection, target).map(Some),
            GeoResourceKind::Raster { .. } | GeoResourceKind::Aggregate { .. } => Ok(None),
        }
    }
}

/// A geo resource that is still loading. Resolves at most once.
#[must_use = "futures do nothing unless polled"]
pub struct GeoResourceFuture {
    id: String,
    inner: BoxFuture<'static, MapResult<GeoResource>>,
}

impl fmt::Debug for GeoResourceFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoResourceFuture").field("id", &self.id).finish_non_exhaustive()
    }
}

impl GeoResourceFuture {
    /// Wrap a future resolving the resource `id`.
    pub fn new<F>(id: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = MapResult<GeoResource>> + Send + 'static,
    {
        Self {
            id: id.into(),
            inner: future.boxed(),
        }
    }

    /// Id of the resource being resolved.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for GeoResourceFuture {
    type Output = MapResult<GeoResource>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Outcome of looking up a geo resource.
#[derive(Debug)]
pub enum ResourceLookup {
    /// Available now.
    Ready(GeoResource),
    /// Available once the future resolves.
    Pending(GeoResourceFuture),
}

/// Looks up geo resources by id.
pub trait GeoResourceResolver: Send + Sync {
    /// Look up a resource. `None` means the id is unknown.
    fn by_id(&self, id: &str) -> Option<ResourceLookup>;
}

type SharedResolution = Shared<BoxFuture<'static, Result<GeoResource, String>>>;

enum CatalogEntry {
    Ready(GeoResource),
    Deferred(SharedResolution),
}

/// Completes a resource registered with [`ResourceCatalog::register_deferred`].
#[derive(Debug)]
pub struct DeferredResource {
    id: String,
    tx: oneshot::Sender<Result<GeoResource, String>>,
}

impl DeferredResource {
    /// Id of the pending resource.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deliver the resource.
    pub fn resolve(self, resource: GeoResource) {
        let _ = self.tx.send(Ok(resource));
    }

    /// Report that the resource cannot be loaded.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

/// In-memory resolver.
#[derive(Default)]
pub struct ResourceCatalog {
    entries: Mutex<HashMap<String, CatalogEntry>>,
}

impl fmt::Debug for ResourceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ResourceCatalog").field("entries", &entries.len()).finish()
    }
}

impl ResourceCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource that is available right away.
    pub fn register(&self, resource: GeoResource) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.id.clone(), CatalogEntry::Ready(resource));
    }

    /// Register a resource that becomes available through `future`.
    pub fn register_future<F>(&self, id: impl Into<String>, future: F)
    where
        F: Future<Output = Result<GeoResource, String>> + Send + 'static,
    {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), CatalogEntry::Deferred(future.boxed().shared()));
    }

    /// Register a resource whose loading is completed by hand.
    #[must_use = "the resource stays pending until the handle is resolved"]
    pub fn register_deferred(&self, id: impl Into<String>) -> DeferredResource {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        self.register_future(
            id.clone(),
            rx.map(|received| received.unwrap_or_else(|_| Err("resource loader went away".to_string()))),
        );
        DeferredResource { id, tx }
    }

    /// Ids of every registered resource.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl GeoResourceResolver for ResourceCatalog {
    fn by_id(&self, id: &str) -> Option<ResourceLookup> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(id)? {
            CatalogEntry::Ready(resource) => Some(ResourceLookup::Ready(resource.clone())),
            CatalogEntry::Deferred(shared) => {
                if let Some(Ok(resource)) = shared.peek() {
                    return Some(ResourceLookup::Ready(resource.clone()));
                }
                let owned_id = id.to_string();
                let shared = shared.clone();
                Some(ResourceLookup::Pending(GeoResourceFuture::new(id, async move {
                    shared.await.map_err(|reason| MapError::ResolutionFailed { id: owned_id, reason })
                })))
            }
        }
    }
}
