//! # Mapdraw Core
//!
//! Stateful core of an interactive web map client: the measurement and
//! drawing tool and the loop that keeps rendered layers in sync with a
//! declarative layer list.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     mapdraw-core                     │
//! ├──────────────────────────────────────────────────────┤
//! │  Measurement tool          │  Layers                 │
//! │  - Snap classification     │  - Logical layer list   │
//! │  - Sketch session          │  - Geo resources        │
//! │  - Interaction state       │  - Reconciler           │
//! │  - Length / area stats     │  - Placeholder swap     │
//! ├──────────────────────────────────────────────────────┤
//! │  Persistence: debounce → GeoJSON → document storage  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Input events flow through [`MeasurementTool::handle_event`] into a new
//! [`MeasureState`]; edits are coalesced by the [`PersistenceDebouncer`].
//! Independently, [`LayerReconciler::reconcile`] diffs a [`LayerList`]
//! against a [`LayerStack`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod geometry;
pub mod handler;
pub mod layers;
pub mod measure;
pub mod observe;
pub mod persist;
pub mod projection;
pub mod reconcile;
pub mod resources;
pub mod sketch;
pub mod snap;
pub mod stats;
pub mod storage;
pub mod tool;
pub mod tooltip;
pub mod vector;

pub use config::MeasurementConfig;
pub use document::{DocumentSerializer, DocumentType, GeoJsonSerializer};
pub use error::{MapError, MapResult};
pub use event::{InputEvent, KeyAction, PointerEvent, PointerKind, PointerPhase};
pub use geometry::{Coordinate, Feature, FeatureId, Geometry, GeometryKind, Pixel, Viewport};
pub use handler::{HandlerOptions, LayerHandler, MapContext};
pub use layers::{LayerChange, LayerConstraints, LayerDescriptor, LayerList};
pub use measure::{InteractionStateResolver, MeasureState, MeasureStateType};
pub use observe::{Disposer, Observable};
pub use persist::{PersistenceConfig, PersistenceDebouncer};
pub use projection::Projection;
pub use reconcile::{LayerReconciler, LayerStack, Reconciliation, RenderCommand, ResolutionOutcome};
pub use resources::{GeoResource, GeoResourceKind, GeoResourceResolver, ResourceCatalog, ResourceLookup};
pub use sketch::SketchSession;
pub use snap::SnapType;
pub use stats::{GeometryStats, GeometryStatsEngine};
pub use storage::{DocumentStorage, FileDocumentStorage, MemoryDocumentStorage, StoreResult};
pub use tool::MeasurementTool;
pub use tooltip::measure_tooltip;
pub use vector::{SharedLayer, VectorLayer};

/// Mapdraw core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
