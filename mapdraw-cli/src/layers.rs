//! Reconciling a layer list from the command line.

use std::io::Write;
use std::time::Duration;

use mapdraw_core::{
    GeoResource, LayerDescriptor, LayerList, LayerStack, MapContext, RenderCommand, ResolutionOutcome,
    ResourceCatalog,
};
use serde::{Deserialize, Serialize};

/// A catalog entry, optionally simulating a slow or failing source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// The resource the entry resolves to.
    pub resource: GeoResource,
    /// Delay before the resource becomes available.
    #[serde(default)]
    pub delay_ms: Option<u64>,
    /// Fail with this reason instead of resolving.
    #[serde(default)]
    pub fail: Option<String>,
}

/// Build a resolver from catalog entries.
///
/// Entries without delay or failure are available immediately.
#[must_use]
pub fn build_catalog(entries: Vec<CatalogEntry>) -> ResourceCatalog {
    let catalog = ResourceCatalog::new();
    for entry in entries {
        match (entry.delay_ms, entry.fail) {
            (None, None) => catalog.register(entry.resource),
            (delay, fail) => {
                let delay = Duration::from_millis(delay.unwrap_or(0));
                let id = entry.resource.id.clone();
                let resource = entry.resource;
                catalog.register_future(id, async move {
                    tokio::time::sleep(delay).await;
                    match fail {
                        Some(reason) => Err(reason),
                        None => Ok(resource),
                    }
                });
            }
        }
    }
    catalog
}

/// A layer dropped from the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    /// Layer id.
    pub id: String,
    /// Why it could not be rendered.
    pub reason: String,
}

/// Everything a reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayersReport {
    /// Commands applied to the stack, in order.
    pub commands: Vec<RenderCommand>,
    /// Layers removed from the list.
    pub evicted: Vec<Eviction>,
    /// Layer ids as rendered, bottom first.
    pub render_order: Vec<String>,
}

#[derive(Serialize)]
struct ResultLine<'a> {
    evicted: &'a [Eviction],
    render_order: &'a [String],
}

/// Reconcile `layers` against an empty stack and wait for every source.
///
/// Writes each render command as a JSON line, then a line with the
/// evictions and the final render order.
///
/// # Errors
///
/// Returns an error if the rendering surface is gone or `out` fails.
pub async fn reconcile_layers(
    ctx: &MapContext,
    layers: Vec<LayerDescriptor>,
    out: &mut impl Write,
) -> anyhow::Result<LayersReport> {
    let mut list = LayerList::from_descriptors(layers);
    let mut stack = LayerStack::new();
    let mut reconciler = ctx.reconciler();
    let mut report = LayersReport::default();

    let pass = reconciler.reconcile(list.layers(), &mut stack)?;
    pass.apply_evictions(&mut list);
    for (id, error) in &pass.evicted {
        tracing::warn!("Dropped layer {id}: {error}");
        report.evicted.push(Eviction {
            id: id.clone(),
            reason: error.to_string(),
        });
    }
    report.commands.extend(pass.commands);
    tracing::debug!(pending = reconciler.pending_count(), "Waiting for layer sources");

    for outcome in reconciler.settle(&mut stack, &mut list).await {
        report.commands.extend(outcome.command());
        if let ResolutionOutcome::Failed { id, error } = outcome {
            report.evicted.push(Eviction {
                id,
                reason: error.to_string(),
            });
        }
    }
    report.render_order = stack.ids().into_iter().map(str::to_string).collect();

    for command in &report.commands {
        writeln!(out, "{}", serde_json::to_string(command)?)?;
    }
    let line = ResultLine {
        evicted: &report.evicted,
        render_order: &report.render_order,
    };
    writeln!(out, "{}", serde_json::to_string(&line)?)?;
    tracing::info!(layers = report.render_order.len(), "Layer stack settled");
    Ok(report)
}
