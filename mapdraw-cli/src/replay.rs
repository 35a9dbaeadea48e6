//! Replaying recorded input through the measurement tool.

use std::io::Write;
use std::time::Duration;

use mapdraw_core::{
    GeometryStats, InputEvent, LayerHandler, MapContext, MeasureState, MeasurementTool, Viewport,
};
use serde::{Deserialize, Serialize};

/// One entry of an input script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// Let time pass, so debounced saves can fire.
    Wait {
        /// Milliseconds to wait.
        wait_ms: u64,
    },
    /// Feed an input event.
    Event(InputEvent),
}

/// A recorded interaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Viewport the events were recorded in.
    #[serde(default)]
    pub viewport: Option<Viewport>,
    /// Steps in order.
    pub events: Vec<ScriptStep>,
}

impl Script {
    /// Parse a script.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Number of input events (waits excluded).
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events
            .iter()
            .filter(|step| matches!(step, ScriptStep::Event(_)))
            .count()
    }
}

/// What a replay ended with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplaySummary {
    /// Input events fed to the tool.
    pub events: usize,
    /// How many of them changed the interaction state.
    pub state_changes: usize,
    /// Statistics of the sketch or selection at the end.
    pub stats: GeometryStats,
    /// Features on the measurement layer at the end.
    pub features: usize,
    /// Id of the stored document, if anything was saved.
    pub file_id: Option<String>,
}

#[derive(Serialize)]
struct StateLine<'a> {
    state: &'a MeasureState,
    tooltip: Option<String>,
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    summary: &'a ReplaySummary,
}

/// Drive a fresh measurement tool through `script`.
///
/// Every state change is written to `out` as a JSON line, followed by a
/// summary line. Pending edits are persisted before the tool is deactivated.
///
/// # Errors
///
/// Returns an error if the tool cannot be activated or `out` fails.
pub async fn replay(ctx: &MapContext, script: &Script, out: &mut impl Write) -> anyhow::Result<ReplaySummary> {
    let viewport = script.viewport.unwrap_or_default();
    let mut tool = MeasurementTool::new();
    tool.set_viewport(viewport);
    tool.on_activate(ctx).await?;
    tracing::info!(events = script.event_count(), "Replaying input script");

    let mut state_changes = 0;
    for step in &script.events {
        match step {
            ScriptStep::Wait { wait_ms } => tokio::time::sleep(Duration::from_millis(*wait_ms)).await,
            ScriptStep::Event(event) => {
                let event = locate(event, &viewport);
                if let Some(state) = tool.handle_event(&event) {
                    state_changes += 1;
                    let line = StateLine {
                        state: &state,
                        tooltip: tool.tooltip(),
                    };
                    writeln!(out, "{}", serde_json::to_string(&line)?)?;
                }
            }
        }
    }

    let stats = tool.stats();
    tool.flush().await;
    let summary = ReplaySummary {
        events: script.event_count(),
        state_changes,
        stats,
        features: tool.layer().read().len(),
        file_id: tool.store_result().map(|ids| ids.file_id),
    };
    tool.on_deactivate(ctx).await;

    writeln!(out, "{}", serde_json::to_string(&SummaryLine { summary: &summary })?)?;
    tracing::info!(state_changes, file_id = ?summary.file_id, "Replay finished");
    Ok(summary)
}

/// Fill in whichever pointer position the recording left out.
fn locate(event: &InputEvent, viewport: &Viewport) -> InputEvent {
    let InputEvent::Pointer(pointer) = event else {
        return event.clone();
    };
    let mut pointer = *pointer;
    match (pointer.pixel, pointer.coordinate) {
        (None, Some(coordinate)) => pointer.pixel = Some(viewport.to_pixel(coordinate)),
        (Some(pixel), None) => pointer.coordinate = Some(viewport.to_coordinate(pixel)),
        _ => {}
    }
    InputEvent::Pointer(pointer)
}
