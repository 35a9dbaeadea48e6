//! End-to-end tests for the mapdraw command line host.
//!
//! Runs parsed commands against files in a temporary directory and checks
//! the JSON lines they print and the documents they leave on disk.

use std::path::Path;

use clap::Parser;
use mapdraw_cli::{CatalogEntry, CliArgs, Command, Script, ScriptStep};
use mapdraw_core::event::KeyModifiers;
use mapdraw_core::{Coordinate, GeoResource, InputEvent, LayerDescriptor, PointerEvent, PointerPhase};
use serde_json::Value;

/// Pointer event that only knows its map position.
fn at(phase: PointerPhase, x: f64, y: f64) -> ScriptStep {
    ScriptStep::Event(InputEvent::Pointer(PointerEvent {
        coordinate: Some(Coordinate::new(x, y)),
        ..PointerEvent::detached(phase)
    }))
}

fn square_script() -> Script {
    let mut events = Vec::new();
    for (x, y) in [(0.0, 0.0), (40.0, 0.0), (40.0, 40.0), (0.0, 40.0)] {
        events.push(at(PointerPhase::Move, x, y));
        events.push(at(PointerPhase::Click, x, y));
    }
    events.push(at(PointerPhase::Move, 20.0, 20.0));
    events.push(at(PointerPhase::Move, 0.0, 0.0));
    events.push(at(PointerPhase::Click, 0.0, 0.0));
    Script { viewport: None, events }
}

fn write_json(path: &Path, value: &impl serde::Serialize) {
    std::fs::write(path, serde_json::to_string(value).expect("serialize")).expect("write");
}

fn path(p: &Path) -> &str {
    p.to_str().expect("utf8 path")
}

fn lines(out: &[u8]) -> Vec<Value> {
    String::from_utf8(out.to_vec())
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

const PLANAR_CONFIG: &str = r#"{"projection": "planar", "storage_projection": "planar"}"#;

// ===========================================================================
// Argument parsing
// ===========================================================================

#[test]
fn test_measure_flags_override_config() {
    let args = CliArgs::try_parse_from([
        "mapdraw",
        "measure",
        "--script",
        "sketch.json",
        "--save-delay-ms",
        "250",
        "--restore",
        "abc",
    ])
    .expect("parse");

    let Command::Measure(measure) = args.command else {
        panic!("measure command expected");
    };
    let config = measure.apply(mapdraw_core::MeasurementConfig::default());
    assert_eq!(config.save_delay_ms, 250);
    assert!(!config.embedded);
    assert_eq!(config.restore_file_id.as_deref(), Some("abc"));
}

#[test]
fn test_embedded_flag_saves_immediately() {
    let args = CliArgs::try_parse_from(["mapdraw", "measure", "--script", "s.json", "--embedded"]).expect("parse");

    let Command::Measure(measure) = args.command else {
        panic!("measure command expected");
    };
    let config = measure.apply(mapdraw_core::MeasurementConfig::default());
    assert_eq!(config.effective_save_delay(), std::time::Duration::ZERO);
}

#[test]
fn test_layers_requires_catalog() {
    assert!(CliArgs::try_parse_from(["mapdraw", "layers", "--layers", "l.json"]).is_err());
}

// ===========================================================================
// mapdraw measure
// ===========================================================================

#[tokio::test]
async fn test_measure_replays_script_and_stores_sketch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let data_dir = dir.path().join("sketches");
    let script_path = dir.path().join("script.json");
    let config_path = dir.path().join("config.json");
    write_json(&script_path, &square_script());
    std::fs::write(&config_path, PLANAR_CONFIG).expect("write config");

    let args = CliArgs::try_parse_from([
        "mapdraw",
        "--config",
        path(&config_path),
        "measure",
        "--script",
        path(&script_path),
        "--data-dir",
        path(&data_dir),
    ])
    .expect("parse");
    let mut out = Vec::new();
    mapdraw_cli::run(args, &mut out).await.expect("run");

    let output = lines(&out);
    let (summary, states) = output.split_last().expect("output");
    assert!(states.iter().any(|line| line["state"]["type"] == "draw"));
    let closing = states
        .iter()
        .find(|line| line["state"]["snap"] == "firstpoint")
        .expect("closing hint");
    assert_eq!(closing["tooltip"], "Click on first point to close the polygon");
    assert_eq!(states.last().expect("state")["state"]["type"], "modify");

    let summary = &summary["summary"];
    assert_eq!(summary["events"], 11);
    assert_eq!(summary["features"], 1);
    let area = summary["stats"]["area"].as_f64().expect("area");
    assert!((area - 1600.0).abs() < 1e-9);

    let file_id = summary["file_id"].as_str().expect("file id");
    let stored = std::fs::read_to_string(data_dir.join(format!("{file_id}.json"))).expect("stored file");
    assert!(stored.contains("Polygon"));
}

#[tokio::test]
async fn test_measure_without_data_dir_keeps_nothing_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("script.json");
    let script = Script {
        viewport: None,
        events: vec![
            at(PointerPhase::Move, 5.0, 5.0),
            at(PointerPhase::Click, 5.0, 5.0),
            ScriptStep::Event(InputEvent::Key {
                key: "Escape".to_string(),
                pressed: true,
                modifiers: KeyModifiers::default(),
            }),
        ],
    };
    write_json(&script_path, &script);

    let args = CliArgs::try_parse_from([
        "mapdraw",
        "measure",
        "--script",
        path(&script_path),
    ])
    .expect("parse");
    let mut out = Vec::new();
    mapdraw_cli::run(args, &mut out).await.expect("run");

    let output = lines(&out);
    let summary = &output.last().expect("summary")["summary"];
    assert_eq!(summary["features"], 0);
    assert_eq!(summary["file_id"], Value::Null);
    assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 1);
}

#[tokio::test]
async fn test_measure_rejects_malformed_script() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("script.json");
    std::fs::write(&script_path, "{\"events\": 3}").expect("write");

    let args = CliArgs::try_parse_from([
        "mapdraw",
        "measure",
        "--script",
        path(&script_path),
    ])
    .expect("parse");
    let err = mapdraw_cli::run(args, &mut Vec::new()).await.expect_err("malformed");
    assert!(err.to_string().contains("invalid script"));
}

// ===========================================================================
// mapdraw layers
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_layers_settles_slow_and_failing_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layers_path = dir.path().join("layers.json");
    let catalog_path = dir.path().join("catalog.json");

    let layers = vec![
        LayerDescriptor::new("base", "osm").with_z_index(0),
        LayerDescriptor::new("parcels", "parcels").with_z_index(1),
        LayerDescriptor::new("wms", "wms").with_z_index(2),
        LayerDescriptor::new("labels", "labels").with_z_index(3).always_top(),
        LayerDescriptor::new("ghost", "missing").with_z_index(4),
    ];
    let entry = |resource: GeoResource, delay_ms: Option<u64>, fail: Option<&str>| CatalogEntry {
        resource,
        delay_ms,
        fail: fail.map(str::to_string),
    };
    let catalog = vec![
        entry(GeoResource::raster("osm", "https://tiles.example/osm"), None, None),
        entry(GeoResource::raster("parcels", "https://tiles.example/parcels"), Some(500), None),
        entry(GeoResource::raster("wms", "https://wms.example"), Some(100), Some("capabilities failed")),
        entry(GeoResource::raster("labels", "https://tiles.example/labels"), None, None),
    ];
    write_json(&layers_path, &layers);
    write_json(&catalog_path, &catalog);

    let args = CliArgs::try_parse_from([
        "mapdraw",
        "layers",
        "--layers",
        path(&layers_path),
        "--catalog",
        path(&catalog_path),
    ])
    .expect("parse");
    let mut out = Vec::new();
    mapdraw_cli::run(args, &mut out).await.expect("run");

    let output = lines(&out);
    let (result, commands) = output.split_last().expect("output");
    let placeholders = commands
        .iter()
        .filter(|c| c["command"] == "add_placeholder")
        .count();
    assert_eq!(placeholders, 2);
    assert!(commands
        .iter()
        .any(|c| c["command"] == "swap" && c["id"] == "parcels" && c["index"] == 1));
    assert!(commands.iter().any(|c| c["command"] == "remove" && c["id"] == "wms"));

    assert_eq!(result["render_order"], serde_json::json!(["base", "parcels", "labels"]));
    let evicted: Vec<&str> = result["evicted"]
        .as_array()
        .expect("evicted")
        .iter()
        .filter_map(|e| e["id"].as_str())
        .collect();
    assert_eq!(evicted.len(), 2);
    assert!(evicted.contains(&"ghost"));
    assert!(evicted.contains(&"wms"));
}

#[tokio::test]
async fn test_layers_with_repeated_ids_render_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layers_path = dir.path().join("layers.json");
    let catalog_path = dir.path().join("catalog.json");

    let layers = vec![
        LayerDescriptor::new("a", "osm").with_z_index(0),
        LayerDescriptor::new("b", "labels").with_z_index(1),
        LayerDescriptor::new("a", "osm").with_z_index(2),
    ];
    let catalog = vec![
        CatalogEntry {
            resource: GeoResource::raster("osm", "https://tiles.example/osm"),
            delay_ms: None,
            fail: None,
        },
        CatalogEntry {
            resource: GeoResource::raster("labels", "https://tiles.example/labels"),
            delay_ms: None,
            fail: None,
        },
    ];
    write_json(&layers_path, &layers);
    write_json(&catalog_path, &catalog);

    let args = CliArgs::try_parse_from([
        "mapdraw",
        "layers",
        "--layers",
        path(&layers_path),
        "--catalog",
        path(&catalog_path),
    ])
    .expect("parse");
    let mut out = Vec::new();
    mapdraw_cli::run(args, &mut out).await.expect("run");

    let output = lines(&out);
    let result = output.last().expect("result");
    assert_eq!(result["render_order"], serde_json::json!(["b", "a"]));
    assert_eq!(result["evicted"], serde_json::json!([]));
}
