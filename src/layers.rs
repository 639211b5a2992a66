//! Source and layer definitions registered with the surface at load time

use std::path::Path;

use serde_json::{json, Value};

use crate::gradient::{ColorError, ColorRamp};
use crate::sources::{SourceRegistry, SOURCE_LAYER};
use crate::surface::{LayerDef, LayerKind, MapSurface, Paint, SourceDef};

/// Highlight colour of focused features
pub const FOCUS_COLOR: &str = "#4064FB";
pub const FOCUS_RGB: (u8, u8, u8) = (0x40, 0x64, 0xfb);

/// Tract fill: social vulnerability percentile, green (low) to red (high)
pub const SVI_PROPERTY: &str = "svi_rank";
pub const SVI_RANGE: (f64, f64) = (0.0, 1.0);
pub const SVI_GRADIENT: [(f64, &str); 2] = [(0.0, "#34d354"), (1.0, "#d35434")];

const SCHOOL_RGB: (u8, u8, u8) = (251, 191, 8);

/// One GeoJSON file per known source: `{tiles_dir}/{source}.geojson`
pub fn source_defs(tiles_dir: &Path, registry: &SourceRegistry) -> Vec<SourceDef> {
    registry
        .keys()
        .map(|key| SourceDef {
            key: key.to_string(),
            path: tiles_dir.join(format!("{}.geojson", key)),
        })
        .collect()
}

/// Layers in paint order (bottom first)
pub fn default_layers() -> Result<Vec<LayerDef>, ColorError> {
    let layer = |id: &str, source: &str, kind: LayerKind, paint: Paint| LayerDef {
        id: id.to_string(),
        source: source.to_string(),
        kind,
        paint,
    };
    Ok(vec![
        layer(
            "tracts",
            "tracts",
            LayerKind::Fill,
            Paint::Fill {
                ramp: Some(ColorRamp::new(SVI_PROPERTY, &SVI_GRADIENT, SVI_RANGE)?),
            },
        ),
        layer(
            "public_schools",
            "public_schools",
            LayerKind::Circle,
            Paint::Circle { color: SCHOOL_RGB, min_zoom: 7.0 },
        ),
        layer("con_districts-outline", "con_districts", LayerKind::Line, Paint::Line { min_zoom: 7.0 }),
        layer("con_districts-labels", "con_districts", LayerKind::Symbol, Paint::Label { min_zoom: 6.0 }),
        layer("con_districts", "con_districts", LayerKind::Fill, Paint::Hidden),
        layer("school_districts", "school_districts", LayerKind::Fill, Paint::Hidden),
    ])
}

/// Register sources then layers, in order.
pub fn install<S: MapSurface + ?Sized>(surface: &mut S, sources: Vec<SourceDef>, layers: Vec<LayerDef>) {
    for source in sources {
        surface.add_source(source);
    }
    for layer in layers {
        surface.add_layer(layer);
    }
}

fn focus_case(otherwise: Value) -> Value {
    json!(["case", ["boolean", ["feature-state", "focus"], false], FOCUS_COLOR, otherwise])
}

fn zoom_fade(from: f64, to: f64, visible: Value) -> Value {
    json!(["interpolate", ["linear"], ["zoom"], from, "rgba(0, 0, 0, 0)", to, visible])
}

fn layer_json(layer: &LayerDef) -> Value {
    let (kind, paint) = match &layer.paint {
        Paint::Fill { ramp: Some(ramp) } => {
            let mut interpolate = vec![json!("interpolate"), json!(["linear"]), json!(["get", ramp.property])];
            interpolate.extend(ramp.style().into_iter().map(|v| json!(v)));
            (
                "fill",
                json!({
                    "fill-color": focus_case(Value::Array(interpolate)),
                    "fill-outline-color": zoom_fade(5.0, 10.0, json!("rgba(0,0,0,1)")),
                }),
            )
        }
        Paint::Fill { ramp: None } => ("fill", json!({ "fill-color": "rgba(0,0,0,0)" })),
        Paint::Hidden => ("fill", json!({ "fill-opacity": 0 })),
        Paint::Circle { color: (r, g, b), min_zoom } => (
            "circle",
            json!({
                "circle-radius": 8,
                "circle-color": ["interpolate", ["linear"], ["zoom"],
                    min_zoom - 2.0, focus_case(json!("rgba(0, 0, 0, 0)")),
                    min_zoom + 3.0, focus_case(json!(format!("rgba({},{},{},1)", r, g, b)))],
                "circle-stroke-color": "#000000",
                "circle-stroke-width": 1,
            }),
        ),
        Paint::Line { min_zoom } => (
            "line",
            json!({
                "line-color": zoom_fade(min_zoom - 2.0, min_zoom + 3.0, json!("rgba(0,0,0,1)")),
                "line-width": 2,
            }),
        ),
        Paint::Label { min_zoom } => (
            "symbol",
            json!({ "text-opacity": ["interpolate", ["linear"], ["zoom"], min_zoom - 4.0, 0.0, min_zoom + 4.0, 1.0] }),
        ),
    };
    json!({
        "id": layer.id,
        "type": kind,
        "source": layer.source,
        "source-layer": SOURCE_LAYER,
        "paint": paint,
    })
}

/// Mapbox-style JSON document describing the configured sources and layers
pub fn style_document(sources: &[SourceDef], layers: &[LayerDef]) -> Value {
    let sources: serde_json::Map<String, Value> = sources
        .iter()
        .map(|s| {
            (
                s.key.clone(),
                json!({ "type": "geojson", "data": s.path.display().to_string() }),
            )
        })
        .collect();
    json!({
        "version": 8,
        "sources": sources,
        "layers": layers.iter().map(layer_json).collect::<Vec<_>>(),
    })
}
