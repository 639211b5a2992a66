//! Contract with the map rendering surface
//!
//! The explorer never paints or hit-tests itself; it asks a `MapSurface` for
//! rendered features and pushes per-feature state (focus) back into it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::features::{Feature, FeatureId};
use crate::gradient::ColorRamp;

/// Longitude/latitude in degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl std::fmt::Display for LngLat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.lng, self.lat)
    }
}

impl std::str::FromStr for LngLat {
    type Err = String;

    /// Parses "lng,lat"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lng, lat) = s
            .split_once(',')
            .ok_or_else(|| format!("expected LNG,LAT, got {:?}", s))?;
        let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("{:?}: {}", v, e));
        Ok(LngLat::new(parse(lng)?, parse(lat)?))
    }
}

/// Position on the rendered view (terminal cell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScreenPoint {
    pub col: u16,
    pub row: u16,
}

impl ScreenPoint {
    pub fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }
}

/// Address of one feature for state updates
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeatureRef {
    pub source: String,
    pub source_layer: String,
    pub id: FeatureId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureState {
    pub focus: bool,
}

/// A data source registered with the surface at load time
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDef {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Fill,
    Circle,
    Line,
    Symbol,
}

/// How a layer is painted
#[derive(Clone, Debug)]
pub enum Paint {
    /// Data-driven fill; features without the ramp property stay unpainted
    Fill { ramp: Option<ColorRamp> },
    /// Point markers, visible from `min_zoom` (always when focused)
    Circle { color: (u8, u8, u8), min_zoom: f64 },
    /// Feature outlines, visible from `min_zoom`
    Line { min_zoom: f64 },
    /// District labels, visible from `min_zoom`
    Label { min_zoom: f64 },
    /// Hit-testable but not drawn
    Hidden,
}

#[derive(Clone, Debug)]
pub struct LayerDef {
    pub id: String,
    pub source: String,
    pub kind: LayerKind,
    pub paint: Paint,
}

/// Rendering surface consumed by the explorer
pub trait MapSurface {
    /// Features rendered under `point`, or in the whole view for `None`
    fn query_rendered_features(&self, point: Option<ScreenPoint>) -> Vec<Feature>;

    fn set_feature_state(&mut self, target: &FeatureRef, state: FeatureState);

    fn add_source(&mut self, source: SourceDef);

    fn add_layer(&mut self, layer: LayerDef);

    fn zoom(&self) -> f64;

    fn center(&self) -> LngLat;

    fn fly_to(&mut self, center: LngLat, zoom: f64);

    /// Whether every added source has finished loading
    fn loaded(&self) -> bool;

    /// Whether the view is mid pan/zoom
    fn is_moving(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;

    /// Scripted surface that records every feature-state call
    #[derive(Default)]
    pub struct RecordingSurface {
        pub features: Vec<Feature>,
        pub calls: Vec<(String, FeatureId, bool)>,
        pub zoom: f64,
        pub center: Option<LngLat>,
        pub loaded: bool,
        pub moving: bool,
    }

    impl RecordingSurface {
        pub fn new(zoom: f64) -> Self {
            Self {
                zoom,
                loaded: true,
                ..Self::default()
            }
        }
    }

    impl MapSurface for RecordingSurface {
        fn query_rendered_features(&self, _point: Option<ScreenPoint>) -> Vec<Feature> {
            self.features.clone()
        }

        fn set_feature_state(&mut self, target: &FeatureRef, state: FeatureState) {
            self.calls.push((target.source.clone(), target.id, state.focus));
        }

        fn add_source(&mut self, _source: SourceDef) {}

        fn add_layer(&mut self, _layer: LayerDef) {}

        fn zoom(&self) -> f64 {
            self.zoom
        }

        fn center(&self) -> LngLat {
            self.center.unwrap_or(LngLat::new(0.0, 0.0))
        }

        fn fly_to(&mut self, center: LngLat, zoom: f64) {
            self.center = Some(center);
            self.zoom = zoom;
        }

        fn loaded(&self) -> bool {
            self.loaded
        }

        fn is_moving(&self) -> bool {
            self.moving
        }
    }
}
