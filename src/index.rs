//! GeoJSON backed map surface
//!
//! Loads one FeatureCollection per source and renders them onto a grid of
//! terminal cells. The viewport uses a plain equirectangular projection scaled
//! by zoom; cells are roughly twice as tall as they are wide. Hit-testing
//! checks polygons against the centre of the queried cell and points against
//! the cell they project into.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use geo::{BoundingRect, Coord, Geometry, Intersects, Point, Rect};
use geojson::{feature::Id, GeoJson};
use thiserror::Error;

use crate::features::{Feature, FeatureId};
use crate::fips;
use crate::layers::FOCUS_RGB;
use crate::sources::SOURCE_LAYER;
use crate::surface::{FeatureRef, FeatureState, LayerDef, LngLat, MapSurface, Paint, ScreenPoint, SourceDef};

/// Horizontal cells spanning 360 degrees at zoom 0
const CELLS_PER_WORLD: f64 = 64.0;
/// Height/width ratio of a terminal cell
const CELL_ASPECT: f64 = 2.0;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("could not read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid GeoJSON in {}: {source}", path.display())]
    GeoJson { path: PathBuf, source: Box<geojson::Error> },
    #[error("{} is not a FeatureCollection", path.display())]
    NotACollection { path: PathBuf },
}

/// Visible window onto the map, measured in terminal cells
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub center: LngLat,
    pub zoom: f64,
    pub cols: u16,
    pub rows: u16,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Viewport {
    pub fn degrees_per_col(&self) -> f64 {
        360.0 / (CELLS_PER_WORLD * 2f64.powf(self.zoom))
    }

    pub fn degrees_per_row(&self) -> f64 {
        self.degrees_per_col() * CELL_ASPECT * self.center.lat.to_radians().cos().max(0.1)
    }

    /// Geographic position of the centre of a cell
    pub fn to_lnglat(&self, p: ScreenPoint) -> LngLat {
        let dx = p.col as f64 + 0.5 - self.cols as f64 / 2.0;
        let dy = p.row as f64 + 0.5 - self.rows as f64 / 2.0;
        LngLat::new(
            self.center.lng + dx * self.degrees_per_col(),
            self.center.lat - dy * self.degrees_per_row(),
        )
    }

    /// Cell containing a position, if it is on screen
    pub fn to_screen(&self, ll: LngLat) -> Option<ScreenPoint> {
        let col = ((ll.lng - self.center.lng) / self.degrees_per_col() + self.cols as f64 / 2.0).floor();
        let row = ((self.center.lat - ll.lat) / self.degrees_per_row() + self.rows as f64 / 2.0).floor();
        if col < 0.0 || row < 0.0 || col >= self.cols as f64 || row >= self.rows as f64 {
            return None;
        }
        Some(ScreenPoint::new(col as u16, row as u16))
    }

    pub fn bounds(&self) -> Rect<f64> {
        let half_w = self.cols as f64 / 2.0 * self.degrees_per_col();
        let half_h = self.rows as f64 / 2.0 * self.degrees_per_row();
        Rect::new(
            Coord { x: self.center.lng - half_w, y: self.center.lat - half_h },
            Coord { x: self.center.lng + half_w, y: self.center.lat + half_h },
        )
    }
}

struct IndexedFeature {
    feature: Feature,
    geometry: Geometry<f64>,
    bbox: Rect<f64>,
}

impl IndexedFeature {
    fn is_point(&self) -> bool {
        matches!(self.geometry, Geometry::Point(_) | Geometry::MultiPoint(_))
    }
}

struct LoadedSource {
    key: String,
    features: Vec<IndexedFeature>,
    error: Option<String>,
}

/// What to draw in one cell
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellPaint {
    pub ch: char,
    pub fg: Option<(u8, u8, u8)>,
    pub bg: Option<(u8, u8, u8)>,
}

impl Default for CellPaint {
    fn default() -> Self {
        Self { ch: ' ', fg: None, bg: None }
    }
}

pub struct GeoSurface {
    viewport: Viewport,
    sources: Vec<LoadedSource>,
    layers: Vec<LayerDef>,
    states: HashMap<FeatureRef, FeatureState>,
}

impl GeoSurface {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            sources: Vec::new(),
            layers: Vec::new(),
            states: HashMap::new(),
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.viewport.cols = cols.max(1);
        self.viewport.rows = rows.max(1);
    }

    pub fn zoom_by(&mut self, delta: f64) {
        let center = self.viewport.center;
        self.fly_to(center, self.viewport.zoom + delta);
    }

    /// Shift the view by a number of cells
    pub fn pan(&mut self, cols: i32, rows: i32) {
        let v = &mut self.viewport;
        let lng = v.center.lng + cols as f64 * v.degrees_per_col();
        let lat = (v.center.lat - rows as f64 * v.degrees_per_row()).clamp(-85.0, 85.0);
        v.center = LngLat::new(lng, lat);
    }

    /// Sources that failed to load, with the reason
    pub fn load_errors(&self) -> Vec<(&str, &str)> {
        self.sources
            .iter()
            .filter_map(|s| s.error.as_deref().map(|e| (s.key.as_str(), e)))
            .collect()
    }

    pub fn feature_count(&self) -> usize {
        self.sources.iter().map(|s| s.features.len()).sum()
    }

    pub fn is_focused(&self, source: &str, id: FeatureId) -> bool {
        let target = FeatureRef {
            source: source.to_string(),
            source_layer: SOURCE_LAYER.to_string(),
            id,
        };
        self.states.get(&target).map(|s| s.focus).unwrap_or(false)
    }

    fn source(&self, key: &str) -> Option<&LoadedSource> {
        self.sources.iter().find(|s| s.key == key)
    }

    /// Features of `source` hit at cell `p`
    fn hits<'a>(&'a self, source: &str, p: ScreenPoint) -> impl Iterator<Item = &'a IndexedFeature> + 'a {
        let at = self.viewport.to_lnglat(p);
        let point = Point::new(at.lng, at.lat);
        let viewport = self.viewport;
        self.source(source)
            .into_iter()
            .flat_map(|s| s.features.iter())
            .filter(move |f| {
                if f.is_point() {
                    let centre = f.bbox.center();
                    viewport.to_screen(LngLat::new(centre.x, centre.y)) == Some(p)
                } else {
                    f.bbox.intersects(&point.0) && f.geometry.intersects(&point)
                }
            })
    }

    /// Paint for one cell, compositing layers bottom to top
    pub fn paint_cell(&self, p: ScreenPoint) -> CellPaint {
        let mut paint = CellPaint::default();
        let zoom = self.viewport.zoom;

        for layer in &self.layers {
            match &layer.paint {
                Paint::Fill { ramp: Some(ramp) } => {
                    if let Some(hit) = self.hits(&layer.source, p).next() {
                        if self.is_focused(&layer.source, hit.feature.id) {
                            paint.bg = Some(FOCUS_RGB);
                        } else if let Some(rgb) = hit
                            .feature
                            .property(&ramp.property)
                            .and_then(|v| v.as_f64())
                            .and_then(|v| ramp.sample(v))
                        {
                            paint.bg = Some(rgb);
                        }
                    }
                }
                Paint::Line { min_zoom } if zoom >= *min_zoom => {
                    if self.is_boundary(&layer.source, p) {
                        paint.ch = '·';
                        paint.fg = Some((20, 20, 20));
                    }
                }
                Paint::Circle { color, min_zoom } => {
                    if let Some(hit) = self.hits(&layer.source, p).find(|f| f.is_point()) {
                        let focused = self.is_focused(&layer.source, hit.feature.id);
                        if focused || zoom >= *min_zoom {
                            paint.ch = '●';
                            paint.fg = Some(if focused { FOCUS_RGB } else { *color });
                        }
                    }
                }
                _ => {}
            }
        }
        paint
    }

    fn is_boundary(&self, source: &str, p: ScreenPoint) -> bool {
        let here = self.hits(source, p).next().map(|f| f.feature.id);
        let right = ScreenPoint::new(p.col.saturating_add(1), p.row);
        let below = ScreenPoint::new(p.col, p.row.saturating_add(1));
        [right, below]
            .into_iter()
            .any(|n| n != p && self.hits(source, n).next().map(|f| f.feature.id) != here)
    }

    /// District labels in view: (cell, text)
    pub fn labels(&self) -> Vec<(ScreenPoint, String)> {
        let mut labels = Vec::new();
        for layer in &self.layers {
            let Paint::Label { min_zoom } = layer.paint else {
                continue;
            };
            if self.viewport.zoom < min_zoom {
                continue;
            }
            let Some(source) = self.source(&layer.source) else {
                continue;
            };
            for f in &source.features {
                let centre = f.bbox.center();
                let Some(cell) = self.viewport.to_screen(LngLat::new(centre.x, centre.y)) else {
                    continue;
                };
                let text = f
                    .feature
                    .property("GEOID")
                    .and_then(|v| v.as_str())
                    .and_then(fips::district_label);
                if let Some(text) = text {
                    labels.push((cell, text));
                }
            }
        }
        labels
    }

    /// Sources with at least one layer, in layer order without repeats
    fn rendered_sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.layers
            .iter()
            .rev()
            .map(|l| l.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }
}

fn numeric_id(id: Option<&Id>) -> Option<u64> {
    match id {
        Some(Id::Number(n)) => n.as_u64(),
        _ => None,
    }
}

/// Ids for a collection: numeric ids are kept, the rest are numbered from
/// above the largest numeric id so the two never collide.
fn feature_ids(ids: &[Option<&Id>]) -> Vec<FeatureId> {
    let first_free = ids
        .iter()
        .filter_map(|id| numeric_id(*id))
        .max()
        .map_or(0, |max| max.saturating_add(1));
    ids.iter()
        .enumerate()
        .map(|(index, id)| FeatureId(numeric_id(*id).unwrap_or_else(|| first_free.saturating_add(index as u64))))
        .collect()
}

fn load_source(key: &str, path: &Path) -> Result<Vec<IndexedFeature>, SurfaceError> {
    let text = std::fs::read_to_string(path).map_err(|source| SurfaceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let geojson: GeoJson = text.parse().map_err(|source| SurfaceError::GeoJson {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(SurfaceError::NotACollection { path: path.to_path_buf() });
    };

    let ids = feature_ids(&collection.features.iter().map(|f| f.id.as_ref()).collect::<Vec<_>>());
    let mut features = Vec::with_capacity(collection.features.len());
    for (index, (feature, id)) in collection.features.into_iter().zip(ids).enumerate() {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let Ok(geometry) = Geometry::<f64>::try_from(geometry) else {
            tracing::debug!(source = key, index, "skipping unsupported geometry");
            continue;
        };
        let Some(bbox) = geometry.bounding_rect() else {
            continue;
        };
        features.push(IndexedFeature {
            feature: Feature {
                source: key.to_string(),
                source_layer: SOURCE_LAYER.to_string(),
                id,
                properties: feature.properties.unwrap_or_default(),
            },
            geometry,
            bbox,
        });
    }
    Ok(features)
}

impl MapSurface for GeoSurface {
    fn query_rendered_features(&self, point: Option<ScreenPoint>) -> Vec<Feature> {
        let mut found = Vec::new();
        for key in self.rendered_sources() {
            match point {
                Some(p) => found.extend(self.hits(key, p).map(|f| f.feature.clone())),
                None => {
                    let bounds = self.viewport.bounds();
                    if let Some(source) = self.source(key) {
                        found.extend(
                            source
                                .features
                                .iter()
                                .filter(|f| f.bbox.intersects(&bounds))
                                .map(|f| f.feature.clone()),
                        );
                    }
                }
            }
        }
        found
    }

    fn set_feature_state(&mut self, target: &FeatureRef, state: FeatureState) {
        if state == FeatureState::default() {
            self.states.remove(target);
        } else {
            self.states.insert(target.clone(), state);
        }
    }

    fn add_source(&mut self, source: SourceDef) {
        let loaded = match load_source(&source.key, &source.path) {
            Ok(features) => {
                tracing::info!(source = %source.key, features = features.len(), "loaded source");
                LoadedSource { key: source.key, features, error: None }
            }
            Err(err) => {
                tracing::warn!(source = %source.key, error = %err, "source failed to load");
                LoadedSource {
                    key: source.key,
                    features: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        self.sources.retain(|s| s.key != loaded.key);
        self.sources.push(loaded);
    }

    fn add_layer(&mut self, layer: LayerDef) {
        self.layers.push(layer);
    }

    fn zoom(&self) -> f64 {
        self.viewport.zoom
    }

    fn center(&self) -> LngLat {
        self.viewport.center
    }

    fn fly_to(&mut self, center: LngLat, zoom: f64) {
        self.viewport.center = LngLat::new(center.lng, center.lat.clamp(-85.0, 85.0));
        self.viewport.zoom = zoom.clamp(self.viewport.min_zoom, self.viewport.max_zoom);
    }

    fn loaded(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.error.is_none())
    }

    fn is_moving(&self) -> bool {
        // Jumps are applied immediately; there is no animated transition
        false
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    /// Two tracts side by side, one congressional district over both, one school
    pub fn write_tiles(dir: &Path) {
        let square = |x0: f64, x1: f64| {
            serde_json::json!({
                "type": "Polygon",
                "coordinates": [[[x0, -5.0], [x1, -5.0], [x1, 5.0], [x0, 5.0], [x0, -5.0]]]
            })
        };
        let collection = |features: Vec<serde_json::Value>| {
            serde_json::json!({ "type": "FeatureCollection", "features": features }).to_string()
        };

        let tracts = collection(vec![
            serde_json::json!({"type": "Feature", "id": 1, "geometry": square(-10.0, 0.0),
                "properties": {"GEOID": "36001000100", "svi_rank": 0.2}}),
            serde_json::json!({"type": "Feature", "id": 2, "geometry": square(0.0, 10.0),
                "properties": {"GEOID": "36001000200", "svi_rank": 0.9}}),
        ]);
        let districts = collection(vec![serde_json::json!({"type": "Feature", "id": 5,
            "geometry": square(-10.0, 10.0), "properties": {"GEOID": "3620"}})]);
        let schools = collection(vec![serde_json::json!({"type": "Feature", "id": 9,
            "geometry": {"type": "Point", "coordinates": [5.0, 2.0]},
            "properties": {"NCESID": "360007"}})]);
        let school_districts = collection(vec![serde_json::json!({"type": "Feature", "id": 3,
            "geometry": square(-10.0, 10.0), "properties": {"GEOID": "3600001"}})]);

        std::fs::write(dir.join("tracts.geojson"), tracts).unwrap();
        std::fs::write(dir.join("con_districts.geojson"), districts).unwrap();
        std::fs::write(dir.join("public_schools.geojson"), schools).unwrap();
        std::fs::write(dir.join("school_districts.geojson"), school_districts).unwrap();
    }
}
