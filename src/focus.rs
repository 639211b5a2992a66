//! Focus highlight bookkeeping
//!
//! Keeps the list of focused feature ids per source and reconciles the
//! surface's feature state whenever the observed feature set changes. Each
//! source is unmarked completely before its new features are marked, so no
//! stale highlight survives a refocus.

use std::collections::HashMap;

use crate::features::{FeatureId, GroupedFeatures};
use crate::sources::{SourceRegistry, SOURCE_LAYER};
use crate::surface::{FeatureRef, FeatureState, MapSurface};

pub struct FocusTracker {
    /// Known sources, in registry order
    sources: Vec<String>,
    focused: HashMap<String, Vec<FeatureId>>,
    cycles: u64,
}

impl FocusTracker {
    pub fn new(registry: &SourceRegistry) -> Self {
        let sources: Vec<String> = registry.keys().map(str::to_string).collect();
        let focused = sources.iter().map(|s| (s.clone(), Vec::new())).collect();
        Self {
            sources,
            focused,
            cycles: 0,
        }
    }

    /// Replace the focus set of every known source with `grouped`.
    pub fn focus<S: MapSurface + ?Sized>(&mut self, grouped: &GroupedFeatures, surface: &mut S) {
        self.cycles += 1;
        for source in &self.sources {
            let next: Vec<FeatureId> = grouped
                .get(source)
                .map(|features| features.iter().map(|f| f.id).collect())
                .unwrap_or_default();
            let previous = self.focused.insert(source.clone(), Vec::new()).unwrap_or_default();

            for id in &previous {
                set_focus(surface, source, *id, false);
            }
            for id in &next {
                set_focus(surface, source, *id, true);
            }

            if !previous.is_empty() || !next.is_empty() {
                tracing::debug!(source = %source, unmarked = previous.len(), marked = next.len(), "refocused");
            }
            self.focused.insert(source.clone(), next);
        }
    }

    pub fn focused(&self, source: &str) -> &[FeatureId] {
        self.focused.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of reconciliations run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

fn set_focus<S: MapSurface + ?Sized>(surface: &mut S, source: &str, id: FeatureId, focus: bool) {
    let target = FeatureRef {
        source: source.to_string(),
        source_layer: SOURCE_LAYER.to_string(),
        id,
    };
    surface.set_feature_state(&target, FeatureState { focus });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_feature;
    use crate::surface::recording::RecordingSurface;
    use serde_json::json;

    fn grouped(source: &str, ids: &[u64]) -> GroupedFeatures {
        let mut grouped = GroupedFeatures::new();
        grouped.insert(
            source.to_string(),
            ids.iter().map(|id| test_feature(source, *id, json!({}))).collect(),
        );
        grouped
    }

    #[test]
    fn test_unmark_then_mark() {
        let registry = SourceRegistry::standard();
        let mut tracker = FocusTracker::new(&registry);
        let mut surface = RecordingSurface::new(8.0);

        tracker.focus(&grouped("tracts", &[1, 2]), &mut surface);
        surface.calls.clear();

        tracker.focus(&grouped("tracts", &[2, 3]), &mut surface);
        let tracts: Vec<(FeatureId, bool)> = surface
            .calls
            .iter()
            .filter(|(s, _, _)| s == "tracts")
            .map(|(_, id, focus)| (*id, *focus))
            .collect();
        assert_eq!(
            tracts,
            vec![
                (FeatureId(1), false),
                (FeatureId(2), false),
                (FeatureId(2), true),
                (FeatureId(3), true),
            ]
        );
        assert_eq!(tracker.focused("tracts"), &[FeatureId(2), FeatureId(3)]);
        assert_eq!(tracker.cycles(), 2);
    }

    #[test]
    fn test_absent_source_is_cleared() {
        let registry = SourceRegistry::standard();
        let mut tracker = FocusTracker::new(&registry);
        let mut surface = RecordingSurface::new(8.0);

        tracker.focus(&grouped("public_schools", &[7]), &mut surface);
        surface.calls.clear();
        tracker.focus(&grouped("tracts", &[1]), &mut surface);

        assert_eq!(
            surface.calls,
            vec![
                ("tracts".to_string(), FeatureId(1), true),
                ("public_schools".to_string(), FeatureId(7), false),
            ]
        );
        assert!(tracker.focused("public_schools").is_empty());
        assert!(tracker.focused("basemap").is_empty());
    }
}
