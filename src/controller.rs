//! Pointer and keyboard policy
//!
//! Hover follows the pointer until a click locks onto the features under it;
//! Esc releases the lock. Hover is gated on zoom and on the view being still,
//! and only describes when a feature id appears that was not already under the
//! pointer. Every describe request is numbered so that a slow, superseded
//! description can be dropped when it finally resolves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::describe::Composite;
use crate::features::{group_by_source, FeatureId, GroupedFeatures};
use crate::focus::FocusTracker;
use crate::sources::SourceRegistry;
use crate::surface::{MapSurface, ScreenPoint};

pub const LOCK_TIP: &str = "Locked onto feature, press Esc to release.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// Hover driven
    Unlocked,
    /// Click driven; hover is ignored until Esc
    Locked,
}

/// Zoom thresholds for hover and export
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gates {
    /// Hover is ignored at or below this zoom
    pub hover_min_zoom: f64,
    pub min_export_zoom: f64,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            hover_min_zoom: 5.0,
            min_export_zoom: 7.5,
        }
    }
}

/// Features to describe, tagged with the request's sequence number
#[derive(Clone, Debug, PartialEq)]
pub struct DescribeRequest {
    pub seq: u64,
    pub grouped: GroupedFeatures,
}

pub struct InteractionController {
    registry: Arc<SourceRegistry>,
    focus: FocusTracker,
    state: LockState,
    tip: Option<&'static str>,
    under_pointer: HashMap<String, HashSet<FeatureId>>,
    gates: Gates,
    issued: u64,
}

impl InteractionController {
    pub fn new(registry: Arc<SourceRegistry>, gates: Gates) -> Self {
        let focus = FocusTracker::new(&registry);
        Self {
            registry,
            focus,
            state: LockState::Unlocked,
            tip: None,
            under_pointer: HashMap::new(),
            gates,
            issued: 0,
        }
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn tip(&self) -> Option<&'static str> {
        self.tip
    }

    pub fn focus(&self) -> &FocusTracker {
        &self.focus
    }

    pub fn gates(&self) -> Gates {
        self.gates
    }

    /// Sequence number of the most recent describe request
    pub fn latest_seq(&self) -> u64 {
        self.issued
    }

    pub fn on_pointer_move<S: MapSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        point: ScreenPoint,
    ) -> Option<DescribeRequest> {
        if surface.is_moving() {
            return None;
        }
        let grouped = group_by_source(surface.query_rendered_features(Some(point)), &self.registry);

        let have_new = grouped.iter().any(|(source, features)| {
            let seen = self.under_pointer.get(source);
            features.iter().any(|f| !seen.is_some_and(|ids| ids.contains(&f.id)))
        });
        if have_new {
            self.under_pointer = grouped
                .iter()
                .map(|(source, features)| (source.clone(), features.iter().map(|f| f.id).collect()))
                .collect();
        }

        if self.state == LockState::Locked {
            return None;
        }
        if surface.zoom() <= self.gates.hover_min_zoom {
            return None;
        }
        if grouped.is_empty() || !have_new {
            return None;
        }
        Some(self.focus_and_describe(grouped, surface))
    }

    /// Clicks always refocus and describe; a click on nothing clears the focus.
    pub fn on_click<S: MapSurface + ?Sized>(&mut self, surface: &mut S, point: ScreenPoint) -> DescribeRequest {
        let grouped = group_by_source(surface.query_rendered_features(Some(point)), &self.registry);
        if !grouped.is_empty() {
            self.state = LockState::Locked;
            self.tip = Some(LOCK_TIP);
            tracing::debug!(sources = grouped.len(), "locked onto features");
        }
        self.focus_and_describe(grouped, surface)
    }

    pub fn on_escape(&mut self) {
        if self.state == LockState::Locked {
            tracing::debug!("lock released");
        }
        self.state = LockState::Unlocked;
        self.tip = None;
    }

    fn focus_and_describe<S: MapSurface + ?Sized>(
        &mut self,
        grouped: GroupedFeatures,
        surface: &mut S,
    ) -> DescribeRequest {
        self.focus.focus(&grouped, surface);
        self.issued += 1;
        DescribeRequest {
            seq: self.issued,
            grouped,
        }
    }

    /// Pass a finished description through only if nothing newer was requested.
    pub fn settle(&self, seq: u64, composite: Composite) -> Option<Composite> {
        if seq == self.issued {
            Some(composite)
        } else {
            tracing::debug!(seq, latest = self.issued, "dropping stale description");
            None
        }
    }

    pub fn can_export<S: MapSurface + ?Sized>(&self, surface: &S) -> bool {
        surface.loaded() && surface.zoom() >= self.gates.min_export_zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_feature;
    use crate::surface::recording::RecordingSurface;
    use serde_json::json;

    const AT: ScreenPoint = ScreenPoint { col: 3, row: 4 };

    fn controller() -> InteractionController {
        InteractionController::new(Arc::new(SourceRegistry::standard()), Gates::default())
    }

    fn surface_with(features: &[(&str, u64)]) -> RecordingSurface {
        let mut surface = RecordingSurface::new(8.0);
        surface.features = features
            .iter()
            .map(|(source, id)| test_feature(source, *id, json!({})))
            .collect();
        surface
    }

    #[test]
    fn test_hover_describes_only_new_features() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);

        let first = c.on_pointer_move(&mut surface, AT).unwrap();
        assert_eq!(first.seq, 1);
        assert!(c.on_pointer_move(&mut surface, AT).is_none());

        surface.features.push(test_feature("tracts", 2, json!({})));
        let second = c.on_pointer_move(&mut surface, AT).unwrap();
        assert_eq!(second.grouped["tracts"].len(), 2);
        assert_eq!(c.focus().cycles(), 2);
    }

    #[test]
    fn test_hover_gated_on_zoom_and_motion() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);

        surface.zoom = 5.0;
        assert!(c.on_pointer_move(&mut surface, AT).is_none());
        assert_eq!(c.focus().cycles(), 0);

        surface.zoom = 8.0;
        surface.moving = true;
        surface.features.push(test_feature("tracts", 2, json!({})));
        assert!(c.on_pointer_move(&mut surface, AT).is_none());

        surface.moving = false;
        surface.features.push(test_feature("tracts", 3, json!({})));
        assert!(c.on_pointer_move(&mut surface, AT).is_some());
    }

    #[test]
    fn test_hover_over_nothing_keeps_focus() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);
        c.on_pointer_move(&mut surface, AT).unwrap();

        surface.features.clear();
        assert!(c.on_pointer_move(&mut surface, AT).is_none());
        assert_eq!(c.focus().focused("tracts"), &[FeatureId(1)]);
    }

    #[test]
    fn test_click_locks_and_escape_releases() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);

        let req = c.on_click(&mut surface, AT);
        assert_eq!(c.state(), LockState::Locked);
        assert_eq!(c.tip(), Some(LOCK_TIP));
        assert_eq!(req.seq, 1);

        surface.features = vec![test_feature("tracts", 9, json!({}))];
        assert!(c.on_pointer_move(&mut surface, AT).is_none());
        assert_eq!(c.focus().focused("tracts"), &[FeatureId(1)]);

        c.on_escape();
        assert_eq!(c.state(), LockState::Unlocked);
        assert_eq!(c.tip(), None);
    }

    #[test]
    fn test_empty_click_clears_focus_without_locking() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);
        c.on_pointer_move(&mut surface, AT).unwrap();

        surface.features.clear();
        let req = c.on_click(&mut surface, AT);
        assert!(req.grouped.is_empty());
        assert_eq!(c.state(), LockState::Unlocked);
        assert!(c.focus().focused("tracts").is_empty());
    }

    #[test]
    fn test_stale_description_dropped() {
        let mut c = controller();
        let mut surface = surface_with(&[("tracts", 1)]);
        let first = c.on_click(&mut surface, AT);
        let second = c.on_click(&mut surface, AT);

        assert!(c.settle(first.seq, Composite::default()).is_none());
        assert!(c.settle(second.seq, Composite::default()).is_some());
    }

    #[test]
    fn test_can_export() {
        let c = controller();
        let mut surface = RecordingSurface::new(7.5);
        assert!(c.can_export(&surface));
        surface.zoom = 7.4;
        assert!(!c.can_export(&surface));
        surface.zoom = 9.0;
        surface.loaded = false;
        assert!(!c.can_export(&surface));
    }
}
