//! Rendered features and grouping by source

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sources::SourceRegistry;

/// Intrinsic attributes carried by a feature
pub type Properties = Map<String, Value>;

/// Stable per-source feature id, used for feature-state calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One geographic entity as returned by a hit-test
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub source: String,
    pub source_layer: String,
    pub id: FeatureId,
    pub properties: Properties,
}

impl Feature {
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Features keyed by source, rebuilt for every query
pub type GroupedFeatures = BTreeMap<String, Vec<Feature>>;

/// Partition features by source, keeping hit-test order within each source.
///
/// Features from sources the registry does not know (basemap layers and the
/// like) are dropped.
pub fn group_by_source(features: Vec<Feature>, registry: &SourceRegistry) -> GroupedFeatures {
    let mut grouped = GroupedFeatures::new();
    for feature in features {
        if !registry.contains(&feature.source) {
            tracing::trace!(source = %feature.source, id = %feature.id, "dropping feature from unknown source");
            continue;
        }
        grouped.entry(feature.source.clone()).or_default().push(feature);
    }
    grouped
}

#[cfg(test)]
pub(crate) fn test_feature(source: &str, id: u64, properties: Value) -> Feature {
    Feature {
        source: source.to_string(),
        source_layer: crate::sources::SOURCE_LAYER.to_string(),
        id: FeatureId(id),
        properties: properties.as_object().cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_sources_dropped() {
        let registry = SourceRegistry::standard();
        let features = vec![
            test_feature("tracts", 1, json!({"GEOID": "36001000100"})),
            test_feature("basemap", 2, json!({"name": "Albany"})),
            test_feature("tracts", 3, json!({"GEOID": "36001000200"})),
        ];

        let grouped = group_by_source(features, &registry);
        assert_eq!(grouped.len(), 1);
        let ids: Vec<u64> = grouped["tracts"].iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(!grouped.contains_key("basemap"));
    }

    #[test]
    fn test_multiple_sources() {
        let registry = SourceRegistry::standard();
        let features = vec![
            test_feature("public_schools", 7, json!({"NCESID": "360007"})),
            test_feature("con_districts", 4, json!({"GEOID": "3620"})),
        ];
        let grouped = group_by_source(features, &registry);
        assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["con_districts", "public_schools"]);
        assert!(group_by_source(Vec::new(), &registry).is_empty());
    }
}
