//! Feature descriptions for the details panel
//!
//! A source's features are merged with their auxiliary records (one batched
//! cache lookup per source) and passed through the source's describe function.
//! `describe_all` runs every source concurrently and lays the results out in a
//! fixed placement order, independent of hit-test order.

use std::sync::Arc;

use futures::future::join_all;

use crate::features::{Feature, GroupedFeatures};
use crate::format::{plain, PctDiff};
use crate::records::{Record, RecordCache, RecordFetcher};
use crate::sources::{Placement, SourceRegistry};

/// One line of a feature description
#[derive(Clone, Debug, PartialEq)]
pub enum DetailLine {
    Heading(String),
    Field {
        label: String,
        value: String,
        diff: Option<PctDiff>,
    },
    Flag(String),
    Text(String),
}

impl DetailLine {
    pub fn field(label: &str, value: String) -> Self {
        DetailLine::Field {
            label: label.to_string(),
            value,
            diff: None,
        }
    }

    /// Field with a change relative to the median
    pub fn compared(label: &str, value: String, diff: Option<PctDiff>) -> Self {
        DetailLine::Field {
            label: label.to_string(),
            value,
            diff,
        }
    }

    fn to_html(&self) -> String {
        match self {
            DetailLine::Heading(text) => format!("<h4>{}</h4>", escape(text)),
            DetailLine::Field { label, value, diff } => {
                let diff = diff
                    .as_ref()
                    .map(|d| format!(" <span class=\"{}\">{}</span>*", d.tone.css_class(), d.label()))
                    .unwrap_or_default();
                format!("<div>{}: {}{}</div>", escape(label), escape(value), diff)
            }
            DetailLine::Flag(text) => format!("<div class=\"good flag\">{}</div>", escape(text)),
            DetailLine::Text(text) => escape(text),
        }
    }
}

impl std::fmt::Display for DetailLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetailLine::Field { label, value, diff } => {
                write!(f, "{}: {}", label, value)?;
                if let Some(diff) = diff {
                    write!(f, " {}*", diff.label())?;
                }
                Ok(())
            }
            DetailLine::Heading(text) | DetailLine::Flag(text) | DetailLine::Text(text) => write!(f, "{}", text),
        }
    }
}

/// All described features of one source
#[derive(Clone, Debug, PartialEq)]
pub struct SourceDescription {
    pub source: String,
    pub placement: Placement,
    /// Whether items were merged with auxiliary records
    pub enriched: bool,
    pub items: Vec<Vec<DetailLine>>,
}

impl SourceDescription {
    pub fn to_html(&self) -> String {
        let items: Vec<String> = self
            .items
            .iter()
            .map(|lines| {
                let body: String = lines.iter().map(DetailLine::to_html).collect();
                if self.enriched {
                    format!("<div>{}</div>", body)
                } else {
                    body
                }
            })
            .collect();
        format!(
            "<h3>{}</h3><div class=\"items\">{}</div>",
            escape(&self.source),
            items.join("<br />")
        )
    }
}

/// Descriptions of every source under the pointer, in layout order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Composite {
    pub sections: Vec<SourceDescription>,
}

impl Composite {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, source: &str) -> Option<&SourceDescription> {
        self.sections.iter().find(|s| s.source == source)
    }

    pub fn sources(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.source.as_str()).collect()
    }

    /// Details panel markup: primary sources, then secondary, then tertiary.
    pub fn to_html(&self) -> String {
        let column = |placement: Placement| -> String {
            self.sections
                .iter()
                .filter(|s| s.placement == placement)
                .map(SourceDescription::to_html)
                .collect()
        };
        let tertiary = column(Placement::Tertiary);
        let tertiary = if tertiary.is_empty() {
            tertiary
        } else {
            format!("<div>{}</div>", tertiary)
        };
        format!(
            "<div><div>{}</div><div>{}</div>{}</div>",
            column(Placement::Primary),
            column(Placement::Secondary),
            tertiary
        )
    }
}

/// Plain text rendering, one block per source
impl std::fmt::Display for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.source)?;
            for (j, item) in section.items.iter().enumerate() {
                if j > 0 {
                    writeln!(f, "  ---")?;
                }
                for line in item {
                    writeln!(f, "  {}", line)?;
                }
            }
        }
        Ok(())
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Record id of a feature: the string form of its `id_key` property
pub fn record_id(feature: &Feature, id_key: &str) -> Option<String> {
    match feature.property(id_key) {
        None | Some(serde_json::Value::Null) => None,
        value => Some(plain(value)),
    }
}

/// Builds descriptions from the source registry and the record cache
pub struct Describer<F> {
    registry: Arc<SourceRegistry>,
    cache: Arc<RecordCache<F>>,
}

impl<F> Clone for Describer<F> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<F: RecordFetcher> Describer<F> {
    pub fn new(registry: Arc<SourceRegistry>, cache: Arc<RecordCache<F>>) -> Self {
        Self { registry, cache }
    }

    /// Describe the features of one source. `None` for unknown sources.
    ///
    /// A missing record degrades to an empty one; this never fails.
    pub async fn describe(&self, source: &str, features: &[Feature]) -> Option<SourceDescription> {
        let spec = self.registry.get(source)?;
        let empty = Record::new();

        let items = match &spec.id_key {
            None => features
                .iter()
                .map(|f| (spec.describe)(&f.properties, &empty))
                .collect(),
            Some(id_key) => {
                let ids: Vec<Option<String>> = features.iter().map(|f| record_id(f, id_key)).collect();
                let lookup: Vec<String> = ids.iter().flatten().cloned().collect();
                let records = self.cache.get_many(source, &lookup).await;

                features
                    .iter()
                    .zip(&ids)
                    .map(|(f, id)| {
                        let record = id
                            .as_ref()
                            .and_then(|id| records.get(id))
                            .and_then(|r| r.as_deref())
                            .unwrap_or(&empty);
                        (spec.describe)(&f.properties, record)
                    })
                    .collect()
            }
        };

        Some(SourceDescription {
            source: spec.key.clone(),
            placement: spec.placement,
            enriched: spec.id_key.is_some(),
            items,
        })
    }

    /// Describe every source in `grouped` concurrently and lay them out.
    pub async fn describe_all(&self, grouped: &GroupedFeatures) -> Composite {
        let pending = grouped
            .iter()
            .filter(|(_, features)| !features.is_empty())
            .map(|(source, features)| self.describe(source, features));
        let mut sections: Vec<SourceDescription> = join_all(pending).await.into_iter().flatten().collect();
        sections.sort_by_key(|s| self.registry.layout_rank(&s.source));
        Composite { sections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_feature;
    use crate::records::fake::FakeFetcher;
    use serde_json::json;

    fn describer(fetcher: FakeFetcher) -> Describer<FakeFetcher> {
        Describer::new(Arc::new(SourceRegistry::standard()), Arc::new(RecordCache::new(fetcher)))
    }

    #[tokio::test]
    async fn test_failed_record_uses_empty_record() {
        let describer = describer(FakeFetcher::default());
        let features = vec![test_feature("tracts", 1, json!({"GEOID": "36001000100", "svi_rank": 0.8}))];

        let description = describer.describe("tracts", &features).await.unwrap();
        assert_eq!(description.items.len(), 1);
        assert_eq!(description.items[0][0], DetailLine::field("Population", "unavailable".to_string()));
        assert_eq!(description.items[0][4], DetailLine::field("SVI Rank", "0.80".to_string()));
    }

    #[tokio::test]
    async fn test_one_lookup_per_id() {
        let fetcher = FakeFetcher::default().with("public_schools", "360007", json!({"NAME": "Lincoln Elementary"}));
        let describer = describer(fetcher);
        let features = vec![
            test_feature("public_schools", 1, json!({"NCESID": "360007"})),
            test_feature("public_schools", 2, json!({"NCESID": "360007"})),
            test_feature("public_schools", 3, json!({})),
        ];

        let description = describer.describe("public_schools", &features).await.unwrap();
        assert_eq!(describer.cache.stats().fetches, 1);
        assert_eq!(description.items[0][0], DetailLine::Heading("Lincoln Elementary".to_string()));
        assert_eq!(description.items[1][0], DetailLine::Heading("Lincoln Elementary".to_string()));
        assert_eq!(description.items[2][0], DetailLine::Heading("unavailable".to_string()));
    }

    #[tokio::test]
    async fn test_source_without_id_key_skips_cache() {
        let describer = describer(FakeFetcher::default());
        let features = vec![test_feature("con_districts", 9, json!({"GEOID": "3620"}))];
        let description = describer.describe("con_districts", &features).await.unwrap();
        assert_eq!(description.items, vec![vec![DetailLine::Text("New York 20".to_string())]]);
        assert!(!description.enriched);
        assert_eq!(describer.cache.stats().fetches, 0);
        assert!(describer.describe("basemap", &features).await.is_none());
    }

    #[tokio::test]
    async fn test_composite_layout_order() {
        let describer = describer(FakeFetcher::default());
        let mut grouped = GroupedFeatures::new();
        grouped.insert("public_schools".into(), vec![test_feature("public_schools", 1, json!({"NCESID": "1"}))]);
        grouped.insert("school_districts".into(), vec![test_feature("school_districts", 2, json!({"GEOID": "2"}))]);
        grouped.insert("tracts".into(), vec![test_feature("tracts", 3, json!({"GEOID": "3"}))]);
        grouped.insert("con_districts".into(), vec![test_feature("con_districts", 4, json!({"GEOID": "3601"}))]);

        let composite = describer.describe_all(&grouped).await;
        assert_eq!(
            composite.sources(),
            vec!["con_districts", "tracts", "school_districts", "public_schools"]
        );

        let html = composite.to_html();
        let pos = |s: &str| html.find(&format!("<h3>{}</h3>", s)).unwrap();
        assert!(pos("con_districts") < pos("tracts"));
        assert!(pos("tracts") < pos("school_districts"));
        assert!(pos("school_districts") < pos("public_schools"));
    }

    #[test]
    fn test_html_fragments() {
        let description = SourceDescription {
            source: "tracts".to_string(),
            placement: Placement::Primary,
            enriched: true,
            items: vec![vec![
                DetailLine::compared("SVI", "0.40".to_string(), Some(PctDiff::new(-0.1, true))),
                DetailLine::Flag("Eligible for free retrofits".to_string()),
            ]],
        };
        assert_eq!(
            description.to_html(),
            "<h3>tracts</h3><div class=\"items\"><div><div>SVI: 0.40 <span class=\"good\">-10.00%</span>*</div>\
             <div class=\"good flag\">Eligible for free retrofits</div></div></div>"
        );
        assert_eq!(Composite::default().to_html(), "<div><div></div><div></div></div>");
        assert_eq!(escape("<b>&"), "&lt;b&gt;&amp;");
    }

    #[test]
    fn test_plain_text() {
        let composite = Composite {
            sections: vec![SourceDescription {
                source: "public_schools".to_string(),
                placement: Placement::Tertiary,
                enriched: true,
                items: vec![
                    vec![DetailLine::Heading("Lincoln Elementary".to_string())],
                    vec![
                        DetailLine::Heading("Roosevelt High".to_string()),
                        DetailLine::compared("Enrollment", "812".to_string(), Some(PctDiff::new(0.125, false))),
                    ],
                ],
            }],
        };
        assert_eq!(
            composite.to_string(),
            "[public_schools]\n  Lincoln Elementary\n  ---\n  Roosevelt High\n  Enrollment: 812 +12.50%*\n"
        );
    }
}
