//! Source configuration: which layers exist, how their features are keyed
//! into auxiliary records, and how each is described.

use crate::describe::DetailLine;
use crate::features::Properties;
use crate::fips;
use crate::format::{currency, num, pct_diff, percent, plain};
use crate::records::Record;

/// Vector tile layer name shared by every source
pub const SOURCE_LAYER: &str = "data";

/// Feature properties + auxiliary record -> detail lines
pub type DescribeFn = fn(&Properties, &Record) -> Vec<DetailLine>;

/// Column of the details panel a source is placed in
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Placement {
    Primary,
    Secondary,
    Tertiary,
}

/// Describe capability of one source
#[derive(Clone)]
pub struct SourceSpec {
    pub key: String,
    /// Property used to look up the auxiliary record; `None` if the source has none
    pub id_key: Option<String>,
    pub placement: Placement,
    pub describe: DescribeFn,
}

impl SourceSpec {
    pub fn new(key: &str, id_key: Option<&str>, placement: Placement, describe: DescribeFn) -> Self {
        Self {
            key: key.to_string(),
            id_key: id_key.map(str::to_string),
            placement,
            describe,
        }
    }
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSpec")
            .field("key", &self.key)
            .field("id_key", &self.id_key)
            .field("placement", &self.placement)
            .finish()
    }
}

/// Source specs in layout order, built once at startup
#[derive(Clone, Debug)]
pub struct SourceRegistry {
    specs: Vec<SourceSpec>,
}

impl SourceRegistry {
    pub fn new(specs: Vec<SourceSpec>) -> Self {
        Self { specs }
    }

    /// The four census/school sources of the explorer
    pub fn standard() -> Self {
        Self::new(vec![
            SourceSpec::new("con_districts", None, Placement::Primary, describe_con_district),
            SourceSpec::new("tracts", Some("GEOID"), Placement::Primary, describe_tract),
            SourceSpec::new("school_districts", Some("GEOID"), Placement::Secondary, describe_school_district),
            SourceSpec::new("public_schools", Some("NCESID"), Placement::Tertiary, describe_public_school),
        ])
    }

    pub fn get(&self, key: &str) -> Option<&SourceSpec> {
        self.specs.iter().find(|s| s.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSpec> {
        self.specs.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.key.as_str())
    }

    /// Sort key for composite layout: placement column, then registry order
    pub fn layout_rank(&self, key: &str) -> Option<(Placement, usize)> {
        self.specs
            .iter()
            .position(|s| s.key == key)
            .map(|i| (self.specs[i].placement, i))
    }
}

fn describe_tract(props: &Properties, data: &Record) -> Vec<DetailLine> {
    let mut lines = vec![
        DetailLine::field("Population", plain(data.get("pop"))),
        DetailLine::compared(
            "Air toxics cancer risk",
            num(data.get("cancer_risk")),
            pct_diff(data.get("cancer_risk__pct_diff"), true),
        ),
        DetailLine::compared(
            "Respiratory hazard index",
            num(data.get("resp_hazard_idx")),
            pct_diff(data.get("resp_hazard_idx__pct_diff"), true),
        ),
        DetailLine::compared("SVI", num(data.get("svi")), pct_diff(data.get("svi__pct_diff"), true)),
        DetailLine::field("SVI Rank", num(props.get("svi_rank"))),
    ];
    let rank = props.get("svi_rank").and_then(|v| v.as_f64()).unwrap_or(0.0);
    if rank > 2.0 / 3.0 {
        lines.push(DetailLine::Flag("Eligible for free retrofits".to_string()));
    }
    lines
}

fn describe_public_school(_props: &Properties, data: &Record) -> Vec<DetailLine> {
    vec![
        DetailLine::Heading(plain(data.get("NAME"))),
        DetailLine::field(
            "Grades",
            format!("{}-{}", plain(data.get("ST_GRADE")), plain(data.get("END_GRADE"))),
        ),
        DetailLine::field("Enrollment", plain(data.get("ENROLLMENT"))),
        DetailLine::field("F/T Teachers", plain(data.get("FT_TEACHER"))),
    ]
}

fn describe_con_district(props: &Properties, _data: &Record) -> Vec<DetailLine> {
    let geoid = props.get("GEOID").map(|v| plain(Some(v))).unwrap_or_default();
    let text = match fips::split_district_geoid(&geoid) {
        Some((state, district)) => {
            format!("{} {}", fips::state_name(state).unwrap_or(state), district)
        }
        None => format!("District {}", geoid),
    };
    vec![DetailLine::Text(text)]
}

fn describe_school_district(_props: &Properties, data: &Record) -> Vec<DetailLine> {
    vec![
        DetailLine::Heading(plain(data.get("NAME"))),
        DetailLine::compared(
            "5-17yo poverty rate",
            percent(data.get("pov")),
            pct_diff(data.get("pov__pct_diff"), true),
        ),
        DetailLine::field("Enrollment", plain(data.get("enroll"))),
        DetailLine::compared(
            "Spending/Pupil",
            currency(data.get("ppcstot")),
            pct_diff(data.get("ppcstot__pct_diff"), false),
        ),
        DetailLine::field("Req. Spending/Pupil", currency(data.get("predcost"))),
        DetailLine::compared(
            "Funding Gap",
            currency(data.get("fundinggap")),
            pct_diff(data.get("fundinggap__pct_diff"), false),
        ),
        DetailLine::compared(
            "Outcome Gap",
            num(data.get("outcomegap")),
            pct_diff(data.get("outcomegap__pct_diff"), false),
        ),
        DetailLine::field("%Black", percent(data.get("black"))),
        DetailLine::field("%Hispanic", percent(data.get("hisp"))),
        DetailLine::field("%English Language Learners", percent(data.get("ell"))),
        DetailLine::field("%Special Ed", percent(data.get("iep"))),
    ]
}
