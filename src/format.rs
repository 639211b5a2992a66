//! Formatting of record values for the details panel

use serde_json::Value;

pub const UNAVAILABLE: &str = "unavailable";

fn as_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64).filter(|f| f.is_finite())
}

/// Plain rendering of a JSON value: integers without a decimal point, strings
/// unquoted, missing and null values as "unavailable".
pub fn plain(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => UNAVAILABLE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| f.to_string()).unwrap_or_default(),
        },
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Two decimal places; zero, null and missing are "unavailable".
pub fn num(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => match as_f64(v) {
            Some(f) if f != 0.0 => format!("{:.2}", f),
            _ => UNAVAILABLE.to_string(),
        },
    }
}

/// Fraction as a percentage with one decimal, e.g. 0.1234 -> "12.3%"
pub fn percent(v: Option<&Value>) -> String {
    match as_f64(v) {
        Some(f) => format!("{:.1}%", f * 100.0),
        None => UNAVAILABLE.to_string(),
    }
}

/// US dollars with thousands separators, e.g. "$12,345.67"
pub fn currency(v: Option<&Value>) -> String {
    let Some(f) = as_f64(v) else {
        return UNAVAILABLE.to_string();
    };
    let cents = (f.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if f < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// Whether a change reads as good or bad for the metric
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Good,
    Bad,
    Neutral,
}

impl Tone {
    pub fn css_class(&self) -> &'static str {
        match self {
            Tone::Good => "good",
            Tone::Bad => "bad",
            Tone::Neutral => "neutral",
        }
    }
}

/// Relative difference from the dataset median
#[derive(Clone, Debug, PartialEq)]
pub struct PctDiff {
    pub fraction: f64,
    pub tone: Tone,
}

impl PctDiff {
    /// `reverse` marks metrics where lower is better.
    pub fn new(fraction: f64, reverse: bool) -> Self {
        let tone = if fraction < 0.0 {
            if reverse { Tone::Good } else { Tone::Bad }
        } else if fraction > 0.0 {
            if reverse { Tone::Bad } else { Tone::Good }
        } else {
            Tone::Neutral
        };
        Self { fraction, tone }
    }

    /// Signed percentage, e.g. "+12.50%" or "-3.00%"
    pub fn label(&self) -> String {
        // -0.0 + 0.0 is +0.0, so a negative zero never prints as "-0.00"
        let pct = self.fraction * 100.0 + 0.0;
        format!("{:+.2}%", pct)
    }
}

/// Delta for a record field; missing or null values have none.
pub fn pct_diff(v: Option<&Value>, reverse: bool) -> Option<PctDiff> {
    as_f64(v).map(|f| PctDiff::new(f, reverse))
}

/// Value rendering for a CSV cell: null becomes an empty cell.
pub fn csv_cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        other => plain(Some(other)),
    }
}
