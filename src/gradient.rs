//! Colour gradients for data-driven fills
//!
//! Turns a stop-keyed gradient (stop in 0..1 -> hex colour) into the flat
//! `[position, value, position, value, ...]` list consumed by a linear
//! `interpolate` expression. Optionally splits colours into one normalised RGB
//! channel so the list can be evaluated numerically.

use serde::Serialize;
use thiserror::Error;

/// One element of a flattened stop list
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StyleValue {
    Number(f64),
    Color(String),
}

impl StyleValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            StyleValue::Number(n) => Some(*n),
            StyleValue::Color(_) => None,
        }
    }
}

/// RGB channel selector for channel-decomposed gradients
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Red, Channel::Green, Channel::Blue];

    fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorError {
    #[error("invalid hex colour {0:?}, expected #rrggbb")]
    InvalidHex(String),
}

/// Parse `#rrggbb` into normalised (0..1) red, green, blue.
pub fn hex_to_rgb(hex: &str) -> Result<[f64; 3], ColorError> {
    let invalid = || ColorError::InvalidHex(hex.to_string());
    let digits = hex.strip_prefix('#').ok_or_else(invalid)?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let h = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
    Ok([
        ((h >> 16) & 255) as f64 / 255.0,
        ((h >> 8) & 255) as f64 / 255.0,
        (h & 255) as f64 / 255.0,
    ])
}

/// Position of a fractional stop within `range`.
pub fn stop_to_value(stop: f64, range: (f64, f64)) -> f64 {
    range.0 + (range.1 - range.0) * stop
}

/// Flatten a gradient into `[position, colour-or-channel, ...]`.
///
/// Stops are emitted in ascending numeric order whatever order they are given
/// in; the interpolation expression is undefined on non-monotonic input.
pub fn gradient_to_style<S: AsRef<str>>(
    gradient: &[(f64, S)],
    range: (f64, f64),
    channel: Option<Channel>,
) -> Result<Vec<StyleValue>, ColorError> {
    let mut stops: Vec<(f64, &str)> = gradient.iter().map(|(s, c)| (*s, c.as_ref())).collect();
    stops.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut style = Vec::with_capacity(stops.len() * 2);
    for (stop, color) in stops {
        style.push(StyleValue::Number(stop_to_value(stop, range)));
        match channel {
            Some(ch) => style.push(StyleValue::Number(hex_to_rgb(color)?[ch.index()])),
            None => style.push(StyleValue::Color(color.to_string())),
        }
    }
    Ok(style)
}

/// Evaluate a numeric flat stop list linearly at `input`.
///
/// Inputs outside the first/last stop clamp to the end values. Returns `None`
/// for an empty list or one that carries colour strings.
pub fn interpolate(style: &[StyleValue], input: f64) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = style
        .chunks_exact(2)
        .map(|pair| Some((pair[0].as_number()?, pair[1].as_number()?)))
        .collect::<Option<_>>()?;
    let (first, last) = (pairs.first()?, pairs.last()?);

    if input <= first.0 {
        return Some(first.1);
    }
    if input >= last.0 {
        return Some(last.1);
    }
    for window in pairs.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if input >= x0 && input <= x1 {
            if x1 == x0 {
                return Some(y1);
            }
            let t = (input - x0) / (x1 - x0);
            return Some(y0 + (y1 - y0) * t);
        }
    }
    Some(last.1)
}

/// A gradient keyed on a feature property, pre-split into RGB channels
#[derive(Clone, Debug)]
pub struct ColorRamp {
    pub property: String,
    stops: Vec<(f64, String)>,
    range: (f64, f64),
    channels: [Vec<StyleValue>; 3],
}

impl ColorRamp {
    pub fn new<S: AsRef<str>>(
        property: &str,
        gradient: &[(f64, S)],
        range: (f64, f64),
    ) -> Result<Self, ColorError> {
        let [r, g, b] = Channel::ALL;
        Ok(Self {
            property: property.to_string(),
            stops: gradient.iter().map(|(s, c)| (*s, c.as_ref().to_string())).collect(),
            range,
            channels: [
                gradient_to_style(gradient, range, Some(r))?,
                gradient_to_style(gradient, range, Some(g))?,
                gradient_to_style(gradient, range, Some(b))?,
            ],
        })
    }

    /// Colour stop list for an `interpolate` expression
    pub fn style(&self) -> Vec<StyleValue> {
        // Colour mode never parses the hex strings
        gradient_to_style(&self.stops, self.range, None).unwrap_or_default()
    }

    /// 8-bit RGB colour for a property value
    pub fn sample(&self, value: f64) -> Option<(u8, u8, u8)> {
        let to_byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Some((
            to_byte(interpolate(&self.channels[0], value)?),
            to_byte(interpolate(&self.channels[1], value)?),
            to_byte(interpolate(&self.channels[2], value)?),
        ))
    }
}
