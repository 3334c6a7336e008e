//! HSV color primitives, named/hex resolution, gamma-corrected RGB16 output.

use crate::config::GAMMA;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Hue/saturation/value triple in `[0,1]`. Hue wraps; saturation and value
/// clamp, on construction and on every `with_*` setter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub hue: f64,
    pub saturation: f64,
    pub value: f64,
}

impl Hsv {
    pub fn new(hue: f64, saturation: f64, value: f64) -> Self {
        Hsv {
            hue: hue.rem_euclid(1.0),
            saturation: saturation.clamp(0.0, 1.0),
            value: value.clamp(0.0, 1.0),
        }
    }

    pub fn with_hue(&self, hue: f64) -> Self {
        Hsv::new(hue, self.saturation, self.value)
    }

    pub fn with_saturation(&self, saturation: f64) -> Self {
        Hsv::new(self.hue, saturation, self.value)
    }

    pub fn with_value(&self, value: f64) -> Self {
        Hsv::new(self.hue, self.saturation, value)
    }

    pub fn to_rgb(&self) -> (f64, f64, f64) {
        hsv_to_rgb(self.hue, self.saturation, self.value)
    }

    pub fn to_hex(&self) -> String {
        let (r, g, b) = self.to_rgb();
        format!(
            "#{:02X}{:02X}{:02X}",
            (r * 255.0) as u32,
            (g * 255.0) as u32,
            (b * 255.0) as u32
        )
    }
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h = h.rem_euclid(1.0) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max == 0.0 { 0.0 } else { delta / max };
    if delta == 0.0 {
        return (0.0, s, v);
    }
    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    ((h / 6.0).rem_euclid(1.0), s, v)
}

#[derive(Debug)]
pub struct ColorParseError(pub String);

impl fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid color: {}", self.0)
    }
}

impl Error for ColorParseError {}

pub fn hex_to_hsv(hex: &str) -> Result<Hsv, ColorParseError> {
    let stripped = hex.trim_start_matches('#');
    let expanded = if stripped.len() == 3 {
        stripped.chars().flat_map(|c| [c, c]).collect::<String>()
    } else {
        stripped.to_string()
    };
    if expanded.len() != 6 {
        return Err(ColorParseError(hex.to_string()));
    }
    let parse_channel = |s: &str| -> Result<f64, ColorParseError> {
        u8::from_str_radix(s, 16)
            .map(|v| v as f64 / 255.0)
            .map_err(|_| ColorParseError(hex.to_string()))
    };
    let r = parse_channel(&expanded[0..2])?;
    let g = parse_channel(&expanded[2..4])?;
    let b = parse_channel(&expanded[4..6])?;
    let (h, s, v) = rgb_to_hsv(r, g, b);
    Ok(Hsv::new(h, s, v))
}

static NAMED_COLORS: Lazy<HashMap<&'static str, Hsv>> = Lazy::new(|| {
    HashMap::from([
        ("red", Hsv::new(0.0, 1.0, 1.0)),
        ("orange", Hsv::new(0.08, 1.0, 1.0)),
        ("yellow", Hsv::new(0.16, 1.0, 1.0)),
        ("green", Hsv::new(0.33, 1.0, 1.0)),
        ("cyan", Hsv::new(0.5, 1.0, 1.0)),
        ("blue", Hsv::new(0.6, 1.0, 1.0)),
        ("purple", Hsv::new(0.75, 1.0, 1.0)),
        ("magenta", Hsv::new(0.83, 1.0, 1.0)),
        ("pink", Hsv::new(0.9, 0.6, 1.0)),
        ("white", Hsv::new(0.0, 0.0, 1.0)),
        ("warm_white", Hsv::new(0.08, 0.2, 1.0)),
        ("cool_white", Hsv::new(0.55, 0.1, 1.0)),
        ("dim_red", Hsv::new(0.0, 1.0, 0.5)),
        ("dim_blue", Hsv::new(0.6, 1.0, 0.5)),
        ("dim_white", Hsv::new(0.0, 0.0, 0.5)),
        ("amber", Hsv::new(0.1, 1.0, 1.0)),
        ("lime", Hsv::new(0.25, 1.0, 1.0)),
        ("teal", Hsv::new(0.45, 1.0, 1.0)),
        ("violet", Hsv::new(0.7, 1.0, 1.0)),
        ("hot_pink", Hsv::new(0.92, 1.0, 1.0)),
    ])
});

/// Resolves a color spelled as a name (`"red"`) or a hex string
/// (`"#FF6B00"` / `"#F60"`), case-insensitively.
pub fn resolve_color(spec: &str) -> Result<Hsv, ColorParseError> {
    let trimmed = spec.trim();
    if trimmed.starts_with('#') {
        hex_to_hsv(trimmed)
    } else {
        NAMED_COLORS
            .get(trimmed.to_lowercase().as_str())
            .copied()
            .ok_or_else(|| ColorParseError(spec.to_string()))
    }
}

/// Shorter-hue-arc HSV interpolation, used by `RandomBlend` palette refs and
/// envelope flash→fade color transitions.
pub fn interpolate_hsv(c1: Hsv, c2: Hsv, t: f64) -> Hsv {
    let t = t.clamp(0.0, 1.0);
    let (mut h1, mut h2) = (c1.hue, c2.hue);
    if (h2 - h1).abs() > 0.5 {
        if h1 < h2 {
            h1 += 1.0;
        } else {
            h2 += 1.0;
        }
    }
    let hue = (h1 + (h2 - h1) * t).rem_euclid(1.0);
    let saturation = c1.saturation + (c2.saturation - c1.saturation) * t;
    let value = c1.value + (c2.value - c1.value) * t;
    Hsv::new(hue, saturation, value)
}

/// One rendered fixture color: linear RGB in `[0,1]` plus a scalar
/// intensity already folded into `value` by the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub fn black() -> Self {
        Rgb { r: 0.0, g: 0.0, b: 0.0 }
    }

    pub fn white() -> Self {
        Rgb { r: 1.0, g: 1.0, b: 1.0 }
    }

    pub fn from_hsv(hue: f64, saturation: f64, value: f64) -> Self {
        let (r, g, b) = hsv_to_rgb(hue.rem_euclid(1.0), saturation.clamp(0.0, 1.0), value.clamp(0.0, 1.0));
        Rgb { r, g, b }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Rgb {
            r: self.r * factor,
            g: self.g * factor,
            b: self.b * factor,
        }
    }

    /// `channel16 = round(clamp(value, 0, 1)^gamma * 65535)`.
    pub fn to_rgb16(&self) -> (u16, u16, u16) {
        let channel = |v: f64| -> u16 {
            let clamped = v.clamp(0.0, 1.0);
            (clamped.powf(GAMMA) * 65535.0).round() as u16
        };
        (channel(self.r), channel(self.g), channel(self.b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hue_wraps() {
        let c = Hsv::new(1.5, 1.0, 1.0);
        assert!((c.hue - 0.5).abs() < 1e-9);
    }

    #[test]
    fn saturation_and_value_clamp() {
        let c = Hsv::new(0.0, 2.0, -1.0);
        assert_eq!(c.saturation, 1.0);
        assert_eq!(c.value, 0.0);
    }

    #[test]
    fn hex_round_trips_through_rgb() {
        let c = hex_to_hsv("#FF0000").unwrap();
        assert!((c.hue - 0.0).abs() < 1e-6);
        assert!((c.saturation - 1.0).abs() < 1e-6);
        assert!((c.value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn shorthand_hex_expands() {
        let a = hex_to_hsv("#F00").unwrap();
        let b = hex_to_hsv("#FF0000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn named_color_lookup_is_case_insensitive() {
        assert_eq!(resolve_color("RED").unwrap(), resolve_color("red").unwrap());
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(resolve_color("not-a-color").is_err());
    }

    #[test]
    fn interpolate_takes_shorter_arc() {
        // red (hue 0.0) to a color just below full wrap (hue 0.9) should move
        // *down* through 0.0, not up through 0.5.
        let a = Hsv::new(0.0, 1.0, 1.0);
        let b = Hsv::new(0.9, 1.0, 1.0);
        let mid = interpolate_hsv(a, b, 0.5);
        assert!(mid.hue > 0.9 || mid.hue < 0.1);
    }

    #[test]
    fn gamma_correction_maps_full_white_to_max() {
        let (r, g, b) = Rgb::white().to_rgb16();
        assert_eq!((r, g, b), (65535, 65535, 65535));
    }

    #[test]
    fn gamma_correction_maps_black_to_zero() {
        let (r, g, b) = Rgb::black().to_rgb16();
        assert_eq!((r, g, b), (0, 0, 0));
    }
}
