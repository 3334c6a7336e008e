//! Deferred color selection: a `PaletteRef` describes *how* to pick a color
//! from whichever palette is active, resolved at scheduler time rather than
//! pattern-definition time so palettes can be swapped without touching
//! pattern bodies.

use crate::color::{interpolate_hsv, resolve_color, Hsv};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Shuffle seed fixed across the process so `RandomHold`/`CycleHold`/
/// `RandomBlend` produce the same sequence every run.
const SHUFFLE_SEED: u64 = 42;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaletteSelectionMode {
    Index,
    Random,
    Cycle,
    RandomHold,
    RandomBlend,
    CycleHold,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaletteRef {
    pub mode: PaletteSelectionMode,
    pub index: usize,
    pub hold_beats: f64,
    pub blend_beats: f64,
}

fn shuffled_indices(len: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = fastrand::Rng::with_seed(SHUFFLE_SEED);
    rng.shuffle(&mut indices);
    indices
}

impl PaletteRef {
    pub fn index(index: usize) -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::Index,
            index,
            hold_beats: 1.0,
            blend_beats: 0.0,
        }
    }

    pub fn random() -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::Random,
            index: 0,
            hold_beats: 1.0,
            blend_beats: 0.0,
        }
    }

    pub fn cycle() -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::Cycle,
            index: 0,
            hold_beats: 1.0,
            blend_beats: 0.0,
        }
    }

    pub fn random_hold(beats: f64) -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::RandomHold,
            index: 0,
            hold_beats: beats,
            blend_beats: 0.0,
        }
    }

    pub fn cycle_hold(beats: f64) -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::CycleHold,
            index: 0,
            hold_beats: beats,
            blend_beats: 0.0,
        }
    }

    pub fn random_blend(period: f64, fade: f64) -> Self {
        PaletteRef {
            mode: PaletteSelectionMode::RandomBlend,
            index: 0,
            hold_beats: period,
            blend_beats: fade.min(period),
        }
    }

    /// Resolves this reference against `palette`.
    ///
    /// `cycle_position` is the current position in cycles (bars); 1 cycle =
    /// 4 beats. `event_index` feeds `Cycle` mode and seeds `Random` when no
    /// `cycle_position` is available.
    pub fn resolve(&self, palette: &Palette, event_index: usize, cycle_position: Option<f64>) -> Hsv {
        match self.mode {
            PaletteSelectionMode::Index => palette.get(self.index),

            PaletteSelectionMode::Random => {
                let seed = match cycle_position {
                    Some(pos) => (pos * 10000.0) as i64 + event_index as i64,
                    None => event_index as i64,
                };
                let mut rng = fastrand::Rng::with_seed(seed as u64);
                let idx = rng.usize(0..palette.colors.len());
                palette.get(idx)
            }

            PaletteSelectionMode::Cycle => palette.get(event_index),

            PaletteSelectionMode::RandomHold => {
                let Some(pos) = cycle_position else {
                    let mut rng = fastrand::Rng::with_seed(event_index as u64);
                    return palette.get(rng.usize(0..palette.colors.len()));
                };
                let pos_beats = pos * 4.0;
                let quantized = (pos_beats / self.hold_beats).floor() as i64;
                let indices = shuffled_indices(palette.colors.len());
                let shuffled_index = indices[quantized.rem_euclid(indices.len() as i64) as usize];
                palette.get(shuffled_index)
            }

            PaletteSelectionMode::CycleHold => {
                let Some(pos) = cycle_position else {
                    return palette.get(event_index);
                };
                let pos_beats = pos * 4.0;
                let quantized = (pos_beats / self.hold_beats).floor() as i64;
                palette.get(quantized.rem_euclid(palette.colors.len() as i64) as usize)
            }

            PaletteSelectionMode::RandomBlend => {
                let Some(pos) = cycle_position else {
                    let mut rng = fastrand::Rng::with_seed(event_index as u64);
                    return palette.get(rng.usize(0..palette.colors.len()));
                };
                let pos_beats = pos * 4.0;
                let period = self.hold_beats;
                let fade = self.blend_beats;
                let period_index = (pos_beats / period).floor() as i64;
                let pos_in_period = pos_beats.rem_euclid(period);

                let indices = shuffled_indices(palette.colors.len());
                let len = indices.len() as i64;
                let from_idx = indices[period_index.rem_euclid(len) as usize];
                let to_idx = indices[(period_index + 1).rem_euclid(len) as usize];

                let hold_duration = period - fade;
                if pos_in_period < hold_duration || fade <= 0.0 {
                    palette.get(from_idx)
                } else {
                    let fade_progress = (pos_in_period - hold_duration) / fade;
                    interpolate_hsv(palette.get(from_idx), palette.get(to_idx), fade_progress)
                }
            }
        }
    }
}

/// An immutable, non-empty set of colors, indexable with wraparound.
#[derive(Clone, Debug)]
pub struct Palette {
    pub name: String,
    pub colors: Vec<Hsv>,
}

impl Palette {
    pub fn new(name: impl Into<String>, colors: Vec<Hsv>) -> Self {
        assert!(!colors.is_empty(), "palette must have at least one color");
        Palette {
            name: name.into(),
            colors,
        }
    }

    pub fn from_names(name: impl Into<String>, color_specs: &[&str]) -> Result<Self, crate::color::ColorParseError> {
        let colors = color_specs
            .iter()
            .map(|spec| resolve_color(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Palette::new(name, colors))
    }

    pub fn get(&self, index: usize) -> Hsv {
        self.colors[index % self.colors.len()]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Palette>>> = Lazy::new(|| RwLock::new(builtin_palettes()));

pub fn register_palette(palette: Palette) {
    REGISTRY.write().insert(palette.name.clone(), palette);
}

pub fn get_palette(name: &str) -> Option<Palette> {
    REGISTRY.read().get(name).cloned()
}

pub fn list_palettes() -> Vec<String> {
    REGISTRY.read().keys().cloned().collect()
}

macro_rules! builtin {
    ($map:expr, $name:expr, [$($hex:expr),+ $(,)?]) => {
        $map.insert(
            $name.to_string(),
            Palette::from_names($name, &[$($hex),+]).expect("built-in palette hex codes are valid"),
        );
    };
}

fn builtin_palettes() -> HashMap<String, Palette> {
    let mut map = HashMap::new();

    builtin!(map, "white_tones", ["#FFFFFF", "#FFE4C4", "#E0FFFF"]);
    builtin!(map, "red_tones", ["#FF0000", "#CC0000", "#FF4444", "#FF6B6B"]);
    builtin!(map, "orange_tones", ["#FF8000", "#FF6600", "#FFA500", "#FFAA33"]);
    builtin!(map, "blue_tones", ["#0066FF", "#0044CC", "#00BFFF", "#4169E1"]);
    builtin!(map, "purple_tones", ["#8B00FF", "#9400D3", "#BA55D3", "#DA70D6"]);
    builtin!(map, "green_tones", ["#00FF00", "#32CD32", "#00FA9A", "#7CFC00"]);
    builtin!(map, "pink_tones", ["#FF1493", "#FF69B4", "#FFB6C1", "#FF00FF"]);

    builtin!(map, "fire", ["#FF0000", "#FF4500", "#FF8C00", "#FFD700"]);
    builtin!(map, "sunset", ["#FF00FF", "#FF4500", "#9400D3", "#FF69B4"]);
    builtin!(map, "warm", ["#FF0000", "#FF8000", "#FFBF00", "#FFFF00"]);
    builtin!(map, "golden", ["#FFD700", "#FFA500", "#FF8C00", "#FF6347"]);

    builtin!(map, "ice", ["#00FFFF", "#0066FF", "#FFFFFF", "#E0FFFF"]);
    builtin!(map, "ocean", ["#0066FF", "#00FFFF", "#008080", "#00FF7F"]);
    builtin!(map, "cool", ["#0066FF", "#00FFFF", "#008080", "#8B00FF"]);

    builtin!(map, "neon", ["#FF1493", "#00FFFF", "#00FF00", "#8B00FF"]);
    builtin!(map, "club", ["#FF00FF", "#00FFFF", "#FFFFFF"]);
    builtin!(map, "rave", ["#FF1493", "#00FF00", "#00FFFF", "#8B00FF", "#FFFF00"]);
    builtin!(map, "synthwave", ["#FF00FF", "#00FFFF", "#FF006E", "#8338EC"]);
    builtin!(map, "vaporwave", ["#FF6B9D", "#C44569", "#6C5CE7", "#00CEC9"]);
    builtin!(map, "miami", ["#F72585", "#7209B7", "#3A0CA3", "#4CC9F0"]);

    builtin!(
        map,
        "rainbow",
        [
            "#FF0000", "#FF8000", "#FFFF00", "#00FF00", "#00FFFF", "#0000FF", "#8B00FF", "#FF00FF"
        ]
    );

    builtin!(map, "red_cyan", ["#FF0000", "#00FFFF"]);
    builtin!(map, "orange_blue", ["#FF8000", "#0066FF"]);
    builtin!(map, "purple_lime", ["#8B00FF", "#00FF00"]);
    builtin!(map, "pink_teal", ["#FF1493", "#008080"]);

    builtin!(map, "flash_red", ["#FFFFFF", "#FF0000"]);
    builtin!(map, "flash_cyan", ["#FFFFFF", "#00FFFF"]);
    builtin!(map, "flash_orange", ["#FFFFFF", "#FF8000"]);
    builtin!(map, "flash_blue", ["#FFFFFF", "#0066FF"]);
    builtin!(map, "flash_purple", ["#FFFFFF", "#8B00FF"]);
    builtin!(map, "flash_pink", ["#FFFFFF", "#FF1493"]);

    builtin!(map, "forest_adventure", ["#E7FF53", "#98FB50", "#8BFB8F", "#61CDFB", "#3982F5"]);
    builtin!(map, "fairfax", ["#67DFFA", "#92D6FB", "#F09896", "#EC5D57", "#E93330"]);
    builtin!(map, "warm_embrace", ["#ED7165", "#ED7159", "#EE8254", "#F0935A", "#F2A85F"]);
    builtin!(map, "ruby_glow", ["#F6C5CB", "#F2ACB6", "#F094A3", "#ED7E91", "#EB657E"]);

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        assert!(get_palette("fire").is_some());
        assert!(get_palette("not_a_real_palette").is_none());
        assert!(list_palettes().len() >= 28);
    }

    #[test]
    fn index_mode_wraps() {
        let p = Palette::new("p", vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.5, 1.0, 1.0)]);
        let r = PaletteRef::index(2);
        assert_eq!(r.resolve(&p, 0, None), p.get(0));
    }

    #[test]
    fn cycle_mode_uses_event_index() {
        let p = Palette::new("p", vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.5, 1.0, 1.0)]);
        let r = PaletteRef::cycle();
        assert_eq!(r.resolve(&p, 1, None), p.get(1));
    }

    #[test]
    fn random_mode_is_deterministic_for_same_inputs() {
        let p = Palette::new(
            "p",
            vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.3, 1.0, 1.0), Hsv::new(0.6, 1.0, 1.0)],
        );
        let r = PaletteRef::random();
        let a = r.resolve(&p, 3, Some(0.25));
        let b = r.resolve(&p, 3, Some(0.25));
        assert_eq!(a, b);
    }

    #[test]
    fn random_hold_holds_within_a_window_and_changes_across_windows() {
        let p = Palette::new(
            "p",
            vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.3, 1.0, 1.0), Hsv::new(0.6, 1.0, 1.0)],
        );
        let r = PaletteRef::random_hold(1.0);
        // within beat 0 (cycle_position in [0, 0.25)) color should be constant
        let a = r.resolve(&p, 0, Some(0.0));
        let b = r.resolve(&p, 0, Some(0.2));
        assert_eq!(a, b);
    }

    #[test]
    fn cycle_hold_advances_sequentially() {
        let p = Palette::new(
            "p",
            vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.3, 1.0, 1.0), Hsv::new(0.6, 1.0, 1.0)],
        );
        let r = PaletteRef::cycle_hold(1.0);
        assert_eq!(r.resolve(&p, 0, Some(0.0)), p.get(0));
        assert_eq!(r.resolve(&p, 0, Some(0.25)), p.get(1));
        assert_eq!(r.resolve(&p, 0, Some(0.5)), p.get(2));
    }

    #[test]
    fn random_blend_fades_within_fade_window() {
        let p = Palette::new("p", vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.5, 1.0, 1.0)]);
        let r = PaletteRef::random_blend(4.0, 1.0);
        // fully within hold phase
        let held = r.resolve(&p, 0, Some(0.0));
        assert!(p.colors.contains(&held));
    }
}
