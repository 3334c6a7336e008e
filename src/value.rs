//! Core pattern data: colors carried by events, the events themselves, and
//! the runtime context patterns query group/zone names against.

use crate::color::{interpolate_hsv, Hsv};
use crate::modulator::Modulator;
use crate::palette::PaletteRef;
use crate::time::{Fraction, TimeSpan};
use std::collections::HashMap;

/// The light-facing payload of a single pattern event: which fixture(s),
/// what color (literal or deferred), and how intensity evolves over the
/// event's lifetime.
#[derive(Clone, Debug)]
pub struct LightValue {
    pub light_id: Option<i64>,
    pub group: Option<String>,
    pub color: Option<Hsv>,
    pub color_ref: Option<PaletteRef>,
    pub intensity: f64,
    pub envelope: Option<Envelope>,
    pub modulator: Option<Modulator>,
}

impl LightValue {
    pub fn for_light(light_id: i64) -> Self {
        LightValue {
            light_id: Some(light_id),
            intensity: 1.0,
            ..Default::default()
        }
    }

    pub fn for_group(group: impl Into<String>) -> Self {
        LightValue {
            group: Some(group.into()),
            intensity: 1.0,
            ..Default::default()
        }
    }

    pub fn with_color(&self, color: Hsv) -> Self {
        LightValue {
            color: Some(color),
            color_ref: None,
            ..self.clone()
        }
    }

    pub fn with_color_ref(&self, color_ref: PaletteRef) -> Self {
        LightValue {
            color: None,
            color_ref: Some(color_ref),
            ..self.clone()
        }
    }

    pub fn with_intensity(&self, intensity: f64) -> Self {
        LightValue {
            intensity,
            ..self.clone()
        }
    }

    pub fn with_envelope(&self, envelope: Envelope) -> Self {
        LightValue {
            envelope: Some(envelope),
            ..self.clone()
        }
    }

    pub fn with_modulator(&self, modulator: Modulator) -> Self {
        LightValue {
            modulator: Some(modulator),
            ..self.clone()
        }
    }
}

impl Default for LightValue {
    fn default() -> Self {
        LightValue {
            light_id: None,
            group: None,
            color: None,
            color_ref: None,
            intensity: 1.0,
            envelope: None,
            modulator: None,
        }
    }
}

/// An ADSR-style intensity/color curve layered onto a `LightHap`. All time
/// values are in cycles (1 cycle = 1 bar = 4 beats).
#[derive(Clone, Copy, Debug, Default)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
    pub flash_color: Option<Hsv>,
    pub fade_color: Option<Hsv>,
    pub flash_ref: Option<PaletteRef>,
    pub fade_ref: Option<PaletteRef>,
}

impl Envelope {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Envelope {
            attack,
            decay,
            sustain,
            release,
            ..Default::default()
        }
    }

    pub fn total_duration(&self) -> f64 {
        self.attack + self.decay
    }

    /// Intensity at `time_in_event` cycles since the event started. The
    /// attack phase never drops to black on the first frame: short attacks
    /// (`<= 0.05`) snap straight to peak; longer ones ramp linearly with a
    /// floor of `0.1` so there's no instant full-black dip.
    pub fn get_intensity(&self, time_in_event: f64) -> f64 {
        if time_in_event < 0.0 {
            return 0.0;
        }

        if time_in_event < self.attack {
            if self.attack <= 0.0 {
                return 1.0;
            }
            let t = time_in_event / self.attack;
            return if self.attack > 0.05 { t.max(0.1) } else { 1.0 };
        }

        let time_after_attack = time_in_event - self.attack;
        if time_after_attack < self.decay {
            if self.decay <= 0.0 {
                return self.sustain;
            }
            let t = time_after_attack / self.decay;
            return 1.0 - t * (1.0 - self.sustain);
        }

        self.sustain
    }

    pub fn get_release_intensity(&self, time_since_release: f64) -> f64 {
        if self.release <= 0.0 {
            return 0.0;
        }
        if time_since_release >= self.release {
            return 0.0;
        }
        let t = time_since_release / self.release;
        self.sustain * (1.0 - t)
    }

    pub fn get_color(&self, time_in_event: f64, base_color: Hsv) -> Hsv {
        if time_in_event < self.attack {
            return self.flash_color.or(self.fade_color).unwrap_or(base_color);
        }

        if let Some(fade_color) = self.fade_color {
            if let Some(flash_color) = self.flash_color {
                if self.decay > 0.0 {
                    let time_after_attack = time_in_event - self.attack;
                    if time_after_attack < self.decay {
                        let t = time_after_attack / self.decay;
                        return interpolate_hsv(flash_color, fade_color, t);
                    }
                }
            }
            return fade_color;
        }

        self.flash_color.unwrap_or(base_color)
    }

    pub fn with_colors(&self, flash: Option<Hsv>, fade: Option<Hsv>) -> Self {
        Envelope {
            flash_color: flash.or(self.flash_color),
            fade_color: fade.or(self.fade_color),
            flash_ref: if flash.is_some() { None } else { self.flash_ref },
            fade_ref: if fade.is_some() { None } else { self.fade_ref },
            ..*self
        }
    }

    pub fn with_flash_ref(&self, flash_ref: PaletteRef) -> Self {
        Envelope {
            flash_color: None,
            flash_ref: Some(flash_ref),
            ..*self
        }
    }

    pub fn with_fade_ref(&self, fade_ref: PaletteRef) -> Self {
        Envelope {
            fade_color: None,
            fade_ref: Some(fade_ref),
            ..*self
        }
    }

    /// Merges with `other`, preferring `self`'s non-default fields.
    pub fn merge(&self, other: Option<&Envelope>) -> Envelope {
        let Some(other) = other else {
            return *self;
        };
        Envelope {
            attack: if self.attack != 0.0 { self.attack } else { other.attack },
            decay: if self.decay != 0.0 { self.decay } else { other.decay },
            sustain: if self.sustain != 1.0 { self.sustain } else { other.sustain },
            release: if self.release != 0.0 { self.release } else { other.release },
            flash_color: self.flash_color.or(other.flash_color),
            fade_color: self.fade_color.or(other.fade_color),
            flash_ref: self.flash_ref.or(other.flash_ref),
            fade_ref: self.fade_ref.or(other.fade_ref),
        }
    }
}

/// A "happening": a `LightValue` with timing. `whole` is the event's full
/// logical duration (used for envelope phase calculations); `part` is the
/// slice actually visible in the current query window.
#[derive(Clone, Debug)]
pub struct LightHap {
    pub whole: Option<TimeSpan>,
    pub part: TimeSpan,
    pub value: LightValue,
}

impl LightHap {
    pub fn new(whole: Option<TimeSpan>, part: TimeSpan, value: LightValue) -> Self {
        LightHap { whole, part, value }
    }

    pub fn whole_or_part(&self) -> TimeSpan {
        self.whole.unwrap_or(self.part)
    }

    pub fn with_value(&self, value: LightValue) -> Self {
        LightHap {
            whole: self.whole,
            part: self.part,
            value,
        }
    }

    pub fn with_part(&self, part: TimeSpan) -> Self {
        LightHap {
            whole: self.whole,
            part,
            value: self.value.clone(),
        }
    }

    pub fn shift(&self, offset: Fraction) -> Self {
        LightHap {
            whole: self.whole.map(|w| w.shift(offset)),
            part: self.part.shift(offset),
            value: self.value.clone(),
        }
    }

    pub fn scale(&self, factor: Fraction) -> Self {
        let inv = Fraction::ONE / factor;
        LightHap {
            whole: self.whole.map(|w| w.scale(inv)),
            part: self.part.scale(inv),
            value: self.value.clone(),
        }
    }
}

/// Runtime context a pattern queries against: light count, group/zone
/// membership. An `"all"` group covering every light index is always
/// present.
#[derive(Clone, Debug)]
pub struct LightContext {
    pub num_lights: usize,
    pub groups: HashMap<String, Vec<usize>>,
    pub cycle_beats: f64,
    pub zones: HashMap<String, Vec<usize>>,
    pub available_zones: Vec<String>,
}

impl LightContext {
    pub fn new(num_lights: usize, mut groups: HashMap<String, Vec<usize>>) -> Self {
        groups.entry("all".to_string()).or_insert_with(|| (0..num_lights).collect());
        LightContext {
            num_lights,
            groups,
            cycle_beats: 4.0,
            zones: HashMap::new(),
            available_zones: Vec::new(),
        }
    }

    pub fn resolve_group(&self, name: &str) -> Vec<usize> {
        self.groups.get(name).cloned().unwrap_or_default()
    }

    pub fn resolve_zone(&self, name: &str) -> Vec<usize> {
        self.zones.get(name).cloned().unwrap_or_default()
    }

    pub fn has_zone(&self, name: &str) -> bool {
        self.available_zones.iter().any(|z| z == name)
    }

    pub fn has_dual_zones(&self) -> bool {
        self.has_zone("ceiling") && self.has_zone("perimeter")
    }

    /// `all`/`left`/`right`/`odd`/`even`, split the way a six-light rig
    /// would be: left is the first half, right the second.
    pub fn default_context(num_lights: usize) -> Self {
        let half = num_lights / 2;
        let mut groups = HashMap::new();
        groups.insert("all".to_string(), (0..num_lights).collect());
        groups.insert("left".to_string(), (0..half).collect());
        groups.insert("right".to_string(), (half..num_lights).collect());
        groups.insert("odd".to_string(), (1..num_lights).step_by(2).collect());
        groups.insert("even".to_string(), (0..num_lights).step_by(2).collect());
        LightContext::new(num_lights, groups)
    }

    pub fn with_zones(
        num_lights: usize,
        groups: HashMap<String, Vec<usize>>,
        zones: HashMap<String, Vec<usize>>,
    ) -> Self {
        let mut ctx = LightContext::new(num_lights, groups);
        ctx.available_zones = zones.keys().cloned().collect();
        ctx.zones = zones;
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_short_attack_is_instant() {
        let env = Envelope::new(0.02, 0.0, 1.0, 0.0);
        assert_eq!(env.get_intensity(0.01), 1.0);
    }

    #[test]
    fn envelope_long_attack_ramps_with_floor() {
        let env = Envelope::new(1.0, 0.0, 1.0, 0.0);
        assert_eq!(env.get_intensity(0.0), 0.1);
        assert_eq!(env.get_intensity(0.5), 0.5);
    }

    #[test]
    fn envelope_decay_ramps_to_sustain() {
        let env = Envelope::new(0.0, 1.0, 0.5, 0.0);
        assert!((env.get_intensity(0.5) - 0.75).abs() < 1e-9);
        assert_eq!(env.get_intensity(2.0), 0.5);
    }

    #[test]
    fn envelope_release_decays_from_sustain_to_zero() {
        let env = Envelope::new(0.0, 0.0, 0.5, 1.0);
        assert_eq!(env.get_release_intensity(0.0), 0.5);
        assert_eq!(env.get_release_intensity(1.0), 0.0);
        assert_eq!(env.get_release_intensity(2.0), 0.0);
    }

    #[test]
    fn envelope_merge_prefers_self_non_defaults() {
        let a = Envelope::new(0.1, 0.0, 1.0, 0.0);
        let b = Envelope::new(0.5, 2.0, 0.3, 1.0);
        let merged = a.merge(Some(&b));
        assert_eq!(merged.attack, 0.1);
        assert_eq!(merged.decay, 2.0);
        assert_eq!(merged.sustain, 0.3);
        assert_eq!(merged.release, 1.0);
    }

    #[test]
    fn merge_with_none_returns_self() {
        let a = Envelope::new(0.1, 0.2, 0.3, 0.4);
        let merged = a.merge(None);
        assert_eq!(merged.attack, a.attack);
    }

    #[test]
    fn context_has_all_group_by_default() {
        let ctx = LightContext::new(6, HashMap::new());
        assert_eq!(ctx.resolve_group("all"), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn default_context_splits_left_right_odd_even() {
        let ctx = LightContext::default_context(6);
        assert_eq!(ctx.resolve_group("left"), vec![0, 1, 2]);
        assert_eq!(ctx.resolve_group("right"), vec![3, 4, 5]);
        assert_eq!(ctx.resolve_group("odd"), vec![1, 3, 5]);
        assert_eq!(ctx.resolve_group("even"), vec![0, 2, 4]);
    }

    #[test]
    fn dual_zones_requires_both_ceiling_and_perimeter() {
        let mut zones = HashMap::new();
        zones.insert("ceiling".to_string(), vec![0, 1]);
        let ctx = LightContext::with_zones(6, HashMap::new(), zones);
        assert!(!ctx.has_dual_zones());
    }
}
