//! Top-level state machine: owns the clock-derived transport state, the
//! active pattern/palette selection, zone brightness, fades, identify
//! overlays, and the quantized pattern-switch queue. `compute_colors`
//! delegates the actual per-light color math to the scheduler.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::color::Rgb;
use crate::config::{DEFAULT_FADE_DURATION_SECS, IDENTIFY_DURATION_SECS, IDENTIFY_FLASH_PERIOD_SECS};
use crate::loader::PatternTable;
use crate::palette::{self, Palette};
use crate::scheduler::Scheduler;
use crate::time::{Fraction, TimeSpan};
use crate::value::LightContext;

/// A one-shot visual override layered on top of (and replacing) whatever
/// the active pattern would otherwise show.
#[derive(Clone, Debug)]
pub enum QuickAction {
    /// White, full intensity, for `duration_beats` beats.
    Flash { duration_beats: f64 },
    /// All lights off, held until explicitly released.
    Blackout,
    /// A single flat color/intensity, for `duration_beats` beats.
    ColorBump { hue: f64, saturation: f64, value: f64, intensity: f64, duration_beats: f64 },
}

#[derive(Clone, Copy, Debug)]
pub struct ZoneBrightness {
    pub ceiling: f64,
    pub perimeter: f64,
    pub ambient: f64,
}

impl Default for ZoneBrightness {
    fn default() -> Self {
        ZoneBrightness { ceiling: 1.0, perimeter: 1.0, ambient: 1.0 }
    }
}

/// The coarse-grained, short-critical-section state guarded by a single
/// `Mutex` (per the concurrency model: POD fields, cheap to hold briefly).
pub struct EngineState {
    pub beat_position: f64,
    pub bpm: f64,
    pub beat_count: u32,
    pub running: bool,
    pub identify_light_index: Option<usize>,
    pub identify_until: Instant,
    pub zone_brightness: ZoneBrightness,
    pub fade_active: bool,
    pub fade_start_time: Instant,
    pub fade_duration: Duration,
    pub queue_mode: u8,
    pub queued_pattern_index: Option<usize>,
    pub queue_target_bar: Option<u32>,
    /// The active override plus the `beat_position` it was triggered at, so
    /// `duration_beats`-bounded actions (flash/color bump) can expire
    /// relative to musical time rather than the wall clock.
    pub active_quick_action: Option<(QuickAction, f64)>,
}

impl Default for EngineState {
    fn default() -> Self {
        let now = Instant::now();
        EngineState {
            beat_position: 0.0,
            bpm: 120.0,
            beat_count: 1,
            running: false,
            identify_light_index: None,
            identify_until: now,
            zone_brightness: ZoneBrightness::default(),
            fade_active: false,
            fade_start_time: now,
            fade_duration: Duration::from_secs_f64(DEFAULT_FADE_DURATION_SECS),
            queue_mode: 0,
            queued_pattern_index: None,
            queue_target_bar: None,
            active_quick_action: None,
        }
    }
}

impl EngineState {
    pub fn bar(&self) -> u32 {
        (self.beat_position / 4.0).floor() as u32 + 1
    }

    pub fn beat_in_bar(&self) -> f64 {
        self.beat_position % 4.0 + 1.0
    }
}

/// Zones without explicit `zone_brightness` entries are treated as "ambient"
/// for the purposes of the renderer's per-light multiplier (ambient is the
/// zone any light not in ceiling/perimeter falls into).
pub fn zone_multiplier(zone_brightness: &ZoneBrightness, zone_name: Option<&str>) -> f64 {
    match zone_name {
        Some("ceiling") => zone_brightness.ceiling,
        Some("perimeter") => zone_brightness.perimeter,
        _ => zone_brightness.ambient,
    }
}

/// Owns the pattern table, active selection, palette override, light
/// context, and scheduler. Its own lock is held only across pattern-table
/// swaps and is never held across a `compute_colors` call.
pub struct Engine {
    pub patterns: PatternTable,
    pub pattern_index: usize,
    pub palette_override: Option<String>,
    pub ctx: LightContext,
    scheduler: Scheduler,
}

impl Engine {
    pub fn new(patterns: PatternTable, ctx: LightContext) -> Self {
        Engine { patterns, pattern_index: 0, palette_override: None, ctx, scheduler: Scheduler::new() }
    }

    pub fn current_pattern_name(&self) -> Option<String> {
        self.patterns.get(self.pattern_index).map(|e| e.meta.name.clone())
    }

    /// Resolves the active palette: an explicit override wins, otherwise the
    /// active pattern's header `palette:` field, otherwise falls back to the
    /// built-in `"white_tones"` palette.
    pub fn active_palette(&self) -> Palette {
        let name = self
            .palette_override
            .clone()
            .or_else(|| self.patterns.get(self.pattern_index).and_then(|e| e.meta.palette.clone()))
            .unwrap_or_else(|| "white_tones".to_string());

        palette::get_palette(&name).unwrap_or_else(|| {
            crate::logging::warn_once(format!("unknown palette '{name}', falling back to white_tones"));
            palette::get_palette("white_tones").expect("white_tones is a built-in palette")
        })
    }

    pub fn set_pattern_by_name(&mut self, name: &str) -> bool {
        match self.patterns.index_of_name(name) {
            Some(index) => {
                self.pattern_index = index;
                true
            }
            None => false,
        }
    }

    pub fn next_pattern(&mut self) {
        if self.patterns.is_empty() {
            return;
        }
        self.pattern_index = (self.pattern_index + 1) % self.patterns.len();
    }

    pub fn prev_pattern(&mut self) {
        if self.patterns.is_empty() {
            return;
        }
        self.pattern_index = (self.pattern_index + self.patterns.len() - 1) % self.patterns.len();
    }

    pub fn set_palette(&mut self, name: Option<String>) {
        self.palette_override = name;
    }

    /// Swaps in a freshly loaded pattern table (from a hot-reload rebuild),
    /// trying to preserve the current selection by name.
    pub fn replace_patterns(&mut self, patterns: PatternTable) {
        let current_name = self.current_pattern_name();
        self.patterns = patterns;
        self.pattern_index = current_name
            .and_then(|name| self.patterns.index_of_name(&name))
            .unwrap_or(0);
    }

    /// Delegates to the scheduler for the currently active pattern, or
    /// an empty map if there is nothing loaded.
    pub fn compute_colors(&mut self, beat_position: f64) -> HashMap<usize, Rgb> {
        let Some(entry) = self.patterns.get(self.pattern_index) else {
            return HashMap::new();
        };
        let beat = Fraction::from_f64_limited(beat_position, 1_000_000);
        let query = TimeSpan::new(beat, beat + Fraction::new(1, 1_000));
        let palette = self.active_palette();
        self.scheduler.compute_colors(&entry.pattern, &self.ctx, &palette, query)
    }
}

/// `Blackout` is held until explicitly released; `Flash`/`ColorBump` expire
/// once `duration_beats` beats have elapsed since they were triggered.
pub fn quick_action_expired(action: &QuickAction, triggered_at_beat: f64, current_beat: f64) -> bool {
    match action {
        QuickAction::Blackout => false,
        QuickAction::Flash { duration_beats } | QuickAction::ColorBump { duration_beats, .. } => {
            current_beat - triggered_at_beat >= *duration_beats
        }
    }
}

/// Flat white at full intensity for every light in the rig.
pub fn quick_action_flash_colors(num_lights: usize) -> HashMap<usize, Rgb> {
    (0..num_lights).map(|i| (i, Rgb::white())).collect()
}

/// A single flat color for every light, at the given intensity.
pub fn quick_action_color_bump_colors(num_lights: usize, hue: f64, saturation: f64, value: f64, intensity: f64) -> HashMap<usize, Rgb> {
    let rgb = Rgb::from_hsv(hue, saturation, value).scale(intensity);
    (0..num_lights).map(|i| (i, rgb)).collect()
}

/// Alternates white/off at a 150 ms half-period while `now < identify_until`.
pub fn identify_overlay_color(now: Instant, identify_until: Instant) -> Option<Rgb> {
    if now >= identify_until {
        return None;
    }
    let remaining = identify_until.duration_since(now).as_secs_f64();
    let phase = (remaining / IDENTIFY_FLASH_PERIOD_SECS).floor() as i64 % 2;
    Some(if phase == 0 { Rgb::white() } else { Rgb::black() })
}

pub fn identify_duration() -> Duration {
    Duration::from_secs_f64(IDENTIFY_DURATION_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{PatternEntry, PatternMeta};
    use crate::pattern::light_ids;
    use std::path::PathBuf;

    fn entry(name: &str) -> PatternEntry {
        PatternEntry {
            meta: PatternMeta {
                name: name.to_string(),
                category: "Chill".to_string(),
                description: String::new(),
                tags: vec![],
                palette: None,
                path: PathBuf::from(format!("{name}.pattern")),
            },
            pattern: light_ids(&[0]),
            source: "light_ids([0])".to_string(),
        }
    }

    #[test]
    fn bar_and_beat_in_bar_arithmetic() {
        let mut state = EngineState::default();
        state.beat_position = 5.5;
        assert_eq!(state.bar(), 2);
        assert!((state.beat_in_bar() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn next_pattern_wraps_around() {
        let table = PatternTable { entries: vec![entry("a"), entry("b")] };
        let mut engine = Engine::new(table, LightContext::default_context(6));
        assert_eq!(engine.pattern_index, 0);
        engine.next_pattern();
        assert_eq!(engine.pattern_index, 1);
        engine.next_pattern();
        assert_eq!(engine.pattern_index, 0);
        engine.prev_pattern();
        assert_eq!(engine.pattern_index, 1);
    }

    #[test]
    fn set_pattern_by_name_fails_gracefully_on_unknown_name() {
        let table = PatternTable { entries: vec![entry("a")] };
        let mut engine = Engine::new(table, LightContext::default_context(6));
        assert!(!engine.set_pattern_by_name("does-not-exist"));
        assert!(engine.set_pattern_by_name("a"));
    }

    #[test]
    fn identify_overlay_is_none_once_expired() {
        let now = Instant::now();
        assert!(identify_overlay_color(now, now).is_none());
        assert!(identify_overlay_color(now, now - Duration::from_secs(1)).is_none());
        assert!(identify_overlay_color(now, now + Duration::from_millis(100)).is_some());
    }

    #[test]
    fn zone_multiplier_falls_back_to_ambient() {
        let zb = ZoneBrightness { ceiling: 0.5, perimeter: 0.8, ambient: 0.3 };
        assert_eq!(zone_multiplier(&zb, Some("ceiling")), 0.5);
        assert_eq!(zone_multiplier(&zb, Some("perimeter")), 0.8);
        assert_eq!(zone_multiplier(&zb, Some("unknown")), 0.3);
        assert_eq!(zone_multiplier(&zb, None), 0.3);
    }
}
