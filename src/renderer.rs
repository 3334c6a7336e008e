//! Fixed-rate render loop: paces itself to a target frame rate with an
//! accumulator (ported from `framework/frame_controller.rs`'s
//! `FrameController`), then assembles one gamma-corrected RGB16 frame per
//! tick from the engine's resolved colors, zone brightness, fade, and the
//! identify-light overlay.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::color::Rgb;
use crate::config::RENDER_HZ;
use crate::engine::{identify_overlay_color, zone_multiplier, ZoneBrightness};

const MAX_INTERVAL_SAMPLES: usize = 90;

/// Accumulator-paced tick counter, decoupled from wall-clock sleeps so it
/// can be driven by injected `Instant`s in tests.
pub struct RenderPacer {
    frame_duration: Duration,
    last_update_time: Instant,
    accumulator: Duration,
    tick_intervals: Vec<Duration>,
    last_tick_time: Instant,
}

impl RenderPacer {
    pub fn new(hz: f64) -> Self {
        Self::new_at(hz, Instant::now())
    }

    pub fn new_at(hz: f64, now: Instant) -> Self {
        RenderPacer {
            frame_duration: Duration::from_secs_f64(1.0 / hz),
            last_update_time: now,
            accumulator: Duration::ZERO,
            tick_intervals: Vec::with_capacity(MAX_INTERVAL_SAMPLES),
            last_tick_time: now,
        }
    }

    /// Advances the accumulator by the elapsed time since the last call and
    /// returns how many full frame intervals are now due. Call this in a
    /// loop, rendering once per due tick, until it returns 0.
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_update_time);
        self.last_update_time = now;
        self.accumulator += elapsed;

        let mut ticks = 0;
        while self.accumulator >= self.frame_duration {
            self.accumulator -= self.frame_duration;
            ticks += 1;

            let interval = now.saturating_duration_since(self.last_tick_time);
            self.tick_intervals.push(interval);
            if self.tick_intervals.len() > MAX_INTERVAL_SAMPLES {
                self.tick_intervals.remove(0);
            }
            self.last_tick_time = now;
        }

        // Sub-millisecond drift isn't worth carrying forward.
        if self.accumulator < Duration::from_millis(1) {
            self.accumulator = Duration::ZERO;
        }

        ticks
    }

    /// Rolling average over the last 90 tick intervals, exposed as the
    /// control server's `render_fps` status field.
    pub fn average_fps(&self) -> f64 {
        if self.tick_intervals.is_empty() {
            return 0.0;
        }
        let sum: Duration = self.tick_intervals.iter().copied().sum();
        let avg = sum / self.tick_intervals.len() as u32;
        if avg.as_secs_f64() <= 0.0 {
            0.0
        } else {
            1.0 / avg.as_secs_f64()
        }
    }
}

/// Per-light fade-out multiplier: `1.0` while inactive, linearly ramping to
/// `0.0` over `fade_duration` once `fade_active`.
pub fn fade_multiplier(fade_active: bool, fade_start_time: Instant, fade_duration: Duration, now: Instant) -> f64 {
    if !fade_active {
        return 1.0;
    }
    let elapsed = now.saturating_duration_since(fade_start_time).as_secs_f64();
    let total = fade_duration.as_secs_f64();
    if total <= 0.0 || elapsed >= total {
        return 0.0;
    }
    1.0 - elapsed / total
}

/// Combines the scheduler's resolved colors with zone brightness, fade, and
/// the identify overlay into one RGB16 frame, one entry per light.
pub fn assemble_frame(
    num_lights: usize,
    colors: &HashMap<usize, Rgb>,
    zone_of: impl Fn(usize) -> Option<&'static str>,
    zone_brightness: &ZoneBrightness,
    fade_factor: f64,
    identify_light_index: Option<usize>,
    identify_until: Instant,
    now: Instant,
) -> Vec<(u16, u16, u16)> {
    let overlay = identify_light_index.and_then(|_| identify_overlay_color(now, identify_until));

    (0..num_lights)
        .map(|light_id| {
            if let (Some(idx), Some(color)) = (identify_light_index, overlay) {
                if idx == light_id {
                    return color.to_rgb16();
                }
            }

            let base = colors.get(&light_id).copied().unwrap_or_else(Rgb::black);
            let zone_factor = zone_multiplier(zone_brightness, zone_of(light_id));
            base.scale(zone_factor * fade_factor).to_rgb16()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_emits_one_tick_per_frame_interval() {
        let start = Instant::now();
        let mut pacer = RenderPacer::new_at(RENDER_HZ, start);
        let frame = Duration::from_secs_f64(1.0 / RENDER_HZ);

        assert_eq!(pacer.due_ticks(start + frame), 1);
        assert_eq!(pacer.due_ticks(start + frame), 0);
        assert_eq!(pacer.due_ticks(start + frame * 5), 4);
    }

    #[test]
    fn pacer_tracks_rolling_average_fps() {
        let start = Instant::now();
        let mut pacer = RenderPacer::new_at(RENDER_HZ, start);
        let frame = Duration::from_secs_f64(1.0 / RENDER_HZ);
        let mut now = start;
        for _ in 0..10 {
            now += frame;
            pacer.due_ticks(now);
        }
        assert!((pacer.average_fps() - RENDER_HZ).abs() < 1.0);
    }

    #[test]
    fn fade_multiplier_ramps_linearly_to_zero() {
        let start = Instant::now();
        let duration = Duration::from_secs(2);
        assert_eq!(fade_multiplier(false, start, duration, start), 1.0);
        assert_eq!(fade_multiplier(true, start, duration, start), 1.0);
        assert!((fade_multiplier(true, start, duration, start + Duration::from_secs(1)) - 0.5).abs() < 1e-9);
        assert_eq!(fade_multiplier(true, start, duration, start + Duration::from_secs(3)), 0.0);
    }

    #[test]
    fn assemble_frame_overlays_identify_light() {
        let now = Instant::now();
        let until = now + Duration::from_millis(50);
        let colors: HashMap<usize, Rgb> = HashMap::new();
        let frame = assemble_frame(3, &colors, |_| None, &ZoneBrightness::default(), 1.0, Some(1), until, now);
        assert_eq!(frame[0], Rgb::black().to_rgb16());
        assert_eq!(frame[1], Rgb::white().to_rgb16());
    }

    #[test]
    fn assemble_frame_applies_zone_and_fade_multipliers() {
        let now = Instant::now();
        let mut colors = HashMap::new();
        colors.insert(0usize, Rgb::white());
        let zb = ZoneBrightness { ceiling: 0.5, perimeter: 1.0, ambient: 1.0 };
        let frame = assemble_frame(1, &colors, |_| Some("ceiling"), &zb, 1.0, None, now, now);
        let expected = Rgb::white().scale(0.5).to_rgb16();
        assert_eq!(frame[0], expected);
    }
}
