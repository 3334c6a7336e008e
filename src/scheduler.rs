//! Turns a pattern's timed events into one concrete color per light for a
//! given query window: resolves palette references, evaluates envelopes and
//! modulators, and blends overlapping events with highest-takes-precedence
//! (no additive mixing — the brightest candidate for a light wins outright).

use std::collections::HashMap;

use crate::color::Rgb;
use crate::palette::Palette;
use crate::pattern::LightPattern;
use crate::time::{Fraction, TimeSpan};
use crate::value::{Envelope, LightContext, LightHap, LightValue};

/// Events are dropped once their resolved intensity falls below this —
/// both to skip genuinely invisible light and to expire a tracked tail.
const INTENSITY_THRESHOLD: f64 = 0.01;

/// Queries slightly before the requested window so an event whose `whole`
/// started just before it is still picked up; only the lower bound is
/// widened, clamped so it never reaches into negative cycle time.
fn query_margin() -> Fraction {
    Fraction::new(1, 50)
}

#[derive(Clone, Debug)]
struct ActiveEvent {
    whole: TimeSpan,
    value: LightValue,
    event_index: usize,
}

/// A single candidate result for one light, before the brightest-wins pass.
struct Candidate {
    light_id: usize,
    intensity: f64,
    rgb: Rgb,
}

/// Owns the state that survives between `compute_colors` calls: events whose
/// envelope outlives the `whole` span the pattern reported them over.
#[derive(Default)]
pub struct Scheduler {
    active_events: HashMap<usize, ActiveEvent>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Computes the color every light should show at `query.start`, as seen
    /// through the window `query`. Only `query.start` matters for the
    /// returned colors; the full span is what's handed to the pattern.
    pub fn compute_colors(
        &mut self,
        pattern: &LightPattern,
        ctx: &LightContext,
        palette: &Palette,
        query: TimeSpan,
    ) -> HashMap<usize, Rgb> {
        let now = query.start.to_f64();
        let lower = (query.start - query_margin()).max(Fraction::ZERO);
        let expanded = TimeSpan::new(lower, query.end);

        let events = pattern.query(expanded, ctx);
        let flattened = flatten_to_lights(events, ctx);

        let mut seen_lights: HashMap<usize, ()> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for (event_index, (light_id, whole, value)) in flattened.into_iter().enumerate() {
            seen_lights.insert(light_id, ());
            let time_in_event = now - whole.start.to_f64();
            if let Some(candidate) = resolve_candidate(light_id, &value, time_in_event, now, event_index, palette) {
                candidates.push(candidate);
            }

            // Release always begins at the event's `whole.end` and runs for
            // `env.release` cycles beyond it, independent of attack/decay —
            // any event with a release phase needs tail tracking.
            let needs_tail = value.envelope.map(|env| env.release > 0.0).unwrap_or(false);
            if needs_tail {
                self.active_events.insert(
                    light_id,
                    ActiveEvent {
                        whole,
                        value,
                        event_index,
                    },
                );
            } else {
                self.active_events.remove(&light_id);
            }
        }

        let mut expired = Vec::new();
        for (&light_id, active) in self.active_events.iter() {
            if seen_lights.contains_key(&light_id) {
                continue;
            }
            let Some(envelope) = active.value.envelope else {
                expired.push(light_id);
                continue;
            };
            let time_since_release = now - active.whole.end.to_f64();
            if time_since_release < 0.0 {
                continue;
            }
            let release_intensity = envelope.get_release_intensity(time_since_release);
            if release_intensity < INTENSITY_THRESHOLD {
                expired.push(light_id);
                continue;
            }
            // Tail continuation resolves palette refs against the light's own
            // id rather than the event's original query index, since the
            // event that produced this light is no longer in the fresh query.
            if let Some(candidate) = resolve_tail_candidate(light_id, &active.value, envelope, release_intensity, now, palette) {
                candidates.push(candidate);
            }
        }
        for light_id in expired {
            self.active_events.remove(&light_id);
        }

        let mut result: HashMap<usize, Rgb> = HashMap::new();
        let mut best_intensity: HashMap<usize, f64> = HashMap::new();
        for candidate in candidates {
            let slot = best_intensity.entry(candidate.light_id).or_insert(f64::MIN);
            if candidate.intensity > *slot {
                *slot = candidate.intensity;
                result.insert(candidate.light_id, candidate.rgb);
            }
        }
        result
    }
}

/// Expands group-targeted events into individual lights, preserving query
/// order so palette `Cycle` mode assigns distinct indices across a group.
fn flatten_to_lights(events: Vec<LightHap>, ctx: &LightContext) -> Vec<(usize, TimeSpan, LightValue)> {
    let mut out = Vec::new();
    for hap in events {
        let whole = hap.whole_or_part();
        match (hap.value.light_id, &hap.value.group) {
            (Some(id), _) => out.push((id as usize, whole, hap.value.clone())),
            (None, Some(group)) => {
                for light_id in ctx.resolve_group(group) {
                    let value = LightValue {
                        light_id: Some(light_id as i64),
                        group: None,
                        ..hap.value.clone()
                    };
                    out.push((light_id, whole, value));
                }
            }
            (None, None) => {}
        }
    }
    out
}

fn resolve_candidate(
    light_id: usize,
    value: &LightValue,
    time_in_event: f64,
    cycle_position: f64,
    event_index: usize,
    palette: &Palette,
) -> Option<Candidate> {
    let base_color = base_color_of(value, event_index, cycle_position, palette);
    let mut intensity = value.intensity;
    let color = if let Some(env) = value.envelope {
        intensity *= env.get_intensity(time_in_event);
        let flash = resolve_optional_ref(env.flash_ref, event_index, cycle_position, palette).or(env.flash_color);
        let fade = resolve_optional_ref(env.fade_ref, event_index, cycle_position, palette).or(env.fade_color);
        Envelope { flash_color: flash, fade_color: fade, ..env }.get_color(time_in_event, base_color)
    } else {
        base_color
    };

    if let Some(modulator) = &value.modulator {
        intensity *= modulator.get_intensity(cycle_position);
    }

    if intensity < INTENSITY_THRESHOLD {
        return None;
    }

    Some(Candidate {
        light_id,
        intensity,
        rgb: Rgb::from_hsv(color.hue, color.saturation, color.value).scale(intensity),
    })
}

fn resolve_tail_candidate(
    light_id: usize,
    value: &LightValue,
    envelope: Envelope,
    release_intensity: f64,
    cycle_position: f64,
    palette: &Palette,
) -> Option<Candidate> {
    let event_index = light_id;
    let base_color = base_color_of(value, event_index, cycle_position, palette);
    let flash = resolve_optional_ref(envelope.flash_ref, event_index, cycle_position, palette).or(envelope.flash_color);
    let fade = resolve_optional_ref(envelope.fade_ref, event_index, cycle_position, palette).or(envelope.fade_color);
    let color = fade.or(flash).unwrap_or(base_color);

    let mut intensity = value.intensity * release_intensity;
    if let Some(modulator) = &value.modulator {
        intensity *= modulator.get_intensity(cycle_position);
    }
    if intensity < INTENSITY_THRESHOLD {
        return None;
    }

    Some(Candidate {
        light_id,
        intensity,
        rgb: Rgb::from_hsv(color.hue, color.saturation, color.value).scale(intensity),
    })
}

fn base_color_of(value: &LightValue, event_index: usize, cycle_position: f64, palette: &Palette) -> crate::color::Hsv {
    if let Some(color_ref) = value.color_ref {
        return color_ref.resolve(palette, event_index, Some(cycle_position));
    }
    value.color.unwrap_or_else(|| crate::color::Hsv::new(0.0, 0.0, 1.0))
}

fn resolve_optional_ref(
    color_ref: Option<crate::palette::PaletteRef>,
    event_index: usize,
    cycle_position: f64,
    palette: &Palette,
) -> Option<crate::color::Hsv> {
    color_ref.map(|r| r.resolve(palette, event_index, Some(cycle_position)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Hsv;
    use crate::pattern::{light_ids, ColorSpec};

    fn ctx() -> LightContext {
        LightContext::default_context(6)
    }

    fn palette() -> Palette {
        Palette::new("p", vec![Hsv::new(0.0, 1.0, 1.0), Hsv::new(0.5, 1.0, 1.0)])
    }

    #[test]
    fn htp_brightest_light_wins() {
        let a = light_ids(&[0]).color(ColorSpec::Literal(Hsv::new(0.0, 1.0, 1.0))).intensity(0.3);
        let b = light_ids(&[0]).color(ColorSpec::Literal(Hsv::new(0.5, 1.0, 1.0))).intensity(0.9);
        let stacked = crate::pattern::stack(vec![a, b]);

        let mut scheduler = Scheduler::new();
        let colors = scheduler.compute_colors(
            &stacked,
            &ctx(),
            &palette(),
            TimeSpan::new(Fraction::ZERO, Fraction::new(1, 100)),
        );

        let rgb = colors.get(&0).unwrap();
        let expected = Rgb::from_hsv(0.5, 1.0, 1.0).scale(0.9);
        assert!((rgb.r - expected.r).abs() < 1e-9);
        assert!((rgb.g - expected.g).abs() < 1e-9);
        assert!((rgb.b - expected.b).abs() < 1e-9);
    }

    /// A single "0" event occupying `[0, 1)`, never recurring in later
    /// cycles — isolates tail behavior from the fact that `light_ids` loops.
    fn one_shot() -> LightPattern {
        LightPattern::new(|span, _ctx| {
            let whole = TimeSpan::new(Fraction::ZERO, Fraction::ONE);
            whole
                .intersection(&span)
                .map(|part| vec![LightHap::new(Some(whole), part, LightValue::for_light(0))])
                .unwrap_or_default()
        })
    }

    #[test]
    fn envelope_tail_continues_past_whole_end() {
        let p = one_shot().envelope(0.0, 0.0, 1.0, 1.0);
        let mut scheduler = Scheduler::new();

        let within = scheduler.compute_colors(&p, &ctx(), &palette(), TimeSpan::new(Fraction::ZERO, Fraction::new(1, 100)));
        assert!(within.contains_key(&0));

        // "0" occupies [0, 1); query well past its whole's end but still
        // inside the 1-cycle release.
        let past_end = scheduler.compute_colors(
            &p,
            &ctx(),
            &palette(),
            TimeSpan::new(Fraction::new(3, 2), Fraction::new(151, 100)),
        );
        assert!(past_end.contains_key(&0), "release tail should still be visible");
    }

    #[test]
    fn tail_expires_once_release_intensity_drops_below_threshold() {
        let p = one_shot().envelope(0.0, 0.0, 1.0, 1.0);
        let mut scheduler = Scheduler::new();
        scheduler.compute_colors(&p, &ctx(), &palette(), TimeSpan::new(Fraction::ZERO, Fraction::new(1, 100)));

        let far_future = scheduler.compute_colors(
            &p,
            &ctx(),
            &palette(),
            TimeSpan::new(Fraction::from_int(10), Fraction::from_int(10) + Fraction::new(1, 100)),
        );
        assert!(!far_future.contains_key(&0));
        assert!(scheduler.active_events.is_empty());
    }

    #[test]
    fn dim_events_below_threshold_are_skipped() {
        let p = light_ids(&[0]).intensity(0.001);
        let mut scheduler = Scheduler::new();
        let colors = scheduler.compute_colors(&p, &ctx(), &palette(), TimeSpan::new(Fraction::ZERO, Fraction::new(1, 100)));
        assert!(!colors.contains_key(&0));
    }

    #[test]
    fn group_targeted_event_lights_up_every_member() {
        let p = light_ids(&[]);
        let p = LightPattern::new(move |span, _ctx| {
            let _ = &p;
            vec![LightHap::new(
                Some(TimeSpan::new(Fraction::ZERO, Fraction::ONE)),
                span,
                LightValue::for_group("left"),
            )]
        });
        let mut scheduler = Scheduler::new();
        let colors = scheduler.compute_colors(&p, &ctx(), &palette(), TimeSpan::new(Fraction::ZERO, Fraction::new(1, 100)));
        assert_eq!(colors.len(), 3, "left group covers half of 6 lights");
    }
}
