//! The pattern combinator algebra: patterns are immutable functions from a
//! query window to a set of timed light events. Every combinator here wraps
//! an existing pattern (or several) in a new closure that reinterprets the
//! query span, delegates to its children, and reshapes the results — no
//! combinator ever mutates a pattern in place.

use std::collections::HashSet;
use std::sync::Arc;

use crate::color::Hsv;
use crate::modulator::{Modulator, WaveType};
use crate::notation::parse_to_query_data;
use crate::palette::PaletteRef;
use crate::time::{Fraction, TimeSpan};
use crate::value::{Envelope, LightContext, LightHap, LightValue};

/// Hard correctness bound on `autonomous`'s per-light blink search, ported
/// verbatim from the original implementation rather than left as a tunable.
pub const AUTONOMOUS_BLINK_CAP: usize = 1000;

/// A literal color or a deferred palette reference, as accepted by `color()`
/// and the envelope's flash/fade slots.
#[derive(Clone, Copy, Debug)]
pub enum ColorSpec {
    Literal(Hsv),
    Ref(PaletteRef),
}

impl ColorSpec {
    fn apply_to(&self, value: &LightValue) -> LightValue {
        match self {
            ColorSpec::Literal(c) => value.with_color(*c),
            ColorSpec::Ref(r) => value.with_color_ref(*r),
        }
    }
}

/// A pattern is a function `(TimeSpan, &LightContext) -> Vec<LightHap>`,
/// shared by reference so combinators can cheaply close over their inputs.
#[derive(Clone)]
pub struct LightPattern(Arc<dyn Fn(TimeSpan, &LightContext) -> Vec<LightHap> + Send + Sync>);

impl LightPattern {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TimeSpan, &LightContext) -> Vec<LightHap> + Send + Sync + 'static,
    {
        LightPattern(Arc::new(f))
    }

    pub fn query(&self, span: TimeSpan, ctx: &LightContext) -> Vec<LightHap> {
        (self.0)(span, ctx)
    }
}

/// Splits `span` at cycle (integer) boundaries so per-cycle combinators
/// (`cat`, `shuffle`, `seq`, `rev`) can process one cycle's worth at a time.
fn split_into_cycles(span: TimeSpan) -> Vec<TimeSpan> {
    let mut segments = Vec::new();
    if span.start >= span.end {
        return segments;
    }
    let mut cur = span.start;
    loop {
        let cycle = cur.floor();
        let boundary = Fraction::from_int(cycle + 1);
        let seg_end = if boundary < span.end { boundary } else { span.end };
        segments.push(TimeSpan::new(cur, seg_end));
        if seg_end >= span.end {
            break;
        }
        cur = seg_end;
    }
    segments
}

fn clip(hap: LightHap, span: TimeSpan) -> Option<LightHap> {
    let part = hap.part.intersection(&span)?;
    Some(hap.with_part(part))
}

// ---------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------

/// Parses `notation` once; every query replays the parsed slots across
/// whichever cycles the query span touches, shifting each slot into place.
pub fn light(notation: &str) -> LightPattern {
    let parsed: Vec<(Fraction, Fraction, Option<i64>, Option<String>)> = parse_to_query_data(notation);
    LightPattern::new(move |span, _ctx| {
        let mut out = Vec::new();
        for seg in split_into_cycles(span) {
            let cycle = seg.start.floor();
            let shift = Fraction::from_int(cycle);
            for (s, e, light_id, group) in &parsed {
                let whole = TimeSpan::new(*s + shift, *e + shift);
                let Some(part) = whole.intersection(&span) else { continue };
                let value = match (light_id, group) {
                    (Some(id), _) => LightValue::for_light(*id),
                    (None, Some(g)) => LightValue::for_group(g.clone()),
                    (None, None) => continue,
                };
                out.push(LightHap::new(Some(whole), part, value));
            }
        }
        out
    })
}

/// A bare integer list desugars to the equivalent space-separated notation.
pub fn light_ids(ids: &[i64]) -> LightPattern {
    let notation = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
    light(&notation)
}

pub fn stack(patterns: Vec<LightPattern>) -> LightPattern {
    LightPattern::new(move |span, ctx| patterns.iter().flat_map(|p| p.query(span, ctx)).collect())
}

pub fn cat(patterns: Vec<LightPattern>) -> LightPattern {
    LightPattern::new(move |span, ctx| {
        if patterns.is_empty() {
            return Vec::new();
        }
        let n = patterns.len() as i64;
        let mut out = Vec::new();
        for seg in split_into_cycles(span) {
            let cycle = seg.start.floor();
            let idx = cycle.rem_euclid(n) as usize;
            let shift = Fraction::from_int(cycle);
            let local = seg.shift(-shift);
            for hap in patterns[idx].query(local, ctx) {
                out.push(hap.shift(shift));
            }
        }
        out
    })
}

// ---------------------------------------------------------------------
// Time transforms
// ---------------------------------------------------------------------

impl LightPattern {
    /// Compresses `k` copies of the pattern into one cycle: the query span is
    /// expanded by `k`, and returned event times are divided by `k`.
    pub fn fast(&self, k: Fraction) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let scaled = span.scale(k);
            inner
                .query(scaled, ctx)
                .into_iter()
                .map(|h| h.scale(k))
                .filter_map(|h| clip(h, span))
                .collect()
        })
    }

    pub fn slow(&self, k: Fraction) -> LightPattern {
        self.fast(Fraction::ONE / k)
    }

    pub fn early(&self, offset: Fraction) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let shifted = span.shift(offset);
            inner
                .query(shifted, ctx)
                .into_iter()
                .map(|h| h.shift(-offset))
                .filter_map(|h| clip(h, span))
                .collect()
        })
    }

    pub fn late(&self, offset: Fraction) -> LightPattern {
        self.early(-offset)
    }

    /// Mirrors event times around the center of each cycle the query span
    /// touches.
    pub fn rev(&self) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for seg in split_into_cycles(span) {
                let cycle = seg.start.floor();
                let cycle_start = Fraction::from_int(cycle);
                let cycle_end = Fraction::from_int(cycle + 1);
                let mirror = move |t: Fraction| cycle_start + cycle_end - t;
                let mirrored_span = TimeSpan::new(mirror(seg.end), mirror(seg.start));
                for hap in inner.query(mirrored_span, ctx) {
                    let whole = hap.whole.map(|w| TimeSpan::new(mirror(w.end), mirror(w.start)));
                    let part = TimeSpan::new(mirror(hap.part.end), mirror(hap.part.start));
                    if let Some(part) = part.intersection(&seg) {
                        out.push(LightHap::new(whole, part, hap.value));
                    }
                }
            }
            out
        })
    }

    /// Deterministically permutes event *values* within each cycle while
    /// keeping time slots fixed. The per-cycle RNG is seeded by `cycle_index`
    /// (or `seed + cycle_index`); events are sorted by `(start,
    /// light_id_or_0, original_index)` before shuffling so the tie-breaker
    /// for group-targeted events (which collapse to `light_id_or_0 == 0`) is
    /// stable and reproducible.
    pub fn shuffle(&self, seed: Option<i64>) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for seg in split_into_cycles(span) {
                let cycle = seg.start.floor();
                let full_cycle = TimeSpan::new(Fraction::from_int(cycle), Fraction::from_int(cycle + 1));
                let mut indexed: Vec<(usize, LightHap)> = inner.query(full_cycle, ctx).into_iter().enumerate().collect();
                indexed.sort_by(|a, b| {
                    let sa = a.1.whole_or_part().start;
                    let sb = b.1.whole_or_part().start;
                    sa.cmp(&sb)
                        .then(a.1.value.light_id.unwrap_or(0).cmp(&b.1.value.light_id.unwrap_or(0)))
                        .then(a.0.cmp(&b.0))
                });
                let seed_val = seed.unwrap_or(0).wrapping_add(cycle);
                let mut rng = fastrand::Rng::with_seed(seed_val as u64);
                let mut values: Vec<LightValue> = indexed.iter().map(|(_, h)| h.value.clone()).collect();
                rng.shuffle(&mut values);
                for ((_, hap), value) in indexed.into_iter().zip(values) {
                    if let Some(part) = hap.part.intersection(&span) {
                        out.push(LightHap::new(hap.whole, part, value));
                    }
                }
            }
            out
        })
    }

    /// Picks a deterministic random subset of a group-targeted event's
    /// lights, sized uniformly in `[min, max]` (fractions of group size are
    /// clamped to at least one light). Light-targeted events pass through
    /// unchanged. When `hold` is set, the event's start time is quantized to
    /// the hold interval before seeding, so every event within one hold
    /// window shares the same pick.
    pub fn pick(&self, min: f64, max: Option<f64>, seed: Option<i64>, hold: Option<f64>) -> LightPattern {
        let inner = self.clone();
        let max = max.unwrap_or(min);
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for hap in inner.query(span, ctx) {
                let Some(group_name) = hap.value.group.clone() else {
                    out.push(hap);
                    continue;
                };
                let indices = ctx.resolve_group(&group_name);
                if indices.is_empty() {
                    continue;
                }
                let group_size = indices.len();
                let resolve_count = |v: f64| -> usize {
                    if v <= 1.0 {
                        ((v * group_size as f64).ceil() as usize).max(1)
                    } else {
                        (v.round() as usize).max(1)
                    }
                };
                let lo = resolve_count(min).min(group_size);
                let hi = resolve_count(max).min(group_size).max(lo);

                let whole = hap.whole_or_part();
                let seed_time = match hold {
                    Some(h) if h > 0.0 => {
                        let beats = whole.start.to_f64() * ctx.cycle_beats;
                        (beats / h).floor()
                    }
                    _ => whole.start.to_f64() * 1_000_000.0,
                };
                let seed_val = seed.unwrap_or(0).wrapping_add(seed_time as i64);
                let mut rng = fastrand::Rng::with_seed(seed_val as u64);
                let count = if hi > lo { lo + rng.usize(0..=(hi - lo)) } else { lo };

                let mut pool = indices;
                rng.shuffle(&mut pool);
                pool.truncate(count);
                pool.sort_unstable();

                for light_id in pool {
                    let value = LightValue {
                        light_id: Some(light_id as i64),
                        group: None,
                        ..hap.value.clone()
                    };
                    out.push(LightHap::new(hap.whole, hap.part, value));
                }
            }
            out
        })
    }

    /// For every light the input events resolve to, generates an
    /// independent on/off blink cycle: frequency, phase, and (optionally) a
    /// per-blink color are drawn once per light from its own RNG stream
    /// seeded by `seed + light_id * 1000`, so the same pattern and seed
    /// always reproduces the same blink schedule.
    pub fn autonomous(
        &self,
        min_freq: f64,
        max_freq: f64,
        duty: f64,
        colors: Option<Vec<Hsv>>,
        seed: Option<i64>,
    ) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for hap in inner.query(span, ctx) {
                let lights: Vec<usize> = match (hap.value.light_id, &hap.value.group) {
                    (Some(id), _) => vec![id as usize],
                    (None, Some(g)) => ctx.resolve_group(g),
                    _ => Vec::new(),
                };
                for light_id in lights {
                    let seed_val = seed.unwrap_or(0).wrapping_add(light_id as i64 * 1000);
                    let mut rng = fastrand::Rng::with_seed(seed_val as u64);
                    let freq = min_freq + rng.f64() * (max_freq - min_freq);
                    let phase = rng.f64();
                    let period = if freq > 0.0 { 1.0 / freq } else { 1.0 };
                    let on_duration = duty * period;

                    let mut blink_index = ((span.start.to_f64() - phase * period) / period).floor() as i64 - 1;
                    let mut evaluated = 0usize;
                    loop {
                        if evaluated > AUTONOMOUS_BLINK_CAP {
                            break;
                        }
                        evaluated += 1;
                        let blink_start = phase * period + blink_index as f64 * period;
                        if blink_start > span.end.to_f64() {
                            break;
                        }
                        let blink_end = blink_start + on_duration;
                        if blink_end > span.start.to_f64() {
                            let whole = TimeSpan::new(
                                Fraction::from_f64_limited(blink_start, 1_000_000),
                                Fraction::from_f64_limited(blink_end, 1_000_000),
                            );
                            if let Some(part) = whole.intersection(&span) {
                                let mut value = LightValue::for_light(light_id as i64);
                                if let Some(colors) = colors.as_ref().filter(|c| !c.is_empty()) {
                                    let mut color_rng =
                                        fastrand::Rng::with_seed((seed_val as u64).wrapping_add(blink_index as u64));
                                    let idx = color_rng.usize(0..colors.len());
                                    value = value.with_color(colors[idx]);
                                }
                                out.push(LightHap::new(Some(whole), part, value));
                            }
                        }
                        blink_index += 1;
                    }
                }
            }
            out
        })
    }

    /// Expands group-targeted events into a round-robin sequence through the
    /// group's lights. When `per_group` and the group is `all`, each
    /// physical group (`strip`, `lamps`, `ambient`) present in the context
    /// runs its own parallel sequence instead of one sequence over every
    /// light. The default slot count rounds a group's size up to the next
    /// power of two (minimum four) only once the group exceeds four lights;
    /// smaller groups always get four slots. The starting slot index each
    /// cycle is `(cycle_index * num_slots) mod group_size`, which produces
    /// phase-continuous wraparound across cycle boundaries.
    pub fn seq(&self, slots: Option<usize>, per_group: bool) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for hap in inner.query(span, ctx) {
                let Some(group_name) = hap.value.group.clone() else {
                    out.push(hap);
                    continue;
                };

                let whole = hap.whole_or_part();
                let cycle_index = whole.start.floor();

                let groups_to_expand: Vec<Vec<usize>> = if per_group && group_name == "all" {
                    ["strip", "lamps", "ambient"]
                        .iter()
                        .map(|g| ctx.resolve_group(g))
                        .filter(|idx| !idx.is_empty())
                        .collect()
                } else {
                    let idx = ctx.resolve_group(&group_name);
                    if idx.is_empty() {
                        Vec::new()
                    } else {
                        vec![idx]
                    }
                };

                for indices in groups_to_expand {
                    let group_size = indices.len();
                    let num_slots = slots.unwrap_or_else(|| default_seq_slots(group_size));
                    let start_index = (cycle_index * num_slots as i64).rem_euclid(group_size as i64) as usize;
                    let slot_dur = whole.duration() / Fraction::from_int(num_slots as i64);

                    for i in 0..num_slots {
                        let slot_start = whole.start + slot_dur * Fraction::from_int(i as i64);
                        let slot_whole = TimeSpan::new(slot_start, slot_start + slot_dur);
                        let Some(part) = slot_whole.intersection(&span) else { continue };
                        let light_id = indices[(start_index + i) % group_size];
                        let value = LightValue {
                            light_id: Some(light_id as i64),
                            group: None,
                            ..hap.value.clone()
                        };
                        out.push(LightHap::new(Some(slot_whole), part, value));
                    }
                }
            }
            out
        })
    }

    pub fn color(&self, spec: ColorSpec) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            inner
                .query(span, ctx)
                .into_iter()
                .map(|hap| {
                    let value = spec.apply_to(&hap.value);
                    hap.with_value(value)
                })
                .collect()
        })
    }

    /// Sets the envelope's flash (attack) and/or fade (decay/sustain) color
    /// slots, merging into any envelope already attached.
    pub fn color_envelope(&self, flash: Option<ColorSpec>, fade: Option<ColorSpec>) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            inner
                .query(span, ctx)
                .into_iter()
                .map(|hap| {
                    let mut env = hap.value.envelope.unwrap_or_default();
                    if let Some(flash) = &flash {
                        env = match flash {
                            ColorSpec::Literal(c) => env.with_colors(Some(*c), None),
                            ColorSpec::Ref(r) => env.with_flash_ref(*r),
                        };
                    }
                    if let Some(fade) = &fade {
                        env = match fade {
                            ColorSpec::Literal(c) => env.with_colors(None, Some(*c)),
                            ColorSpec::Ref(r) => env.with_fade_ref(*r),
                        };
                    }
                    let value = hap.value.with_envelope(env);
                    hap.with_value(value)
                })
                .collect()
        })
    }

    pub fn intensity(&self, v: f64) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            inner
                .query(span, ctx)
                .into_iter()
                .map(|hap| {
                    let value = hap.value.with_intensity(hap.value.intensity * v);
                    hap.with_value(value)
                })
                .collect()
        })
    }

    /// Attaches ADSR parameters, merging with any envelope already present
    /// (the new envelope's non-default fields win; see `Envelope::merge`).
    pub fn envelope(&self, attack: f64, decay: f64, sustain: f64, release: f64) -> LightPattern {
        let inner = self.clone();
        let new_env = Envelope::new(attack, decay, sustain, release);
        LightPattern::new(move |span, ctx| {
            inner
                .query(span, ctx)
                .into_iter()
                .map(|hap| {
                    let merged = new_env.merge(hap.value.envelope.as_ref());
                    let value = hap.value.with_envelope(merged);
                    hap.with_value(value)
                })
                .collect()
        })
    }

    /// Attaches a modulator keyed to absolute cycle position, chaining with
    /// any modulator already present.
    pub fn modulate(&self, modulator: Modulator) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            inner
                .query(span, ctx)
                .into_iter()
                .map(|hap| {
                    let m = match &hap.value.modulator {
                        Some(existing) => existing.chain(&modulator),
                        None => modulator.clone(),
                    };
                    let value = hap.value.with_modulator(m);
                    hap.with_value(value)
                })
                .collect()
        })
    }

    /// Like `modulate`, but resolves each event's group into its individual
    /// lights immediately and assigns each one a phase offset
    /// `-(index / group_size) * direction`, producing a traveling wave
    /// across the resolved light list. With `event_relative`, the
    /// modulator's reference time is pinned to the event's own start so
    /// every event restarts the wave from the beginning.
    pub fn wave(
        &self,
        wave: WaveType,
        frequency: f64,
        min: f64,
        max: f64,
        direction: f64,
        event_relative: bool,
    ) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let mut out = Vec::new();
            for hap in inner.query(span, ctx) {
                let (lights, group_size): (Vec<usize>, usize) = match (hap.value.light_id, &hap.value.group) {
                    (Some(id), _) => (vec![id as usize], ctx.num_lights.max(1)),
                    (None, Some(g)) => {
                        let idx = ctx.resolve_group(g);
                        let n = idx.len().max(1);
                        (idx, n)
                    }
                    _ => (Vec::new(), 1),
                };
                let is_group = hap.value.group.is_some();
                for (i, light_id) in lights.iter().enumerate() {
                    let position = if is_group { i as f64 } else { *light_id as f64 };
                    let phase_offset = -(position / group_size as f64) * direction;
                    let mut m = Modulator::new(wave, frequency).with_range(min, max).with_phase(phase_offset);
                    if event_relative {
                        m = m.with_reference_time(hap.whole_or_part().start.to_f64());
                    }
                    let combined = match &hap.value.modulator {
                        Some(existing) => existing.chain(&m),
                        None => m,
                    };
                    let value = LightValue {
                        light_id: Some(*light_id as i64),
                        group: None,
                        modulator: Some(combined),
                        ..hap.value.clone()
                    };
                    out.push(LightHap::new(hap.whole, hap.part, value));
                }
            }
            out
        })
    }

    /// Restricts output to the named zone's lights. If the zone isn't
    /// available and `fallback` is given (`"all"` meaning every light, any
    /// other name a group), lights are restricted to the fallback instead.
    /// With no matching zone and no fallback, nothing is emitted.
    pub fn zone(&self, name: String, fallback: Option<String>) -> LightPattern {
        let inner = self.clone();
        LightPattern::new(move |span, ctx| {
            let events = inner.query(span, ctx);
            if ctx.has_zone(&name) {
                let allowed = ctx.resolve_zone(&name);
                return restrict_to_lights(events, ctx, &allowed);
            }
            match &fallback {
                Some(f) if f == "all" => events,
                Some(f) => {
                    let allowed = ctx.resolve_group(f);
                    restrict_to_lights(events, ctx, &allowed)
                }
                None => Vec::new(),
            }
        })
    }
}

fn default_seq_slots(group_size: usize) -> usize {
    if group_size > 4 {
        group_size.next_power_of_two()
    } else {
        4
    }
}

fn restrict_to_lights(events: Vec<LightHap>, ctx: &LightContext, allowed: &[usize]) -> Vec<LightHap> {
    if allowed.is_empty() {
        return Vec::new();
    }
    let allowed_set: HashSet<usize> = allowed.iter().copied().collect();
    let mut out = Vec::new();
    for hap in events {
        match (hap.value.light_id, &hap.value.group) {
            (Some(id), _) => {
                if allowed_set.contains(&(id as usize)) {
                    out.push(hap);
                }
            }
            (None, Some(g)) => {
                for light_id in ctx.resolve_group(g) {
                    if allowed_set.contains(&light_id) {
                        let value = LightValue {
                            light_id: Some(light_id as i64),
                            group: None,
                            ..hap.value.clone()
                        };
                        out.push(LightHap::new(hap.whole, hap.part, value));
                    }
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LightContext {
        LightContext::default_context(6)
    }

    #[test]
    fn light_replays_across_cycle_boundaries() {
        let p = light("0 1 2");
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::from_int(2)), &ctx());
        assert_eq!(events.len(), 6, "two full cycles of three events each");
    }

    #[test]
    fn stack_concatenates_children() {
        let p = stack(vec![light_ids(&[0]), light_ids(&[1])]);
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn cat_alternates_children_by_cycle() {
        let p = cat(vec![light_ids(&[0]), light_ids(&[1])]);
        let c0 = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let c1 = p.query(TimeSpan::new(Fraction::ONE, Fraction::from_int(2)), &ctx());
        assert_eq!(c0[0].value.light_id, Some(0));
        assert_eq!(c1[0].value.light_id, Some(1));
    }

    #[test]
    fn fast_compresses_k_copies_into_one_cycle() {
        let p = light_ids(&[0]);
        let fast2 = p.fast(Fraction::from_int(2));
        let events = fast2.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert_eq!(events.len(), 2, "fast(2) plays two copies per cycle");
    }

    #[test]
    fn fast_then_slow_is_identity() {
        let p = light("0 1");
        let roundtrip = p.fast(Fraction::new(3, 1)).slow(Fraction::new(3, 1));
        let original = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let via = roundtrip.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert_eq!(original.len(), via.len());
        for (a, b) in original.iter().zip(via.iter()) {
            assert_eq!(a.part, b.part);
            assert_eq!(a.value.light_id, b.value.light_id);
        }
    }

    #[test]
    fn shuffle_keeps_timings_permutes_values() {
        let p = light("0 1 2").shuffle(Some(7));
        let timed = light("0 1 2");
        let shuffled_events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let timed_events = timed.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let mut shuffled_ids: Vec<i64> = shuffled_events.iter().filter_map(|e| e.value.light_id).collect();
        let mut timed_ids: Vec<i64> = timed_events.iter().filter_map(|e| e.value.light_id).collect();
        shuffled_ids.sort();
        timed_ids.sort();
        assert_eq!(shuffled_ids, timed_ids, "same set of values, just reordered");
        for (a, b) in shuffled_events.iter().zip(timed_events.iter()) {
            assert_eq!(a.part, b.part, "timings unchanged by shuffle");
        }
    }

    #[test]
    fn shuffle_is_stable_across_queries_of_the_same_cycle() {
        let p = light("0 1 2 3").shuffle(Some(1));
        let a = p.query(TimeSpan::new(Fraction::ZERO, Fraction::new(1, 2)), &ctx());
        let b = p.query(TimeSpan::new(Fraction::ZERO, Fraction::new(1, 2)), &ctx());
        let ids_a: Vec<_> = a.iter().filter_map(|e| e.value.light_id).collect();
        let ids_b: Vec<_> = b.iter().filter_map(|e| e.value.light_id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn rev_mirrors_times_around_cycle_center() {
        let p = light("0 1").rev();
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let mut sorted = events;
        sorted.sort_by_key(|e| e.part.start);
        assert_eq!(sorted[0].value.light_id, Some(1));
        assert_eq!(sorted[1].value.light_id, Some(0));
    }

    #[test]
    fn seq_expands_all_into_exactly_n_slots() {
        let p = light_ids(&[]);
        let p = LightPattern::new(move |span, ctx| {
            let _ = &p;
            vec![LightHap::new(
                Some(TimeSpan::new(Fraction::ZERO, Fraction::ONE)),
                span,
                LightValue::for_group("all"),
            )]
        });
        let seq = p.seq(Some(4), false);
        let events = seq.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert_eq!(events.len(), 4);
        for e in &events {
            assert_eq!(e.whole_or_part().duration(), Fraction::new(1, 4));
            let id = e.value.light_id.unwrap();
            assert!((0..6).contains(&id));
        }
    }

    #[test]
    fn seq_per_group_runs_parallel_sequences_per_physical_group() {
        let mut groups = std::collections::HashMap::new();
        groups.insert("strip".to_string(), vec![0, 1]);
        groups.insert("lamps".to_string(), vec![2, 3, 4, 5]);
        let six_light_ctx = LightContext::new(6, groups);

        let p = LightPattern::new(|_span, _ctx| {
            vec![LightHap::new(
                Some(TimeSpan::new(Fraction::ZERO, Fraction::ONE)),
                TimeSpan::new(Fraction::ZERO, Fraction::ONE),
                LightValue::for_group("all"),
            )]
        });
        let seq = p.seq(None, true);

        let at_beat_0 = seq.query(TimeSpan::new(Fraction::ZERO, Fraction::new(1, 1000)), &six_light_ctx);
        let mut lights_0: Vec<i64> = at_beat_0.iter().filter_map(|e| e.value.light_id).collect();
        lights_0.sort();
        assert_eq!(lights_0, vec![0, 2]);

        let at_beat_1 = seq.query(
            TimeSpan::new(Fraction::new(1, 4), Fraction::new(251, 1000)),
            &six_light_ctx,
        );
        let mut lights_1: Vec<i64> = at_beat_1.iter().filter_map(|e| e.value.light_id).collect();
        lights_1.sort();
        assert_eq!(lights_1, vec![1, 3]);
    }

    #[test]
    fn pick_selects_subset_of_group() {
        let p = light_ids(&[]);
        let p = LightPattern::new(move |span, _ctx| {
            let _ = &p;
            vec![LightHap::new(None, span, LightValue::for_group("all"))]
        });
        let picked = p.pick(1.0, Some(2.0), Some(1), None);
        let events = picked.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert!(events.len() >= 1 && events.len() <= 2);
        for e in &events {
            assert!(e.value.light_id.is_some());
        }
    }

    #[test]
    fn pick_passes_through_light_targeted_events() {
        let p = light_ids(&[2]);
        let picked = p.pick(0.5, None, Some(1), None);
        let events = picked.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value.light_id, Some(2));
    }

    #[test]
    fn zone_restricts_to_zone_lights() {
        let mut zones = std::collections::HashMap::new();
        zones.insert("ceiling".to_string(), vec![0, 1]);
        let zoned_ctx = LightContext::with_zones(6, std::collections::HashMap::new(), zones);
        let p = light_ids(&[0, 1, 2]).zone("ceiling".to_string(), None);
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &zoned_ctx);
        let mut ids: Vec<i64> = events.iter().filter_map(|e| e.value.light_id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn zone_with_no_fallback_emits_nothing_when_unavailable() {
        let p = light_ids(&[0]).zone("ceiling".to_string(), None);
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert!(events.is_empty());
    }

    #[test]
    fn envelope_merges_with_existing() {
        let p = light_ids(&[0]).envelope(0.1, 0.0, 1.0, 0.0).envelope(0.0, 2.0, 0.3, 1.0);
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        let env = events[0].value.envelope.unwrap();
        assert_eq!(env.attack, 0.1, "new envelope's zero attack falls back to prior");
        assert_eq!(env.decay, 2.0);
    }

    #[test]
    fn intensity_multiplies() {
        let p = light_ids(&[0]).intensity(0.5).intensity(0.5);
        let events = p.query(TimeSpan::new(Fraction::ZERO, Fraction::ONE), &ctx());
        assert!((events[0].value.intensity - 0.25).abs() < 1e-9);
    }
}
