//! 24-PPQN MIDI clock consumption: tick/beat counting, BPM estimation, and
//! transport (start/stop/continue/song-position) handling. Ported from
//! `midi_pattern_mode.py`'s MIDI input callback state machine.

use std::time::Instant;

use crate::midi::{CONTINUE, SONG_POSITION_POINTER, START, STOP, TIMING_CLOCK};

pub const TICKS_PER_BEAT: u32 = 24;

/// Rolling tick-interval window used for BPM estimation; long enough to
/// smooth jitter, short enough to track a tempo change within a couple beats.
const BPM_WINDOW: usize = 24;

/// Running state for a 24-PPQN clock feed. `beat_count` is 1-based (matches
/// the bar/beat-in-bar arithmetic elsewhere); `tick_count` is the sub-beat
/// pulse offset in `[0, TICKS_PER_BEAT)`.
pub struct ClockConsumer {
    pub running: bool,
    pub beat_count: u32,
    pub tick_count: u32,
    pub bpm: f64,
    last_tick_at: Option<Instant>,
    tick_intervals: Vec<f64>,
}

impl Default for ClockConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockConsumer {
    pub fn new() -> Self {
        Self {
            running: false,
            beat_count: 1,
            tick_count: 0,
            bpm: 120.0,
            last_tick_at: None,
            tick_intervals: Vec::with_capacity(BPM_WINDOW),
        }
    }

    /// `beat_position = (beat_count - 1) + tick_count / TICKS_PER_BEAT`.
    pub fn beat_position(&self) -> f64 {
        (self.beat_count.saturating_sub(1)) as f64 + self.tick_count as f64 / TICKS_PER_BEAT as f64
    }

    /// Dispatches a single raw MIDI realtime/system byte sequence. `now` is
    /// injected so clock handling stays independent of the wall clock in
    /// tests.
    pub fn handle_message(&mut self, message: &[u8], now: Instant) {
        let Some(&status) = message.first() else { return };
        match status {
            TIMING_CLOCK => self.tick(now),
            START => self.start(),
            CONTINUE => self.running = true,
            STOP => self.running = false,
            SONG_POSITION_POINTER => {
                if let [_, lsb, msb] = message {
                    let position = ((*msb as u16) << 7 | (*lsb as u16 & 0x7F)) as u32;
                    self.set_song_position(position);
                }
            }
            _ => {}
        }
    }

    fn tick(&mut self, now: Instant) {
        if !self.running {
            return;
        }

        if let Some(last) = self.last_tick_at {
            let interval = now.duration_since(last).as_secs_f64();
            if interval > 0.0 {
                self.tick_intervals.push(interval);
                if self.tick_intervals.len() > BPM_WINDOW {
                    self.tick_intervals.remove(0);
                }
                self.recompute_bpm();
            }
        }
        self.last_tick_at = Some(now);

        self.tick_count += 1;
        if self.tick_count >= TICKS_PER_BEAT {
            self.tick_count = 0;
            self.beat_count += 1;
        }
    }

    fn recompute_bpm(&mut self) {
        if self.tick_intervals.is_empty() {
            return;
        }
        let mean_interval: f64 = self.tick_intervals.iter().sum::<f64>() / self.tick_intervals.len() as f64;
        if mean_interval > 0.0 {
            self.bpm = 60.0 / (mean_interval * TICKS_PER_BEAT as f64);
        }
    }

    fn start(&mut self) {
        self.running = true;
        self.tick_count = 0;
        self.beat_count = 1;
        self.last_tick_at = None;
        self.tick_intervals.clear();
    }

    /// `beat_count = pos/4 + 1, tick_count = (pos mod 4) * 6`.
    fn set_song_position(&mut self, position: u32) {
        self.tick_count = (position % 4) * 6;
        self.beat_count = position / 4 + 1;
        self.last_tick_at = None;
    }

    /// Quantized reset to the top of beat 1, used by the control server's
    /// `sync` command (`beat_position = 0`).
    pub fn reset(&mut self) {
        self.beat_count = 1;
        self.tick_count = 0;
        self.last_tick_at = None;
        self.tick_intervals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_resets_to_beat_one() {
        let mut clock = ClockConsumer::new();
        clock.handle_message(&[START], Instant::now());
        assert!(clock.running);
        assert_eq!(clock.beat_count, 1);
        assert_eq!(clock.tick_count, 0);
        assert_eq!(clock.beat_position(), 0.0);
    }

    #[test]
    fn twenty_four_ticks_advance_one_beat() {
        let mut clock = ClockConsumer::new();
        let mut now = Instant::now();
        clock.handle_message(&[START], now);
        for _ in 0..TICKS_PER_BEAT {
            now += Duration::from_millis(20);
            clock.handle_message(&[TIMING_CLOCK], now);
        }
        assert_eq!(clock.beat_count, 2);
        assert_eq!(clock.tick_count, 0);
        assert_eq!(clock.beat_position(), 1.0);
    }

    #[test]
    fn stop_halts_tick_processing() {
        let mut clock = ClockConsumer::new();
        let now = Instant::now();
        clock.handle_message(&[START], now);
        clock.handle_message(&[STOP], now);
        assert!(!clock.running);
        clock.handle_message(&[TIMING_CLOCK], now + Duration::from_millis(20));
        assert_eq!(clock.tick_count, 0);
    }

    #[test]
    fn song_position_pointer_sets_beat_and_tick() {
        let mut clock = ClockConsumer::new();
        // position 10 -> beat_count = 10/4+1 = 3, tick_count = (10%4)*6 = 12
        clock.handle_message(&[SONG_POSITION_POINTER, 10, 0], Instant::now());
        assert_eq!(clock.beat_count, 3);
        assert_eq!(clock.tick_count, 12);
    }

    #[test]
    fn bpm_estimate_tracks_steady_tick_interval() {
        let mut clock = ClockConsumer::new();
        let mut now = Instant::now();
        clock.handle_message(&[START], now);
        // 120 BPM -> 0.5s/beat -> 24 ticks/beat -> ~20.833ms/tick
        let interval = Duration::from_micros(20_833);
        for _ in 0..(TICKS_PER_BEAT * 4) {
            now += interval;
            clock.handle_message(&[TIMING_CLOCK], now);
        }
        assert!((clock.bpm - 120.0).abs() < 1.0, "expected ~120 bpm, got {}", clock.bpm);
    }

    #[test]
    fn reset_returns_to_beat_one_without_stopping() {
        let mut clock = ClockConsumer::new();
        let mut now = Instant::now();
        clock.handle_message(&[START], now);
        for _ in 0..30 {
            now += Duration::from_millis(20);
            clock.handle_message(&[TIMING_CLOCK], now);
        }
        clock.reset();
        assert!(clock.running);
        assert_eq!(clock.beat_position(), 0.0);
    }
}
