//! LFO-style intensity modulators, independent of the envelope system.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveType {
    Sine,
    Triangle,
    Saw,
    Square,
}

/// A periodic intensity multiplier driven by cycle position. Modulators can
/// be chained: the product of each link's own `get_intensity` is returned,
/// every link evaluated against the same absolute `cycle_position`.
#[derive(Clone, Debug)]
pub struct Modulator {
    pub wave: WaveType,
    pub frequency: f64,
    pub min_intensity: f64,
    pub max_intensity: f64,
    pub phase: f64,
    pub reference_time: f64,
    chain: Vec<Modulator>,
}

impl Default for Modulator {
    fn default() -> Self {
        Modulator {
            wave: WaveType::Sine,
            frequency: 1.0,
            min_intensity: 0.0,
            max_intensity: 1.0,
            phase: 0.0,
            reference_time: 0.0,
            chain: Vec::new(),
        }
    }
}

impl Modulator {
    pub fn new(wave: WaveType, frequency: f64) -> Self {
        Modulator {
            wave,
            frequency,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, min_intensity: f64, max_intensity: f64) -> Self {
        self.min_intensity = min_intensity;
        self.max_intensity = max_intensity;
        self
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_reference_time(mut self, reference_time: f64) -> Self {
        self.reference_time = reference_time;
        self
    }

    fn wave_value(&self, t: f64) -> f64 {
        let t = t.rem_euclid(1.0);
        match self.wave {
            WaveType::Sine => (t * std::f64::consts::TAU).sin() * 0.5 + 0.5,
            WaveType::Triangle => {
                if t < 0.5 {
                    t * 2.0
                } else {
                    2.0 - t * 2.0
                }
            }
            WaveType::Saw => t,
            WaveType::Square => {
                if t < 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn get_intensity(&self, cycle_position: f64) -> f64 {
        let relative_position = cycle_position - self.reference_time;
        let t = relative_position * self.frequency + self.phase;
        let wave_value = self.wave_value(t);
        let mut intensity = self.min_intensity + wave_value * (self.max_intensity - self.min_intensity);
        for link in &self.chain {
            intensity *= link.get_intensity(cycle_position);
        }
        intensity
    }

    /// Returns a new modulator whose chain is the flat concatenation of
    /// `self`'s existing chain, `other`'s existing chain, and `other` itself
    /// (with `other`'s own chain cleared) — chains never nest.
    pub fn chain(&self, other: &Modulator) -> Modulator {
        let mut combined = self.chain.clone();
        if !other.chain.is_empty() {
            combined.extend(other.chain.clone());
        }
        let mut bare_other = other.clone();
        bare_other.chain = Vec::new();
        combined.push(bare_other);

        Modulator {
            wave: self.wave,
            frequency: self.frequency,
            min_intensity: self.min_intensity,
            max_intensity: self.max_intensity,
            phase: self.phase,
            reference_time: self.reference_time,
            chain: combined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_at_zero_is_midpoint() {
        let m = Modulator::new(WaveType::Sine, 1.0);
        assert!((m.get_intensity(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn square_switches_at_half_period() {
        let m = Modulator::new(WaveType::Square, 1.0);
        assert_eq!(m.get_intensity(0.0), 1.0);
        assert_eq!(m.get_intensity(0.5), 0.0);
    }

    #[test]
    fn range_rescales_output() {
        let m = Modulator::new(WaveType::Square, 1.0).with_range(0.2, 0.8);
        assert!((m.get_intensity(0.0) - 0.8).abs() < 1e-9);
        assert!((m.get_intensity(0.5) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn chain_multiplies_and_flattens() {
        let a = Modulator::new(WaveType::Square, 1.0);
        let b = Modulator::new(WaveType::Square, 1.0).with_phase(0.5);
        let chained = a.chain(&b);
        assert_eq!(chained.chain.len(), 1);
        // a=1.0 at t=0, b has phase 0.5 so at cycle_position=0 it's square(0.5)=0.0
        assert_eq!(chained.get_intensity(0.0), 0.0);

        let c = Modulator::new(WaveType::Sine, 2.0);
        let nested = chained.chain(&c);
        assert_eq!(nested.chain.len(), 2, "chaining must flatten, never nest");
    }
}
