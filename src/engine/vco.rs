use std::f32::consts::TAU;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Triangle,
    Fm,
}

impl Waveform {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Waveform::Saw,
            2 => Waveform::Square,
            3 => Waveform::Triangle,
            4 => Waveform::Fm,
            _ => Waveform::Sine,
        }
    }

    /// Naive sample at `phase` in `0..1`; `Fm` is produced by [`FmOperator`] instead.
    pub fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Saw => 2.0 * (phase - 0.5),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 4.0 * (phase - 0.5).abs() - 1.0,
            Waveform::Sine | Waveform::Fm => (phase * TAU).sin(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Oscillator {
    phase: f32,
}

impl Oscillator {
    pub fn next(&mut self, waveform: Waveform, frequency: f32, sample_rate: f32) -> f32 {
        let value = waveform.sample(self.phase);
        self.phase = (self.phase + frequency / sample_rate).fract();
        value
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Two-operator FM: a sine carrier whose phase is pushed by a sine modulator.
#[derive(Clone, Copy, Debug, Default)]
pub struct FmOperator {
    carrier: f32,
    modulator: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FmRatios {
    pub car: f32,
    pub modulator: f32,
    pub index: f32,
}

impl Default for FmRatios {
    fn default() -> Self {
        Self {
            car: 1.0,
            modulator: 1.0,
            index: 2.0,
        }
    }
}

impl FmOperator {
    pub fn next(&mut self, frequency: f32, ratios: &FmRatios, index: f32, sample_rate: f32) -> f32 {
        let modulation = (self.modulator * TAU).sin() * index;
        let value = (self.carrier * TAU + modulation).sin();
        self.carrier = (self.carrier + frequency * ratios.car / sample_rate).fract();
        self.modulator = (self.modulator + frequency * ratios.modulator / sample_rate).fract();
        value
    }

    pub fn reset(&mut self) {
        self.carrier = 0.0;
        self.modulator = 0.0;
    }
}

pub fn midi_to_frequency(midi: u8) -> f32 {
    440.0 * 2.0f32.powf((f32::from(midi) - 69.0) / 12.0)
}

pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2.0f32.powf(semitones / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-3);
        assert!((midi_to_frequency(81) - 880.0).abs() < 1e-2);
    }

    #[test]
    fn unknown_codes_fall_back_to_sine() {
        assert_eq!(Waveform::from_code(3), Waveform::Triangle);
        assert_eq!(Waveform::from_code(99), Waveform::Sine);
    }

    #[test]
    fn oscillator_stays_in_range() {
        let mut osc = Oscillator::default();
        for _ in 0..1000 {
            let sample = osc.next(Waveform::Saw, 440.0, 48_000.0);
            assert!((-1.0..=1.0).contains(&sample));
        }
    }
}
