//! In-process fallback engine: a small two-oscillator subtractive voice bank.

use super::SynthEngine;
use super::modifiers::{AdsrEnvelope, LadderFilter};
use super::vco::{FmOperator, FmRatios, Oscillator, Waveform, midi_to_frequency, semitones_to_ratio};
use crate::command::{ApplyError, Envelope, LfoSettings, MAX_VOICES, OscIndex, OscSettings};

const LFO_PITCH: u8 = 0;
const LFO_CUTOFF: u8 = 1;
const LFO_MASTER: u8 = 2;
const LFO_RESONANCE: u8 = 3;
const LFO_OSC1_GAIN: u8 = 4;
const LFO_OSC2_GAIN: u8 = 5;
const LFO_FM1_INDEX: u8 = 6;
const LFO_FM2_INDEX: u8 = 7;

#[derive(Clone, Copy)]
struct OscPatch {
    waveform: Waveform,
    detune: f32,
    gain: f32,
    fm: FmRatios,
}

impl Default for OscPatch {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            detune: 0.0,
            gain: 0.5,
            fm: FmRatios::default(),
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Voice {
    midi: Option<u8>,
    frequency: f32,
    velocity: f32,
    gate: bool,
    osc: [Oscillator; 2],
    fm: [FmOperator; 2],
    amp_env: AdsrEnvelope,
    filter_env: AdsrEnvelope,
    filter: LadderFilter,
}

impl Voice {
    fn is_sounding(&self) -> bool {
        self.gate || !self.amp_env.is_idle()
    }

    fn start(&mut self, midi: u8, velocity: f32) {
        self.midi = Some(midi);
        self.frequency = midi_to_frequency(midi);
        self.velocity = velocity.clamp(0.0, 1.0);
        self.gate = true;
        if self.amp_env.is_idle() {
            self.osc.iter_mut().for_each(Oscillator::reset);
            self.fm.iter_mut().for_each(FmOperator::reset);
            self.filter.reset();
        }
        self.amp_env.trigger();
        self.filter_env.trigger();
    }

    fn stop(&mut self) {
        self.gate = false;
        self.amp_env.release();
        self.filter_env.release();
    }
}

pub struct ToneEngine {
    sample_rate: f32,
    voices: [Voice; MAX_VOICES as usize],
    poly: usize,
    steal_cursor: usize,
    osc: [OscPatch; 2],
    master: f32,
    amp_env: Envelope,
    filter_env: Envelope,
    cutoff: f32,
    resonance: f32,
    filter_amount: f32,
    lfo: Oscillator,
    lfo_rate: f32,
    lfo_amount: f32,
    lfo_dest: u8,
}

impl Default for ToneEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneEngine {
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000.0,
            voices: [Voice::default(); MAX_VOICES as usize],
            poly: 8,
            steal_cursor: 0,
            osc: [OscPatch::default(); 2],
            master: 0.4,
            amp_env: Envelope::AMP_DEFAULT,
            filter_env: Envelope::FILTER_DEFAULT,
            cutoff: 1_200.0,
            resonance: 0.3,
            filter_amount: 2_000.0,
            lfo: Oscillator::default(),
            lfo_rate: 5.0,
            lfo_amount: 0.0,
            lfo_dest: LFO_PITCH,
        }
    }

    /// Pitches of the voices whose gate is open.
    #[cfg(test)]
    pub(crate) fn gated_notes(&self) -> Vec<u8> {
        self.voices
            .iter()
            .filter(|voice| voice.gate)
            .filter_map(|voice| voice.midi)
            .collect()
    }

    fn allocate_voice(&mut self) -> usize {
        if let Some(index) = self.voices[..self.poly]
            .iter()
            .position(|voice| !voice.is_sounding())
        {
            return index;
        }
        let index = self.steal_cursor % self.poly;
        self.steal_cursor = self.steal_cursor.wrapping_add(1);
        index
    }

    fn lfo_offset(&self, dest: u8, lfo: f32) -> f32 {
        if self.lfo_dest == dest {
            self.lfo_amount * lfo
        } else {
            0.0
        }
    }

    fn next_sample(&mut self) -> f32 {
        let sr = self.sample_rate;
        let dt = 1.0 / sr;
        let lfo = self.lfo.next(Waveform::Sine, self.lfo_rate, sr);
        let pitch_mul = semitones_to_ratio(self.lfo_offset(LFO_PITCH, lfo));
        let cutoff_mod = self.lfo_offset(LFO_CUTOFF, lfo);
        let resonance = (self.resonance + self.lfo_offset(LFO_RESONANCE, lfo)).clamp(0.0, 1.0);
        let master = (self.master + self.lfo_offset(LFO_MASTER, lfo)).clamp(0.0, 2.0);
        let gains = [
            (self.osc[0].gain + self.lfo_offset(LFO_OSC1_GAIN, lfo)).clamp(0.0, 2.0),
            (self.osc[1].gain + self.lfo_offset(LFO_OSC2_GAIN, lfo)).clamp(0.0, 2.0),
        ];
        let fm_index = [
            (self.osc[0].fm.index + self.lfo_offset(LFO_FM1_INDEX, lfo)).max(0.0),
            (self.osc[1].fm.index + self.lfo_offset(LFO_FM2_INDEX, lfo)).max(0.0),
        ];
        let nyquist_guard = 0.5 * sr - 100.0;

        let mut mix = 0.0;
        for voice in self.voices[..self.poly].iter_mut() {
            if !voice.is_sounding() {
                continue;
            }
            let mut raw = 0.0;
            for (slot, patch) in self.osc.iter().enumerate() {
                let frequency = voice.frequency * pitch_mul * semitones_to_ratio(patch.detune);
                let sample = match patch.waveform {
                    Waveform::Fm => voice.fm[slot].next(frequency, &patch.fm, fm_index[slot], sr),
                    waveform => voice.osc[slot].next(waveform, frequency, sr),
                };
                raw += sample * gains[slot];
            }

            let contour = voice.filter_env.advance(dt, &self.filter_env);
            let cutoff = (self.cutoff + self.filter_amount * contour + cutoff_mod)
                .clamp(20.0, nyquist_guard.max(20.0));
            let filtered = voice.filter.process(raw, cutoff, resonance, dt);
            let level = voice.amp_env.advance(dt, &self.amp_env);
            mix += filtered * level * voice.velocity * master;

            if !voice.gate && voice.amp_env.is_idle() {
                voice.midi = None;
            }
        }
        mix
    }
}

impl SynthEngine for ToneEngine {
    fn name(&self) -> &str {
        "tone"
    }

    fn init(&mut self, sample_rate: u32, _table_size: usize) {
        *self = Self::new();
        self.sample_rate = sample_rate.max(1) as f32;
    }

    fn render(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }

    fn set_wave(&mut self, wave: i32) -> Result<(), ApplyError> {
        let waveform = Waveform::from_code(wave);
        for patch in self.osc.iter_mut() {
            patch.waveform = waveform;
        }
        Ok(())
    }

    fn note_on(&mut self, midi: u8, velocity: f32) -> Result<(), ApplyError> {
        let index = self.allocate_voice();
        self.voices[index].start(midi, velocity);
        Ok(())
    }

    fn note_off(&mut self, midi: Option<u8>) -> Result<(), ApplyError> {
        for voice in self.voices.iter_mut().filter(|voice| voice.gate) {
            if midi.is_none() || voice.midi == midi {
                voice.stop();
            }
        }
        Ok(())
    }

    fn set_amp(&mut self, amp: f32) -> Result<(), ApplyError> {
        self.master = amp;
        Ok(())
    }

    fn set_osc(&mut self, index: OscIndex, settings: &OscSettings) -> Result<(), ApplyError> {
        let patch = &mut self.osc[index.slot()];
        patch.waveform = Waveform::from_code(settings.wave);
        patch.detune = settings.detune;
        if let Some(gain) = settings.gain {
            patch.gain = gain;
        }
        patch.fm.car = settings.fm_car.unwrap_or(patch.fm.car);
        patch.fm.modulator = settings.fm_mod.unwrap_or(patch.fm.modulator);
        patch.fm.index = settings.fm_indx.unwrap_or(patch.fm.index);
        Ok(())
    }

    fn set_filter(&mut self, cutoff: f32, resonance: f32) -> Result<(), ApplyError> {
        self.cutoff = cutoff;
        self.resonance = resonance;
        Ok(())
    }

    fn set_filter_env(&mut self, env: &Envelope) -> Result<(), ApplyError> {
        self.filter_env = *env;
        Ok(())
    }

    fn set_filter_amount(&mut self, amount: f32) -> Result<(), ApplyError> {
        self.filter_amount = amount;
        Ok(())
    }

    fn set_lfo(&mut self, lfo: &LfoSettings) -> Result<(), ApplyError> {
        self.lfo_rate = lfo.rate;
        self.lfo_amount = lfo.amount;
        if let Some(dest) = lfo.dest {
            self.lfo_dest = dest;
        }
        Ok(())
    }

    fn set_env(&mut self, env: &Envelope) -> Result<(), ApplyError> {
        self.amp_env = *env;
        Ok(())
    }

    fn set_poly(&mut self, voices: u8) -> Result<(), ApplyError> {
        let voices = usize::from(voices.clamp(1, MAX_VOICES));
        for voice in self.voices[voices..].iter_mut() {
            *voice = Voice::default();
        }
        self.poly = voices;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::rms;

    fn engine() -> ToneEngine {
        let mut engine = ToneEngine::new();
        engine.init(48_000, 2048);
        engine
    }

    #[test]
    fn silent_without_notes() {
        let mut engine = engine();
        let mut block = [1.0f32; 256];
        engine.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn note_on_produces_signal_and_note_off_decays() {
        let mut engine = engine();
        engine.set_wave(1).unwrap();
        engine.note_on(57, 1.0).unwrap();
        let mut block = vec![0.0f32; 4_800];
        engine.render(&mut block);
        assert!(rms(&block) > 1e-3);

        engine.note_off(None).unwrap();
        for _ in 0..40 {
            engine.render(&mut block);
        }
        assert!(rms(&block) < 1e-4);
    }

    #[test]
    fn voices_are_stolen_round_robin_when_full() {
        let mut engine = engine();
        engine.set_poly(2).unwrap();
        engine.note_on(60, 1.0).unwrap();
        engine.note_on(62, 1.0).unwrap();
        engine.note_on(64, 1.0).unwrap();
        let held: Vec<Option<u8>> = engine.voices[..2].iter().map(|v| v.midi).collect();
        assert_eq!(held, vec![Some(64), Some(62)]);
    }

    #[test]
    fn per_note_release_only_gates_matching_voice() {
        let mut engine = engine();
        engine.note_on(60, 1.0).unwrap();
        engine.note_on(67, 1.0).unwrap();
        engine.note_off(Some(60)).unwrap();
        assert!(!engine.voices[0].gate);
        assert!(engine.voices[1].gate);
    }
}
