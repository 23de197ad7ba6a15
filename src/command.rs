//! Control commands sent from the UI thread to the render thread.
//!
//! The serialized form of [`Command`] is the wire schema: an object with a
//! `type` tag plus the fields of that tag.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const MIDI_MAX: u8 = 127;
pub const MAX_VOICES: u8 = 16;
pub const WAVE_FM: i32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OscIndex {
    Osc1,
    Osc2,
}

impl OscIndex {
    pub fn slot(self) -> usize {
        match self {
            OscIndex::Osc1 => 0,
            OscIndex::Osc2 => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OscIndex::Osc1 => "osc1",
            OscIndex::Osc2 => "osc2",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscSettings {
    pub wave: i32,
    pub detune: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fm_car: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fm_mod: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fm_indx: Option<f32>,
}

impl OscSettings {
    pub fn has_fm(&self) -> bool {
        self.fm_car.is_some() || self.fm_mod.is_some() || self.fm_indx.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Envelope {
    pub const AMP_DEFAULT: Envelope = Envelope {
        attack: 0.01,
        decay: 0.1,
        sustain: 0.8,
        release: 0.2,
    };

    pub const FILTER_DEFAULT: Envelope = Envelope {
        attack: 0.005,
        decay: 0.15,
        sustain: 0.0,
        release: 0.25,
    };

    fn values(&self) -> [f32; 4] {
        [self.attack, self.decay, self.sustain, self.release]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LfoSettings {
    pub rate: f32,
    pub amount: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub midi: u8,
    pub velocity: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Wave {
        value: i32,
    },
    Osc1(OscSettings),
    Osc2(OscSettings),
    NoteOn {
        midi: u8,
        velocity: f32,
    },
    NoteOff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        midi: Option<u8>,
    },
    Amp {
        value: f32,
    },
    Filter {
        cutoff: f32,
        resonance: f32,
    },
    Fenv(Envelope),
    Famt {
        amount: f32,
    },
    Lfo(LfoSettings),
    Env(Envelope),
    Poly {
        value: u8,
    },
}

impl Command {
    pub fn note_on(event: NoteEvent) -> Self {
        Command::NoteOn {
            midi: event.midi,
            velocity: event.velocity,
        }
    }

    pub fn osc(index: OscIndex, settings: OscSettings) -> Self {
        match index {
            OscIndex::Osc1 => Command::Osc1(settings),
            OscIndex::Osc2 => Command::Osc2(settings),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Command::Wave { .. } => "wave",
            Command::Osc1(_) => "osc1",
            Command::Osc2(_) => "osc2",
            Command::NoteOn { .. } => "note_on",
            Command::NoteOff { .. } => "note_off",
            Command::Amp { .. } => "amp",
            Command::Filter { .. } => "filter",
            Command::Fenv(_) => "fenv",
            Command::Famt { .. } => "famt",
            Command::Lfo(_) => "lfo",
            Command::Env(_) => "env",
            Command::Poly { .. } => "poly",
        }
    }

    pub fn validate(&self) -> Result<(), ApplyError> {
        match self {
            Command::Wave { value } => check_wave(*value),
            Command::Osc1(settings) | Command::Osc2(settings) => {
                check_wave(settings.wave)?;
                check_finite(settings.detune)?;
                for value in [
                    settings.gain,
                    settings.fm_car,
                    settings.fm_mod,
                    settings.fm_indx,
                ]
                .into_iter()
                .flatten()
                {
                    check_finite(value)?;
                }
                Ok(())
            }
            Command::NoteOn { midi, velocity } => {
                check_midi(*midi)?;
                check_finite(*velocity)?;
                if !(0.0..=1.0).contains(velocity) {
                    return Err(ApplyError::Malformed("velocity outside 0..=1"));
                }
                Ok(())
            }
            Command::NoteOff { midi } => midi.map_or(Ok(()), check_midi),
            Command::Amp { value } => check_finite(*value),
            Command::Filter { cutoff, resonance } => {
                check_finite(*cutoff)?;
                check_finite(*resonance)?;
                if *cutoff <= 0.0 {
                    return Err(ApplyError::Malformed("cutoff must be positive"));
                }
                Ok(())
            }
            Command::Fenv(env) | Command::Env(env) => {
                env.values().into_iter().try_for_each(check_finite)
            }
            Command::Famt { amount } => check_finite(*amount),
            Command::Lfo(lfo) => {
                check_finite(lfo.rate)?;
                check_finite(lfo.amount)?;
                match lfo.dest {
                    Some(dest) if dest > 7 => Err(ApplyError::Malformed("lfo dest outside 0..=7")),
                    _ => Ok(()),
                }
            }
            Command::Poly { value } => {
                if (1..=MAX_VOICES).contains(value) {
                    Ok(())
                } else {
                    Err(ApplyError::Malformed("poly outside 1..=16"))
                }
            }
        }
    }

    /// Human-readable line carried by `log` telemetry once the command is applied.
    pub fn summary(&self) -> String {
        match self {
            Command::Wave { value } => format!("wave -> {value}"),
            Command::Osc1(settings) | Command::Osc2(settings) => {
                let mut line = format!(
                    "{} -> wave:{} detune:{}",
                    self.tag(),
                    settings.wave,
                    settings.detune
                );
                if let Some(gain) = settings.gain {
                    line.push_str(&format!(" gain:{gain}"));
                }
                if settings.has_fm() {
                    line.push_str(" fm");
                }
                line
            }
            Command::NoteOn { midi, velocity } => format!("note_on -> midi:{midi} vel:{velocity}"),
            Command::NoteOff { midi: None } => "note_off".to_string(),
            Command::NoteOff { midi: Some(midi) } => format!("note_off -> midi:{midi}"),
            Command::Amp { value } => format!("amp -> {value}"),
            Command::Filter { cutoff, resonance } => {
                format!("filter -> cutoff:{cutoff} res:{resonance}")
            }
            Command::Fenv(env) | Command::Env(env) => format!(
                "{} -> a:{} d:{} s:{} r:{}",
                self.tag(),
                env.attack,
                env.decay,
                env.sustain,
                env.release
            ),
            Command::Famt { amount } => format!("famt -> {amount}"),
            Command::Lfo(lfo) => match lfo.dest {
                Some(dest) => format!("lfo -> rate:{} amt:{} dest:{dest}", lfo.rate, lfo.amount),
                None => format!("lfo -> rate:{} amt:{}", lfo.rate, lfo.amount),
            },
            Command::Poly { value } => format!("poly -> {value}"),
        }
    }
}

/// Why a command was not applied on the render thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyError {
    NotReady,
    Malformed(&'static str),
    Unsupported(&'static str),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::NotReady => write!(f, "engine not ready"),
            ApplyError::Malformed(reason) => write!(f, "malformed command: {reason}"),
            ApplyError::Unsupported(call) => write!(f, "engine does not export {call}"),
        }
    }
}

impl std::error::Error for ApplyError {}

fn check_finite(value: f32) -> Result<(), ApplyError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ApplyError::Malformed("non-finite value"))
    }
}

fn check_midi(midi: u8) -> Result<(), ApplyError> {
    if midi <= MIDI_MAX {
        Ok(())
    } else {
        Err(ApplyError::Malformed("midi outside 0..=127"))
    }
}

fn check_wave(wave: i32) -> Result<(), ApplyError> {
    if (0..=WAVE_FM).contains(&wave) {
        Ok(())
    } else {
        Err(ApplyError::Malformed("waveform code outside 0..=4"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_to_wire_schema() {
        let on = serde_json::to_value(Command::NoteOn {
            midi: 60,
            velocity: 1.0,
        })
        .unwrap();
        assert_eq!(on, json!({"type": "note_on", "midi": 60, "velocity": 1.0}));

        let off = serde_json::to_value(Command::NoteOff { midi: None }).unwrap();
        assert_eq!(off, json!({"type": "note_off"}));

        let lfo = serde_json::to_value(Command::Lfo(LfoSettings {
            rate: 5.0,
            amount: 1.0,
            dest: Some(3),
        }))
        .unwrap();
        assert_eq!(
            lfo,
            json!({"type": "lfo", "rate": 5.0, "amount": 1.0, "dest": 3})
        );
    }

    #[test]
    fn decodes_osc_with_optional_fields() {
        let cmd: Command =
            serde_json::from_value(json!({"type": "osc2", "wave": 4, "detune": -0.5, "fm_indx": 3.0}))
                .unwrap();
        let Command::Osc2(settings) = cmd else {
            panic!("expected osc2");
        };
        assert_eq!(settings.wave, 4);
        assert_eq!(settings.gain, None);
        assert_eq!(settings.fm_indx, Some(3.0));
        assert!(settings.has_fm());
    }

    #[test]
    fn unknown_tag_does_not_decode() {
        let result = serde_json::from_value::<Command>(json!({"type": "reverb", "value": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        assert!(Command::NoteOn { midi: 128, velocity: 1.0 }.validate().is_err());
        assert!(Command::NoteOn { midi: 60, velocity: 1.5 }.validate().is_err());
        assert!(Command::Amp { value: f32::NAN }.validate().is_err());
        assert!(Command::Poly { value: 0 }.validate().is_err());
        assert!(Command::Poly { value: 17 }.validate().is_err());
        assert!(Command::Wave { value: 5 }.validate().is_err());
        assert!(
            Command::Lfo(LfoSettings { rate: 1.0, amount: 0.0, dest: Some(8) })
                .validate()
                .is_err()
        );
        assert_eq!(Command::Poly { value: 16 }.validate(), Ok(()));
        assert_eq!(Command::NoteOff { midi: Some(127) }.validate(), Ok(()));
    }

    #[test]
    fn summaries_read_like_engine_calls() {
        assert_eq!(
            Command::NoteOn { midi: 60, velocity: 1.0 }.summary(),
            "note_on -> midi:60 vel:1"
        );
        assert_eq!(Command::NoteOff { midi: None }.summary(), "note_off");
        assert_eq!(Command::Wave { value: 2 }.summary(), "wave -> 2");
    }
}
