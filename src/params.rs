//! Continuous controls, coalesced per group and flushed once per input tick.

use anyhow::Result;

use crate::command::{Command, Envelope, LfoSettings, MAX_VOICES, OscIndex, OscSettings, WAVE_FM};
use crate::port::{CommandSender, PortError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamGroup {
    Wave,
    Osc1,
    Osc2,
    Amp,
    Filter,
    Fenv,
    Famt,
    Lfo,
    Env,
    Poly,
}

impl ParamGroup {
    /// Flush order.
    pub const ALL: [ParamGroup; 10] = [
        ParamGroup::Wave,
        ParamGroup::Osc1,
        ParamGroup::Osc2,
        ParamGroup::Amp,
        ParamGroup::Filter,
        ParamGroup::Fenv,
        ParamGroup::Famt,
        ParamGroup::Lfo,
        ParamGroup::Env,
        ParamGroup::Poly,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }

    fn osc(index: OscIndex) -> Self {
        match index {
            OscIndex::Osc1 => ParamGroup::Osc1,
            OscIndex::Osc2 => ParamGroup::Osc2,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LfoDestination {
    #[default]
    Pitch,
    Cutoff,
    Master,
    Resonance,
    Osc1Gain,
    Osc2Gain,
    Fm1Index,
    Fm2Index,
}

impl LfoDestination {
    pub const ALL: [LfoDestination; 8] = [
        LfoDestination::Pitch,
        LfoDestination::Cutoff,
        LfoDestination::Master,
        LfoDestination::Resonance,
        LfoDestination::Osc1Gain,
        LfoDestination::Osc2Gain,
        LfoDestination::Fm1Index,
        LfoDestination::Fm2Index,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Largest magnitude the amount may take for this destination.
    pub fn amount_range(self) -> f32 {
        match self {
            LfoDestination::Pitch => 24.0,
            LfoDestination::Cutoff => 8_000.0,
            LfoDestination::Master
            | LfoDestination::Resonance
            | LfoDestination::Osc1Gain
            | LfoDestination::Osc2Gain => 1.0,
            LfoDestination::Fm1Index | LfoDestination::Fm2Index => 10.0,
        }
    }

    pub fn clamp_amount(self, amount: f32) -> f32 {
        let range = self.amount_range();
        amount.clamp(-range, range)
    }

    pub fn label(self) -> &'static str {
        match self {
            LfoDestination::Pitch => "PITCH",
            LfoDestination::Cutoff => "CUTOFF",
            LfoDestination::Master => "MASTER",
            LfoDestination::Resonance => "RESO",
            LfoDestination::Osc1Gain => "OSC1 GAIN",
            LfoDestination::Osc2Gain => "OSC2 GAIN",
            LfoDestination::Fm1Index => "FM1 INDEX",
            LfoDestination::Fm2Index => "FM2 INDEX",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FmPatch {
    pub car: f32,
    pub modulator: f32,
    pub index: f32,
}

impl Default for FmPatch {
    fn default() -> Self {
        Self {
            car: 1.0,
            modulator: 1.0,
            index: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OscPanel {
    pub wave: i32,
    pub detune: f32,
    pub gain: f32,
    pub fm: FmPatch,
}

impl Default for OscPanel {
    fn default() -> Self {
        Self {
            wave: 0,
            detune: 0.0,
            gain: 0.5,
            fm: FmPatch::default(),
        }
    }
}

impl OscPanel {
    fn settings(&self) -> OscSettings {
        let fm = self.wave == WAVE_FM;
        OscSettings {
            wave: self.wave,
            detune: self.detune,
            gain: Some(self.gain),
            fm_car: fm.then_some(self.fm.car),
            fm_mod: fm.then_some(self.fm.modulator),
            fm_indx: fm.then_some(self.fm.index),
        }
    }
}

/// Latest value of every continuous control plus the set of groups changed since the last flush.
#[derive(Clone, Debug)]
pub struct ParamPanel {
    wave: i32,
    osc: [OscPanel; 2],
    amp: f32,
    cutoff: f32,
    resonance: f32,
    filter_env: Envelope,
    filter_amount: f32,
    lfo_rate: f32,
    lfo_amount: f32,
    lfo_dest: LfoDestination,
    amp_env: Envelope,
    voices: u8,
    voices_pinned: bool,
    dirty: u16,
}

impl Default for ParamPanel {
    fn default() -> Self {
        Self::new(8)
    }
}

impl ParamPanel {
    pub fn new(voices: u8) -> Self {
        Self {
            wave: 0,
            osc: [OscPanel::default(); 2],
            amp: 0.4,
            cutoff: 1_200.0,
            resonance: 0.3,
            filter_env: Envelope::FILTER_DEFAULT,
            filter_amount: 2_000.0,
            lfo_rate: 5.0,
            lfo_amount: 0.0,
            lfo_dest: LfoDestination::Pitch,
            amp_env: Envelope::AMP_DEFAULT,
            voices: voices.clamp(1, MAX_VOICES),
            voices_pinned: false,
            dirty: 0,
        }
    }

    fn touch(&mut self, group: ParamGroup) {
        self.dirty |= group.bit();
    }

    pub fn is_dirty(&self, group: ParamGroup) -> bool {
        self.dirty & group.bit() != 0
    }

    pub fn has_pending(&self) -> bool {
        self.dirty != 0
    }

    pub fn mark_all_dirty(&mut self) {
        for group in ParamGroup::ALL {
            self.touch(group);
        }
    }

    /// Sets both oscillators' waveform.
    pub fn set_wave(&mut self, wave: i32) {
        self.wave = wave;
        for osc in self.osc.iter_mut() {
            osc.wave = wave;
        }
        self.touch(ParamGroup::Wave);
    }

    pub fn set_osc_wave(&mut self, index: OscIndex, wave: i32) {
        self.osc[index.slot()].wave = wave;
        self.touch(ParamGroup::osc(index));
    }

    pub fn set_osc_detune(&mut self, index: OscIndex, semitones: f32) {
        self.osc[index.slot()].detune = semitones;
        self.touch(ParamGroup::osc(index));
    }

    pub fn set_osc_gain(&mut self, index: OscIndex, gain: f32) {
        self.osc[index.slot()].gain = gain;
        self.touch(ParamGroup::osc(index));
    }

    pub fn set_fm(&mut self, index: OscIndex, fm: FmPatch) {
        self.osc[index.slot()].fm = fm;
        self.touch(ParamGroup::osc(index));
    }

    pub fn set_amp(&mut self, value: f32) {
        self.amp = value;
        self.touch(ParamGroup::Amp);
    }

    pub fn set_cutoff(&mut self, hz: f32) {
        self.cutoff = hz.max(1.0);
        self.touch(ParamGroup::Filter);
    }

    pub fn set_resonance(&mut self, resonance: f32) {
        self.resonance = resonance;
        self.touch(ParamGroup::Filter);
    }

    pub fn set_filter_env(&mut self, env: Envelope) {
        self.filter_env = env;
        self.touch(ParamGroup::Fenv);
    }

    pub fn set_filter_amount(&mut self, hz: f32) {
        self.filter_amount = hz;
        self.touch(ParamGroup::Famt);
    }

    pub fn set_lfo_rate(&mut self, hz: f32) {
        self.lfo_rate = hz;
        self.touch(ParamGroup::Lfo);
    }

    pub fn set_lfo_amount(&mut self, amount: f32) {
        self.lfo_amount = self.lfo_dest.clamp_amount(amount);
        self.touch(ParamGroup::Lfo);
    }

    /// Switches destination and clamps the current amount into the new range.
    pub fn set_lfo_dest(&mut self, dest: LfoDestination) {
        self.lfo_dest = dest;
        self.lfo_amount = dest.clamp_amount(self.lfo_amount);
        self.touch(ParamGroup::Lfo);
    }

    pub fn set_env(&mut self, env: Envelope) {
        self.amp_env = env;
        self.touch(ParamGroup::Env);
    }

    /// Locks the engine to one voice. Mono retrigger relies on the engine reusing that voice.
    pub fn pin_single_voice(&mut self) {
        if self.voices != 1 {
            self.voices = 1;
            self.touch(ParamGroup::Poly);
        }
        self.voices_pinned = true;
    }

    pub fn voices_pinned(&self) -> bool {
        self.voices_pinned
    }

    /// Ignored while the voice count is pinned.
    pub fn set_voices(&mut self, voices: u8) {
        if self.voices_pinned {
            return;
        }
        self.voices = voices.clamp(1, MAX_VOICES);
        self.touch(ParamGroup::Poly);
    }

    pub fn wave(&self) -> i32 {
        self.wave
    }

    pub fn osc(&self, index: OscIndex) -> &OscPanel {
        &self.osc[index.slot()]
    }

    pub fn amp(&self) -> f32 {
        self.amp
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    pub fn resonance(&self) -> f32 {
        self.resonance
    }

    pub fn filter_env(&self) -> Envelope {
        self.filter_env
    }

    pub fn filter_amount(&self) -> f32 {
        self.filter_amount
    }

    pub fn lfo_rate(&self) -> f32 {
        self.lfo_rate
    }

    pub fn lfo_amount(&self) -> f32 {
        self.lfo_amount
    }

    pub fn lfo_dest(&self) -> LfoDestination {
        self.lfo_dest
    }

    pub fn env(&self) -> Envelope {
        self.amp_env
    }

    pub fn voices(&self) -> u8 {
        self.voices
    }

    pub fn command(&self, group: ParamGroup) -> Command {
        match group {
            ParamGroup::Wave => Command::Wave { value: self.wave },
            ParamGroup::Osc1 => Command::osc(OscIndex::Osc1, self.osc[0].settings()),
            ParamGroup::Osc2 => Command::osc(OscIndex::Osc2, self.osc[1].settings()),
            ParamGroup::Amp => Command::Amp { value: self.amp },
            ParamGroup::Filter => Command::Filter {
                cutoff: self.cutoff,
                resonance: self.resonance,
            },
            ParamGroup::Fenv => Command::Fenv(self.filter_env),
            ParamGroup::Famt => Command::Famt {
                amount: self.filter_amount,
            },
            ParamGroup::Lfo => Command::Lfo(LfoSettings {
                rate: self.lfo_rate,
                amount: self.lfo_amount,
                dest: Some(self.lfo_dest.code()),
            }),
            ParamGroup::Env => Command::Env(self.amp_env),
            ParamGroup::Poly => Command::Poly { value: self.voices },
        }
    }

    /// Sends every changed group. Groups that do not fit under the link's parameter limit stay
    /// dirty for the next tick.
    pub fn flush(&mut self, sender: &CommandSender) -> Result<usize> {
        let mut sent = 0;
        for group in ParamGroup::ALL {
            if !self.is_dirty(group) {
                continue;
            }
            if sender.queued() >= sender.parameter_limit() {
                log::trace!(target: "control", "command link backed up, deferring parameter updates");
                break;
            }
            match sender.send(self.command(group)) {
                Ok(()) => {
                    self.dirty &= !group.bit();
                    sent += 1;
                }
                Err(PortError::Full) => {
                    log::warn!(target: "control", "command link full, deferring parameter updates");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port;

    fn flushed(panel: &mut ParamPanel) -> Vec<Command> {
        let (sender, _telemetry, render) = port::link(64);
        panel.flush(&sender).unwrap();
        std::iter::from_fn(|| render.try_recv()).collect()
    }

    #[test]
    fn repeated_changes_coalesce_into_one_command() {
        let mut panel = ParamPanel::default();
        panel.set_amp(0.1);
        panel.set_amp(0.2);
        panel.set_amp(0.7);
        assert_eq!(flushed(&mut panel), vec![Command::Amp { value: 0.7 }]);
        assert!(flushed(&mut panel).is_empty());
    }

    #[test]
    fn pending_groups_follow_flush_order() {
        let mut panel = ParamPanel::default();
        panel.set_voices(4);
        panel.set_cutoff(800.0);
        panel.set_wave(1);
        let tags: Vec<&str> = flushed(&mut panel).iter().map(Command::tag).collect();
        assert_eq!(tags, vec!["wave", "filter", "poly"]);
    }

    #[test]
    fn lfo_destination_change_clamps_amount() {
        let mut panel = ParamPanel::default();
        panel.set_lfo_amount(20.0);
        flushed(&mut panel);

        panel.set_lfo_dest(LfoDestination::Resonance);
        assert_eq!(
            flushed(&mut panel),
            vec![Command::Lfo(LfoSettings {
                rate: 5.0,
                amount: 1.0,
                dest: Some(3)
            })]
        );
    }

    #[test]
    fn amount_is_clamped_to_current_destination() {
        let mut panel = ParamPanel::default();
        panel.set_lfo_dest(LfoDestination::Cutoff);
        panel.set_lfo_amount(-9_000.0);
        assert_eq!(panel.lfo_amount(), -8_000.0);
        panel.set_lfo_dest(LfoDestination::Fm2Index);
        assert_eq!(panel.lfo_amount(), -10.0);
    }

    #[test]
    fn fm_fields_only_travel_with_fm_wave() {
        let mut panel = ParamPanel::default();
        panel.set_osc_wave(OscIndex::Osc2, 2);
        let Command::Osc2(settings) = panel.command(ParamGroup::Osc2) else {
            panic!("expected osc2");
        };
        assert!(!settings.has_fm());
        assert_eq!(settings.gain, Some(0.5));

        panel.set_osc_wave(OscIndex::Osc2, WAVE_FM);
        let Command::Osc2(settings) = panel.command(ParamGroup::Osc2) else {
            panic!("expected osc2");
        };
        assert_eq!(settings.fm_indx, Some(2.0));
    }

    #[test]
    fn mark_all_dirty_resends_whole_panel() {
        let mut panel = ParamPanel::new(1);
        panel.mark_all_dirty();
        let pending = flushed(&mut panel);
        assert_eq!(pending.len(), ParamGroup::ALL.len());
        assert_eq!(pending.last(), Some(&Command::Poly { value: 1 }));
    }

    #[test]
    fn flush_keeps_groups_that_did_not_fit() {
        let (sender, _telemetry, render) = port::link(2);
        let mut panel = ParamPanel::default();
        panel.set_wave(3);
        panel.set_amp(0.5);
        panel.set_env(Envelope::AMP_DEFAULT);

        assert_eq!(panel.flush(&sender).unwrap(), 2);
        assert!(panel.is_dirty(ParamGroup::Env));
        assert!(!panel.is_dirty(ParamGroup::Amp));

        while render.try_recv().is_some() {}
        assert_eq!(panel.flush(&sender).unwrap(), 1);
        assert!(!panel.has_pending());
    }

    #[test]
    fn flush_leaves_room_for_notes() {
        let (sender, _telemetry, render) = port::link(8);
        let mut panel = ParamPanel::default();
        panel.mark_all_dirty();

        assert_eq!(panel.flush(&sender).unwrap(), 6);
        assert!(panel.has_pending());
        assert_eq!(panel.flush(&sender).unwrap(), 0);
        sender.send(Command::NoteOn { midi: 60, velocity: 1.0 }).unwrap();
        sender.send(Command::NoteOff { midi: None }).unwrap();

        while render.try_recv().is_some() {}
        assert_eq!(panel.flush(&sender).unwrap(), 4);
        assert!(!panel.has_pending());
    }

    #[test]
    fn pinned_voice_count_ignores_the_voices_control() {
        let mut panel = ParamPanel::new(8);
        panel.pin_single_voice();
        panel.set_voices(6);
        assert_eq!(panel.voices(), 1);
        assert_eq!(flushed(&mut panel), vec![Command::Poly { value: 1 }]);

        let mut already_single = ParamPanel::new(1);
        already_single.pin_single_voice();
        assert!(!already_single.has_pending());
    }

    #[test]
    fn destination_codes_round_trip() {
        for dest in LfoDestination::ALL {
            assert_eq!(LfoDestination::from_code(dest.code()), Some(dest));
        }
        assert_eq!(LfoDestination::from_code(8), None);
    }
}
