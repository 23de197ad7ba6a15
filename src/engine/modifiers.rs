use std::f32::consts::PI;

use crate::command::Envelope;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EnvStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Clone, Copy, Debug)]
pub struct AdsrEnvelope {
    value: f32,
    stage: EnvStage,
}

impl Default for AdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl AdsrEnvelope {
    pub fn new() -> Self {
        Self {
            value: 0.0,
            stage: EnvStage::Idle,
        }
    }

    pub fn trigger(&mut self) {
        self.stage = EnvStage::Attack;
    }

    pub fn release(&mut self) {
        if self.stage != EnvStage::Idle {
            self.stage = EnvStage::Release;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvStage::Idle
    }

    pub fn advance(&mut self, dt: f32, params: &Envelope) -> f32 {
        let sustain = params.sustain.clamp(0.0, 1.0);
        match self.stage {
            EnvStage::Idle => {
                self.value = 0.0;
            }
            EnvStage::Attack => {
                let step = (dt / params.attack.max(0.0001)).min(1.0);
                self.value += (1.0 - self.value) * step;
                if (1.0 - self.value).abs() < 0.001 {
                    self.value = 1.0;
                    self.stage = EnvStage::Decay;
                }
            }
            EnvStage::Decay => {
                let step = (dt / params.decay.max(0.0001)).min(1.0);
                self.value += (sustain - self.value) * step;
                if (self.value - sustain).abs() < 0.001 {
                    self.value = sustain;
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Sustain => {
                self.value = sustain;
            }
            EnvStage::Release => {
                let step = (dt / params.release.max(0.0001)).min(1.0);
                self.value -= self.value * step;
                if self.value <= 0.0001 {
                    self.value = 0.0;
                    self.stage = EnvStage::Idle;
                }
            }
        }
        self.value.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LadderFilter {
    stage: [f32; 4],
}

impl LadderFilter {
    pub fn reset(&mut self) {
        self.stage = [0.0; 4];
    }

    pub fn process(&mut self, input: f32, cutoff: f32, resonance: f32, dt: f32) -> f32 {
        let g = (2.0 * PI * cutoff * dt).clamp(0.0, 0.99);
        let feedback = self.stage[3] * resonance.clamp(0.0, 1.0) * 4.0;
        let drive = (input - feedback).tanh();

        self.stage[0] += g * (drive - self.stage[0]);
        self.stage[1] += g * (self.stage[0].tanh() - self.stage[1]);
        self.stage[2] += g * (self.stage[1].tanh() - self.stage[2]);
        self.stage[3] += g * (self.stage[2].tanh() - self.stage[3]);

        self.stage[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rises_then_returns_to_idle() {
        let params = Envelope {
            attack: 0.001,
            decay: 0.001,
            sustain: 0.5,
            release: 0.001,
        };
        let dt = 1.0 / 48_000.0;
        let mut env = AdsrEnvelope::new();
        env.trigger();
        let mut peak = 0.0f32;
        for _ in 0..4_800 {
            peak = peak.max(env.advance(dt, &params));
        }
        assert!(peak > 0.99);
        assert!((env.advance(dt, &params) - 0.5).abs() < 0.01);

        env.release();
        for _ in 0..48_000 {
            env.advance(dt, &params);
        }
        assert!(env.is_idle());
    }

    #[test]
    fn release_before_trigger_stays_idle() {
        let mut env = AdsrEnvelope::new();
        env.release();
        assert!(env.is_idle());
    }
}
