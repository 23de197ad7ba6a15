//! The synthesis engine seen from the render thread: a fixed call vocabulary.

mod modifiers;
mod native;
mod tone;
mod vco;

use std::path::PathBuf;

use anyhow::Result;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::command::{ApplyError, Envelope, LfoSettings, OscIndex, OscSettings};

pub use native::NativeEngine;
pub use tone::ToneEngine;

/// Calls the render thread may make into an engine.
///
/// The first group is what every engine provides. The rest arrived in later
/// engine revisions, so the defaults report [`ApplyError::Unsupported`].
pub trait SynthEngine: Send {
    fn name(&self) -> &str;

    fn init(&mut self, sample_rate: u32, table_size: usize);

    /// Fills `out` with one mono block.
    fn render(&mut self, out: &mut [f32]);

    fn set_wave(&mut self, wave: i32) -> Result<(), ApplyError>;

    fn note_on(&mut self, midi: u8, velocity: f32) -> Result<(), ApplyError>;

    /// `None` releases every sounding voice.
    fn note_off(&mut self, midi: Option<u8>) -> Result<(), ApplyError>;

    fn set_amp(&mut self, amp: f32) -> Result<(), ApplyError>;

    fn set_osc(&mut self, _index: OscIndex, _settings: &OscSettings) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("oscillator controls"))
    }

    fn set_filter(&mut self, _cutoff: f32, _resonance: f32) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("synth_filter_set"))
    }

    fn set_filter_env(&mut self, _env: &Envelope) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("synth_filter_env"))
    }

    fn set_filter_amount(&mut self, _amount: f32) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("synth_filter_env_amount"))
    }

    fn set_lfo(&mut self, _lfo: &LfoSettings) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("lfo controls"))
    }

    fn set_env(&mut self, _env: &Envelope) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("synth_set_env"))
    }

    fn set_poly(&mut self, _voices: u8) -> Result<(), ApplyError> {
        Err(ApplyError::Unsupported("synth_set_poly"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineSource {
    Builtin,
    Native(PathBuf),
}

impl EngineSource {
    pub fn describe(&self) -> String {
        match self {
            EngineSource::Builtin => "builtin tone engine".to_string(),
            EngineSource::Native(path) => format!("native engine {}", path.display()),
        }
    }
}

pub type PendingEngine = oneshot::Receiver<Result<Box<dyn SynthEngine>>>;

pub fn instantiate(source: &EngineSource) -> Result<Box<dyn SynthEngine>> {
    match source {
        EngineSource::Builtin => Ok(Box::new(ToneEngine::new())),
        EngineSource::Native(path) => Ok(Box::new(NativeEngine::load(path)?)),
    }
}

/// Instantiates the engine on a blocking task; the receiver is polled, never awaited.
pub fn spawn_load(runtime: &Handle, source: EngineSource) -> PendingEngine {
    let (tx, rx) = oneshot::channel();
    runtime.spawn_blocking(move || {
        log::info!(target: "engine", "loading {}", source.describe());
        let result = instantiate(&source);
        if let Err(err) = &result {
            log::warn!(target: "engine", "failed to load {}: {err:#}", source.describe());
        }
        let _ = tx.send(result);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_fails_to_instantiate() {
        let source = EngineSource::Native(PathBuf::from("/nonexistent/libsynth.so"));
        assert!(instantiate(&source).is_err());
    }

    #[test]
    fn builtin_engine_instantiates() {
        let engine = instantiate(&EngineSource::Builtin).unwrap();
        assert_eq!(engine.name(), "tone");
    }

    #[test]
    fn spawned_load_delivers_result() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let pending = spawn_load(runtime.handle(), EngineSource::Builtin);
        let engine = runtime.block_on(pending).unwrap().unwrap();
        assert_eq!(engine.name(), "tone");
    }
}
