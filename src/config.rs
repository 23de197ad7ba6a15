use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapter::{DEFAULT_BLOCK, DEFAULT_TABLE_SIZE};
use crate::engine::EngineSource;
use crate::notes::VoiceMode;

pub const CONFIG_ENV: &str = "KEYSYNTH_CONFIG";
pub const CONFIG_FILE: &str = "keysynth.toml";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub engine: EngineConfig,
    pub keyboard: KeyboardConfig,
    pub audio: AudioConfig,
    pub link: LinkConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared library exporting the `synth_*` ABI. Unset selects the builtin engine.
    pub library: Option<PathBuf>,
    pub table_size: usize,
    pub default_block: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            library: None,
            table_size: DEFAULT_TABLE_SIZE,
            default_block: DEFAULT_BLOCK,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub mode: VoiceMode,
    pub velocity: f32,
    pub octave: i32,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Mono,
            velocity: 1.0,
            octave: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Build the output stream paused; the first note resumes it.
    pub start_suspended: bool,
    pub gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            start_suspended: true,
            gain: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl SynthConfig {
    /// Reads `$KEYSYNTH_CONFIG` or `./keysynth.toml`; any problem falls back to defaults.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        if !path.exists() {
            log::debug!(target: "config", "no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                log::info!(target: "config", "loaded {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(target: "config", "ignoring config {}: {e:#}", path.display());
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("malformed {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: SynthConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn engine_source(&self) -> EngineSource {
        match &self.engine.library {
            Some(path) => EngineSource::Native(path.clone()),
            None => EngineSource::Builtin,
        }
    }

    /// Voice count the panel starts with.
    pub fn voices(&self) -> u8 {
        match self.keyboard.mode {
            VoiceMode::Mono => 1,
            VoiceMode::Poly => 8,
        }
    }
}
