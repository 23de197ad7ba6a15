use std::os::raw::{c_float, c_int};
use std::path::Path;

use anyhow::{Context, Result};
use libloading::Library;

use super::SynthEngine;
use crate::command::{ApplyError, Envelope, LfoSettings, OscIndex, OscSettings};

type VoidFn = unsafe extern "C" fn();
type IntFn = unsafe extern "C" fn(c_int);
type FloatFn = unsafe extern "C" fn(c_float);
type InitFn = unsafe extern "C" fn(c_int, c_int);
type RenderFn = unsafe extern "C" fn(*mut c_float, c_int);
type NoteOnFn = unsafe extern "C" fn(c_int, c_float);
type Float2Fn = unsafe extern "C" fn(c_float, c_float);
type Float3Fn = unsafe extern "C" fn(c_float, c_float, c_float);
type Float4Fn = unsafe extern "C" fn(c_float, c_float, c_float, c_float);

const WAVE_SYMBOLS: [&str; 2] = ["synth_set_wave1", "synth_set_wave2"];
const DETUNE_SYMBOLS: [&str; 2] = ["synth_set_detune1", "synth_set_detune2"];
const GAIN_SYMBOLS: [&str; 2] = ["synth_set_gain1", "synth_set_gain2"];
const FM_SYMBOLS: [&str; 2] = ["synth_fm1", "synth_fm2"];

#[derive(Clone, Copy)]
struct FmParams {
    car: f32,
    modulator: f32,
    index: f32,
}

impl Default for FmParams {
    fn default() -> Self {
        Self {
            car: 1.0,
            modulator: 1.0,
            index: 2.0,
        }
    }
}

struct Api {
    init: InitFn,
    render: RenderFn,
    note_on: NoteOnFn,
    note_off: VoidFn,
    set_amp: FloatFn,
    set_wave: IntFn,
    osc_wave: [Option<IntFn>; 2],
    osc_detune: [Option<FloatFn>; 2],
    osc_gain: [Option<FloatFn>; 2],
    osc_fm: [Option<Float3Fn>; 2],
    note_off_midi: Option<IntFn>,
    set_env: Option<Float4Fn>,
    set_poly: Option<IntFn>,
    lfo_set: Option<FloatFn>,
    lfo_amount: Option<FloatFn>,
    lfo_dest: Option<IntFn>,
    filter_set: Option<Float2Fn>,
    filter_env: Option<Float4Fn>,
    filter_env_amount: Option<FloatFn>,
    shutdown: Option<VoidFn>,
}

impl Api {
    fn resolve(library: &Library) -> Result<Self> {
        Ok(Self {
            init: required(library, "synth_init")?,
            render: required(library, "synth_render")?,
            note_on: required(library, "synth_note_on")?,
            note_off: required(library, "synth_note_off")?,
            set_amp: required(library, "synth_set_amp")?,
            set_wave: required(library, "synth_set_wave")?,
            osc_wave: WAVE_SYMBOLS.map(|name| optional(library, name)),
            osc_detune: DETUNE_SYMBOLS.map(|name| optional(library, name)),
            osc_gain: GAIN_SYMBOLS.map(|name| optional(library, name)),
            osc_fm: FM_SYMBOLS.map(|name| optional(library, name)),
            note_off_midi: optional(library, "synth_note_off_midi"),
            set_env: optional(library, "synth_set_env"),
            set_poly: optional(library, "synth_set_poly"),
            lfo_set: optional(library, "synth_lfo_set"),
            lfo_amount: optional(library, "synth_lfo_amount"),
            lfo_dest: optional(library, "synth_lfo_dest"),
            filter_set: optional(library, "synth_filter_set"),
            filter_env: optional(library, "synth_filter_env"),
            filter_env_amount: optional(library, "synth_filter_env_amount"),
            shutdown: optional(library, "synth_shutdown"),
        })
    }
}

fn required<T: Copy>(library: &Library, name: &str) -> Result<T> {
    // SAFETY: `T` matches the C prototype of `name` in the engine ABI.
    let symbol = unsafe { library.get::<T>(name.as_bytes()) }
        .with_context(|| format!("engine library does not export {name}"))?;
    Ok(*symbol)
}

fn optional<T: Copy>(library: &Library, name: &str) -> Option<T> {
    // SAFETY: as in `required`.
    unsafe { library.get::<T>(name.as_bytes()) }
        .ok()
        .map(|symbol| *symbol)
}

/// Engine living in a shared library that exports the `synth_*` C ABI.
///
/// The library keeps its state in globals, so only one `NativeEngine` per
/// library should be alive at a time.
pub struct NativeEngine {
    api: Api,
    fm: [FmParams; 2],
    name: String,
    _library: Library,
}

impl NativeEngine {
    pub fn load(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initialisers; the engine library has none
        // beyond static data setup.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load {}", path.display()))?;
        let api = Api::resolve(&library)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "native".to_string());
        Ok(Self {
            api,
            fm: [FmParams::default(); 2],
            name,
            _library: library,
        })
    }
}

// SAFETY (for every call below): the function pointers were resolved from
// `_library`, which lives as long as `self`.
impl SynthEngine for NativeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, sample_rate: u32, table_size: usize) {
        let table = c_int::try_from(table_size).unwrap_or(2048);
        unsafe { (self.api.init)(sample_rate as c_int, table) }
    }

    fn render(&mut self, out: &mut [f32]) {
        if out.is_empty() {
            return;
        }
        unsafe { (self.api.render)(out.as_mut_ptr(), out.len() as c_int) }
    }

    fn set_wave(&mut self, wave: i32) -> Result<(), ApplyError> {
        unsafe { (self.api.set_wave)(wave) };
        Ok(())
    }

    fn note_on(&mut self, midi: u8, velocity: f32) -> Result<(), ApplyError> {
        unsafe { (self.api.note_on)(c_int::from(midi), velocity) };
        Ok(())
    }

    fn note_off(&mut self, midi: Option<u8>) -> Result<(), ApplyError> {
        match midi {
            None => unsafe { (self.api.note_off)() },
            Some(midi) => {
                let release = self
                    .api
                    .note_off_midi
                    .ok_or(ApplyError::Unsupported("synth_note_off_midi"))?;
                unsafe { release(c_int::from(midi)) }
            }
        }
        Ok(())
    }

    fn set_amp(&mut self, amp: f32) -> Result<(), ApplyError> {
        unsafe { (self.api.set_amp)(amp) };
        Ok(())
    }

    fn set_osc(&mut self, index: OscIndex, settings: &OscSettings) -> Result<(), ApplyError> {
        let slot = index.slot();
        let set_wave = self.api.osc_wave[slot].ok_or(ApplyError::Unsupported(WAVE_SYMBOLS[slot]))?;
        let set_detune =
            self.api.osc_detune[slot].ok_or(ApplyError::Unsupported(DETUNE_SYMBOLS[slot]))?;
        let set_gain = match settings.gain {
            Some(_) => Some(
                self.api.osc_gain[slot].ok_or(ApplyError::Unsupported(GAIN_SYMBOLS[slot]))?,
            ),
            None => None,
        };
        let set_fm = if settings.has_fm() {
            Some(self.api.osc_fm[slot].ok_or(ApplyError::Unsupported(FM_SYMBOLS[slot]))?)
        } else {
            None
        };

        unsafe {
            set_wave(settings.wave);
            set_detune(settings.detune);
        }
        if let (Some(set_gain), Some(gain)) = (set_gain, settings.gain) {
            unsafe { set_gain(gain) };
        }
        if let Some(set_fm) = set_fm {
            let fm = &mut self.fm[slot];
            fm.car = settings.fm_car.unwrap_or(fm.car);
            fm.modulator = settings.fm_mod.unwrap_or(fm.modulator);
            fm.index = settings.fm_indx.unwrap_or(fm.index);
            unsafe { set_fm(fm.car, fm.modulator, fm.index) };
        }
        Ok(())
    }

    fn set_filter(&mut self, cutoff: f32, resonance: f32) -> Result<(), ApplyError> {
        let filter_set = self
            .api
            .filter_set
            .ok_or(ApplyError::Unsupported("synth_filter_set"))?;
        unsafe { filter_set(cutoff, resonance) };
        Ok(())
    }

    fn set_filter_env(&mut self, env: &Envelope) -> Result<(), ApplyError> {
        let filter_env = self
            .api
            .filter_env
            .ok_or(ApplyError::Unsupported("synth_filter_env"))?;
        unsafe { filter_env(env.attack, env.decay, env.sustain, env.release) };
        Ok(())
    }

    fn set_filter_amount(&mut self, amount: f32) -> Result<(), ApplyError> {
        let amount_fn = self
            .api
            .filter_env_amount
            .ok_or(ApplyError::Unsupported("synth_filter_env_amount"))?;
        unsafe { amount_fn(amount) };
        Ok(())
    }

    fn set_lfo(&mut self, lfo: &LfoSettings) -> Result<(), ApplyError> {
        let lfo_set = self.api.lfo_set.ok_or(ApplyError::Unsupported("synth_lfo_set"))?;
        let lfo_amount = self
            .api
            .lfo_amount
            .ok_or(ApplyError::Unsupported("synth_lfo_amount"))?;
        let lfo_dest = match lfo.dest {
            Some(_) => Some(self.api.lfo_dest.ok_or(ApplyError::Unsupported("synth_lfo_dest"))?),
            None => None,
        };
        unsafe {
            lfo_set(lfo.rate);
            if let (Some(lfo_dest), Some(dest)) = (lfo_dest, lfo.dest) {
                lfo_dest(c_int::from(dest));
            }
            lfo_amount(lfo.amount);
        }
        Ok(())
    }

    fn set_env(&mut self, env: &Envelope) -> Result<(), ApplyError> {
        let set_env = self.api.set_env.ok_or(ApplyError::Unsupported("synth_set_env"))?;
        unsafe { set_env(env.attack, env.decay, env.sustain, env.release) };
        Ok(())
    }

    fn set_poly(&mut self, voices: u8) -> Result<(), ApplyError> {
        let set_poly = self.api.set_poly.ok_or(ApplyError::Unsupported("synth_set_poly"))?;
        unsafe { set_poly(c_int::from(voices)) };
        Ok(())
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        if let Some(shutdown) = self.api.shutdown {
            unsafe { shutdown() };
        }
    }
}
