//! Render-thread side: owns the engine, the sample buffer and the telemetry sender.
//!
//! Nothing in here blocks or panics. Engine instantiation happens elsewhere and
//! is picked up by polling a one-shot result at the start of each render call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::runtime::Handle;
use tokio::sync::oneshot::error::TryRecvError;

use crate::command::{ApplyError, Command, OscIndex};
use crate::engine::{self, EngineSource, PendingEngine, SynthEngine};
use crate::port::RenderPort;
use crate::telemetry::{MetricsCadence, TelemetryEvent, rms};

pub const DEFAULT_BLOCK: usize = 2048;
pub const DEFAULT_TABLE_SIZE: usize = 2048;
pub const MAX_GAIN: f32 = 4.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterConfig {
    pub sample_rate: u32,
    pub default_block: usize,
    pub table_size: usize,
}

impl AdapterConfig {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            default_block: DEFAULT_BLOCK,
            table_size: DEFAULT_TABLE_SIZE,
        }
    }
}

/// Output gain shared between the UI and the render thread without the command link.
#[derive(Clone, Debug)]
pub struct GainParam(Arc<AtomicU32>);

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(Self::sanitize(value).to_bits())))
    }

    pub fn set(&self, value: f32) {
        self.0.store(Self::sanitize(value).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn sanitize(value: f32) -> f32 {
        if value.is_finite() {
            value.clamp(0.0, MAX_GAIN)
        } else {
            1.0
        }
    }
}

impl Default for GainParam {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Mono frame storage handed to the engine. Grows, never shrinks.
#[derive(Debug)]
pub struct SampleBuffer {
    frames: Box<[f32]>,
    reallocations: u32,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: vec![0.0; capacity].into_boxed_slice(),
            reallocations: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    /// Makes room for `frames`. Returns true if the region had to be replaced.
    pub fn ensure(&mut self, frames: usize) -> bool {
        if frames <= self.frames.len() {
            return false;
        }
        self.frames = Box::default();
        self.frames = vec![0.0; frames].into_boxed_slice();
        self.reallocations += 1;
        true
    }

    pub fn block_mut(&mut self, frames: usize) -> &mut [f32] {
        &mut self.frames[..frames]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    Silence,
    Rendered,
}

enum EngineSlot {
    Loading(PendingEngine),
    Ready(Box<dyn SynthEngine>),
    Failed,
}

pub struct RenderAdapter {
    config: AdapterConfig,
    slot: EngineSlot,
    buffer: Option<SampleBuffer>,
    port: RenderPort,
    gain: GainParam,
    cadence: MetricsCadence,
}

impl RenderAdapter {
    pub fn new(config: AdapterConfig, pending: PendingEngine, port: RenderPort) -> Self {
        Self {
            config,
            slot: EngineSlot::Loading(pending),
            buffer: None,
            port,
            gain: GainParam::default(),
            cadence: MetricsCadence::default(),
        }
    }

    /// Starts loading `source` on `runtime` and returns the not-yet-ready adapter.
    pub fn spawn(
        config: AdapterConfig,
        source: EngineSource,
        runtime: &Handle,
        port: RenderPort,
    ) -> Self {
        let pending = engine::spawn_load(runtime, source);
        Self::new(config, pending, port)
    }

    pub fn with_gain(mut self, gain: GainParam) -> Self {
        self.gain = gain;
        self
    }

    pub fn gain(&self) -> GainParam {
        self.gain.clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.slot, EngineSlot::Ready(_))
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.slot, EngineSlot::Failed)
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, SampleBuffer::capacity)
    }

    pub fn reallocations(&self) -> u32 {
        self.buffer.as_ref().map_or(0, SampleBuffer::reallocations)
    }

    pub fn dropped_commands(&self) -> u64 {
        self.port.dropped_commands()
    }

    fn poll_engine(&mut self) {
        let result = match &mut self.slot {
            EngineSlot::Loading(pending) => pending.try_recv(),
            _ => return,
        };
        match result {
            Err(TryRecvError::Empty) => {}
            Ok(Ok(mut engine)) => {
                let sr = self.config.sample_rate;
                engine.init(sr, self.config.table_size);
                self.buffer = Some(SampleBuffer::new(self.config.default_block));
                log::info!(target: "adapter", "{} engine ready at {sr} Hz", engine.name());
                self.slot = EngineSlot::Ready(engine);
                self.port.emit(TelemetryEvent::Ready { sr });
            }
            Ok(Err(err)) => {
                self.slot = EngineSlot::Failed;
                self.port.emit(TelemetryEvent::Error {
                    msg: format!("failed to init engine: {err:#}"),
                });
            }
            Err(TryRecvError::Closed) => {
                self.slot = EngineSlot::Failed;
                self.port.emit(TelemetryEvent::Error {
                    msg: "engine loader exited without a result".to_string(),
                });
            }
        }
    }

    /// Forwards one command to the engine and reports it as `log` telemetry.
    pub fn apply(&mut self, command: &Command) -> Result<(), ApplyError> {
        let EngineSlot::Ready(engine) = &mut self.slot else {
            return Err(ApplyError::NotReady);
        };
        command.validate()?;
        match command {
            Command::Wave { value } => engine.set_wave(*value),
            Command::Osc1(settings) => engine.set_osc(OscIndex::Osc1, settings),
            Command::Osc2(settings) => engine.set_osc(OscIndex::Osc2, settings),
            Command::NoteOn { midi, velocity } => engine.note_on(*midi, *velocity),
            Command::NoteOff { midi } => engine.note_off(*midi),
            Command::Amp { value } => engine.set_amp(*value),
            Command::Filter { cutoff, resonance } => engine.set_filter(*cutoff, *resonance),
            Command::Fenv(env) => engine.set_filter_env(env),
            Command::Famt { amount } => engine.set_filter_amount(*amount),
            Command::Lfo(lfo) => engine.set_lfo(lfo),
            Command::Env(env) => engine.set_env(env),
            Command::Poly { value } => engine.set_poly(*value),
        }?;
        self.port.emit(TelemetryEvent::Log {
            msg: command.summary(),
        });
        Ok(())
    }

    /// Rejected commands are only counted here; the UI reports the total.
    fn drain_commands(&mut self) {
        while let Some(command) = self.port.try_recv() {
            if self.apply(&command).is_err() {
                self.port.count_dropped_command();
            }
        }
    }

    /// Renders one quantum into planar channels of equal length.
    pub fn render(&mut self, outputs: &mut [&mut [f32]]) -> RenderOutcome {
        let frames = outputs.first().map_or(0, |channel| channel.len());
        let outcome = self.pull_block(frames, |block, gain| {
            for channel in outputs.iter_mut() {
                for (out, sample) in channel.iter_mut().zip(block) {
                    *out = sample * gain;
                }
            }
        });
        if outcome == RenderOutcome::Silence {
            for channel in outputs.iter_mut() {
                channel.fill(0.0);
            }
        }
        outcome
    }

    /// Renders one quantum into an interleaved buffer of `channels` channels.
    /// A trailing partial frame is zeroed.
    pub fn render_interleaved(&mut self, output: &mut [f32], channels: usize) -> RenderOutcome {
        let channels = channels.max(1);
        let frames = output.len() / channels;
        let outcome = self.pull_block(frames, |block, gain| {
            for (frame, sample) in output.chunks_exact_mut(channels).zip(block) {
                frame.fill(sample * gain);
            }
        });
        match outcome {
            RenderOutcome::Silence => output.fill(0.0),
            RenderOutcome::Rendered => output[frames * channels..].fill(0.0),
        }
        outcome
    }

    fn pull_block<F>(&mut self, frames: usize, fan_out: F) -> RenderOutcome
    where
        F: FnOnce(&[f32], f32),
    {
        self.poll_engine();
        self.drain_commands();

        let (EngineSlot::Ready(engine), Some(buffer)) = (&mut self.slot, &mut self.buffer) else {
            return RenderOutcome::Silence;
        };
        if buffer.ensure(frames) {
            log::debug!(target: "adapter", "sample buffer grown to {frames} frames");
        }
        let block = buffer.block_mut(frames);
        engine.render(block);
        fan_out(block, self.gain.get());

        if self.cadence.tick() {
            self.port.emit(TelemetryEvent::Metrics {
                frames,
                rms: rms(block),
            });
        }
        RenderOutcome::Rendered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use tokio::sync::oneshot;

    use super::*;
    use crate::command::LfoSettings;
    use crate::port::{self, CommandSender, TelemetryReceiver};

    /// Engine that records its calls and renders a constant.
    struct RecordingEngine {
        calls: Arc<Mutex<Vec<String>>>,
        level: f32,
    }

    impl SynthEngine for RecordingEngine {
        fn name(&self) -> &str {
            "recording"
        }

        fn init(&mut self, sample_rate: u32, table_size: usize) {
            self.record(format!("init {sample_rate} {table_size}"));
        }

        fn render(&mut self, out: &mut [f32]) {
            out.fill(self.level);
        }

        fn set_wave(&mut self, wave: i32) -> Result<(), ApplyError> {
            self.record(format!("wave {wave}"));
            Ok(())
        }

        fn note_on(&mut self, midi: u8, _velocity: f32) -> Result<(), ApplyError> {
            self.record(format!("note_on {midi}"));
            Ok(())
        }

        fn note_off(&mut self, midi: Option<u8>) -> Result<(), ApplyError> {
            self.record(format!("note_off {midi:?}"));
            Ok(())
        }

        fn set_amp(&mut self, amp: f32) -> Result<(), ApplyError> {
            self.record(format!("amp {amp}"));
            Ok(())
        }
    }

    impl RecordingEngine {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    struct Rig {
        adapter: RenderAdapter,
        commands: CommandSender,
        telemetry: TelemetryReceiver,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Rig {
        fn events(&self) -> Vec<TelemetryEvent> {
            std::iter::from_fn(|| self.telemetry.try_recv()).collect()
        }
    }

    fn config(default_block: usize) -> AdapterConfig {
        AdapterConfig {
            sample_rate: 48_000,
            default_block,
            table_size: 2048,
        }
    }

    fn ready_rig(default_block: usize) -> Rig {
        let (tx, rx) = oneshot::channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine: Box<dyn SynthEngine> = Box::new(RecordingEngine {
            calls: calls.clone(),
            level: 0.5,
        });
        assert!(tx.send(Ok(engine)).is_ok());
        let (commands, telemetry, port) = port::link(256);
        Rig {
            adapter: RenderAdapter::new(config(default_block), rx, port),
            commands,
            telemetry,
            calls,
        }
    }

    fn render_frames(adapter: &mut RenderAdapter, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![9.0; frames];
        let mut right = vec![9.0; frames];
        adapter.render(&mut [&mut left[..], &mut right[..]]);
        (left, right)
    }

    #[test]
    fn silence_before_engine_arrives() {
        let (_tx, rx) = oneshot::channel();
        let (_commands, telemetry, port) = port::link(16);
        let mut adapter = RenderAdapter::new(config(128), rx, port);
        for frames in [128, 256] {
            let mut left = vec![1.0; frames];
            let mut right = vec![1.0; frames];
            let outcome = adapter.render(&mut [&mut left[..], &mut right[..]]);
            assert_eq!(outcome, RenderOutcome::Silence);
            assert!(left.iter().chain(right.iter()).all(|s| *s == 0.0));
            assert_eq!(left.len(), frames);
        }
        assert!(!adapter.is_ready());
        assert_eq!(telemetry.try_recv(), None);
    }

    #[test]
    fn ready_event_carries_sample_rate_and_initial_buffer() {
        let mut rig = ready_rig(2048);
        render_frames(&mut rig.adapter, 128);
        assert!(rig.adapter.is_ready());
        assert_eq!(rig.adapter.buffer_capacity(), 2048);
        assert_eq!(rig.events()[0], TelemetryEvent::Ready { sr: 48_000 });
        assert_eq!(rig.calls.lock().unwrap()[0], "init 48000 2048");
    }

    #[test]
    fn mono_block_fans_out_to_every_channel() {
        let mut rig = ready_rig(128);
        rig.adapter.gain().set(2.0);
        let (left, right) = render_frames(&mut rig.adapter, 128);
        assert!(left.iter().all(|s| (*s - 1.0).abs() < 1e-6));
        assert_eq!(left, right);
    }

    #[test]
    fn interleaved_render_matches_planar() {
        let mut rig = ready_rig(128);
        let mut output = vec![0.0; 128 * 2];
        let outcome = rig.adapter.render_interleaved(&mut output, 2);
        assert_eq!(outcome, RenderOutcome::Rendered);
        assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn interleaved_partial_frame_is_zeroed() {
        let mut rig = ready_rig(128);
        let mut output = vec![7.0; 64 * 2 + 1];
        rig.adapter.render_interleaved(&mut output, 2);
        assert!(output[..128].iter().all(|s| (*s - 0.5).abs() < 1e-6));
        assert_eq!(output[128], 0.0);
    }

    #[test]
    fn buffer_grows_once_per_larger_block() {
        let mut rig = ready_rig(128);
        for frames in [128, 256, 128, 256] {
            render_frames(&mut rig.adapter, frames);
        }
        assert_eq!(rig.adapter.reallocations(), 1);
        assert_eq!(rig.adapter.buffer_capacity(), 256);
    }

    #[test]
    fn metrics_every_eighth_render() {
        let mut rig = ready_rig(128);
        for _ in 0..24 {
            render_frames(&mut rig.adapter, 128);
        }
        let metrics: Vec<TelemetryEvent> = rig
            .events()
            .into_iter()
            .filter(|event| matches!(event, TelemetryEvent::Metrics { .. }))
            .collect();
        assert_eq!(metrics.len(), 3);
        assert_eq!(
            metrics[0],
            TelemetryEvent::Metrics {
                frames: 128,
                rms: 0.5
            }
        );
    }

    #[test]
    fn applied_commands_are_logged_in_order() {
        let mut rig = ready_rig(128);
        render_frames(&mut rig.adapter, 128);
        rig.events();

        rig.commands
            .send(Command::NoteOn { midi: 60, velocity: 1.0 })
            .unwrap();
        rig.commands.send(Command::NoteOff { midi: None }).unwrap();
        render_frames(&mut rig.adapter, 128);

        let logs: Vec<TelemetryEvent> = rig
            .events()
            .into_iter()
            .filter(|event| matches!(event, TelemetryEvent::Log { .. }))
            .collect();
        assert_eq!(
            logs,
            vec![
                TelemetryEvent::Log {
                    msg: "note_on -> midi:60 vel:1".into()
                },
                TelemetryEvent::Log {
                    msg: "note_off".into()
                },
            ]
        );
        let calls = rig.calls.lock().unwrap();
        assert_eq!(&calls[1..], &["note_on 60", "note_off None"]);
    }

    #[test]
    fn malformed_and_unsupported_commands_are_dropped_quietly() {
        let mut rig = ready_rig(128);
        render_frames(&mut rig.adapter, 128);
        rig.events();

        assert_eq!(
            rig.adapter.apply(&Command::NoteOn { midi: 200, velocity: 1.0 }),
            Err(ApplyError::Malformed("midi outside 0..=127"))
        );
        assert!(matches!(
            rig.adapter.apply(&Command::Lfo(LfoSettings {
                rate: 1.0,
                amount: 0.5,
                dest: None
            })),
            Err(ApplyError::Unsupported(_))
        ));
        rig.commands.send(Command::Poly { value: 0 }).unwrap();
        render_frames(&mut rig.adapter, 128);

        assert_eq!(rig.adapter.dropped_commands(), 1);
        assert!(
            rig.events()
                .iter()
                .all(|event| matches!(event, TelemetryEvent::Metrics { .. }))
        );
    }

    #[test]
    fn commands_before_ready_are_dropped() {
        let (tx, rx) = oneshot::channel();
        let (commands, telemetry, port) = port::link(16);
        let mut adapter = RenderAdapter::new(config(128), rx, port);
        commands.send(Command::Amp { value: 0.3 }).unwrap();
        let mut mono = vec![0.0; 64];
        adapter.render(&mut [&mut mono[..]]);
        assert_eq!(adapter.dropped_commands(), 1);
        assert_eq!(telemetry.dropped_commands(), 1);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let engine: Box<dyn SynthEngine> = Box::new(RecordingEngine {
            calls: calls.clone(),
            level: 0.0,
        });
        assert!(tx.send(Ok(engine)).is_ok());
        adapter.render(&mut [&mut mono[..]]);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(telemetry.try_recv(), Some(TelemetryEvent::Ready { sr: 48_000 }));
    }

    #[test]
    fn failed_init_reports_once_and_stays_silent() {
        let (tx, rx) = oneshot::channel();
        let (_commands, telemetry, port) = port::link(16);
        let mut adapter = RenderAdapter::new(config(128), rx, port);
        assert!(tx.send(Err(anyhow!("no such library"))).is_ok());

        for _ in 0..10 {
            let mut mono = vec![1.0; 128];
            assert_eq!(adapter.render(&mut [&mut mono[..]]), RenderOutcome::Silence);
            assert!(mono.iter().all(|s| *s == 0.0));
        }
        assert!(adapter.has_failed());
        let events: Vec<TelemetryEvent> = std::iter::from_fn(|| telemetry.try_recv()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TelemetryEvent::Error { msg } if msg.contains("no such library")));
    }

    #[test]
    fn gain_param_is_clamped() {
        let gain = GainParam::new(10.0);
        assert_eq!(gain.get(), MAX_GAIN);
        gain.set(f32::NAN);
        assert_eq!(gain.get(), 1.0);
        gain.set(-1.0);
        assert_eq!(gain.get(), 0.0);
    }
}
