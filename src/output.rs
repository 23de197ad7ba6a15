use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use cpal::{
    SampleFormat, SizedSample, Stream,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use tokio::runtime::Handle;

use crate::adapter::{AdapterConfig, GainParam, RenderAdapter};
use crate::config::SynthConfig;
use crate::control::{HostContext, HostState};
use crate::port::RenderPort;

const OUTPUT_CLAMP: f32 = 0.98;

/// The cpal output stream driving a [`RenderAdapter`] from its data callback.
pub struct AudioOutput {
    stream: Stream,
    gain: GainParam,
    running: AtomicBool,
}

impl AudioOutput {
    pub fn start(config: &SynthConfig, port: RenderPort, runtime: &Handle) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default audio output"))?;
        let supported = device.default_output_config()?;
        let stream_config = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;

        let adapter = RenderAdapter::spawn(
            AdapterConfig {
                sample_rate,
                default_block: config.engine.default_block,
                table_size: config.engine.table_size,
            },
            config.engine_source(),
            runtime,
            port,
        )
        .with_gain(GainParam::new(config.audio.gain));
        let gain = adapter.gain();

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream(&device, &stream_config, adapter, |sample| sample)?,
            SampleFormat::I16 => build_stream(&device, &stream_config, adapter, |sample| {
                (sample * i16::MAX as f32) as i16
            })?,
            SampleFormat::U16 => build_stream(&device, &stream_config, adapter, |sample| {
                let scaled = (sample * 0.5 + 0.5).clamp(0.0, 1.0);
                (scaled * u16::MAX as f32) as u16
            })?,
            other => bail!("unsupported output sample format {other:?}"),
        };

        let running = !config.audio.start_suspended;
        if running {
            stream.play().context("failed to start output stream")?;
        }
        log::info!(
            target: "output",
            "output stream {} Hz, {channels} channel(s), {:?}{}",
            sample_rate,
            supported.sample_format(),
            if running { "" } else { ", suspended" }
        );

        Ok(Self {
            stream,
            gain,
            running: AtomicBool::new(running),
        })
    }

    pub fn gain(&self) -> &GainParam {
        &self.gain
    }
}

impl HostContext for AudioOutput {
    fn state(&self) -> HostState {
        if self.running.load(Ordering::Acquire) {
            HostState::Running
        } else {
            HostState::Suspended
        }
    }

    async fn resume(&self) -> Result<()> {
        self.stream.play().context("failed to resume output stream")?;
        self.running.store(true, Ordering::Release);
        log::info!(target: "output", "output stream resumed");
        Ok(())
    }
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut adapter: RenderAdapter,
    convert: F,
) -> Result<Stream>
where
    T: SizedSample,
    F: Fn(f32) -> T + Send + 'static,
{
    let channels = usize::from(config.channels);
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            if scratch.len() < output.len() {
                scratch.resize(output.len(), 0.0);
            }
            let block = &mut scratch[..output.len()];
            adapter.render_interleaved(block, channels);
            for (out, sample) in output.iter_mut().zip(block.iter()) {
                *out = convert(sample.clamp(-OUTPUT_CLAMP, OUTPUT_CLAMP));
            }
        },
        move |err| log::error!(target: "output", "audio stream error: {err}"),
        None,
    )?;
    Ok(stream)
}
