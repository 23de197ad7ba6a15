use std::time::Duration;

use anyhow::Result;
use keysynth::adapter::{AdapterConfig, RenderAdapter, RenderOutcome};
use keysynth::control::{ControlChannel, HostContext, HostState};
use keysynth::controllers::KeyboardController;
use keysynth::engine::EngineSource;
use keysynth::notes::VoiceMode;
use keysynth::params::ParamPanel;
use keysynth::port;
use keysynth::telemetry::{TelemetryEvent, TelemetryMonitor};
use tokio::runtime::Runtime;

struct AlwaysRunning;

impl HostContext for AlwaysRunning {
    fn state(&self) -> HostState {
        HostState::Running
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }
}

fn render_block(adapter: &mut RenderAdapter, frames: usize) -> (RenderOutcome, Vec<f32>) {
    let mut left = vec![0.0; frames];
    let mut right = vec![0.0; frames];
    let outcome = adapter.render(&mut [&mut left[..], &mut right[..]]);
    assert_eq!(left, right);
    (outcome, left)
}

fn wait_until_ready(adapter: &mut RenderAdapter) {
    for _ in 0..200 {
        let (outcome, block) = render_block(adapter, 128);
        if outcome == RenderOutcome::Rendered {
            return;
        }
        assert!(block.iter().all(|s| *s == 0.0));
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("builtin engine never became ready");
}

#[test]
fn keys_reach_the_builtin_engine_and_back() {
    let runtime = Runtime::new().unwrap();
    let (commands, telemetry, render_port) = port::link(256);
    let mut adapter = RenderAdapter::spawn(
        AdapterConfig {
            sample_rate: 48_000,
            default_block: 128,
            table_size: 2048,
        },
        EngineSource::Builtin,
        runtime.handle(),
        render_port,
    );
    let mut channel = ControlChannel::new(
        KeyboardController::new(VoiceMode::Mono),
        ParamPanel::new(1),
        commands,
    );
    let mut monitor = TelemetryMonitor::new(telemetry);

    wait_until_ready(&mut adapter);
    let summary = monitor.poll();
    assert!(summary.became_ready);
    assert_eq!(monitor.sample_rate(), Some(48_000));

    channel.observe(summary);
    assert_eq!(channel.tick().unwrap(), 10);
    channel.panel_mut().set_wave(1);
    channel.tick().unwrap();

    let host = AlwaysRunning;
    assert!(runtime.block_on(channel.press(57, 1.0, &host)).unwrap());
    assert!(runtime.block_on(channel.press(60, 1.0, &host)).unwrap());
    assert!(channel.release(60).unwrap());

    let mut loudest = 0.0f32;
    for _ in 0..32 {
        let (_, block) = render_block(&mut adapter, 256);
        loudest = block.iter().fold(loudest, |peak, s| peak.max(s.abs()));
    }
    assert!(loudest > 0.01);
    assert_eq!(adapter.reallocations(), 1);
    assert_eq!(adapter.dropped_commands(), 0);

    monitor.poll();
    let lines: Vec<&str> = monitor.recent().collect();
    assert!(lines.contains(&"wave -> 1"));
    assert!(lines.ends_with(&[
        "note_on -> midi:57 vel:1",
        "note_on -> midi:60 vel:1",
        "note_on -> midi:57 vel:1",
    ]));
    let (_, rms) = monitor.last_metrics().unwrap();
    assert!(rms > 0.0);
    assert_eq!(channel.keyboard().current(), Some(57));
}

#[test]
fn missing_native_library_reports_one_error() {
    let runtime = Runtime::new().unwrap();
    let (_commands, telemetry, render_port) = port::link(16);
    let mut adapter = RenderAdapter::spawn(
        AdapterConfig::new(44_100),
        EngineSource::Native("/nonexistent/libsynth.so".into()),
        runtime.handle(),
        render_port,
    );

    for _ in 0..200 {
        render_block(&mut adapter, 64);
        if adapter.has_failed() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(adapter.has_failed());
    for _ in 0..8 {
        let (outcome, block) = render_block(&mut adapter, 64);
        assert_eq!(outcome, RenderOutcome::Silence);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    let events: Vec<TelemetryEvent> = std::iter::from_fn(|| telemetry.try_recv()).collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], TelemetryEvent::Error { msg } if msg.starts_with("failed to init engine")));
}
