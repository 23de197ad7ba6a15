//! Diagnostics flowing from the render thread back to the UI.

use std::collections::VecDeque;

use serde::Serialize;

use crate::port::TelemetryReceiver;

/// Rendered invocations between two `metrics` events.
pub const METRICS_EVERY: u32 = 8;
const RECENT_LOG_LINES: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Ready { sr: u32 },
    Log { msg: String },
    Error { msg: String },
    Metrics { frames: usize, rms: f32 },
}

pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum: f32 = block.iter().map(|sample| sample * sample).sum();
    (sum / block.len() as f32).sqrt()
}

/// Counts rendered invocations; every [`METRICS_EVERY`]th one, starting with the first, is due.
#[derive(Debug, Default)]
pub struct MetricsCadence {
    count: u32,
}

impl MetricsCadence {
    pub fn tick(&mut self) -> bool {
        let due = self.count % METRICS_EVERY == 0;
        self.count = self.count.wrapping_add(1);
        due
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PollSummary {
    pub events: usize,
    pub became_ready: bool,
}

/// UI-side view of the telemetry stream. Display only, never feeds control state.
pub struct TelemetryMonitor {
    rx: TelemetryReceiver,
    sample_rate: Option<u32>,
    failure: Option<String>,
    last_metrics: Option<(usize, f32)>,
    recent: VecDeque<String>,
    reported_drops: u64,
}

impl TelemetryMonitor {
    pub fn new(rx: TelemetryReceiver) -> Self {
        Self {
            rx,
            sample_rate: None,
            failure: None,
            last_metrics: None,
            recent: VecDeque::with_capacity(RECENT_LOG_LINES),
            reported_drops: 0,
        }
    }

    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();
        while let Some(event) = self.rx.try_recv() {
            summary.events += 1;
            match event {
                TelemetryEvent::Ready { sr } => {
                    log::info!(target: "telemetry", "engine ready at {sr} Hz");
                    self.sample_rate = Some(sr);
                    summary.became_ready = true;
                }
                TelemetryEvent::Log { msg } => {
                    log::debug!(target: "telemetry", "{msg}");
                    self.push_line(msg);
                }
                TelemetryEvent::Error { msg } => {
                    log::error!(target: "telemetry", "{msg}");
                    self.push_line(format!("error: {msg}"));
                    self.failure = Some(msg);
                }
                TelemetryEvent::Metrics { frames, rms } => {
                    self.last_metrics = Some((frames, rms));
                }
            }
        }
        let dropped = self.rx.dropped_commands();
        if dropped > self.reported_drops {
            log::debug!(
                target: "telemetry",
                "render side dropped {} command(s), {dropped} total",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
        summary
    }

    fn push_line(&mut self, line: String) {
        if self.recent.len() == RECENT_LOG_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line);
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn last_metrics(&self) -> Option<(usize, f32)> {
        self.last_metrics
    }

    pub fn dropped_commands(&self) -> u64 {
        self.rx.dropped_commands()
    }

    pub fn dropped_events(&self) -> u64 {
        self.rx.dropped_events()
    }

    pub fn last_line(&self) -> Option<&str> {
        self.recent.back().map(String::as_str)
    }

    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }
}
