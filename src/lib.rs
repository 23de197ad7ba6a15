pub mod adapter;
pub mod command;
pub mod config;
pub mod control;
pub mod controllers;
pub mod engine;
pub mod notes;
pub mod output;
pub mod params;
pub mod port;
pub mod telemetry;

pub use adapter::{AdapterConfig, GainParam, RenderAdapter, RenderOutcome};
pub use command::{ApplyError, Command};
pub use config::SynthConfig;
pub use control::{ControlChannel, HostContext, HostState};
pub use telemetry::{TelemetryEvent, TelemetryMonitor};
