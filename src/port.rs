//! The two one-directional links between the UI thread and the render thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::command::Command;
use crate::telemetry::TelemetryEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortError {
    Full,
    Disconnected,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Full => write!(f, "command link is full"),
            PortError::Disconnected => write!(f, "render side has gone away"),
        }
    }
}

impl std::error::Error for PortError {}

/// Parameter updates may fill the command link up to all but `1 / NOTE_RESERVE_DIVISOR` of it.
pub const NOTE_RESERVE_DIVISOR: usize = 4;

/// Counted on the render thread, read by the UI.
#[derive(Debug, Default)]
struct DropCounters {
    events: AtomicU64,
    commands: AtomicU64,
}

/// Creates the command link and the telemetry link with `capacity` slots each.
pub fn link(capacity: usize) -> (CommandSender, TelemetryReceiver, RenderPort) {
    let capacity = capacity.max(1);
    let (command_tx, command_rx) = bounded(capacity);
    let (telemetry_tx, telemetry_rx) = bounded(capacity);
    let drops = Arc::new(DropCounters::default());
    (
        CommandSender { tx: command_tx },
        TelemetryReceiver {
            rx: telemetry_rx,
            drops: Arc::clone(&drops),
        },
        RenderPort {
            commands: command_rx,
            telemetry: telemetry_tx,
            drops,
        },
    )
}

/// UI end of the command link.
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, command: Command) -> Result<(), PortError> {
        self.tx.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => PortError::Full,
            TrySendError::Disconnected(_) => PortError::Disconnected,
        })
    }

    pub fn queued(&self) -> usize {
        self.tx.len()
    }

    /// Queue depth at which parameter updates stop, keeping the remainder free for notes.
    pub fn parameter_limit(&self) -> usize {
        let capacity = self.tx.capacity().unwrap_or(usize::MAX);
        capacity - capacity / NOTE_RESERVE_DIVISOR
    }
}

/// UI end of the telemetry link.
pub struct TelemetryReceiver {
    rx: Receiver<TelemetryEvent>,
    drops: Arc<DropCounters>,
}

impl TelemetryReceiver {
    pub fn try_recv(&self) -> Option<TelemetryEvent> {
        self.rx.try_recv().ok()
    }

    /// Telemetry events the render side could not queue.
    pub fn dropped_events(&self) -> u64 {
        self.drops.events.load(Ordering::Relaxed)
    }

    /// Commands the render side discarded as malformed, unsupported or early.
    pub fn dropped_commands(&self) -> u64 {
        self.drops.commands.load(Ordering::Relaxed)
    }
}

/// Render-thread end of both links. Never blocks.
pub struct RenderPort {
    commands: Receiver<Command>,
    telemetry: Sender<TelemetryEvent>,
    drops: Arc<DropCounters>,
}

impl RenderPort {
    pub fn try_recv(&self) -> Option<Command> {
        match self.commands.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Queues `event` for the UI; drops it when the UI is not keeping up.
    pub fn emit(&mut self, event: TelemetryEvent) -> bool {
        match self.telemetry.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.drops.events.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn count_dropped_command(&self) {
        self.drops.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_commands(&self) -> u64 {
        self.drops.commands.load(Ordering::Relaxed)
    }
}
