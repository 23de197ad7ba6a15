//! UI-thread end of the protocol: keys and knobs in, ordered commands out.

use anyhow::{Context, Result, bail};
use macroquad::prelude::KeyCode;

use crate::command::Command;
use crate::controllers::KeyboardController;
use crate::notes::VoiceMode;
use crate::params::ParamPanel;
use crate::port::CommandSender;
use crate::telemetry::PollSummary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    Running,
    Suspended,
    Closed,
}

/// The audio host as seen from the UI: it may need waking before a note can sound.
#[allow(async_fn_in_trait)]
pub trait HostContext {
    fn state(&self) -> HostState;

    async fn resume(&self) -> Result<()>;
}

async fn ensure_running<H: HostContext>(host: &H) -> Result<()> {
    match host.state() {
        HostState::Running => Ok(()),
        HostState::Suspended => {
            log::debug!(target: "control", "resuming suspended output");
            host.resume().await.context("failed to resume audio output")
        }
        HostState::Closed => bail!("audio output is closed"),
    }
}

pub struct ControlChannel {
    keyboard: KeyboardController,
    panel: ParamPanel,
    commands: CommandSender,
}

impl ControlChannel {
    /// In mono mode the panel's voice count is pinned to one.
    pub fn new(keyboard: KeyboardController, mut panel: ParamPanel, commands: CommandSender) -> Self {
        if keyboard.mode() == VoiceMode::Mono {
            panel.pin_single_voice();
        }
        Self {
            keyboard,
            panel,
            commands,
        }
    }

    pub fn keyboard(&self) -> &KeyboardController {
        &self.keyboard
    }

    pub fn panel(&self) -> &ParamPanel {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut ParamPanel {
        &mut self.panel
    }

    /// Sends `commands` in order, waking the host before the first `note_on` that needs it.
    /// A failed command does not stop the rest of the batch; the first failure is returned.
    async fn dispatch<H: HostContext>(&mut self, commands: Vec<Command>, host: &H) -> Result<usize> {
        let mut sent = 0;
        let mut failure = None;
        for command in commands {
            let tag = command.tag();
            let result = if matches!(command, Command::NoteOn { .. }) {
                match ensure_running(host).await {
                    Ok(()) => self.send(command),
                    Err(err) => Err(err),
                }
            } else {
                self.send(command)
            };
            match result {
                Ok(()) => sent += 1,
                Err(err) => {
                    log::debug!(target: "control", "{tag} not sent: {err:#}");
                    if failure.is_none() {
                        failure = Some(err);
                    }
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(sent),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        log::trace!(target: "control", "send {}", command.summary());
        self.commands
            .send(command)
            .context("failed to queue note command")
    }

    /// Returns whether a `note_on` went out; a held pitch is ignored.
    pub async fn press<H: HostContext>(&mut self, pitch: u8, velocity: f32, host: &H) -> Result<bool> {
        let commands: Vec<Command> = self.keyboard.press(pitch, velocity).into_iter().collect();
        Ok(self.dispatch(commands, host).await? > 0)
    }

    pub fn release(&mut self, pitch: u8) -> Result<bool> {
        match self.keyboard.release(pitch) {
            Some(command) => {
                self.send(command)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn press_key<H: HostContext>(&mut self, keycode: KeyCode, host: &H) -> Result<bool> {
        let commands: Vec<Command> = self.keyboard.press_key(keycode).into_iter().collect();
        Ok(self.dispatch(commands, host).await? > 0)
    }

    pub async fn release_key<H: HostContext>(&mut self, keycode: KeyCode, host: &H) -> Result<bool> {
        let commands: Vec<Command> = self.keyboard.release_key(keycode).into_iter().collect();
        Ok(self.dispatch(commands, host).await? > 0)
    }

    /// Computer keyboard input for the current macroquad frame.
    pub async fn poll_keys<H: HostContext>(&mut self, host: &H) -> Result<usize> {
        let commands = self.keyboard.poll();
        self.dispatch(commands, host).await
    }

    pub async fn handle_mouse_keys<H: HostContext>(
        &mut self,
        hovered: Option<KeyCode>,
        mouse_pressed: bool,
        mouse_down: bool,
        mouse_released: bool,
        host: &H,
    ) -> Result<usize> {
        let commands =
            self.keyboard
                .handle_mouse_keys(hovered, mouse_pressed, mouse_down, mouse_released);
        self.dispatch(commands, host).await
    }

    /// Sends the latest value of every control group changed since the last tick.
    pub fn tick(&mut self) -> Result<usize> {
        self.panel.flush(&self.commands)
    }

    pub fn resync(&mut self) {
        log::info!(target: "control", "engine ready, resending panel state");
        self.panel.mark_all_dirty();
    }

    pub fn observe(&mut self, summary: PollSummary) {
        if summary.became_ready {
            self.resync();
        }
    }
}
