use std::collections::HashMap;

use macroquad::prelude::{KeyCode, is_key_pressed, is_key_released};

use crate::command::{Command, NoteEvent};
use crate::notes::{NoteStack, VoiceMode};

const MIDI_MIN: i32 = 21;
const MIDI_MAX: i32 = 108;

#[derive(Clone)]
pub struct KeyBinding {
    pub label: &'static str,
    pub keycode: KeyCode,
    pub midi: i32,
    pub position_hint: f32,
}

impl KeyBinding {
    const fn new(label: &'static str, keycode: KeyCode, midi: i32, position_hint: f32) -> Self {
        Self {
            label,
            keycode,
            midi,
            position_hint,
        }
    }
}

/// Computer keyboard and on-screen keys mapped onto the note stack.
pub struct KeyboardController {
    white_keys: Vec<KeyBinding>,
    black_keys: Vec<KeyBinding>,
    lookup: HashMap<KeyCode, KeyBinding>,
    held_keys: Vec<(KeyCode, u8)>,
    notes: NoteStack,
    mode: VoiceMode,
    velocity: f32,
    octave_shift: i32,
    min_shift: i32,
    max_shift: i32,
    mouse_active: Option<KeyCode>,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self::new(VoiceMode::Mono)
    }
}

impl KeyboardController {
    pub fn new(mode: VoiceMode) -> Self {
        let white_keys = vec![
            KeyBinding::new("Z", KeyCode::Z, 48, 0.0),
            KeyBinding::new("X", KeyCode::X, 50, 1.0),
            KeyBinding::new("C", KeyCode::C, 52, 2.0),
            KeyBinding::new("V", KeyCode::V, 53, 3.0),
            KeyBinding::new("B", KeyCode::B, 55, 4.0),
            KeyBinding::new("N", KeyCode::N, 57, 5.0),
            KeyBinding::new("M", KeyCode::M, 59, 6.0),
            KeyBinding::new(",", KeyCode::Comma, 60, 7.0),
            KeyBinding::new(".", KeyCode::Period, 62, 8.0),
            KeyBinding::new("/", KeyCode::Slash, 64, 9.0),
        ];

        let black_keys = vec![
            KeyBinding::new("S", KeyCode::S, 49, 0.105),
            KeyBinding::new("D", KeyCode::D, 51, 0.205),
            KeyBinding::new("G", KeyCode::G, 54, 0.3888889),
            KeyBinding::new("H", KeyCode::H, 56, 0.5),
            KeyBinding::new("J", KeyCode::J, 58, 0.6111111),
            KeyBinding::new("L", KeyCode::L, 61, 0.79),
            KeyBinding::new(";", KeyCode::Semicolon, 63, 0.9),
            KeyBinding::new("'", KeyCode::Apostrophe, 66, 1.05),
            KeyBinding::new("]", KeyCode::RightBracket, 68, 1.2),
            KeyBinding::new("\\", KeyCode::Backslash, 70, 1.35),
        ];

        let mut lookup = HashMap::new();
        for binding in white_keys.iter().chain(black_keys.iter()) {
            lookup.insert(binding.keycode, binding.clone());
        }

        let min_note = white_keys
            .iter()
            .chain(black_keys.iter())
            .map(|k| k.midi)
            .min()
            .unwrap_or(MIDI_MIN);
        let max_note = white_keys
            .iter()
            .chain(black_keys.iter())
            .map(|k| k.midi)
            .max()
            .unwrap_or(MIDI_MAX);

        let min_shift = ((MIDI_MIN - min_note) as f32 / 12.0).ceil() as i32;
        let max_shift = ((MIDI_MAX - max_note) as f32 / 12.0).floor() as i32;

        Self {
            white_keys,
            black_keys,
            lookup,
            held_keys: Vec::new(),
            notes: NoteStack::new(),
            mode,
            velocity: 1.0,
            octave_shift: 0,
            min_shift,
            max_shift,
            mouse_active: None,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity.clamp(0.0, 1.0);
        self
    }

    pub fn with_octave(mut self, octave: i32) -> Self {
        self.adjust_octave(octave);
        self
    }

    /// Reads the macroquad key state for this frame.
    pub fn poll(&mut self) -> Vec<Command> {
        if is_key_pressed(KeyCode::Minus) {
            self.adjust_octave(-1);
        }
        if is_key_pressed(KeyCode::Equal) {
            self.adjust_octave(1);
        }

        let mut commands = Vec::new();
        let keycodes: Vec<KeyCode> = self.lookup.keys().copied().collect();
        for keycode in keycodes {
            if is_key_released(keycode) {
                commands.extend(self.release_key(keycode));
            }
            if is_key_pressed(keycode) {
                commands.extend(self.press_key(keycode));
            }
        }
        commands
    }

    pub fn handle_mouse_keys(
        &mut self,
        hovered: Option<KeyCode>,
        mouse_pressed: bool,
        mouse_down: bool,
        mouse_released: bool,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        if mouse_pressed {
            if let Some(code) = hovered {
                self.mouse_active = Some(code);
                commands.extend(self.press_key(code));
            }
        }
        if mouse_down {
            if let Some(active) = self.mouse_active {
                if let Some(hit) = hovered {
                    if hit != active {
                        commands.extend(self.release_key(active));
                        self.mouse_active = Some(hit);
                        commands.extend(self.press_key(hit));
                    }
                } else {
                    commands.extend(self.release_key(active));
                    self.mouse_active = None;
                }
            }
        }
        if mouse_released {
            if let Some(active) = self.mouse_active.take() {
                commands.extend(self.release_key(active));
            }
        }
        commands
    }

    /// Pushes `pitch` and returns its `note_on`, or nothing if it is already held.
    pub fn press(&mut self, pitch: u8, velocity: f32) -> Option<Command> {
        if !self.notes.push(pitch) {
            return None;
        }
        Some(Command::note_on(NoteEvent { midi: pitch, velocity }))
    }

    pub fn release(&mut self, pitch: u8) -> Option<Command> {
        if !self.notes.remove(pitch) {
            return None;
        }
        match self.mode {
            VoiceMode::Poly => {
                if self.notes.current() == Some(pitch) {
                    self.notes.set_current(self.notes.top());
                }
                Some(Command::NoteOff { midi: Some(pitch) })
            }
            VoiceMode::Mono => {
                if self.notes.current() != Some(pitch) {
                    return None;
                }
                match self.notes.top() {
                    Some(top) => {
                        self.notes.set_current(Some(top));
                        Some(Command::note_on(NoteEvent {
                            midi: top,
                            velocity: 1.0,
                        }))
                    }
                    None => {
                        self.notes.set_current(None);
                        Some(Command::NoteOff { midi: None })
                    }
                }
            }
        }
    }

    pub fn press_key(&mut self, keycode: KeyCode) -> Option<Command> {
        if self.is_pressed(keycode) {
            return None;
        }
        let pitch = self.pitch_for(keycode)?;
        let command = self.press(pitch, self.velocity)?;
        self.held_keys.push((keycode, pitch));
        Some(command)
    }

    /// Releases the pitch `keycode` pressed, even if the octave has moved since.
    pub fn release_key(&mut self, keycode: KeyCode) -> Option<Command> {
        let index = self.held_keys.iter().position(|(code, _)| *code == keycode)?;
        let (_, pitch) = self.held_keys.remove(index);
        self.release(pitch)
    }

    fn pitch_for(&self, keycode: KeyCode) -> Option<u8> {
        let binding = self.lookup.get(&keycode)?;
        let midi = (binding.midi + self.octave_shift * 12).clamp(MIDI_MIN, MIDI_MAX);
        u8::try_from(midi).ok()
    }

    fn adjust_octave(&mut self, delta: i32) {
        let new_shift = (self.octave_shift + delta).clamp(self.min_shift, self.max_shift);
        if new_shift != self.octave_shift {
            log::debug!(target: "control", "octave shift {new_shift}");
        }
        self.octave_shift = new_shift;
    }

    pub fn is_pressed(&self, keycode: KeyCode) -> bool {
        self.held_keys.iter().any(|(code, _)| *code == keycode)
    }

    pub fn current(&self) -> Option<u8> {
        self.notes.current()
    }

    pub fn held(&self) -> &[u8] {
        self.notes.held()
    }

    pub fn mode(&self) -> VoiceMode {
        self.mode
    }

    pub fn octave_shift(&self) -> i32 {
        self.octave_shift
    }

    pub fn white_keys(&self) -> &[KeyBinding] {
        &self.white_keys
    }

    pub fn black_keys(&self) -> &[KeyBinding] {
        &self.black_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(midi: u8, velocity: f32) -> Option<Command> {
        Some(Command::NoteOn { midi, velocity })
    }

    #[test]
    fn mono_release_of_current_retriggers_previous() {
        let mut keys = KeyboardController::new(VoiceMode::Mono);
        assert_eq!(keys.press(60, 0.8), note_on(60, 0.8));
        assert_eq!(keys.press(64, 0.8), note_on(64, 0.8));
        assert_eq!(keys.release(64), note_on(60, 1.0));
        assert_eq!(keys.current(), Some(60));
        assert_eq!(keys.release(60), Some(Command::NoteOff { midi: None }));
        assert_eq!(keys.current(), None);
    }

    #[test]
    fn mono_release_of_buried_pitch_is_silent() {
        let mut keys = KeyboardController::new(VoiceMode::Mono);
        keys.press(60, 1.0);
        keys.press(64, 1.0);
        keys.press(67, 1.0);
        assert_eq!(keys.release(64), None);
        assert_eq!(keys.current(), Some(67));
        assert_eq!(keys.held(), &[60, 67]);
    }

    #[test]
    fn repeated_press_is_debounced() {
        let mut keys = KeyboardController::default();
        assert!(keys.press(60, 1.0).is_some());
        assert_eq!(keys.press(60, 1.0), None);
        assert_eq!(keys.release(61), None);
    }

    #[test]
    fn poly_release_targets_the_pitch() {
        let mut keys = KeyboardController::new(VoiceMode::Poly);
        keys.press(60, 1.0);
        keys.press(64, 1.0);
        assert_eq!(keys.release(60), Some(Command::NoteOff { midi: Some(60) }));
        assert_eq!(keys.release(64), Some(Command::NoteOff { midi: Some(64) }));
        assert_eq!(keys.current(), None);
    }

    #[test]
    fn key_remembers_pitch_across_octave_change() {
        let mut keys = KeyboardController::new(VoiceMode::Mono).with_velocity(0.5);
        assert_eq!(keys.press_key(KeyCode::Z), note_on(48, 0.5));
        keys.adjust_octave(1);
        assert_eq!(keys.press_key(KeyCode::X), note_on(62, 0.5));
        assert_eq!(keys.release_key(KeyCode::Z), None);
        assert_eq!(keys.release_key(KeyCode::X), Some(Command::NoteOff { midi: None }));
    }

    #[test]
    fn octave_shift_is_clamped_to_piano_range() {
        let keys = KeyboardController::default().with_octave(10);
        assert_eq!(keys.octave_shift(), 3);
        let keys = KeyboardController::default().with_octave(-10);
        assert_eq!(keys.octave_shift(), -2);
    }

    #[test]
    fn mouse_drag_moves_between_keys() {
        let mut keys = KeyboardController::new(VoiceMode::Mono);
        let pressed = keys.handle_mouse_keys(Some(KeyCode::Z), true, true, false);
        assert_eq!(pressed, vec![Command::NoteOn { midi: 48, velocity: 1.0 }]);

        let dragged = keys.handle_mouse_keys(Some(KeyCode::X), false, true, false);
        assert_eq!(
            dragged,
            vec![
                Command::NoteOff { midi: None },
                Command::NoteOn { midi: 50, velocity: 1.0 }
            ]
        );
        assert!(keys.is_pressed(KeyCode::X));
        assert!(!keys.is_pressed(KeyCode::Z));

        let released = keys.handle_mouse_keys(Some(KeyCode::X), false, false, true);
        assert_eq!(released, vec![Command::NoteOff { midi: None }]);
    }
}
