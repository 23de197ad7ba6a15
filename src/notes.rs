use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    /// Last-note priority; releasing the sounding note retriggers the previous held one.
    #[default]
    Mono,
    /// Every held pitch is independent and released on its own.
    Poly,
}

impl VoiceMode {
    pub fn label(&self) -> &'static str {
        match self {
            VoiceMode::Mono => "MONO",
            VoiceMode::Poly => "POLY",
        }
    }
}

/// Held pitches in press order.
#[derive(Debug, Default)]
pub struct NoteStack {
    held: Vec<u8>,
    current: Option<u8>,
}

impl NoteStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pitch: u8) -> bool {
        self.held.contains(&pitch)
    }

    /// Appends `pitch` and makes it current. Returns false if it was already held.
    pub fn push(&mut self, pitch: u8) -> bool {
        if self.contains(pitch) {
            return false;
        }
        self.held.push(pitch);
        self.current = Some(pitch);
        true
    }

    /// Removes every occurrence of `pitch`, keeping the order of the rest.
    pub fn remove(&mut self, pitch: u8) -> bool {
        let before = self.held.len();
        self.held.retain(|held| *held != pitch);
        self.held.len() != before
    }

    pub fn top(&self) -> Option<u8> {
        self.held.last().copied()
    }

    pub fn current(&self) -> Option<u8> {
        self.current
    }

    pub fn set_current(&mut self, pitch: Option<u8>) {
        self.current = pitch;
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn held(&self) -> &[u8] {
        &self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ignores_duplicates() {
        let mut stack = NoteStack::new();
        assert!(stack.push(60));
        assert!(!stack.push(60));
        assert_eq!(stack.held(), &[60]);
        assert_eq!(stack.current(), Some(60));
    }

    #[test]
    fn remove_keeps_relative_order() {
        let mut stack = NoteStack::new();
        for pitch in [60, 64, 67, 72] {
            stack.push(pitch);
        }
        assert!(stack.remove(64));
        assert_eq!(stack.held(), &[60, 67, 72]);
        assert_eq!(stack.top(), Some(72));
        assert!(!stack.remove(64));
    }

    #[test]
    fn empty_stack_has_no_top() {
        let mut stack = NoteStack::new();
        stack.push(48);
        stack.remove(48);
        assert!(stack.is_empty());
        assert_eq!(stack.top(), None);
    }
}
