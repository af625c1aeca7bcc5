use std::collections::HashMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Discrete movement symbol delivered to the render module once per frame.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Movement {
    #[default]
    None = 0,
    Forward = 1,
    StrafeLeft = 2,
    Backward = 3,
    StrafeRight = 4,
    Up = 5,
    Down = 6,
}

impl Movement {
    pub fn from_name(name: &str) -> Option<Self> {
        let movement = match name.trim().to_ascii_lowercase().as_str() {
            "none" | "-" => Movement::None,
            "forward" | "w" => Movement::Forward,
            "left" | "strafe-left" | "a" => Movement::StrafeLeft,
            "backward" | "back" | "s" => Movement::Backward,
            "right" | "strafe-right" | "d" => Movement::StrafeRight,
            "up" => Movement::Up,
            "down" => Movement::Down,
            _ => return None,
        };
        Some(movement)
    }
}

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Function(u8),
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(key);
        }
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphanumeric() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
        }
        if let Some(function) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
            if let Ok(index) = function.parse::<u8>() {
                if (1..=25).contains(&index) {
                    return Some(Self::Function(index));
                }
            }
        }
        None
    }
}

fn parse_named_key(name: &str) -> Option<KeyCode> {
    use NamedKey::*;
    let key = match name {
        "Space" => Space,
        "Escape" | "Esc" => Escape,
        "Left" => Left,
        "Right" => Right,
        "Up" => Up,
        "Down" => Down,
        "LeftShift" | "LShift" => LeftShift,
        "RightShift" | "RShift" => RightShift,
        "LeftCtrl" | "LControl" => LeftCtrl,
        "RightCtrl" | "RControl" => RightCtrl,
        _ => return None,
    };
    Some(KeyCode::Named(key))
}

/// Friendly names for the non-character keys the host cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Escape,
    Left,
    Right,
    Up,
    Down,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
}

/// Maps keys to movement symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementBindings {
    keys: HashMap<KeyCode, Movement>,
}

impl Default for MovementBindings {
    fn default() -> Self {
        let keys = [
            (KeyCode::Character('W'), Movement::Forward),
            (KeyCode::Character('A'), Movement::StrafeLeft),
            (KeyCode::Character('S'), Movement::Backward),
            (KeyCode::Character('D'), Movement::StrafeRight),
            (KeyCode::Named(NamedKey::Space), Movement::Up),
            (KeyCode::Named(NamedKey::LeftShift), Movement::Down),
        ]
        .into_iter()
        .collect();
        Self { keys }
    }
}

impl MovementBindings {
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn bind(&mut self, key: KeyCode, movement: Movement) {
        self.keys.insert(key, movement);
    }

    pub fn movement_for(&self, key: KeyCode) -> Option<Movement> {
        self.keys.get(&key).copied()
    }
}

/// Input reduced to what a single frame consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameInput {
    pub movement: Movement,
    pub cursor_delta: Vec2,
}

/// Collects key and cursor events between frames.
///
/// Held movement keys are tracked in press order so the most recently
/// pressed one wins while several are down.
#[derive(Debug, Default)]
pub struct InputCollector {
    bindings: MovementBindings,
    held: Vec<Movement>,
    cursor: Option<Vec2>,
    last_cursor: Option<Vec2>,
    quit: bool,
    reload: bool,
}

impl InputCollector {
    pub fn new(bindings: MovementBindings) -> Self {
        Self {
            bindings,
            ..Self::default()
        }
    }

    pub fn key(&mut self, key: KeyCode, pressed: bool) {
        match key {
            KeyCode::Named(NamedKey::Escape) if pressed => self.quit = true,
            KeyCode::Function(5) if pressed => self.reload = true,
            _ => {}
        }
        if let Some(movement) = self.bindings.movement_for(key) {
            self.movement(movement, pressed);
        }
    }

    pub fn movement(&mut self, movement: Movement, pressed: bool) {
        self.held.retain(|held| *held != movement);
        if pressed && movement != Movement::None {
            self.held.push(movement);
        }
    }

    pub fn cursor_moved(&mut self, position: Vec2) {
        self.cursor = Some(position);
    }

    /// Relative motion from a grabbed pointer, applied to a virtual cursor.
    pub fn cursor_motion(&mut self, delta: Vec2) {
        let current = self.cursor.or(self.last_cursor).unwrap_or(Vec2::ZERO);
        self.last_cursor.get_or_insert(current);
        self.cursor = Some(current + delta);
    }

    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    /// Returns and clears a pending manual reload request.
    pub fn take_reload_request(&mut self) -> bool {
        std::mem::take(&mut self.reload)
    }

    /// Collapses the pending events into one frame of input.
    pub fn take_frame(&mut self) -> FrameInput {
        let movement = self.held.last().copied().unwrap_or_default();
        let cursor_delta = match (self.cursor, self.last_cursor) {
            (Some(current), Some(previous)) => current - previous,
            _ => Vec2::ZERO,
        };
        if self.cursor.is_some() {
            self.last_cursor = self.cursor;
        }
        FrameInput {
            movement,
            cursor_delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w() -> KeyCode {
        KeyCode::Character('W')
    }

    fn d() -> KeyCode {
        KeyCode::Character('D')
    }

    #[test]
    fn parses_named_and_character_keys() {
        assert_eq!(
            KeyCode::from_name("Space"),
            Some(KeyCode::Named(NamedKey::Space))
        );
        assert_eq!(KeyCode::from_name("w"), Some(KeyCode::Character('W')));
        assert_eq!(KeyCode::from_name("F5"), Some(KeyCode::Function(5)));
        assert_eq!(KeyCode::from_name("Hyper"), None);
    }

    #[test]
    fn parses_movement_names() {
        assert_eq!(Movement::from_name("forward"), Some(Movement::Forward));
        assert_eq!(Movement::from_name(" Left "), Some(Movement::StrafeLeft));
        assert_eq!(Movement::from_name("down"), Some(Movement::Down));
        assert_eq!(Movement::from_name("sideways"), None);
    }

    #[test]
    fn last_pressed_key_wins() {
        let mut input = InputCollector::new(MovementBindings::default());
        input.key(w(), true);
        input.key(d(), true);
        assert_eq!(input.take_frame().movement, Movement::StrafeRight);

        input.key(d(), false);
        assert_eq!(input.take_frame().movement, Movement::Forward);

        input.key(w(), false);
        assert_eq!(input.take_frame().movement, Movement::None);
    }

    #[test]
    fn repeated_press_moves_key_to_the_top() {
        let mut input = InputCollector::new(MovementBindings::default());
        input.key(w(), true);
        input.key(d(), true);
        input.key(w(), true);
        assert_eq!(input.take_frame().movement, Movement::Forward);
    }

    #[test]
    fn cursor_delta_is_relative_to_previous_frame() {
        let mut input = InputCollector::default();
        input.cursor_moved(Vec2::new(10.0, 10.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::ZERO);

        input.cursor_moved(Vec2::new(14.0, 7.0));
        input.cursor_moved(Vec2::new(15.0, 8.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::new(5.0, -2.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::ZERO);
    }

    #[test]
    fn relative_motion_accumulates_until_taken() {
        let mut input = InputCollector::default();
        input.cursor_motion(Vec2::new(3.0, 4.0));
        input.cursor_motion(Vec2::new(1.0, 1.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::new(4.0, 5.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::ZERO);
        input.cursor_motion(Vec2::new(-2.0, 0.0));
        assert_eq!(input.take_frame().cursor_delta, Vec2::new(-2.0, 0.0));
    }

    #[test]
    fn escape_and_f5_raise_requests() {
        let mut input = InputCollector::default();
        input.key(KeyCode::Function(5), true);
        assert!(input.take_reload_request());
        assert!(!input.take_reload_request());

        assert!(!input.quit_requested());
        input.key(KeyCode::Named(NamedKey::Escape), true);
        assert!(input.quit_requested());
    }
}
