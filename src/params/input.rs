//! Key bindings for the actions the event router understands.

use crate::events::Key;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keybindings {
    pub quit: Key,
    pub toggle_pause: Key,
    pub reload_shaders: Key,
}

impl Default for Keybindings {
    fn default() -> Self {
        Self {
            quit: Key::Escape,
            toggle_pause: Key::Space,
            reload_shaders: Key::Char('r'),
        }
    }
}
