//! Configuration with units and documented defaults.
//!
//! Defaults reproduce the reference setup: 22.05 kHz signed 16-bit stereo,
//! 512-frame chunks, an 800×600 window and the shaders under `shaders/`.

mod audio;
mod input;
mod render;

pub use audio::{AudioSpec, SampleEncoding};
pub use input::Keybindings;
pub use render::{RenderConfig, ShaderSources};
