//! wavetap - audio-reactive shader visualizer
//!
//! A dropped audio track plays in a loop while its most recent waveform
//! window is fed to a hot-reloadable WGSL fragment shader every frame.

pub mod audio;
pub mod cli;
pub mod error;
pub mod events;
pub mod frame;
pub mod params;
pub mod rendering;
pub mod shader;

#[cfg(test)]
mod testing;
