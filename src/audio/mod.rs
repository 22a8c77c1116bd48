//! Audio side of the visualizer: decoding, device mixing, playback control
//! and the sample tap that feeds the shader.
//!
//! Two threads meet here. The device callback mixes PCM and hands every mixed
//! chunk to the post-mix hook; the render thread owns everything else.

pub mod decode;
pub mod mixer;
pub mod playback;
pub mod tap;

use std::path::Path;

use crate::error::DecodeError;

pub use mixer::CpalMixer;
pub use playback::{PlaybackController, PlaybackState};
pub use tap::{SampleTap, TapFormat};

/// Callback receiving each mixed chunk as raw interleaved PCM bytes.
///
/// Invoked on the audio device thread.
pub type PostMixHook = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// How often a track repeats once it reaches its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loops {
    Infinite,
    /// Repeats left after the current pass (0 = play once)
    Count(u32),
}

/// The decode/mix subsystem the playback controller drives.
pub trait AudioBackend {
    /// Owned, decoded track resource
    type Track;

    /// Layout of the bytes delivered to the post-mix hook
    fn format(&self) -> TapFormat;

    fn load_track(&mut self, path: &Path) -> Result<Self::Track, DecodeError>;

    /// Start `track` from the beginning, replacing whatever was playing
    fn play(&mut self, track: &Self::Track, loops: Loops);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stop output entirely
    fn halt(&mut self);

    /// Free a retired track
    fn release(&mut self, track: Self::Track);

    /// Install (or with `None`, remove) the post-mix hook. Replaces any
    /// previous hook.
    fn set_post_mix(&mut self, hook: Option<PostMixHook>);
}
