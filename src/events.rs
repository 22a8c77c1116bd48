//! Platform events and the router that turns each one into a single state
//! transition on the scene.

use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::audio::AudioBackend;
use crate::error::{Disposition, Phase, PlaybackError, VisualizerError};
use crate::frame::Scene;
use crate::params::{Keybindings, ShaderSources};
use crate::rendering::GraphicsBackend;

/// Keys the router can bind to actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Space,
    /// Printable key, lowercased
    Char(char),
    Other,
}

/// Windowing/input event, already translated from the platform's types.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    Quit,
    Key(Key),
    /// Touch/tap gesture
    Tap,
    Resized { width: u32, height: u32 },
    FileDropped(PathBuf),
    /// Pointer position in window pixels
    PointerMoved { x: f64, y: f64 },
    PointerLeft,
    Other,
}

/// Non-blocking event poll.
pub trait EventSource {
    /// Next pending event, or `None` when the queue is drained
    fn poll_event(&mut self) -> Option<PlatformEvent>;
}

/// FIFO of translated events, filled by the windowing callback.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<PlatformEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PlatformEvent) {
        self.pending.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl EventSource for EventQueue {
    fn poll_event(&mut self) -> Option<PlatformEvent> {
        self.pending.pop_front()
    }
}

pub struct EventRouter {
    keys: Keybindings,
    sources: ShaderSources,
}

impl EventRouter {
    pub fn new(keys: Keybindings, sources: ShaderSources) -> Self {
        Self { keys, sources }
    }

    pub fn sources(&self) -> &ShaderSources {
        &self.sources
    }

    /// Apply one event. Recoverable failures are logged here and never
    /// propagate.
    pub fn dispatch<G, A>(&self, event: PlatformEvent, scene: &mut Scene<G, A>)
    where
        G: GraphicsBackend,
        A: AudioBackend,
    {
        match event {
            PlatformEvent::Quit => scene.quit = true,
            PlatformEvent::Key(key) if key == self.keys.quit => scene.quit = true,
            PlatformEvent::Key(key) if key == self.keys.toggle_pause => toggle_pause(scene),
            PlatformEvent::Tap => toggle_pause(scene),
            PlatformEvent::Key(key) if key == self.keys.reload_shaders => self.reload_shaders(scene),
            PlatformEvent::Resized { width, height } => {
                if width == 0 || height == 0 {
                    // Minimized
                    return;
                }
                scene.frame.viewport = (width, height);
                scene.gpu.resize_viewport(width, height);
                debug!("Viewport {}x{}", width, height);
            }
            PlatformEvent::FileDropped(path) => {
                if !path.is_file() {
                    warn!("Dropped path is not a file: {}", path.display());
                    return;
                }
                if let Err(err) = scene.playback.load(&path) {
                    absorb(err.into(), "Could not play dropped file");
                }
            }
            PlatformEvent::PointerMoved { x, y } => scene.frame.pointer = Some((x, y)),
            PlatformEvent::PointerLeft => scene.frame.pointer = None,
            PlatformEvent::Key(_) | PlatformEvent::Other => {}
        }
    }

    fn reload_shaders<G, A>(&self, scene: &mut Scene<G, A>)
    where
        G: GraphicsBackend,
        A: AudioBackend,
    {
        info!("Reloading shaders");
        if let Err(err) = scene.pipeline.reload(&mut scene.gpu, &self.sources) {
            absorb(err.into(), "Shader reload failed, keeping previous program");
        }
    }
}

fn toggle_pause<G, A>(scene: &mut Scene<G, A>)
where
    G: GraphicsBackend,
    A: AudioBackend,
{
    match scene.playback.toggle_pause() {
        Ok(state) => info!("Playback {:?}", state),
        Err(PlaybackError::NothingLoaded) => debug!("Nothing to pause, drop an audio file first"),
        Err(err) => absorb(err.into(), "Toggle pause failed"),
    }
}

fn absorb(err: VisualizerError, context: &str) {
    match err.disposition(Phase::SteadyState) {
        Disposition::Absorb => warn!("{}: {}", context, err),
        Disposition::Fatal => error!("{}: {}", context, err),
    }
}
