//! Playback session state machine.
//!
//! `Idle → Loading → Playing ⇄ Paused → Idle`. A failed load returns to the
//! state it started from, so a bad file drop never disturbs the running track.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::{AudioBackend, Loops, SampleTap};
use crate::error::PlaybackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Owns the decode/playback session and the tap's hook registration.
pub struct PlaybackController<A: AudioBackend> {
    backend: A,
    tap: Arc<SampleTap>,
    state: PlaybackState,
    active: Option<A::Track>,
    hook_attached: bool,
}

impl<A: AudioBackend> PlaybackController<A> {
    pub fn new(backend: A, tap: Arc<SampleTap>) -> Self {
        Self {
            backend,
            tap,
            state: PlaybackState::Idle,
            active: None,
            hook_attached: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// True only while a loaded track is audibly playing
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing && self.active.is_some()
    }

    pub fn active_track(&self) -> Option<&A::Track> {
        self.active.as_ref()
    }

    pub fn hook_attached(&self) -> bool {
        self.hook_attached
    }

    pub fn tap(&self) -> &Arc<SampleTap> {
        &self.tap
    }

    pub fn backend(&self) -> &A {
        &self.backend
    }

    /// Decode `path` and start it looping.
    ///
    /// The previous track is stopped and released only once the new one has
    /// decoded. On failure nothing changes.
    pub fn load(&mut self, path: &Path) -> Result<(), PlaybackError> {
        let prior = self.state;
        self.state = PlaybackState::Loading;

        let track = match self.backend.load_track(path) {
            Ok(track) => track,
            Err(err) => {
                self.state = prior;
                return Err(err.into());
            }
        };

        self.retire_active();
        self.backend.play(&track, Loops::Infinite);
        self.active = Some(track);
        self.attach_hook();
        self.state = PlaybackState::Playing;

        info!("Playing {}", path.display());
        Ok(())
    }

    /// Pause if playing, resume if paused.
    pub fn toggle_pause(&mut self) -> Result<PlaybackState, PlaybackError> {
        match self.state {
            PlaybackState::Playing => {
                self.backend.pause();
                self.state = PlaybackState::Paused;
            }
            PlaybackState::Paused => {
                self.backend.resume();
                self.state = PlaybackState::Playing;
            }
            PlaybackState::Idle | PlaybackState::Loading => {
                return Err(PlaybackError::NothingLoaded);
            }
        }
        debug!("Playback {:?}", self.state);
        Ok(self.state)
    }

    /// Stop and unload. Safe to call when idle.
    pub fn stop(&mut self) {
        self.retire_active();
        self.state = PlaybackState::Idle;
    }

    fn retire_active(&mut self) {
        self.detach_hook();
        if let Some(previous) = self.active.take() {
            self.backend.halt();
            self.backend.release(previous);
        }
    }

    // Always detach first so a hook is never registered twice.
    fn attach_hook(&mut self) {
        self.detach_hook();
        self.backend.set_post_mix(Some(SampleTap::hook(&self.tap)));
        self.hook_attached = true;
    }

    fn detach_hook(&mut self) {
        if self.hook_attached {
            self.backend.set_post_mix(None);
            self.hook_attached = false;
        }
    }
}
