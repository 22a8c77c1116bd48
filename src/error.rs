//! Error taxonomy shared by every component.
//!
//! Components return their own error enums; [`VisualizerError`] unifies them
//! so the event router can decide whether a failure is fatal (startup) or
//! absorbed (steady state) without the failing component knowing which.

use std::path::PathBuf;

use thiserror::Error;

use crate::shader::ShaderStage;

/// A track could not be turned into playable PCM.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio in {}: {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },

    #[error("failed to decode {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to resample audio: {0}")]
    Resample(String),
}

/// Audio device / stream failures.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device found")]
    NoDevice,

    #[error("audio device configuration failed: {0}")]
    Config(String),

    #[error("audio stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("no track is loaded")]
    NothingLoaded,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("failed to read shader source {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },

    #[error("shader program failed to link:\n{log}")]
    Link { log: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create surface: {0}")]
    Surface(String),

    #[error("no suitable GPU adapter found")]
    Adapter,

    #[error("failed to request GPU device: {0}")]
    Device(String),

    /// Swapchain was lost or outdated and has been reconfigured; the frame is skipped.
    #[error("surface lost, reconfigured")]
    SurfaceLost,

    #[error("timed out acquiring the next frame")]
    Timeout,

    #[error("GPU out of memory")]
    OutOfMemory,
}

/// When an error happened, which decides how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    SteadyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Abort: report and exit with failure status.
    Fatal,
    /// Log, keep the previous state, keep running.
    Absorb,
}

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("window error: {0}")]
    Window(String),
}

impl From<DecodeError> for VisualizerError {
    fn from(err: DecodeError) -> Self {
        Self::Playback(PlaybackError::Decode(err))
    }
}

impl VisualizerError {
    /// Policy: everything is fatal during startup; at steady state only
    /// unrecoverable GPU and device failures are.
    pub fn disposition(&self, phase: Phase) -> Disposition {
        if phase == Phase::Startup {
            return Disposition::Fatal;
        }
        match self {
            Self::Shader(_) | Self::Playback(_) => Disposition::Absorb,
            Self::Render(RenderError::SurfaceLost | RenderError::Timeout) => Disposition::Absorb,
            Self::Render(_) | Self::Audio(_) | Self::Window(_) => Disposition::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        let err = VisualizerError::from(ShaderError::Link { log: "bad".into() });
        assert_eq!(err.disposition(Phase::Startup), Disposition::Fatal);
        assert_eq!(err.disposition(Phase::SteadyState), Disposition::Absorb);
    }

    #[test]
    fn test_steady_state_policy() {
        let lost = VisualizerError::from(RenderError::SurfaceLost);
        assert_eq!(lost.disposition(Phase::SteadyState), Disposition::Absorb);

        let oom = VisualizerError::from(RenderError::OutOfMemory);
        assert_eq!(oom.disposition(Phase::SteadyState), Disposition::Fatal);

        let missing = VisualizerError::from(DecodeError::NotFound("song.ogg".into()));
        assert_eq!(missing.disposition(Phase::SteadyState), Disposition::Absorb);
    }

    #[test]
    fn test_compile_error_display_names_stage() {
        let err = ShaderError::Compile {
            stage: ShaderStage::Fragment,
            log: "expected ';'".into(),
        };
        assert_eq!(err.to_string(), "fragment shader failed to compile:\nexpected ';'");
    }
}
