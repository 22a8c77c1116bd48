//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::params::{AudioSpec, RenderConfig, ShaderSources};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "wavetap")]
#[command(about = "Audio-reactive shader visualizer", long_about = None)]
pub struct Args {
    /// Track to start playing (same as dropping it on the window)
    #[arg(value_name = "TRACK")]
    pub track: Option<PathBuf>,

    /// Vertex shader (WGSL)
    #[arg(long, value_name = "PATH", default_value = "shaders/default.vert.wgsl")]
    pub vertex_shader: PathBuf,

    /// Fragment shader (WGSL)
    #[arg(long, value_name = "PATH", default_value = "shaders/default.frag.wgsl")]
    pub fragment_shader: PathBuf,

    /// Output sample rate (Hz)
    #[arg(long, value_name = "HZ", default_value = "22050")]
    pub frequency: u32,

    /// Frames per audio callback
    #[arg(long, value_name = "FRAMES", default_value = "512")]
    pub chunk_size: u32,

    /// Initial window width (pixels)
    #[arg(long, value_name = "PIXELS", default_value = "800")]
    pub width: u32,

    /// Initial window height (pixels)
    #[arg(long, value_name = "PIXELS", default_value = "600")]
    pub height: u32,

    /// Present without waiting for vblank
    #[arg(long)]
    pub no_vsync: bool,

    /// Log filter used when RUST_LOG is not set (e.g. "debug", "wavetap=trace")
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Args {
    pub fn audio_spec(&self) -> AudioSpec {
        AudioSpec {
            frequency_hz: self.frequency,
            chunk_size: self.chunk_size,
            ..AudioSpec::default()
        }
    }

    pub fn render_config(&self) -> RenderConfig {
        RenderConfig {
            window_width: self.width,
            window_height: self.height,
            vsync: !self.no_vsync,
            ..RenderConfig::default()
        }
    }

    pub fn shader_sources(&self) -> ShaderSources {
        ShaderSources {
            vertex: self.vertex_shader.clone(),
            fragment: self.fragment_shader.clone(),
        }
    }

    /// Filter directive for the log subscriber
    pub fn log_filter(&self) -> String {
        match &self.log_level {
            Some(level) if level.contains('=') => level.clone(),
            Some(level) => format!("wavetap={level}"),
            None => "wavetap=info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_params() {
        let args = Args::parse_from(["wavetap"]);

        let audio = args.audio_spec();
        assert_eq!(audio.frequency_hz, AudioSpec::default().frequency_hz);
        assert_eq!(audio.chunk_size, AudioSpec::default().chunk_size);

        let render = args.render_config();
        assert_eq!((render.window_width, render.window_height), (800, 600));
        assert!(render.vsync);

        let sources = args.shader_sources();
        assert_eq!(sources.vertex, ShaderSources::default().vertex);
        assert_eq!(sources.fragment, ShaderSources::default().fragment);
        assert!(args.track.is_none());
        assert_eq!(args.log_filter(), "wavetap=info");
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "wavetap",
            "song.ogg",
            "--fragment-shader",
            "my.frag.wgsl",
            "--frequency",
            "44100",
            "--chunk-size",
            "1024",
            "--no-vsync",
            "--log-level",
            "debug",
        ]);

        assert_eq!(args.track, Some(PathBuf::from("song.ogg")));
        assert_eq!(args.shader_sources().fragment, PathBuf::from("my.frag.wgsl"));
        assert_eq!(args.audio_spec().frequency_hz, 44_100);
        assert_eq!(args.audio_spec().tap_capacity(), 2048);
        assert!(!args.render_config().vsync);
        assert_eq!(args.log_filter(), "wavetap=debug");
    }
}
