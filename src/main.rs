//! wavetap - audio-reactive shader visualizer
//!
//! Drop an audio file on the window to play it; the fragment shader sees its
//! waveform every frame. Space pauses, R reloads the shaders, Escape quits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key as WinitKey, NamedKey},
    window::{Window, WindowId},
};

use wavetap::audio::{AudioBackend, CpalMixer, PlaybackController, SampleTap};
use wavetap::cli::Args;
use wavetap::error::VisualizerError;
use wavetap::events::{EventQueue, EventRouter, Key, PlatformEvent};
use wavetap::frame::{FrameLoop, StepOutcome};
use wavetap::params::{Keybindings, RenderConfig};
use wavetap::rendering::WgpuBackend;

type Visualizer = FrameLoop<WgpuBackend, CpalMixer>;

/// Main application state
struct App {
    args: Args,
    render_config: RenderConfig,

    window: Option<Arc<Window>>,
    visualizer: Option<Visualizer>,
    events: EventQueue,

    /// Track shown in the window title
    titled_track: Option<PathBuf>,
    failure: Option<VisualizerError>,
}

impl App {
    fn new(args: Args) -> Self {
        let render_config = args.render_config();
        let mut events = EventQueue::new();
        if let Some(track) = &args.track {
            events.push(PlatformEvent::FileDropped(track.clone()));
        }

        Self {
            args,
            render_config,
            window: None,
            visualizer: None,
            events,
            titled_track: None,
            failure: None,
        }
    }

    /// Open the audio device, window and GPU, and compile the initial shaders
    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), VisualizerError> {
        let spec = self.args.audio_spec();
        let mixer = CpalMixer::open(&spec)?;
        info!(
            "Audio spec: {}Hz (device {}Hz), {}, {} channels, {} frames/chunk, {} bytes/frame, tap {} samples",
            spec.frequency_hz,
            mixer.sample_rate(),
            spec.format,
            spec.channels,
            spec.chunk_size,
            spec.bytes_per_frame(),
            spec.tap_capacity()
        );

        let tap = Arc::new(SampleTap::new(spec.tap_capacity(), mixer.format()));
        let playback = PlaybackController::new(mixer, tap);

        let window_attributes = Window::default_attributes()
            .with_title(self.render_config.title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.render_config.window_width,
                self.render_config.window_height,
            ));
        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .map_err(|e| VisualizerError::Window(e.to_string()))?,
        );

        let gpu = pollster::block_on(WgpuBackend::new(Arc::clone(&window), &self.render_config))?;
        let router = EventRouter::new(Keybindings::default(), self.args.shader_sources());
        let visualizer = FrameLoop::start(gpu, playback, router, &self.render_config)?;

        let size = window.inner_size();
        self.events.push(PlatformEvent::Resized {
            width: size.width,
            height: size.height,
        });

        info!("wavetap is running: drop an audio file on the window (Space pause, R reload, Esc quit)");
        self.window = Some(window);
        self.visualizer = Some(visualizer);
        Ok(())
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(visualizer) = self.visualizer.as_mut() else {
            return;
        };

        if visualizer.step(&mut self.events) == StepOutcome::Quit {
            event_loop.exit();
        }

        let track = visualizer
            .scene()
            .playback
            .active_track()
            .map(|track| track.path().to_path_buf());
        if track != self.titled_track {
            if let Some(window) = &self.window {
                window.set_title(&window_title(&self.render_config.title, track.as_deref()));
            }
            self.titled_track = track;
        }
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.visualizer.is_some() || self.failure.is_some() {
            return; // Already initialized
        }

        if let Err(err) = self.init(event_loop) {
            error!("Startup failed: {}", err);
            self.failure = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let translated = match event {
            WindowEvent::RedrawRequested => {
                self.render_frame(event_loop);
                return;
            }
            WindowEvent::CloseRequested => PlatformEvent::Quit,
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        repeat: false,
                        logical_key,
                        ..
                    },
                ..
            } => PlatformEvent::Key(map_key(&logical_key)),
            WindowEvent::Resized(size) => PlatformEvent::Resized {
                width: size.width,
                height: size.height,
            },
            WindowEvent::DroppedFile(path) => PlatformEvent::FileDropped(path),
            WindowEvent::CursorMoved { position, .. } => PlatformEvent::PointerMoved {
                x: position.x,
                y: position.y,
            },
            WindowEvent::CursorLeft { .. } => PlatformEvent::PointerLeft,
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started => PlatformEvent::Tap,
                TouchPhase::Moved => PlatformEvent::PointerMoved {
                    x: touch.location.x,
                    y: touch.location.y,
                },
                TouchPhase::Ended | TouchPhase::Cancelled => PlatformEvent::PointerLeft,
            },
            _ => return,
        };
        self.events.push(translated);
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(visualizer) = self.visualizer.take() {
            if let Err(err) = visualizer.shutdown() {
                self.failure = Some(err);
            }
        }
        self.window = None;
    }
}

fn map_key(key: &WinitKey) -> Key {
    match key {
        WinitKey::Named(NamedKey::Escape) => Key::Escape,
        WinitKey::Named(NamedKey::Space) => Key::Space,
        WinitKey::Character(text) => text
            .chars()
            .next()
            .map_or(Key::Other, |c| Key::Char(c.to_ascii_lowercase())),
        _ => Key::Other,
    }
}

fn window_title(base: &str, track: Option<&std::path::Path>) -> String {
    match track.and_then(|path| path.file_name()) {
        Some(name) => format!("{} - {}", base, name.to_string_lossy()),
        None => base.to_string(),
    }
}

fn init_tracing(fallback: &str) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .try_init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_filter());

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Failed to create event loop: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut app = App::new(args);
    if let Err(err) = event_loop.run_app(&mut app) {
        error!("Event loop error: {}", err);
        return ExitCode::FAILURE;
    }

    // Failures were logged where they happened
    if app.failure.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
