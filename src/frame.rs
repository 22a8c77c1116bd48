//! Per-frame state and the frame loop.
//!
//! `FrameLoop::step` runs exactly one iteration (drain events, advance time,
//! pack uniforms, draw, present). It can be driven by `run` or called from a
//! host scheduler once per redraw; it does not care which.

use std::time::{Duration, Instant};

use glam::{Mat4, Vec3};
use tracing::{debug, error, info};

use crate::audio::{AudioBackend, PlaybackController};
use crate::error::{Disposition, Phase, VisualizerError};
use crate::events::{EventRouter, EventSource};
use crate::params::RenderConfig;
use crate::rendering::GraphicsBackend;
use crate::shader::{ShaderPipeline, UniformKind, UniformLocation};

/// Upper bound on events handled per iteration
pub const MAX_EVENTS_PER_STEP: usize = 64;

const FPS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    /// Seconds since the loop started
    pub elapsed: f32,
    /// Drawable size (pixels)
    pub viewport: (u32, u32),
    /// Pointer/touch position in window pixels, if any
    pub pointer: Option<(f64, f64)>,
    pub transform: Mat4,
}

impl FrameState {
    pub fn new(viewport: (u32, u32)) -> Self {
        Self {
            elapsed: 0.0,
            viewport,
            pointer: None,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn update_transform(&mut self) {
        self.transform = pointer_transform(self.pointer, self.viewport);
    }
}

/// Translation to the pointer in normalized device coordinates, or identity
/// without a pointer.
pub fn pointer_transform(pointer: Option<(f64, f64)>, viewport: (u32, u32)) -> Mat4 {
    let (width, height) = viewport;
    match pointer {
        Some((x, y)) if width > 0 && height > 0 => {
            let ndc_x = (x / f64::from(width)) * 2.0 - 1.0;
            let ndc_y = 1.0 - (y / f64::from(height)) * 2.0;
            Mat4::from_translation(Vec3::new(ndc_x as f32, ndc_y as f32, 0.0))
        }
        _ => Mat4::IDENTITY,
    }
}

/// CPU-side image of the uniform block, laid out by reflected locations.
#[derive(Debug, Default)]
pub struct UniformBlock {
    bytes: Vec<u8>,
}

impl UniformBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero the block and size it to cover every member, rounded to 16 bytes.
    pub fn reset(&mut self, locations: impl IntoIterator<Item = UniformLocation>) {
        let end = locations
            .into_iter()
            .map(|l| (l.offset + l.kind.byte_len()) as usize)
            .max()
            .unwrap_or(0);
        self.bytes.clear();
        self.bytes.resize(end.next_multiple_of(16), 0);
    }

    /// Fill the block for one frame. Returns the `waveCount` uploaded.
    pub fn pack<P>(&mut self, pipeline: &ShaderPipeline<P>, frame: &FrameState, samples: &[f32]) -> u32 {
        self.reset(pipeline.locations().map(|(_, location)| location));

        if let Some(location) = pipeline.uniform_location("time") {
            self.set_float(location, frame.elapsed);
        }
        if let Some(location) = pipeline.uniform_location("transform") {
            self.set_mat4(location, &frame.transform);
        }
        if let Some(location) = pipeline.uniform_location("resolution") {
            self.set_vec2(location, [frame.viewport.0 as f32, frame.viewport.1 as f32]);
        }

        let mut count = samples.len();
        if let Some(location) = pipeline.uniform_location("waveData") {
            count = self.set_float_array(location, samples);
        }
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        if let Some(location) = pipeline.uniform_location("waveCount") {
            self.set_uint(location, count);
        }
        count
    }

    pub fn set_float(&mut self, location: UniformLocation, value: f32) {
        match location.kind {
            UniformKind::Float => self.put(location.offset, bytemuck::bytes_of(&value)),
            UniformKind::Uint => self.put(location.offset, bytemuck::bytes_of(&(value as u32))),
            _ => {}
        }
    }

    pub fn set_uint(&mut self, location: UniformLocation, value: u32) {
        match location.kind {
            UniformKind::Uint => self.put(location.offset, bytemuck::bytes_of(&value)),
            UniformKind::Float => self.put(location.offset, bytemuck::bytes_of(&(value as f32))),
            _ => {}
        }
    }

    pub fn set_vec2(&mut self, location: UniformLocation, value: [f32; 2]) {
        if location.kind == UniformKind::Vec2 {
            self.put(location.offset, bytemuck::bytes_of(&value));
        }
    }

    /// Column-major
    pub fn set_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        if location.kind == UniformKind::Mat4 {
            self.put(location.offset, bytemuck::bytes_of(&value.to_cols_array()));
        }
    }

    /// Write `samples` into a float array, zero-padding or truncating to its
    /// declared capacity. Returns how many samples were written.
    pub fn set_float_array(&mut self, location: UniformLocation, samples: &[f32]) -> usize {
        let UniformKind::FloatArray {
            elements,
            stride,
            components,
        } = location.kind
        else {
            return 0;
        };

        let components = components.max(1) as usize;
        let capacity = elements as usize * components;
        for i in 0..capacity {
            let value = samples.get(i).copied().unwrap_or(0.0);
            let element = (i / components) as u32;
            let lane = (i % components) as u32;
            self.put(location.offset + element * stride + lane * 4, bytemuck::bytes_of(&value));
        }
        samples.len().min(capacity)
    }

    fn put(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.bytes.len() {
            self.bytes.resize(end.next_multiple_of(16), 0);
        }
        self.bytes[start..end].copy_from_slice(data);
    }
}

/// Everything the render thread owns, passed explicitly to the router and
/// the frame loop.
pub struct Scene<G: GraphicsBackend, A: AudioBackend> {
    pub gpu: G,
    pub pipeline: ShaderPipeline<G::Program>,
    pub playback: PlaybackController<A>,
    pub frame: FrameState,
    pub quit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Quit,
}

/// Frames-per-second tracker (logged at debug)
#[derive(Debug)]
struct FpsCounter {
    since: Instant,
    frames: u32,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            since: Instant::now(),
            frames: 0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed >= FPS_INTERVAL {
            debug!("FPS: {:.1}", f64::from(self.frames) / elapsed.as_secs_f64());
            self.frames = 0;
            self.since = Instant::now();
        }
    }
}

pub struct FrameLoop<G: GraphicsBackend, A: AudioBackend> {
    scene: Scene<G, A>,
    router: EventRouter,
    clear_color: [f64; 4],
    clock: Instant,
    samples: Vec<f32>,
    uniforms: UniformBlock,
    fatal: Option<VisualizerError>,
    frames: u64,
    fps: FpsCounter,
}

impl<G: GraphicsBackend, A: AudioBackend> FrameLoop<G, A> {
    /// Compile the initial shaders and assemble the scene.
    ///
    /// Any failure here is fatal: the caller should report it and exit.
    pub fn start(
        mut gpu: G,
        playback: PlaybackController<A>,
        router: EventRouter,
        render: &RenderConfig,
    ) -> Result<Self, VisualizerError> {
        let mut pipeline = ShaderPipeline::new();
        pipeline.reload(&mut gpu, router.sources())?;

        let capacity = playback.tap().capacity();
        let viewport = (render.window_width, render.window_height);
        info!(
            "Frame loop ready: {}x{}, tap capacity {}",
            viewport.0, viewport.1, capacity
        );

        Ok(Self {
            scene: Scene {
                gpu,
                pipeline,
                playback,
                frame: FrameState::new(viewport),
                quit: false,
            },
            router,
            clear_color: render.clear_color,
            clock: Instant::now(),
            samples: Vec::with_capacity(capacity),
            uniforms: UniformBlock::new(),
            fatal: None,
            frames: 0,
            fps: FpsCounter::new(),
        })
    }

    pub fn scene(&self) -> &Scene<G, A> {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene<G, A> {
        &mut self.scene
    }

    pub fn quit_requested(&self) -> bool {
        self.scene.quit
    }

    /// Frames drawn so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The error that stopped the loop, if one did
    pub fn fatal_error(&self) -> Option<&VisualizerError> {
        self.fatal.as_ref()
    }

    /// One iteration. Does nothing once quit has been requested.
    pub fn step(&mut self, events: &mut impl EventSource) -> StepOutcome {
        if self.scene.quit {
            return StepOutcome::Quit;
        }

        for _ in 0..MAX_EVENTS_PER_STEP {
            let Some(event) = events.poll_event() else {
                break;
            };
            self.router.dispatch(event, &mut self.scene);
        }

        self.render();

        if self.scene.quit {
            StepOutcome::Quit
        } else {
            StepOutcome::Continue
        }
    }

    /// Step until quit
    pub fn run(&mut self, events: &mut impl EventSource) {
        while self.step(events) == StepOutcome::Continue {}
    }

    fn render(&mut self) {
        let scene = &mut self.scene;
        scene.frame.elapsed = self.clock.elapsed().as_secs_f32();
        scene.frame.update_transform();
        scene.playback.tap().snapshot_into(&mut self.samples);

        let Some(program) = scene.pipeline.program() else {
            return;
        };
        self.uniforms.pack(&scene.pipeline, &scene.frame, &self.samples);

        let result = scene
            .gpu
            .draw_frame(program, self.uniforms.as_bytes(), self.clear_color);

        if let Err(err) = result {
            let err = VisualizerError::from(err);
            match err.disposition(Phase::SteadyState) {
                Disposition::Absorb => debug!("Frame skipped: {}", err),
                Disposition::Fatal => {
                    error!("Render failed: {}", err);
                    scene.quit = true;
                    self.fatal = Some(err);
                }
            }
            return;
        }

        self.frames += 1;
        self.fps.tick();
    }

    /// Release GPU geometry, the shader program and the playback session, in
    /// that order, then drop the backends.
    ///
    /// Returns the fatal error that ended the loop, if any.
    pub fn shutdown(self) -> Result<(), VisualizerError> {
        let Scene {
            mut gpu,
            mut pipeline,
            mut playback,
            ..
        } = self.scene;

        gpu.release_geometry();
        pipeline.destroy(&mut gpu);
        playback.stop();
        drop(playback);
        drop(gpu);

        info!("Shut down after {} frames", self.frames);
        match self.fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
