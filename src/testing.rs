//! Test doubles for the GPU and the audio device, plus fixture helpers.

use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::audio::{AudioBackend, Loops, PlaybackController, PostMixHook, SampleTap, TapFormat};
use crate::error::{DecodeError, RenderError, VisualizerError};
use crate::events::EventRouter;
use crate::frame::{FrameLoop, FrameState, Scene};
use crate::params::{Keybindings, RenderConfig, ShaderSources};
use crate::rendering::GraphicsBackend;
use crate::shader::reflect::{self, StageModule, UniformLayout};
use crate::shader::{ShaderPipeline, ShaderStage, UniformLocation};

pub const DEFAULT_VERTEX: &str = include_str!("../shaders/default.vert.wgsl");
pub const DEFAULT_FRAGMENT: &str = include_str!("../shaders/default.frag.wgsl");

/// Shared, ordered record of backend calls
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

/// Interleave `(left, right)` pairs as native-endian S16 bytes.
pub fn s16_stereo_bytes(frames: &[(i16, i16)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames.len() * 4);
    for &(left, right) in frames {
        bytes.extend_from_slice(&left.to_ne_bytes());
        bytes.extend_from_slice(&right.to_ne_bytes());
    }
    bytes
}

/// Write a 440 Hz, half-scale 16-bit WAV.
pub fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = ((t * 440.0 * TAU).sin() * 0.5 * f32::from(i16::MAX)) as i16;
        for _ in 0..channels {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
}

pub fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

/// Temporary directory holding a copy of the shipped shaders.
pub struct ShaderDir {
    dir: TempDir,
}

impl ShaderDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let shaders = Self { dir };
        std::fs::write(shaders.sources().vertex, DEFAULT_VERTEX).unwrap();
        shaders.write_fragment(DEFAULT_FRAGMENT);
        shaders
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sources(&self) -> ShaderSources {
        ShaderSources {
            vertex: self.dir.path().join("test.vert.wgsl"),
            fragment: self.dir.path().join("test.frag.wgsl"),
        }
    }

    pub fn write_fragment(&self, source: &str) {
        std::fs::write(self.sources().fragment, source).unwrap();
    }
}

#[derive(Debug)]
pub struct FakeProgram {
    pub id: u64,
    layout: UniformLayout,
}

/// GPU stand-in. Runs the real WGSL front-end, records everything else.
#[derive(Debug, Default)]
pub struct FakeGpu {
    next_id: u64,
    pub destroyed: Vec<u64>,
    pub viewport: (u32, u32),
    pub draws: usize,
    pub last_program: Option<u64>,
    pub last_uniforms: Vec<u8>,
    pub last_clear: Option<[f64; 4]>,
    /// Returned (once) by the next `draw_frame`
    pub fail_next_draw: Option<RenderError>,
    pub journal: Journal,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }
}

impl GraphicsBackend for FakeGpu {
    type Module = StageModule;
    type Program = FakeProgram;

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageModule, String> {
        reflect::parse_stage(stage, source)
    }

    fn link(&mut self, vertex: &StageModule, fragment: &StageModule) -> Result<FakeProgram, String> {
        let layout = reflect::merge_uniforms(&vertex.uniforms, &fragment.uniforms)?;
        self.next_id += 1;
        Ok(FakeProgram {
            id: self.next_id,
            layout,
        })
    }

    fn uniform_location(&self, program: &FakeProgram, name: &str) -> Option<UniformLocation> {
        program.layout.get(name)
    }

    fn destroy_program(&mut self, program: FakeProgram) {
        self.journal.lock().push("destroy_program");
        self.destroyed.push(program.id);
    }

    fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn draw_frame(
        &mut self,
        program: &FakeProgram,
        uniforms: &[u8],
        clear_color: [f64; 4],
    ) -> Result<(), RenderError> {
        if let Some(err) = self.fail_next_draw.take() {
            return Err(err);
        }
        self.draws += 1;
        self.last_program = Some(program.id);
        self.last_uniforms = uniforms.to_vec();
        self.last_clear = Some(clear_color);
        Ok(())
    }

    fn release_geometry(&mut self) {
        self.journal.lock().push("release_geometry");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MixerCall {
    Load(PathBuf),
    Play(PathBuf, Loops),
    Pause,
    Resume,
    Halt,
    Release(PathBuf),
    /// `true` when a hook was installed, `false` when removed
    SetPostMix(bool),
}

#[derive(Debug)]
pub struct FakeTrack {
    pub path: PathBuf,
}

/// Audio device stand-in. Loads succeed for configured names and for any
/// existing file; `pump` plays the audio thread.
#[derive(Default)]
pub struct FakeMixer {
    known: Vec<PathBuf>,
    calls: Mutex<Vec<MixerCall>>,
    hook: Mutex<Option<PostMixHook>>,
    journal: Journal,
}

impl FakeMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(names: &[&str]) -> Self {
        Self {
            known: names.iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MixerCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of hooks currently registered (0 or 1)
    pub fn hooks_installed(&self) -> usize {
        usize::from(self.hook.lock().is_some())
    }

    /// Deliver `frames` of mixed S16 stereo to the hook. Returns false when
    /// no hook is registered.
    pub fn pump(&self, frames: usize) -> bool {
        let pairs: Vec<(i16, i16)> = (0..frames)
            .map(|i| {
                let value = ((i % 600) as i16 + 1) * 50;
                (value, -value)
            })
            .collect();
        let bytes = s16_stereo_bytes(&pairs);

        match self.hook.lock().as_mut() {
            Some(hook) => {
                hook(&bytes);
                true
            }
            None => false,
        }
    }

    fn record(&self, name: &'static str, call: MixerCall) {
        self.journal.lock().push(name);
        self.calls.lock().push(call);
    }
}

impl AudioBackend for FakeMixer {
    type Track = FakeTrack;

    fn format(&self) -> TapFormat {
        TapFormat::s16_stereo()
    }

    fn load_track(&mut self, path: &Path) -> Result<FakeTrack, DecodeError> {
        self.record("load", MixerCall::Load(path.to_path_buf()));
        if self.known.iter().any(|known| known == path) || path.is_file() {
            Ok(FakeTrack {
                path: path.to_path_buf(),
            })
        } else {
            Err(DecodeError::NotFound(path.to_path_buf()))
        }
    }

    fn play(&mut self, track: &FakeTrack, loops: Loops) {
        self.record("play", MixerCall::Play(track.path.clone(), loops));
    }

    fn pause(&mut self) {
        self.record("pause", MixerCall::Pause);
    }

    fn resume(&mut self) {
        self.record("resume", MixerCall::Resume);
    }

    fn halt(&mut self) {
        self.record("halt", MixerCall::Halt);
    }

    fn release(&mut self, track: FakeTrack) {
        self.record("release", MixerCall::Release(track.path));
    }

    fn set_post_mix(&mut self, hook: Option<PostMixHook>) {
        self.record("set_post_mix", MixerCall::SetPostMix(hook.is_some()));
        *self.hook.lock() = hook;
    }
}

fn test_playback(mixer: FakeMixer) -> PlaybackController<FakeMixer> {
    let format = mixer.format();
    PlaybackController::new(mixer, Arc::new(SampleTap::new(1024, format)))
}

/// A scene with the shipped shaders already linked.
pub fn test_scene(shaders: &ShaderDir) -> Scene<FakeGpu, FakeMixer> {
    let mut gpu = FakeGpu::new();
    let mut pipeline = ShaderPipeline::new();
    pipeline.reload(&mut gpu, &shaders.sources()).unwrap();
    Scene {
        gpu,
        pipeline,
        playback: test_playback(FakeMixer::new()),
        frame: FrameState::new((800, 600)),
        quit: false,
    }
}

pub fn try_start(shaders: &ShaderDir) -> Result<FrameLoop<FakeGpu, FakeMixer>, VisualizerError> {
    let journal = Journal::default();
    FrameLoop::start(
        FakeGpu::with_journal(journal.clone()),
        test_playback(FakeMixer::with_journal(journal)),
        EventRouter::new(Keybindings::default(), shaders.sources()),
        &RenderConfig::default(),
    )
}

/// A started frame loop whose fakes share one journal.
pub fn test_loop(shaders: &ShaderDir) -> FrameLoop<FakeGpu, FakeMixer> {
    match try_start(shaders) {
        Ok(frame_loop) => frame_loop,
        Err(err) => panic!("frame loop failed to start: {err}"),
    }
}
