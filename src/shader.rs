//! Shader program lifecycle: compile, link, swap, hot reload.
//!
//! Startup and reload run the same sequence. The active program is only
//! replaced once a new one has linked, so a broken edit never leaves the
//! window without a working program.

pub mod reflect;

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;

use tracing::{debug, info};

use crate::error::ShaderError;
use crate::params::ShaderSources;
use crate::rendering::GraphicsBackend;

/// Uniform names the frame loop feeds every frame
pub const TRACKED_UNIFORMS: [&str; 5] = ["transform", "time", "waveData", "resolution", "waveCount"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        })
    }
}

/// Host-visible type of a uniform block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Uint,
    Vec2,
    Mat4,
    /// Array of `elements` float vectors, `components` floats used per element
    FloatArray {
        elements: u32,
        stride: u32,
        components: u32,
    },
}

impl UniformKind {
    /// Bytes the member occupies in the block
    pub fn byte_len(&self) -> u32 {
        match *self {
            Self::Float | Self::Uint => 4,
            Self::Vec2 => 8,
            Self::Mat4 => 64,
            Self::FloatArray {
                elements, stride, ..
            } => elements * stride,
        }
    }
}

/// Resolved location of a uniform: byte offset into the block plus its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    pub offset: u32,
    pub kind: UniformKind,
}

/// Opaque id of a linked program. Each successful link yields a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(NonZeroU64);

impl ProgramHandle {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Owns the active program of a graphics backend.
pub struct ShaderPipeline<P> {
    program: Option<(ProgramHandle, P)>,
    locations: HashMap<&'static str, UniformLocation>,
    tracked: &'static [&'static str],
    generation: u64,
}

impl<P> Default for ShaderPipeline<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ShaderPipeline<P> {
    pub fn new() -> Self {
        Self::with_tracked(&TRACKED_UNIFORMS)
    }

    pub fn with_tracked(tracked: &'static [&'static str]) -> Self {
        Self {
            program: None,
            locations: HashMap::new(),
            tracked,
            generation: 0,
        }
    }

    /// Compile both stages and link them; swap in the result on success.
    ///
    /// Any failure leaves the current handle and uniform locations exactly as
    /// they were.
    pub fn compile_and_link<G>(
        &mut self,
        gpu: &mut G,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<ProgramHandle, ShaderError>
    where
        G: GraphicsBackend<Program = P>,
    {
        let vertex = gpu
            .compile_stage(ShaderStage::Vertex, vertex_src)
            .map_err(|log| ShaderError::Compile {
                stage: ShaderStage::Vertex,
                log,
            })?;
        let fragment = gpu
            .compile_stage(ShaderStage::Fragment, fragment_src)
            .map_err(|log| ShaderError::Compile {
                stage: ShaderStage::Fragment,
                log,
            })?;
        let program = gpu
            .link(&vertex, &fragment)
            .map_err(|log| ShaderError::Link { log })?;

        let mut locations = HashMap::with_capacity(self.tracked.len());
        for &name in self.tracked {
            match gpu.uniform_location(&program, name) {
                Some(location) => {
                    locations.insert(name, location);
                }
                None => debug!("Uniform '{}' not used by program", name),
            }
        }

        self.generation += 1;
        let handle = ProgramHandle(NonZeroU64::MIN.saturating_add(self.generation - 1));

        if let Some((old, previous)) = self.program.replace((handle, program)) {
            gpu.destroy_program(previous);
            debug!("Retired program {}", old.get());
        }
        self.locations = locations;

        Ok(handle)
    }

    /// Read the sources from disk and compile them.
    pub fn reload<G>(&mut self, gpu: &mut G, sources: &ShaderSources) -> Result<ProgramHandle, ShaderError>
    where
        G: GraphicsBackend<Program = P>,
    {
        let (vertex_src, fragment_src) = sources.read()?;
        let handle = self.compile_and_link(gpu, &vertex_src, &fragment_src)?;
        info!(
            "Shaders loaded ({}, {}) as program {}",
            sources.vertex.display(),
            sources.fragment.display(),
            handle.get()
        );
        Ok(handle)
    }

    pub fn current_handle(&self) -> Option<ProgramHandle> {
        self.program.as_ref().map(|(handle, _)| *handle)
    }

    /// A handle is live until the next successful link replaces it
    pub fn is_live(&self, handle: ProgramHandle) -> bool {
        self.current_handle() == Some(handle)
    }

    /// `None` when the program does not declare `name`
    pub fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.locations.get(name).copied()
    }

    pub fn locations(&self) -> impl Iterator<Item = (&'static str, UniformLocation)> + '_ {
        self.locations.iter().map(|(name, location)| (*name, *location))
    }

    pub fn program(&self) -> Option<&P> {
        self.program.as_ref().map(|(_, program)| program)
    }

    /// Release the active program
    pub fn destroy<G>(&mut self, gpu: &mut G)
    where
        G: GraphicsBackend<Program = P>,
    {
        if let Some((_, program)) = self.program.take() {
            gpu.destroy_program(program);
        }
        self.locations.clear();
    }
}
