//! Graphics backend: the seam between the shader pipeline / frame loop and
//! the GPU, plus the wgpu implementation used by the binary.

use std::borrow::Cow;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::RenderError;
use crate::params::RenderConfig;
use crate::shader::reflect::{
    self, StageModule, UniformLayout, UNIFORM_BINDING, UNIFORM_BLOCK_SIZE, UNIFORM_GROUP,
};
use crate::shader::{ShaderStage, UniformLocation};

/// What the shader pipeline and frame loop need from a GPU.
pub trait GraphicsBackend {
    /// A compiled, not yet linked, stage
    type Module;
    /// A linked program
    type Program;

    /// Compile one stage. The error is the compiler's diagnostic log.
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<Self::Module, String>;

    /// Link two compiled stages. The error is the link log.
    fn link(&mut self, vertex: &Self::Module, fragment: &Self::Module) -> Result<Self::Program, String>;

    /// `None` when the program does not declare `name`
    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<UniformLocation>;

    fn destroy_program(&mut self, program: Self::Program);

    fn resize_viewport(&mut self, width: u32, height: u32);

    /// Clear, bind `program`, upload the uniform block, draw the full-screen
    /// quad and present.
    fn draw_frame(
        &mut self,
        program: &Self::Program,
        uniforms: &[u8],
        clear_color: [f64; 4],
    ) -> Result<(), RenderError>;

    /// Free the static geometry. Called once at shutdown.
    fn release_geometry(&mut self);
}

/// Full-screen quad vertex (clip-space position)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
}

/// Two triangles covering clip space
pub const QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, -1.0] },
    QuadVertex { position: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0] },
];

pub struct WgpuModule {
    module: wgpu::ShaderModule,
    reflected: StageModule,
}

pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    uniforms: UniformLayout,
}

/// wgpu device, surface and the buffers shared by every program
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    vertex_buffer: Option<wgpu::Buffer>,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    pipeline_layout: wgpu::PipelineLayout,
    viewport: (u32, u32),
}

impl WgpuBackend {
    /// Create the device and surface for `window`
    pub async fn new(window: Arc<Window>, render: &RenderConfig) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let viewport = (size.width.max(1), size.height.max(1));

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Window must have 'static lifetime via Arc
        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::Adapter)?;

        let adapter_info = adapter.get_info();
        info!(
            "GPU: {} ({:?}, {:?})",
            adapter_info.name, adapter_info.backend, adapter_info.device_type
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Main Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::Surface("surface reports no formats".to_string()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: viewport.0,
            height: viewport.1,
            present_mode: if render.vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        // Static geometry, never written after creation
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Vertex Buffer"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Buffer"),
            size: u64::from(UNIFORM_BLOCK_SIZE),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Uniform Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: UNIFORM_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniform Bind Group"),
            layout: &uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: UNIFORM_BINDING,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&uniform_bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            surface,
            device,
            queue,
            config,
            vertex_buffer: Some(vertex_buffer),
            uniform_buffer,
            uniform_bind_group,
            pipeline_layout,
            viewport,
        })
    }

    fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// Run `create` inside a validation scope and turn a captured error into
    /// its message.
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    type Module = WgpuModule;
    type Program = WgpuProgram;

    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<WgpuModule, String> {
        let reflected = reflect::parse_stage(stage, source)?;
        let label = format!("{stage} shader");
        let module = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        })?;
        Ok(WgpuModule { module, reflected })
    }

    fn link(&mut self, vertex: &WgpuModule, fragment: &WgpuModule) -> Result<WgpuProgram, String> {
        let uniforms = reflect::merge_uniforms(&vertex.reflected.uniforms, &fragment.reflected.uniforms)?;
        let format = self.config.format;

        let pipeline = self.scoped(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Visualizer Pipeline"),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(vertex.reflected.entry_point.as_str()),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2,
                        }],
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment.module,
                    entry_point: Some(fragment.reflected.entry_point.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })?;

        debug!(
            "Linked program with uniforms [{}] ({} bytes, group {UNIFORM_GROUP})",
            uniforms.names().collect::<Vec<_>>().join(", "),
            uniforms.span
        );
        Ok(WgpuProgram { pipeline, uniforms })
    }

    fn uniform_location(&self, program: &WgpuProgram, name: &str) -> Option<UniformLocation> {
        program.uniforms.get(name)
    }

    fn destroy_program(&mut self, program: WgpuProgram) {
        drop(program);
    }

    fn resize_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
        self.config.width = self.viewport.0;
        self.config.height = self.viewport.1;
        self.reconfigure();
    }

    fn draw_frame(
        &mut self,
        program: &WgpuProgram,
        uniforms: &[u8],
        clear_color: [f64; 4],
    ) -> Result<(), RenderError> {
        let Some(vertex_buffer) = self.vertex_buffer.as_ref() else {
            return Ok(());
        };

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.reconfigure();
                return Err(RenderError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::Timeout) => return Err(RenderError::Timeout),
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        // Writes must be a multiple of COPY_BUFFER_ALIGNMENT
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let upload = uniforms.len().min(UNIFORM_BLOCK_SIZE as usize) / align * align;
        if upload > 0 {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, &uniforms[..upload]);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let [r, g, b, a] = clear_color;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let (width, height) = self.viewport;
            render_pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.draw(0..QUAD.len() as u32, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }

    fn release_geometry(&mut self) {
        if let Some(buffer) = self.vertex_buffer.take() {
            buffer.destroy();
        }
    }
}
