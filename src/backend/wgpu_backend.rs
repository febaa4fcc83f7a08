//! wgpu implementation of [`RenderBackend`].
//!
//! Every target is an `Rgba8Unorm` color texture paired with a
//! `Depth32Float` depth texture, both copyable so they can be read back. The
//! "main" target is owned by the backend too: a host renders its regular
//! frame into it and the capture passes read it as the RGB output.
//!
//! Draws are submitted immediately, one render pass per batch, which keeps
//! uniform updates ordered without a ring buffer.

use std::collections::HashMap;

use glam::Mat4;
use wgpu::util::DeviceExt;

use super::{
    DrawBatch, FlatProgram, RenderBackend, RenderDestination, RowOrder, TargetId, TextureId,
};
use crate::color::Rgb;
use crate::error::BackendError;
use crate::gpu::GpuContext;
use crate::vertex::FlatVertex;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniforms {
    view_proj: [[f32; 4]; 4],
}

struct GpuTarget {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl GpuTarget {
    fn new(gpu: &GpuContext, width: u32, height: u32, label: &str) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;

        let color = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage,
            view_formats: &[],
        });
        let depth = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("{label} Depth")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage,
            view_formats: &[],
        });

        Self {
            color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            color,
            depth,
        }
    }

    fn size(&self) -> (u32, u32) {
        (self.color.width(), self.color.height())
    }
}

struct GpuTexture {
    bind_group: wgpu::BindGroup,
}

/// Flat-fill pipelines, indexed by program and culling.
struct Pipelines {
    textured: wgpu::RenderPipeline,
    textured_culled: wgpu::RenderPipeline,
    solid: wgpu::RenderPipeline,
    solid_culled: wgpu::RenderPipeline,
}

impl Pipelines {
    fn get(&self, program: FlatProgram, cull: bool) -> &wgpu::RenderPipeline {
        match (program, cull) {
            (FlatProgram::TexturedAlphaTest, false) => &self.textured,
            (FlatProgram::TexturedAlphaTest, true) => &self.textured_culled,
            (FlatProgram::Solid, false) => &self.solid,
            (FlatProgram::Solid, true) => &self.solid_culled,
        }
    }
}

/// Offscreen wgpu renderer.
pub struct WgpuBackend {
    gpu: GpuContext,
    pipelines: Pipelines,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    blank_texture: GpuTexture,
    main: GpuTarget,
    targets: HashMap<TargetId, GpuTarget>,
    textures: HashMap<TextureId, GpuTexture>,
    next_target: u32,
    next_texture: u32,
    bound: RenderDestination,
    transforms: Vec<Mat4>,
}

impl WgpuBackend {
    /// Builds pipelines and a `width`×`height` main target on `gpu`.
    pub fn new(gpu: GpuContext, width: u32, height: u32) -> Result<Self, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Flat Fill Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/flat_fill.wgsl").into()),
        });

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Capture Camera Uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Capture Camera Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Camera Bind Group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Alpha Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        // Nearest filtering keeps cut-out edges on texel boundaries
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Alpha Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let textured_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Textured Flat Fill Layout"),
            bind_group_layouts: &[&camera_layout, &texture_layout],
            push_constant_ranges: &[],
        });
        let solid_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Solid Flat Fill Layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, layout: &wgpu::PipelineLayout, fs: &str, cull: bool| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs"),
                    buffers: &[FlatVertex::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fs),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: cull.then_some(wgpu::Face::Back),
                    front_face: wgpu::FrontFace::Ccw,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let pipelines = Pipelines {
            textured: pipeline("Textured Flat Fill", &textured_layout, "fs_textured", false),
            textured_culled: pipeline("Textured Flat Fill (cull)", &textured_layout, "fs_textured", true),
            solid: pipeline("Solid Flat Fill", &solid_layout, "fs_solid", false),
            solid_culled: pipeline("Solid Flat Fill (cull)", &solid_layout, "fs_solid", true),
        };

        let blank_texture = create_texture(&gpu, &texture_layout, &sampler, &[255; 4], 1, 1);
        let main = GpuTarget::new(&gpu, width, height, "Main Target");

        Ok(Self {
            gpu,
            pipelines,
            camera_buffer,
            camera_bind_group,
            texture_layout,
            sampler,
            blank_texture,
            main,
            targets: HashMap::new(),
            textures: HashMap::new(),
            next_target: 1,
            next_texture: 1,
            bound: RenderDestination::Main,
            transforms: Vec::new(),
        })
    }

    /// Convenience: headless device plus backend.
    pub fn headless(width: u32, height: u32) -> Result<Self, BackendError> {
        Self::new(GpuContext::headless()?, width, height)
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Recreates the main target at a new size.
    pub fn resize_main(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        self.main = GpuTarget::new(&self.gpu, width, height, "Main Target");
        Ok(())
    }

    fn target(&self, destination: RenderDestination) -> Result<&GpuTarget, BackendError> {
        match destination {
            RenderDestination::Main => Ok(&self.main),
            RenderDestination::Offscreen(id) => {
                self.targets.get(&id).ok_or(BackendError::UnknownTarget(id))
            }
        }
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

fn create_texture(
    gpu: &GpuContext,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    rgba: &[u8],
    width: u32,
    height: u32,
) -> GpuTexture {
    let texture = gpu.device.create_texture_with_data(
        &gpu.queue,
        &wgpu::TextureDescriptor {
            label: Some("Alpha Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        rgba,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Alpha Texture Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });
    GpuTexture { bind_group }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn main_size(&self) -> (u32, u32) {
        self.main.size()
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<TargetId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let id = TargetId(self.next_target);
        self.next_target += 1;
        let target = GpuTarget::new(&self.gpu, width, height, &format!("Capture Target {}", id.0));
        self.targets.insert(id, target);
        Ok(id)
    }

    fn destroy_target(&mut self, target: TargetId) {
        if let Some(t) = self.targets.remove(&target) {
            t.color.destroy();
            t.depth.destroy();
        }
        if self.bound == RenderDestination::Offscreen(target) {
            self.bound = RenderDestination::Main;
        }
    }

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(&target).map(GpuTarget::size)
    }

    fn bind(&mut self, destination: RenderDestination) -> Result<(), BackendError> {
        self.target(destination)?;
        self.bound = destination;
        Ok(())
    }

    fn bound(&self) -> RenderDestination {
        self.bound
    }

    fn clear(&mut self, color: Rgb) -> Result<(), BackendError> {
        let target = self.target(self.bound)?;
        let mut encoder = self.encoder("Capture Clear");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Capture Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: color.r as f64 / 255.0,
                            g: color.g as f64 / 255.0,
                            b: color.b as f64 / 255.0,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn copy_main_depth(&mut self, target: TargetId) -> Result<(), BackendError> {
        let dst = self
            .targets
            .get(&target)
            .ok_or(BackendError::UnknownTarget(target))?;
        if dst.size() != self.main.size() {
            return Err(BackendError::SizeMismatch {
                expected: self.main.size(),
                found: dst.size(),
            });
        }
        let (width, height) = dst.size();
        let mut encoder = self.encoder("Depth Copy");
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.main.depth,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.depth,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn push_transform(&mut self, view_projection: Mat4) {
        self.transforms.push(view_projection);
    }

    fn pop_transform(&mut self) -> Result<(), BackendError> {
        self.transforms
            .pop()
            .map(|_| ())
            .ok_or(BackendError::TransformUnderflow)
    }

    fn draw(&mut self, batch: &DrawBatch) -> Result<(), BackendError> {
        if batch.vertices.len() < 3 {
            return Ok(());
        }
        let texture = match (batch.program, batch.texture) {
            (FlatProgram::TexturedAlphaTest, Some(id)) => Some(
                self.textures
                    .get(&id)
                    .ok_or(BackendError::UnknownTexture(id))?,
            ),
            (FlatProgram::TexturedAlphaTest, None) => Some(&self.blank_texture),
            (FlatProgram::Solid, _) => None,
        };
        let target = self.target(self.bound)?;

        let view_proj = self.transforms.last().copied().unwrap_or(Mat4::IDENTITY);
        self.gpu.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[CameraUniforms {
                view_proj: view_proj.to_cols_array_2d(),
            }]),
        );

        let vertex_count = (batch.vertices.len() - batch.vertices.len() % 3) as u32;
        let vertex_buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Capture Batch Vertices"),
                contents: bytemuck::cast_slice(&batch.vertices[..vertex_count as usize]),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let mut encoder = self.encoder("Capture Draw");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Capture Draw Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(self.pipelines.get(batch.program, batch.cull_back_faces));
            pass.set_bind_group(0, &self.camera_bind_group, &[]);
            if let Some(texture) = texture {
                pass.set_bind_group(1, &texture.bind_group, &[]);
            }
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(0..vertex_count, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_color(&mut self, source: RenderDestination) -> Result<Vec<u8>, BackendError> {
        let target = self.target(source)?;
        let rgba = self
            .gpu
            .read_texture(&target.color, wgpu::TextureAspect::All, 4)?;
        Ok(rgba.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect())
    }

    fn read_depth(&mut self, source: RenderDestination) -> Result<Vec<f32>, BackendError> {
        let target = self.target(source)?;
        let bytes = self
            .gpu
            .read_texture(&target.depth, wgpu::TextureAspect::DepthOnly, 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn upload_texture(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<TextureId, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(BackendError::Device(format!(
                "texture data is {} bytes, expected {}",
                rgba.len(),
                width as usize * height as usize * 4
            )));
        }
        let texture = create_texture(
            &self.gpu,
            &self.texture_layout,
            &self.sampler,
            rgba,
            width,
            height,
        );
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(id, texture);
        Ok(id)
    }
}
