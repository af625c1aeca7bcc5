use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowId};

use super::{
    BufferHandle, ComputeProgramDesc, FramePresenter, GpuDevice, GpuError, ImageHandle,
    PresentProgramDesc, ProgramHandle, Resource, ShaderStage, WorkGroups,
};
use crate::wire::QuadVertex;

const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const CLEAR_COLOR: wgpu::Color = wgpu::Color::BLACK;
const UNIFORM_STRIDE: u64 = std::mem::size_of::<[f32; 4]>() as u64;

/// wgpu implementation of the GPU boundary, bound to one window surface.
pub struct NativeGpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    view_format: wgpu::TextureFormat,
    sampler: wgpu::Sampler,
    next_id: u32,
    images: HashMap<u32, NativeImage>,
    buffers: HashMap<u32, wgpu::Buffer>,
    compute_programs: HashMap<u32, ComputeProgram>,
    present_programs: HashMap<u32, PresentProgram>,
    storage_slots: HashMap<u32, BufferHandle>,
    image_slots: HashMap<u32, ImageHandle>,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
    unsynchronized_writes: bool,
    drew_this_frame: bool,
}

struct NativeImage {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct ComputeProgram {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: Vec<String>,
    uniform_buffer: wgpu::Buffer,
    uniform_binding: u32,
    storage_bindings: Vec<u32>,
    image_binding: u32,
}

struct PresentProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

impl NativeGpu {
    /// Creates the device and configures the window surface.
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(anyhow!("window has zero area"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance.create_surface(Arc::clone(&window))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to acquire GPU adapter")?;
        let adapter_info = adapter.get_info();
        info!(
            "using adapter {} ({:?}, {})",
            adapter_info.name, adapter_info.backend, adapter_info.driver
        );

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("hotray-device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: Default::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .await
            .context("failed to create GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let (surface_format, view_format) =
            linear_surface_format(&surface_caps.formats).context("surface reports no formats")?;
        let present_mode = if vsync {
            wgpu::PresentMode::Fifo
        } else {
            surface_caps
                .present_modes
                .iter()
                .copied()
                .find(|mode| {
                    matches!(
                        mode,
                        wgpu::PresentMode::Mailbox | wgpu::PresentMode::Immediate
                    )
                })
                .unwrap_or(wgpu::PresentMode::Fifo)
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode,
            desired_maximum_frame_latency: 2,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: if view_format == surface_format {
                vec![]
            } else {
                vec![view_format]
            },
        };
        surface.configure(&device, &config);

        // The kernel output is shown pixel for pixel.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("present-sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            view_format,
            sampler,
            next_id: 0,
            images: HashMap::new(),
            buffers: HashMap::new(),
            compute_programs: HashMap::new(),
            present_programs: HashMap::new(),
            storage_slots: HashMap::new(),
            image_slots: HashMap::new(),
            encoder: None,
            frame: None,
            unsynchronized_writes: false,
            drew_this_frame: false,
        })
    }

    pub fn window_id(&self) -> WindowId {
        self.window.id()
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Reconfigures the surface for a new window size.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    fn allocate(&mut self) -> Result<u32, GpuError> {
        self.next_id = self.next_id.checked_add(1).ok_or(GpuError::OutOfMemory)?;
        Ok(self.next_id)
    }

    fn image(&self, image: ImageHandle) -> Result<&NativeImage, GpuError> {
        self.images
            .get(&image.raw())
            .ok_or(GpuError::StaleHandle(Resource::Image(image)))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&wgpu::Buffer, GpuError> {
        self.buffers
            .get(&buffer.raw())
            .ok_or(GpuError::StaleHandle(Resource::Buffer(buffer)))
    }

    fn compute(&self, program: ProgramHandle) -> Result<&ComputeProgram, GpuError> {
        if let Some(compute) = self.compute_programs.get(&program.raw()) {
            return Ok(compute);
        }
        if self.present_programs.contains_key(&program.raw()) {
            return Err(GpuError::WrongStage {
                program,
                expected: ShaderStage::Compute,
                actual: ShaderStage::Present,
            });
        }
        Err(GpuError::StaleHandle(Resource::Program(program)))
    }

    fn present(&self, program: ProgramHandle) -> Result<&PresentProgram, GpuError> {
        if let Some(present) = self.present_programs.get(&program.raw()) {
            return Ok(present);
        }
        if self.compute_programs.contains_key(&program.raw()) {
            return Err(GpuError::WrongStage {
                program,
                expected: ShaderStage::Present,
                actual: ShaderStage::Compute,
            });
        }
        Err(GpuError::StaleHandle(Resource::Program(program)))
    }

    /// Runs `build` inside a validation scope and turns any captured error
    /// into a compile failure for `label`.
    fn validated<T>(
        &self,
        stage: ShaderStage,
        label: &str,
        build: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(built),
            Some(err) => Err(GpuError::Compile {
                stage,
                label: label.to_string(),
                message: err.to_string(),
            }),
        }
    }

    fn frame_view_descriptor(&self) -> wgpu::TextureViewDescriptor<'static> {
        wgpu::TextureViewDescriptor {
            format: Some(self.view_format),
            ..Default::default()
        }
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame-encoder"),
                })
        })
    }

    fn acquire_frame(&mut self) -> Result<(), GpuError> {
        if self.frame.is_some() {
            return Ok(());
        }
        let texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                self.surface
                    .get_current_texture()
                    .map_err(surface_error)?
            }
            Err(err) => return Err(surface_error(err)),
        };
        self.frame = Some(texture);
        Ok(())
    }

    fn submit(&mut self, encoder: wgpu::CommandEncoder) -> Result<(), GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Surface(err.to_string()));
        }
        Ok(())
    }
}

/// Picks the surface format and the format its views are rendered through.
///
/// The kernel writes display-ready values, so the view format is always
/// linear. An sRGB-only surface keeps its format and gets a linear view.
fn linear_surface_format(
    formats: &[wgpu::TextureFormat],
) -> Option<(wgpu::TextureFormat, wgpu::TextureFormat)> {
    let surface = formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())?;
    Some((surface, surface.remove_srgb_suffix()))
}

fn surface_error(err: wgpu::SurfaceError) -> GpuError {
    match err {
        wgpu::SurfaceError::OutOfMemory => GpuError::OutOfMemory,
        other => GpuError::Surface(other.to_string()),
    }
}

fn quad_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x4,
            offset: 0,
            shader_location: 0,
        },
        wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: std::mem::offset_of!(QuadVertex, uv) as u64,
            shader_location: 1,
        },
    ];
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<QuadVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

impl GpuDevice for NativeGpu {
    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn create_image(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<ImageHandle, GpuError> {
        let (width, height) = (width.max(1), height.max(1));
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: IMAGE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.allocate()?;
        self.images.insert(
            id,
            NativeImage {
                _texture: texture,
                view,
                width,
                height,
            },
        );
        ImageHandle::from_raw(id).ok_or(GpuError::OutOfMemory)
    }

    fn image_size(&self, image: ImageHandle) -> Result<(u32, u32), GpuError> {
        self.image(image).map(|image| (image.width, image.height))
    }

    fn create_vertex_buffer(
        &mut self,
        label: &str,
        vertices: &[QuadVertex],
    ) -> Result<BufferHandle, GpuError> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let id = self.allocate()?;
        self.buffers.insert(id, buffer);
        BufferHandle::from_raw(id).ok_or(GpuError::OutOfMemory)
    }

    fn create_storage_buffer(
        &mut self,
        label: &str,
        contents: &[u8],
    ) -> Result<BufferHandle, GpuError> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            });
        let id = self.allocate()?;
        self.buffers.insert(id, buffer);
        BufferHandle::from_raw(id).ok_or(GpuError::OutOfMemory)
    }

    fn compile_compute(&mut self, desc: &ComputeProgramDesc<'_>) -> Result<ProgramHandle, GpuError> {
        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: desc.image_binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: IMAGE_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: desc.uniform_binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ];
        entries.extend(desc.storage_bindings.iter().map(|&binding| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }
        }));

        let (pipeline, layout) = self.validated(ShaderStage::Compute, desc.label, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(desc.entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
            (pipeline, layout)
        })?;

        let uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: UNIFORM_STRIDE * desc.uniforms.len().max(1) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let id = self.allocate()?;
        self.compute_programs.insert(
            id,
            ComputeProgram {
                pipeline,
                layout,
                uniforms: desc.uniforms.iter().map(|name| name.to_string()).collect(),
                uniform_buffer,
                uniform_binding: desc.uniform_binding,
                storage_bindings: desc.storage_bindings.to_vec(),
                image_binding: desc.image_binding,
            },
        );
        debug!("compiled compute program `{}` as program#{id}", desc.label);
        ProgramHandle::from_raw(id).ok_or(GpuError::OutOfMemory)
    }

    fn compile_present(&mut self, desc: &PresentProgramDesc<'_>) -> Result<ProgramHandle, GpuError> {
        let target_format = self.view_format;
        let (pipeline, layout) = self.validated(ShaderStage::Present, desc.label, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.into()),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(desc.label),
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
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(desc.vertex_entry),
                    compilation_options: Default::default(),
                    buffers: &[quad_layout()],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(desc.fragment_entry),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            });
            (pipeline, layout)
        })?;

        let id = self.allocate()?;
        self.present_programs
            .insert(id, PresentProgram { pipeline, layout });
        debug!("compiled present program `{}` as program#{id}", desc.label);
        ProgramHandle::from_raw(id).ok_or(GpuError::OutOfMemory)
    }

    fn release(&mut self, resource: Resource) {
        let released = match resource {
            Resource::Image(handle) => {
                self.image_slots.retain(|_, image| *image != handle);
                self.images.remove(&handle.raw()).is_some()
            }
            Resource::Buffer(handle) => {
                self.storage_slots.retain(|_, buffer| *buffer != handle);
                self.buffers.remove(&handle.raw()).is_some()
            }
            Resource::Program(handle) => {
                self.compute_programs.remove(&handle.raw()).is_some()
                    || self.present_programs.remove(&handle.raw()).is_some()
            }
        };
        if !released {
            warn!("release of unknown {resource}");
        }
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: [f32; 4],
    ) -> Result<(), GpuError> {
        let compute = self.compute(program)?;
        let index = compute
            .uniforms
            .iter()
            .position(|uniform| uniform == name)
            .ok_or_else(|| GpuError::UnknownUniform {
                program,
                name: name.to_string(),
            })?;
        self.queue.write_buffer(
            &compute.uniform_buffer,
            index as u64 * UNIFORM_STRIDE,
            bytemuck::bytes_of(&value),
        );
        Ok(())
    }

    fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), GpuError> {
        self.buffer(buffer)?;
        self.storage_slots.insert(slot, buffer);
        Ok(())
    }

    fn bind_output_image(&mut self, slot: u32, image: ImageHandle) -> Result<(), GpuError> {
        self.image(image)?;
        self.image_slots.insert(slot, image);
        Ok(())
    }

    fn dispatch(&mut self, program: ProgramHandle, groups: WorkGroups) -> Result<(), GpuError> {
        let compute = self.compute(program)?;
        let image_handle = *self
            .image_slots
            .get(&compute.image_binding)
            .ok_or(GpuError::UnboundSlot {
                program,
                slot: compute.image_binding,
            })?;
        let image = self.image(image_handle)?;

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: compute.image_binding,
                resource: wgpu::BindingResource::TextureView(&image.view),
            },
            wgpu::BindGroupEntry {
                binding: compute.uniform_binding,
                resource: compute.uniform_buffer.as_entire_binding(),
            },
        ];
        for &slot in &compute.storage_bindings {
            let handle = self
                .storage_slots
                .get(&slot)
                .ok_or(GpuError::UnboundSlot { program, slot })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot,
                resource: self.buffer(*handle)?.as_entire_binding(),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kernel-bind-group"),
            layout: &compute.layout,
            entries: &entries,
        });

        let mut encoder = self.take_encoder();
        {
            let compute = self.compute(program)?;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kernel-pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compute.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        }
        self.encoder = Some(encoder);
        self.unsynchronized_writes = true;
        Ok(())
    }

    fn memory_barrier(&mut self) {
        // wgpu orders storage writes before later sampled reads across passes.
        self.unsynchronized_writes = false;
    }

    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        image: ImageHandle,
        quad: BufferHandle,
    ) -> Result<(), GpuError> {
        if self.unsynchronized_writes {
            return Err(GpuError::MissingBarrier);
        }
        let present = self.present(program)?;
        let source = self.image(image)?;
        self.buffer(quad)?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present-bind-group"),
            layout: &present.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        self.acquire_frame()?;
        let Some(frame) = self.frame.as_ref() else {
            return Err(GpuError::Surface("no frame acquired".into()));
        };
        let view = frame
            .texture
            .create_view(&self.frame_view_descriptor());

        let mut encoder = self.take_encoder();
        {
            let present = self.present(program)?;
            let vertices = self.buffer(quad)?;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&present.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.draw(0..4, 0..1);
        }
        self.encoder = Some(encoder);
        self.drew_this_frame = true;
        Ok(())
    }
}

impl FramePresenter for NativeGpu {
    fn end_frame(&mut self) -> Result<(), GpuError> {
        let drew = std::mem::take(&mut self.drew_this_frame);
        self.unsynchronized_writes = false;
        let acquired = self.acquire_frame();
        let mut encoder = self.take_encoder();

        if let (false, Some(frame)) = (drew, self.frame.as_ref()) {
            let view = frame
                .texture
                .create_view(&self.frame_view_descriptor());
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let submitted = self.submit(encoder);
        if let Some(frame) = self.frame.take() {
            self.window.pre_present_notify();
            frame.present();
        }
        acquired.and(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::TextureFormat;

    #[test]
    fn surface_format_prefers_linear_targets() {
        assert_eq!(
            linear_surface_format(&[TextureFormat::Bgra8UnormSrgb, TextureFormat::Bgra8Unorm]),
            Some((TextureFormat::Bgra8Unorm, TextureFormat::Bgra8Unorm))
        );
        assert_eq!(
            linear_surface_format(&[TextureFormat::Rgba8UnormSrgb]),
            Some((TextureFormat::Rgba8UnormSrgb, TextureFormat::Rgba8Unorm))
        );
        assert_eq!(linear_surface_format(&[]), None);
    }
}
