use std::collections::HashMap;

use log::{debug, warn};

use super::{
    BufferHandle, ComputeProgramDesc, FramePresenter, GpuDevice, GpuError, ImageHandle,
    PresentProgramDesc, ProgramHandle, Resource, ShaderStage, WorkGroups,
};
use crate::wire::QuadVertex;

/// Command observed by the headless device, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    Create(Resource),
    Release(Resource),
    SetUniform {
        program: ProgramHandle,
        name: String,
        value: [f32; 4],
    },
    BindStorage {
        slot: u32,
        buffer: BufferHandle,
    },
    BindImage {
        slot: u32,
        image: ImageHandle,
    },
    Dispatch {
        program: ProgramHandle,
        groups: WorkGroups,
    },
    Barrier,
    DrawFullscreen {
        program: ProgramHandle,
        image: ImageHandle,
        quad: BufferHandle,
    },
    EndFrame {
        drew: bool,
    },
}

#[derive(Debug)]
enum Entry {
    Image {
        width: u32,
        height: u32,
    },
    Buffer {
        bytes: Vec<u8>,
    },
    Compute {
        uniforms: Vec<(String, [f32; 4])>,
        storage_bindings: Vec<u32>,
        image_binding: u32,
    },
    Present,
}

/// Device that validates and records commands without a GPU.
///
/// It enforces the same rules as the native device (live handles, bound
/// slots, a barrier between dispatch and present) so the render module can be
/// exercised end to end in tests and in `--headless` runs.
#[derive(Debug)]
pub struct HeadlessGpu {
    size: (u32, u32),
    next_id: u32,
    resources: HashMap<u32, Entry>,
    storage_slots: HashMap<u32, BufferHandle>,
    image_slots: HashMap<u32, ImageHandle>,
    failing: Vec<String>,
    unsynchronized_writes: bool,
    drew_this_frame: bool,
    frames: u64,
    commands: Vec<GpuCommand>,
}

impl HeadlessGpu {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width.max(1), height.max(1)),
            next_id: 0,
            resources: HashMap::new(),
            storage_slots: HashMap::new(),
            image_slots: HashMap::new(),
            failing: Vec::new(),
            unsynchronized_writes: false,
            drew_this_frame: false,
            frames: 0,
            commands: Vec::new(),
        }
    }

    /// Makes every later compilation of the program labelled `label` fail.
    pub fn fail_compilation(&mut self, label: impl Into<String>) {
        self.failing.push(label.into());
    }

    pub fn allow_compilation(&mut self, label: &str) {
        self.failing.retain(|failing| failing != label);
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<GpuCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    pub fn is_live(&self, resource: Resource) -> bool {
        match resource {
            Resource::Image(handle) => self.image(handle).is_ok(),
            Resource::Buffer(handle) => self.buffer(handle).is_ok(),
            Resource::Program(handle) => self.resources.contains_key(&handle.raw()),
        }
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffer(buffer).ok()
    }

    pub fn uniform(&self, program: ProgramHandle, name: &str) -> Option<[f32; 4]> {
        match self.resources.get(&program.raw()) {
            Some(Entry::Compute { uniforms, .. }) => uniforms
                .iter()
                .find(|(uniform, _)| uniform == name)
                .map(|(_, value)| *value),
            _ => None,
        }
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    fn allocate(&mut self, entry: Entry) -> Result<u32, GpuError> {
        self.next_id = self.next_id.checked_add(1).ok_or(GpuError::OutOfMemory)?;
        self.resources.insert(self.next_id, entry);
        Ok(self.next_id)
    }

    fn image(&self, image: ImageHandle) -> Result<(u32, u32), GpuError> {
        match self.resources.get(&image.raw()) {
            Some(Entry::Image { width, height }) => Ok((*width, *height)),
            _ => Err(GpuError::StaleHandle(Resource::Image(image))),
        }
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&[u8], GpuError> {
        match self.resources.get(&buffer.raw()) {
            Some(Entry::Buffer { bytes }) => Ok(bytes),
            _ => Err(GpuError::StaleHandle(Resource::Buffer(buffer))),
        }
    }

    fn stage(&self, program: ProgramHandle) -> Result<ShaderStage, GpuError> {
        match self.resources.get(&program.raw()) {
            Some(Entry::Compute { .. }) => Ok(ShaderStage::Compute),
            Some(Entry::Present) => Ok(ShaderStage::Present),
            _ => Err(GpuError::StaleHandle(Resource::Program(program))),
        }
    }

    fn expect_stage(&self, program: ProgramHandle, expected: ShaderStage) -> Result<(), GpuError> {
        let actual = self.stage(program)?;
        if actual == expected {
            Ok(())
        } else {
            Err(GpuError::WrongStage {
                program,
                expected,
                actual,
            })
        }
    }

    fn check_source(
        &self,
        stage: ShaderStage,
        label: &str,
        source: &str,
        entry_points: &[&str],
    ) -> Result<(), GpuError> {
        let compile_error = |message: String| GpuError::Compile {
            stage,
            label: label.to_string(),
            message,
        };
        if self.failing.iter().any(|failing| failing == label) {
            return Err(compile_error("compilation rejected by the device".into()));
        }
        if source.trim().is_empty() {
            return Err(compile_error("empty shader source".into()));
        }
        for entry in entry_points {
            if !source.contains(&format!("fn {entry}(")) {
                return Err(compile_error(format!("entry point `{entry}` not found")));
            }
        }
        Ok(())
    }

    fn record_create(&mut self, resource: Resource) {
        debug!("headless device created {resource}");
        self.commands.push(GpuCommand::Create(resource));
    }
}

impl GpuDevice for HeadlessGpu {
    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn create_image(
        &mut self,
        _label: &str,
        width: u32,
        height: u32,
    ) -> Result<ImageHandle, GpuError> {
        let id = self.allocate(Entry::Image { width, height })?;
        let handle = ImageHandle::from_raw(id).ok_or(GpuError::OutOfMemory)?;
        self.record_create(Resource::Image(handle));
        Ok(handle)
    }

    fn image_size(&self, image: ImageHandle) -> Result<(u32, u32), GpuError> {
        self.image(image)
    }

    fn create_vertex_buffer(
        &mut self,
        label: &str,
        vertices: &[QuadVertex],
    ) -> Result<BufferHandle, GpuError> {
        self.create_storage_buffer(label, bytemuck::cast_slice(vertices))
    }

    fn create_storage_buffer(
        &mut self,
        _label: &str,
        contents: &[u8],
    ) -> Result<BufferHandle, GpuError> {
        let id = self.allocate(Entry::Buffer {
            bytes: contents.to_vec(),
        })?;
        let handle = BufferHandle::from_raw(id).ok_or(GpuError::OutOfMemory)?;
        self.record_create(Resource::Buffer(handle));
        Ok(handle)
    }

    fn compile_compute(&mut self, desc: &ComputeProgramDesc<'_>) -> Result<ProgramHandle, GpuError> {
        self.check_source(
            ShaderStage::Compute,
            desc.label,
            desc.source,
            &[desc.entry_point],
        )?;
        let id = self.allocate(Entry::Compute {
            uniforms: desc
                .uniforms
                .iter()
                .map(|name| (name.to_string(), [0.0; 4]))
                .collect(),
            storage_bindings: desc.storage_bindings.to_vec(),
            image_binding: desc.image_binding,
        })?;
        let handle = ProgramHandle::from_raw(id).ok_or(GpuError::OutOfMemory)?;
        self.record_create(Resource::Program(handle));
        Ok(handle)
    }

    fn compile_present(&mut self, desc: &PresentProgramDesc<'_>) -> Result<ProgramHandle, GpuError> {
        self.check_source(
            ShaderStage::Present,
            desc.label,
            desc.source,
            &[desc.vertex_entry, desc.fragment_entry],
        )?;
        let id = self.allocate(Entry::Present)?;
        let handle = ProgramHandle::from_raw(id).ok_or(GpuError::OutOfMemory)?;
        self.record_create(Resource::Program(handle));
        Ok(handle)
    }

    fn release(&mut self, resource: Resource) {
        let raw = match resource {
            Resource::Image(handle) => handle.raw(),
            Resource::Buffer(handle) => handle.raw(),
            Resource::Program(handle) => handle.raw(),
        };
        if self.resources.remove(&raw).is_none() {
            warn!("release of unknown {resource}");
            return;
        }
        self.storage_slots.retain(|_, buffer| buffer.raw() != raw);
        self.image_slots.retain(|_, image| image.raw() != raw);
        self.commands.push(GpuCommand::Release(resource));
    }

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: [f32; 4],
    ) -> Result<(), GpuError> {
        self.expect_stage(program, ShaderStage::Compute)?;
        let Some(Entry::Compute { uniforms, .. }) = self.resources.get_mut(&program.raw()) else {
            return Err(GpuError::StaleHandle(Resource::Program(program)));
        };
        let slot = uniforms
            .iter_mut()
            .find(|(uniform, _)| uniform == name)
            .ok_or_else(|| GpuError::UnknownUniform {
                program,
                name: name.to_string(),
            })?;
        slot.1 = value;
        self.commands.push(GpuCommand::SetUniform {
            program,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), GpuError> {
        self.buffer(buffer)?;
        self.storage_slots.insert(slot, buffer);
        self.commands.push(GpuCommand::BindStorage { slot, buffer });
        Ok(())
    }

    fn bind_output_image(&mut self, slot: u32, image: ImageHandle) -> Result<(), GpuError> {
        self.image(image)?;
        self.image_slots.insert(slot, image);
        self.commands.push(GpuCommand::BindImage { slot, image });
        Ok(())
    }

    fn dispatch(&mut self, program: ProgramHandle, groups: WorkGroups) -> Result<(), GpuError> {
        self.expect_stage(program, ShaderStage::Compute)?;
        if let Some(Entry::Compute {
            storage_bindings,
            image_binding,
            ..
        }) = self.resources.get(&program.raw())
        {
            if let Some(slot) = storage_bindings
                .iter()
                .find(|slot| !self.storage_slots.contains_key(*slot))
            {
                return Err(GpuError::UnboundSlot {
                    program,
                    slot: *slot,
                });
            }
            if !self.image_slots.contains_key(image_binding) {
                return Err(GpuError::UnboundSlot {
                    program,
                    slot: *image_binding,
                });
            }
        }
        self.unsynchronized_writes = true;
        self.commands.push(GpuCommand::Dispatch { program, groups });
        Ok(())
    }

    fn memory_barrier(&mut self) {
        self.unsynchronized_writes = false;
        self.commands.push(GpuCommand::Barrier);
    }

    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        image: ImageHandle,
        quad: BufferHandle,
    ) -> Result<(), GpuError> {
        self.expect_stage(program, ShaderStage::Present)?;
        self.image(image)?;
        self.buffer(quad)?;
        if self.unsynchronized_writes {
            return Err(GpuError::MissingBarrier);
        }
        self.drew_this_frame = true;
        self.commands.push(GpuCommand::DrawFullscreen {
            program,
            image,
            quad,
        });
        Ok(())
    }
}

impl FramePresenter for HeadlessGpu {
    fn end_frame(&mut self) -> Result<(), GpuError> {
        let drew = std::mem::take(&mut self.drew_this_frame);
        self.frames += 1;
        self.commands.push(GpuCommand::EndFrame { drew });
        Ok(())
    }
}
