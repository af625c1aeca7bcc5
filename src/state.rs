use crate::camera::Camera;
use crate::render::{BufferHandle, GpuDevice, ImageHandle, ProgramHandle, Resource};
use crate::wire::SceneTables;

/// Handles created by one successful `initialize`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuResources {
    pub output_image: ImageHandle,
    pub quad: BufferHandle,
    pub present_program: ProgramHandle,
    pub kernel: ProgramHandle,
    pub primitives: BufferHandle,
    pub lights: BufferHandle,
}

impl GpuResources {
    pub fn resources(&self) -> [Resource; 6] {
        [
            Resource::Image(self.output_image),
            Resource::Buffer(self.quad),
            Resource::Program(self.present_program),
            Resource::Program(self.kernel),
            Resource::Buffer(self.primitives),
            Resource::Buffer(self.lights),
        ]
    }

    pub fn release(self, gpu: &mut dyn GpuDevice) {
        for resource in self.resources() {
            gpu.release(resource);
        }
    }
}

/// Everything that outlives a module swap.
///
/// The host boxes one value before the first load and passes the same box to
/// every generation, so its address never changes. The default value is the
/// all-zero state: not initialized, no resources, an all-zero camera.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RendererState {
    pub initialized: bool,
    pub camera: Camera,
    pub resources: Option<GpuResources>,
    pub scene: SceneTables,
}

impl RendererState {
    pub fn boxed() -> Box<Self> {
        Box::default()
    }

    pub fn has_resources(&self) -> bool {
        self.resources.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessGpu;
    use crate::wire::{FULLSCREEN_QUAD, SceneTables};

    #[test]
    fn default_state_is_blank() {
        let state = RendererState::boxed();
        assert!(!state.initialized);
        assert!(!state.has_resources());
        assert_eq!(state.camera, Camera::default());
        assert_eq!(state.scene.occupied_primitives(), 0);
        assert_eq!(state.scene.occupied_lights(), 0);
    }

    #[test]
    fn release_returns_every_handle() {
        let mut gpu = HeadlessGpu::new(4, 4);
        let tables = SceneTables::default();
        let resources = GpuResources {
            output_image: gpu.create_image("out", 4, 4).unwrap(),
            quad: gpu.create_vertex_buffer("quad", &FULLSCREEN_QUAD).unwrap(),
            present_program: gpu
                .compile_present(&crate::render::PresentProgramDesc {
                    label: "present",
                    source: crate::render::shared::PRESENT_SOURCE,
                    vertex_entry: "vs_main",
                    fragment_entry: "fs_main",
                })
                .unwrap(),
            kernel: gpu
                .compile_compute(&crate::render::ComputeProgramDesc {
                    label: "kernel",
                    source: &crate::render::shared::KERNEL_SOURCE,
                    entry_point: "main",
                    uniforms: &[],
                    uniform_binding: 3,
                    storage_bindings: &[],
                    image_binding: 0,
                })
                .unwrap(),
            primitives: gpu
                .create_storage_buffer("primitives", tables.primitive_bytes())
                .unwrap(),
            lights: gpu
                .create_storage_buffer("lights", tables.light_bytes())
                .unwrap(),
        };
        assert_eq!(gpu.live_resources(), 6);

        resources.release(&mut gpu);
        assert_eq!(gpu.live_resources(), 0);
        assert!(resources
            .resources()
            .iter()
            .all(|resource| !gpu.is_live(*resource)));
    }
}
