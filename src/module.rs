//! The hot-reloadable render module.
//!
//! Built as the crate's `cdylib`, this is the code the supervisor swaps at
//! runtime. The exported functions use the Rust ABI, so the host and the
//! module must be built by the same compiler from the same sources; the types
//! crossing the boundary are the ones defined in this crate.

use log::{debug, error, info};
use thiserror::Error;

use crate::camera::Camera;
use crate::input::Movement;
use crate::render::shared::{
    CAMERA_BINDING, CAMERA_DIRECTION_UNIFORM, CAMERA_POSITION_UNIFORM, CAMERA_UNIFORMS,
    KERNEL_ENTRY, KERNEL_SOURCE, LIGHT_BINDING, OUTPUT_IMAGE_BINDING, PRESENT_FRAGMENT_ENTRY,
    PRESENT_SOURCE, PRESENT_VERTEX_ENTRY, PRIMITIVE_BINDING, WORKGROUP_SIZE,
};
use crate::render::{
    BufferHandle, ComputeProgramDesc, GpuDevice, GpuError, ImageHandle, PresentProgramDesc,
    ProgramHandle, Resource, WorkGroups,
};
use crate::scene::{Scene, SceneError};
use crate::state::{GpuResources, RendererState};
use crate::wire::{SceneTables, FULLSCREEN_QUAD};

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("scene rejected: {0}")]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Exported `initialize`: builds the compiled-in scene.
#[no_mangle]
pub fn initialize(state: &mut RendererState, gpu: &mut dyn GpuDevice) -> bool {
    initialize_with(state, gpu, &Scene::demo())
}

/// Exported `update`: one frame of camera movement. No GPU work.
#[no_mangle]
pub fn update(state: &mut RendererState, movement: Movement, dx: f32, dy: f32) {
    state.camera.step(movement, dx, dy);
}

/// Exported `draw`: dispatches the kernel and presents its output.
#[no_mangle]
pub fn draw(state: &mut RendererState, gpu: &mut dyn GpuDevice) {
    let Some(resources) = state.resources else {
        debug!("draw skipped: no resources");
        return;
    };
    if let Err(err) = render(&state.camera, &resources, gpu) {
        error!("draw failed: {err}");
    }
}

/// Routes this module's `log` records into the host's logger.
///
/// A dynamically loaded copy of the crate has its own `log` globals, which
/// stay unset unless the host hands its logger over.
#[no_mangle]
pub fn attach_logger(logger: &'static dyn log::Log, level: log::LevelFilter) {
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
    }
}

/// Initializes `state` with resources for `scene`.
///
/// On failure nothing created by this attempt survives and the previous
/// resources are left in place. The camera is only reset the first time.
pub fn initialize_with(state: &mut RendererState, gpu: &mut dyn GpuDevice, scene: &Scene) -> bool {
    match build(gpu, scene) {
        Ok((resources, tables)) => {
            if let Some(previous) = state.resources.replace(resources) {
                debug!("releasing previous generation resources");
                previous.release(gpu);
            }
            state.scene = tables;
            if !state.initialized {
                state.camera = Camera::INITIAL;
                state.initialized = true;
            }
            info!(
                "initialized: {} primitives, {} lights",
                tables.occupied_primitives(),
                tables.occupied_lights()
            );
            true
        }
        Err(err) => {
            error!("initialize failed: {err}");
            false
        }
    }
}

fn build(gpu: &mut dyn GpuDevice, scene: &Scene) -> Result<(GpuResources, SceneTables), ModuleError> {
    let tables = scene.to_tables()?;
    let (width, height) = gpu.surface_size();

    let mut builder = ResourceBuilder::new(gpu);
    let output_image = builder.image("output-image", width, height)?;
    let quad = builder.quad()?;
    let present_program = builder.program(|gpu| {
        gpu.compile_present(&PresentProgramDesc {
            label: "present",
            source: PRESENT_SOURCE,
            vertex_entry: PRESENT_VERTEX_ENTRY,
            fragment_entry: PRESENT_FRAGMENT_ENTRY,
        })
    })?;
    let kernel = builder.program(|gpu| {
        gpu.compile_compute(&ComputeProgramDesc {
            label: "raytrace-kernel",
            source: &KERNEL_SOURCE,
            entry_point: KERNEL_ENTRY,
            uniforms: &CAMERA_UNIFORMS,
            uniform_binding: CAMERA_BINDING,
            storage_bindings: &[PRIMITIVE_BINDING, LIGHT_BINDING],
            image_binding: OUTPUT_IMAGE_BINDING,
        })
    })?;
    let primitives = builder.storage("primitive-table", tables.primitive_bytes())?;
    let lights = builder.storage("light-table", tables.light_bytes())?;
    builder.commit();

    Ok((
        GpuResources {
            output_image,
            quad,
            present_program,
            kernel,
            primitives,
            lights,
        },
        tables,
    ))
}

fn render(camera: &Camera, resources: &GpuResources, gpu: &mut dyn GpuDevice) -> Result<(), GpuError> {
    let uniform = camera.to_uniform();
    gpu.set_uniform(resources.kernel, CAMERA_POSITION_UNIFORM, uniform.position)?;
    gpu.set_uniform(resources.kernel, CAMERA_DIRECTION_UNIFORM, uniform.direction)?;

    gpu.bind_storage_buffer(PRIMITIVE_BINDING, resources.primitives)?;
    gpu.bind_storage_buffer(LIGHT_BINDING, resources.lights)?;
    gpu.bind_output_image(OUTPUT_IMAGE_BINDING, resources.output_image)?;

    let (width, height) = gpu.image_size(resources.output_image)?;
    gpu.dispatch(
        resources.kernel,
        WorkGroups::covering(width, height, WORKGROUP_SIZE),
    )?;
    gpu.memory_barrier();

    gpu.draw_fullscreen(resources.present_program, resources.output_image, resources.quad)
}

/// Tracks what one initialize attempt created and releases it on drop
/// unless the attempt is committed.
struct ResourceBuilder<'a> {
    gpu: &'a mut dyn GpuDevice,
    created: Vec<Resource>,
}

impl<'a> ResourceBuilder<'a> {
    fn new(gpu: &'a mut dyn GpuDevice) -> Self {
        Self {
            gpu,
            created: Vec::new(),
        }
    }

    fn image(&mut self, label: &str, width: u32, height: u32) -> Result<ImageHandle, GpuError> {
        let image = self.gpu.create_image(label, width, height)?;
        self.created.push(Resource::Image(image));
        Ok(image)
    }

    fn quad(&mut self) -> Result<BufferHandle, GpuError> {
        let quad = self.gpu.create_vertex_buffer("fullscreen-quad", &FULLSCREEN_QUAD)?;
        self.created.push(Resource::Buffer(quad));
        Ok(quad)
    }

    fn storage(&mut self, label: &str, contents: &[u8]) -> Result<BufferHandle, GpuError> {
        let buffer = self.gpu.create_storage_buffer(label, contents)?;
        self.created.push(Resource::Buffer(buffer));
        Ok(buffer)
    }

    fn program(
        &mut self,
        compile: impl FnOnce(&mut dyn GpuDevice) -> Result<ProgramHandle, GpuError>,
    ) -> Result<ProgramHandle, GpuError> {
        let program = compile(&mut *self.gpu)?;
        self.created.push(Resource::Program(program));
        Ok(program)
    }

    fn commit(mut self) {
        self.created.clear();
    }
}

impl Drop for ResourceBuilder<'_> {
    fn drop(&mut self) {
        for resource in self.created.drain(..).rev() {
            self.gpu.release(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MOVEMENT_SPEED;
    use crate::render::{GpuCommand, HeadlessGpu};
    use crate::scene::{Light, Material, Primitive};
    use glam::{Vec3, Vec4};

    fn initialized(gpu: &mut HeadlessGpu) -> Box<RendererState> {
        let mut state = RendererState::boxed();
        assert!(initialize(&mut state, gpu));
        state
    }

    #[test]
    fn first_initialize_sets_the_default_camera() {
        let mut gpu = HeadlessGpu::new(64, 32);
        let state = initialized(&mut gpu);
        assert!(state.initialized);
        assert_eq!(state.camera, Camera::INITIAL);
        assert_eq!(state.camera.direction.w, MOVEMENT_SPEED);
        assert_eq!(gpu.live_resources(), 6);
        let resources = state.resources.unwrap();
        assert_eq!(gpu.image_size(resources.output_image), Ok((64, 32)));
        assert_eq!(
            gpu.buffer_contents(resources.primitives),
            Some(state.scene.primitive_bytes())
        );
    }

    #[test]
    fn second_initialize_keeps_camera_and_swaps_resources() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut state = initialized(&mut gpu);
        update(&mut state, Movement::Forward, 12.0, -3.0);
        let camera = state.camera;
        let old = state.resources.unwrap();

        assert!(initialize(&mut state, &mut gpu));
        assert_eq!(state.camera, camera);
        let new = state.resources.unwrap();
        assert_ne!(old, new);
        assert_eq!(gpu.live_resources(), 6);
        for resource in old.resources() {
            assert!(!gpu.is_live(resource), "{resource} survived");
        }
    }

    #[test]
    fn failed_compile_keeps_previous_resources() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut state = initialized(&mut gpu);
        let previous = state.resources.unwrap();

        gpu.fail_compilation("raytrace-kernel");
        gpu.take_commands();
        assert!(!initialize(&mut state, &mut gpu));

        assert_eq!(state.resources, Some(previous));
        assert_eq!(gpu.live_resources(), 6);
        for resource in previous.resources() {
            assert!(gpu.is_live(resource));
        }
        let released = gpu
            .commands()
            .iter()
            .filter(|command| matches!(command, GpuCommand::Release(_)))
            .count();
        assert_eq!(released, 3, "image, quad and present program roll back");
    }

    #[test]
    fn failed_first_initialize_leaves_state_blank() {
        let mut gpu = HeadlessGpu::new(16, 16);
        gpu.fail_compilation("present");
        let mut state = RendererState::boxed();
        assert!(!initialize(&mut state, &mut gpu));
        assert!(!state.initialized);
        assert!(state.resources.is_none());
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn overflowing_scene_is_reported_not_truncated() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut scene = Scene::new();
        for i in 0..11 {
            scene = scene.with_primitive(Primitive::Sphere {
                center: Vec3::new(i as f32, 0.0, -5.0),
                radius: 0.5,
                material: Material::Diffuse { color: Vec4::ONE },
            });
        }
        let mut state = RendererState::boxed();
        assert!(!initialize_with(&mut state, &mut gpu, &scene));
        assert_eq!(gpu.live_resources(), 0);
    }

    #[test]
    fn empty_scene_uploads_zeroed_tables() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut state = RendererState::boxed();
        assert!(initialize_with(&mut state, &mut gpu, &Scene::new()));
        let resources = state.resources.unwrap();
        let primitives = gpu.buffer_contents(resources.primitives).unwrap();
        let lights = gpu.buffer_contents(resources.lights).unwrap();
        assert!(primitives.iter().chain(lights).all(|byte| *byte == 0));
    }

    #[test]
    fn draw_dispatches_then_barriers_then_presents() {
        let mut gpu = HeadlessGpu::new(20, 10);
        let mut state = initialized(&mut gpu);
        gpu.take_commands();

        draw(&mut state, &mut gpu);
        let resources = state.resources.unwrap();
        let commands = gpu.take_commands();
        let dispatch = commands
            .iter()
            .position(|command| matches!(command, GpuCommand::Dispatch { .. }))
            .unwrap();
        assert_eq!(
            commands[dispatch],
            GpuCommand::Dispatch {
                program: resources.kernel,
                groups: WorkGroups { x: 3, y: 2, z: 1 },
            }
        );
        assert_eq!(commands[dispatch + 1], GpuCommand::Barrier);
        assert_eq!(
            commands[dispatch + 2],
            GpuCommand::DrawFullscreen {
                program: resources.present_program,
                image: resources.output_image,
                quad: resources.quad,
            }
        );
        assert_eq!(
            gpu.uniform(resources.kernel, CAMERA_DIRECTION_UNIFORM),
            Some([0.0, 0.0, -1.0, MOVEMENT_SPEED])
        );
    }

    #[test]
    fn draw_without_resources_is_a_no_op() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut state = RendererState::boxed();
        draw(&mut state, &mut gpu);
        assert!(gpu.commands().is_empty());
    }

    #[test]
    fn update_moves_only_the_camera() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let mut state = initialized(&mut gpu);
        gpu.take_commands();
        update(&mut state, Movement::Forward, 0.0, 0.0);
        assert!(state
            .camera
            .position
            .abs_diff_eq(Vec4::new(0.0, 0.0, -1.0, 1.0), 1e-5));
        assert!(gpu.commands().is_empty());
    }

    #[test]
    fn custom_scene_reaches_the_tables() {
        let mut gpu = HeadlessGpu::new(16, 16);
        let scene = Scene::new().with_light(Light::Point {
            position: Vec3::Y,
            color: Vec4::ONE,
            intensity: 2.0,
        });
        let mut state = RendererState::boxed();
        assert!(initialize_with(&mut state, &mut gpu, &scene));
        assert_eq!(state.scene.occupied_lights(), 1);
        assert_eq!(state.scene.lights[0].intensity, 2.0);
    }
}
