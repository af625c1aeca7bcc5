use log::error;
use serde::Serialize;

use crate::camera::Camera;
use crate::input::{InputCollector, Movement};
use crate::reload::{ModuleLoader, ReloadReport, Supervisor};
use crate::render::FramePresenter;
use crate::state::RendererState;

/// What happened during one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub reload: Option<ReloadReport>,
    pub movement: Movement,
    pub updated: bool,
    pub drew: bool,
}

/// Totals printed when the host exits.
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub frames: u64,
    pub draws: u64,
    pub reloads: u64,
    pub generation: Option<u64>,
    pub initialized: bool,
    pub primitives: usize,
    pub lights: usize,
    pub camera: Camera,
}

/// Drives the supervisor, device and renderer state one frame at a time.
pub struct Host<L: ModuleLoader, G: FramePresenter> {
    supervisor: Supervisor<L>,
    gpu: G,
    state: Box<RendererState>,
    input: InputCollector,
    frames: u64,
    draws: u64,
    reloads: u64,
}

impl<L: ModuleLoader, G: FramePresenter> Host<L, G> {
    pub fn new(supervisor: Supervisor<L>, gpu: G, input: InputCollector) -> Self {
        Self {
            supervisor,
            gpu,
            state: RendererState::boxed(),
            input,
            frames: 0,
            draws: 0,
            reloads: 0,
        }
    }

    /// Loads and initializes the first generation.
    pub fn start(&mut self) -> ReloadReport {
        self.reload()
    }

    fn reload(&mut self) -> ReloadReport {
        self.reloads += 1;
        self.supervisor.reload_now(&mut self.state, &mut self.gpu)
    }

    /// Runs one iteration: reload check, update, draw, present.
    pub fn frame(&mut self) -> FrameReport {
        let reload = if self.input.take_reload_request() {
            Some(self.reload())
        } else {
            let polled = self.supervisor.poll(&mut self.state, &mut self.gpu);
            if polled.is_some() {
                self.reloads += 1;
            }
            polled
        };

        let input = self.input.take_frame();
        let updated = self.supervisor.update(
            &mut self.state,
            input.movement,
            input.cursor_delta.x,
            input.cursor_delta.y,
        );
        let drew = self.supervisor.draw(&mut self.state, &mut self.gpu);
        if drew {
            self.draws += 1;
        }
        if let Err(err) = self.gpu.end_frame() {
            error!("present failed: {err}");
        }

        self.frames += 1;
        FrameReport {
            frame: self.frames,
            reload,
            movement: input.movement,
            updated,
            drew,
        }
    }

    pub fn input_mut(&mut self) -> &mut InputCollector {
        &mut self.input
    }

    pub fn quit_requested(&self) -> bool {
        self.input.quit_requested()
    }

    pub fn state(&self) -> &RendererState {
        &self.state
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub fn summary(&self) -> HostSummary {
        HostSummary {
            frames: self.frames,
            draws: self.draws,
            reloads: self.reloads,
            generation: self.supervisor.generation(),
            initialized: self.state.initialized,
            primitives: self.state.scene.occupied_primitives(),
            lights: self.state.scene.occupied_lights(),
            camera: self.state.camera,
        }
    }
}

pub fn print_final_state(summary: &HostSummary) {
    let pos = summary.camera.position;
    let dir = summary.camera.direction;
    println!(
        "camera pos=({:.2}, {:.2}, {:.2}, {:.2}) dir=({:.2}, {:.2}, {:.2}, {:.2})",
        pos.x, pos.y, pos.z, pos.w, dir.x, dir.y, dir.z, dir.w
    );
    println!(
        "frames={} draws={} reloads={} generation={} primitives={} lights={}",
        summary.frames,
        summary.draws,
        summary.reloads,
        summary
            .generation
            .map_or_else(|| "-".to_string(), |generation| generation.to_string()),
        summary.primitives,
        summary.lights
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glam::{Vec2, Vec4};

    use super::*;
    use crate::input::{KeyCode, MovementBindings};
    use crate::reload::{ModulePhase, StaticLoader};
    use crate::render::{GpuCommand, HeadlessGpu};

    fn host() -> Host<StaticLoader, HeadlessGpu> {
        let supervisor = Supervisor::new(StaticLoader, Duration::ZERO);
        let mut host = Host::new(
            supervisor,
            HeadlessGpu::new(32, 16),
            InputCollector::new(MovementBindings::default()),
        );
        assert_eq!(host.start().phase, ModulePhase::Initialized);
        host
    }

    #[test]
    fn frame_updates_draws_and_presents() {
        let mut host = host();
        host.input_mut().key(KeyCode::Character('W'), true);
        let report = host.frame();
        assert!(report.updated && report.drew);
        assert_eq!(report.movement, Movement::Forward);
        assert!(host
            .state()
            .camera
            .position
            .abs_diff_eq(Vec4::new(0.0, 0.0, -1.0, 1.0), 1e-5));
        assert_eq!(
            host.gpu().commands().last(),
            Some(&GpuCommand::EndFrame { drew: true })
        );
    }

    #[test]
    fn f5_forces_a_reload_and_keeps_the_camera() {
        let mut host = host();
        host.input_mut().cursor_moved(Vec2::new(0.0, 0.0));
        host.frame();
        host.input_mut().cursor_moved(Vec2::new(40.0, 0.0));
        host.frame();
        let camera = host.state().camera;

        host.input_mut().key(KeyCode::Function(5), true);
        let report = host.frame();
        assert_eq!(report.reload.map(|reload| reload.generation), Some(2));
        assert_eq!(host.state().camera, camera);
        assert_eq!(host.summary().reloads, 2);
        assert_eq!(host.gpu().live_resources(), 6);
    }

    #[test]
    fn blank_frame_is_presented_without_resources() {
        let supervisor = Supervisor::new(StaticLoader, Duration::ZERO);
        let mut gpu = HeadlessGpu::new(8, 8);
        gpu.fail_compilation("raytrace-kernel");
        let mut host = Host::new(supervisor, gpu, InputCollector::default());
        assert_eq!(host.start().phase, ModulePhase::InitializeFailed);

        let report = host.frame();
        assert!(!report.drew);
        assert_eq!(
            host.gpu().commands().last(),
            Some(&GpuCommand::EndFrame { drew: false })
        );
    }

    #[test]
    fn summary_reflects_the_demo_scene() {
        let mut host = host();
        host.frame();
        let summary = host.summary();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.draws, 1);
        assert_eq!(summary.generation, Some(1));
        assert_eq!(summary.primitives, 6);
        assert_eq!(summary.lights, 2);
    }
}
