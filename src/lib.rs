//! Real-time compute-shader raytracer with a hot-reloadable render module.
//!
//! The crate builds twice: as an `rlib` linked into the `hotray` host and as
//! a `cdylib` that the host loads, watches and swaps at runtime.  Everything
//! that must survive a swap lives in [`RendererState`]; the module itself is
//! stateless code behind the entry points in [`module`].

pub mod app;
pub mod camera;
pub mod config;
pub mod frame;
pub mod input;
pub mod module;
pub mod reload;
pub mod render;
pub mod scene;
pub mod state;
pub mod wire;

pub use app::{FrameReport, Host, HostSummary};
pub use camera::Camera;
pub use config::{ConfigError, HostConfig};
pub use frame::FramePacer;
pub use input::{FrameInput, InputCollector, KeyCode, Movement, MovementBindings, NamedKey};
pub use reload::{DylibLoader, ModuleLoader, ModulePhase, StaticLoader, Supervisor};
pub use render::{FramePresenter, GpuDevice, GpuError, HeadlessGpu, NativeGpu};
pub use scene::{Light, Material, Primitive, Scene, SceneError};
pub use state::{GpuResources, RendererState};
