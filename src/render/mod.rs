//! Host-side GPU boundary used by the render module.
//!
//! The module never touches a graphics API directly.  It asks the host for
//! images, buffers and programs and receives small integer handles back, the
//! same way GL hands out object ids.  The objects themselves stay with the
//! host, so a handle stored in the renderer state remains meaningful after the
//! module that created it has been unloaded.

use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

use crate::wire::QuadVertex;

pub mod headless;
pub mod native;
pub mod shared;

pub use headless::{GpuCommand, HeadlessGpu};
pub use native::NativeGpu;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub fn from_raw(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

handle!(
    /// Writable image the kernel renders into.
    ImageHandle,
    "image"
);
handle!(
    /// Vertex or storage buffer.
    BufferHandle,
    "buffer"
);
handle!(
    /// Compiled compute or present program.
    ProgramHandle,
    "program"
);

/// Any resource that can be handed back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Image(ImageHandle),
    Buffer(BufferHandle),
    Program(ProgramHandle),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Image(handle) => fmt::Display::fmt(handle, f),
            Resource::Buffer(handle) => fmt::Display::fmt(handle, f),
            Resource::Program(handle) => fmt::Display::fmt(handle, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Compute,
    Present,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Compute => "compute",
            ShaderStage::Present => "present",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GpuError {
    #[error("{stage} program `{label}` failed to compile: {message}")]
    Compile {
        stage: ShaderStage,
        label: String,
        message: String,
    },
    #[error("{0} is stale or was never created by this device")]
    StaleHandle(Resource),
    #[error("{program} has no uniform named `{name}`")]
    UnknownUniform {
        program: ProgramHandle,
        name: String,
    },
    #[error("binding slot {slot} required by {program} is not bound")]
    UnboundSlot { program: ProgramHandle, slot: u32 },
    #[error("{program} is a {actual} program, expected {expected}")]
    WrongStage {
        program: ProgramHandle,
        expected: ShaderStage,
        actual: ShaderStage,
    },
    #[error("compute output was sampled without a memory barrier after the last dispatch")]
    MissingBarrier,
    #[error("surface error: {0}")]
    Surface(String),
    #[error("out of GPU memory")]
    OutOfMemory,
}

/// Everything the device needs to build a compute program.
///
/// `uniforms` lists the `vec4<f32>` members of the uniform block in
/// declaration order; they are later written by name.
#[derive(Debug, Clone, Copy)]
pub struct ComputeProgramDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry_point: &'a str,
    pub uniforms: &'a [&'a str],
    pub uniform_binding: u32,
    pub storage_bindings: &'a [u32],
    pub image_binding: u32,
}

/// Program that samples an image onto the fullscreen quad.
///
/// The bind layout is fixed: the image at binding 0 and a sampler at binding 1
/// of group 0, vertices laid out as [`QuadVertex`].
#[derive(Debug, Clone, Copy)]
pub struct PresentProgramDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
}

/// Number of work units launched by a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkGroups {
    /// Smallest grid of `size`x`size` tiles covering a `width`x`height` image.
    pub fn covering(width: u32, height: u32, size: u32) -> Self {
        let size = size.max(1);
        Self {
            x: width.div_ceil(size),
            y: height.div_ceil(size),
            z: 1,
        }
    }
}

/// GPU operations available to the render module.
pub trait GpuDevice {
    /// Size of the frame being presented; the output image is created to match.
    fn surface_size(&self) -> (u32, u32);

    fn create_image(&mut self, label: &str, width: u32, height: u32)
        -> Result<ImageHandle, GpuError>;

    fn image_size(&self, image: ImageHandle) -> Result<(u32, u32), GpuError>;

    fn create_vertex_buffer(
        &mut self,
        label: &str,
        vertices: &[QuadVertex],
    ) -> Result<BufferHandle, GpuError>;

    fn create_storage_buffer(
        &mut self,
        label: &str,
        contents: &[u8],
    ) -> Result<BufferHandle, GpuError>;

    fn compile_compute(&mut self, desc: &ComputeProgramDesc<'_>) -> Result<ProgramHandle, GpuError>;

    fn compile_present(&mut self, desc: &PresentProgramDesc<'_>) -> Result<ProgramHandle, GpuError>;

    /// Destroys a resource. Releasing an unknown handle is logged and ignored.
    fn release(&mut self, resource: Resource);

    fn set_uniform(
        &mut self,
        program: ProgramHandle,
        name: &str,
        value: [f32; 4],
    ) -> Result<(), GpuError>;

    fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferHandle) -> Result<(), GpuError>;

    fn bind_output_image(&mut self, slot: u32, image: ImageHandle) -> Result<(), GpuError>;

    fn dispatch(&mut self, program: ProgramHandle, groups: WorkGroups) -> Result<(), GpuError>;

    /// Makes every kernel write issued so far visible to later reads.
    fn memory_barrier(&mut self);

    /// Draws `image` over the whole frame with the fullscreen quad.
    fn draw_fullscreen(
        &mut self,
        program: ProgramHandle,
        image: ImageHandle,
        quad: BufferHandle,
    ) -> Result<(), GpuError>;
}

/// Host-only operations around a frame.
pub trait FramePresenter: GpuDevice {
    /// Presents the frame; an empty frame is presented as a cleared image.
    fn end_frame(&mut self) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_groups_cover_partial_tiles() {
        assert_eq!(
            WorkGroups::covering(640, 360, 8),
            WorkGroups { x: 80, y: 45, z: 1 }
        );
        assert_eq!(
            WorkGroups::covering(641, 1, 8),
            WorkGroups { x: 81, y: 1, z: 1 }
        );
        assert_eq!(WorkGroups::covering(3, 3, 0).x, 3);
    }

    #[test]
    fn handles_reject_zero_and_print_their_kind() {
        assert!(BufferHandle::from_raw(0).is_none());
        let image = ImageHandle::from_raw(7).unwrap();
        assert_eq!(image.to_string(), "image#7");
        assert_eq!(Resource::Image(image).to_string(), "image#7");
    }
}
