//! Flat, padded structs shared bit-for-bit with the compute kernel.
//!
//! Every struct follows the WGSL storage layout rules: a field that follows a
//! three component vector starts on the next 16 byte boundary, so the padding
//! is spelled out explicitly instead of relying on the Rust compiler.  The
//! kernel prelude in [`crate::render::shared`] is generated from the constants
//! in this module, which keeps both sides of the boundary in lockstep.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

/// Number of primitive slots scanned by the kernel.
pub const PRIMITIVE_CAPACITY: usize = 10;
/// Number of light slots scanned by the kernel.
pub const LIGHT_CAPACITY: usize = 4;

pub const PRIMITIVE_TYPE_NONE: u32 = 0;
pub const PRIMITIVE_TYPE_TRIANGLE: u32 = 1;
pub const PRIMITIVE_TYPE_SPHERE: u32 = 2;

pub const MATERIAL_TYPE_NONE: u32 = 0;
pub const MATERIAL_TYPE_DIFFUSE: u32 = 1;
pub const MATERIAL_TYPE_SPECULAR: u32 = 2;

pub const LIGHT_TYPE_NONE: u32 = 0;
pub const LIGHT_TYPE_POINT: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub kind: u32,
    pub specular: f32,
    pub _pad: [u32; 2],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSphere {
    pub center: [f32; 3],
    pub radius: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    pub a: [f32; 3],
    pub _pad0: f32,
    pub b: [f32; 3],
    pub _pad1: f32,
    pub c: [f32; 3],
    pub _pad2: f32,
}

/// One slot of the primitive table.
///
/// Both payloads are always present; `kind` selects the one the kernel reads.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuPrimitive {
    pub kind: u32,
    pub _pad: [u32; 3],
    pub sphere: GpuSphere,
    pub triangle: GpuTriangle,
    pub material: GpuMaterial,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub kind: u32,
    pub intensity: f32,
    pub _pad0: [u32; 2],
    pub position: [f32; 3],
    pub _pad1: f32,
    pub color: [f32; 4],
}

/// Camera block uploaded through the named kernel uniforms.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub position: [f32; 4],
    pub direction: [f32; 4],
}

/// Vertex of the fullscreen quad used by the present pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 4],
    pub uv: [f32; 2],
}

/// Triangle strip covering the whole viewport.
pub const FULLSCREEN_QUAD: [QuadVertex; 4] = [
    QuadVertex { position: [-1.0, -1.0, 0.0, 1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [1.0, -1.0, 0.0, 1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, 1.0, 0.0, 1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, 1.0, 0.0, 1.0], uv: [1.0, 1.0] },
];

const _: () = assert!(size_of::<GpuMaterial>() == 32);
const _: () = assert!(size_of::<GpuSphere>() == 16);
const _: () = assert!(size_of::<GpuTriangle>() == 48);
const _: () = assert!(size_of::<GpuPrimitive>() == 112);
const _: () = assert!(size_of::<GpuLight>() == 48);
const _: () = assert!(size_of::<CameraUniform>() == 32);
const _: () = assert!(size_of::<QuadVertex>() == 24);

/// Fixed-capacity tables exactly as they are uploaded to the storage buffers.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Zeroable)]
pub struct SceneTables {
    pub primitives: [GpuPrimitive; PRIMITIVE_CAPACITY],
    pub lights: [GpuLight; LIGHT_CAPACITY],
}

impl Default for SceneTables {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl SceneTables {
    pub fn primitive_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.primitives)
    }

    pub fn light_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.lights)
    }

    /// Number of slots the kernel will actually shade.
    pub fn occupied_primitives(&self) -> usize {
        self.primitives
            .iter()
            .filter(|slot| slot.kind != PRIMITIVE_TYPE_NONE)
            .count()
    }

    pub fn occupied_lights(&self) -> usize {
        self.lights
            .iter()
            .filter(|slot| slot.kind != LIGHT_TYPE_NONE)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn primitive_fields_follow_storage_alignment() {
        assert_eq!(offset_of!(GpuPrimitive, sphere), 16);
        assert_eq!(offset_of!(GpuPrimitive, triangle), 32);
        assert_eq!(offset_of!(GpuPrimitive, material), 80);
        assert_eq!(offset_of!(GpuTriangle, b), 16);
        assert_eq!(offset_of!(GpuTriangle, c), 32);
        assert_eq!(offset_of!(GpuMaterial, color), 16);
    }

    #[test]
    fn light_fields_follow_storage_alignment() {
        assert_eq!(offset_of!(GpuLight, intensity), 4);
        assert_eq!(offset_of!(GpuLight, position), 16);
        assert_eq!(offset_of!(GpuLight, color), 32);
    }

    #[test]
    fn empty_tables_are_all_zero_bytes() {
        let tables = SceneTables::default();
        assert!(tables.primitive_bytes().iter().all(|byte| *byte == 0));
        assert!(tables.light_bytes().iter().all(|byte| *byte == 0));
        assert_eq!(tables.occupied_primitives(), 0);
        assert_eq!(tables.occupied_lights(), 0);
        assert_eq!(
            tables.primitive_bytes().len(),
            PRIMITIVE_CAPACITY * size_of::<GpuPrimitive>()
        );
    }
}
