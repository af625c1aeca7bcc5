use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::{
    GpuLight, GpuMaterial, GpuPrimitive, GpuSphere, GpuTriangle, SceneTables, LIGHT_CAPACITY,
    LIGHT_TYPE_POINT, MATERIAL_TYPE_DIFFUSE, MATERIAL_TYPE_NONE, MATERIAL_TYPE_SPECULAR,
    PRIMITIVE_CAPACITY, PRIMITIVE_TYPE_SPHERE, PRIMITIVE_TYPE_TRIANGLE,
};

/// Scene description handed to the kernel.
///
/// Primitives and lights keep their insertion order; the position in each list
/// becomes the slot index in the uploaded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Scene {
    pub primitives: Vec<Primitive>,
    pub lights: Vec<Light>,
}

/// Surface response of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Material {
    #[default]
    None,
    Diffuse {
        color: Vec4,
    },
    Specular {
        color: Vec4,
        exponent: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Triangle {
        a: Vec3,
        b: Vec3,
        c: Vec3,
        material: Material,
    },
    Sphere {
        center: Vec3,
        radius: f32,
        material: Material,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Light {
    Point {
        position: Vec3,
        color: Vec4,
        intensity: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("scene holds {count} primitives but the kernel table has {capacity} slots")]
    PrimitiveOverflow { count: usize, capacity: usize },
    #[error("scene holds {count} lights but the kernel table has {capacity} slots")]
    LightOverflow { count: usize, capacity: usize },
    #[error("primitive {index} is degenerate: {reason}")]
    Degenerate { index: usize, reason: &'static str },
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitives.push(primitive);
        self
    }

    pub fn with_light(mut self, light: Light) -> Self {
        self.lights.push(light);
        self
    }

    /// The scene compiled into the render module.
    pub fn demo() -> Self {
        let floor = Material::Diffuse {
            color: Vec4::new(0.55, 0.55, 0.5, 1.0),
        };
        let near_left = Vec3::new(-6.0, -1.0, 1.0);
        let near_right = Vec3::new(6.0, -1.0, 1.0);
        let far_right = Vec3::new(6.0, -1.0, -14.0);
        let far_left = Vec3::new(-6.0, -1.0, -14.0);

        Self::new()
            .with_primitive(Primitive::Triangle {
                a: near_left,
                b: near_right,
                c: far_right,
                material: floor,
            })
            .with_primitive(Primitive::Triangle {
                a: near_left,
                b: far_right,
                c: far_left,
                material: floor,
            })
            .with_primitive(Primitive::Triangle {
                a: Vec3::new(-4.0, -1.0, -10.0),
                b: Vec3::new(4.0, -1.0, -10.0),
                c: Vec3::new(0.0, 4.0, -11.0),
                material: Material::Diffuse {
                    color: Vec4::new(0.9, 0.75, 0.2, 1.0),
                },
            })
            .with_primitive(Primitive::Sphere {
                center: Vec3::new(-1.3, -0.2, -4.0),
                radius: 0.8,
                material: Material::Diffuse {
                    color: Vec4::new(0.85, 0.2, 0.15, 1.0),
                },
            })
            .with_primitive(Primitive::Sphere {
                center: Vec3::new(1.3, 0.0, -5.0),
                radius: 1.0,
                material: Material::Specular {
                    color: Vec4::new(0.2, 0.35, 0.9, 1.0),
                    exponent: 32.0,
                },
            })
            .with_primitive(Primitive::Sphere {
                center: Vec3::new(0.0, -0.6, -2.8),
                radius: 0.4,
                material: Material::Specular {
                    color: Vec4::new(0.2, 0.8, 0.3, 1.0),
                    exponent: 8.0,
                },
            })
            .with_light(Light::Point {
                position: Vec3::new(2.0, 4.0, -1.0),
                color: Vec4::ONE,
                intensity: 1.0,
            })
            .with_light(Light::Point {
                position: Vec3::new(-3.0, 2.0, -2.0),
                color: Vec4::new(1.0, 0.8, 0.6, 1.0),
                intensity: 0.5,
            })
    }

    /// Checks capacity and geometry, then flattens the scene into the fixed
    /// tables.  Unused slots stay zeroed and therefore carry the NONE tag.
    pub fn to_tables(&self) -> Result<SceneTables, SceneError> {
        if self.primitives.len() > PRIMITIVE_CAPACITY {
            return Err(SceneError::PrimitiveOverflow {
                count: self.primitives.len(),
                capacity: PRIMITIVE_CAPACITY,
            });
        }
        if self.lights.len() > LIGHT_CAPACITY {
            return Err(SceneError::LightOverflow {
                count: self.lights.len(),
                capacity: LIGHT_CAPACITY,
            });
        }

        let mut tables = SceneTables::default();
        for (index, primitive) in self.primitives.iter().enumerate() {
            primitive.validate(index)?;
            tables.primitives[index] = primitive.to_gpu();
        }
        for (slot, light) in tables.lights.iter_mut().zip(&self.lights) {
            *slot = light.to_gpu();
        }
        Ok(tables)
    }
}

impl Material {
    pub fn to_gpu(&self) -> GpuMaterial {
        match *self {
            Material::None => GpuMaterial {
                kind: MATERIAL_TYPE_NONE,
                ..GpuMaterial::default()
            },
            Material::Diffuse { color } => GpuMaterial {
                kind: MATERIAL_TYPE_DIFFUSE,
                color: color.into(),
                ..GpuMaterial::default()
            },
            Material::Specular { color, exponent } => GpuMaterial {
                kind: MATERIAL_TYPE_SPECULAR,
                specular: exponent,
                color: color.into(),
                ..GpuMaterial::default()
            },
        }
    }
}

impl Primitive {
    fn validate(&self, index: usize) -> Result<(), SceneError> {
        match *self {
            Primitive::Sphere { radius, .. } if !(radius > 0.0 && radius.is_finite()) => {
                Err(SceneError::Degenerate {
                    index,
                    reason: "sphere radius must be positive and finite",
                })
            }
            Primitive::Triangle { a, b, c, .. } if (b - a).cross(c - a).length_squared() == 0.0 => {
                Err(SceneError::Degenerate {
                    index,
                    reason: "triangle has zero area",
                })
            }
            _ => Ok(()),
        }
    }

    pub fn to_gpu(&self) -> GpuPrimitive {
        match *self {
            Primitive::Triangle { a, b, c, material } => GpuPrimitive {
                kind: PRIMITIVE_TYPE_TRIANGLE,
                triangle: GpuTriangle {
                    a: a.into(),
                    b: b.into(),
                    c: c.into(),
                    ..GpuTriangle::default()
                },
                material: material.to_gpu(),
                ..GpuPrimitive::default()
            },
            Primitive::Sphere {
                center,
                radius,
                material,
            } => GpuPrimitive {
                kind: PRIMITIVE_TYPE_SPHERE,
                sphere: GpuSphere {
                    center: center.into(),
                    radius,
                },
                material: material.to_gpu(),
                ..GpuPrimitive::default()
            },
        }
    }
}

impl Light {
    pub fn to_gpu(&self) -> GpuLight {
        match *self {
            Light::Point {
                position,
                color,
                intensity,
            } => GpuLight {
                kind: LIGHT_TYPE_POINT,
                intensity,
                position: position.into(),
                color: color.into(),
                ..GpuLight::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{LIGHT_TYPE_NONE, PRIMITIVE_TYPE_NONE};

    fn unit_sphere() -> Primitive {
        Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
            material: Material::Diffuse { color: Vec4::ONE },
        }
    }

    #[test]
    fn demo_scene_fits_the_kernel_tables() {
        let tables = Scene::demo().to_tables().unwrap();
        assert_eq!(tables.occupied_primitives(), 6);
        assert_eq!(tables.occupied_lights(), 2);
        assert_eq!(tables.primitives[6].kind, PRIMITIVE_TYPE_NONE);
        assert_eq!(tables.lights[3].kind, LIGHT_TYPE_NONE);
    }

    #[test]
    fn unused_slots_are_zero_filled() {
        let tables = Scene::new().with_primitive(unit_sphere()).to_tables().unwrap();
        assert_eq!(tables.primitives[0].kind, PRIMITIVE_TYPE_SPHERE);
        for slot in &tables.primitives[1..] {
            assert_eq!(*slot, GpuPrimitive::default());
        }
        assert!(tables.light_bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn overflow_is_reported_instead_of_truncated() {
        let mut scene = Scene::new();
        for _ in 0..=PRIMITIVE_CAPACITY {
            scene.primitives.push(unit_sphere());
        }
        assert_eq!(
            scene.to_tables(),
            Err(SceneError::PrimitiveOverflow {
                count: PRIMITIVE_CAPACITY + 1,
                capacity: PRIMITIVE_CAPACITY,
            })
        );

        let mut scene = Scene::new();
        for _ in 0..=LIGHT_CAPACITY {
            scene.lights.push(Light::Point {
                position: Vec3::ZERO,
                color: Vec4::ONE,
                intensity: 1.0,
            });
        }
        assert!(matches!(
            scene.to_tables(),
            Err(SceneError::LightOverflow { .. })
        ));
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let flat = Primitive::Triangle {
            a: Vec3::ZERO,
            b: Vec3::X,
            c: Vec3::X * 2.0,
            material: Material::None,
        };
        let err = Scene::new()
            .with_primitive(unit_sphere())
            .with_primitive(flat)
            .to_tables()
            .unwrap_err();
        assert!(matches!(err, SceneError::Degenerate { index: 1, .. }));

        let empty = Primitive::Sphere {
            center: Vec3::ZERO,
            radius: 0.0,
            material: Material::None,
        };
        assert!(Scene::new().with_primitive(empty).to_tables().is_err());
    }

    #[test]
    fn specular_material_carries_exponent_and_color() {
        let gpu = Material::Specular {
            color: Vec4::new(0.1, 0.2, 0.3, 1.0),
            exponent: 16.0,
        }
        .to_gpu();
        assert_eq!(gpu.kind, MATERIAL_TYPE_SPECULAR);
        assert_eq!(gpu.specular, 16.0);
        assert_eq!(gpu.color, [0.1, 0.2, 0.3, 1.0]);
    }
}
