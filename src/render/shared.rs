use once_cell::sync::Lazy;

use crate::wire::{
    LIGHT_CAPACITY, LIGHT_TYPE_NONE, LIGHT_TYPE_POINT, MATERIAL_TYPE_DIFFUSE, MATERIAL_TYPE_NONE,
    MATERIAL_TYPE_SPECULAR, PRIMITIVE_CAPACITY, PRIMITIVE_TYPE_NONE, PRIMITIVE_TYPE_SPHERE,
    PRIMITIVE_TYPE_TRIANGLE,
};

/// Edge length of the square tile handled by one kernel workgroup.
pub const WORKGROUP_SIZE: u32 = 8;
/// Horizontal field of view of the kernel camera, in degrees.
pub const CAMERA_FOV: f32 = 90.0;

pub const OUTPUT_IMAGE_BINDING: u32 = 0;
pub const PRIMITIVE_BINDING: u32 = 1;
pub const LIGHT_BINDING: u32 = 2;
pub const CAMERA_BINDING: u32 = 3;

pub const CAMERA_POSITION_UNIFORM: &str = "camera_position";
pub const CAMERA_DIRECTION_UNIFORM: &str = "camera_direction";
/// Members of the kernel's camera block, in declaration order.
pub const CAMERA_UNIFORMS: [&str; 2] = [CAMERA_POSITION_UNIFORM, CAMERA_DIRECTION_UNIFORM];

pub const KERNEL_ENTRY: &str = "main";
pub const PRESENT_VERTEX_ENTRY: &str = "vs_main";
pub const PRESENT_FRAGMENT_ENTRY: &str = "fs_main";

/// Complete kernel source: generated constants followed by the WGSL body.
pub static KERNEL_SOURCE: Lazy<String> =
    Lazy::new(|| format!("{}{}", kernel_prelude(), KERNEL_BODY));

/// Constants the kernel shares with the host, emitted from the Rust side.
pub fn kernel_prelude() -> String {
    format!(
        "const PRIMITIVE_COUNT: u32 = {PRIMITIVE_CAPACITY}u;\n\
         const LIGHT_COUNT: u32 = {LIGHT_CAPACITY}u;\n\
         const PRIMITIVE_TYPE_NONE: u32 = {PRIMITIVE_TYPE_NONE}u;\n\
         const PRIMITIVE_TYPE_TRIANGLE: u32 = {PRIMITIVE_TYPE_TRIANGLE}u;\n\
         const PRIMITIVE_TYPE_SPHERE: u32 = {PRIMITIVE_TYPE_SPHERE}u;\n\
         const MATERIAL_TYPE_NONE: u32 = {MATERIAL_TYPE_NONE}u;\n\
         const MATERIAL_TYPE_DIFFUSE: u32 = {MATERIAL_TYPE_DIFFUSE}u;\n\
         const MATERIAL_TYPE_SPECULAR: u32 = {MATERIAL_TYPE_SPECULAR}u;\n\
         const LIGHT_TYPE_NONE: u32 = {LIGHT_TYPE_NONE}u;\n\
         const LIGHT_TYPE_POINT: u32 = {LIGHT_TYPE_POINT}u;\n\
         const WORKGROUP_SIZE: u32 = {WORKGROUP_SIZE}u;\n\
         const CAMERA_FOV: f32 = {CAMERA_FOV:.1};\n"
    )
}

const KERNEL_BODY: &str = r#"
const EPSILON: f32 = 0.0001;
const FAR: f32 = 1.0e30;
const AMBIENT: f32 = 0.08;

struct Material {
    kind: u32,
    specular: f32,
    color: vec4<f32>,
}

struct Sphere {
    center: vec3<f32>,
    radius: f32,
}

struct Triangle {
    a: vec3<f32>,
    b: vec3<f32>,
    c: vec3<f32>,
}

struct Primitive {
    kind: u32,
    sphere: Sphere,
    triangle: Triangle,
    material: Material,
}

struct Light {
    kind: u32,
    intensity: f32,
    position: vec3<f32>,
    color: vec4<f32>,
}

struct Camera {
    camera_position: vec4<f32>,
    camera_direction: vec4<f32>,
}

struct Hit {
    t: f32,
    normal: vec3<f32>,
    index: u32,
}

@group(0) @binding(0)
var output_image: texture_storage_2d<rgba8unorm, write>;

@group(0) @binding(1)
var<storage, read> primitives: array<Primitive, PRIMITIVE_COUNT>;

@group(0) @binding(2)
var<storage, read> lights: array<Light, LIGHT_COUNT>;

@group(0) @binding(3)
var<uniform> camera: Camera;

fn intersect_sphere(sphere: Sphere, origin: vec3<f32>, dir: vec3<f32>) -> f32 {
    let oc = origin - sphere.center;
    let b = dot(oc, dir);
    let c = dot(oc, oc) - sphere.radius * sphere.radius;
    let disc = b * b - c;
    if (disc < 0.0) {
        return -1.0;
    }
    let root = sqrt(disc);
    var t = -b - root;
    if (t < EPSILON) {
        t = -b + root;
    }
    return t;
}

fn intersect_triangle(tri: Triangle, origin: vec3<f32>, dir: vec3<f32>) -> f32 {
    let e1 = tri.b - tri.a;
    let e2 = tri.c - tri.a;
    let p = cross(dir, e2);
    let det = dot(e1, p);
    if (abs(det) < EPSILON) {
        return -1.0;
    }
    let inv = 1.0 / det;
    let s = origin - tri.a;
    let u = dot(s, p) * inv;
    if (u < 0.0 || u > 1.0) {
        return -1.0;
    }
    let q = cross(s, e1);
    let v = dot(dir, q) * inv;
    if (v < 0.0 || u + v > 1.0) {
        return -1.0;
    }
    return dot(e2, q) * inv;
}

fn closest_hit(origin: vec3<f32>, dir: vec3<f32>) -> Hit {
    var hit = Hit(FAR, vec3<f32>(0.0), 0u);
    for (var i = 0u; i < PRIMITIVE_COUNT; i = i + 1u) {
        let primitive = primitives[i];
        var t = -1.0;
        var normal = vec3<f32>(0.0);
        if (primitive.kind == PRIMITIVE_TYPE_SPHERE) {
            t = intersect_sphere(primitive.sphere, origin, dir);
            normal = normalize(origin + dir * t - primitive.sphere.center);
        } else if (primitive.kind == PRIMITIVE_TYPE_TRIANGLE) {
            t = intersect_triangle(primitive.triangle, origin, dir);
            let tri = primitive.triangle;
            normal = normalize(cross(tri.b - tri.a, tri.c - tri.a));
            if (dot(normal, dir) > 0.0) {
                normal = -normal;
            }
        }
        if (t > EPSILON && t < hit.t) {
            hit = Hit(t, normal, i);
        }
    }
    return hit;
}

fn sky(dir: vec3<f32>) -> vec4<f32> {
    let k = 0.5 * (dir.y + 1.0);
    return vec4<f32>(mix(vec3<f32>(0.9, 0.9, 0.95), vec3<f32>(0.35, 0.55, 0.9), k), 1.0);
}

fn shade(origin: vec3<f32>, dir: vec3<f32>) -> vec4<f32> {
    let hit = closest_hit(origin, dir);
    if (hit.t >= FAR) {
        return sky(dir);
    }
    let material = primitives[hit.index].material;
    if (material.kind == MATERIAL_TYPE_NONE) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
    let hit_point = origin + dir * hit.t;
    var color = material.color.rgb * AMBIENT;
    for (var i = 0u; i < LIGHT_COUNT; i = i + 1u) {
        let light = lights[i];
        if (light.kind != LIGHT_TYPE_POINT) {
            continue;
        }
        let to_light = light.position - hit_point;
        let dist = length(to_light);
        let l = to_light / dist;
        let blocker = closest_hit(hit_point + hit.normal * EPSILON * 10.0, l);
        if (blocker.t < dist) {
            continue;
        }
        let radiance = light.color.rgb * light.intensity;
        color += material.color.rgb * radiance * max(dot(hit.normal, l), 0.0);
        if (material.kind == MATERIAL_TYPE_SPECULAR) {
            let r = reflect(-l, hit.normal);
            color += radiance * pow(max(dot(r, -dir), 0.0), material.specular);
        }
    }
    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), material.color.a);
}

@compute @workgroup_size(WORKGROUP_SIZE, WORKGROUP_SIZE, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(output_image);
    if (id.x >= size.x || id.y >= size.y) {
        return;
    }

    let forward = normalize(camera.camera_direction.xyz);
    var side = cross(forward, vec3<f32>(0.0, 1.0, 0.0));
    if (length(side) < EPSILON) {
        side = vec3<f32>(1.0, 0.0, 0.0);
    }
    let right = normalize(side);
    let up = cross(right, forward);

    let half_width = tan(radians(CAMERA_FOV) * 0.5);
    let aspect = f32(size.x) / f32(size.y);
    let uv = (vec2<f32>(id.xy) + vec2<f32>(0.5)) / vec2<f32>(size) * 2.0 - vec2<f32>(1.0);
    let dir = normalize(forward + right * uv.x * half_width + up * uv.y * half_width / aspect);

    textureStore(output_image, vec2<i32>(id.xy), shade(camera.camera_position.xyz, dir));
}
"#;

pub const PRESENT_SOURCE: &str = r#"
struct VertexInput {
    @location(0) position: vec4<f32>,
    @location(1) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0)
var frame_texture: texture_2d<f32>;

@group(0) @binding(1)
var frame_sampler: sampler;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = input.position;
    out.uv = input.uv;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(frame_texture, frame_sampler, input.uv);
}
"#;
