//! A procedural scene for the CLI: a banded sphere, a tiled floor, a few
//! hand-placed instances and optionally a cloud of scattered ones.

use crate::builder::BuiltScene;
use crate::description::{
    Indices, InstanceDescription, MaterialSet, MeshDescription, SceneDescription,
    SubmeshDescription, TextureHandle, VertexGenerics,
};
use crate::error::{BuildError, RangeError};
use crate::memory::DeviceAllocator;
use rand::{Rng, SeedableRng};
use shared_structs::TextureSlot;
use std::f32::consts::{PI, TAU};
use std::num::NonZeroU64;
use ultraviolet::{Mat4, Vec2, Vec3};

const fn texture(raw: u64) -> TextureHandle {
    match NonZeroU64::new(raw) {
        Some(raw) => TextureHandle::from_non_zero(raw),
        None => panic!("texture handles are non-zero"),
    }
}

// Handles a texture manager would hand out for the demo's images.
const WHITE: TextureHandle = texture(1);
const BLACK: TextureHandle = texture(2);
const BODY_NORMAL: TextureHandle = texture(3);
const CHECKERBOARD: TextureHandle = texture(4);
const RED: TextureHandle = texture(5);
const BLUE: TextureHandle = texture(6);
const IRRADIANCE: TextureHandle = texture(7);
const REFLECTIONS: TextureHandle = texture(8);
const SKY_DOME: TextureHandle = texture(9);

const SPHERE_SEGMENTS: u32 = 20;
const PLANE_SEGMENTS: u32 = 100;
const FLOOR_REPEAT: f32 = 20.0;

pub const SPHERE: u32 = 0;
pub const PLANE: u32 = 1;

/// A UV sphere split into three latitude bands (two caps and the body),
/// each its own submesh with its own base color. Always 32-bit indices.
pub fn sphere(radius: f32) -> Result<MeshDescription, RangeError> {
    let rings = SPHERE_SEGMENTS;
    let sectors = SPHERE_SEGMENTS;

    let mut positions = Vec::new();
    let mut generics = Vec::new();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;

        for sector in 0..=sectors {
            let theta = TAU * sector as f32 / sectors as f32;
            let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());

            positions.push(normal * radius);
            generics.push(VertexGenerics {
                texcoord: Vec2::new(sector as f32 / sectors as f32, ring as f32 / rings as f32),
                normal,
                tangent,
                bitangent: normal.cross(tangent),
            });
        }
    }

    let band = |rings: std::ops::Range<u32>| -> Vec<u32> {
        let stride = sectors + 1;
        let mut indices = Vec::new();
        for ring in rings {
            for sector in 0..sectors {
                let a = ring * stride + sector;
                let b = a + stride;
                indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }
        indices
    };

    let material = |base_color| {
        MaterialSet::from_ordered(&[
            Some(base_color),
            Some(WHITE),
            Some(BLACK),
            Some(BODY_NORMAL),
            Some(WHITE),
        ])
    };

    let cap = 3;

    Ok(MeshDescription {
        name: "sphere".to_string(),
        positions,
        generics,
        submeshes: vec![
            SubmeshDescription {
                indices: Indices::Wide(band(0..cap)),
                materials: material(RED)?,
            },
            SubmeshDescription {
                indices: Indices::Wide(band(cap..rings - cap)),
                materials: material(WHITE)?,
            },
            SubmeshDescription {
                indices: Indices::Wide(band(rings - cap..rings)),
                materials: material(BLUE)?,
            },
        ],
    })
}

/// A flat grid in the XZ plane facing +Y, with texture coordinates repeated
/// across it. Small enough for 16-bit indices.
pub fn plane(extent: f32) -> Result<MeshDescription, RangeError> {
    let segments = PLANE_SEGMENTS;
    let stride = segments + 1;

    let mut positions = Vec::new();
    let mut generics = Vec::new();

    for row in 0..=segments {
        for column in 0..=segments {
            let u = column as f32 / segments as f32;
            let v = row as f32 / segments as f32;

            positions.push(Vec3::new((u - 0.5) * extent, 0.0, (v - 0.5) * extent));
            generics.push(VertexGenerics {
                texcoord: Vec2::new(u, v) * FLOOR_REPEAT,
                normal: Vec3::unit_y(),
                tangent: Vec3::unit_x(),
                bitangent: Vec3::unit_z(),
            });
        }
    }

    let mut indices = Vec::new();
    for row in 0..segments {
        for column in 0..segments {
            let a = row * stride + column;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }

    let materials = MaterialSet::new()
        .with(TextureSlot::BaseColor, CHECKERBOARD)?
        .with(TextureSlot::Metallic, BLACK)?
        .with(TextureSlot::Roughness, WHITE)?
        .with(TextureSlot::AmbientOcclusion, WHITE)?;

    Ok(MeshDescription {
        name: "plane".to_string(),
        positions,
        generics,
        submeshes: vec![SubmeshDescription {
            indices: Indices::compact(indices),
            materials,
        }],
    })
}

/// The demo scene plus the one instance it animates between frames.
pub struct DemoScene {
    pub description: SceneDescription,
    spinner_instance: u32,
    spinner_base_transform: Mat4,
    spinner_rotation: f32,
}

impl DemoScene {
    pub fn new(scattered: usize, seed: u64) -> Result<Self, RangeError> {
        let mut description = SceneDescription::new();

        description.add_mesh(sphere(2.5)?);
        description.add_mesh(plane(100.0)?);

        description.set_environment(TextureSlot::Irradiance, Some(IRRADIANCE))?;
        description.set_environment(TextureSlot::Reflections, Some(REFLECTIONS))?;
        description.set_environment(TextureSlot::SkyDome, Some(SKY_DOME))?;

        for &(mesh_index, position, degrees) in &[
            (SPHERE, Vec3::new(20.0, -5.0, -40.0), 135.0_f32),
            (SPHERE, Vec3::new(-13.0, -5.0, -20.0), 235.0),
            (SPHERE, Vec3::new(-5.0, 2.75, -55.0), 0.0),
            (PLANE, Vec3::new(0.0, -5.0, 0.0), 0.0),
        ] {
            description.add_instance(InstanceDescription::placed(
                mesh_index,
                position,
                degrees.to_radians(),
            ));
        }

        let spinner_base_transform = Mat4::from_translation(Vec3::new(-5.0, 2.75, -55.0));

        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

        for _ in 0..scattered {
            let placed = InstanceDescription::placed(
                SPHERE,
                Vec3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-4.0..10.0),
                    rng.gen_range(-80.0..20.0),
                ),
                rng.gen_range(0.0..TAU),
            );
            description.add_instance(InstanceDescription {
                transform: placed.transform * Mat4::from_scale(rng.gen_range(0.1..0.5)),
                ..placed
            });
        }

        Ok(Self {
            description,
            spinner_instance: 2,
            spinner_base_transform,
            spinner_rotation: 0.0,
        })
    }

    pub fn update(&mut self) {
        self.spinner_rotation += 0.05;
    }

    pub fn spinner_transform(&self) -> Mat4 {
        self.spinner_base_transform * Mat4::from_rotation_y(self.spinner_rotation)
    }

    /// Pushes this frame's animated transform into the built scene.
    pub fn write_resources<A: DeviceAllocator + ?Sized>(
        &self,
        built: &mut BuiltScene,
        allocator: &mut A,
    ) -> Result<(), BuildError> {
        built.write_instance_transform(allocator, self.spinner_instance, self.spinner_transform())
    }
}
