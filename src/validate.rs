use crate::description::{MeshDescription, SceneDescription};
use crate::error::RangeError;
use shared_structs::VERTICES_PER_PRIMITIVE;

fn count_u32(what: &'static str, count: usize) -> Result<u32, RangeError> {
    u32::try_from(count).map_err(|_| RangeError::CountOverflow { what, count })
}

/// Checks every reference the device will follow blindly: instance mesh
/// indices, vertex indices, and the array lengths behind them. The first
/// violation found is returned.
pub fn validate(description: &SceneDescription) -> Result<(), RangeError> {
    count_u32("mesh", description.meshes.len())?;
    count_u32("instance", description.instances.len())?;

    for (mesh_index, mesh) in description.meshes.iter().enumerate() {
        validate_mesh(mesh_index, mesh)?;
    }

    let mesh_count = description.meshes.len();

    for (instance, placed) in description.instances.iter().enumerate() {
        if placed.mesh_index as usize >= mesh_count {
            return Err(RangeError::MeshIndexOutOfRange {
                instance,
                mesh_index: placed.mesh_index,
                mesh_count,
            });
        }
    }

    Ok(())
}

fn validate_mesh(mesh_index: usize, mesh: &MeshDescription) -> Result<(), RangeError> {
    let vertex_count = mesh.positions.len();

    if vertex_count == 0 {
        return Err(RangeError::EmptyMesh { mesh: mesh_index });
    }

    if mesh.generics.len() != vertex_count {
        return Err(RangeError::GenericsLengthMismatch {
            mesh: mesh_index,
            positions: vertex_count,
            generics: mesh.generics.len(),
        });
    }

    count_u32("vertex", vertex_count)?;
    count_u32("submesh", mesh.submeshes.len())?;

    for (submesh_index, submesh) in mesh.submeshes.iter().enumerate() {
        let indices = &submesh.indices;

        if indices.is_empty() {
            return Err(RangeError::EmptySubmesh {
                mesh: mesh_index,
                submesh: submesh_index,
            });
        }

        if indices.len() % VERTICES_PER_PRIMITIVE as usize != 0 {
            return Err(RangeError::IncompletePrimitive {
                mesh: mesh_index,
                submesh: submesh_index,
                count: indices.len(),
            });
        }

        count_u32("index", indices.len())?;

        if let Some((position, index)) = indices
            .iter()
            .enumerate()
            .find(|&(_, index)| index as usize >= vertex_count)
        {
            return Err(RangeError::IndexOutOfRange {
                mesh: mesh_index,
                submesh: submesh_index,
                position,
                index,
                vertex_count,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{
        Indices, InstanceDescription, MaterialSet, SubmeshDescription, VertexGenerics,
    };
    use crate::builder::{build_scene, BuildConfig};
    use crate::error::BuildError;
    use crate::memory::HostArena;
    use ultraviolet::{Mat4, Vec2, Vec3};

    fn triangle(indices: Indices) -> MeshDescription {
        let generics = VertexGenerics {
            texcoord: Vec2::zero(),
            normal: Vec3::unit_z(),
            tangent: Vec3::unit_x(),
            bitangent: Vec3::unit_y(),
        };
        MeshDescription {
            name: "triangle".to_string(),
            positions: vec![Vec3::zero(), Vec3::unit_x(), Vec3::unit_y()],
            generics: vec![generics; 3],
            submeshes: vec![SubmeshDescription {
                indices,
                materials: MaterialSet::new(),
            }],
        }
    }

    fn scene_of(mesh: MeshDescription) -> SceneDescription {
        let mut scene = SceneDescription::new();
        scene.add_mesh(mesh);
        scene
    }

    #[test]
    fn accepts_a_well_formed_scene() {
        let mut scene = scene_of(triangle(Indices::Narrow(vec![0, 1, 2])));
        scene.add_instance(InstanceDescription {
            mesh_index: 0,
            transform: Mat4::identity(),
        });
        assert_eq!(validate(&scene), Ok(()));
    }

    #[test]
    fn an_empty_scene_is_valid() {
        assert_eq!(validate(&SceneDescription::new()), Ok(()));
    }

    #[test]
    fn index_equal_to_vertex_count_is_rejected() {
        let scene = scene_of(triangle(Indices::Wide(vec![0, 1, 3])));
        assert_eq!(
            validate(&scene),
            Err(RangeError::IndexOutOfRange {
                mesh: 0,
                submesh: 0,
                position: 2,
                index: 3,
                vertex_count: 3,
            })
        );
    }

    #[test]
    fn narrow_index_equal_to_vertex_count_is_rejected() {
        let scene = scene_of(triangle(Indices::Narrow(vec![0, 1, 2, 2, 3, 0])));
        assert_eq!(
            validate(&scene),
            Err(RangeError::IndexOutOfRange {
                mesh: 0,
                submesh: 0,
                position: 4,
                index: 3,
                vertex_count: 3,
            })
        );
    }

    #[test]
    fn meshes_without_vertices_are_rejected() {
        let mut mesh = triangle(Indices::Narrow(vec![0, 1, 2]));
        mesh.positions.clear();
        mesh.generics.clear();
        assert_eq!(
            validate(&scene_of(mesh)),
            Err(RangeError::EmptyMesh { mesh: 0 })
        );
    }

    #[test]
    fn submeshes_without_indices_are_rejected() {
        let mut scene = scene_of(triangle(Indices::Narrow(vec![0, 1, 2])));
        scene.add_mesh(triangle(Indices::Wide(Vec::new())));
        assert_eq!(
            validate(&scene),
            Err(RangeError::EmptySubmesh {
                mesh: 1,
                submesh: 0,
            })
        );
    }

    #[test]
    fn rejected_scenes_allocate_nothing() {
        let mut empty_mesh = triangle(Indices::Narrow(vec![0, 1, 2]));
        empty_mesh.positions.clear();
        empty_mesh.generics.clear();

        let rejected = [
            scene_of(triangle(Indices::Narrow(vec![0, 1, 3]))),
            scene_of(triangle(Indices::Wide(vec![3, 1, 2]))),
            scene_of(empty_mesh),
            scene_of(triangle(Indices::Narrow(Vec::new()))),
            scene_of(triangle(Indices::Wide(vec![0, 1, 2, 0]))),
        ];

        for scene in &rejected {
            let mut arena = HostArena::new();
            let result = build_scene(scene, &mut arena, &BuildConfig::default());
            assert!(matches!(result, Err(BuildError::Range(_))));
            assert_eq!(arena.live_allocations(), 0);
            assert_eq!(arena.used(), 0);
        }
    }

    #[test]
    fn partial_triangles_are_rejected() {
        let scene = scene_of(triangle(Indices::Narrow(vec![0, 1])));
        assert_eq!(
            validate(&scene),
            Err(RangeError::IncompletePrimitive {
                mesh: 0,
                submesh: 0,
                count: 2,
            })
        );
    }

    #[test]
    fn mismatched_generics_are_rejected() {
        let mut mesh = triangle(Indices::Narrow(vec![0, 1, 2]));
        mesh.generics.pop();
        assert!(matches!(
            validate(&scene_of(mesh)),
            Err(RangeError::GenericsLengthMismatch { generics: 2, .. })
        ));
    }

    #[test]
    fn instances_must_reference_existing_meshes() {
        let mut scene = scene_of(triangle(Indices::Narrow(vec![0, 1, 2])));
        scene.add_instance(InstanceDescription::placed(1, Vec3::zero(), 0.0));
        assert_eq!(
            validate(&scene),
            Err(RangeError::MeshIndexOutOfRange {
                instance: 0,
                mesh_index: 1,
                mesh_count: 1,
            })
        );
    }
}
