//! Checks that run against the device-facing side: the schema itself, the
//! header a device program was built with, and a built scene walked the way
//! a device program would walk it.

use crate::error::{LayoutDriftError, MemoryFault, RangeError, VerifyError};
use crate::header::DeviceLayoutManifest;
use shared_structs::layout::RECORDS;
use shared_structs::traversal::{DeviceMemory, SceneWalker};
use shared_structs::{DeviceAddress, NULL_RESOURCE};
use std::collections::BTreeSet;

/// Fails if any record table is internally inconsistent, or if `expected`
/// (parsed from a device header) disagrees with the current schema.
pub fn check_layouts(expected: Option<&DeviceLayoutManifest>) -> Result<(), LayoutDriftError> {
    let mut mismatches: Vec<String> = RECORDS
        .iter()
        .filter(|record| !record.is_consistent())
        .map(|record| format!("{} layout is inconsistent", record.name))
        .collect();

    if let Some(expected) = expected {
        mismatches.extend(DeviceLayoutManifest::current().diff(expected));
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(LayoutDriftError { mismatches })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraversalReport {
    pub instances: u32,
    pub meshes: u32,
    pub submeshes: u32,
    pub triangles: u64,
    pub populated_materials: u32,
    pub null_materials: u32,
}

/// Walks every instance, mesh, submesh and triangle reachable from
/// `scene_address`, reading each vertex the triangle references.
///
/// Meshes are checked once each, including meshes no instance uses.
pub fn verify_scene<M>(
    memory: &M,
    scene_address: DeviceAddress,
) -> Result<TraversalReport, VerifyError>
where
    M: DeviceMemory<Error = MemoryFault> + ?Sized,
{
    let walker = SceneWalker::new(memory, scene_address)?;
    let scene = *walker.scene();
    let mut report = TraversalReport::default();
    // Counts come from device memory, so nothing is sized from them.
    let mut checked = BTreeSet::new();

    for instance_index in 0..scene.instance_count {
        let instance = walker.instance(instance_index)?;

        if instance.mesh_index >= scene.mesh_count {
            return Err(RangeError::MeshIndexOutOfRange {
                instance: instance_index as usize,
                mesh_index: instance.mesh_index,
                mesh_count: scene.mesh_count as usize,
            }
            .into());
        }

        if checked.insert(instance.mesh_index) {
            verify_mesh(&walker, instance.mesh_index, &mut report)?;
        }

        report.instances += 1;
    }

    for mesh_index in 0..scene.mesh_count {
        if !checked.contains(&mesh_index) {
            verify_mesh(&walker, mesh_index, &mut report)?;
        }
    }

    Ok(report)
}

fn verify_mesh<M>(
    walker: &SceneWalker<'_, M>,
    mesh_index: u32,
    report: &mut TraversalReport,
) -> Result<(), VerifyError>
where
    M: DeviceMemory<Error = MemoryFault> + ?Sized,
{
    let mesh = walker.mesh(mesh_index)?;

    if mesh.vertex_count == 0 {
        return Err(RangeError::EmptyMesh {
            mesh: mesh_index as usize,
        }
        .into());
    }

    // Both vertex arrays must cover every vertex.
    walker.position(&mesh, mesh.vertex_count - 1)?;
    walker.generics(&mesh, mesh.vertex_count - 1)?;

    for submesh_index in 0..mesh.submesh_count {
        let submesh = walker.submesh(&mesh, submesh_index)?;

        if submesh.index_width().is_none() {
            return Err(VerifyError::UnknownIndexWidth {
                mesh: mesh_index,
                submesh: submesh_index,
                flag: submesh.index_width,
            });
        }

        if submesh.index_count == 0 || submesh.index_count % 3 != 0 {
            return Err(RangeError::IncompletePrimitive {
                mesh: mesh_index as usize,
                submesh: submesh_index as usize,
                count: submesh.index_count as usize,
            }
            .into());
        }

        for primitive in 0..submesh.primitive_count() {
            let vertices = walker.primitive_indices(&submesh, primitive)?;

            for (corner, &vertex) in vertices.iter().enumerate() {
                if vertex >= mesh.vertex_count {
                    return Err(RangeError::IndexOutOfRange {
                        mesh: mesh_index as usize,
                        submesh: submesh_index as usize,
                        position: primitive as usize * 3 + corner,
                        index: vertex,
                        vertex_count: mesh.vertex_count as usize,
                    }
                    .into());
                }
            }
        }

        let populated = submesh
            .materials
            .iter()
            .filter(|&&handle| handle != NULL_RESOURCE)
            .count() as u32;

        report.triangles += submesh.primitive_count() as u64;
        report.populated_materials += populated;
        report.null_materials += submesh.materials.len() as u32 - populated;
        report.submeshes += 1;
    }

    report.meshes += 1;
    Ok(())
}
