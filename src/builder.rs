//! Turns a validated scene description into device records.
//!
//! Arrays are written before the records that point at them, so every
//! address stored in a record refers to memory that already holds its data.

use crate::description::{Indices, SceneDescription, TextureHandle};
use crate::error::{AllocationError, BuildError, MemoryFault, RangeError};
use crate::header::DeviceLayoutManifest;
use crate::memory::{AllocationId, DeviceAllocator, DeviceSlice};
use crate::plan::{PlacedRegions, Placement, ScenePlan};
use crate::uniforms::matrix_columns;
use crate::validate::validate;
use crate::verify::{check_layouts, verify_scene};
use shared_structs::traversal::DeviceMemory;
use shared_structs::{
    DeviceAddress, GenericVertexAttributes, InstanceData, MeshData, SceneData, SubmeshData,
    NULL_ADDRESS,
};
use std::collections::BTreeSet;
use ultraviolet::Mat4;

#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub placement: Placement,
    /// Lower bound on the alignment of every region. Rounded up to a power of
    /// two.
    pub min_alignment: u64,
    /// Layout of the header the device programs were compiled against. When
    /// set, any difference from the host schema aborts the build.
    pub expected_layout: Option<DeviceLayoutManifest>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            placement: Placement::default(),
            min_alignment: 16,
            expected_layout: None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub meshes: usize,
    pub instances: usize,
    pub submeshes: usize,
    pub vertices: usize,
    pub triangles: usize,
    pub bytes: u64,
    pub allocations: usize,
}

/// A scene resident in device memory, addressed by one root pointer.
///
/// The allocations stay live until [`BuiltScene::release`] is called.
#[derive(Debug)]
#[must_use]
pub struct BuiltScene {
    scene_address: DeviceAddress,
    record: SceneData,
    instances: Option<DeviceSlice<InstanceData>>,
    allocations: Vec<AllocationId>,
    resident_textures: BTreeSet<TextureHandle>,
    stats: SceneStats,
}

impl BuiltScene {
    /// The single root a device program needs.
    pub fn scene_address(&self) -> DeviceAddress {
        self.scene_address
    }

    pub fn record(&self) -> &SceneData {
        &self.record
    }

    pub fn instance_count(&self) -> u32 {
        self.record.instance_count
    }

    pub fn mesh_count(&self) -> u32 {
        self.record.mesh_count
    }

    pub fn allocations(&self) -> &[AllocationId] {
        &self.allocations
    }

    /// Every distinct texture handle a device program may sample through
    /// this scene. The driver must keep all of them resident.
    pub fn resident_textures(&self) -> &BTreeSet<TextureHandle> {
        &self.resident_textures
    }

    pub fn stats(&self) -> &SceneStats {
        &self.stats
    }

    /// Rewrites one instance's transform in place. Only the transform bytes
    /// of the record are touched.
    pub fn write_instance_transform<A: DeviceAllocator + ?Sized>(
        &mut self,
        allocator: &mut A,
        instance: u32,
        transform: Mat4,
    ) -> Result<(), BuildError> {
        let out_of_range = RangeError::InstanceOutOfRange {
            instance,
            instance_count: self.record.instance_count,
        };

        let instances = self.instances.ok_or_else(|| out_of_range.clone())?;
        let offset = instances.element_offset(instance).ok_or(out_of_range)?;

        allocator.write(
            instances.allocation(),
            offset + InstanceData::TRANSFORM_OFFSET as u64,
            bytemuck::bytes_of(&matrix_columns(transform)),
        )?;

        Ok(())
    }

    /// Frees every allocation. All of them are attempted, the first failure
    /// is returned.
    pub fn release<A: DeviceAllocator + ?Sized>(
        self,
        allocator: &mut A,
    ) -> Result<(), AllocationError> {
        let mut first_error = None;

        for allocation in self.allocations {
            if let Err(error) = allocator.free(allocation) {
                log::warn!("Failed to free {:?}: {}", allocation, error);
                first_error.get_or_insert(error);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Builds the scene and returns its root. Nothing stays allocated on error.
pub fn build_scene<A: DeviceAllocator + ?Sized>(
    description: &SceneDescription,
    allocator: &mut A,
    config: &BuildConfig,
) -> Result<BuiltScene, BuildError> {
    check_layouts(config.expected_layout.as_ref())?;
    validate(description)?;

    let min_alignment = config.min_alignment.max(1).next_power_of_two();
    let plan = ScenePlan::new(description, min_alignment);
    let placed = plan.allocate(allocator, config.placement)?;

    let encoded = match encode(description, &plan, &placed, allocator) {
        Ok(encoded) => encoded,
        Err(error) => {
            placed.release(allocator);
            return Err(error.into());
        }
    };

    let stats = SceneStats {
        meshes: description.meshes.len(),
        instances: description.instances.len(),
        submeshes: description
            .meshes
            .iter()
            .map(|mesh| mesh.submeshes.len())
            .sum(),
        vertices: description
            .meshes
            .iter()
            .map(|mesh| mesh.positions.len())
            .sum(),
        triangles: description
            .meshes
            .iter()
            .map(|mesh| mesh.triangle_count())
            .sum(),
        bytes: plan.regions().iter().map(|region| region.size).sum(),
        allocations: placed.allocations().len(),
    };

    log::info!(
        "Built scene at {:#x}: {} meshes, {} instances, {} bytes in {} allocations",
        encoded.scene_address,
        stats.meshes,
        stats.instances,
        stats.bytes,
        stats.allocations
    );

    Ok(BuiltScene {
        scene_address: encoded.scene_address,
        record: encoded.record,
        instances: encoded.instances,
        allocations: placed.into_allocations(),
        resident_textures: description.textures().collect(),
        stats,
    })
}

/// [`build_scene`], then a full device-side walk over the result.
pub fn build_verified_scene<A>(
    description: &SceneDescription,
    allocator: &mut A,
    config: &BuildConfig,
) -> Result<BuiltScene, BuildError>
where
    A: DeviceAllocator + DeviceMemory<Error = MemoryFault> + ?Sized,
{
    let built = build_scene(description, allocator, config)?;

    match verify_scene(&*allocator, built.scene_address()) {
        Ok(report) => {
            log::info!(
                "Verified {} instances over {} meshes, {} submeshes, {} triangles",
                report.instances,
                report.meshes,
                report.submeshes,
                report.triangles
            );
            Ok(built)
        }
        Err(error) => {
            if let Err(release_error) = built.release(allocator) {
                log::warn!("Failed to release unverified scene: {}", release_error);
            }
            Err(error.into())
        }
    }
}

struct Encoded {
    scene_address: DeviceAddress,
    record: SceneData,
    instances: Option<DeviceSlice<InstanceData>>,
}

fn encode<A: DeviceAllocator + ?Sized>(
    description: &SceneDescription,
    plan: &ScenePlan,
    placed: &PlacedRegions,
    allocator: &mut A,
) -> Result<Encoded, AllocationError> {
    let mut mesh_records = Vec::with_capacity(description.meshes.len());

    for (mesh, regions) in description.meshes.iter().zip(&plan.meshes) {
        let positions: Vec<[f32; 3]> = mesh
            .positions
            .iter()
            .map(|position| [position.x, position.y, position.z])
            .collect();
        let generics: Vec<GenericVertexAttributes> =
            mesh.generics.iter().map(|generics| generics.encode()).collect();

        let positions = placed.write(allocator, regions.positions, &positions)?;
        let generics = placed.write(allocator, regions.generics, &generics)?;

        let mut submesh_records = Vec::with_capacity(mesh.submeshes.len());

        for (submesh, &region) in mesh.submeshes.iter().zip(&regions.index_arrays) {
            // Written as typed elements so the count stays the validated index count.
            let indices = match &submesh.indices {
                Indices::Narrow(indices) => placed.write(allocator, region, &indices[..])?,
                Indices::Wide(indices) => placed.write(allocator, region, &indices[..])?,
            };

            submesh_records.push(SubmeshData {
                index_width: submesh.indices.width().id(),
                index_count: submesh.indices.len() as u32,
                indices,
                materials: submesh.materials.encode(),
            });
        }

        let submeshes = match regions.submeshes {
            Some(region) => placed.write(allocator, region, &submesh_records)?,
            None => NULL_ADDRESS,
        };

        log::debug!(
            "{}: {} vertices, {} submeshes",
            mesh.name,
            mesh.positions.len(),
            submesh_records.len()
        );

        mesh_records.push(MeshData {
            positions,
            generics,
            submeshes,
            vertex_count: mesh.positions.len() as u32,
            submesh_count: submesh_records.len() as u32,
        });
    }

    let meshes = match plan.mesh_records {
        Some(region) => placed.write(allocator, region, &mesh_records)?,
        None => NULL_ADDRESS,
    };

    let instance_records: Vec<InstanceData> = description
        .instances
        .iter()
        .map(|instance| InstanceData::new(instance.mesh_index, matrix_columns(instance.transform)))
        .collect();

    let (instances, instance_slice) = match plan.instance_records {
        Some(region) => {
            let slice = placed.slice::<InstanceData>(region, instance_records.len() as u32);
            slice.write_all(allocator, &instance_records)?;
            (slice.address(allocator)?, Some(slice))
        }
        None => (NULL_ADDRESS, None),
    };

    let record = SceneData {
        instances,
        meshes,
        instance_count: instance_records.len() as u32,
        mesh_count: mesh_records.len() as u32,
        environment: description.encode_environment(),
    };

    let scene_address = placed.write(allocator, plan.scene_record, &[record])?;

    Ok(Encoded {
        scene_address,
        record,
        instances: instance_slice,
    })
}
