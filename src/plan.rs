//! Region planning: which device arrays a scene needs, how large they are,
//! and how they are packed into allocations.

use crate::description::SceneDescription;
use crate::error::AllocationError;
use crate::memory::{align_up, AllocationId, DeviceAllocator, DeviceSlice};
use bytemuck::Pod;
use shared_structs::layout::{
    GENERICS_LAYOUT, INSTANCE_LAYOUT, MESH_LAYOUT, POSITION_STRIDE, SCENE_LAYOUT, SUBMESH_LAYOUT,
};
use shared_structs::DeviceAddress;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    /// One allocation per array.
    #[default]
    PerArray,
    /// Every array sub-allocated from a single allocation.
    Packed,
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-array" => Ok(Self::PerArray),
            "packed" => Ok(Self::Packed),
            other => Err(format!(
                "unknown placement {:?}, expected \"per-array\" or \"packed\"",
                other
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct RegionId(usize);

#[derive(Debug)]
pub(crate) struct Region {
    pub name: String,
    pub size: u64,
    pub alignment: u64,
}

#[derive(Debug)]
pub(crate) struct MeshRegions {
    pub positions: RegionId,
    pub generics: RegionId,
    pub index_arrays: Vec<RegionId>,
    /// `None` for a mesh without submeshes.
    pub submeshes: Option<RegionId>,
}

/// Regions in the order they must be written: vertex and index arrays first,
/// then the records that point at them, then the scene record.
#[derive(Debug)]
pub(crate) struct ScenePlan {
    regions: Vec<Region>,
    pub meshes: Vec<MeshRegions>,
    pub mesh_records: Option<RegionId>,
    pub instance_records: Option<RegionId>,
    pub scene_record: RegionId,
}

impl ScenePlan {
    /// Expects a validated description.
    pub fn new(description: &SceneDescription, min_alignment: u64) -> Self {
        let mut plan = Self {
            regions: Vec::new(),
            meshes: Vec::with_capacity(description.meshes.len()),
            mesh_records: None,
            instance_records: None,
            scene_record: RegionId(0),
        };

        let record_alignment = |align: usize| min_alignment.max(align as u64);

        for mesh in &description.meshes {
            let vertex_count = mesh.positions.len() as u64;

            let positions = plan.add(
                format!("{} positions", mesh.name),
                vertex_count * POSITION_STRIDE as u64,
                min_alignment.max(4),
            );
            let generics = plan.add(
                format!("{} generics", mesh.name),
                vertex_count * GENERICS_LAYOUT.size as u64,
                record_alignment(GENERICS_LAYOUT.align),
            );

            let index_arrays = mesh
                .submeshes
                .iter()
                .enumerate()
                .map(|(i, submesh)| {
                    plan.add(
                        format!("{} submesh {} indices", mesh.name, i),
                        submesh.indices.as_bytes().len() as u64,
                        min_alignment.max(4),
                    )
                })
                .collect();

            let submeshes = plan.add_array(
                format!("{} submeshes", mesh.name),
                mesh.submeshes.len(),
                SUBMESH_LAYOUT.size,
                record_alignment(SUBMESH_LAYOUT.align),
            );

            plan.meshes.push(MeshRegions {
                positions,
                generics,
                index_arrays,
                submeshes,
            });
        }

        plan.mesh_records = plan.add_array(
            "mesh records".to_string(),
            description.meshes.len(),
            MESH_LAYOUT.size,
            record_alignment(MESH_LAYOUT.align),
        );
        plan.instance_records = plan.add_array(
            "instance records".to_string(),
            description.instances.len(),
            INSTANCE_LAYOUT.size,
            record_alignment(INSTANCE_LAYOUT.align),
        );
        plan.scene_record = plan.add(
            "scene record".to_string(),
            SCENE_LAYOUT.size as u64,
            record_alignment(SCENE_LAYOUT.align),
        );

        plan
    }

    fn add(&mut self, name: String, size: u64, alignment: u64) -> RegionId {
        self.regions.push(Region {
            name,
            size,
            alignment,
        });
        RegionId(self.regions.len() - 1)
    }

    // Empty record arrays get no region, their address is written as null.
    fn add_array(
        &mut self,
        name: String,
        count: usize,
        stride: usize,
        alignment: u64,
    ) -> Option<RegionId> {
        (count > 0).then(|| self.add(name, (count * stride) as u64, alignment))
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Bytes needed when packed, alignment gaps included.
    pub fn packed_size(&self) -> u64 {
        self.packed_offsets().1
    }

    pub fn packed_alignment(&self) -> u64 {
        self.regions
            .iter()
            .map(|region| region.alignment)
            .max()
            .unwrap_or(1)
    }

    fn packed_offsets(&self) -> (Vec<u64>, u64) {
        let mut cursor = 0;
        let offsets = self
            .regions
            .iter()
            .map(|region| {
                let offset = align_up(cursor, region.alignment);
                cursor = offset + region.size;
                offset
            })
            .collect();
        (offsets, cursor)
    }

    /// Allocates every region. On failure whatever was already allocated is
    /// freed again before the error is returned.
    pub fn allocate<A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        placement: Placement,
    ) -> Result<PlacedRegions, AllocationError> {
        let mut placed = PlacedRegions {
            allocations: Vec::new(),
            places: Vec::with_capacity(self.regions.len()),
        };

        let result = match placement {
            Placement::PerArray => self.allocate_per_array(allocator, &mut placed),
            Placement::Packed => self.allocate_packed(allocator, &mut placed),
        };

        match result {
            Ok(()) => Ok(placed),
            Err(error) => {
                placed.release(allocator);
                Err(error)
            }
        }
    }

    fn allocate_per_array<A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        placed: &mut PlacedRegions,
    ) -> Result<(), AllocationError> {
        for region in &self.regions {
            log::info!("Creating {} of {} bytes", region.name, region.size);

            let allocation = allocator.allocate(region.size, region.alignment, &region.name)?;
            placed.allocations.push(allocation);
            placed.places.push((allocation, 0));
        }

        Ok(())
    }

    fn allocate_packed<A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        placed: &mut PlacedRegions,
    ) -> Result<(), AllocationError> {
        let (offsets, size) = self.packed_offsets();

        log::info!(
            "Creating packed scene storage of {} bytes for {} arrays",
            size,
            self.regions.len()
        );

        let allocation = allocator.allocate(size, self.packed_alignment(), "packed scene")?;
        placed.allocations.push(allocation);

        for (region, offset) in self.regions.iter().zip(offsets) {
            log::debug!("  {} at +{} ({} bytes)", region.name, offset, region.size);
            placed.places.push((allocation, offset));
        }

        Ok(())
    }
}

/// Where each planned region ended up.
#[derive(Debug)]
pub(crate) struct PlacedRegions {
    allocations: Vec<AllocationId>,
    places: Vec<(AllocationId, u64)>,
}

impl PlacedRegions {
    pub fn slice<T: Pod>(&self, region: RegionId, len: u32) -> DeviceSlice<T> {
        let (allocation, offset) = self.places[region.0];
        DeviceSlice::new(allocation, offset, len)
    }

    /// Writes a whole region and returns its device address.
    pub fn write<T: Pod, A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        region: RegionId,
        values: &[T],
    ) -> Result<DeviceAddress, AllocationError> {
        let slice = self.slice::<T>(region, values.len() as u32);
        slice.write_all(allocator, values)?;
        slice.address(allocator)
    }

    pub fn allocations(&self) -> &[AllocationId] {
        &self.allocations
    }

    pub fn into_allocations(self) -> Vec<AllocationId> {
        self.allocations
    }

    /// Frees everything. Failures are logged, the remaining allocations are
    /// still freed.
    pub fn release<A: DeviceAllocator + ?Sized>(self, allocator: &mut A) {
        for allocation in self.allocations {
            if let Err(error) = allocator.free(allocation) {
                log::warn!("Failed to free {:?}: {}", allocation, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{
        Indices, InstanceDescription, MaterialSet, MeshDescription, SubmeshDescription,
        VertexGenerics,
    };
    use crate::memory::HostArena;
    use ultraviolet::{Vec2, Vec3};

    fn quad_scene(instances: u32) -> SceneDescription {
        let generics = VertexGenerics {
            texcoord: Vec2::zero(),
            normal: Vec3::unit_y(),
            tangent: Vec3::unit_x(),
            bitangent: Vec3::unit_z(),
        };
        let mut scene = SceneDescription::new();
        let mesh = scene.add_mesh(MeshDescription {
            name: "quad".to_string(),
            positions: vec![Vec3::zero(); 4],
            generics: vec![generics; 4],
            submeshes: vec![SubmeshDescription {
                indices: Indices::Narrow(vec![0, 1, 2, 0, 2, 3]),
                materials: MaterialSet::new(),
            }],
        });
        for i in 0..instances {
            scene.add_instance(InstanceDescription::placed(mesh, Vec3::unit_x() * i as f32, 0.0));
        }
        scene
    }

    #[test]
    fn plans_arrays_before_records() {
        let plan = ScenePlan::new(&quad_scene(2), 16);
        let names: Vec<&str> = plan.regions().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "quad positions",
                "quad generics",
                "quad submesh 0 indices",
                "quad submeshes",
                "mesh records",
                "instance records",
                "scene record",
            ]
        );
        let sizes: Vec<u64> = plan.regions().iter().map(|r| r.size).collect();
        assert_eq!(sizes, [48, 128, 12, 56, 32, 160, 48]);
    }

    #[test]
    fn empty_record_arrays_have_no_region() {
        let plan = ScenePlan::new(&SceneDescription::new(), 16);
        assert!(plan.mesh_records.is_none());
        assert!(plan.instance_records.is_none());
        assert_eq!(plan.regions().len(), 1);
    }

    #[test]
    fn packed_offsets_respect_alignment() {
        let plan = ScenePlan::new(&quad_scene(1), 16);
        let (offsets, size) = plan.packed_offsets();
        for (region, offset) in plan.regions().iter().zip(&offsets) {
            assert_eq!(offset % region.alignment, 0, "{}", region.name);
        }
        assert_eq!(size, plan.packed_size());
        assert!(size >= plan.regions().iter().map(|r| r.size).sum::<u64>());
    }

    #[test]
    fn placement_strategies_differ_only_in_allocation_count() {
        let plan = ScenePlan::new(&quad_scene(3), 16);

        let mut arena = HostArena::new();
        let per_array = plan.allocate(&mut arena, Placement::PerArray).unwrap();
        assert_eq!(per_array.allocations().len(), plan.regions().len());
        per_array.release(&mut arena);

        let packed = plan.allocate(&mut arena, Placement::Packed).unwrap();
        assert_eq!(packed.allocations().len(), 1);
        packed.release(&mut arena);

        assert_eq!(arena.live_allocations(), 0);
    }

    #[test]
    fn failed_allocation_frees_earlier_regions() {
        let plan = ScenePlan::new(&quad_scene(3), 16);
        let mut arena = HostArena::with_capacity(200);
        assert!(plan.allocate(&mut arena, Placement::PerArray).is_err());
        assert_eq!(arena.live_allocations(), 0);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn placement_parses_from_cli_names() {
        assert_eq!("packed".parse::<Placement>(), Ok(Placement::Packed));
        assert_eq!("per-array".parse::<Placement>(), Ok(Placement::PerArray));
        assert!("both".parse::<Placement>().is_err());
    }

    #[test]
    fn placement_defaults_to_one_allocation_per_array() {
        assert_eq!(Placement::default(), Placement::PerArray);
        assert_eq!(crate::builder::BuildConfig::default().placement, Placement::PerArray);
    }
}
