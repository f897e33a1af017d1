use crate::memory::AllocationId;
use shared_structs::{DeviceAddress, TextureSlot};
use thiserror::Error;

/// Everything that can stop a scene from being built. Each failure is raised
/// before the scene is handed out, and every allocation made for it has been
/// released by then.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    LayoutDrift(#[from] LayoutDriftError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("built scene failed verification: {0}")]
    Verify(#[from] VerifyError),
}

/// The host schema and the layout a device program was compiled against
/// disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device layout drift: {}", .mismatches.join("; "))]
pub struct LayoutDriftError {
    pub mismatches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("mesh {mesh} has no vertices")]
    EmptyMesh { mesh: usize },
    #[error("mesh {mesh} has {positions} positions but {generics} generic attribute records")]
    GenericsLengthMismatch {
        mesh: usize,
        positions: usize,
        generics: usize,
    },
    #[error("mesh {mesh} submesh {submesh} has no indices")]
    EmptySubmesh { mesh: usize, submesh: usize },
    #[error("mesh {mesh} submesh {submesh} has {count} indices, not a whole number of triangles")]
    IncompletePrimitive {
        mesh: usize,
        submesh: usize,
        count: usize,
    },
    #[error(
        "mesh {mesh} submesh {submesh} index {position} is {index} but the mesh has {vertex_count} vertices"
    )]
    IndexOutOfRange {
        mesh: usize,
        submesh: usize,
        position: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("instance {instance} references mesh {mesh_index} but the scene has {mesh_count} meshes")]
    MeshIndexOutOfRange {
        instance: usize,
        mesh_index: u32,
        mesh_count: usize,
    },
    #[error("instance {instance} is out of range, the scene has {instance_count} instances")]
    InstanceOutOfRange { instance: u32, instance_count: u32 },
    #[error("{slot:?} is not a per-submesh material slot")]
    NotAMaterialSlot { slot: TextureSlot },
    #[error("{slot:?} is not a scene environment slot")]
    NotAnEnvironmentSlot { slot: TextureSlot },
    #[error("{count} material textures supplied, a submesh holds at most {max}")]
    TooManyMaterials { count: usize, max: usize },
    #[error("{what} count {count} does not fit a 32-bit count field")]
    CountOverflow { what: &'static str, count: usize },
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("out of device memory for {name:?}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        name: String,
        requested: u64,
        available: u64,
    },
    #[error("refusing to allocate zero bytes for {name:?}")]
    ZeroSized { name: String },
    #[error("{0:?} is unknown or already freed")]
    UnknownAllocation(AllocationId),
    #[error("write of {len} bytes at offset {offset} overruns {name:?} ({size} bytes)")]
    WriteOutOfBounds {
        name: String,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("device allocation of {name:?} failed")]
    Backend {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A device read that does not land entirely inside one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read of {size} bytes at {address:#x} is outside every live allocation")]
pub struct MemoryFault {
    pub address: DeviceAddress,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Fault(#[from] MemoryFault),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error("mesh {mesh} submesh {submesh} has unknown index width flag {flag}")]
    UnknownIndexWidth { mesh: u32, submesh: u32, flag: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_errors_name_the_offending_record() {
        let err = RangeError::IndexOutOfRange {
            mesh: 1,
            submesh: 2,
            position: 5,
            index: 100,
            vertex_count: 100,
        };
        assert_eq!(
            err.to_string(),
            "mesh 1 submesh 2 index 5 is 100 but the mesh has 100 vertices"
        );

        let err: BuildError = RangeError::MeshIndexOutOfRange {
            instance: 4,
            mesh_index: 2,
            mesh_count: 2,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "instance 4 references mesh 2 but the scene has 2 meshes"
        );
    }

    #[test]
    fn drift_lists_every_mismatch() {
        let err = LayoutDriftError {
            mismatches: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "device layout drift: a; b");
    }

    #[test]
    fn fault_formats_address_in_hex() {
        let fault = MemoryFault {
            address: 0x1000,
            size: 8,
        };
        assert_eq!(
            fault.to_string(),
            "read of 8 bytes at 0x1000 is outside every live allocation"
        );
    }
}
