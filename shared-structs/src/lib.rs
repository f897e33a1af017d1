#![no_std]

#[cfg(test)]
extern crate std;

pub mod layout;
pub mod slots;
pub mod traversal;

use bytemuck::{Pod, Zeroable};

pub use slots::{
    BufferIndex, IndexWidth, TextureSlot, ENVIRONMENT_TEXTURE_COUNT, MATERIAL_TEXTURE_COUNT,
};

/// A raw GPU virtual address. Zero is the null address.
pub type DeviceAddress = u64;

/// An opaque bindless resource handle (a texture descriptor index or resource
/// id). Zero means "no resource".
pub type ResourceHandle = u64;

pub const NULL_ADDRESS: DeviceAddress = 0;
pub const NULL_RESOURCE: ResourceHandle = 0;

pub const VERTICES_PER_PRIMITIVE: u32 = 3;

/// Column-major 4x4 matrix, 16-byte aligned on the device.
pub type Float4x4 = [[f32; 4]; 4];

pub const IDENTITY: Float4x4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Per-vertex attributes other than position. Normal, tangent and bitangent
/// hold IEEE binary16 bit patterns.
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct GenericVertexAttributes {
    pub texcoord: [f32; 2],
    pub normal: [u16; 4],
    pub tangent: [u16; 4],
    pub bitangent: [u16; 4],
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct SubmeshData {
    // The container mesh owns the vertex arrays, the submesh only indexes into them.
    pub index_width: u32,
    pub index_count: u32,
    pub indices: DeviceAddress,
    pub materials: [ResourceHandle; MATERIAL_TEXTURE_COUNT],
}

impl SubmeshData {
    pub fn index_width(&self) -> Option<IndexWidth> {
        IndexWidth::from_id(self.index_width)
    }

    pub fn primitive_count(&self) -> u32 {
        self.index_count / VERTICES_PER_PRIMITIVE
    }

    pub fn material(&self, slot: TextureSlot) -> Option<ResourceHandle> {
        slot.material_index().map(|index| self.materials[index])
    }
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct MeshData {
    pub positions: DeviceAddress,
    pub generics: DeviceAddress,
    pub submeshes: DeviceAddress,
    pub vertex_count: u32,
    pub submesh_count: u32,
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceData {
    pub mesh_index: u32,
    pub _padding: [u32; 3],
    pub transform: Float4x4,
}

impl InstanceData {
    /// Byte offset of `transform`, for rewriting a placement in place.
    pub const TRANSFORM_OFFSET: usize = core::mem::offset_of!(InstanceData, transform);

    pub fn new(mesh_index: u32, transform: Float4x4) -> Self {
        Self {
            mesh_index,
            _padding: [0; 3],
            transform,
        }
    }
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct SceneData {
    pub instances: DeviceAddress,
    pub meshes: DeviceAddress,
    pub instance_count: u32,
    pub mesh_count: u32,
    pub environment: [ResourceHandle; ENVIRONMENT_TEXTURE_COUNT],
}

impl SceneData {
    pub fn environment(&self, slot: TextureSlot) -> Option<ResourceHandle> {
        slot.environment_index().map(|index| self.environment[index])
    }
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct CameraData {
    pub projection: Float4x4,
    pub view: Float4x4,
    pub position: [f32; 3],
    pub metallic_bias: f32,
    pub roughness_bias: f32,
    pub _padding: [f32; 3],
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct LightData {
    pub inverse_direction: [f32; 3],
    pub intensity: f32,
}

/// Names one submesh of one instance. Written by the raster path and used as
/// the entry point of a device traversal.
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq, Eq, Hash))]
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct SubmeshKeypath {
    pub instance_id: u32,
    pub submesh_id: u32,
}
