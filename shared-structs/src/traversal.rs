//! The device-side walk from an intersection back to material and vertex data.
//!
//! Every hop is plain address arithmetic on the record arrays. Nothing here
//! checks counts: bounds safety is established when the host builds the
//! scene. A host implementation of [`DeviceMemory`] can still refuse reads
//! outside its allocations, which is how the builder's output is verified.

use crate::{
    DeviceAddress, GenericVertexAttributes, IndexWidth, InstanceData, MeshData, ResourceHandle,
    SceneData, SubmeshData, SubmeshKeypath, MATERIAL_TEXTURE_COUNT, VERTICES_PER_PRIMITIVE,
};
use bytemuck::Pod;
use core::mem::size_of;

/// Read access to device-visible memory by address.
pub trait DeviceMemory {
    type Error;

    fn load<T: Pod>(&self, address: DeviceAddress) -> Result<T, Self::Error>;

    /// The error for an element whose address does not fit in 64 bits.
    fn address_overflow(&self, base: DeviceAddress, size: u64) -> Self::Error;

    fn load_element<T: Pod>(&self, base: DeviceAddress, index: u32) -> Result<T, Self::Error> {
        match element_address::<T>(base, index) {
            Some(address) => self.load(address),
            None => Err(self.address_overflow(base, size_of::<T>() as u64)),
        }
    }
}

/// Address of element `index` of an array at `base`, or `None` past the end
/// of the address space.
pub const fn element_address<T>(base: DeviceAddress, index: u32) -> Option<DeviceAddress> {
    match (index as u64).checked_mul(size_of::<T>() as u64) {
        Some(offset) => base.checked_add(offset),
        None => None,
    }
}

/// Everything a closest-hit program needs about one triangle.
#[cfg_attr(not(target_arch = "spirv"), derive(Debug, PartialEq))]
#[derive(Copy, Clone)]
pub struct ResolvedHit {
    pub mesh_index: u32,
    pub transform: crate::Float4x4,
    pub materials: [ResourceHandle; MATERIAL_TEXTURE_COUNT],
    pub vertices: [u32; 3],
    pub positions: [[f32; 3]; 3],
    pub generics: [GenericVertexAttributes; 3],
}

pub struct SceneWalker<'a, M: ?Sized> {
    memory: &'a M,
    scene: SceneData,
}

impl<'a, M: DeviceMemory + ?Sized> SceneWalker<'a, M> {
    pub fn new(memory: &'a M, scene_address: DeviceAddress) -> Result<Self, M::Error> {
        Ok(Self {
            memory,
            scene: memory.load(scene_address)?,
        })
    }

    pub fn scene(&self) -> &SceneData {
        &self.scene
    }

    pub fn instance(&self, instance_index: u32) -> Result<InstanceData, M::Error> {
        self.memory
            .load_element(self.scene.instances, instance_index)
    }

    pub fn mesh(&self, mesh_index: u32) -> Result<MeshData, M::Error> {
        self.memory.load_element(self.scene.meshes, mesh_index)
    }

    pub fn submesh(&self, mesh: &MeshData, submesh_index: u32) -> Result<SubmeshData, M::Error> {
        self.memory.load_element(mesh.submeshes, submesh_index)
    }

    pub fn position(&self, mesh: &MeshData, vertex: u32) -> Result<[f32; 3], M::Error> {
        self.memory.load_element(mesh.positions, vertex)
    }

    pub fn generics(
        &self,
        mesh: &MeshData,
        vertex: u32,
    ) -> Result<GenericVertexAttributes, M::Error> {
        self.memory.load_element(mesh.generics, vertex)
    }

    /// Vertex indices of one primitive. The width flag is inspected once and
    /// the whole primitive is read with the matching element type.
    pub fn primitive_indices(
        &self,
        submesh: &SubmeshData,
        primitive_index: u32,
    ) -> Result<[u32; 3], M::Error> {
        let first = primitive_index * VERTICES_PER_PRIMITIVE;

        if submesh.index_width == IndexWidth::Narrow as u32 {
            let indices: [u16; 3] = self.read_primitive(submesh.indices, first)?;
            Ok([indices[0] as u32, indices[1] as u32, indices[2] as u32])
        } else {
            self.read_primitive(submesh.indices, first)
        }
    }

    fn read_primitive<T: Pod>(&self, base: DeviceAddress, first: u32) -> Result<[T; 3], M::Error> {
        Ok([
            self.memory.load_element(base, first)?,
            self.memory.load_element(base, first + 1)?,
            self.memory.load_element(base, first + 2)?,
        ])
    }

    /// The full walk: scene → instance → mesh → submesh → materials and
    /// vertex attributes.
    pub fn resolve(
        &self,
        keypath: SubmeshKeypath,
        primitive_index: u32,
    ) -> Result<ResolvedHit, M::Error> {
        let instance = self.instance(keypath.instance_id)?;
        let mesh = self.mesh(instance.mesh_index)?;
        let submesh = self.submesh(&mesh, keypath.submesh_id)?;
        let vertices = self.primitive_indices(&submesh, primitive_index)?;

        Ok(ResolvedHit {
            mesh_index: instance.mesh_index,
            transform: instance.transform,
            materials: submesh.materials,
            vertices,
            positions: [
                self.position(&mesh, vertices[0])?,
                self.position(&mesh, vertices[1])?,
                self.position(&mesh, vertices[2])?,
            ],
            generics: [
                self.generics(&mesh, vertices[0])?,
                self.generics(&mesh, vertices[1])?,
                self.generics(&mesh, vertices[2])?,
            ],
        })
    }
}
