//! The host-side input model: what the caller hands to the builder.
//!
//! Nothing here knows about device addresses. Descriptions are plain owned
//! data and can be built from a loader, a procedural generator or a test.

use crate::error::RangeError;
use half::f16;
use shared_structs::{
    GenericVertexAttributes, IndexWidth, ResourceHandle, TextureSlot, ENVIRONMENT_TEXTURE_COUNT,
    MATERIAL_TEXTURE_COUNT, NULL_RESOURCE,
};
use std::num::NonZeroU64;
use ultraviolet::{Mat4, Vec2, Vec3};

/// A bindless texture handle. Never zero, so "no texture" is spelled `None`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(NonZeroU64);

impl TextureHandle {
    pub fn new(raw: ResourceHandle) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub const fn from_non_zero(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> ResourceHandle {
        self.0.get()
    }
}

fn encode_handle(handle: Option<TextureHandle>) -> ResourceHandle {
    handle.map_or(NULL_RESOURCE, TextureHandle::get)
}

/// The material textures of one submesh, indexed by `TextureSlot`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterialSet {
    textures: [Option<TextureHandle>; MATERIAL_TEXTURE_COUNT],
}

impl MaterialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills material slots in slot order, the way a loader yields texture
    /// channels. Supplying more than the material slot count is an error.
    pub fn from_ordered(handles: &[Option<TextureHandle>]) -> Result<Self, RangeError> {
        if handles.len() > MATERIAL_TEXTURE_COUNT {
            return Err(RangeError::TooManyMaterials {
                count: handles.len(),
                max: MATERIAL_TEXTURE_COUNT,
            });
        }

        let mut set = Self::new();
        set.textures[..handles.len()].copy_from_slice(handles);
        Ok(set)
    }

    pub fn set(
        &mut self,
        slot: TextureSlot,
        handle: Option<TextureHandle>,
    ) -> Result<(), RangeError> {
        let index = slot
            .material_index()
            .ok_or(RangeError::NotAMaterialSlot { slot })?;
        self.textures[index] = handle;
        Ok(())
    }

    pub fn with(mut self, slot: TextureSlot, handle: TextureHandle) -> Result<Self, RangeError> {
        self.set(slot, Some(handle))?;
        Ok(self)
    }

    pub fn get(&self, slot: TextureSlot) -> Option<TextureHandle> {
        slot.material_index().and_then(|index| self.textures[index])
    }

    pub fn populated(&self) -> usize {
        self.handles().count()
    }

    pub fn handles(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.textures.iter().flatten().copied()
    }

    pub fn encode(&self) -> [ResourceHandle; MATERIAL_TEXTURE_COUNT] {
        self.textures.map(encode_handle)
    }
}

/// A submesh index array in the width it will have on the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indices {
    Narrow(Vec<u16>),
    Wide(Vec<u32>),
}

impl Indices {
    /// Picks 16-bit storage when every index fits.
    pub fn compact(indices: Vec<u32>) -> Self {
        if indices.iter().all(|&index| index <= u16::MAX as u32) {
            Self::Narrow(indices.into_iter().map(|index| index as u16).collect())
        } else {
            Self::Wide(indices)
        }
    }

    pub fn width(&self) -> IndexWidth {
        match self {
            Self::Narrow(_) => IndexWidth::Narrow,
            Self::Wide(_) => IndexWidth::Wide,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Narrow(indices) => indices.len(),
            Self::Wide(indices) => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, position: usize) -> Option<u32> {
        match self {
            Self::Narrow(indices) => indices.get(position).map(|&index| index as u32),
            Self::Wide(indices) => indices.get(position).copied(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            Self::Narrow(indices) => Box::new(indices.iter().map(|&index| index as u32)),
            Self::Wide(indices) => Box::new(indices.iter().copied()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Narrow(indices) => bytemuck::cast_slice(indices),
            Self::Wide(indices) => bytemuck::cast_slice(indices),
        }
    }
}

/// Full-precision vertex attributes, narrowed to half floats on encode.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct VertexGenerics {
    pub texcoord: Vec2,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl VertexGenerics {
    pub fn encode(&self) -> GenericVertexAttributes {
        GenericVertexAttributes {
            texcoord: [self.texcoord.x, self.texcoord.y],
            normal: half3(self.normal),
            tangent: half3(self.tangent),
            bitangent: half3(self.bitangent),
        }
    }
}

// The fourth lane is padding and stays zero.
fn half3(vector: Vec3) -> [u16; 4] {
    [
        f16::from_f32(vector.x).to_bits(),
        f16::from_f32(vector.y).to_bits(),
        f16::from_f32(vector.z).to_bits(),
        0,
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmeshDescription {
    pub indices: Indices,
    pub materials: MaterialSet,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshDescription {
    pub name: String,
    pub positions: Vec<Vec3>,
    pub generics: Vec<VertexGenerics>,
    pub submeshes: Vec<SubmeshDescription>,
}

impl MeshDescription {
    pub fn triangle_count(&self) -> usize {
        self.submeshes
            .iter()
            .map(|submesh| submesh.indices.len() / 3)
            .sum()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InstanceDescription {
    pub mesh_index: u32,
    pub transform: Mat4,
}

impl InstanceDescription {
    /// A mesh placed at `position` and turned `rotation` radians about +Y.
    pub fn placed(mesh_index: u32, position: Vec3, rotation: f32) -> Self {
        Self {
            mesh_index,
            transform: Mat4::from_translation(position) * Mat4::from_rotation_y(rotation),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneDescription {
    pub meshes: Vec<MeshDescription>,
    pub instances: Vec<InstanceDescription>,
    environment: [Option<TextureHandle>; ENVIRONMENT_TEXTURE_COUNT],
}

impl SceneDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index instances use to reference the mesh.
    pub fn add_mesh(&mut self, mesh: MeshDescription) -> u32 {
        self.meshes.push(mesh);
        (self.meshes.len() - 1) as u32
    }

    pub fn add_instance(&mut self, instance: InstanceDescription) {
        self.instances.push(instance);
    }

    pub fn set_environment(
        &mut self,
        slot: TextureSlot,
        handle: Option<TextureHandle>,
    ) -> Result<(), RangeError> {
        let index = slot
            .environment_index()
            .ok_or(RangeError::NotAnEnvironmentSlot { slot })?;
        self.environment[index] = handle;
        Ok(())
    }

    pub fn environment(&self, slot: TextureSlot) -> Option<TextureHandle> {
        slot.environment_index()
            .and_then(|index| self.environment[index])
    }

    pub fn encode_environment(&self) -> [ResourceHandle; ENVIRONMENT_TEXTURE_COUNT] {
        self.environment.map(encode_handle)
    }

    /// Every distinct texture the scene references, materials and environment.
    pub fn textures(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.meshes
            .iter()
            .flat_map(|mesh| mesh.submeshes.iter())
            .flat_map(|submesh| submesh.materials.handles())
            .chain(self.environment.iter().flatten().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(raw: u64) -> TextureHandle {
        TextureHandle::new(raw).unwrap()
    }

    #[test]
    fn zero_is_not_a_handle() {
        assert_eq!(TextureHandle::new(0), None);
        assert_eq!(handle(42).get(), 42);
    }

    #[test]
    fn material_set_fills_in_slot_order() {
        let set = MaterialSet::from_ordered(&[Some(handle(1)), None, Some(handle(3))]).unwrap();
        assert_eq!(set.encode(), [1, 0, 3, 0, 0]);
        assert_eq!(set.populated(), 2);
        assert_eq!(set.get(TextureSlot::Roughness), Some(handle(3)));
    }

    #[test]
    fn material_set_rejects_overflow_and_environment_slots() {
        let six = [Some(handle(1)); 6];
        assert_eq!(
            MaterialSet::from_ordered(&six),
            Err(RangeError::TooManyMaterials { count: 6, max: 5 })
        );
        assert_eq!(
            MaterialSet::new().with(TextureSlot::SkyDome, handle(9)),
            Err(RangeError::NotAMaterialSlot {
                slot: TextureSlot::SkyDome
            })
        );
    }

    #[test]
    fn empty_material_set_encodes_all_null() {
        assert_eq!(MaterialSet::new().encode(), [NULL_RESOURCE; MATERIAL_TEXTURE_COUNT]);
    }

    #[test]
    fn compact_indices_pick_the_narrowest_width() {
        let narrow = Indices::compact(vec![0, 1, 65535]);
        assert_eq!(narrow.width(), IndexWidth::Narrow);
        assert_eq!(narrow.as_bytes().len(), 6);

        let wide = Indices::compact(vec![0, 1, 65536]);
        assert_eq!(wide.width(), IndexWidth::Wide);
        assert_eq!(wide.get(2), Some(65536));
        assert_eq!(wide.iter().collect::<Vec<_>>(), [0, 1, 65536]);
    }

    #[test]
    fn generics_narrow_to_half_floats() {
        let encoded = VertexGenerics {
            texcoord: Vec2::new(0.25, 20.0),
            normal: Vec3::new(0.0, 1.0, 0.0),
            tangent: Vec3::new(1.0, 0.0, 0.0),
            bitangent: Vec3::new(0.0, 0.0, -1.0),
        }
        .encode();

        assert_eq!(encoded.texcoord, [0.25, 20.0]);
        assert_eq!(encoded.normal, [0, 0x3c00, 0, 0]);
        assert_eq!(encoded.tangent, [0x3c00, 0, 0, 0]);
        assert_eq!(encoded.bitangent, [0, 0, 0xbc00, 0]);
    }

    #[test]
    fn environment_lives_on_the_scene() {
        let mut scene = SceneDescription::new();
        scene
            .set_environment(TextureSlot::Reflections, Some(handle(7)))
            .unwrap();
        assert_eq!(scene.encode_environment(), [0, 7, 0]);
        assert!(scene
            .set_environment(TextureSlot::BaseColor, Some(handle(1)))
            .is_err());
        assert_eq!(scene.textures().collect::<Vec<_>>(), [handle(7)]);
    }

    #[test]
    fn placement_translates_after_rotating() {
        let instance = InstanceDescription::placed(3, Vec3::new(1.0, 2.0, 3.0), 0.0);
        assert_eq!(instance.mesh_index, 3);
        assert_eq!(instance.transform.cols[3].x, 1.0);
        assert_eq!(instance.transform.cols[3].z, 3.0);
    }
}
