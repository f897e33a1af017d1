//! The layout schema: one table per record, listing every field with its slot,
//! element type, shape and byte offset.
//!
//! Offsets come from the Rust records with `offset_of!`, element types and
//! record sizes are declared here independently. The const assertions at the
//! bottom fail the build if the two ever disagree, and the generated header is
//! produced from these same tables.

use crate::slots::{
    CameraSlot, GenericsSlot, InstanceSlot, KeypathSlot, LightSlot, MeshSlot, SceneSlot,
    SubmeshSlot,
};
use crate::{
    CameraData, GenericVertexAttributes, InstanceData, LightData, MeshData, SceneData,
    SubmeshData, SubmeshKeypath, ENVIRONMENT_TEXTURE_COUNT, MATERIAL_TEXTURE_COUNT,
};
use core::mem::{align_of, offset_of, size_of};

#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum ScalarType {
    Uint16,
    Uint32,
    Uint64,
    Float,
}

impl ScalarType {
    pub const fn size(self) -> usize {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 | Self::Float => 4,
            Self::Uint64 => 8,
        }
    }

    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Uint16 => "uint16_t",
            Self::Uint32 => "uint32_t",
            Self::Uint64 => "uint64_t",
            Self::Float => "float",
        }
    }
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
#[derive(Copy, Clone)]
pub struct FieldLayout {
    pub name: &'static str,
    /// `None` for padding, which is never addressed.
    pub slot: Option<u32>,
    pub ty: ScalarType,
    /// Array dimensions, outermost first. Empty for a scalar.
    pub dims: &'static [usize],
    pub offset: usize,
}

impl FieldLayout {
    const fn new(
        name: &'static str,
        slot: u32,
        ty: ScalarType,
        dims: &'static [usize],
        offset: usize,
    ) -> Self {
        Self {
            name,
            slot: Some(slot),
            ty,
            dims,
            offset,
        }
    }

    const fn padding(ty: ScalarType, dims: &'static [usize], offset: usize) -> Self {
        Self {
            name: "_padding",
            slot: None,
            ty,
            dims,
            offset,
        }
    }

    pub const fn element_count(&self) -> usize {
        let mut count = 1;
        let mut i = 0;
        while i < self.dims.len() {
            count *= self.dims[i];
            i += 1;
        }
        count
    }

    pub const fn size(&self) -> usize {
        self.ty.size() * self.element_count()
    }

    pub const fn is_padding(&self) -> bool {
        self.slot.is_none()
    }
}

#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
#[derive(Copy, Clone)]
pub struct RecordLayout {
    pub name: &'static str,
    /// Name of the slot enumeration scoping this record's fields.
    pub slot_enum: &'static str,
    pub size: usize,
    /// Alignment the device requires for an array of these records.
    pub align: usize,
    pub fields: &'static [FieldLayout],
    slot_count: usize,
}

impl RecordLayout {
    /// Fields must tile the record with no implicit padding, addressable
    /// fields must carry consecutive slots from zero in offset order, and the
    /// size must be a multiple of the device alignment.
    pub const fn is_consistent(&self) -> bool {
        let mut cursor = 0;
        let mut next_slot = 0;
        let mut i = 0;

        while i < self.fields.len() {
            let field = &self.fields[i];

            if field.offset != cursor {
                return false;
            }
            cursor += field.size();

            if let Some(slot) = field.slot {
                if slot != next_slot {
                    return false;
                }
                next_slot += 1;
            }

            i += 1;
        }

        cursor == self.size && next_slot as usize == self.slot_count && self.size % self.align == 0
    }

    pub fn field(&self, slot: u32) -> Option<&FieldLayout> {
        self.fields.iter().find(|field| field.slot == Some(slot))
    }

    pub fn addressable_fields(&self) -> impl Iterator<Item = &FieldLayout> {
        self.fields.iter().filter(|field| !field.is_padding())
    }
}

use ScalarType::{Float, Uint16, Uint32, Uint64};

pub const GENERICS_LAYOUT: RecordLayout = RecordLayout {
    name: "GenericVertexAttributes",
    slot_enum: "GenericsSlot",
    size: 32,
    align: 8,
    slot_count: GenericsSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "texcoord",
            GenericsSlot::Texcoord as u32,
            Float,
            &[2],
            offset_of!(GenericVertexAttributes, texcoord),
        ),
        FieldLayout::new(
            "normal",
            GenericsSlot::Normal as u32,
            Uint16,
            &[4],
            offset_of!(GenericVertexAttributes, normal),
        ),
        FieldLayout::new(
            "tangent",
            GenericsSlot::Tangent as u32,
            Uint16,
            &[4],
            offset_of!(GenericVertexAttributes, tangent),
        ),
        FieldLayout::new(
            "bitangent",
            GenericsSlot::Bitangent as u32,
            Uint16,
            &[4],
            offset_of!(GenericVertexAttributes, bitangent),
        ),
    ],
};

pub const SUBMESH_LAYOUT: RecordLayout = RecordLayout {
    name: "SubmeshData",
    slot_enum: "SubmeshSlot",
    size: 56,
    align: 8,
    slot_count: SubmeshSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "index_width",
            SubmeshSlot::IndexWidth as u32,
            Uint32,
            &[],
            offset_of!(SubmeshData, index_width),
        ),
        FieldLayout::new(
            "index_count",
            SubmeshSlot::IndexCount as u32,
            Uint32,
            &[],
            offset_of!(SubmeshData, index_count),
        ),
        FieldLayout::new(
            "indices",
            SubmeshSlot::Indices as u32,
            Uint64,
            &[],
            offset_of!(SubmeshData, indices),
        ),
        FieldLayout::new(
            "materials",
            SubmeshSlot::Materials as u32,
            Uint64,
            &[MATERIAL_TEXTURE_COUNT],
            offset_of!(SubmeshData, materials),
        ),
    ],
};

pub const MESH_LAYOUT: RecordLayout = RecordLayout {
    name: "MeshData",
    slot_enum: "MeshSlot",
    size: 32,
    align: 8,
    slot_count: MeshSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "positions",
            MeshSlot::Positions as u32,
            Uint64,
            &[],
            offset_of!(MeshData, positions),
        ),
        FieldLayout::new(
            "generics",
            MeshSlot::Generics as u32,
            Uint64,
            &[],
            offset_of!(MeshData, generics),
        ),
        FieldLayout::new(
            "submeshes",
            MeshSlot::Submeshes as u32,
            Uint64,
            &[],
            offset_of!(MeshData, submeshes),
        ),
        FieldLayout::new(
            "vertex_count",
            MeshSlot::VertexCount as u32,
            Uint32,
            &[],
            offset_of!(MeshData, vertex_count),
        ),
        FieldLayout::new(
            "submesh_count",
            MeshSlot::SubmeshCount as u32,
            Uint32,
            &[],
            offset_of!(MeshData, submesh_count),
        ),
    ],
};

pub const INSTANCE_LAYOUT: RecordLayout = RecordLayout {
    name: "InstanceData",
    slot_enum: "InstanceSlot",
    size: 80,
    align: 16,
    slot_count: InstanceSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "mesh_index",
            InstanceSlot::MeshIndex as u32,
            Uint32,
            &[],
            offset_of!(InstanceData, mesh_index),
        ),
        FieldLayout::padding(Uint32, &[3], offset_of!(InstanceData, _padding)),
        FieldLayout::new(
            "transform",
            InstanceSlot::Transform as u32,
            Float,
            &[4, 4],
            offset_of!(InstanceData, transform),
        ),
    ],
};

pub const SCENE_LAYOUT: RecordLayout = RecordLayout {
    name: "SceneData",
    slot_enum: "SceneSlot",
    size: 48,
    align: 8,
    slot_count: SceneSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "instances",
            SceneSlot::Instances as u32,
            Uint64,
            &[],
            offset_of!(SceneData, instances),
        ),
        FieldLayout::new(
            "meshes",
            SceneSlot::Meshes as u32,
            Uint64,
            &[],
            offset_of!(SceneData, meshes),
        ),
        FieldLayout::new(
            "instance_count",
            SceneSlot::InstanceCount as u32,
            Uint32,
            &[],
            offset_of!(SceneData, instance_count),
        ),
        FieldLayout::new(
            "mesh_count",
            SceneSlot::MeshCount as u32,
            Uint32,
            &[],
            offset_of!(SceneData, mesh_count),
        ),
        FieldLayout::new(
            "environment",
            SceneSlot::Environment as u32,
            Uint64,
            &[ENVIRONMENT_TEXTURE_COUNT],
            offset_of!(SceneData, environment),
        ),
    ],
};

pub const CAMERA_LAYOUT: RecordLayout = RecordLayout {
    name: "CameraData",
    slot_enum: "CameraSlot",
    size: 160,
    align: 16,
    slot_count: CameraSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "projection",
            CameraSlot::Projection as u32,
            Float,
            &[4, 4],
            offset_of!(CameraData, projection),
        ),
        FieldLayout::new(
            "view",
            CameraSlot::View as u32,
            Float,
            &[4, 4],
            offset_of!(CameraData, view),
        ),
        FieldLayout::new(
            "position",
            CameraSlot::Position as u32,
            Float,
            &[3],
            offset_of!(CameraData, position),
        ),
        FieldLayout::new(
            "metallic_bias",
            CameraSlot::MetallicBias as u32,
            Float,
            &[],
            offset_of!(CameraData, metallic_bias),
        ),
        FieldLayout::new(
            "roughness_bias",
            CameraSlot::RoughnessBias as u32,
            Float,
            &[],
            offset_of!(CameraData, roughness_bias),
        ),
        FieldLayout::padding(Float, &[3], offset_of!(CameraData, _padding)),
    ],
};

pub const LIGHT_LAYOUT: RecordLayout = RecordLayout {
    name: "LightData",
    slot_enum: "LightSlot",
    size: 16,
    align: 16,
    slot_count: LightSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "inverse_direction",
            LightSlot::InverseDirection as u32,
            Float,
            &[3],
            offset_of!(LightData, inverse_direction),
        ),
        FieldLayout::new(
            "intensity",
            LightSlot::Intensity as u32,
            Float,
            &[],
            offset_of!(LightData, intensity),
        ),
    ],
};

pub const KEYPATH_LAYOUT: RecordLayout = RecordLayout {
    name: "SubmeshKeypath",
    slot_enum: "KeypathSlot",
    size: 8,
    align: 4,
    slot_count: KeypathSlot::ALL.len(),
    fields: &[
        FieldLayout::new(
            "instance_id",
            KeypathSlot::InstanceId as u32,
            Uint32,
            &[],
            offset_of!(SubmeshKeypath, instance_id),
        ),
        FieldLayout::new(
            "submesh_id",
            KeypathSlot::SubmeshId as u32,
            Uint32,
            &[],
            offset_of!(SubmeshKeypath, submesh_id),
        ),
    ],
};

/// Every record in the contract, leaf-first.
pub const RECORDS: &[RecordLayout] = &[
    GENERICS_LAYOUT,
    SUBMESH_LAYOUT,
    MESH_LAYOUT,
    INSTANCE_LAYOUT,
    SCENE_LAYOUT,
    CAMERA_LAYOUT,
    LIGHT_LAYOUT,
    KEYPATH_LAYOUT,
];

/// Positions are tightly packed `float[3]`.
pub const POSITION_STRIDE: usize = 12;

macro_rules! assert_record {
    ($ty:ty, $layout:expr) => {
        const _: () = assert!(size_of::<$ty>() == $layout.size);
        const _: () = assert!($layout.align % align_of::<$ty>() == 0);
        const _: () = assert!($layout.is_consistent());
    };
}

assert_record!(GenericVertexAttributes, GENERICS_LAYOUT);
assert_record!(SubmeshData, SUBMESH_LAYOUT);
assert_record!(MeshData, MESH_LAYOUT);
assert_record!(InstanceData, INSTANCE_LAYOUT);
assert_record!(SceneData, SCENE_LAYOUT);
assert_record!(CameraData, CAMERA_LAYOUT);
assert_record!(LightData, LIGHT_LAYOUT);
assert_record!(SubmeshKeypath, KEYPATH_LAYOUT);

const _: () = assert!(size_of::<[f32; 3]>() == POSITION_STRIDE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_record_is_consistent() {
        for record in RECORDS {
            assert!(record.is_consistent(), "{} layout is inconsistent", record.name);
        }
    }

    #[test]
    fn material_array_has_fixed_count() {
        let materials = SUBMESH_LAYOUT.field(SubmeshSlot::Materials as u32).unwrap();
        assert_eq!(materials.element_count(), MATERIAL_TEXTURE_COUNT);
        assert_eq!(materials.offset, 16);
        assert_eq!(materials.size(), 40);
    }

    #[test]
    fn instance_transform_is_sixteen_byte_aligned() {
        let transform = INSTANCE_LAYOUT.field(InstanceSlot::Transform as u32).unwrap();
        assert_eq!(transform.offset % 16, 0);
        assert_eq!(transform.offset, InstanceData::TRANSFORM_OFFSET);
        assert_eq!(INSTANCE_LAYOUT.addressable_fields().count(), 2);
    }

    #[test]
    fn generic_attribute_offsets_match_vertex_descriptor() {
        let offsets: std::vec::Vec<usize> =
            GENERICS_LAYOUT.addressable_fields().map(|field| field.offset).collect();
        assert_eq!(offsets, [0, 8, 16, 24]);
    }

    #[test]
    fn shifted_field_breaks_consistency() {
        const BROKEN: RecordLayout = RecordLayout {
            name: "Broken",
            slot_enum: "KeypathSlot",
            size: 8,
            align: 4,
            slot_count: 2,
            fields: &[
                FieldLayout::new("instance_id", 0, Uint32, &[], 0),
                FieldLayout::new("submesh_id", 1, Uint32, &[], 2),
            ],
        };
        assert!(!BROKEN.is_consistent());
    }

    #[test]
    fn out_of_order_slots_break_consistency() {
        const SWAPPED: RecordLayout = RecordLayout {
            name: "Swapped",
            slot_enum: "KeypathSlot",
            size: 8,
            align: 4,
            slot_count: 2,
            fields: &[
                FieldLayout::new("instance_id", 1, Uint32, &[], 0),
                FieldLayout::new("submesh_id", 0, Uint32, &[], 4),
            ],
        };
        assert!(!SWAPPED.is_consistent());
    }
}
