//! The slot registry: every addressable field and binding point, numbered once.
//!
//! Each record type gets its own enumeration, numbered from zero in field
//! order, so a slot id is only meaningful together with the record it belongs
//! to. The numbers here are the binary contract with device code and are
//! exported verbatim into the generated header.

/// A named enumeration as it appears in the generated header.
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
#[derive(Copy, Clone)]
pub struct SlotEnum {
    pub name: &'static str,
    pub entries: &'static [(&'static str, u32)],
}

impl SlotEnum {
    pub fn value_of(&self, entry: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(name, _)| *name == entry)
            .map(|&(_, value)| value)
    }
}

macro_rules! slot_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[cfg_attr(not(target_arch = "spirv"), derive(Debug, Hash))]
        #[derive(Copy, Clone, PartialEq, Eq)]
        #[repr(u32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub const REGISTRY: SlotEnum = SlotEnum {
                name: stringify!($name),
                entries: &[$((stringify!($variant), Self::$variant as u32)),+],
            };

            pub const fn id(self) -> u32 {
                self as u32
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),+
                }
            }

            pub fn from_id(id: u32) -> Option<Self> {
                match id {
                    $(value if value == Self::$variant as u32 => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

slot_enum! {
    /// Texture channels. The first `MATERIAL_TEXTURE_COUNT` are per-submesh
    /// material textures, the rest are scene-wide environment textures.
    pub enum TextureSlot {
        BaseColor = 0,
        Metallic = 1,
        Roughness = 2,
        Normal = 3,
        AmbientOcclusion = 4,
        Irradiance = 5,
        Reflections = 6,
        SkyDome = 7,
    }
}

pub const MATERIAL_TEXTURE_COUNT: usize = TextureSlot::AmbientOcclusion as usize + 1;
pub const ENVIRONMENT_TEXTURE_COUNT: usize =
    TextureSlot::SkyDome as usize + 1 - MATERIAL_TEXTURE_COUNT;

impl TextureSlot {
    pub const MATERIALS: [Self; MATERIAL_TEXTURE_COUNT] = [
        Self::BaseColor,
        Self::Metallic,
        Self::Roughness,
        Self::Normal,
        Self::AmbientOcclusion,
    ];

    pub const ENVIRONMENT: [Self; ENVIRONMENT_TEXTURE_COUNT] =
        [Self::Irradiance, Self::Reflections, Self::SkyDome];

    pub const fn is_material(self) -> bool {
        (self as usize) < MATERIAL_TEXTURE_COUNT
    }

    /// Position in `SubmeshData::materials`.
    pub const fn material_index(self) -> Option<usize> {
        if self.is_material() {
            Some(self as usize)
        } else {
            None
        }
    }

    /// Position in `SceneData::environment`.
    pub const fn environment_index(self) -> Option<usize> {
        if self.is_material() {
            None
        } else {
            Some(self as usize - MATERIAL_TEXTURE_COUNT)
        }
    }
}

slot_enum! {
    /// Element width of a submesh index array. The raw value of
    /// `SubmeshData::index_width`.
    pub enum IndexWidth {
        Wide = 0,
        Narrow = 1,
    }
}

impl IndexWidth {
    pub const fn element_size(self) -> usize {
        match self {
            Self::Wide => 4,
            Self::Narrow => 2,
        }
    }
}

slot_enum! {
    pub enum GenericsSlot {
        Texcoord = 0,
        Normal = 1,
        Tangent = 2,
        Bitangent = 3,
    }
}

slot_enum! {
    pub enum SubmeshSlot {
        IndexWidth = 0,
        IndexCount = 1,
        Indices = 2,
        Materials = 3,
    }
}

slot_enum! {
    pub enum MeshSlot {
        Positions = 0,
        Generics = 1,
        Submeshes = 2,
        VertexCount = 3,
        SubmeshCount = 4,
    }
}

slot_enum! {
    pub enum InstanceSlot {
        MeshIndex = 0,
        Transform = 1,
    }
}

slot_enum! {
    pub enum SceneSlot {
        Instances = 0,
        Meshes = 1,
        InstanceCount = 2,
        MeshCount = 3,
        Environment = 4,
    }
}

slot_enum! {
    pub enum CameraSlot {
        Projection = 0,
        View = 1,
        Position = 2,
        MetallicBias = 3,
        RoughnessBias = 4,
    }
}

slot_enum! {
    pub enum LightSlot {
        InverseDirection = 0,
        Intensity = 1,
    }
}

slot_enum! {
    pub enum KeypathSlot {
        InstanceId = 0,
        SubmeshId = 1,
    }
}

slot_enum! {
    /// Fixed buffer binding points shared by the raster and ray-tracing paths.
    pub enum BufferIndex {
        MeshPositions = 0,
        MeshGenerics = 1,
        InstanceTransforms = 2,
        CameraData = 3,
        LightData = 4,
        SubmeshKeypath = 5,
        Scene = 11,
    }
}

slot_enum! {
    /// Vertex input locations for the raster path.
    pub enum VertexAttribute {
        Position = 0,
        Normal = 1,
        Texcoord = 2,
        Tangent = 3,
        Bitangent = 4,
    }
}

pub const SLOT_ENUMS: &[SlotEnum] = &[
    TextureSlot::REGISTRY,
    IndexWidth::REGISTRY,
    GenericsSlot::REGISTRY,
    SubmeshSlot::REGISTRY,
    MeshSlot::REGISTRY,
    InstanceSlot::REGISTRY,
    SceneSlot::REGISTRY,
    CameraSlot::REGISTRY,
    LightSlot::REGISTRY,
    KeypathSlot::REGISTRY,
    BufferIndex::REGISTRY,
    VertexAttribute::REGISTRY,
];

/// Scalar constants exported as `#define`s.
pub const CONSTANTS: &[(&str, u32)] = &[
    ("MATERIAL_TEXTURE_COUNT", MATERIAL_TEXTURE_COUNT as u32),
    ("ENVIRONMENT_TEXTURE_COUNT", ENVIRONMENT_TEXTURE_COUNT as u32),
    ("VERTICES_PER_PRIMITIVE", crate::VERTICES_PER_PRIMITIVE),
];
