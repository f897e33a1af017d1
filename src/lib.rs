pub mod builder;
pub mod demo;
pub mod description;
pub mod error;
pub mod header;
pub mod memory;
pub mod plan;
pub mod uniforms;
pub mod validate;
pub mod verify;
pub mod vulkan;

pub use builder::{build_scene, build_verified_scene, BuildConfig, BuiltScene, SceneStats};
pub use description::{
    Indices, InstanceDescription, MaterialSet, MeshDescription, SceneDescription,
    SubmeshDescription, TextureHandle, VertexGenerics,
};
pub use error::{
    AllocationError, BuildError, LayoutDriftError, MemoryFault, RangeError, VerifyError,
};
pub use header::{DeviceLayoutManifest, HeaderParseError};
pub use memory::{AllocationId, DeviceAllocator, DeviceSlice, HostArena};
pub use plan::Placement;
pub use verify::{check_layouts, verify_scene, TraversalReport};

pub use shared_structs;
