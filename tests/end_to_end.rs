use bindless_scene::shared_structs::traversal::SceneWalker;
use bindless_scene::shared_structs::{
    BufferIndex, IndexWidth, SubmeshKeypath, TextureSlot, MATERIAL_TEXTURE_COUNT, NULL_RESOURCE,
};
use bindless_scene::{
    build_scene, build_verified_scene, header, verify_scene, AllocationError, BuildConfig,
    BuildError, HostArena, Indices, InstanceDescription, MaterialSet,
    MeshDescription, Placement, RangeError, SceneDescription, SubmeshDescription, TextureHandle,
    VertexGenerics,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ultraviolet::{Mat4, Vec2, Vec3};

fn texture(raw: u64) -> TextureHandle {
    TextureHandle::new(raw).unwrap()
}

fn generics(u: f32) -> VertexGenerics {
    VertexGenerics {
        texcoord: Vec2::new(u, 1.0 - u),
        normal: Vec3::unit_y(),
        tangent: Vec3::unit_x(),
        bitangent: Vec3::unit_z(),
    }
}

fn mesh(name: &str, vertex_count: usize, submeshes: Vec<SubmeshDescription>) -> MeshDescription {
    MeshDescription {
        name: name.to_string(),
        positions: (0..vertex_count)
            .map(|i| Vec3::new(i as f32, (i * 2) as f32, -(i as f32)))
            .collect(),
        generics: (0..vertex_count)
            .map(|i| generics(i as f32 / vertex_count as f32))
            .collect(),
        submeshes,
    }
}

// 4 vertices, one submesh of two triangles, 16-bit indices, 3 of 5 textures.
fn mesh_a() -> MeshDescription {
    let materials = MaterialSet::from_ordered(&[
        Some(texture(1)),
        None,
        Some(texture(2)),
        Some(texture(3)),
        None,
    ])
    .unwrap();

    mesh(
        "a",
        4,
        vec![SubmeshDescription {
            indices: Indices::Narrow(vec![0, 1, 2, 0, 2, 3]),
            materials,
        }],
    )
}

// 100 vertices, three submeshes, 32-bit indices.
fn mesh_b() -> MeshDescription {
    let submeshes = (0..3u32)
        .map(|submesh| {
            let indices = (0..30u32)
                .flat_map(|triangle| {
                    let first = (submesh * 30 + triangle) % 98;
                    [first, first + 1, first + 2]
                })
                .collect();
            SubmeshDescription {
                indices: Indices::Wide(indices),
                materials: MaterialSet::new()
                    .with(TextureSlot::BaseColor, texture(10 + submesh as u64))
                    .unwrap(),
            }
        })
        .collect();

    mesh("b", 100, submeshes)
}

fn reference_scene() -> SceneDescription {
    let mut scene = SceneDescription::new();
    let a = scene.add_mesh(mesh_a());
    let b = scene.add_mesh(mesh_b());

    for (i, mesh_index) in [a, a, b, a, b].into_iter().enumerate() {
        scene.add_instance(InstanceDescription::placed(
            mesh_index,
            Vec3::new(i as f32 * 3.0, 0.0, 0.0),
            i as f32 * 0.5,
        ));
    }
    scene
}

#[test]
fn reference_scene_resolves_every_triangle() {
    let scene = reference_scene();
    let mut arena = HostArena::new();
    let built = build_verified_scene(&scene, &mut arena, &BuildConfig::default()).unwrap();

    assert_eq!(built.mesh_count(), 2);
    assert_eq!(built.instance_count(), 5);

    let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();

    for (instance_id, instance) in scene.instances.iter().enumerate() {
        let mesh = &scene.meshes[instance.mesh_index as usize];

        for (submesh_id, submesh) in mesh.submeshes.iter().enumerate() {
            let keypath = SubmeshKeypath {
                instance_id: instance_id as u32,
                submesh_id: submesh_id as u32,
            };

            for primitive in 0..submesh.indices.len() / 3 {
                let hit = walker.resolve(keypath, primitive as u32).unwrap();

                assert_eq!(hit.mesh_index, instance.mesh_index);
                assert_eq!(hit.materials, submesh.materials.encode());

                for corner in 0..3 {
                    let vertex = submesh.indices.get(primitive * 3 + corner).unwrap();
                    let expected = mesh.positions[vertex as usize];

                    assert_eq!(hit.vertices[corner], vertex);
                    assert_eq!(hit.positions[corner], [expected.x, expected.y, expected.z]);
                    assert_eq!(
                        hit.generics[corner],
                        mesh.generics[vertex as usize].encode()
                    );
                }
            }
        }
    }

    let report = verify_scene(&arena, built.scene_address()).unwrap();
    assert_eq!(report.instances, 5);
    assert_eq!(report.meshes, 2);
    assert_eq!(report.submeshes, 4);
    assert_eq!(report.triangles, 2 + 90);
    assert_eq!(report.populated_materials, 3 + 3);

    built.release(&mut arena).unwrap();
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn thousand_instances_share_one_mesh() {
    let mut scene = SceneDescription::new();
    let a = scene.add_mesh(mesh_a());
    for i in 0..1000 {
        scene.add_instance(InstanceDescription::placed(a, Vec3::new(0.0, i as f32, 0.0), 0.0));
    }

    let mut arena = HostArena::new();
    let built = build_scene(&scene, &mut arena, &BuildConfig::default()).unwrap();
    let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();

    let keypath = |instance_id| SubmeshKeypath {
        instance_id,
        submesh_id: 0,
    };
    let first = walker.resolve(keypath(0), 1).unwrap();

    for instance_id in 1..1000 {
        let hit = walker.resolve(keypath(instance_id), 1).unwrap();
        assert_eq!(hit.transform[3][1], instance_id as f32);
        assert_eq!(hit.positions, first.positions);
        assert_eq!(hit.generics, first.generics);
        assert_eq!(hit.materials, first.materials);
        assert_eq!(hit.vertices, first.vertices);
    }
}

#[test]
fn random_scenes_reject_dangling_mesh_references() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..100 {
        let mesh_count = rng.gen_range(1..5);
        let instance_count = rng.gen_range(1..20);

        let mut scene = SceneDescription::new();
        for _ in 0..mesh_count {
            scene.add_mesh(mesh_a());
        }
        let mut dangling = false;
        for _ in 0..instance_count {
            let mesh_index = rng.gen_range(0..mesh_count + 2);
            dangling |= mesh_index >= mesh_count;
            scene.add_instance(InstanceDescription {
                mesh_index,
                transform: Mat4::identity(),
            });
        }

        let mut arena = HostArena::new();
        match build_scene(&scene, &mut arena, &BuildConfig::default()) {
            Ok(built) => {
                assert!(!dangling);
                assert_eq!(built.instance_count(), instance_count);
            }
            Err(error) => {
                assert!(dangling);
                assert!(matches!(
                    error,
                    BuildError::Range(RangeError::MeshIndexOutOfRange { .. })
                ));
                assert_eq!(arena.live_allocations(), 0);
            }
        }
    }
}

#[test]
fn indices_read_back_unchanged_in_both_widths() {
    let mut rng = StdRng::seed_from_u64(16);
    let raw: Vec<u32> = (0..300).map(|_| rng.gen_range(0..64)).collect();

    for indices in [
        Indices::Narrow(raw.iter().map(|&i| i as u16).collect()),
        Indices::Wide(raw.clone()),
    ] {
        let width = indices.width();
        let mut scene = SceneDescription::new();
        let m = scene.add_mesh(mesh(
            "indexed",
            64,
            vec![SubmeshDescription {
                indices,
                materials: MaterialSet::new(),
            }],
        ));
        scene.add_instance(InstanceDescription::placed(m, Vec3::zero(), 0.0));

        let mut arena = HostArena::new();
        let built = build_scene(&scene, &mut arena, &BuildConfig::default()).unwrap();
        let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();
        let mesh = walker.mesh(0).unwrap();
        let submesh = walker.submesh(&mesh, 0).unwrap();

        assert_eq!(submesh.index_width(), Some(width));
        assert_eq!(submesh.index_count, 300);

        let read_back: Vec<u32> = (0..submesh.primitive_count())
            .flat_map(|primitive| walker.primitive_indices(&submesh, primitive).unwrap())
            .collect();
        assert_eq!(read_back, raw);
        assert!(read_back.iter().all(|&index| index < mesh.vertex_count));
    }
}

#[test]
fn material_arrays_are_always_full_width() {
    let all: Vec<Option<TextureHandle>> = (1..=MATERIAL_TEXTURE_COUNT as u64)
        .map(|raw| Some(texture(raw)))
        .collect();

    for populated in [0, 1, MATERIAL_TEXTURE_COUNT] {
        let materials = MaterialSet::from_ordered(&all[..populated]).unwrap();
        let mut scene = SceneDescription::new();
        scene.add_mesh(mesh(
            "textured",
            3,
            vec![SubmeshDescription {
                indices: Indices::Narrow(vec![0, 1, 2]),
                materials,
            }],
        ));

        let mut arena = HostArena::new();
        let built = build_scene(&scene, &mut arena, &BuildConfig::default()).unwrap();
        let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();
        let submesh = walker.submesh(&walker.mesh(0).unwrap(), 0).unwrap();

        assert_eq!(submesh.materials.len(), MATERIAL_TEXTURE_COUNT);
        for (slot, &handle) in submesh.materials.iter().enumerate() {
            if slot < populated {
                assert_eq!(handle, slot as u64 + 1);
            } else {
                assert_eq!(handle, NULL_RESOURCE);
            }
        }
        assert_eq!(built.resident_textures().len(), populated);
    }
}

#[test]
fn header_constants_match_compiled_enumerations() {
    let manifest = header::parse(&header::generate().unwrap()).unwrap();

    for slot in TextureSlot::ALL {
        let name = format!("TextureSlot{}", slot.name());
        assert_eq!(manifest.constants.get(&name), Some(&slot.id()), "{}", name);
    }
    for index in BufferIndex::ALL {
        let name = format!("BufferIndex{}", index.name());
        assert_eq!(manifest.constants.get(&name), Some(&index.id()), "{}", name);
    }
    assert_eq!(
        manifest.constants.get("IndexWidthNarrow"),
        Some(&IndexWidth::Narrow.id())
    );
    assert_eq!(
        manifest.constants.get("MATERIAL_TEXTURE_COUNT"),
        Some(&(MATERIAL_TEXTURE_COUNT as u32))
    );
}

#[test]
fn stale_device_header_stops_the_build_before_allocating() {
    let stale = header::generate().unwrap().replace(
        "    uint64_t indices; // slot 2, offset 8",
        "    uint64_t indices; // slot 3, offset 8",
    );
    let config = BuildConfig {
        expected_layout: Some(header::parse(&stale).unwrap()),
        ..BuildConfig::default()
    };

    let mut arena = HostArena::new();
    match build_scene(&reference_scene(), &mut arena, &config) {
        Err(BuildError::LayoutDrift(drift)) => {
            assert_eq!(drift.mismatches.len(), 1);
            assert!(drift.mismatches[0].starts_with("SubmeshData.indices"));
        }
        other => panic!("expected layout drift, got {:?}", other.map(|_| ())),
    }
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn allocation_failure_leaves_nothing_allocated() {
    for placement in [Placement::PerArray, Placement::Packed] {
        let mut arena = HostArena::with_capacity(2048);
        let config = BuildConfig {
            placement,
            ..BuildConfig::default()
        };

        match build_scene(&reference_scene(), &mut arena, &config) {
            Err(BuildError::Allocation(AllocationError::OutOfMemory { .. })) => {}
            other => panic!("expected out of memory, got {:?}", other.map(|_| ())),
        }
        assert_eq!(arena.live_allocations(), 0);
        assert_eq!(arena.used(), 0);
    }
}

#[test]
fn packed_and_per_array_scenes_read_the_same() {
    let scene = reference_scene();
    let mut hits = Vec::new();

    for placement in [Placement::PerArray, Placement::Packed] {
        let mut arena = HostArena::new();
        let config = BuildConfig {
            placement,
            ..BuildConfig::default()
        };
        let built = build_verified_scene(&scene, &mut arena, &config).unwrap();

        if placement == Placement::Packed {
            assert_eq!(built.allocations().len(), 1);
        }

        let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();
        let resolved: Vec<_> = (0..5)
            .map(|instance_id| {
                walker
                    .resolve(
                        SubmeshKeypath {
                            instance_id,
                            submesh_id: 0,
                        },
                        0,
                    )
                    .unwrap()
            })
            .collect();
        hits.push(resolved);
    }

    assert_eq!(hits[0], hits[1]);
}

#[test]
fn transform_updates_between_frames_leave_other_records_alone() {
    let scene = reference_scene();
    let mut arena = HostArena::new();
    let mut built = build_scene(&scene, &mut arena, &BuildConfig::default()).unwrap();

    let before = verify_scene(&arena, built.scene_address()).unwrap();
    built
        .write_instance_transform(&mut arena, 3, Mat4::from_scale(2.0))
        .unwrap();
    let after = verify_scene(&arena, built.scene_address()).unwrap();
    assert_eq!(before, after);

    let walker = SceneWalker::new(&arena, built.scene_address()).unwrap();
    assert_eq!(walker.instance(3).unwrap().transform[0][0], 2.0);
    assert_eq!(walker.instance(3).unwrap().mesh_index, 0);
}
