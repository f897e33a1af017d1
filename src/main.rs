use anyhow::Context;
use bindless_scene::demo::DemoScene;
use bindless_scene::error::MemoryFault;
use bindless_scene::header;
use bindless_scene::shared_structs::traversal::DeviceMemory;
use bindless_scene::shared_structs::{BufferIndex, CameraData, LightData};
use bindless_scene::uniforms::{light_data, Camera};
use bindless_scene::vulkan::VulkanAllocator;
use bindless_scene::{
    build_scene, build_verified_scene, verify_scene, AllocationId, BuildConfig, DeviceAllocator,
    HostArena, Placement,
};
use simplelog::{Config, LevelFilter, SimpleLogger};
use std::path::PathBuf;
use std::str::FromStr;
use structopt::StructOpt;
use ultraviolet::Vec3;

#[derive(Debug, Clone, Copy)]
enum Backend {
    Host,
    Vulkan,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::Host),
            "vulkan" => Ok(Self::Vulkan),
            other => Err(format!("unknown backend {:?}", other)),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bindless-scene",
    about = "Builds a bindless scene in device memory and walks it back."
)]
struct Opt {
    /// Where device memory comes from.
    #[structopt(long, default_value = "host", possible_values = &["host", "vulkan"])]
    backend: Backend,
    #[structopt(long, default_value = "per-array", possible_values = &["per-array", "packed"])]
    placement: Placement,
    /// Randomly placed sphere instances on top of the fixed ones.
    #[structopt(long, default_value = "100")]
    scattered: usize,
    #[structopt(long, default_value = "0")]
    seed: u64,
    /// Caps the host arena, in bytes.
    #[structopt(long)]
    arena_capacity: Option<u64>,
    #[structopt(long, default_value = "16")]
    min_alignment: u64,
    /// Write the device layout header here.
    #[structopt(long, parse(from_os_str))]
    emit_header: Option<PathBuf>,
    /// Refuse to build unless this header matches the current layout.
    #[structopt(long, parse(from_os_str))]
    device_header: Option<PathBuf>,
    #[structopt(long)]
    skip_verify: bool,
    /// Animation frames to push through the in-place transform update.
    #[structopt(long, default_value = "3")]
    frames: u32,
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    SimpleLogger::init(level, Config::default())?;

    if let Some(path) = &opt.emit_header {
        std::fs::write(path, header::generate()?)
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("Wrote device layout header to {}", path.display());
    }

    let expected_layout = match &opt.device_header {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Some(header::parse(&text).with_context(|| format!("parsing {}", path.display()))?)
        }
        None => None,
    };

    let config = BuildConfig {
        placement: opt.placement,
        min_alignment: opt.min_alignment,
        expected_layout,
    };

    let mut demo = DemoScene::new(opt.scattered, opt.seed)?;

    match opt.backend {
        Backend::Host => {
            let mut arena = match opt.arena_capacity {
                Some(capacity) => HostArena::with_capacity(capacity),
                None => HostArena::new(),
            };
            run(&mut arena, &mut demo, &config, &opt)
        }
        Backend::Vulkan => {
            let mut allocator = VulkanAllocator::new_headless()?;
            run(&mut allocator, &mut demo, &config, &opt)
        }
    }
}

fn run<A>(
    allocator: &mut A,
    demo: &mut DemoScene,
    config: &BuildConfig,
    opt: &Opt,
) -> anyhow::Result<()>
where
    A: DeviceAllocator + DeviceMemory<Error = MemoryFault>,
{
    let mut built = if opt.skip_verify {
        build_scene(&demo.description, allocator, config)?
    } else {
        build_verified_scene(&demo.description, allocator, config)?
    };

    let stats = *built.stats();
    log::info!(
        "{} submeshes, {} vertices, {} triangles, {} resident textures",
        stats.submeshes,
        stats.vertices,
        stats.triangles,
        built.resident_textures().len()
    );

    for _ in 0..opt.frames {
        demo.update();
        demo.write_resources(&mut built, allocator)?;
    }

    if !opt.skip_verify && opt.frames > 0 {
        verify_scene(&*allocator, built.scene_address())?;
    }

    upload_uniforms(allocator)?;

    println!(
        "Scene root at {:#x} (binding {}): {} meshes, {} instances",
        built.scene_address(),
        BufferIndex::Scene.id(),
        built.mesh_count(),
        built.instance_count()
    );

    built.release(allocator)?;
    Ok(())
}

// Per-frame records bound next to the scene root.
fn upload_uniforms<A: DeviceAllocator>(allocator: &mut A) -> anyhow::Result<()> {
    let camera = Camera {
        position: Vec3::new(0.0, 2.0, 10.0),
        target: Vec3::new(0.0, 0.0, -20.0),
        vertical_fov: 60.0_f32.to_radians(),
        aspect_ratio: 16.0 / 9.0,
        z_near: 0.1,
        z_far: 500.0,
    };
    let camera = camera.data(0.0, 0.0);
    let light = light_data(Vec3::new(-1.0, -2.0, -1.0), 1.0);

    let camera_buffer = allocator.allocate(
        std::mem::size_of::<CameraData>() as u64,
        16,
        "camera uniforms",
    )?;
    let light_buffer =
        match allocator.allocate(std::mem::size_of::<LightData>() as u64, 16, "light uniforms") {
            Ok(light_buffer) => light_buffer,
            Err(error) => {
                free_logged(allocator, camera_buffer);
                return Err(error.into());
            }
        };

    let uploaded = write_uniforms(allocator, camera_buffer, &camera, light_buffer, &light);

    free_logged(allocator, camera_buffer);
    free_logged(allocator, light_buffer);
    uploaded
}

fn write_uniforms<A: DeviceAllocator>(
    allocator: &mut A,
    camera_buffer: AllocationId,
    camera: &CameraData,
    light_buffer: AllocationId,
    light: &LightData,
) -> anyhow::Result<()> {
    allocator.write(camera_buffer, 0, bytemuck::bytes_of(camera))?;
    allocator.write(light_buffer, 0, bytemuck::bytes_of(light))?;

    log::info!(
        "Camera uniforms at {:#x} (binding {}), light uniforms at {:#x} (binding {})",
        allocator.device_address(camera_buffer)?,
        BufferIndex::CameraData.id(),
        allocator.device_address(light_buffer)?,
        BufferIndex::LightData.id()
    );

    Ok(())
}

fn free_logged<A: DeviceAllocator>(allocator: &mut A, allocation: AllocationId) {
    if let Err(error) = allocator.free(allocation) {
        log::warn!("Failed to free {:?}: {}", allocation, error);
    }
}
