//! A Vulkan backend: every region is a host-visible storage buffer with a
//! buffer device address, allocated through `gpu-allocator`.

use crate::error::{AllocationError, MemoryFault};
use crate::memory::{AddressMap, AllocationId, DeviceAllocator};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocatorCreateDesc};
use shared_structs::traversal::DeviceMemory;
use shared_structs::DeviceAddress;
use std::ffi::CStr;
use std::mem::{size_of, ManuallyDrop};
use std::os::raw::c_char;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VulkanError {
    #[error("failed to load Vulkan: {0}")]
    Loading(String),
    #[error("failed to create a Vulkan instance: {0}")]
    Instance(String),
    #[error(transparent)]
    Vk(#[from] vk::Result),
    #[error("failed to create the device memory allocator: {0}")]
    Allocator(String),
    #[error("no device supports Vulkan 1.2 buffer device addresses")]
    NoSuitableDevice,
}

struct DeviceBuffer {
    name: String,
    buffer: vk::Buffer,
    allocation: Allocation,
    address: DeviceAddress,
    size: u64,
}

/// Owns a headless instance and device and hands out buffers from them.
pub struct VulkanAllocator {
    inner: ManuallyDrop<gpu_allocator::vulkan::Allocator>,
    buffers: Vec<Option<DeviceBuffer>>,
    addresses: AddressMap,
    queue_family: u32,
    device: ash::Device,
    instance: ash::Instance,
    _entry: ash::Entry,
}

impl VulkanAllocator {
    pub fn new_headless() -> Result<Self, VulkanError> {
        let entry =
            unsafe { ash::Entry::new() }.map_err(|error| VulkanError::Loading(error.to_string()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(c_str(b"bindless-scene\0"))
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 2, 0));

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder().application_info(&app_info),
                None,
            )
        }
        .map_err(|error| VulkanError::Instance(error.to_string()))?;

        let (physical_device, queue_family) = match select_physical_device(&instance)? {
            Some(selection) => selection,
            None => {
                unsafe { instance.destroy_instance(None) };
                return Err(VulkanError::NoSuitableDevice);
            }
        };

        let queue_info = [*vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&[1.0])];

        let mut vk_12_features =
            vk::PhysicalDeviceVulkan12Features::builder().buffer_device_address(true);

        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_info)
            .push_next(&mut vk_12_features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }?;

        let inner = gpu_allocator::vulkan::Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: false,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            // Needed for getting buffer device addresses
            buffer_device_address: true,
        })
        .map_err(|error| VulkanError::Allocator(error.to_string()))?;

        Ok(Self {
            inner: ManuallyDrop::new(inner),
            buffers: Vec::new(),
            addresses: AddressMap::default(),
            queue_family,
            device,
            instance,
            _entry: entry,
        })
    }

    fn buffer(&self, allocation: AllocationId) -> Result<&DeviceBuffer, AllocationError> {
        self.buffers
            .get(allocation.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AllocationError::UnknownAllocation(allocation))
    }

    fn destroy(&mut self, buffer: DeviceBuffer) -> Result<(), AllocationError> {
        self.addresses.remove(buffer.address);
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };

        self.inner
            .free(buffer.allocation)
            .map_err(|error| AllocationError::Backend {
                name: buffer.name,
                source: Box::new(error),
            })
    }
}

fn backend_error(
    name: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> AllocationError {
    AllocationError::Backend {
        name: name.to_string(),
        source: Box::new(source),
    }
}

impl DeviceAllocator for VulkanAllocator {
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        name: &str,
    ) -> Result<AllocationId, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSized {
                name: name.to_string(),
            });
        }

        log::info!("Creating a {} of {} bytes", name, size);

        let buffer = unsafe {
            self.device.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size)
                    .usage(
                        vk::BufferUsageFlags::STORAGE_BUFFER
                            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                    )
                    .queue_family_indices(&[self.queue_family]),
                None,
            )
        }
        .map_err(|error| backend_error(name, error))?;

        let mut requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        requirements.alignment = requirements.alignment.max(alignment);

        let allocation = match self.inner.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: gpu_allocator::MemoryLocation::CpuToGpu,
            linear: true,
        }) {
            Ok(allocation) => allocation,
            Err(error) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(backend_error(name, error));
            }
        };

        if let Err(error) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_buffer(buffer, None) };
            if let Err(free_error) = self.inner.free(allocation) {
                log::warn!("Failed to free {}: {}", name, free_error);
            }
            return Err(backend_error(name, error));
        }

        let address = unsafe {
            self.device
                .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(buffer))
        };

        let id = AllocationId(self.buffers.len() as u32);
        self.addresses.insert(address, size, id);
        self.buffers.push(Some(DeviceBuffer {
            name: name.to_string(),
            buffer,
            allocation,
            address,
            size,
        }));

        Ok(id)
    }

    fn device_address(&self, allocation: AllocationId) -> Result<DeviceAddress, AllocationError> {
        Ok(self.buffer(allocation)?.address)
    }

    fn write(
        &mut self,
        allocation: AllocationId,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), AllocationError> {
        let target = self
            .buffers
            .get_mut(allocation.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocationError::UnknownAllocation(allocation))?;

        let len = bytes.len() as u64;
        if offset + len > target.size {
            return Err(AllocationError::WriteOutOfBounds {
                name: target.name.clone(),
                offset,
                len,
                size: target.size,
            });
        }

        let name = &target.name;
        let slice = target
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| AllocationError::Backend {
                name: name.clone(),
                source: "allocation is not host visible".into(),
            })?;

        slice[offset as usize..(offset + len) as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn free(&mut self, allocation: AllocationId) -> Result<(), AllocationError> {
        let buffer = self
            .buffers
            .get_mut(allocation.0 as usize)
            .and_then(Option::take)
            .ok_or(AllocationError::UnknownAllocation(allocation))?;

        self.destroy(buffer)
    }
}

impl DeviceMemory for VulkanAllocator {
    type Error = MemoryFault;

    fn load<T: Pod>(&self, address: DeviceAddress) -> Result<T, MemoryFault> {
        let size = size_of::<T>() as u64;
        let fault = MemoryFault { address, size };

        let (allocation, offset) = self.addresses.resolve(address, size)?;
        let bytes = self
            .buffer(allocation)
            .ok()
            .and_then(|buffer| buffer.allocation.mapped_slice())
            .ok_or(fault)?;

        Ok(bytemuck::pod_read_unaligned(
            &bytes[offset as usize..(offset + size) as usize],
        ))
    }

    fn address_overflow(&self, base: DeviceAddress, size: u64) -> MemoryFault {
        MemoryFault {
            address: base,
            size,
        }
    }
}

impl Drop for VulkanAllocator {
    fn drop(&mut self) {
        let leftover: Vec<DeviceBuffer> = self.buffers.drain(..).flatten().collect();

        if !leftover.is_empty() {
            log::warn!("Freeing {} buffers still live at shutdown", leftover.len());
        }

        for buffer in leftover {
            if let Err(error) = self.destroy(buffer) {
                log::warn!("{}", error);
            }
        }

        unsafe {
            ManuallyDrop::drop(&mut self.inner);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Picks a device with Vulkan 1.2 buffer device addresses, preferring
/// discrete GPUs.
fn select_physical_device(
    instance: &ash::Instance,
) -> Result<Option<(vk::PhysicalDevice, u32)>, VulkanError> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    log::info!(
        "Found {} device{}",
        physical_devices.len(),
        if physical_devices.len() == 1 { "" } else { "s" }
    );

    let selection = physical_devices
        .into_iter()
        .filter_map(|physical_device| unsafe {
            let properties = instance.get_physical_device_properties(physical_device);

            log::info!(
                "Checking Device: {:?}",
                cstr_from_array(&properties.device_name)
            );

            let is_1_2 = vk::api_version_major(properties.api_version) > 1
                || vk::api_version_minor(properties.api_version) >= 2;

            log::info!("  Checking for Vulkan 1.2: {}", tick(is_1_2));

            if !is_1_2 {
                return None;
            }

            let mut vk_12_features = vk::PhysicalDeviceVulkan12Features::default();
            {
                let mut features =
                    vk::PhysicalDeviceFeatures2::builder().push_next(&mut vk_12_features);
                instance.get_physical_device_features2(physical_device, &mut features);
            }

            let has_device_address = vk_12_features.buffer_device_address == vk::TRUE;

            log::info!(
                "  Checking for buffer device addresses: {}",
                tick(has_device_address)
            );

            if !has_device_address {
                return None;
            }

            let queue_family = instance
                .get_physical_device_queue_family_properties(physical_device)
                .into_iter()
                .position(|queue_family_properties| {
                    queue_family_properties
                        .queue_flags
                        .intersects(vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS)
                })
                .map(|queue_family| queue_family as u32);

            log::info!(
                "  Checking for a compute queue family: {}",
                tick(queue_family.is_some())
            );

            queue_family.map(|queue_family| (physical_device, queue_family, properties))
        })
        .max_by_key(|(.., properties)| match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 2,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            _ => 0,
        });

    Ok(selection.map(|(physical_device, queue_family, properties)| {
        log::info!("Using device {:?}", unsafe {
            cstr_from_array(&properties.device_name)
        });
        (physical_device, queue_family)
    }))
}

fn c_str(bytes: &'static [u8]) -> &'static CStr {
    CStr::from_bytes_with_nul(bytes).unwrap_or_default()
}

fn tick(supported: bool) -> &'static str {
    if supported {
        "yes"
    } else {
        "no"
    }
}

unsafe fn cstr_from_array(array: &[c_char]) -> &CStr {
    CStr::from_ptr(array.as_ptr())
}
