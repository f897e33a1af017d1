//! Device memory as the builder sees it: named, aligned allocations that can
//! be written from the host and have a stable device address.

use crate::error::{AllocationError, MemoryFault};
use bytemuck::Pod;
use shared_structs::traversal::DeviceMemory;
use shared_structs::DeviceAddress;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::mem::size_of;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(pub(crate) u32);

/// A source of device-addressable memory.
///
/// Allocations are host-writable until freed, and their device address never
/// changes while they are live.
pub trait DeviceAllocator {
    fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        name: &str,
    ) -> Result<AllocationId, AllocationError>;

    fn device_address(&self, allocation: AllocationId) -> Result<DeviceAddress, AllocationError>;

    fn write(
        &mut self,
        allocation: AllocationId,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), AllocationError>;

    fn free(&mut self, allocation: AllocationId) -> Result<(), AllocationError>;
}

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A typed run of records inside one allocation.
#[derive(Debug)]
pub struct DeviceSlice<T> {
    allocation: AllocationId,
    offset: u64,
    len: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DeviceSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DeviceSlice<T> {}

impl<T: Pod> DeviceSlice<T> {
    pub(crate) fn new(allocation: AllocationId, offset: u64, len: u32) -> Self {
        Self {
            allocation,
            offset,
            len,
            _marker: PhantomData,
        }
    }

    pub fn allocation(&self) -> AllocationId {
        self.allocation
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_size(&self) -> u64 {
        self.len as u64 * size_of::<T>() as u64
    }

    /// Offset of one element within the allocation.
    pub fn element_offset(&self, index: u32) -> Option<u64> {
        (index < self.len).then(|| self.offset + index as u64 * size_of::<T>() as u64)
    }

    pub fn address<A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &A,
    ) -> Result<DeviceAddress, AllocationError> {
        Ok(allocator.device_address(self.allocation)? + self.offset)
    }

    pub fn write_all<A: DeviceAllocator + ?Sized>(
        &self,
        allocator: &mut A,
        values: &[T],
    ) -> Result<(), AllocationError> {
        debug_assert_eq!(values.len(), self.len as usize);
        allocator.write(self.allocation, self.offset, bytemuck::cast_slice(values))
    }
}

/// Sorted address ranges of live allocations, for turning a device address
/// back into an allocation and offset.
#[derive(Debug, Default)]
pub(crate) struct AddressMap {
    ranges: BTreeMap<DeviceAddress, (AllocationId, u64)>,
}

impl AddressMap {
    pub fn insert(&mut self, address: DeviceAddress, size: u64, allocation: AllocationId) {
        self.ranges.insert(address, (allocation, size));
    }

    pub fn remove(&mut self, address: DeviceAddress) {
        self.ranges.remove(&address);
    }

    pub fn resolve(
        &self,
        address: DeviceAddress,
        size: u64,
    ) -> Result<(AllocationId, u64), MemoryFault> {
        let fault = MemoryFault { address, size };

        let (&start, &(allocation, len)) =
            self.ranges.range(..=address).next_back().ok_or(fault)?;
        let offset = address - start;

        if offset.checked_add(size).map_or(true, |end| end > len) {
            return Err(fault);
        }

        Ok((allocation, offset))
    }
}

struct HostAllocation {
    name: String,
    address: DeviceAddress,
    bytes: Vec<u8>,
}

/// Device memory emulated in host RAM.
///
/// Addresses start well above zero and above 4 GiB, so a null or truncated
/// pointer can never alias a real allocation.
pub struct HostArena {
    allocations: Vec<Option<HostAllocation>>,
    addresses: AddressMap,
    next_address: DeviceAddress,
    capacity: Option<u64>,
    used: u64,
}

impl HostArena {
    pub const BASE_ADDRESS: DeviceAddress = 0x1_0000_0000;

    pub fn new() -> Self {
        Self {
            allocations: Vec::new(),
            addresses: AddressMap::default(),
            next_address: Self::BASE_ADDRESS,
            capacity: None,
            used: 0,
        }
    }

    /// An arena that fails allocations once `capacity` bytes are live.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.iter().flatten().count()
    }

    pub fn bytes(&self, allocation: AllocationId) -> Option<&[u8]> {
        self.get(allocation).ok().map(|allocation| &allocation.bytes[..])
    }

    pub fn name(&self, allocation: AllocationId) -> Option<&str> {
        self.get(allocation).ok().map(|allocation| &allocation.name[..])
    }

    fn get(&self, allocation: AllocationId) -> Result<&HostAllocation, AllocationError> {
        self.allocations
            .get(allocation.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(AllocationError::UnknownAllocation(allocation))
    }
}

impl Default for HostArena {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAllocator for HostArena {
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

        if let Some(capacity) = self.capacity {
            let available = capacity - self.used;
            if size > available {
                return Err(AllocationError::OutOfMemory {
                    name: name.to_string(),
                    requested: size,
                    available,
                });
            }
        }

        let address = align_up(self.next_address, alignment.max(1));
        self.next_address = address + size;
        self.used += size;

        let id = AllocationId(self.allocations.len() as u32);
        self.allocations.push(Some(HostAllocation {
            name: name.to_string(),
            address,
            bytes: vec![0; size as usize],
        }));
        self.addresses.insert(address, size, id);

        log::debug!("Arena: {} of {} bytes at {:#x}", name, size, address);

        Ok(id)
    }

    fn device_address(&self, allocation: AllocationId) -> Result<DeviceAddress, AllocationError> {
        Ok(self.get(allocation)?.address)
    }

    fn write(
        &mut self,
        allocation: AllocationId,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), AllocationError> {
        let target = self
            .allocations
            .get_mut(allocation.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(AllocationError::UnknownAllocation(allocation))?;

        let size = target.bytes.len() as u64;
        let len = bytes.len() as u64;

        if offset + len > size {
            return Err(AllocationError::WriteOutOfBounds {
                name: target.name.clone(),
                offset,
                len,
                size,
            });
        }

        target.bytes[offset as usize..(offset + len) as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn free(&mut self, allocation: AllocationId) -> Result<(), AllocationError> {
        let freed = self
            .allocations
            .get_mut(allocation.0 as usize)
            .and_then(Option::take)
            .ok_or(AllocationError::UnknownAllocation(allocation))?;

        self.addresses.remove(freed.address);
        self.used -= freed.bytes.len() as u64;
        Ok(())
    }
}

impl DeviceMemory for HostArena {
    type Error = MemoryFault;

    fn load<T: Pod>(&self, address: DeviceAddress) -> Result<T, MemoryFault> {
        let size = size_of::<T>() as u64;
        let (allocation, offset) = self.addresses.resolve(address, size)?;
        let bytes = self
            .bytes(allocation)
            .ok_or(MemoryFault { address, size })?;

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
