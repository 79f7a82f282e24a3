//
// monkeyjit
//
// Copyright Contributors to the monkeyjit project.
//
// This file is part of monkeyjit.
//
// monkeyjit is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// monkeyjit is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with monkeyjit. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

use std::ops::Range;

use crate::{
    memory::{Address, BusError, MemorySize, Width, ADDRESS_MASK, PAGE_SIZE},
    tracing,
};

/// Memory-mapped device hooked up to the bus.
///
/// Offsets are relative to the start of the region the device occupies.
pub trait DeviceMemoryOps: std::fmt::Debug {
    fn read(&self, address_inside_region: u32, width: Width) -> u32;
    fn write(&self, address_inside_region: u32, value: u32, width: Width);
}

#[derive(Debug)]
pub enum MemoryBacking {
    Ram(memmap2::MmapMut),
    Device(Box<dyn DeviceMemoryOps>),
}

pub struct MemoryRegion {
    pub name: String,
    /// Offset from start of the bus address space.
    pub phys_offset: Address,
    pub size: MemorySize,
    pub backing: MemoryBacking,
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("MemoryRegion")
            .field("name", &self.name)
            .field("phys_offset", &self.phys_offset)
            .field("size", &self.size)
            .field("backing", &self.backing)
            .finish_non_exhaustive()
    }
}

impl MemoryRegion {
    fn check_layout(size: MemorySize, phys_offset: Address) -> Result<(), BusError> {
        let fits = phys_offset
            .0
            .checked_add(size.get())
            .is_some_and(|end| end - 1 <= ADDRESS_MASK);
        if !fits || phys_offset.0 % PAGE_SIZE != 0 || size.get() % PAGE_SIZE != 0 {
            return Err(BusError::RegionLayout { phys_offset, size });
        }
        Ok(())
    }

    /// Returns a RAM region backed by an anonymous `mmap(2)` area.
    ///
    /// Regions cover whole bus pages, so both `size` and `phys_offset` must be
    /// multiples of [`PAGE_SIZE`](crate::memory::PAGE_SIZE).
    pub fn new(name: &str, size: MemorySize, phys_offset: Address) -> Result<Self, BusError> {
        Self::check_layout(size, phys_offset)?;
        let map = memmap2::MmapMut::map_anon(size.get() as usize).map_err(BusError::Io)?;
        debug_assert_eq!(map.len(), size.get() as usize);
        Ok(Self {
            name: name.to_string(),
            phys_offset,
            size,
            backing: MemoryBacking::Ram(map),
        })
    }

    pub fn new_io(
        name: &str,
        size: MemorySize,
        phys_offset: Address,
        ops: Box<dyn DeviceMemoryOps>,
    ) -> Result<Self, BusError> {
        Self::check_layout(size, phys_offset)?;
        Ok(Self {
            name: name.to_string(),
            phys_offset,
            size,
            backing: MemoryBacking::Device(ops),
        })
    }

    #[inline]
    pub const fn start_addr(&self) -> Address {
        self.phys_offset
    }

    #[inline]
    pub const fn as_ram(&self) -> Option<&memmap2::MmapMut> {
        if let MemoryBacking::Ram(ref inner) = self.backing {
            return Some(inner);
        }
        None
    }

    #[inline]
    pub fn as_ram_mut(&mut self) -> Option<&mut memmap2::MmapMut> {
        if let MemoryBacking::Ram(ref mut inner) = self.backing {
            return Some(inner);
        }
        None
    }

    /// Reads a big-endian value. `offset + width` must lie inside the region.
    pub fn read(&self, offset: u32, width: Width) -> u32 {
        let value = match self.backing {
            MemoryBacking::Ram(ref map) => {
                let start = offset as usize;
                let bytes = &map[start..start + width.bytes() as usize];
                bytes.iter().fold(0_u32, |acc, b| (acc << 8) | u32::from(*b))
            }
            MemoryBacking::Device(ref ops) => ops.read(offset, width),
        };
        log::trace!(
            target: tracing::TraceItem::Memory.as_str(),
            "{}: read {:?} value 0x{:x} (inside offset = 0x{:x})",
            self.name,
            width,
            value,
            offset
        );
        value
    }

    /// Writes a big-endian value. `offset + width` must lie inside the region.
    pub fn write(&mut self, offset: u32, value: u32, width: Width) {
        log::trace!(
            target: tracing::TraceItem::Memory.as_str(),
            "{}: writing {:?} value 0x{:x} (inside offset = 0x{:x})",
            self.name,
            width,
            value,
            offset
        );
        match self.backing {
            MemoryBacking::Ram(ref mut map) => {
                let start = offset as usize;
                let len = width.bytes() as usize;
                let be = value.to_be_bytes();
                map[start..start + len].copy_from_slice(&be[4 - len..]);
            }
            MemoryBacking::Device(ref ops) => ops.write(offset, value, width),
        }
    }
}

/// A non-owning analogue of [`MemoryRegion`] that describes its characteristics
/// but does not own its memory or holds any reference to it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegionDescription {
    pub start_offset: Address,
    pub size: MemorySize,
}

impl From<&MemoryRegion> for MemoryRegionDescription {
    fn from(value: &MemoryRegion) -> Self {
        Self {
            start_offset: value.phys_offset,
            size: value.size,
        }
    }
}

impl MemoryRegionDescription {
    #[inline]
    pub const fn into_range(&self) -> Range<Address> {
        let start = self.start_offset;
        Range {
            start,
            end: Address(start.0 + self.size.get()),
        }
    }
}
