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

//! Page-indexed guest bus.
//!
//! Every access is routed through a table with one entry per 64KiB page, keyed
//! by bits 23..16 of the address.

use crate::memory::{
    Address, MemoryRegion, MemoryRegionDescription, MemorySize, Width, PAGE_COUNT, PAGE_SHIFT,
};

#[derive(Debug)]
pub enum BusError {
    /// Nothing is mapped at this address.
    Unmapped(Address),
    /// Instructions can only be fetched from RAM.
    DeviceFetch(Address),
    /// Word and long accesses must be word aligned.
    Misaligned(Address),
    /// Region does not cover whole pages or runs past the end of the bus.
    RegionLayout {
        phys_offset: Address,
        size: MemorySize,
    },
    Overlaps {
        region: MemoryRegionDescription,
        overlaps_with: MemoryRegionDescription,
    },
    /// Image does not fit into the RAM it is loaded to.
    ImageTooLarge {
        address: Address,
        len: usize,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Unmapped(address) => write!(fmt, "Address {address} is unmapped."),
            Self::DeviceFetch(address) => write!(
                fmt,
                "Cannot fetch instructions from address {address} which is mapped in device \
                 memory."
            ),
            Self::Misaligned(address) => write!(fmt, "Misaligned access at address {address}."),
            Self::RegionLayout { phys_offset, size } => write!(
                fmt,
                "Region of size {size} at {phys_offset} must cover whole 64KiB pages inside the \
                 24-bit address space."
            ),
            Self::Overlaps {
                region,
                overlaps_with,
            } => write!(fmt, "Region {region:?} overlaps with {overlaps_with:?}."),
            Self::ImageTooLarge { address, len } => write!(
                fmt,
                "Image of {len} bytes cannot fit in RAM starting from address {address}."
            ),
            Self::Io(err) => write!(fmt, "Could not map guest memory: {err}"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct BusBuilder {
    regions: Vec<MemoryRegion>,
    pages: [Option<u8>; PAGE_COUNT],
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            regions: vec![],
            pages: [None; PAGE_COUNT],
        }
    }

    pub fn add_region(&mut self, new: MemoryRegion) -> Result<(), BusError> {
        let first = new.start_addr().page();
        let count = (new.size.get() >> PAGE_SHIFT) as usize;
        if let Some(idx) = self.pages[first..first + count].iter().flatten().next() {
            return Err(BusError::Overlaps {
                region: (&new).into(),
                overlaps_with: (&self.regions[usize::from(*idx)]).into(),
            });
        }
        // At most one region per page, so the index always fits.
        let idx = self.regions.len() as u8;
        for page in &mut self.pages[first..first + count] {
            *page = Some(idx);
        }
        log::debug!(
            target: crate::tracing::TraceItem::Memory.as_str(),
            "mapped region {:?} to pages 0x{:02x}-0x{:02x}",
            new.name,
            first,
            first + count - 1
        );
        self.regions.push(new);
        Ok(())
    }

    pub fn with_region(mut self, new: MemoryRegion) -> Result<Self, BusError> {
        self.add_region(new)?;
        Ok(self)
    }

    pub fn build(self) -> Bus {
        let Self { regions, pages } = self;
        Bus { regions, pages }
    }
}

/// The guest's view of memory.
///
/// # Example
///
/// ```rust
/// use monkeyjit::memory::*;
///
/// let ram = MemoryRegion::new("ram", MemorySize::new(0x10000).unwrap(), Address(0x0)).unwrap();
/// let mut bus = Bus::builder().with_region(ram).unwrap().build();
/// bus.write_32(Address(0x100), 0x4e71_4e75).unwrap();
/// assert_eq!(bus.read_16(Address(0x102)).unwrap(), 0x4e75);
/// assert_eq!(bus.read_8(Address(0x100)).unwrap(), 0x4e);
/// assert!(bus.read_8(Address(0x10000)).is_err());
/// ```
#[derive(Debug)]
pub struct Bus {
    regions: Vec<MemoryRegion>,
    pages: [Option<u8>; PAGE_COUNT],
}

impl Bus {
    #[inline]
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    #[inline]
    pub fn find_region(&self, address: Address) -> Option<&MemoryRegion> {
        self.pages[address.page()].map(|idx| &self.regions[usize::from(idx)])
    }

    #[inline]
    pub fn find_region_mut(&mut self, address: Address) -> Option<&mut MemoryRegion> {
        self.pages[address.page()].map(|idx| &mut self.regions[usize::from(idx)])
    }

    fn check_alignment(address: Address, width: Width) -> Result<(), BusError> {
        if width != Width::_8 && !address.is_word_aligned() {
            return Err(BusError::Misaligned(address));
        }
        Ok(())
    }

    // Aligned byte and word accesses never straddle a page, longs are split.
    fn read(&self, address: Address, width: Width) -> Result<u32, BusError> {
        Self::check_alignment(address, width)?;
        let region = self
            .find_region(address)
            .ok_or(BusError::Unmapped(address))?;
        Ok(region.read(address.on_bus().0 - region.phys_offset.0, width))
    }

    fn write(&mut self, address: Address, value: u32, width: Width) -> Result<(), BusError> {
        Self::check_alignment(address, width)?;
        let region = self
            .find_region_mut(address)
            .ok_or(BusError::Unmapped(address))?;
        let offset = address.on_bus().0 - region.phys_offset.0;
        region.write(offset, value, width);
        Ok(())
    }

    pub fn read_8(&self, address: Address) -> Result<u8, BusError> {
        Ok(self.read(address, Width::_8)? as u8)
    }

    pub fn read_16(&self, address: Address) -> Result<u16, BusError> {
        Ok(self.read(address, Width::_16)? as u16)
    }

    pub fn read_32(&self, address: Address) -> Result<u32, BusError> {
        let hi = self.read_16(address)?;
        let lo = self.read_16(address.wrapping_add(2))?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    pub fn write_8(&mut self, address: Address, value: u8) -> Result<(), BusError> {
        self.write(address, value.into(), Width::_8)
    }

    pub fn write_16(&mut self, address: Address, value: u16) -> Result<(), BusError> {
        self.write(address, value.into(), Width::_16)
    }

    pub fn write_32(&mut self, address: Address, value: u32) -> Result<(), BusError> {
        Self::check_alignment(address, Width::_32)?;
        self.write_16(address, (value >> 16) as u16)?;
        self.write_16(address.wrapping_add(2), value as u16)
    }

    /// Reads an instruction word. Only RAM is fetchable.
    pub fn fetch_16(&self, address: Address) -> Result<u16, BusError> {
        let region = self
            .find_region(address)
            .ok_or(BusError::Unmapped(address))?;
        if region.as_ram().is_none() {
            return Err(BusError::DeviceFetch(address));
        }
        self.read_16(address)
    }

    /// Copies a raw guest image into RAM starting at `address`.
    pub fn load(&mut self, address: Address, input: &[u8]) -> Result<(), BusError> {
        if input.is_empty() {
            log::info!("Called `load` with empty slice which does nothing.");
            return Ok(());
        }
        let region = self
            .find_region_mut(address)
            .ok_or(BusError::Unmapped(address))?;
        let offset = (address.on_bus().0 - region.phys_offset.0) as usize;
        let Some(map) = region.as_ram_mut() else {
            return Err(BusError::DeviceFetch(address));
        };
        if input.len() > map.len() - offset {
            return Err(BusError::ImageTooLarge {
                address,
                len: input.len(),
            });
        }
        map[offset..offset + input.len()].copy_from_slice(input);
        Ok(())
    }
}
