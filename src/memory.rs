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

//! Guest memory: addresses, regions and the page-indexed bus.

mod address;
mod bus;
mod region;
mod size;

pub use address::*;
pub use bus::*;
pub use region::*;
pub use size::*;

/// The 68000 drives 24 address lines; anything above aliases.
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// Number of low address bits covered by a single bus page.
pub const PAGE_SHIFT: u32 = 16;

/// Size of a bus page in bytes.
pub const PAGE_SIZE: u32 = 1 << PAGE_SHIFT;

/// Number of entries in the bus page table.
pub const PAGE_COUNT: usize = ((ADDRESS_MASK >> PAGE_SHIFT) + 1) as usize;

/// Default guest address the CLI loads raw images to.
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x1000;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd)]
#[repr(u8)]
/// Bus access width in bits.
pub enum Width {
    _32 = 32,
    _16 = 16,
    _8 = 8,
}

impl Width {
    /// Access size in bytes.
    #[inline]
    pub const fn bytes(self) -> u32 {
        self as u32 / 8
    }
}
