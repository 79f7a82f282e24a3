// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

use crate::memory::{ADDRESS_MASK, PAGE_SHIFT};

#[derive(Copy, Clone, Ord, Eq, PartialEq, PartialOrd, Hash, Default)]
#[repr(transparent)]
/// A guest address.
pub struct Address(pub u32);

impl Address {
    /// Index of the bus page this address decodes to.
    #[inline]
    pub const fn page(self) -> usize {
        ((self.0 & ADDRESS_MASK) >> PAGE_SHIFT) as usize
    }

    /// The address as seen on the 24-bit bus.
    #[inline]
    pub const fn on_bus(self) -> Self {
        Self(self.0 & ADDRESS_MASK)
    }

    #[inline]
    pub const fn is_word_aligned(self) -> bool {
        self.0 & 1 == 0
    }

    #[inline]
    pub const fn wrapping_add(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    /// Bytes from `base` up to `self` on the bus, wrapping at 16MiB.
    #[inline]
    pub const fn bus_offset_from(self, base: Self) -> u32 {
        self.0.wrapping_sub(base.0) & ADDRESS_MASK
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "0x{:x}", self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "0x{:x}", self.0)
    }
}
