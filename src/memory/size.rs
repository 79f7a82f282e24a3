// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Utility structs for memory sizes.

use std::num::NonZero;

#[derive(Copy, Eq, PartialEq, PartialOrd, Ord, Clone)]
#[repr(transparent)]
/// A non-zero size in bytes.
pub struct MemorySize(pub NonZero<u32>);

#[allow(non_upper_case_globals)]
impl MemorySize {
    // SAFETY: value is non-zero.
    /// A KiB.
    pub const KiB: NonZero<u32> = NonZero::new(1024).unwrap();
    // SAFETY: value is non-zero.
    /// A MiB.
    pub const MiB: NonZero<u32> = NonZero::new(Self::KiB.get() * 1024).unwrap();

    #[inline]
    /// Constructs a new size.
    pub const fn new(value: u32) -> Option<Self> {
        match NonZero::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    /// Unwraps the value.
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for MemorySize {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let bytes = self.get();
        if bytes < Self::KiB.get() {
            write!(fmt, "{}bytes", bytes)
        } else if bytes < Self::MiB.get() {
            write!(fmt, "{}KiB", bytes / Self::KiB)
        } else {
            write!(fmt, "{}MiB", bytes / Self::MiB)
        }
    }
}

impl std::fmt::Debug for MemorySize {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, fmt)
    }
}
