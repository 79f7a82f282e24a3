// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Block code buffers and their allocators.

use std::{
    cell::Cell,
    ops::{Deref, DerefMut},
    rc::Rc,
};

/// Running count of code units held by live buffers.
///
/// Clones share the count. Every buffer allocated against a ledger gives its
/// units back when it is dropped.
#[derive(Clone, Debug, Default)]
pub struct CodeLedger(Rc<Cell<usize>>);

impl CodeLedger {
    #[inline]
    pub fn live_units(&self) -> usize {
        self.0.get()
    }
}

/// Exclusively owned, fixed-size storage for one translated block.
///
/// The length is set at allocation and never changes.
pub struct CodeBuffer {
    units: Box<[u16]>,
    ledger: Option<CodeLedger>,
}

impl CodeBuffer {
    /// Allocates a zero-filled buffer of `units` code units.
    pub fn zeroed(units: usize) -> Self {
        Self {
            units: vec![0; units].into_boxed_slice(),
            ledger: None,
        }
    }

    /// Same as [`CodeBuffer::zeroed`], charging the units to `ledger` until
    /// the buffer is dropped.
    pub fn zeroed_in(units: usize, ledger: &CodeLedger) -> Self {
        ledger.0.set(ledger.live_units() + units);
        Self {
            units: vec![0; units].into_boxed_slice(),
            ledger: Some(ledger.clone()),
        }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if let Some(ref ledger) = self.ledger {
            ledger.0.set(ledger.live_units() - self.units.len());
        }
    }
}

impl Deref for CodeBuffer {
    type Target = [u16];

    #[inline]
    fn deref(&self) -> &[u16] {
        &self.units
    }
}

impl DerefMut for CodeBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u16] {
        &mut self.units
    }
}

impl std::fmt::Debug for CodeBuffer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("CodeBuffer")
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

/// Source of block code buffers. Returning `None` makes the dispatcher evict
/// blocks and retry.
pub trait CodeAllocator: std::fmt::Debug {
    /// Allocates exactly `units` code units.
    fn allocate(&mut self, units: usize) -> Option<CodeBuffer>;
}

/// Allocator that never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl CodeAllocator for Unbounded {
    fn allocate(&mut self, units: usize) -> Option<CodeBuffer> {
        Some(CodeBuffer::zeroed(units))
    }
}

/// Allocator that fails once its live buffers would exceed `budget` code
/// units.
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    budget: usize,
    ledger: CodeLedger,
}

impl BudgetAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            ledger: CodeLedger::default(),
        }
    }

    /// Handle on the units held by buffers this allocator handed out.
    #[inline]
    pub fn ledger(&self) -> CodeLedger {
        self.ledger.clone()
    }
}

impl CodeAllocator for BudgetAllocator {
    fn allocate(&mut self, units: usize) -> Option<CodeBuffer> {
        if self.ledger.live_units().checked_add(units)? > self.budget {
            return None;
        }
        Some(CodeBuffer::zeroed_in(units, &self.ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allocator() {
        let mut alloc = BudgetAllocator::new(16);
        let ledger = alloc.ledger();
        let whole = alloc.allocate(16).unwrap();
        assert_eq!(whole.len(), 16);
        assert_eq!(ledger.live_units(), 16);
        assert!(alloc.allocate(1).is_none());

        drop(whole);
        assert_eq!(ledger.live_units(), 0);
        let half = alloc.allocate(8).unwrap();
        assert!(half.iter().all(|u| *u == 0));
        assert!(alloc.allocate(9).is_none());
        assert!(alloc.allocate(usize::MAX).is_none());
        let other = alloc.allocate(8).unwrap();
        assert_eq!(ledger.live_units(), 16);
        drop((half, other));
        assert_eq!(ledger.live_units(), 0);
    }

    #[test]
    fn test_unbounded_buffers_are_untracked() {
        let mut buffer = Unbounded.allocate(3).unwrap();
        buffer[2] = 0x4e75;
        assert_eq!(*buffer, [0_u16, 0, 0x4e75]);
    }
}
