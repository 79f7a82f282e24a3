// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Translated block cache

use std::{num::NonZero, ops::Range};

use crate::{jit::CodeBuffer, memory::Address, tracing};

/// Default slot count, a prime to spread collisions.
pub const DEFAULT_SLOTS: NonZero<usize> = NonZero::new(251).unwrap();

#[must_use]
/// A translated block of instructions.
pub struct TranslatedBlock {
    /// Guest entry address, the cache key.
    pub entry: Address,
    /// First guest address after the translated range.
    pub guest_end: Address,
    /// Translated body length in code units.
    pub body_len: usize,
    /// Guest instructions translated.
    pub instructions: usize,
    /// Hit count used to rank eviction.
    pub usage: u32,
    /// Prologue, body and epilogue.
    pub code: CodeBuffer,
}

impl std::fmt::Debug for TranslatedBlock {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TranslatedBlock")
            .field(
                "guest_range",
                &format!("{:#x}-{:#x}", self.entry.0, self.guest_end.0),
            )
            .field("body_len", &self.body_len)
            .field("usage", &self.usage)
            .field("units", &self.code.len())
            .finish_non_exhaustive()
    }
}

impl TranslatedBlock {
    /// Guest bytes the block was translated from.
    #[inline]
    pub fn guest_len(&self) -> u32 {
        self.guest_end.0.wrapping_sub(self.entry.0)
    }

    /// Whether `address` decodes to one of the block's guest bytes on the bus.
    #[inline]
    pub fn covers(&self, address: Address) -> bool {
        address.bus_offset_from(self.entry) < self.guest_len()
    }

    /// Whether the translated guest range intersects `range` on the bus.
    ///
    /// Both ranges are compared modulo the 24-bit address space, so aliases
    /// above 16MiB and ranges that wrap around match.
    pub fn overlaps(&self, range: &Range<Address>) -> bool {
        let len = range.end.0.wrapping_sub(range.start.0);
        if len == 0 {
            return false;
        }
        self.covers(range.start) || self.entry.bus_offset_from(range.start) < len
    }
}

/// One hash bucket.
///
/// The chain head is the last element, so linking a block at the head is a
/// push.
#[derive(Debug, Default)]
pub struct CacheSlot {
    chain: Vec<TranslatedBlock>,
}

impl CacheSlot {
    /// Blocks from the chain head to its tail.
    pub fn iter(&self) -> impl Iterator<Item = &TranslatedBlock> {
        self.chain.iter().rev()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    fn position(&self, address: Address) -> Option<usize> {
        self.chain.iter().rposition(|b| b.entry == address)
    }
}

/// Where a block lives inside a [`BlockCache`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockPosition {
    pub slot: usize,
    pub index: usize,
}

/// Lookup and eviction counters.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub replacements: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// Hash-indexed container of translated blocks. Owns every block.
pub struct BlockCache {
    slots: Box<[CacheSlot]>,
    len: usize,
    footprint: usize,
    stats: CacheStats,
}

impl Drop for BlockCache {
    /// Frees block memory.
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("BlockCache")
            .field("slots", &self.slots.len())
            .field("len", &self.len)
            .field("footprint", &self.footprint)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BlockCache {
    /// Create an empty cache with `slots` hash slots.
    pub fn new(slots: NonZero<usize>) -> Self {
        Self {
            slots: (0..slots.get()).map(|_| CacheSlot::default()).collect(),
            len: 0,
            footprint: 0,
            stats: CacheStats::default(),
        }
    }

    /// Guest instructions start at even addresses, so the low bit is dropped
    /// before taking the modulo.
    #[inline]
    pub fn slot_index(&self, address: Address) -> usize {
        (address.0 >> 1) as usize % self.slots.len()
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &CacheSlot {
        &self.slots[index]
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of live blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Code units owned by live blocks.
    #[inline]
    pub fn footprint(&self) -> usize {
        self.footprint
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// All blocks, slot by slot.
    pub fn iter(&self) -> impl Iterator<Item = &TranslatedBlock> {
        self.slots.iter().flat_map(CacheSlot::iter)
    }

    /// Get the block for `address` and count the hit.
    pub fn lookup(&mut self, address: Address) -> Option<&TranslatedBlock> {
        let position = self.lookup_position(address)?;
        Some(self.block_at(position))
    }

    /// Same as [`BlockCache::lookup`], but returns where the block lives
    /// instead of borrowing it.
    pub fn lookup_position(&mut self, address: Address) -> Option<BlockPosition> {
        let index = self.slot_index(address);
        let slot = &mut self.slots[index];
        let Some(pos) = slot.position(address) else {
            self.stats.misses += 1;
            log::trace!(
                target: tracing::TraceItem::BlockLookup.as_str(),
                "miss for {address} in slot {index}"
            );
            return None;
        };
        self.stats.hits += 1;
        let block = &mut slot.chain[pos];
        block.usage = block.usage.saturating_add(1);
        log::trace!(
            target: tracing::TraceItem::BlockLookup.as_str(),
            "hit for {address} in slot {index}, usage {}",
            block.usage
        );
        Some(BlockPosition {
            slot: index,
            index: pos,
        })
    }

    /// Block at a position returned by [`BlockCache::lookup_position`].
    ///
    /// Positions are invalidated by any operation that takes `&mut self`.
    #[inline]
    pub fn block_at(&self, position: BlockPosition) -> &TranslatedBlock {
        &self.slots[position.slot].chain[position.index]
    }

    /// Get the block for `address` without touching its usage.
    pub fn peek(&self, address: Address) -> Option<&TranslatedBlock> {
        let slot = &self.slots[self.slot_index(address)];
        slot.position(address).map(|pos| &slot.chain[pos])
    }

    /// Link `block` at the head of its slot with usage 1, replacing and
    /// freeing any block already cached for the same address.
    pub fn insert_or_replace(&mut self, mut block: TranslatedBlock) -> &TranslatedBlock {
        block.usage = 1;
        let index = self.slot_index(block.entry);
        let slot = &mut self.slots[index];
        self.footprint += block.code.len();
        if let Some(pos) = slot.position(block.entry) {
            let old = slot.chain.remove(pos);
            self.footprint -= old.code.len();
            self.stats.replacements += 1;
            log::trace!(
                target: tracing::TraceItem::BlockLookup.as_str(),
                "replacing {old:?} in slot {index}"
            );
        } else {
            self.len += 1;
            self.stats.inserts += 1;
        }
        slot.chain.push(block);
        let Some(head) = slot.chain.last() else {
            unreachable!("slot {index} is empty right after a push");
        };
        head
    }

    /// Lowest usage among live blocks, or `None` if the cache is empty.
    pub fn min_usage(&self) -> Option<u32> {
        let mut min = None;
        for block in self.iter() {
            if min.is_none_or(|m| block.usage < m) {
                min = Some(block.usage);
                // Live blocks never drop below 1.
                if block.usage <= 1 {
                    break;
                }
            }
        }
        min
    }

    /// Subtract `threshold` from every block's usage and destroy the blocks
    /// that reach zero. Returns how many were destroyed.
    pub fn sweep(&mut self, threshold: u32) -> usize {
        let mut removed = 0;
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            slot.chain.retain_mut(|block| {
                block.usage = block.usage.saturating_sub(threshold);
                if block.usage == 0 {
                    removed += 1;
                    freed += block.code.len();
                    false
                } else {
                    true
                }
            });
        }
        self.len -= removed;
        self.footprint -= freed;
        self.stats.evictions += removed as u64;
        removed
    }

    /// Destroy every block whose guest range contains `address`.
    pub fn invalidate(&mut self, address: Address) -> usize {
        self.invalidate_range(address..address.wrapping_add(1))
    }

    /// Destroy every block whose guest range intersects `range`.
    pub fn invalidate_range(&mut self, range: Range<Address>) -> usize {
        let mut removed = 0;
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            slot.chain.retain(|block| {
                if block.overlaps(&range) {
                    removed += 1;
                    freed += block.code.len();
                    false
                } else {
                    true
                }
            });
        }
        if removed > 0 {
            log::trace!(
                target: tracing::TraceItem::Invalidate.as_str(),
                "Invalidating {} block{} at address range {}-{}",
                removed,
                if removed == 1 { "" } else { "s" },
                range.start,
                range.end
            );
        }
        self.len -= removed;
        self.footprint -= freed;
        self.stats.invalidations += removed as u64;
        removed
    }

    /// Pop and free all blocks.
    pub fn teardown(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.chain.clear();
        }
        self.len = 0;
        self.footprint = 0;
    }
}
