// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Decay based eviction of translated blocks.
//!
//! Every block is always compiled, there is no interpreter to fall back to, so
//! code that runs once would otherwise stay in the cache forever. When an
//! allocation fails, a sweep subtracts the lowest usage count in the cache from
//! every block and destroys the ones that reach zero. At least one block holds
//! the minimum, so a sweep over a non-empty cache always frees something.
//!
//! Every block with the minimum usage goes at once, which can be most of the
//! cache when many blocks have run the same number of times.

use crate::{machine::BlockCache, tracing};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GarbageCollector {
    /// Sweeps that ran over a non-empty cache.
    pub sweeps: u64,
    /// Blocks destroyed by all sweeps.
    pub evicted: u64,
}

impl GarbageCollector {
    pub const fn new() -> Self {
        Self {
            sweeps: 0,
            evicted: 0,
        }
    }

    /// Run one sweep over `cache` and return how many blocks it destroyed.
    ///
    /// Returns 0 without sweeping if the cache is empty.
    pub fn sweep_once(&mut self, cache: &mut BlockCache) -> usize {
        let Some(threshold) = cache.min_usage() else {
            log::debug!(
                target: tracing::TraceItem::Gc.as_str(),
                "nothing to sweep, cache is empty"
            );
            return 0;
        };
        let population = cache.len();
        let footprint = cache.footprint();
        let removed = cache.sweep(threshold);
        self.sweeps += 1;
        self.evicted += removed as u64;
        log::debug!(
            target: tracing::TraceItem::Gc.as_str(),
            "swept with threshold {threshold}: {population} -> {} blocks, {footprint} -> {} code \
             units",
            cache.len(),
            cache.footprint(),
        );
        removed
    }
}
