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

//! Guest execution context: the block cache and everything that fills it.

use crate::{
    config::Config,
    jit::{
        BudgetAllocator, CodeAllocator, CodeBuffer, CopyDecoder, TranslateError, Translator,
        Templates, Unbounded,
    },
    memory::{Address, Bus, BusError, MemoryRegion, MemorySize},
    tracing,
};

mod block_cache;
mod gc;

pub use block_cache::*;
pub use gc::*;

#[derive(Debug)]
pub enum ResolveError {
    /// Allocation failed and eviction could not free anything.
    ResourceExhausted {
        entry: Address,
        requested_units: usize,
        footprint: usize,
    },
    /// The allocator returned a buffer of the wrong length.
    BadAllocation {
        entry: Address,
        requested_units: usize,
        allocated_units: usize,
    },
    /// The block at `entry` could not be translated.
    Translate {
        entry: Address,
        error: TranslateError,
    },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::ResourceExhausted {
                entry,
                requested_units,
                footprint,
            } => write!(
                fmt,
                "Out of code memory: could not allocate {requested_units} code units for block \
                 {entry}, {footprint} code units still in use."
            ),
            Self::BadAllocation {
                entry,
                requested_units,
                allocated_units,
            } => write!(
                fmt,
                "Code allocator returned {allocated_units} code units for block {entry} instead \
                 of {requested_units}."
            ),
            Self::Translate { entry, error } => {
                write!(fmt, "Could not translate block {entry}: {error}")
            }
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceExhausted { .. } | Self::BadAllocation { .. } => None,
            Self::Translate { error, .. } => Some(error),
        }
    }
}

impl ResolveError {
    /// Whether guest execution cannot continue. The cache's integrity is not
    /// guaranteed after a fatal error.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } | Self::BadAllocation { .. } => true,
            Self::Translate { error, .. } => error.is_fatal(),
        }
    }
}

/// The state the execution driver runs guest code against.
#[derive(Debug)]
pub struct Machine {
    pub bus: Bus,
    pub cache: BlockCache,
    pub translator: Translator,
    pub templates: Templates,
    pub allocator: Box<dyn CodeAllocator>,
    pub gc: GarbageCollector,
}

impl Machine {
    /// Machine over `bus` with default cache, translator and an allocator
    /// that never fails.
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            cache: BlockCache::default(),
            translator: Translator::default(),
            templates: Templates::default(),
            allocator: Box::new(Unbounded),
            gc: GarbageCollector::new(),
        }
    }

    /// Machine with a single RAM region as described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, BusError> {
        let ram = MemoryRegion::new(
            "ram",
            MemorySize(config.ram_size),
            Address(config.ram_base),
        )?;
        let bus = Bus::builder().with_region(ram)?.build();
        let allocator: Box<dyn CodeAllocator> = match config.code_budget {
            Some(budget) => Box::new(BudgetAllocator::new(budget)),
            None => Box::new(Unbounded),
        };
        Ok(Self {
            bus,
            cache: BlockCache::new(config.slots),
            translator: Translator::new(Box::new(CopyDecoder), config.max_instructions),
            templates: Templates::default(),
            allocator,
            gc: GarbageCollector::new(),
        })
    }

    /// Get the translated block for `entry`, compiling it on a miss.
    ///
    /// On success the block's usage accounts for this call: a fresh block has
    /// usage 1, every later call adds 1. The returned reference must not be
    /// kept past the next call, which may evict the block.
    pub fn resolve(&mut self, entry: Address) -> Result<&TranslatedBlock, ResolveError> {
        if let Some(position) = self.cache.lookup_position(entry) {
            return Ok(self.cache.block_at(position));
        }
        let block = self.compile(entry)?;
        log::trace!(
            target: tracing::TraceItem::Compile.as_str(),
            "compiled {block:?}"
        );
        Ok(self.cache.insert_or_replace(block))
    }

    /// Compile the block at `entry` without caching it.
    fn compile(&mut self, entry: Address) -> Result<TranslatedBlock, ResolveError> {
        let translate_err = |error| ResolveError::Translate { entry, error };

        let sizing = self
            .translator
            .size_pass(&self.bus, entry)
            .map_err(translate_err)?;
        let units = self.templates.prologue.len() + sizing.units + self.templates.epilogue.len();
        let mut code = self.allocate(entry, units)?;

        let (prologue, rest) = code.split_at_mut(self.templates.prologue.len());
        prologue.copy_from_slice(&self.templates.prologue);
        let (body, epilogue) = rest.split_at_mut(sizing.units);
        self.translator
            .emit_pass(&self.bus, entry, &sizing, body)
            .map_err(translate_err)?;
        epilogue.copy_from_slice(&self.templates.epilogue);

        Ok(TranslatedBlock {
            entry,
            guest_end: sizing.guest_end,
            body_len: sizing.units,
            instructions: sizing.instructions,
            usage: 1,
            code,
        })
    }

    /// Allocate a block buffer, evicting blocks until the allocator succeeds.
    fn allocate(&mut self, entry: Address, units: usize) -> Result<CodeBuffer, ResolveError> {
        loop {
            if let Some(buffer) = self.allocator.allocate(units) {
                if buffer.len() != units {
                    log::error!(
                        "{:?} returned {} code units instead of {units}",
                        self.allocator,
                        buffer.len()
                    );
                    return Err(ResolveError::BadAllocation {
                        entry,
                        requested_units: units,
                        allocated_units: buffer.len(),
                    });
                }
                return Ok(buffer);
            }
            log::debug!(
                target: tracing::TraceItem::Gc.as_str(),
                "could not allocate {units} code units for block {entry}, sweeping"
            );
            if self.gc.sweep_once(&mut self.cache) == 0 {
                log::error!(
                    "Out of code memory for block {entry} with {} blocks cached",
                    self.cache.len()
                );
                return Err(ResolveError::ResourceExhausted {
                    entry,
                    requested_units: units,
                    footprint: self.cache.footprint(),
                });
            }
        }
    }

    /// Write guest memory and drop translations of the bytes written.
    pub fn write_8(&mut self, address: Address, value: u8) -> Result<(), BusError> {
        self.bus.write_8(address, value)?;
        self.cache.invalidate(address);
        Ok(())
    }

    pub fn write_16(&mut self, address: Address, value: u16) -> Result<(), BusError> {
        self.bus.write_16(address, value)?;
        self.cache
            .invalidate_range(address..address.wrapping_add(2));
        Ok(())
    }

    pub fn write_32(&mut self, address: Address, value: u32) -> Result<(), BusError> {
        self.bus.write_32(address, value)?;
        self.cache
            .invalidate_range(address..address.wrapping_add(4));
        Ok(())
    }

    /// Free every translated block. Must run before the process exits.
    pub fn teardown(&mut self) {
        log::info!(
            "tearing down {} blocks ({} code units), {:?}, {} sweeps evicted {} blocks",
            self.cache.len(),
            self.cache.footprint(),
            self.cache.stats(),
            self.gc.sweeps,
            self.gc.evicted,
        );
        self.cache.teardown();
    }
}
