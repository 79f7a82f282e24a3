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

pub mod config;
pub mod jit;
pub mod machine;
pub mod memory;
pub mod tracing;

use machine::{Machine, ResolveError};
use memory::Address;

/// What [`follow_blocks`] saw of one resolved block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockSummary {
    pub entry: Address,
    pub guest_end: Address,
    pub instructions: usize,
    pub body_len: usize,
    pub units: usize,
    pub usage: u32,
}

impl std::fmt::Display for BlockSummary {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            fmt,
            "{:>#10x}-{:<#10x} {:>5} insns {:>6} units (body {:>6}) usage {}",
            self.entry.0,
            self.guest_end.0,
            self.instructions,
            self.units,
            self.body_len,
            self.usage
        )
    }
}

/// Resolve the block at `entry` and then the block right after each resolved
/// one, up to `limit` blocks.
///
/// This only translates. Stops early when the walk reaches guest memory that
/// cannot be fetched.
pub fn follow_blocks(
    machine: &mut Machine,
    entry: Address,
    limit: usize,
) -> Result<Vec<BlockSummary>, ResolveError> {
    let mut summaries = Vec::new();
    let mut pc = entry;
    while summaries.len() < limit {
        let block = match machine.resolve(pc) {
            Ok(block) => block,
            Err(err) if !err.is_fatal() && !summaries.is_empty() => {
                log::info!("Stopping at {pc}: {err}");
                break;
            }
            Err(err) => return Err(err),
        };
        summaries.push(BlockSummary {
            entry: block.entry,
            guest_end: block.guest_end,
            instructions: block.instructions,
            body_len: block.body_len,
            units: block.code.len(),
            usage: block.usage,
        });
        pc = block.guest_end;
    }
    Ok(summaries)
}
