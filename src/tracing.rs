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

//! Log targets and logger initialisation.

use std::collections::BTreeSet;

pub use log::LevelFilter;

/// Log targets that can be switched on individually at trace level.
#[derive(Copy, Clone, Ord, PartialOrd, PartialEq, Eq, Debug, clap::ValueEnum)]
pub enum TraceItem {
    BlockLookup,
    Compile,
    Gc,
    Invalidate,
    Memory,
}

impl TraceItem {
    pub const POSSIBLE_VALUES: &[Self] = &[
        Self::BlockLookup,
        Self::Compile,
        Self::Gc,
        Self::Invalidate,
        Self::Memory,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BlockLookup => "block_lookup",
            Self::Compile => "compile",
            Self::Gc => "gc",
            Self::Invalidate => "invalidate",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for TraceItem {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

impl std::str::FromStr for TraceItem {
    type Err = Box<dyn std::error::Error>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for i in Self::POSSIBLE_VALUES.iter() {
            if i.as_str() == s {
                return Ok(*i);
            }
        }
        Err(Box::<dyn std::error::Error>::from(format!(
            "Expected one of {}",
            Self::POSSIBLE_VALUES
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<&str>>()
                .join(", ")
        )))
    }
}

/// Maps a `-v` count to a level filter.
pub const fn verbosity_to_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger.
///
/// Targets in `events` log at trace level, the remaining ones are capped at
/// `log_level`. `RUST_LOG` directives are applied on top.
pub fn init(log_level: LevelFilter, events: &BTreeSet<TraceItem>) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level);
    for item in TraceItem::POSSIBLE_VALUES {
        let level = if events.contains(item) {
            LevelFilter::Trace
        } else {
            log_level.min(LevelFilter::Debug)
        };
        builder.filter(Some(item.as_str()), level);
    }
    builder.parse_default_env();
    if let Err(err) = builder.try_init() {
        log::warn!("logger already initialised: {err}");
    }
}
