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

use std::{borrow::Cow, num::NonZero, path::PathBuf};

use clap::Parser;
use monkeyjit::{
    config::Config,
    memory::{Address, MemorySize, DEFAULT_LOAD_ADDRESS},
    tracing::TraceItem,
};

fn maybe_hex(s: &str) -> Result<u32, Cow<'static, str>> {
    const HEX_PREFIX: &str = "0x";
    const HEX_PREFIX_UPPER: &str = "0X";
    const HEX_PREFIX_LEN: usize = HEX_PREFIX.len();

    let result = if s.starts_with(HEX_PREFIX) || s.starts_with(HEX_PREFIX_UPPER) {
        u32::from_str_radix(&s[HEX_PREFIX_LEN..], 16)
    } else {
        s.parse::<u32>()
    };

    result.map_err(|err| Cow::Owned(err.to_string()))
}

fn address(s: &str) -> Result<Address, Cow<'static, str>> {
    maybe_hex(s).map(Address)
}

fn memory_size(s: &str) -> Result<MemorySize, Cow<'static, str>> {
    fn err<A>(_: A) -> Cow<'static, str> {
        Cow::Borrowed(
            "Expected decimal or hexadecimal value, with optional suffixes: B (bytes), K/KiB \
             (Kibibytes) or M/MiB (Mibibytes). (A kibibyte is 1024 bytes)",
        )
    }
    fn non_zero_map(value: Result<u32, Cow<'static, str>>) -> Result<MemorySize, Cow<'static, str>> {
        MemorySize::new(value?).ok_or(Cow::Borrowed("Memory size must be non-zero"))
    }
    fn scaled(s: &str, unit: NonZero<u32>, name: &str) -> Result<MemorySize, Cow<'static, str>> {
        let value = non_zero_map(maybe_hex(s).map_err(err))?;
        value
            .get()
            .checked_mul(unit.get())
            .and_then(MemorySize::new)
            .ok_or_else(|| {
                Cow::Owned(format!(
                    "{}{name} is too large to be represented in 32 bits",
                    value.get()
                ))
            })
    }
    if let Ok(num) = maybe_hex(s) {
        return non_zero_map(Ok(num));
    }
    if let Some(s) = s.strip_suffix("KiB").or_else(|| s.strip_suffix("K")) {
        return scaled(s, MemorySize::KiB, "KiB");
    }
    if let Some(s) = s.strip_suffix("MiB").or_else(|| s.strip_suffix("M")) {
        return scaled(s, MemorySize::MiB, "MiB");
    }
    if let Some(s) = s.strip_suffix("B") {
        return non_zero_map(maybe_hex(s).map_err(err));
    }

    Err(err(()))
}

/// 68000 translation cache explorer
///
/// Loads a raw 68000 image and translates the block at the entry address and
/// every block that follows it, then prints what ended up in the cache.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Trace events to log.
    #[arg(long, value_delimiter = ',')]
    pub trace: Vec<TraceItem>,
    /// JSON configuration file. Command-line options override its values.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
    /// Hexadecimal or decimal value of the address to load the binary in to.
    #[arg(long, default_value_t = Address(DEFAULT_LOAD_ADDRESS), value_parser = address)]
    pub load_address: Address,
    /// Address of the first block to translate. Defaults to the load address.
    #[arg(long, value_parser = address)]
    pub entry: Option<Address>,
    /// Number of blocks to translate.
    #[arg(long, default_value_t = 64)]
    pub blocks: usize,
    /// Number of cache hash slots (preferably a prime).
    #[arg(long)]
    pub slots: Option<NonZero<usize>>,
    /// Maximum guest instructions per block.
    #[arg(long)]
    pub max_instructions: Option<NonZero<usize>>,
    /// Total code units translated blocks may occupy.
    #[arg(long)]
    pub code_budget: Option<usize>,
    /// Size of guest RAM, starting at address zero unless configured otherwise.
    #[arg(long, value_parser = memory_size)]
    pub memory: Option<MemorySize>,
    /// Print the code units of every translated block.
    #[arg(long)]
    pub dump: bool,

    /// Path to binary file containing 68000 instructions (NOT an ELF or hunk file!)
    #[arg(value_name = "BINARY")]
    pub binary: Option<PathBuf>,
}

impl Args {
    /// Parse command-line arguments from the process environment.
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Configuration file values with command-line overrides applied.
    pub fn config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match self.config {
            Some(ref path) => Config::from_path(path)?,
            None => Config::default(),
        };
        if let Some(slots) = self.slots {
            config.slots = slots;
        }
        if let Some(max_instructions) = self.max_instructions {
            config.max_instructions = max_instructions;
        }
        if self.code_budget.is_some() {
            config.code_budget = self.code_budget;
        }
        if let Some(memory) = self.memory {
            config.ram_size = memory.0;
        }
        let ram_end = u64::from(config.ram_base) + u64::from(config.ram_size.get());
        if u64::from(self.load_address.0) < u64::from(config.ram_base)
            || u64::from(self.load_address.0) >= ram_end
        {
            return Err(format!(
                "Invalid arguments: Given load address {} is outside of RAM {}-{:#x}.",
                self.load_address,
                Address(config.ram_base),
                ram_end
            )
            .into());
        }
        Ok(config)
    }
}
