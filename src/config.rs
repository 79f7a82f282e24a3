// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Machine configuration file.
//!
//! ```json
//! {
//!   "slots": 251,
//!   "max_instructions": 256,
//!   "code_budget": 65536,
//!   "ram_base": 0,
//!   "ram_size": 1048576
//! }
//! ```
//!
//! Every key is optional.

use std::{
    num::NonZero,
    path::{Path, PathBuf},
};

use serde_derive::{Deserialize, Serialize};

use crate::{jit::DEFAULT_MAX_INSTRUCTIONS, machine::DEFAULT_SLOTS, memory::MemorySize};

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Hash slots of the block cache.
    pub slots: NonZero<usize>,
    /// Upper bound of guest instructions per block.
    pub max_instructions: NonZero<usize>,
    /// Total code units blocks may occupy. Unlimited if absent.
    pub code_budget: Option<usize>,
    /// Guest address of RAM.
    pub ram_base: u32,
    /// RAM size in bytes.
    pub ram_size: NonZero<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            code_budget: None,
            ram_base: 0,
            ram_size: MemorySize::MiB,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        error: serde_json::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io { path, error } => {
                write!(fmt, "Could not read config file {}: {error}", path.display())
            }
            Self::Parse { path, error } => {
                write!(fmt, "Invalid config file {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { error, .. } => Some(error),
            Self::Parse { error, .. } => Some(error),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        serde_json::from_str(&contents).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }
}
