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

//! Two-pass translation of guest instructions into block bodies.
//!
//! A block is compiled by walking the guest instructions from its entry
//! address twice. The first walk only counts the host code units each
//! instruction translates to, so that the block buffer can be allocated at its
//! exact size. The second walk writes them into the buffer. Both walks run the
//! same [`Translator::walk`] and only differ in the [`CodeSink`] they pass to
//! the decode table.

use std::num::NonZero;

use crate::{
    memory::{Address, Bus, BusError},
    tracing,
};

mod buffer;
mod decode;

pub use buffer::*;
pub use decode::*;

/// Default upper bound of guest instructions per block.
pub const DEFAULT_MAX_INSTRUCTIONS: NonZero<usize> = NonZero::new(256).unwrap();

#[derive(Debug)]
pub enum TranslateError {
    /// The walk could not fetch an instruction word.
    Bus(BusError),
    /// The emission pass tried to write past the buffer sized for it.
    Overflow { entry: Address, capacity: usize },
    /// The emission pass disagreed with the sizing pass.
    Inconsistent {
        entry: Address,
        sized: Sizing,
        emitted: Sizing,
    },
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Bus(err) => write!(fmt, "Could not fetch guest instruction: {err}"),
            Self::Overflow { entry, capacity } => write!(
                fmt,
                "Translation of block {entry} overflowed its buffer of {capacity} code units."
            ),
            Self::Inconsistent {
                entry,
                sized,
                emitted,
            } => write!(
                fmt,
                "Translation of block {entry} is inconsistent between passes: sized {sized:?}, \
                 emitted {emitted:?}."
            ),
        }
    }
}

impl std::error::Error for TranslateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BusError> for TranslateError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl TranslateError {
    /// Whether the error means a decode table bug rather than a bad entry point.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Overflow { .. } | Self::Inconsistent { .. })
    }
}

/// Result of walking a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Sizing {
    /// Translated body length in host code units.
    pub units: usize,
    /// Number of guest instructions in the block.
    pub instructions: usize,
    /// First guest address after the block.
    pub guest_end: Address,
}

/// Destination for translated code units.
pub trait CodeSink {
    fn emit(&mut self, units: &[u16]) -> Result<(), TranslateError>;

    /// Code units emitted so far.
    fn len(&self) -> usize;
}

/// Sizing pass sink: counts, never writes.
#[derive(Debug, Default)]
pub struct SizingSink {
    units: usize,
}

impl CodeSink for SizingSink {
    #[inline]
    fn emit(&mut self, units: &[u16]) -> Result<(), TranslateError> {
        self.units += units.len();
        Ok(())
    }

    #[inline]
    fn len(&self) -> usize {
        self.units
    }
}

/// Emission pass sink over a buffer of fixed capacity.
#[derive(Debug)]
pub struct BufferSink<'a> {
    entry: Address,
    destination: &'a mut [u16],
    position: usize,
}

impl<'a> BufferSink<'a> {
    pub fn new(entry: Address, destination: &'a mut [u16]) -> Self {
        Self {
            entry,
            destination,
            position: 0,
        }
    }
}

impl CodeSink for BufferSink<'_> {
    fn emit(&mut self, units: &[u16]) -> Result<(), TranslateError> {
        let end = self.position + units.len();
        let Some(slot) = self.destination.get_mut(self.position..end) else {
            return Err(TranslateError::Overflow {
                entry: self.entry,
                capacity: self.destination.len(),
            });
        };
        slot.copy_from_slice(units);
        self.position = end;
        Ok(())
    }

    #[inline]
    fn len(&self) -> usize {
        self.position
    }
}

/// Cursor that fetches guest instruction words through the bus.
#[derive(Debug)]
pub struct Fetch<'a> {
    bus: &'a Bus,
    pc: Address,
}

impl<'a> Fetch<'a> {
    pub fn new(bus: &'a Bus, pc: Address) -> Self {
        Self { bus, pc }
    }

    /// Address of the next word to be fetched.
    #[inline]
    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn next_word(&mut self) -> Result<u16, TranslateError> {
        let word = self.bus.fetch_16(self.pc)?;
        self.pc = self.pc.wrapping_add(2);
        Ok(word)
    }
}

/// Fixed host code that wraps every block body.
///
/// The prologue saves the host context and switches to the guest one, the
/// epilogue does the opposite and hands the next guest address back to the
/// execution driver. Both are copied verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Templates {
    pub prologue: Vec<u16>,
    pub epilogue: Vec<u16>,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            // movem.l d0-d7/a0-a6,-(sp)
            prologue: vec![0x48e7, 0xfffe],
            // movem.l (sp)+,d0-d7/a0-a6
            // rts
            epilogue: vec![0x4cdf, 0x7fff, 0x4e75],
        }
    }
}

impl Templates {
    /// Code units each block carries on top of its body.
    #[inline]
    pub fn overhead(&self) -> usize {
        self.prologue.len() + self.epilogue.len()
    }
}

/// Walks guest code and drives the decode table.
#[derive(Debug)]
pub struct Translator {
    decoder: Box<dyn DecodeTable>,
    max_instructions: NonZero<usize>,
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(Box::new(CopyDecoder), DEFAULT_MAX_INSTRUCTIONS)
    }
}

impl Translator {
    pub fn new(decoder: Box<dyn DecodeTable>, max_instructions: NonZero<usize>) -> Self {
        Self {
            decoder,
            max_instructions,
        }
    }

    /// Translate instructions starting from `entry` into `sink`.
    ///
    /// The walk ends after the first instruction the decode table reports as a
    /// control transfer, or once `max_instructions` have been translated.
    fn walk(
        &self,
        bus: &Bus,
        entry: Address,
        sink: &mut dyn CodeSink,
    ) -> Result<Sizing, TranslateError> {
        if !entry.is_word_aligned() {
            return Err(BusError::Misaligned(entry).into());
        }
        let mut fetch = Fetch::new(bus, entry);
        let mut instructions = 0;
        while instructions < self.max_instructions.get() {
            let pc = fetch.pc();
            let flow = self.decoder.translate_instruction(&mut fetch, sink)?;
            instructions += 1;
            if flow.is_break() {
                log::trace!(
                    target: tracing::TraceItem::Compile.as_str(),
                    "block {entry} ends at control transfer {pc}"
                );
                break;
            }
        }
        Ok(Sizing {
            units: sink.len(),
            instructions,
            guest_end: fetch.pc(),
        })
    }

    /// First pass: size the body of the block at `entry` without writing.
    pub fn size_pass(&self, bus: &Bus, entry: Address) -> Result<Sizing, TranslateError> {
        let sizing = self.walk(bus, entry, &mut SizingSink::default())?;
        log::trace!(
            target: tracing::TraceItem::Compile.as_str(),
            "sized block {entry}: {sizing:?}"
        );
        Ok(sizing)
    }

    /// Second pass: write the body of the block at `entry` into `destination`.
    ///
    /// `destination` must be exactly `sized.units` long. Any difference from
    /// `sized` in the walk is reported as [`TranslateError::Inconsistent`].
    pub fn emit_pass(
        &self,
        bus: &Bus,
        entry: Address,
        sized: &Sizing,
        destination: &mut [u16],
    ) -> Result<(), TranslateError> {
        debug_assert_eq!(destination.len(), sized.units);
        let emitted = self.walk(bus, entry, &mut BufferSink::new(entry, destination))?;
        if emitted != *sized {
            return Err(TranslateError::Inconsistent {
                entry,
                sized: *sized,
                emitted,
            });
        }
        Ok(())
    }
}
