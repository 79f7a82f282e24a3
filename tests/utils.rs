// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

#![allow(dead_code)]

use std::{cell::Cell, ops::ControlFlow, rc::Rc};

use monkeyjit::{
    jit::{
        CodeAllocator, CodeBuffer, CodeLedger, CodeSink, CopyDecoder, DecodeTable, Fetch, TranslateError,
        Translator, DEFAULT_MAX_INSTRUCTIONS,
    },
    machine::{Machine, TranslatedBlock},
    memory::{Address, Bus, MemoryRegion, MemorySize},
};

pub const NOP: u16 = 0x4e71;
pub const RTS: u16 = 0x4e75;
/// `moveq #1,d0`
pub const MOVEQ: u16 = 0x7001;

/// Machine with 128KiB of RAM at address zero.
pub fn make_test_machine() -> Machine {
    let ram = MemoryRegion::new("ram", MemorySize::new(0x20000).unwrap(), Address(0)).unwrap();
    Machine::new(Bus::builder().with_region(ram).unwrap().build())
}

pub fn write_code(machine: &mut Machine, address: u32, words: &[u16]) {
    let bytes = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .collect::<Vec<u8>>();
    machine.bus.load(Address(address), &bytes).unwrap();
}

/// A one instruction block (`rts`) at every address in `addresses`.
pub fn write_returns(machine: &mut Machine, addresses: impl IntoIterator<Item = u32>) {
    for address in addresses {
        write_code(machine, address, &[RTS]);
    }
}

/// Block not produced by a translation, for exercising the cache directly.
pub fn make_block(entry: u32, units: usize) -> TranslatedBlock {
    TranslatedBlock {
        entry: Address(entry),
        guest_end: Address(entry + 2),
        body_len: units,
        instructions: 1,
        usage: 1,
        code: CodeBuffer::zeroed(units),
    }
}

/// Same as [`make_block`], with the code charged to `ledger`.
pub fn make_tracked_block(entry: u32, units: usize, ledger: &CodeLedger) -> TranslatedBlock {
    TranslatedBlock {
        code: CodeBuffer::zeroed_in(units, ledger),
        ..make_block(entry, 0)
    }
}

/// [`CopyDecoder`] that counts how many instructions it was asked to
/// translate.
#[derive(Debug, Default, Clone)]
pub struct CountingDecoder {
    pub calls: Rc<Cell<usize>>,
}

impl DecodeTable for CountingDecoder {
    fn translate_instruction(
        &self,
        fetch: &mut Fetch<'_>,
        sink: &mut dyn CodeSink,
    ) -> Result<ControlFlow<()>, TranslateError> {
        self.calls.set(self.calls.get() + 1);
        CopyDecoder.translate_instruction(fetch, sink)
    }
}

pub fn install_counting_decoder(machine: &mut Machine) -> Rc<Cell<usize>> {
    let decoder = CountingDecoder::default();
    let calls = Rc::clone(&decoder.calls);
    machine.translator = Translator::new(Box::new(decoder), DEFAULT_MAX_INSTRUCTIONS);
    calls
}

/// Decoder that emits `extra` more code units on every walk after the first.
#[derive(Debug)]
pub struct DriftingDecoder {
    pub walks: Cell<usize>,
    pub extra: usize,
}

impl DecodeTable for DriftingDecoder {
    fn translate_instruction(
        &self,
        fetch: &mut Fetch<'_>,
        sink: &mut dyn CodeSink,
    ) -> Result<ControlFlow<()>, TranslateError> {
        let opcode = fetch.next_word()?;
        let walk = self.walks.get();
        self.walks.set(walk + 1);
        let mut units = vec![opcode];
        if walk > 0 {
            units.extend(std::iter::repeat_n(NOP, self.extra));
        }
        sink.emit(&units)?;
        // Every instruction is its own block.
        Ok(ControlFlow::Break(()))
    }
}

/// Decoder that emits nothing on every walk after the first.
#[derive(Debug, Default)]
pub struct ShrinkingDecoder {
    pub walks: Cell<usize>,
}

impl DecodeTable for ShrinkingDecoder {
    fn translate_instruction(
        &self,
        fetch: &mut Fetch<'_>,
        sink: &mut dyn CodeSink,
    ) -> Result<ControlFlow<()>, TranslateError> {
        let opcode = fetch.next_word()?;
        let walk = self.walks.get();
        self.walks.set(walk + 1);
        if walk == 0 {
            sink.emit(&[opcode])?;
        }
        Ok(ControlFlow::Break(()))
    }
}

/// Allocator that fails a given number of times before succeeding, and
/// records every attempt.
#[derive(Debug, Default, Clone)]
pub struct FlakyAllocator {
    pub failures_left: Rc<Cell<usize>>,
    pub attempts: Rc<Cell<usize>>,
    pub allocated: Rc<Cell<usize>>,
}

impl FlakyAllocator {
    pub fn fail_next(&self, count: usize) {
        self.failures_left.set(count);
    }
}

impl CodeAllocator for FlakyAllocator {
    fn allocate(&mut self, units: usize) -> Option<CodeBuffer> {
        self.attempts.set(self.attempts.get() + 1);
        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return None;
        }
        self.allocated.set(self.allocated.get() + 1);
        Some(CodeBuffer::zeroed(units))
    }
}

pub fn install_flaky_allocator(machine: &mut Machine) -> FlakyAllocator {
    let allocator = FlakyAllocator::default();
    machine.allocator = Box::new(allocator.clone());
    allocator
}
