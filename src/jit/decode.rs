// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

//! Guest instruction decoding.
//!
//! The [`DecodeTable`] trait is the seam between the block walker and the
//! per-opcode translation. [`CopyDecoder`] is the default table: 68000 code
//! runs natively on the host, so every instruction is copied one-to-one and
//! the decoder only needs to know how long each instruction is and whether it
//! leaves the block.

use std::ops::ControlFlow;

use bilge::prelude::*;

use crate::jit::{CodeSink, Fetch, TranslateError};

/// Longest 68000 instruction in words (e.g. `move.l #imm,abs.l`).
pub const MAX_INSTRUCTION_WORDS: usize = 5;

/// Maps guest instructions to host code.
pub trait DecodeTable: std::fmt::Debug {
    /// Consumes one guest instruction from `fetch` and emits its translation
    /// into `sink`.
    ///
    /// Returns [`ControlFlow::Break`] if the instruction transfers control, in
    /// which case it is the last one of its block. Implementations must behave
    /// identically for the same guest code regardless of the sink.
    fn translate_instruction(
        &self,
        fetch: &mut Fetch<'_>,
        sink: &mut dyn CodeSink,
    ) -> Result<ControlFlow<()>, TranslateError>;
}

#[bitsize(4)]
#[derive(Copy, Clone, FromBits, Debug, Eq, PartialEq)]
/// Instruction family, selected by the leading four opcode bits.
pub enum Line {
    BitImmediate = 0x0,
    MoveByte = 0x1,
    MoveLong = 0x2,
    MoveWord = 0x3,
    Miscellaneous = 0x4,
    AddqSubqScc = 0x5,
    Branch = 0x6,
    Moveq = 0x7,
    OrDiv = 0x8,
    Sub = 0x9,
    LineA = 0xa,
    CmpEor = 0xb,
    AndMul = 0xc,
    Add = 0xd,
    ShiftRotate = 0xe,
    LineF = 0xf,
}

#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits)]
/// Common 68000 opcode word layout.
pub struct Opcode {
    /// `ea_reg[2:0]`
    pub ea_reg: u3,
    /// `ea_mode[5:3]`
    pub ea_mode: u3,
    /// `size[7:6]`
    pub size: u2,
    /// `[8:8]`, direction or operation mode bit depending on the family.
    pub bit8: bool,
    /// `reg[11:9]`
    pub reg: u3,
    /// `line[15:12]`
    pub line: Line,
}

impl Opcode {
    /// Destination mode of a `move`, which occupies bits `[8:6]`.
    #[inline]
    fn move_dst_mode(&self) -> u8 {
        (u8::from(self.bit8()) << 2) | self.size().value()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandSize {
    Byte,
    Word,
    Long,
}

impl OperandSize {
    /// Standard two-bit size field. `0b11` is not a size, callers decode it
    /// per family.
    const fn from_field(field: u8) -> Option<Self> {
        match field {
            0b00 => Some(Self::Byte),
            0b01 => Some(Self::Word),
            0b10 => Some(Self::Long),
            _ => None,
        }
    }

    /// Size field of `move`.
    const fn from_move_field(field: u8) -> Option<Self> {
        match field {
            0b01 => Some(Self::Byte),
            0b11 => Some(Self::Word),
            0b10 => Some(Self::Long),
            _ => None,
        }
    }

    /// Words an immediate operand of this size occupies.
    const fn immediate_words(self) -> u8 {
        match self {
            Self::Byte | Self::Word => 1,
            Self::Long => 2,
        }
    }
}

/// Extension words of an effective address.
pub const fn ea_extension_words(mode: u8, reg: u8, size: OperandSize) -> u8 {
    match (mode, reg) {
        // Dn, An, (An), (An)+, -(An)
        (0..=4, _) => 0,
        // (d16,An), (d8,An,Xn)
        (5 | 6, _) => 1,
        // abs.W
        (7, 0) => 1,
        // abs.L
        (7, 1) => 2,
        // (d16,PC), (d8,PC,Xn)
        (7, 2 | 3) => 1,
        // #imm
        (7, 4) => size.immediate_words(),
        _ => 0,
    }
}

/// Length and block termination of one decoded instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Decoded {
    pub extension_words: u8,
    pub control_transfer: bool,
}

impl Decoded {
    const fn plain(extension_words: u8) -> Self {
        Self {
            extension_words,
            control_transfer: false,
        }
    }

    const fn transfer(extension_words: u8) -> Self {
        Self {
            extension_words,
            control_transfer: true,
        }
    }

    /// Total instruction length in words.
    #[inline]
    pub const fn words(&self) -> usize {
        1 + self.extension_words as usize
    }
}

/// Decode table that copies 68000 instructions verbatim.
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyDecoder;

impl CopyDecoder {
    /// Decodes the length of the instruction starting with `raw`.
    pub fn decode(raw: u16) -> Decoded {
        let op = Opcode::from(raw);
        let mode = op.ea_mode().value();
        let reg = op.ea_reg().value();
        let size = op.size().value();
        let ea = |size| ea_extension_words(mode, reg, size);

        match op.line() {
            Line::BitImmediate => {
                if op.bit8() {
                    // movep
                    if mode == 1 {
                        return Decoded::plain(1);
                    }
                    // btst/bchg/bclr/bset Dn,<ea>
                    return Decoded::plain(ea(OperandSize::Byte));
                }
                // Static bit operations take the bit number as an extension word.
                if op.reg().value() == 4 {
                    return Decoded::plain(1 + ea(OperandSize::Byte));
                }
                let size = OperandSize::from_field(size).unwrap_or(OperandSize::Word);
                // ori/andi/eori to ccr/sr
                if (mode, reg) == (7, 4) {
                    return Decoded::plain(size.immediate_words());
                }
                Decoded::plain(size.immediate_words() + ea(size))
            }
            Line::MoveByte | Line::MoveLong | Line::MoveWord => {
                let size = OperandSize::from_move_field((raw >> 12) as u8 & 0b11)
                    .unwrap_or(OperandSize::Word);
                Decoded::plain(
                    ea(size) + ea_extension_words(op.move_dst_mode(), op.reg().value(), size),
                )
            }
            Line::Miscellaneous => Self::decode_miscellaneous(op, raw),
            Line::AddqSubqScc => {
                match OperandSize::from_field(size) {
                    Some(size) => Decoded::plain(ea(size)),
                    // dbcc
                    None if mode == 1 => Decoded::transfer(1),
                    // scc
                    None => Decoded::plain(ea(OperandSize::Byte)),
                }
            }
            // bra/bsr/bcc: a zero 8-bit displacement selects a 16-bit one.
            Line::Branch => Decoded::transfer(u8::from(raw & 0xff == 0)),
            Line::Moveq => Decoded::plain(0),
            Line::LineA | Line::LineF => Decoded::transfer(0),
            Line::OrDiv | Line::AndMul => match OperandSize::from_field(size) {
                Some(size) => Decoded::plain(ea(size)),
                // divu/divs/mulu/muls
                None => Decoded::plain(ea(OperandSize::Word)),
            },
            Line::Sub | Line::CmpEor | Line::Add => match OperandSize::from_field(size) {
                Some(size) => Decoded::plain(ea(size)),
                // suba/cmpa/adda
                None if op.bit8() => Decoded::plain(ea(OperandSize::Long)),
                None => Decoded::plain(ea(OperandSize::Word)),
            },
            Line::ShiftRotate => match size {
                // Memory shifts operate on a word at <ea>.
                0b11 => Decoded::plain(ea(OperandSize::Word)),
                _ => Decoded::plain(0),
            },
        }
    }

    fn decode_miscellaneous(op: Opcode, raw: u16) -> Decoded {
        let mode = op.ea_mode().value();
        let reg = op.ea_reg().value();
        let ea = |size| ea_extension_words(mode, reg, size);

        match raw {
            // illegal, rte, rts, trapv, rtr
            0x4afc | 0x4e73 | 0x4e75 | 0x4e76 | 0x4e77 => return Decoded::transfer(0),
            // stop #imm
            0x4e72 => return Decoded::transfer(1),
            // reset, nop
            0x4e70 | 0x4e71 => return Decoded::plain(0),
            // trap #n
            0x4e40..=0x4e4f => return Decoded::transfer(0),
            // link An,#d16
            0x4e50..=0x4e57 => return Decoded::plain(1),
            // unlk, move usp
            0x4e58..=0x4e6f => return Decoded::plain(0),
            _ => {}
        }
        match raw & 0xffc0 {
            // jsr, jmp
            0x4e80 | 0x4ec0 => return Decoded::transfer(ea(OperandSize::Long)),
            _ => {}
        }
        // movem, excluding ext which shares the pattern with a data register
        if raw & 0xfb80 == 0x4880 && mode != 0 {
            return Decoded::plain(1 + ea(OperandSize::Word));
        }
        if op.bit8() {
            // lea, chk
            return match op.size().value() {
                0b11 => Decoded::plain(ea(OperandSize::Long)),
                _ => Decoded::plain(ea(OperandSize::Word)),
            };
        }
        // clr/neg/negx/not/tst/nbcd/pea/swap, move to and from sr/ccr, tas
        match OperandSize::from_field(op.size().value()) {
            Some(size) => Decoded::plain(ea(size)),
            None => Decoded::plain(ea(OperandSize::Word)),
        }
    }
}

impl DecodeTable for CopyDecoder {
    fn translate_instruction(
        &self,
        fetch: &mut Fetch<'_>,
        sink: &mut dyn CodeSink,
    ) -> Result<ControlFlow<()>, TranslateError> {
        let mut words = [0_u16; MAX_INSTRUCTION_WORDS];
        words[0] = fetch.next_word()?;
        let decoded = Self::decode(words[0]);
        debug_assert!(decoded.words() <= MAX_INSTRUCTION_WORDS, "{decoded:?}");
        for word in &mut words[1..decoded.words()] {
            *word = fetch.next_word()?;
        }
        sink.emit(&words[..decoded.words()])?;
        if decoded.control_transfer {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }
}
