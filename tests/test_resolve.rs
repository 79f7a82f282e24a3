// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the monkeyjit project.

use std::cell::Cell;

use monkeyjit::{
    follow_blocks,
    jit::{
        BudgetAllocator, CodeAllocator, CodeBuffer, TranslateError, Translator,
        DEFAULT_MAX_INSTRUCTIONS,
    },
    machine::ResolveError,
    memory::{Address, BusError},
};

mod utils;

use utils::*;

#[test_log::test]
fn test_resolve_twice_reuses_block() {
    let mut machine = make_test_machine();
    write_code(&mut machine, 0x1000, &[MOVEQ, NOP, 0x203c, 0x1234, 0x5678, RTS]);
    let calls = install_counting_decoder(&mut machine);

    let first = machine.resolve(Address(0x1000)).unwrap();
    assert_eq!(first.usage, 1);
    assert_eq!(first.instructions, 4);
    assert_eq!(first.guest_end, Address(0x100c));
    let first_code = first.code.to_vec();
    // Both passes walk the four instructions.
    assert_eq!(calls.get(), 8);

    let second = machine.resolve(Address(0x1000)).unwrap();
    assert_eq!(second.usage, 2);
    assert_eq!(*second.code, *first_code);
    assert_eq!(calls.get(), 8);
}

#[test_log::test]
fn test_block_layout() {
    let mut machine = make_test_machine();
    let body = [MOVEQ, 0x3481, 0x6600, 0x0010];
    write_code(&mut machine, 0x2000, &body);
    let templates = machine.templates.clone();

    let block = machine.resolve(Address(0x2000)).unwrap();
    assert_eq!(block.body_len, body.len());
    assert_eq!(block.code.len(), templates.overhead() + body.len());
    let (prologue, rest) = block.code.split_at(templates.prologue.len());
    let (translated, epilogue) = rest.split_at(body.len());
    assert_eq!(prologue, templates.prologue.as_slice());
    assert_eq!(translated, &body);
    assert_eq!(epilogue, templates.epilogue.as_slice());
}

#[test_log::test]
fn test_usage_counts_every_resolve() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    for n in 1..=25 {
        assert_eq!(machine.resolve(Address(0x1000)).unwrap().usage, n);
    }
    let stats = machine.cache.stats();
    assert_eq!((stats.misses, stats.hits, stats.inserts), (1, 24, 1));
}

#[test_log::test]
fn test_allocation_failure_sweeps_once() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000, 0x1002, 0x1004]);
    let allocator = install_flaky_allocator(&mut machine);
    machine.resolve(Address(0x1000)).unwrap();
    machine.resolve(Address(0x1000)).unwrap();
    machine.resolve(Address(0x1002)).unwrap();
    assert_eq!(machine.cache.len(), 2);

    allocator.fail_next(1);
    let attempts = allocator.attempts.get();
    let block = machine.resolve(Address(0x1004)).unwrap();
    assert_eq!((block.entry, block.usage), (Address(0x1004), 1));
    assert_eq!(allocator.attempts.get(), attempts + 2);
    assert_eq!(machine.gc.sweeps, 1);
    assert_eq!(machine.gc.evicted, 1);
    // 0x1002 had the lowest usage and went, 0x1000 survived with one less.
    assert!(machine.cache.peek(Address(0x1002)).is_none());
    assert_eq!(machine.cache.peek(Address(0x1000)).unwrap().usage, 1);
    assert_eq!(machine.cache.len(), 2);
}

#[test_log::test]
fn test_allocation_failure_with_empty_cache() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    let allocator = install_flaky_allocator(&mut machine);
    allocator.fail_next(usize::MAX);

    let err = machine.resolve(Address(0x1000)).unwrap_err();
    assert!(err.is_fatal());
    assert!(
        matches!(
            err,
            ResolveError::ResourceExhausted {
                entry: Address(0x1000),
                footprint: 0,
                ..
            }
        ),
        "{err:?}"
    );
    assert_eq!(allocator.attempts.get(), 1);
    assert_eq!(machine.gc.sweeps, 0);
    assert!(machine.cache.is_empty());
    assert!(machine.cache.peek(Address(0x1000)).is_none());
}

#[test_log::test]
fn test_allocation_failure_until_exhausted() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000, 0x1002, 0x1004, 0x1006]);
    let allocator = install_flaky_allocator(&mut machine);
    for (entry, resolves) in [(0x1000, 1), (0x1002, 2), (0x1004, 3)] {
        for _ in 0..resolves {
            machine.resolve(Address(entry)).unwrap();
        }
    }

    allocator.fail_next(usize::MAX);
    let err = machine.resolve(Address(0x1006)).unwrap_err();
    assert!(matches!(err, ResolveError::ResourceExhausted { .. }));
    // Every sweep removes the single block with the lowest usage.
    assert_eq!(machine.gc.sweeps, 3);
    assert_eq!(machine.gc.evicted, 3);
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_code_budget_pressure() {
    let mut machine = make_test_machine();
    let overhead = machine.templates.overhead();
    // Room for four one-unit blocks.
    let allocator = BudgetAllocator::new(4 * (overhead + 1));
    let ledger = allocator.ledger();
    machine.allocator = Box::new(allocator);
    let entries = (0..32_u32).map(|i| 0x1000 + i * 2).collect::<Vec<_>>();
    write_returns(&mut machine, entries.iter().copied());

    for (i, entry) in entries.iter().enumerate() {
        // Keep the first block hot.
        machine.resolve(Address(entries[0])).unwrap();
        let block = machine.resolve(Address(*entry)).unwrap();
        assert_eq!(block.entry, Address(*entry));
        assert!(machine.cache.footprint() <= 4 * (overhead + 1), "at block {i}");
        assert_eq!(ledger.live_units(), machine.cache.footprint(), "at block {i}");
    }
    assert!(machine.gc.sweeps > 0);
    assert!(machine.cache.peek(Address(entries[0])).is_some());
}

#[test_log::test]
fn test_block_larger_than_budget() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    machine.allocator = Box::new(BudgetAllocator::new(1));
    let err = machine.resolve(Address(0x1000)).unwrap_err();
    assert!(matches!(
        err,
        ResolveError::ResourceExhausted {
            requested_units, ..
        } if requested_units == 1 + machine.templates.overhead()
    ));
}

#[derive(Debug)]
struct ShortAllocator;

impl CodeAllocator for ShortAllocator {
    fn allocate(&mut self, units: usize) -> Option<CodeBuffer> {
        Some(CodeBuffer::zeroed(units - 1))
    }
}

#[test_log::test]
fn test_wrong_size_buffer_is_fatal() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    machine.allocator = Box::new(ShortAllocator);
    let units = machine.templates.overhead() + 1;
    let err = machine.resolve(Address(0x1000)).unwrap_err();
    assert!(err.is_fatal());
    assert!(
        matches!(
            err,
            ResolveError::BadAllocation {
                entry: Address(0x1000),
                requested_units,
                allocated_units,
            } if requested_units == units && allocated_units == units - 1
        ),
        "{err:?}"
    );
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_emission_overflow_is_fatal() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    machine.translator = Translator::new(
        Box::new(DriftingDecoder {
            walks: Cell::new(0),
            extra: 1,
        }),
        DEFAULT_MAX_INSTRUCTIONS,
    );
    let err = machine.resolve(Address(0x1000)).unwrap_err();
    assert!(err.is_fatal());
    assert!(
        matches!(
            err,
            ResolveError::Translate {
                error: TranslateError::Overflow { capacity: 1, .. },
                ..
            }
        ),
        "{err:?}"
    );
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_emission_shortfall_is_fatal() {
    let mut machine = make_test_machine();
    write_returns(&mut machine, [0x1000]);
    machine.translator = Translator::new(
        Box::new(ShrinkingDecoder::default()),
        DEFAULT_MAX_INSTRUCTIONS,
    );
    let err = machine.resolve(Address(0x1000)).unwrap_err();
    assert!(err.is_fatal());
    let ResolveError::Translate {
        error: TranslateError::Inconsistent { sized, emitted, .. },
        ..
    } = &err
    else {
        panic!("{err:?}");
    };
    assert_eq!((sized.units, emitted.units), (1, 0));
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_bad_entry_points() {
    let mut machine = make_test_machine();
    let err = machine.resolve(Address(0x20000)).unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(
        err,
        ResolveError::Translate {
            error: TranslateError::Bus(BusError::Unmapped(Address(0x20000))),
            ..
        }
    ));
    let err = machine.resolve(Address(0x1001)).unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Translate {
            error: TranslateError::Bus(BusError::Misaligned(_)),
            ..
        }
    ));
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_guest_writes_invalidate() {
    let mut machine = make_test_machine();
    write_code(&mut machine, 0x1000, &[NOP, NOP, RTS]);
    write_returns(&mut machine, [0x2000]);
    let calls = install_counting_decoder(&mut machine);
    machine.resolve(Address(0x1000)).unwrap();
    machine.resolve(Address(0x2000)).unwrap();
    let compiled = calls.get();

    // Data writes elsewhere keep the translations.
    machine.write_32(Address(0x3000), 0xdead_beef).unwrap();
    assert_eq!(machine.cache.len(), 2);

    // Patch the second nop into moveq.
    machine.write_16(Address(0x1002), MOVEQ).unwrap();
    assert!(machine.cache.peek(Address(0x1000)).is_none());
    assert!(machine.cache.peek(Address(0x2000)).is_some());
    let block = machine.resolve(Address(0x1000)).unwrap();
    assert_eq!(block.usage, 1);
    let prologue = machine.templates.prologue.len();
    let block = machine.cache.peek(Address(0x1000)).unwrap();
    assert_eq!(&block.code[prologue..prologue + 3], &[NOP, MOVEQ, RTS]);
    assert!(calls.get() > compiled);

    machine.write_8(Address(0x2001), 0x71).unwrap();
    assert!(machine.cache.peek(Address(0x2000)).is_none());
}

#[test_log::test]
fn test_aliased_writes_invalidate() {
    let mut machine = make_test_machine();
    write_code(&mut machine, 0x1000, &[NOP, NOP, RTS]);
    machine.resolve(Address(0x1000)).unwrap();

    // Bits 24..31 are not decoded, so this is the second nop.
    machine.write_16(Address(0x0100_1002), MOVEQ).unwrap();
    assert!(machine.cache.peek(Address(0x1000)).is_none());

    let block = machine.resolve(Address(0x0100_1000)).unwrap();
    assert_eq!(block.guest_end, Address(0x0100_1006));
    let prologue = machine.templates.prologue.len();
    let block = machine.cache.peek(Address(0x0100_1000)).unwrap();
    assert_eq!(&block.code[prologue..prologue + 3], &[NOP, MOVEQ, RTS]);

    machine.write_8(Address(0x1005), 0x70).unwrap();
    assert!(machine.cache.peek(Address(0x0100_1000)).is_none());
    assert!(machine.cache.is_empty());
}

#[test_log::test]
fn test_follow_blocks() {
    let mut machine = make_test_machine();
    // Three blocks ending in branches, then a trap.
    write_code(
        &mut machine,
        0x1000,
        &[MOVEQ, 0x6002, NOP, 0x6600, 0x0004, 0x4e5e, 0x4e75, 0x4e4f],
    );
    let summaries = follow_blocks(&mut machine, Address(0x1000), 4).unwrap();
    let ranges = summaries
        .iter()
        .map(|s| (s.entry.0, s.guest_end.0, s.instructions))
        .collect::<Vec<_>>();
    assert_eq!(
        ranges,
        vec![
            (0x1000, 0x1004, 2),
            (0x1004, 0x100a, 2),
            (0x100a, 0x100e, 2),
            (0x100e, 0x1010, 1),
        ]
    );
    assert!(summaries.iter().all(|s| s.usage == 1));

    // Running off the end of RAM ends the walk.
    let mut machine = make_test_machine();
    write_code(&mut machine, 0x1fffc, &[RTS, MOVEQ]);
    let summaries = follow_blocks(&mut machine, Address(0x1fffc), usize::MAX).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(machine.cache.len(), 1);
}

#[test_log::test]
fn test_teardown() {
    let mut machine = make_test_machine();
    let entries = (0..10_u32).map(|i| 0x1000 + i * 4).collect::<Vec<_>>();
    write_returns(&mut machine, entries.iter().copied());
    for entry in &entries {
        machine.resolve(Address(*entry)).unwrap();
    }
    assert_eq!(machine.cache.len(), 10);
    machine.teardown();
    for entry in entries {
        assert!(machine.cache.lookup(Address(entry)).is_none());
    }
}
