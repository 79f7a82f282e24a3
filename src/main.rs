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

use std::collections::BTreeSet;

use monkeyjit::{follow_blocks, machine::Machine, tracing};

mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Args::parse();
    tracing::init(
        tracing::verbosity_to_level(args.verbose),
        &args.trace.iter().copied().collect::<BTreeSet<_>>(),
    );
    let config = args.config()?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let Some(ref binary) = args.binary else {
        return Err("No BINARY given.".into());
    };
    let input = std::fs::read(binary)
        .map_err(|err| format!("Could not read {}: {err}", binary.display()))?;

    let mut machine = Machine::from_config(&config)?;
    machine.bus.load(args.load_address, &input)?;
    log::info!(
        "Loaded {} bytes at {} with {} cache slots",
        input.len(),
        args.load_address,
        machine.cache.slot_count()
    );

    let entry = args.entry.unwrap_or(args.load_address);
    let result = follow_blocks(&mut machine, entry, args.blocks);
    let summaries = match result {
        Ok(summaries) => summaries,
        Err(err) => {
            machine.teardown();
            return Err(err.into());
        }
    };
    for summary in &summaries {
        println!("{summary}");
        if args.dump {
            if let Some(block) = machine.cache.peek(summary.entry) {
                let words = block
                    .code
                    .iter()
                    .map(|w| format!("{w:04x}"))
                    .collect::<Vec<_>>();
                for line in words.chunks(8) {
                    println!("    {}", line.join(" "));
                }
            } else {
                println!("    (evicted)");
            }
        }
    }
    let stats = machine.cache.stats();
    println!(
        "{} blocks cached, {} code units, {} hits, {} misses, {} sweeps evicted {} blocks",
        machine.cache.len(),
        machine.cache.footprint(),
        stats.hits,
        stats.misses,
        machine.gc.sweeps,
        machine.gc.evicted
    );
    machine.teardown();
    Ok(())
}
