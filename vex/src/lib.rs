//! Assembles 8086 assembly source (or loads an already-assembled
//! [`vexfile::Executable`]) and runs it to completion under
//! [`vcpu::Machine`]: load the segments and the built-in ISR stubs into a
//! fresh [`vcpu::memory::Memory`], point the segment registers at the
//! entry point, and drive the machine's tick loop.

pub mod stubs;

use std::path::Path;

use vcpu::memory::{Memory, StorageMut};
use vcpu::register::SegmentRegisters;
use vcpu::{constants, Machine, MachineIo, RunOutcome, SegmentId};
use vexfile::Executable;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Assembly(#[from] vasm::Error),
    #[error(transparent)]
    Cpu(#[from] vcpu::Error),
    #[error(transparent)]
    Vexfile(#[from] vexfile::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Assemble `source` and run it to completion under `io`. Returns the
/// finished [`Machine`] (so its final register/flag state can be
/// inspected) and the [`RunOutcome`] it stopped on.
pub fn assemble_and_run<IO: MachineIo>(
    source: &str,
    io: IO,
) -> Result<(Machine<IO>, RunOutcome)> {
    let (executable, _source_map) = vasm::assemble(source)?;
    run_executable(&executable, io)
}

/// Load a previously-assembled `.vex` container from `path` (as written by
/// `vasm -o`) and run it, without re-assembling anything. The counterpart
/// to [`assemble_and_run`] for the "persisted executable" half of the
/// external interface.
pub fn run_vexfile<IO: MachineIo, P: AsRef<Path>>(
    path: P,
    io: IO,
) -> Result<(Machine<IO>, RunOutcome)> {
    let executable = vexfile::read_file(path)?;
    run_executable(&executable, io)
}

/// Load an already-assembled [`Executable`] and the bundled ISR stubs into
/// a fresh [`Memory`], and run it to completion under `io`.
fn run_executable<IO: MachineIo>(executable: &Executable, io: IO) -> Result<(Machine<IO>, RunOutcome)> {
    let mut memory = Memory::new();
    for segment in &executable.segments {
        let base = constants::physical_address(segment.base, 0);
        memory.blit(base, &segment.slots)?;
    }
    stubs::install(&mut memory)?;

    let entry_base = executable
        .segment(executable.entry_segment)
        .map(|image| image.base)
        .unwrap_or(constants::DEFAULT_CS);
    let segments = SegmentRegisters {
        cs: entry_base,
        ds: segment_base(executable, SegmentId::DS, constants::DEFAULT_DS),
        ss: segment_base(executable, SegmentId::SS, constants::DEFAULT_SS),
        es: segment_base(executable, SegmentId::ES, constants::DEFAULT_ES),
        ip: executable.entry_offset,
    };

    let mut machine = Machine::new(segments, memory, io);
    let outcome = machine.run()?;
    Ok((machine, outcome))
}

fn segment_base(executable: &Executable, register: SegmentId, default: u16) -> u16 {
    executable.segment(register).map(|image| image.base).unwrap_or(default)
}

#[cfg(test)]
mod test;
