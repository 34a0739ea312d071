//! The CPU driver: wires the bus interface unit, the execution unit, the
//! memory, and the host I/O surface together into one tick loop, and
//! knows how the loop is allowed to end.

use std::fmt;

use log::{debug, trace};

use crate::biu::BusInterfaceUnit;
use crate::error::Result;
use crate::eu::{ExecutionUnit, StepOutcome};
use crate::flags::FlagRegister;
use crate::io::MachineIo;
use crate::memory::{Memory, Storage, StorageMut};
use crate::register::{RegisterFile, SegmentRegisters};

/// Why the driver stopped ticking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// `HLT` was executed.
    Halted,
    /// `INT 3` fired; the driver finished the tick it was on and stopped.
    Breakpoint,
    /// `INT 21h/AH=00h` or `AH=4Ch` requested process exit.
    Exited(u8),
    /// The bus interface unit ran past the last instruction slot with
    /// nothing left to fetch (fell off the end of the program).
    EndOfProgram,
}

/// Owns every piece of emulated state and the host I/O surface a running
/// program needs. Generic over the [`MachineIo`] implementation so the
/// same driver serves both a real terminal (`StdIo`) and a scripted test
/// harness (`BufferIo`).
pub struct Machine<IO: MachineIo> {
    biu: BusInterfaceUnit,
    eu: ExecutionUnit,
    memory: Memory,
    io: IO,
}

impl<IO: MachineIo> Machine<IO> {
    pub fn new(segments: SegmentRegisters, memory: Memory, io: IO) -> Machine<IO> {
        Machine {
            biu: BusInterfaceUnit::new(segments),
            eu: ExecutionUnit::new(),
            memory,
            io,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.eu.registers
    }

    pub fn flags(&self) -> &FlagRegister {
        &self.eu.flags
    }

    pub fn biu(&self) -> &BusInterfaceUnit {
        &self.biu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn out_log(&self) -> &[String] {
        self.eu.out_log()
    }

    /// Run until a terminal [`RunOutcome`].
    pub fn run(&mut self) -> Result<RunOutcome> {
        loop {
            if let Some(outcome) = self.tick()? {
                return Ok(outcome);
            }
        }
    }

    /// Run one fetch/decode/execute cycle: top off the prefetch queue,
    /// dequeue one slot, and execute it if it is an instruction. Returns
    /// `None` to mean "keep running" and `Some` to mean the driver has
    /// reached a terminal [`RunOutcome`] — `HLT`, `INT 3`, a DOS exit
    /// service, or running off the end of the program (the BIU finds
    /// nothing left to fetch, or lands on a data byte it should never be
    /// pointed at).
    pub fn tick(&mut self) -> Result<Option<RunOutcome>> {
        use crate::operand::Slot;

        self.biu.run(&self.memory);
        if self.biu.queue_len() == 0 && !self.biu.remaining_instruction(&self.memory) {
            trace!("driver: no more instructions to fetch at ip={:#06x}", self.biu.ip());
            return Ok(Some(RunOutcome::EndOfProgram));
        }

        let slot = match self.biu.dequeue() {
            Some(slot) => slot,
            None => return Ok(Some(RunOutcome::EndOfProgram)),
        };

        let instruction = match slot {
            Slot::Instruction(instruction) => instruction,
            Slot::Data(_) | Slot::Empty => return Ok(Some(RunOutcome::EndOfProgram)),
        };

        debug!(
            "executing {:?} at cs:ip={:#06x}:{:#06x}",
            instruction.opcode,
            self.biu.cs(),
            self.biu.ip()
        );
        let outcome = self
            .eu
            .execute(&instruction, &mut self.biu, &mut self.memory, &mut self.io)?;

        Ok(match outcome {
            StepOutcome::Continue => None,
            StepOutcome::Halted => Some(RunOutcome::Halted),
            StepOutcome::Breakpoint => Some(RunOutcome::Breakpoint),
            StepOutcome::Exited(code) => Some(RunOutcome::Exited(code)),
        })
    }
}

impl<IO: MachineIo> fmt::Display for Machine<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.registers();
        let flags = self.flags();
        writeln!(
            f,
            "AX={:04x} BX={:04x} CX={:04x} DX={:04x} SP={:04x} BP={:04x} SI={:04x} DI={:04x}",
            regs.read16(crate::register::RegisterId::AX),
            regs.read16(crate::register::RegisterId::BX),
            regs.read16(crate::register::RegisterId::CX),
            regs.read16(crate::register::RegisterId::DX),
            regs.sp,
            regs.bp,
            regs.si,
            regs.di,
        )?;
        writeln!(
            f,
            "CS={:04x} DS={:04x} SS={:04x} ES={:04x} IP={:04x}",
            self.biu.cs(),
            self.biu.read_segment(crate::register::SegmentId::DS),
            self.biu.read_segment(crate::register::SegmentId::SS),
            self.biu.read_segment(crate::register::SegmentId::ES),
            self.biu.ip(),
        )?;
        write!(
            f,
            "flags: CF={} PF={} AF={} ZF={} SF={} TF={} IF={} DF={} OF={}",
            flags.carry as u8,
            flags.parity as u8,
            flags.auxiliary as u8,
            flags.zero as u8,
            flags.sign as u8,
            flags.trap as u8,
            flags.interrupt as u8,
            flags.direction as u8,
            flags.overflow as u8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BufferIo;
    use crate::operand::{Instruction, Opcode, Operand};
    use crate::register::RegisterId;

    fn segs(cs: u16, ip: u16) -> SegmentRegisters {
        SegmentRegisters { cs, ds: 0x2000, ss: 0x5000, es: 0x7000, ip }
    }

    #[test]
    fn run_halts_on_hlt() {
        let mut memory = Memory::new();
        let base = crate::constants::physical_address(0x3000, 0);
        memory
            .write_instruction(
                base,
                Instruction::new(
                    Opcode::MOV,
                    vec![Operand::Reg(RegisterId::AX), Operand::Imm(5)],
                ),
            )
            .unwrap();
        memory
            .write_instruction(base + 1, Instruction::new(Opcode::HLT, vec![]))
            .unwrap();

        let mut machine = Machine::new(segs(0x3000, 0), memory, BufferIo::default());
        let outcome = machine.run().unwrap();
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(machine.registers().read16(RegisterId::AX), 5);
    }

    #[test]
    fn run_reports_end_of_program_when_code_runs_out() {
        let mut memory = Memory::new();
        let base = crate::constants::physical_address(0x3000, 0);
        memory
            .write_instruction(base, Instruction::new(Opcode::NOP, vec![]))
            .unwrap();

        let mut machine = Machine::new(segs(0x3000, 0), memory, BufferIo::default());
        let outcome = machine.run().unwrap();
        assert_eq!(outcome, RunOutcome::EndOfProgram);
    }

    #[test]
    fn breakpoint_stops_the_driver_after_the_tick() {
        let mut memory = Memory::new();
        let base = crate::constants::physical_address(0x3000, 0);
        memory
            .write_instruction(base, Instruction::new(Opcode::INT, vec![Operand::Imm(3)]))
            .unwrap();

        let mut machine = Machine::new(segs(0x3000, 0), memory, BufferIo::default());
        let outcome = machine.run().unwrap();
        assert_eq!(outcome, RunOutcome::Breakpoint);
    }

    #[test]
    fn dos_print_string_service_writes_to_the_io_surface() {
        let mut memory = Memory::new();
        let code_base = crate::constants::physical_address(0x3000, 0);
        let data_base = crate::constants::physical_address(0x2000, 0);
        for (i, byte) in b"HI$".iter().enumerate() {
            memory.write_byte(data_base + i as u32, *byte).unwrap();
        }
        memory
            .write_instruction(
                code_base,
                Instruction::new(Opcode::MOV, vec![Operand::Reg(RegisterId::DX), Operand::Imm(0)]),
            )
            .unwrap();
        memory
            .write_instruction(
                code_base + 1,
                Instruction::new(Opcode::MOV, vec![Operand::Reg(RegisterId::AH), Operand::Imm(9)]),
            )
            .unwrap();
        memory
            .write_instruction(code_base + 2, Instruction::new(Opcode::INT, vec![Operand::Imm(0x21)]))
            .unwrap();
        memory
            .write_instruction(code_base + 3, Instruction::new(Opcode::HLT, vec![]))
            .unwrap();

        let mut machine = Machine::new(segs(0x3000, 0), memory, BufferIo::default());
        let outcome = machine.run().unwrap();
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(machine.io().output_string(), "HI");
    }
}
