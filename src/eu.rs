//! The Execution Unit: the general-purpose register file, the flag
//! register, opcode dispatch, operand evaluation, and the
//! software-interrupt machinery (§4.6 of the design).
//!
//! The EU only ever sees one decoded [`Instruction`] at a time, handed to
//! it by [`crate::machine::Machine`]; it needs mutable access to the BIU
//! (for segment reads and `CS`/`IP` writes on control transfer) and to
//! memory (operand reads/writes, stack pushes/pops), both passed in
//! explicitly rather than held by reference, so the EU itself stays a
//! plain, independently testable struct.

use crate::biu::BusInterfaceUnit;
use crate::constants::physical_address;
use crate::error::{Error, Result};
use crate::flags::FlagRegister;
use crate::io::MachineIo;
use crate::memory::{Storage, StorageMut};
use crate::operand::{Instruction, Opcode, Operand, RepPrefix};
use crate::register::{RegisterFile, RegisterId, SegmentId};

/// What the driver should do after one [`ExecutionUnit::execute`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Keep ticking.
    Continue,
    /// `HLT` was executed.
    Halted,
    /// `INT 3` was executed; the driver stops after finishing this tick.
    Breakpoint,
    /// `INT 21h/AH=00h` or `AH=4Ch`; the process is exiting with this code.
    Exited(u8),
}

/// Mask of the low `width` bytes, for `width` in `{1, 2, 4}`.
fn mask(width: u8) -> u32 {
    match width {
        1 => 0xff,
        2 => 0xffff,
        _ => 0xffff_ffff,
    }
}

/// Reinterpret the low `width` bytes of `v` as a two's-complement signed
/// integer of that width.
pub fn to_signed(v: u32, width: u8) -> i32 {
    let bits = width as u32 * 8;
    let v = v & mask(width);
    if bits >= 32 {
        return v as i32;
    }
    let sign_bit = 1u32 << (bits - 1);
    if v & sign_bit != 0 {
        (v as i64 - (1i64 << bits)) as i32
    } else {
        v as i32
    }
}

/// Zero-extend/truncate a signed value to the low `width` bytes.
pub fn to_unsigned(v: i64, width: u8) -> u32 {
    (v as u64 & mask(width) as u64) as u32
}

fn parity_even(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// The 8086 general-purpose register file, flags, and the instruction
/// decode/execute/interrupt machinery.
pub struct ExecutionUnit {
    pub registers: RegisterFile,
    pub flags: FlagRegister,
    halted: bool,
    breakpoint: bool,
    exit_code: Option<u8>,
    /// Log of `OUT`-instruction traffic; §4.6 "OUT: append a formatted
    /// line to the EU's output buffer" — no real port device is modeled,
    /// so this is purely an observability aid, not program-visible I/O.
    out_log: Vec<String>,
}

impl ExecutionUnit {
    pub fn new() -> ExecutionUnit {
        ExecutionUnit {
            registers: RegisterFile::new(),
            flags: FlagRegister::new(),
            halted: false,
            breakpoint: false,
            exit_code: None,
            out_log: Vec::new(),
        }
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn breakpoint(&self) -> bool {
        self.breakpoint
    }

    pub fn exit_code(&self) -> Option<u8> {
        self.exit_code
    }

    pub fn out_log(&self) -> &[String] {
        &self.out_log
    }

    // ---- stack -----------------------------------------------------

    /// Pre-decrement `SP` by 2 and store `value` at `[SS:SP]` (invariant
    /// 4). `SP` must already be even.
    fn push_word(
        &mut self,
        biu: &BusInterfaceUnit,
        memory: &mut dyn StorageMut,
        value: u16,
    ) -> Result<()> {
        let sp = self.registers.sp;
        if sp % 2 != 0 {
            return Err(Error::UnalignedStackPointer { sp });
        }
        let new_sp = sp.wrapping_sub(2);
        let address = physical_address(biu.read_segment(SegmentId::SS), new_sp);
        memory.write_word(address, value)?;
        self.registers.sp = new_sp;
        Ok(())
    }

    /// Load the word at `[SS:SP]` and post-increment `SP` by 2.
    fn pop_word(&mut self, biu: &BusInterfaceUnit, memory: &dyn StorageMut) -> Result<u16> {
        let sp = self.registers.sp;
        if sp % 2 != 0 {
            return Err(Error::UnalignedStackPointer { sp });
        }
        let address = physical_address(biu.read_segment(SegmentId::SS), sp);
        let value = memory.read_word(address)?;
        self.registers.sp = sp.wrapping_add(2);
        Ok(value)
    }

    // ---- operand addressing/evaluation ------------------------------

    /// The segment a memory operand resolves against absent an explicit
    /// override: `SS` when `BP` is the base or index, `DS` otherwise
    /// (§4.6 "Memory operand").
    fn default_segment(base: Option<RegisterId>, index: Option<RegisterId>) -> SegmentId {
        let uses_bp = base == Some(RegisterId::BP) || index == Some(RegisterId::BP);
        if uses_bp {
            SegmentId::SS
        } else {
            SegmentId::DS
        }
    }

    fn effective_address(
        &self,
        biu: &BusInterfaceUnit,
        segment_override: Option<SegmentId>,
        base: Option<RegisterId>,
        index: Option<RegisterId>,
        displacement: i32,
    ) -> u32 {
        let mut offset = displacement as i64 as u16;
        if let Some(base) = base {
            offset = offset.wrapping_add(self.registers.read16(base));
        }
        if let Some(index) = index {
            offset = offset.wrapping_add(self.registers.read16(index));
        }
        let segment = segment_override.unwrap_or_else(|| Self::default_segment(base, index));
        physical_address(biu.read_segment(segment), offset)
    }

    fn read_mem(&self, memory: &dyn StorageMut, address: u32, width: u8) -> Result<u32> {
        match width {
            1 => memory.read_byte(address).map(|v| v as u32),
            2 => memory.read_word(address).map(|v| v as u32),
            _ => memory.read_dword(address),
        }
    }

    fn write_mem(
        &self,
        memory: &mut dyn StorageMut,
        address: u32,
        width: u8,
        value: u32,
    ) -> Result<()> {
        match width {
            1 => memory.write_byte(address, value as u8),
            2 => memory.write_word(address, value as u16),
            _ => memory.write_dword(address, value),
        }
    }

    fn read_operand(
        &self,
        operand: &Operand,
        width: u8,
        biu: &BusInterfaceUnit,
        memory: &dyn StorageMut,
    ) -> Result<u32> {
        match operand {
            Operand::Reg(reg) => Ok(self.registers.read(*reg)),
            Operand::SegReg(seg) => Ok(biu.read_segment(*seg) as u32),
            Operand::Imm(value) => Ok(to_unsigned(*value as i64, width)),
            Operand::Mem {
                segment_override,
                base,
                index,
                displacement,
            } => {
                let address =
                    self.effective_address(biu, *segment_override, *base, *index, *displacement);
                self.read_mem(memory, address, width)
            }
            Operand::FarPtr { offset, .. } => Ok(*offset as u32),
        }
    }

    fn write_operand(
        &mut self,
        operand: &Operand,
        width: u8,
        value: u32,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
    ) -> Result<()> {
        match operand {
            Operand::Reg(reg) => {
                self.registers.write(*reg, value);
                Ok(())
            }
            Operand::SegReg(seg) => {
                biu.write_segment(*seg, value as u16);
                Ok(())
            }
            Operand::Mem {
                segment_override,
                base,
                index,
                displacement,
            } => {
                let address =
                    self.effective_address(biu, *segment_override, *base, *index, *displacement);
                self.write_mem(memory, address, width, value)
            }
            Operand::Imm(_) | Operand::FarPtr { .. } => Err(Error::InvalidOperandKind {
                mnemonic: "(write)".to_string(),
                expected: "register or memory",
                found: "immediate",
            }),
        }
    }

    // ---- flags --------------------------------------------------------

    fn set_result_flags(&mut self, result: u32, width: u8) {
        self.flags.sign = to_signed(result, width) < 0;
        self.flags.zero = (result & mask(width)) == 0;
        self.flags.parity = parity_even((result & 0xff) as u8);
    }

    fn add_with_flags(&mut self, a: u32, b: u32, carry_in: u32, width: u8) -> u32 {
        let ua = (a & mask(width)) as u64 + carry_in as u64;
        let ub = (b & mask(width)) as u64;
        let sum = ua + ub;
        self.flags.carry = sum > mask(width) as u64;
        let signed_sum =
            to_signed(a, width) as i64 + to_signed(b, width) as i64 + carry_in as i64;
        let bits = width as u32 * 8;
        let hi = 1i64 << (bits - 1);
        self.flags.overflow = signed_sum < -hi || signed_sum >= hi;
        let result = (sum as u32) & mask(width);
        self.set_result_flags(result, width);
        result
    }

    fn sub_with_flags(&mut self, a: u32, b: u32, borrow_in: u32, width: u8) -> u32 {
        let ua = (a & mask(width)) as i64;
        let ub = (b & mask(width)) as i64 + borrow_in as i64;
        self.flags.carry = ua < ub;
        let signed_diff = to_signed(a, width) as i64 - to_signed(b, width) as i64 - borrow_in as i64;
        let bits = width as u32 * 8;
        let hi = 1i64 << (bits - 1);
        self.flags.overflow = signed_diff < -hi || signed_diff >= hi;
        let result = to_unsigned(ua - ub, width);
        self.set_result_flags(result, width);
        result
    }

    fn logic_flags(&mut self, result: u32, width: u8) -> u32 {
        let result = result & mask(width);
        self.flags.carry = false;
        self.flags.overflow = false;
        self.set_result_flags(result, width);
        result
    }

    // ---- shifts/rotates -------------------------------------------------

    fn shl(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let original_msb = (v >> (bits - 1)) & 1;
        let mut carry = self.flags.carry;
        let mut after_msb = original_msb;
        for _ in 0..count {
            let before_msb = (v >> (bits - 1)) & 1;
            carry = before_msb != 0;
            v = (v << 1) & mask(width);
            after_msb = (v >> (bits - 1)) & 1;
        }
        self.flags.carry = carry;
        self.flags.overflow = (original_msb ^ after_msb) != 0;
        self.set_result_flags(v, width);
        v
    }

    fn shr(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let original_msb = (v >> (bits - 1)) & 1;
        let mut carry = self.flags.carry;
        for _ in 0..count {
            carry = v & 1 != 0;
            v >>= 1;
        }
        self.flags.carry = carry;
        self.flags.overflow = original_msb != 0;
        self.set_result_flags(v, width);
        v
    }

    fn sar(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let mut signed = to_signed(value, width) as i64;
        if count == 0 {
            return value & mask(width);
        }
        let mut carry = self.flags.carry;
        for _ in 0..count {
            carry = signed & 1 != 0;
            signed >>= 1;
        }
        self.flags.carry = carry;
        self.flags.overflow = false;
        let result = to_unsigned(signed, width);
        self.set_result_flags(result, width);
        result
    }

    fn rol(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let mut carry = self.flags.carry;
        for _ in 0..count {
            let before_msb = (v >> (bits - 1)) & 1;
            v = ((v << 1) | before_msb) & mask(width);
            carry = before_msb != 0;
        }
        self.flags.carry = carry;
        let msb = (v >> (bits - 1)) & 1;
        self.flags.overflow = (carry as u32 ^ msb) != 0;
        v
    }

    fn ror(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let mut carry = self.flags.carry;
        for _ in 0..count {
            let before_lsb = v & 1;
            v = (v >> 1) | (before_lsb << (bits - 1));
            carry = before_lsb != 0;
        }
        self.flags.carry = carry;
        let msb = (v >> (bits - 1)) & 1;
        let msb2 = (v >> (bits.saturating_sub(2))) & 1;
        self.flags.overflow = (msb ^ msb2) != 0;
        v
    }

    fn rcl(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let mut carry = self.flags.carry;
        for _ in 0..count {
            let before_msb = (v >> (bits - 1)) & 1;
            v = ((v << 1) | (carry as u32)) & mask(width);
            carry = before_msb != 0;
        }
        self.flags.carry = carry;
        let msb = (v >> (bits - 1)) & 1;
        self.flags.overflow = (carry as u32 ^ msb) != 0;
        v
    }

    fn rcr(&mut self, value: u32, count: u8, width: u8) -> u32 {
        let bits = width as u32 * 8;
        let mut v = value & mask(width);
        if count == 0 {
            return v;
        }
        let mut carry = self.flags.carry;
        for _ in 0..count {
            let before_lsb = v & 1;
            v = (v >> 1) | ((carry as u32) << (bits - 1));
            carry = before_lsb != 0;
        }
        self.flags.carry = carry;
        let msb = (v >> (bits - 1)) & 1;
        let msb2 = (v >> (bits.saturating_sub(2))) & 1;
        self.flags.overflow = (msb ^ msb2) != 0;
        v
    }

    // ---- interrupts -----------------------------------------------------

    /// Hardware-style interrupt entry (§4.6 "Interrupt entry sequence"):
    /// push flags, clear TF/IF, push CS, push IP, then load CS:IP from the
    /// IVT entry for `vector`.
    fn raise_interrupt(
        &mut self,
        vector: u8,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
    ) -> Result<()> {
        self.push_word(biu, memory, self.flags.to_word())?;
        self.flags.trap = false;
        self.flags.interrupt = false;
        self.push_word(biu, memory, biu.cs())?;
        self.push_word(biu, memory, biu.ip())?;
        let ivt_address = vector as u32 * 4;
        let offset = memory.read_word(ivt_address)?;
        let segment = memory.read_word(ivt_address + 2)?;
        biu.write_cs(segment);
        biu.write_ip(offset);
        Ok(())
    }

    fn iret(&mut self, biu: &mut BusInterfaceUnit, memory: &dyn StorageMut) -> Result<()> {
        let ip = self.pop_word(biu, memory)?;
        let cs = self.pop_word(biu, memory)?;
        let flags = self.pop_word(biu, memory)?;
        self.flags = FlagRegister::from_word(flags);
        biu.write_cs(cs);
        biu.write_ip(ip);
        Ok(())
    }

    fn dispatch_int(
        &mut self,
        vector: u8,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
        io: &mut dyn MachineIo,
    ) -> Result<()> {
        match vector {
            3 => self.breakpoint = true,
            // Open Question (b): BIOS services are recognized but
            // unimplemented; a no-op dispatch, not an IVT walk.
            0x10 => {}
            0x21 => self.dispatch_dos(biu, memory, io)?,
            0x00 | 0x01 | 0x02 | 0x04 | 0x7c => self.raise_interrupt(vector, biu, memory)?,
            other => return Err(Error::UnhandledInterrupt { vector: other }),
        }
        Ok(())
    }

    /// §4.6.1 DOS `INT 21h` dispatch on `AH`.
    fn dispatch_dos(
        &mut self,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
        io: &mut dyn MachineIo,
    ) -> Result<()> {
        use crate::constants::DOS_PRINT_STRING_CAP;
        let ah = self.registers.read8(RegisterId::AH);
        match ah {
            0x00 => {
                io.write_stdout(b"Exit to operating system");
                self.halted = true;
                self.exit_code = Some(0);
            }
            0x01 => {
                let byte = io.read_char().unwrap_or(0);
                self.registers.write8(RegisterId::AL, byte);
            }
            0x02 => {
                let byte = self.registers.read8(RegisterId::DL);
                io.write_stdout(&[byte]);
            }
            0x09 => {
                let address = physical_address(
                    biu.read_segment(SegmentId::DS),
                    self.registers.read16(RegisterId::DX),
                );
                let mut bytes = Vec::new();
                for i in 0..DOS_PRINT_STRING_CAP as u32 {
                    let byte = memory.read_byte(address + i)?;
                    if byte == b'$' {
                        break;
                    }
                    bytes.push(byte);
                }
                io.write_stdout(&bytes);
            }
            0x2a => {
                let (year, month, day) = io.date();
                self.registers.write16(RegisterId::CX, year);
                self.registers.write8(RegisterId::DH, month);
                self.registers.write8(RegisterId::DL, day);
            }
            0x2c => {
                let (hour, minute, second, centisecond) = io.time();
                self.registers.write8(RegisterId::CH, hour);
                self.registers.write8(RegisterId::CL, minute);
                self.registers.write8(RegisterId::DH, second);
                self.registers.write8(RegisterId::DL, centisecond);
            }
            0x35 => {
                let vector = self.registers.read8(RegisterId::AL);
                let ivt_address = vector as u32 * 4;
                let offset = memory.read_word(ivt_address)?;
                let segment = memory.read_word(ivt_address + 2)?;
                self.registers.write16(RegisterId::BX, offset);
                biu.write_segment(SegmentId::ES, segment);
            }
            0x4c => {
                let code = self.registers.read8(RegisterId::AL);
                self.halted = true;
                self.exit_code = Some(code);
            }
            _ => {}
        }
        Ok(())
    }

    // ---- string instructions --------------------------------------------

    fn string_step(
        &mut self,
        opcode: Opcode,
        width: u8,
        biu: &BusInterfaceUnit,
        memory: &mut dyn StorageMut,
    ) -> Result<()> {
        let step: i32 = if self.flags.direction {
            -(width as i32)
        } else {
            width as i32
        };
        let advance = |reg: &mut RegisterFile, id: RegisterId| {
            let value = (reg.read16(id) as i32 + step) as u16;
            reg.write16(id, value);
        };

        let src_addr = || {
            physical_address(
                biu.read_segment(SegmentId::DS),
                self.registers.read16(RegisterId::SI),
            )
        };
        let dst_addr = || {
            physical_address(
                biu.read_segment(SegmentId::ES),
                self.registers.read16(RegisterId::DI),
            )
        };

        match opcode {
            Opcode::MOVSB | Opcode::MOVSW => {
                let value = self.read_mem(memory, src_addr(), width)?;
                self.write_mem(memory, dst_addr(), width, value)?;
                advance(&mut self.registers, RegisterId::SI);
                advance(&mut self.registers, RegisterId::DI);
            }
            Opcode::CMPSB | Opcode::CMPSW => {
                let a = self.read_mem(memory, src_addr(), width)?;
                let b = self.read_mem(memory, dst_addr(), width)?;
                self.sub_with_flags(a, b, 0, width);
                advance(&mut self.registers, RegisterId::SI);
                advance(&mut self.registers, RegisterId::DI);
            }
            Opcode::LODSB | Opcode::LODSW => {
                let value = self.read_mem(memory, src_addr(), width)?;
                let dest = if width == 1 { RegisterId::AL } else { RegisterId::AX };
                self.registers.write(dest, value);
                advance(&mut self.registers, RegisterId::SI);
            }
            Opcode::STOSB | Opcode::STOSW => {
                let source = if width == 1 { RegisterId::AL } else { RegisterId::AX };
                let value = self.registers.read(source);
                self.write_mem(memory, dst_addr(), width, value)?;
                advance(&mut self.registers, RegisterId::DI);
            }
            Opcode::SCASB | Opcode::SCASW => {
                let source = if width == 1 { RegisterId::AL } else { RegisterId::AX };
                let a = self.registers.read(source);
                let b = self.read_mem(memory, dst_addr(), width)?;
                self.sub_with_flags(a, b, 0, width);
                advance(&mut self.registers, RegisterId::DI);
            }
            other => {
                return Err(Error::InvalidOperandKind {
                    mnemonic: format!("{:?}", other),
                    expected: "string instruction",
                    found: "non-string opcode",
                })
            }
        }
        Ok(())
    }

    fn execute_string(
        &mut self,
        instr: &Instruction,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
    ) -> Result<()> {
        let width = instr.operand_width();
        match instr.rep_prefix {
            None => self.string_step(instr.opcode, width, biu, memory),
            Some(prefix) => {
                while self.registers.read16(RegisterId::CX) != 0 {
                    self.string_step(instr.opcode, width, biu, memory)?;
                    let cx = self.registers.read16(RegisterId::CX).wrapping_sub(1);
                    self.registers.write16(RegisterId::CX, cx);
                    let stop = match prefix {
                        RepPrefix::Rep => false,
                        RepPrefix::Repe => !self.flags.zero,
                        RepPrefix::Repne => self.flags.zero,
                    };
                    if stop || cx == 0 {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    // ---- conditional jump predicates -------------------------------------

    fn condition(&self, opcode: Opcode) -> Option<bool> {
        use Opcode::*;
        let f = &self.flags;
        Some(match opcode {
            JE | JZ => f.zero,
            JNE | JNZ => !f.zero,
            JG | JNLE => !f.zero && (f.sign == f.overflow),
            JGE | JNL => f.sign == f.overflow,
            JL | JNGE => f.sign != f.overflow,
            JLE | JNG => f.zero || (f.sign != f.overflow),
            JA | JNBE => !f.carry && !f.zero,
            JAE | JNB | JNC => !f.carry,
            JB | JNAE | JC => f.carry,
            JBE | JNA => f.carry || f.zero,
            JO => f.overflow,
            JNO => !f.overflow,
            JS => f.sign,
            JNS => !f.sign,
            JP | JPE => f.parity,
            JNP | JPO => !f.parity,
            JCXZ => self.registers.read16(RegisterId::CX) == 0,
            _ => return None,
        })
    }

    // ---- the dispatcher ---------------------------------------------------

    fn require_operand<'a>(instr: &'a Instruction, index: usize) -> Result<&'a Operand> {
        instr.operands.get(index).ok_or_else(|| Error::InvalidOperandKind {
            mnemonic: format!("{:?}", instr.opcode),
            expected: "an operand",
            found: "none",
        })
    }

    fn jump_target(
        &self,
        operand: &Operand,
        width: u8,
        biu: &BusInterfaceUnit,
        memory: &dyn StorageMut,
    ) -> Result<(Option<u16>, u16)> {
        match operand {
            Operand::Imm(value) => Ok((None, *value as u16)),
            Operand::FarPtr { segment, offset } => Ok((Some(*segment), *offset)),
            Operand::Mem { .. } if width == 4 => {
                let value = self.read_operand(operand, 4, biu, memory)?;
                Ok((Some((value >> 16) as u16), (value & 0xffff) as u16))
            }
            Operand::Mem { .. } => {
                let value = self.read_operand(operand, 2, biu, memory)?;
                Ok((None, value as u16))
            }
            _ => Err(Error::InvalidOperandKind {
                mnemonic: "JMP/CALL".to_string(),
                expected: "label, far pointer, or memory",
                found: "register or segment register",
            }),
        }
    }

    /// Execute one decoded instruction. `biu.ip()` has already been
    /// advanced past this slot by [`BusInterfaceUnit::dequeue`].
    pub fn execute(
        &mut self,
        instr: &Instruction,
        biu: &mut BusInterfaceUnit,
        memory: &mut dyn StorageMut,
        io: &mut dyn MachineIo,
    ) -> Result<StepOutcome> {
        use Opcode::*;

        if instr.opcode.is_string_instruction() {
            self.execute_string(instr, biu, memory)?;
            return Ok(StepOutcome::Continue);
        }
        if instr.opcode.is_conditional_jump() {
            let target = Self::require_operand(instr, 0)?;
            if self.condition(instr.opcode).unwrap_or(false) {
                let (_, offset) = self.jump_target(target, 2, biu, memory)?;
                biu.write_ip(offset);
            }
            return Ok(StepOutcome::Continue);
        }
        if instr.opcode.is_loop() {
            let cx = self.registers.read16(RegisterId::CX).wrapping_sub(1);
            self.registers.write16(RegisterId::CX, cx);
            let take = match instr.opcode {
                LOOP => cx != 0,
                LOOPE | LOOPZ => cx != 0 && self.flags.zero,
                LOOPNE | LOOPNZ => cx != 0 && !self.flags.zero,
                _ => unreachable!(),
            };
            if take {
                let target = Self::require_operand(instr, 0)?;
                let (_, offset) = self.jump_target(target, 2, biu, memory)?;
                biu.write_ip(offset);
            }
            return Ok(StepOutcome::Continue);
        }

        let width = instr.operand_width();

        match instr.opcode {
            NOP | WAIT | LOCK | ESC | XLAT => {}

            MOV => {
                let src = Self::require_operand(instr, 1)?;
                if matches!(Self::require_operand(instr, 0)?, Operand::SegReg(_))
                    && matches!(src, Operand::Imm(_))
                {
                    // Open Question (a): segment registers may only be
                    // loaded from a general register or memory.
                    return Err(Error::ImmediateSegmentLoad);
                }
                let value = self.read_operand(src, width, biu, memory)?;
                let dest = Self::require_operand(instr, 0)?.clone();
                self.write_operand(&dest, width, value, biu, memory)?;
            }

            XCHG => {
                let a = Self::require_operand(instr, 0)?.clone();
                let b = Self::require_operand(instr, 1)?.clone();
                let va = self.read_operand(&a, width, biu, memory)?;
                let vb = self.read_operand(&b, width, biu, memory)?;
                self.write_operand(&a, width, vb, biu, memory)?;
                self.write_operand(&b, width, va, biu, memory)?;
            }

            LEA => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let src = Self::require_operand(instr, 1)?;
                if let Operand::Mem {
                    segment_override,
                    base,
                    index,
                    displacement,
                } = src
                {
                    let address = self.effective_address(
                        biu,
                        *segment_override,
                        *base,
                        *index,
                        *displacement,
                    );
                    let segment = segment_override.unwrap_or_else(|| Self::default_segment(*base, *index));
                    let offset = address.wrapping_sub(biu.read_segment(segment) as u32 * 16);
                    self.write_operand(&dest, 2, offset, biu, memory)?;
                } else {
                    return Err(Error::InvalidOperandKind {
                        mnemonic: "LEA".to_string(),
                        expected: "memory",
                        found: "register or immediate",
                    });
                }
            }

            LDS | LES => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let src = Self::require_operand(instr, 1)?;
                let dword = self.read_operand(src, 4, biu, memory)?;
                let offset = (dword & 0xffff) as u32;
                let segment = (dword >> 16) as u16;
                self.write_operand(&dest, 2, offset, biu, memory)?;
                let target_seg = if instr.opcode == LDS { SegmentId::DS } else { SegmentId::ES };
                biu.write_segment(target_seg, segment);
            }

            ADD | ADC => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let src = Self::require_operand(instr, 1)?;
                let a = self.read_operand(&dest, width, biu, memory)?;
                let b = self.read_operand(src, width, biu, memory)?;
                let carry_in = if instr.opcode == ADC && self.flags.carry { 1 } else { 0 };
                let result = self.add_with_flags(a, b, carry_in, width);
                self.write_operand(&dest, width, result, biu, memory)?;
            }

            SUB | SBB | CMP => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let src = Self::require_operand(instr, 1)?;
                let a = self.read_operand(&dest, width, biu, memory)?;
                let b = self.read_operand(src, width, biu, memory)?;
                let borrow_in = if instr.opcode == SBB && self.flags.carry { 1 } else { 0 };
                let result = self.sub_with_flags(a, b, borrow_in, width);
                if instr.opcode != CMP {
                    self.write_operand(&dest, width, result, biu, memory)?;
                }
            }

            INC | DEC => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let a = self.read_operand(&dest, width, biu, memory)?;
                let result = if instr.opcode == INC {
                    self.add_with_flags(a, 1, 0, width)
                } else {
                    self.sub_with_flags(a, 1, 0, width)
                };
                self.write_operand(&dest, width, result, biu, memory)?;
            }

            NEG => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let a = self.read_operand(&dest, width, biu, memory)?;
                let result = self.sub_with_flags(0, a, 0, width);
                self.write_operand(&dest, width, result, biu, memory)?;
            }

            MUL => {
                let operand = Self::require_operand(instr, 0)?;
                let value = self.read_operand(operand, width, biu, memory)?;
                let overflow = if width == 1 {
                    let al = self.registers.read8(RegisterId::AL) as u32;
                    let product = al * (value & 0xff);
                    self.registers.write16(RegisterId::AX, product as u16);
                    product > 0xff
                } else {
                    let ax = self.registers.read16(RegisterId::AX) as u32;
                    let product = ax * (value & 0xffff);
                    self.registers.write16(RegisterId::AX, (product & 0xffff) as u16);
                    self.registers.write16(RegisterId::DX, (product >> 16) as u16);
                    product > 0xffff
                };
                self.flags.carry = overflow;
                self.flags.overflow = overflow;
            }

            DIV => {
                let operand = Self::require_operand(instr, 0)?;
                let divisor = self.read_operand(operand, width, biu, memory)?;
                if width == 1 {
                    let dividend = self.registers.read16(RegisterId::AX) as u32;
                    if divisor == 0 || dividend / divisor > 0xff {
                        self.dispatch_int(0, biu, memory, io)?;
                        return Ok(StepOutcome::Continue);
                    }
                    self.registers.write8(RegisterId::AL, (dividend / divisor) as u8);
                    self.registers.write8(RegisterId::AH, (dividend % divisor) as u8);
                } else {
                    let dividend = ((self.registers.read16(RegisterId::DX) as u32) << 16)
                        | self.registers.read16(RegisterId::AX) as u32;
                    if divisor == 0 || dividend / divisor > 0xffff {
                        self.dispatch_int(0, biu, memory, io)?;
                        return Ok(StepOutcome::Continue);
                    }
                    self.registers.write16(RegisterId::AX, (dividend / divisor) as u16);
                    self.registers.write16(RegisterId::DX, (dividend % divisor) as u16);
                }
            }

            CBW => {
                let al = self.registers.read8(RegisterId::AL);
                let ax = if al & 0x80 != 0 { 0xff00 | al as u16 } else { al as u16 };
                self.registers.write16(RegisterId::AX, ax);
            }
            CWD => {
                let ax = self.registers.read16(RegisterId::AX);
                let dx = if ax & 0x8000 != 0 { 0xffff } else { 0x0000 };
                self.registers.write16(RegisterId::DX, dx);
            }

            AND | OR | XOR | TEST => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let src = Self::require_operand(instr, 1)?;
                let a = self.read_operand(&dest, width, biu, memory)?;
                let b = self.read_operand(src, width, biu, memory)?;
                let raw = match instr.opcode {
                    AND | TEST => a & b,
                    OR => a | b,
                    XOR => a ^ b,
                    _ => unreachable!(),
                };
                let result = self.logic_flags(raw, width);
                if instr.opcode != TEST {
                    self.write_operand(&dest, width, result, biu, memory)?;
                }
            }

            NOT => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let a = self.read_operand(&dest, width, biu, memory)?;
                self.write_operand(&dest, width, (!a) & mask(width), biu, memory)?;
            }

            SHL | SAL | SHR | SAR | ROL | ROR | RCL | RCR => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let count_operand = Self::require_operand(instr, 1)?;
                let count = self.read_operand(count_operand, 1, biu, memory)? as u8;
                let value = self.read_operand(&dest, width, biu, memory)?;
                let result = match instr.opcode {
                    SHL | SAL => self.shl(value, count, width),
                    SHR => self.shr(value, count, width),
                    SAR => self.sar(value, count, width),
                    ROL => self.rol(value, count, width),
                    ROR => self.ror(value, count, width),
                    RCL => self.rcl(value, count, width),
                    RCR => self.rcr(value, count, width),
                    _ => unreachable!(),
                };
                self.write_operand(&dest, width, result, biu, memory)?;
            }

            JMP => {
                let target = Self::require_operand(instr, 0)?;
                let (segment, offset) = self.jump_target(target, width, biu, memory)?;
                if let Some(segment) = segment {
                    biu.write_cs(segment);
                }
                biu.write_ip(offset);
            }

            CALL => {
                let target = Self::require_operand(instr, 0)?;
                let (segment, offset) = self.jump_target(target, width, biu, memory)?;
                if let Some(segment) = segment {
                    self.push_word(biu, memory, biu.cs())?;
                    self.push_word(biu, memory, biu.ip())?;
                    biu.write_cs(segment);
                } else {
                    self.push_word(biu, memory, biu.ip())?;
                }
                biu.write_ip(offset);
            }

            RET => {
                let ip = self.pop_word(biu, memory)?;
                biu.write_ip(ip);
            }
            RETF => {
                let ip = self.pop_word(biu, memory)?;
                let cs = self.pop_word(biu, memory)?;
                biu.write_cs(cs);
                biu.write_ip(ip);
            }

            PUSH => {
                let operand = Self::require_operand(instr, 0)?;
                let value = self.read_operand(operand, 2, biu, memory)?;
                self.push_word(biu, memory, value as u16)?;
            }
            POP => {
                let operand = Self::require_operand(instr, 0)?.clone();
                let value = self.pop_word(biu, memory)?;
                self.write_operand(&operand, 2, value as u32, biu, memory)?;
            }
            PUSHF => {
                let word = self.flags.to_word();
                self.push_word(biu, memory, word)?;
            }
            POPF => {
                let word = self.pop_word(biu, memory)?;
                self.flags = FlagRegister::from_word(word);
            }

            IN => {
                let dest = Self::require_operand(instr, 0)?.clone();
                let port = Self::require_operand(instr, 1)?;
                let port_value = self.read_operand(port, 2, biu, memory)?;
                io.write_stdout(format!("IN port {:#06x}? ", port_value).as_bytes());
                let line = io.read_line();
                let value = line.trim().parse::<u32>().unwrap_or(0);
                self.write_operand(&dest, width, value, biu, memory)?;
            }
            OUT => {
                let port = Self::require_operand(instr, 0)?;
                let source = Self::require_operand(instr, 1)?;
                let port_value = self.read_operand(port, 2, biu, memory)?;
                let value = self.read_operand(source, width, biu, memory)?;
                self.out_log
                    .push(format!("OUT {:#06x} <- {:#06x}", port_value, value));
            }

            STC => self.flags.carry = true,
            CLC => self.flags.carry = false,
            CMC => self.flags.carry = !self.flags.carry,
            STD => self.flags.direction = true,
            CLD => self.flags.direction = false,
            STI => self.flags.interrupt = true,
            CLI => self.flags.interrupt = false,
            LAHF => {
                let byte = self.flags.low_byte();
                self.registers.write8(RegisterId::AH, byte);
            }
            SAHF => {
                let byte = self.registers.read8(RegisterId::AH);
                self.flags.set_low_byte(byte);
            }

            INT => {
                let operand = Self::require_operand(instr, 0)?;
                let vector = self.read_operand(operand, 1, biu, memory)? as u8;
                self.dispatch_int(vector, biu, memory, io)?;
            }
            INTO => {
                if self.flags.overflow {
                    self.dispatch_int(4, biu, memory, io)?;
                }
            }
            IRET => self.iret(biu, memory)?,
            HLT => self.halted = true,

            other => {
                return Err(Error::InvalidOperandKind {
                    mnemonic: format!("{:?}", other),
                    expected: "a handled opcode",
                    found: "unhandled in EU::execute",
                })
            }
        }

        if self.halted {
            return Ok(StepOutcome::Halted);
        }
        if let Some(code) = self.exit_code {
            return Ok(StepOutcome::Exited(code));
        }
        if self.breakpoint {
            return Ok(StepOutcome::Breakpoint);
        }
        Ok(StepOutcome::Continue)
    }
}

impl Default for ExecutionUnit {
    fn default() -> ExecutionUnit {
        ExecutionUnit::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use crate::register::SegmentRegisters;

    fn machine() -> (ExecutionUnit, BusInterfaceUnit, Memory, crate::io::BufferIo) {
        (
            ExecutionUnit::new(),
            BusInterfaceUnit::new(SegmentRegisters {
                cs: 0x3000,
                ds: 0x2000,
                ss: 0x5000,
                es: 0x7000,
                ip: 0,
            }),
            Memory::new(),
            crate::io::BufferIo::default(),
        )
    }

    #[test]
    fn add_sets_carry_on_unsigned_overflow() {
        let (mut eu, mut biu, mut mem, mut io) = machine();
        eu.registers.write8(RegisterId::AL, 0xff);
        let instr = Instruction::new(
            Opcode::ADD,
            vec![Operand::Reg(RegisterId::AL), Operand::Imm(1)],
        );
        eu.execute(&instr, &mut biu, &mut mem, &mut io).unwrap();
        assert_eq!(eu.registers.read8(RegisterId::AL), 0);
        assert!(eu.flags.carry);
        assert!(eu.flags.zero);
        assert!(!eu.flags.overflow);
    }

    #[test]
    fn push_pop_round_trips_and_leaves_sp_unchanged() {
        let (mut eu, mut biu, mut mem, _io) = machine();
        eu.registers.sp = 0x100;
        eu.push_word(&biu, &mut mem, 0xbeef).unwrap();
        let sp_after_push = eu.registers.sp;
        assert_eq!(sp_after_push, 0x0fe);
        let value = eu.pop_word(&biu, &mem).unwrap();
        assert_eq!(value, 0xbeef);
        assert_eq!(eu.registers.sp, 0x100);
        let _ = &mut biu;
    }

    #[test]
    fn shl_ffff_sets_carry_and_sign() {
        let (mut eu, mut biu, mut mem, mut io) = machine();
        eu.registers.write16(RegisterId::AX, 0xffff);
        let instr = Instruction::new(
            Opcode::SHL,
            vec![Operand::Reg(RegisterId::AX), Operand::Imm(1)],
        );
        eu.execute(&instr, &mut biu, &mut mem, &mut io).unwrap();
        assert_eq!(eu.registers.read16(RegisterId::AX), 0xfffe);
        assert!(eu.flags.carry);
        assert!(eu.flags.sign);
    }

    #[test]
    fn div_by_zero_raises_int0_through_the_ivt() {
        let (mut eu, mut biu, mut mem, mut io) = machine();
        memory_install_trivial_isr(&mut mem, 0, 0x1234, 0x10);
        eu.registers.write16(RegisterId::AX, 5);
        eu.registers.write16(RegisterId::DX, 0);
        let instr = Instruction::new(Opcode::DIV, vec![Operand::Imm(0)]);
        eu.execute(&instr, &mut biu, &mut mem, &mut io).unwrap();
        assert_eq!(biu.cs(), 0x1234);
        assert_eq!(biu.ip(), 0x10);
    }

    fn memory_install_trivial_isr(mem: &mut Memory, vector: u8, segment: u16, offset: u16) {
        use crate::memory::StorageMut;
        mem.write_word(vector as u32 * 4, offset).unwrap();
        mem.write_word(vector as u32 * 4 + 2, segment).unwrap();
    }
}
