//! The 8086 general-purpose and segment register files.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use util::EnumFromStr;
use util_derive::{EnumFromStr, InteropGetName};

/// One of the eight 16-bit general-purpose registers, or one of their
/// 8-bit high/low sub-views.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumFromStr,
    InteropGetName,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum RegisterId {
    AX,
    BX,
    CX,
    DX,
    SP,
    BP,
    SI,
    DI,
    AL,
    AH,
    BL,
    BH,
    CL,
    CH,
    DL,
    DH,
}

impl RegisterId {
    /// Operand width in bytes implied by this register alone.
    pub fn width(self) -> u8 {
        use RegisterId::*;
        match self {
            AX | BX | CX | DX | SP | BP | SI | DI => 2,
            AL | AH | BL | BH | CL | CH | DL | DH => 1,
        }
    }

    pub fn is_byte(self) -> bool {
        self.width() == 1
    }
}

/// One of the four segment registers.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumFromStr,
    InteropGetName,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum SegmentId {
    CS,
    DS,
    SS,
    ES,
}

/// The 8086 general-purpose register file: eight 16-bit registers with
/// byte-addressable high/low halves for AX/BX/CX/DX.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegisterFile {
    ax: u16,
    bx: u16,
    cx: u16,
    dx: u16,
    pub sp: u16,
    pub bp: u16,
    pub si: u16,
    pub di: u16,
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile::default()
    }

    pub fn read16(&self, id: RegisterId) -> u16 {
        use RegisterId::*;
        match id {
            AX => self.ax,
            BX => self.bx,
            CX => self.cx,
            DX => self.dx,
            SP => self.sp,
            BP => self.bp,
            SI => self.si,
            DI => self.di,
            AL | AH | BL | BH | CL | CH | DL | DH => self.read8(id) as u16,
        }
    }

    pub fn write16(&mut self, id: RegisterId, value: u16) {
        use RegisterId::*;
        match id {
            AX => self.ax = value,
            BX => self.bx = value,
            CX => self.cx = value,
            DX => self.dx = value,
            SP => self.sp = value,
            BP => self.bp = value,
            SI => self.si = value,
            DI => self.di = value,
            AL | AH | BL | BH | CL | CH | DL | DH => self.write8(id, value as u8),
        }
    }

    pub fn read8(&self, id: RegisterId) -> u8 {
        use RegisterId::*;
        let word = match id {
            AL | AH => self.ax,
            BL | BH => self.bx,
            CL | CH => self.cx,
            DL | DH => self.dx,
            _ => return self.read16(id) as u8,
        };
        match id {
            AH | BH | CH | DH => (word >> 8) as u8,
            _ => word as u8,
        }
    }

    pub fn write8(&mut self, id: RegisterId, value: u8) {
        use RegisterId::*;
        let word = match id {
            AL | AH => &mut self.ax,
            BL | BH => &mut self.bx,
            CL | CH => &mut self.cx,
            DL | DH => &mut self.dx,
            _ => return self.write16(id, value as u16),
        };
        match id {
            AH | BH | CH | DH => *word = (*word & 0x00ff) | ((value as u16) << 8),
            _ => *word = (*word & 0xff00) | value as u16,
        }
    }

    /// Read respecting the register's natural width.
    pub fn read(&self, id: RegisterId) -> u32 {
        if id.is_byte() {
            self.read8(id) as u32
        } else {
            self.read16(id) as u32
        }
    }

    /// Write respecting the register's natural width; the value is
    /// truncated to that width.
    pub fn write(&mut self, id: RegisterId, value: u32) {
        if id.is_byte() {
            self.write8(id, value as u8)
        } else {
            self.write16(id, value as u16)
        }
    }
}

/// The four segment registers plus the instruction pointer, owned by the
/// bus interface unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRegisters {
    pub cs: u16,
    pub ds: u16,
    pub ss: u16,
    pub es: u16,
    pub ip: u16,
}

impl SegmentRegisters {
    pub fn read(&self, id: SegmentId) -> u16 {
        match id {
            SegmentId::CS => self.cs,
            SegmentId::DS => self.ds,
            SegmentId::SS => self.ss,
            SegmentId::ES => self.es,
        }
    }

    pub fn write(&mut self, id: SegmentId, value: u16) {
        match id {
            SegmentId::CS => self.cs = value,
            SegmentId::DS => self.ds = value,
            SegmentId::SS => self.ss = value,
            SegmentId::ES => self.es = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_low_halves_view_the_parent_word() {
        let mut regs = RegisterFile::new();
        regs.write16(RegisterId::AX, 0x1234);
        assert_eq!(regs.read8(RegisterId::AH), 0x12);
        assert_eq!(regs.read8(RegisterId::AL), 0x34);

        regs.write8(RegisterId::AL, 0xff);
        assert_eq!(regs.read16(RegisterId::AX), 0x12ff);

        regs.write8(RegisterId::AH, 0x00);
        assert_eq!(regs.read16(RegisterId::AX), 0x00ff);
    }

    #[test]
    fn register_id_parses_case_sensitively_after_uppercasing() {
        assert_eq!("AX".parse::<RegisterId>().unwrap(), RegisterId::AX);
        assert!("zz".parse::<RegisterId>().is_err());
    }
}
