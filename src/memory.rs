//! Flat, range-checked, slot-addressable memory.
//!
//! The 8086 this emulator models keeps its architectural IP in units of
//! *slots*, not real machine-code bytes (see [`crate::operand::Slot`]):
//! one memory cell holds either a single data byte or one whole symbolic
//! instruction. Memory is therefore a flat vector of [`Slot`], not `u8` —
//! byte-oriented reads/writes (used by `DB`/`DW`/`DD` data and by the
//! DOS/BIOS service routines) are a view over `Slot::Data` cells.
//!
//! Reads and writes are split into a [`Storage`] trait (read-only) and a
//! [`StorageMut`] trait (adds writes), so the bus interface unit — which
//! only ever fetches code — can be handed a `&dyn Storage` while the
//! loader and execution unit get full `&mut dyn StorageMut` access.

use crate::constants::MEMORY_SIZE;
use crate::error::{Error, Result};
use crate::operand::{Instruction, Slot};

/// Read-only view of an addressable slot store.
pub trait Storage {
    /// Total addressable length in slots.
    fn length(&self) -> usize;

    /// Verify `address` lies within `[0, length())`.
    fn check_range(&self, address: i64) -> Result<()> {
        if address < 0 || address as usize >= self.length() {
            Err(Error::AddressOutOfRange {
                address,
                limit: self.length(),
            })
        } else {
            Ok(())
        }
    }

    fn slot(&self, address: u32) -> Result<&Slot>;

    /// True iff `address` has never been written to — the "unwritten
    /// sentinel" the bus interface unit uses to detect end-of-code.
    fn is_empty(&self, address: u32) -> bool {
        matches!(self.slot(address), Ok(Slot::Empty))
    }

    fn read_byte(&self, address: u32) -> Result<u8> {
        match self.slot(address)? {
            Slot::Data(byte) => Ok(*byte),
            Slot::Empty => Ok(0),
            Slot::Instruction(_) => Err(Error::AddressOutOfRange {
                address: address as i64,
                limit: self.length(),
            }),
        }
    }

    fn read_word(&self, address: u32) -> Result<u16> {
        let lo = self.read_byte(address)? as u16;
        let hi = self.read_byte(address + 1)? as u16;
        Ok(lo | (hi << 8))
    }

    fn read_dword(&self, address: u32) -> Result<u32> {
        let lo = self.read_word(address)? as u32;
        let hi = self.read_word(address + 2)? as u32;
        Ok(lo | (hi << 16))
    }
}

/// Read-write extension of [`Storage`].
pub trait StorageMut: Storage {
    fn write_slot(&mut self, address: u32, slot: Slot) -> Result<()>;

    fn write_byte(&mut self, address: u32, value: u8) -> Result<()> {
        self.write_slot(address, Slot::Data(value))
    }

    fn write_word(&mut self, address: u32, value: u16) -> Result<()> {
        self.write_byte(address, (value & 0xff) as u8)?;
        self.write_byte(address + 1, (value >> 8) as u8)
    }

    fn write_dword(&mut self, address: u32, value: u32) -> Result<()> {
        self.write_word(address, (value & 0xffff) as u16)?;
        self.write_word(address + 2, (value >> 16) as u16)
    }

    fn write_instruction(&mut self, address: u32, instruction: Instruction) -> Result<()> {
        self.write_slot(address, Slot::Instruction(instruction))
    }

    /// Blit a contiguous run of slots (an assembled segment image, or a
    /// relocated ISR stub) into memory starting at `base`.
    fn blit(&mut self, base: u32, image: &[Slot]) -> Result<()> {
        if image.is_empty() {
            return Ok(());
        }
        self.check_range(base as i64)?;
        self.check_range(base as i64 + image.len() as i64 - 1)?;
        for (i, slot) in image.iter().enumerate() {
            self.write_slot(base + i as u32, slot.clone())?;
        }
        Ok(())
    }
}

/// A flat 1 MiB slot-addressable memory.
pub struct Memory {
    slots: Vec<Slot>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            slots: vec![Slot::Empty; MEMORY_SIZE],
        }
    }

}

impl Default for Memory {
    fn default() -> Memory {
        Memory::new()
    }
}

impl Storage for Memory {
    fn length(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, address: u32) -> Result<&Slot> {
        self.check_range(address as i64)?;
        Ok(&self.slots[address as usize])
    }
}

impl StorageMut for Memory {
    fn write_slot(&mut self, address: u32, slot: Slot) -> Result<()> {
        self.check_range(address as i64)?;
        self.slots[address as usize] = slot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_slots_report_empty() {
        let mem = Memory::new();
        assert!(mem.is_empty(0));
    }

    #[test]
    fn blit_writes_a_contiguous_image() {
        let mut mem = Memory::new();
        mem.blit(0x100, &[Slot::Data(1), Slot::Data(2), Slot::Data(3)])
            .unwrap();
        assert!(!mem.is_empty(0x100));
        assert!(!mem.is_empty(0x102));
        assert!(mem.is_empty(0x103));
        assert_eq!(mem.read_byte(0x101).unwrap(), 2);
    }

    #[test]
    fn word_and_dword_reads_are_little_endian() {
        let mut mem = Memory::new();
        mem.write_word(0, 0x1234).unwrap();
        assert_eq!(mem.read_byte(0).unwrap(), 0x34);
        assert_eq!(mem.read_byte(1).unwrap(), 0x12);
        mem.write_dword(4, 0xdead_beef).unwrap();
        assert_eq!(mem.read_dword(4).unwrap(), 0xdead_beef);
    }

    #[test]
    fn out_of_range_address_is_an_error() {
        let mem = Memory::new();
        assert!(mem.slot(MEMORY_SIZE as u32).is_err());
    }
}
