//! Relocation of interrupt service routines into memory and the writing
//! of their IVT entries.
//!
//! This module is deliberately thin: it knows how to place a pre-assembled
//! run of [`Slot`]s somewhere in memory and point an IVT entry at it, but
//! it does not know how to turn `.asm` source into those slots — that
//! would require depending on `vasm`, and `vasm` already depends on this
//! crate for [`Opcode`]/[`Operand`]/etc, so the dependency can't run both
//! ways. The `vex` binary owns the actual stub sources and assembles them
//! before calling in here.

use crate::constants::{physical_address, ISR_SEGMENT, ISR_STRIDE};
use crate::error::Result;
use crate::memory::{Storage, StorageMut};
use crate::operand::Slot;

/// One relocated interrupt service routine: the vector it serves and the
/// slots that implement it.
pub struct IsrImage {
    pub vector: u8,
    pub slots: Vec<Slot>,
}

impl IsrImage {
    pub fn new(vector: u8, slots: Vec<Slot>) -> IsrImage {
        IsrImage { vector, slots }
    }
}

/// Relocate each [`IsrImage`] into its own `ISR_STRIDE`-byte slot within
/// [`ISR_SEGMENT`] (in `images` order, starting at offset 0) and point the
/// corresponding IVT entry at it. Returns an error if a stub's slot count
/// exceeds [`ISR_STRIDE`], since stubs would then overlap.
pub fn install(memory: &mut dyn StorageMut, images: &[IsrImage]) -> Result<()> {
    for (i, image) in images.iter().enumerate() {
        let offset = i as u16 * ISR_STRIDE;
        if image.slots.len() > ISR_STRIDE as usize {
            return Err(crate::error::Error::AddressOutOfRange {
                address: image.slots.len() as i64,
                limit: ISR_STRIDE as usize,
            });
        }
        let base = physical_address(ISR_SEGMENT, offset);
        memory.blit(base, &image.slots)?;

        let ivt_address = image.vector as u32 * 4;
        memory.write_word(ivt_address, offset)?;
        memory.write_word(ivt_address + 2, ISR_SEGMENT)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;
    use crate::operand::{Instruction, Opcode};

    #[test]
    fn install_writes_ivt_entries_pointing_at_relocated_stubs() {
        let mut mem = Memory::new();
        let images = vec![
            IsrImage::new(0x00, vec![Slot::Instruction(Instruction::new(Opcode::IRET, vec![]))]),
            IsrImage::new(0x7c, vec![Slot::Instruction(Instruction::new(Opcode::IRET, vec![]))]),
        ];
        install(&mut mem, &images).unwrap();

        let offset0 = mem.read_word(0x00 * 4).unwrap();
        let segment0 = mem.read_word(0x00 * 4 + 2).unwrap();
        assert_eq!(segment0, ISR_SEGMENT);
        assert_eq!(offset0, 0);

        let offset1 = mem.read_word(0x7c * 4).unwrap();
        let segment1 = mem.read_word(0x7c * 4 + 2).unwrap();
        assert_eq!(segment1, ISR_SEGMENT);
        assert_eq!(offset1, ISR_STRIDE);

        let stub_address = physical_address(ISR_SEGMENT, offset1);
        assert!(!mem.is_empty(stub_address));
    }

    #[test]
    fn install_rejects_a_stub_longer_than_the_stride() {
        let mut mem = Memory::new();
        let slots = vec![Slot::Data(0); ISR_STRIDE as usize + 1];
        let images = vec![IsrImage::new(0x00, slots)];
        assert!(install(&mut mem, &images).is_err());
    }
}
