//! The interrupt service routines this binary ships: assembled from source
//! at startup and relocated into memory the same way a user program's own
//! segments are (see [`vcpu::isr`]), since `vcpu` itself cannot depend on
//! `vasm` without creating a dependency cycle.

use vcpu::memory::StorageMut;
use vcpu::{install_isrs, IsrImage, SegmentId};

use crate::Error;

const STUBS: &[(u8, &str)] = &[
    (0x00, include_str!("../isr_stubs/divide_error.asm")),
    (0x01, include_str!("../isr_stubs/single_step.asm")),
    (0x02, include_str!("../isr_stubs/nmi.asm")),
    (0x03, include_str!("../isr_stubs/breakpoint.asm")),
    (0x04, include_str!("../isr_stubs/overflow.asm")),
    (0x7c, include_str!("../isr_stubs/reserved_7c.asm")),
];

/// Assemble every bundled stub and relocate it into `memory`.
pub fn install(memory: &mut dyn StorageMut) -> Result<(), Error> {
    let mut images = Vec::with_capacity(STUBS.len());
    for &(vector, source) in STUBS {
        let (executable, _map) = vasm::assemble(source)?;
        let code = executable
            .segment(SegmentId::CS)
            .expect("every bundled isr stub assembles a CODE segment");
        images.push(IsrImage::new(vector, code.slots.clone()));
    }
    install_isrs(memory, &images)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcpu::memory::Memory;

    #[test]
    fn bundled_stubs_assemble_and_install_without_error() {
        let mut memory = Memory::new();
        install(&mut memory).unwrap();
    }
}
