//! The Bus Interface Unit: segment registers, the instruction pointer, and
//! the six-slot prefetch queue that decouples fetch from execute.
//!
//! The BIU only ever needs read access to memory — it fetches code, it
//! never writes it — so [`run`](BusInterfaceUnit::run) takes `&dyn
//! Storage` rather than the read-write `StorageMut`.

use std::collections::VecDeque;

use crate::constants::{physical_address, PREFETCH_QUEUE_SIZE};
use crate::memory::Storage;
use crate::operand::Slot;
use crate::register::{SegmentId, SegmentRegisters};

/// Owns the segment registers, `IP`, and the prefetch queue.
pub struct BusInterfaceUnit {
    segments: SegmentRegisters,
    pre_fetch_ip: u16,
    queue: VecDeque<Slot>,
}

impl BusInterfaceUnit {
    pub fn new(segments: SegmentRegisters) -> BusInterfaceUnit {
        let pre_fetch_ip = segments.ip;
        BusInterfaceUnit {
            segments,
            pre_fetch_ip,
            queue: VecDeque::with_capacity(PREFETCH_QUEUE_SIZE),
        }
    }

    pub fn ip(&self) -> u16 {
        self.segments.ip
    }

    pub fn cs(&self) -> u16 {
        self.segments.cs
    }

    pub fn pre_fetch_ip(&self) -> u16 {
        self.pre_fetch_ip
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn read_segment(&self, id: SegmentId) -> u16 {
        self.segments.read(id)
    }

    /// Write a segment register. Writing `CS` flushes the prefetch queue
    /// (invariant 5); writing any other segment register does not, since
    /// only code fetch is affected by `CS`.
    pub fn write_segment(&mut self, id: SegmentId, value: u16) {
        self.segments.write(id, value);
        if id == SegmentId::CS {
            self.flush();
        }
    }

    /// Write `IP` directly, e.g. for a near jump. Always flushes, per
    /// invariant 5.
    pub fn write_ip(&mut self, ip: u16) {
        self.segments.ip = ip;
        self.flush();
    }

    /// Write `CS`, flushing. Convenience for far jumps/calls, which always
    /// pair this with [`write_ip`](BusInterfaceUnit::write_ip).
    pub fn write_cs(&mut self, cs: u16) {
        self.segments.cs = cs;
        self.flush();
    }

    /// Fill the prefetch queue from `[CS:pre_fetch_ip]` while it has at
    /// least two free slots and memory still has code to offer.
    pub fn run(&mut self, memory: &dyn Storage) {
        while self.queue.len() + 2 <= PREFETCH_QUEUE_SIZE {
            let address = physical_address(self.segments.cs, self.pre_fetch_ip);
            if memory.is_empty(address) {
                break;
            }
            let slot = match memory.slot(address) {
                Ok(slot) => slot.clone(),
                Err(_) => break,
            };
            self.queue.push_back(slot);
            self.pre_fetch_ip = self.pre_fetch_ip.wrapping_add(1);
        }
    }

    /// Discard the prefetch queue and restart fetching at the current
    /// `IP`. Mandated after any write to `CS` or `IP` (invariant 5).
    pub fn flush(&mut self) {
        self.queue.clear();
        self.pre_fetch_ip = self.segments.ip;
    }

    /// True iff there is at least one more instruction to fetch past the
    /// current prefetch cursor — used by the driver to detect "ran off
    /// the end of the program" termination.
    pub fn remaining_instruction(&self, memory: &dyn Storage) -> bool {
        let address = physical_address(self.segments.cs, self.pre_fetch_ip);
        !memory.is_empty(address)
    }

    /// Pop the next instruction slot off the queue, advancing the
    /// architectural `IP` by one (§4.6 "After decode, IP := IP + 1").
    /// Returns `None` if the queue is empty.
    pub fn dequeue(&mut self) -> Option<Slot> {
        let slot = self.queue.pop_front()?;
        self.segments.ip = self.segments.ip.wrapping_add(1);
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Memory, StorageMut};
    use crate::operand::{Instruction, Opcode};

    fn segs(cs: u16, ip: u16) -> SegmentRegisters {
        SegmentRegisters {
            cs,
            ds: 0,
            ss: 0,
            es: 0,
            ip,
        }
    }

    #[test]
    fn run_fills_queue_from_cs_ip_until_empty_sentinel() {
        let mut mem = Memory::new();
        let addr = physical_address(0x1000, 0);
        mem.write_instruction(addr, Instruction::new(Opcode::NOP, vec![]))
            .unwrap();
        mem.write_instruction(addr + 1, Instruction::new(Opcode::HLT, vec![]))
            .unwrap();

        let mut biu = BusInterfaceUnit::new(segs(0x1000, 0));
        biu.run(&mem);
        assert_eq!(biu.queue_len(), 2);
        assert!(!biu.remaining_instruction(&mem));
    }

    #[test]
    fn writing_ip_flushes_and_resets_pre_fetch_cursor() {
        let mut mem = Memory::new();
        let addr = physical_address(0x1000, 0);
        for i in 0..4u32 {
            mem.write_instruction(addr + i, Instruction::new(Opcode::NOP, vec![]))
                .unwrap();
        }
        let mut biu = BusInterfaceUnit::new(segs(0x1000, 0));
        biu.run(&mem);
        assert_eq!(biu.queue_len(), 4);

        biu.write_ip(2);
        assert_eq!(biu.queue_len(), 0);
        assert_eq!(biu.pre_fetch_ip(), 2);
    }

    #[test]
    fn dequeue_advances_ip_by_one() {
        let mut mem = Memory::new();
        let addr = physical_address(0x1000, 0);
        mem.write_instruction(addr, Instruction::new(Opcode::NOP, vec![]))
            .unwrap();
        let mut biu = BusInterfaceUnit::new(segs(0x1000, 0));
        biu.run(&mem);
        biu.dequeue().unwrap();
        assert_eq!(biu.ip(), 1);
    }
}
