use super::*;
use vcpu::{Instruction, Opcode, Operand, RegisterId};

#[test]
fn write_read_round_trips_a_multi_segment_executable() {
    let path = "test_round_trip.vex";

    let code = SegmentImage::new(
        SegmentId::CS,
        0x3000,
        vec![
            Slot::Instruction(Instruction::new(
                Opcode::MOV,
                vec![Operand::Reg(RegisterId::AX), Operand::Imm(5)],
            )),
            Slot::Instruction(Instruction::new(Opcode::HLT, vec![])),
        ],
    );
    let data = SegmentImage::new(
        SegmentId::DS,
        0x2000,
        vec![Slot::Data(b'H'), Slot::Data(b'I'), Slot::Data(b'$')],
    );
    let executable_orig = Executable::new(vec![code, data], SegmentId::CS, 0);

    write_file(path, &executable_orig).unwrap();
    let executable_read = read_file(path).unwrap();

    assert_eq!(executable_orig, executable_read);

    std::fs::remove_file(path).unwrap();
}

#[test]
fn segment_looks_up_by_register() {
    let data = SegmentImage::new(SegmentId::DS, 0x2000, vec![Slot::Data(1)]);
    let executable = Executable::new(vec![data], SegmentId::CS, 0);

    assert!(executable.segment(SegmentId::DS).is_some());
    assert!(executable.segment(SegmentId::ES).is_none());
}
