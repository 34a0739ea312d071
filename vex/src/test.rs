use super::*;
use vcpu::io::BufferIo;
use vcpu::register::RegisterId;

fn wrapped(body: &str) -> String {
    format!(
        "CODE SEGMENT\nASSUME CS:CODE\n{}\nHLT\nCODE ENDS\nEND\n",
        body
    )
}

#[test]
fn add_without_carry_or_overflow() {
    let source = wrapped("MOV AL, 5\nMOV BL, 3\nADD AL, BL");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read8(RegisterId::AL), 8);
    assert!(!machine.flags().zero);
    assert!(!machine.flags().carry);
    assert!(!machine.flags().overflow);
}

#[test]
fn add_wraps_and_sets_carry_and_zero() {
    let source = wrapped("MOV AL, 0FFH\nADD AL, 1");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read8(RegisterId::AL), 0);
    assert!(machine.flags().zero);
    assert!(machine.flags().carry);
    assert!(!machine.flags().overflow);
}

#[test]
fn sixteen_bit_division_splits_across_dx_ax() {
    let source = wrapped("MOV AX, 1000H\nMOV BX, 2\nXOR DX, DX\nDIV BX");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read16(RegisterId::AX), 0x0800);
    assert_eq!(machine.registers().read16(RegisterId::DX), 0);
}

#[test]
fn loop_counts_down_to_zero() {
    let source = wrapped("MOV CX, 3\nL1: INC AX\nLOOP L1");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read16(RegisterId::AX), 3);
    assert_eq!(machine.registers().read16(RegisterId::CX), 0);
}

#[test]
fn shl_by_one_sets_carry_and_sign() {
    let source = wrapped("MOV AX, 0FFFFH\nSHL AX, 1");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read16(RegisterId::AX), 0xfffe);
    assert!(machine.flags().carry);
    assert!(machine.flags().sign);
}

#[test]
fn dos_print_string_then_exit_reports_the_requested_code() {
    let source = "\
DATA SEGMENT
MSG DB \"HI$\"
DATA ENDS
CODE SEGMENT
ASSUME CS:CODE, DS:DATA
START:
MOV AX, DATA
MOV DS, AX
MOV AH, 9
MOV DX, OFFSET MSG
INT 21H
MOV AH, 4CH
MOV AL, 7
INT 21H
CODE ENDS
END START
";
    let (machine, outcome) = assemble_and_run(source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Exited(7));
    assert!(machine.io().output_string().contains("HI"));
}

#[test]
fn flags_round_trip_through_memory_via_pushf_popf() {
    let source = wrapped("STC\nPUSHF\nPOP AX\nPUSH AX\nPOPF");
    let (machine, outcome) = assemble_and_run(&source, BufferIo::default()).unwrap();
    assert_eq!(outcome, RunOutcome::Halted);
    assert!(machine.flags().carry);
}

#[test]
fn run_vexfile_executes_a_previously_assembled_container() {
    let source = wrapped("MOV AL, 5\nMOV BL, 3\nADD AL, BL");
    let (executable, _source_map) = vasm::assemble(&source).unwrap();

    let dir = std::env::temp_dir();
    let path = dir.join(format!("vex-test-{}.vex", std::process::id()));
    vexfile::write_file(&path, &executable).unwrap();

    let (machine, outcome) = run_vexfile(&path, BufferIo::default()).unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(outcome, RunOutcome::Halted);
    assert_eq!(machine.registers().read8(RegisterId::AL), 8);
}
