//! The two-pass assembler driver.
//!
//! Pass 1 ([`scan`]) walks the preprocessed source once, building the
//! [`SymbolTable`] and, per segment, a list of [`PendingSlot`]s — data bytes
//! already resolved to their final value, instructions still carrying
//! unresolved [`RawOperand`]s. A symbol's offset is known the moment its
//! defining line is reached, because every slot (instruction or data byte)
//! occupies exactly one unit of a segment's address space; there is no
//! separate size-counting pass the way a real assembler needs one for
//! variable-length machine code.
//!
//! Pass 2 ([`resolve`]) walks every pending instruction and turns its
//! [`RawOperand`]s into real [`vcpu::Operand`]s by consulting the now
//! complete [`SymbolTable`]. A [`RawOperand::Symbol`]/`Variable`/`Offset`/
//! `Seg` that still does not resolve is reported as
//! [`Error::UndefinedSymbol`].

use std::collections::HashMap;
use std::str::FromStr;

use vcpu::{Instruction, Operand, Opcode, SegmentId, Slot};

use crate::ast::RawOperand;
use crate::data::{self, DataWidth};
use crate::error::{Error, Result};
use crate::instructions::{parse_instruction, PendingInstruction};
use crate::lexer::{self, Line};
use crate::numeric::parse_integer;
use crate::operand_parser::ParsedOperand;
use crate::symtab::{Symbol, SymbolKind, SymbolTable};
use vexfile::{Executable, SegmentImage};

enum PendingSlot {
    Data(u8),
    Instruction { line: u32, pending: PendingInstruction },
}

struct PendingSegment {
    register: SegmentId,
    slots: Vec<PendingSlot>,
}

/// Assemble `source` into a relocated [`Executable`] plus the
/// [`crate::source_map::SourceMap`] mapping assembled slots back to source
/// lines.
pub fn assemble(source: &str) -> Result<(Executable, crate::source_map::SourceMap)> {
    let lines = lexer::preprocess(source);
    let assume = prescan_assume(&lines)?;

    let mut symtab = SymbolTable::new();
    symtab.segment_id = assume;
    for (&register, &base) in default_bases().iter() {
        symtab.segment_address.insert(register, base);
    }

    let (order, mut segments, entry_label, source_map) = scan(&lines, &mut symtab)?;

    for (name, segment) in &segments {
        symtab.segment_length.insert(segment.register, segment.slots.len() as u16);
        let _ = name;
    }

    let (entry_segment, entry_offset) = match entry_label {
        Some((end_line, label)) => {
            let symbol = symtab
                .resolve(&label)
                .ok_or(Error::UnknownEntryLabel { line: end_line, label: label.clone() })?;
            (symbol.segment, symbol.offset)
        }
        None => {
            let first = order.first().cloned().unwrap_or(SegmentId::CS);
            (first, 0)
        }
    };

    let mut images = Vec::with_capacity(order.len());
    for register in &order {
        let segment = segments.remove(register).expect("segment recorded in scan order");
        let base = symtab
            .segment_address
            .get(register)
            .copied()
            .unwrap_or(0);
        let slots = resolve(&symtab, segment.slots)?;
        images.push(SegmentImage::new(*register, base, slots));
    }

    Ok((Executable::new(images, entry_segment, entry_offset), source_map))
}

fn default_bases() -> HashMap<SegmentId, u16> {
    let mut map = HashMap::new();
    map.insert(SegmentId::CS, vcpu::constants::DEFAULT_CS);
    map.insert(SegmentId::DS, vcpu::constants::DEFAULT_DS);
    map.insert(SegmentId::SS, vcpu::constants::DEFAULT_SS);
    map.insert(SegmentId::ES, vcpu::constants::DEFAULT_ES);
    map
}

/// Collect every `ASSUME` directive anywhere in the source before the main
/// walk, so a `SEGMENT` block can resolve its own owning register as soon
/// as it opens rather than waiting on an `ASSUME` line that might come
/// later in program order.
fn prescan_assume(lines: &[Line]) -> Result<HashMap<String, SegmentId>> {
    let mut map = HashMap::new();
    for line in lines {
        if line.tokens[0] != "ASSUME" {
            continue;
        }
        let body = line.text.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
        for pair in body.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let mut parts = pair.splitn(2, ':');
            let reg = parts.next().unwrap_or("").trim();
            let seg = parts.next().unwrap_or("").trim();
            if seg.is_empty() || seg == "NOTHING" {
                continue;
            }
            let register = SegmentId::from_str(reg)
                .map_err(|_| Error::MalformedOperand { line: line.number, operand: pair.to_string() })?;
            map.insert(seg.to_string(), register);
        }
    }
    Ok(map)
}

/// The main pass-1 walk: directive handling, label/variable definition, and
/// instruction parsing. Returns segment-open order (for deterministic
/// output), each segment's pending slots keyed by register, the `END`
/// directive's entry label (if any), and the source map.
#[allow(clippy::type_complexity)]
fn scan(
    lines: &[Line],
    symtab: &mut SymbolTable,
) -> Result<(
    Vec<SegmentId>,
    HashMap<SegmentId, PendingSegment>,
    Option<(u32, String)>,
    crate::source_map::SourceMap,
)> {
    let mut order = Vec::new();
    let mut segments: HashMap<SegmentId, PendingSegment> = HashMap::new();
    let mut current: Option<String> = None;
    let mut entry_label = None;
    let mut source_map = crate::source_map::SourceMap::new();

    for line in lines {
        let first = line.tokens[0].as_str();

        match first {
            "NAME" | "TITLE" | "ASSUME" => continue,
            "END" => {
                let rest = line.tokens.get(1).cloned();
                entry_label = rest.map(|label| (line.number, label));
                break;
            }
            "SEGMENT" => {
                return Err(Error::MalformedOperand { line: line.number, operand: line.text.clone() });
            }
            _ => {}
        }

        // `NAME SEGMENT` (segment-name-first form).
        if line.tokens.get(1).map(String::as_str) == Some("SEGMENT") {
            let name = first.to_string();
            let register = *symtab
                .segment_id
                .get(&name)
                .ok_or(Error::UnassignedSegment { line: line.number, segment: name.clone() })?;
            segments.entry(register).or_insert_with(|| PendingSegment { register, slots: Vec::new() });
            if !order.contains(&register) {
                order.push(register);
            }
            current = Some(name);
            continue;
        }

        // `NAME ENDS`.
        if line.tokens.get(1).map(String::as_str) == Some("ENDS") {
            let name = first.to_string();
            match &current {
                Some(open) if *open == name => current = None,
                Some(open) => {
                    return Err(Error::UnmatchedEnds { line: line.number, segment: format!("{} (expected {})", name, open) })
                }
                None => return Err(Error::UnmatchedEnds { line: line.number, segment: name }),
            }
            continue;
        }

        let segment_name = current
            .clone()
            .ok_or(Error::OutsideSegment { line: line.number })?;
        let register = *symtab
            .segment_id
            .get(&segment_name)
            .ok_or(Error::UnassignedSegment { line: line.number, segment: segment_name.clone() })?;
        let segment = segments
            .get_mut(&register)
            .expect("segment opened before use");

        handle_line(line, register, segment, symtab)?;
        source_map.push(crate::source_map::SourceMapItem {
            start_line: line.number,
            line_count: 1,
        });
    }

    if let Some(open) = current {
        return Err(Error::MissingEnds { line: lines.last().map(|l| l.number).unwrap_or(0), segment: open });
    }

    Ok((order, segments, entry_label, source_map))
}

fn handle_line(
    line: &Line,
    register: SegmentId,
    segment: &mut PendingSegment,
    symtab: &mut SymbolTable,
) -> Result<()> {
    let first = line.tokens[0].as_str();

    if first == "ORG" {
        let operand = line.tokens.get(1).ok_or(Error::MissingOperand { line: line.number })?;
        let target = parse_integer(line.number, operand)?;
        pad_to(segment, target.max(0) as u16);
        return Ok(());
    }
    if first == "EVEN" {
        if segment.slots.len() % 2 != 0 {
            segment.slots.push(PendingSlot::Data(0));
        }
        return Ok(());
    }
    if first == "ALIGN" {
        let operand = line.tokens.get(1).ok_or(Error::MissingOperand { line: line.number })?;
        let boundary = parse_integer(line.number, operand)?;
        if boundary <= 0 || (boundary as u32).count_ones() != 1 {
            return Err(Error::NonPowerOfTwoAlign { line: line.number, value: boundary });
        }
        let boundary = boundary as u16;
        let remainder = segment.slots.len() as u16 % boundary;
        if remainder != 0 {
            pad_to(segment, segment.slots.len() as u16 + (boundary - remainder));
        }
        return Ok(());
    }

    // Label definition: `NAME:` optionally followed by more on the same
    // line (rare in practice, but cheap to allow).
    if first.ends_with(':') {
        let name = first.trim_end_matches(':').to_string();
        symtab.labels.insert(
            name,
            Symbol { segment: register, offset: segment.slots.len() as u16, kind: SymbolKind::Label },
        );
        if line.tokens.len() == 1 {
            return Ok(());
        }
        let rest_tokens = &line.tokens[1..];
        let rest_text = line.text.splitn(2, ':').nth(1).unwrap_or("").trim();
        if rest_text.is_empty() {
            return Ok(());
        }
        return emit_instruction(line.number, rest_tokens, rest_text, segment);
    }

    // Variable definition: `NAME DB/DW/DD elements`.
    if let Some(width) = line.tokens.get(1).and_then(|tok| data_width(tok)) {
        let name = first.to_string();
        symtab.variables.insert(
            name,
            Symbol { segment: register, offset: segment.slots.len() as u16, kind: SymbolKind::Variable },
        );
        let directive = line.tokens[1].as_str();
        let body = after_directive(&line.text, directive);
        let elements = lexer::split_operands(&body);
        let bytes = data::expand(line.number, width, &elements)?;
        for byte in bytes {
            segment.slots.push(PendingSlot::Data(byte));
        }
        return Ok(());
    }

    // A bare `DB`/`DW`/`DD` with no name (anonymous storage).
    if let Some(width) = data_width(first) {
        let body = after_directive(&line.text, first);
        let elements = lexer::split_operands(&body);
        let bytes = data::expand(line.number, width, &elements)?;
        for byte in bytes {
            segment.slots.push(PendingSlot::Data(byte));
        }
        return Ok(());
    }

    emit_instruction(line.number, &line.tokens, &line.text, segment)
}

fn emit_instruction(
    line_number: u32,
    tokens: &[String],
    text: &str,
    segment: &mut PendingSegment,
) -> Result<()> {
    let pending = parse_instruction(line_number, tokens, text)?;
    segment.slots.push(PendingSlot::Instruction { line: line_number, pending });
    Ok(())
}

fn data_width(token: &str) -> Option<DataWidth> {
    match token {
        "DB" => Some(DataWidth::Byte),
        "DW" => Some(DataWidth::Word),
        "DD" => Some(DataWidth::Dword),
        _ => None,
    }
}

fn after_directive(text: &str, directive: &str) -> String {
    match text.find(directive) {
        Some(idx) => text[idx + directive.len()..].trim().to_string(),
        None => String::new(),
    }
}

fn pad_to(segment: &mut PendingSegment, target: u16) {
    while (segment.slots.len() as u16) < target {
        segment.slots.push(PendingSlot::Data(0));
    }
}

/// Pass 2: resolve every pending instruction's operands against the now
/// complete symbol table.
fn resolve(symtab: &SymbolTable, slots: Vec<PendingSlot>) -> Result<Vec<Slot>> {
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        out.push(match slot {
            PendingSlot::Data(byte) => Slot::Data(byte),
            PendingSlot::Instruction { line, pending } => {
                Slot::Instruction(resolve_instruction(symtab, line, pending)?)
            }
        });
    }
    Ok(out)
}

fn resolve_instruction(symtab: &SymbolTable, line: u32, pending: PendingInstruction) -> Result<Instruction> {
    let is_transfer = pending.opcode == Opcode::JMP
        || pending.opcode == Opcode::CALL
        || pending.opcode.is_conditional_jump()
        || pending.opcode.is_loop();

    let mut width_override = None;
    let mut operands = Vec::with_capacity(pending.operands.len());
    for parsed in pending.operands {
        if width_override.is_none() {
            width_override = parsed.width_override;
        }
        operands.push(resolve_operand(symtab, line, parsed, is_transfer)?);
    }

    let mut instruction = Instruction::new(pending.opcode, operands);
    instruction.rep_prefix = pending.rep_prefix;
    instruction.width_override = width_override;
    Ok(instruction)
}

fn resolve_operand(
    symtab: &SymbolTable,
    line: u32,
    parsed: ParsedOperand,
    is_transfer: bool,
) -> Result<Operand> {
    Ok(match parsed.raw {
        RawOperand::Register(reg) => Operand::Reg(reg),
        RawOperand::SegmentRegister(seg) => Operand::SegReg(seg),
        RawOperand::Immediate(value) => Operand::Imm(value),
        RawOperand::Memory { segment_override, base, index, displacement } => {
            Operand::mem(segment_override, base, index, displacement)
        }
        RawOperand::Variable { name, segment_override, base, index, displacement } => {
            let symbol = symtab
                .resolve(&name)
                .ok_or(Error::UndefinedSymbol { line, name: name.clone() })?;
            let override_register = segment_override.or(Some(symbol.segment));
            Operand::mem(override_register, base, index, displacement + symbol.offset as i32)
        }
        RawOperand::Offset(name) => {
            let symbol = symtab
                .resolve(&name)
                .ok_or(Error::UndefinedSymbol { line, name: name.clone() })?;
            Operand::Imm(symbol.offset as i32)
        }
        RawOperand::Seg(name) => {
            let base = symtab
                .segment_base_of(&name)
                .ok_or(Error::UndefinedSymbol { line, name: name.clone() })?;
            Operand::Imm(base as i32)
        }
        RawOperand::Type(_name) => Operand::Imm(0),
        RawOperand::Symbol { name, far } => {
            if !is_transfer {
                if let Some(&register) = symtab.segment_id.get(&name) {
                    let base = symtab.segment_address.get(&register).copied().unwrap_or(0);
                    return Ok(Operand::Imm(base as i32));
                }
            }
            let symbol = symtab
                .resolve(&name)
                .ok_or(Error::UndefinedSymbol { line, name: name.clone() })?;
            if is_transfer {
                if far || parsed.far {
                    let base = symtab.segment_address.get(&symbol.segment).copied().unwrap_or(0);
                    Operand::FarPtr { segment: base, offset: symbol.offset }
                } else {
                    Operand::Imm(symbol.offset as i32)
                }
            } else {
                Operand::mem(Some(symbol.segment), None, None, symbol.offset as i32)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcpu::{Opcode, RegisterId, SegmentId, Slot};

    const PROGRAM: &str = "\
DATA SEGMENT
MSG DB \"HI$\"
DATA ENDS
CODE SEGMENT
ASSUME CS:CODE, DS:DATA
START:
MOV AX, DATA
MOV DS, AX
MOV DX, OFFSET MSG
MOV AH, 9
INT 21H
MOV AH, 4CH
INT 21H
CODE ENDS
END START
";

    #[test]
    fn assembles_a_small_dos_program() {
        let (executable, _map) = assemble(PROGRAM).unwrap();
        assert_eq!(executable.entry_segment, SegmentId::CS);
        assert_eq!(executable.entry_offset, 0);

        let data = executable.segment(SegmentId::DS).unwrap();
        assert_eq!(data.slots, vec![Slot::Data(b'H'), Slot::Data(b'I'), Slot::Data(b'$')]);

        let code = executable.segment(SegmentId::CS).unwrap();
        match &code.slots[2] {
            Slot::Instruction(instr) => {
                assert_eq!(instr.opcode, Opcode::MOV);
                assert_eq!(instr.operands[0], Operand::Reg(RegisterId::DX));
                assert_eq!(instr.operands[1], Operand::Imm(0));
            }
            other => panic!("expected instruction, found {:?}", other),
        }
    }

    #[test]
    fn undefined_symbol_is_reported() {
        let source = "CODE SEGMENT\nASSUME CS:CODE\nJMP NOWHERE\nCODE ENDS\nEND\n";
        assert!(assemble(source).is_err());
    }

    #[test]
    fn instruction_outside_a_segment_is_rejected() {
        let source = "MOV AX, 1\n";
        assert!(assemble(source).is_err());
    }
}
