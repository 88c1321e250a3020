//! Disassembler and raw bytecode dump.

use std::fmt::Write;

use super::{Chunk, Heap, Op};

/// Disassemble every instruction of `chunk` under a `== name ==` header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(heap, chunk, offset, &mut out);
    }
    out
}

/// Decode the instruction at `offset`, append one human-readable line (or
/// several for `OP_CLOSURE`) to `out`, and return the next offset.
///
/// Unknown opcodes are reported and skipped as one-byte instructions, and a
/// truncated operand is reported and ends the chunk, so a corrupt chunk
/// never stops the caller's loop.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{:04} ", offset);

    let line = chunk.line(offset);
    if offset > 0 && line.is_some() && chunk.line(offset - 1) == line {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", line.unwrap_or(0));
    }

    let Some(byte) = chunk.byte(offset) else {
        out.push_str("<end of chunk>\n");
        return offset + 1;
    };
    let op = match Op::try_from(byte) {
        Ok(op) => op,
        Err(byte) => {
            let _ = writeln!(out, "Unknown opcode {}", byte);
            return offset + 1;
        }
    };
    if offset + op.encoded_len() > chunk.len() {
        let _ = writeln!(out, "{:<16} <truncated operand>", op.name());
        return chunk.len();
    }

    match op {
        Op::Constant | Op::GetGlobal | Op::DefineGlobal | Op::SetGlobal => {
            constant_instruction(op, heap, chunk, offset, out)
        }
        Op::GetLocal | Op::SetLocal | Op::GetUpvalue | Op::SetUpvalue | Op::Call => {
            byte_instruction(op, chunk, offset, out)
        }
        Op::Jump | Op::JumpIfFalse | Op::Loop => jump_instruction(op, chunk, offset, out),
        Op::Closure => closure_instruction(heap, chunk, offset, out),
        _ => {
            let _ = writeln!(out, "{}", op.name());
            offset + 1
        }
    }
}

fn constant_instruction(op: Op, heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code()[offset + 1];
    let value = match chunk.constant(index as usize) {
        Some(value) => heap.format_value(value),
        None => "<bad constant>".to_string(),
    };
    let _ = writeln!(out, "{:<16} {:4} '{}'", op.name(), index, value);
    offset + 2
}

fn byte_instruction(op: Op, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code()[offset + 1];
    let _ = writeln!(out, "{:<16} {:4}", op.name(), slot);
    offset + 2
}

fn jump_instruction(op: Op, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let jump = read_u16(chunk, offset + 1);
    let sign: i64 = if op == Op::Loop { -1 } else { 1 };
    let target = (offset + 3) as i64 + sign * jump as i64;
    let _ = writeln!(out, "{:<16} {:4} -> {}", op.name(), offset, target);
    offset + 3
}

fn closure_instruction(heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let index = chunk.code()[offset + 1];
    let constant = chunk.constant(index as usize);
    let value = match constant {
        Some(value) => heap.format_value(value),
        None => "<bad constant>".to_string(),
    };
    let _ = writeln!(out, "{:<16} {:4} {}", Op::Closure.name(), index, value);

    let upvalue_count = constant
        .and_then(|v| v.as_obj())
        .and_then(|r| heap.function(r))
        .map_or(0, |f| f.upvalue_count);

    let mut offset = offset + 2;
    for _ in 0..upvalue_count {
        if offset + 2 > chunk.len() {
            let _ = writeln!(out, "{:04}      |                     <truncated upvalue>", offset);
            return chunk.len();
        }
        let is_local = chunk.code()[offset];
        let slot = chunk.code()[offset + 1];
        let _ = writeln!(
            out,
            "{:04}      |                     {} {}",
            offset,
            if is_local != 0 { "local" } else { "upvalue" },
            slot
        );
        offset += 2;
    }
    offset
}

fn read_u16(chunk: &Chunk, offset: usize) -> u16 {
    let code = chunk.code();
    ((code[offset] as u16) << 8) | code[offset + 1] as u16
}

/// Where the jump instruction at `offset` lands, or `None` if there is no
/// complete jump instruction there. Backward targets before the chunk start
/// are also `None`.
pub fn jump_target(chunk: &Chunk, offset: usize) -> Option<usize> {
    let op = Op::try_from(chunk.byte(offset)?).ok()?;
    if !matches!(op, Op::Jump | Op::JumpIfFalse | Op::Loop) || offset + 3 > chunk.len() {
        return None;
    }
    let jump = read_u16(chunk, offset + 1) as usize;
    if op == Op::Loop {
        (offset + 3).checked_sub(jump)
    } else {
        Some(offset + 3 + jump)
    }
}

/// Hex dump of the raw bytes, eight per row, each row tagged with the line
/// of its last byte.
pub fn print_bytecode(chunk: &Chunk) -> String {
    let mut out = format!("Bytecode (Count: {}):\n", chunk.len());
    for (i, byte) in chunk.code().iter().enumerate() {
        let _ = write!(out, "{:02x} ", byte);
        if (i + 1) % 8 == 0 || i + 1 == chunk.len() {
            let _ = writeln!(out, "\t(line {})", chunk.lines()[i]);
        }
    }
    out.push('\n');
    out
}
