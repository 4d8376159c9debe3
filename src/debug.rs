//! # Disassembler
//!
//! Read-only development tracing, grounded on clox's `debug.c` (no
//! teacher analogue — OMG ships no disassembler). Never touches program
//! semantics or stdout; everything here writes to stderr and is gated
//! behind the `WISP_TRACE`/`WISP_DUMP_CHUNK` env vars read once in
//! `Vm::new`/`Vm::interpret`.

use crate::chunk::{Chunk, OpCode};
use crate::gc::Heap;

pub fn disassemble_chunk(chunk: &Chunk, name: &str, heap: &Heap) {
    eprintln!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code_len() {
        offset = disassemble_instruction(chunk, offset, heap);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    eprint!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        eprint!("   | ");
    } else {
        eprint!("{:4} ", chunk.lines[offset]);
    }

    let op = OpCode::from_u8(chunk.code[offset]);
    match op {
        OpCode::Constant => constant_instruction("OP_CONSTANT", chunk, offset, heap),
        OpCode::Nil => simple_instruction("OP_NIL", offset),
        OpCode::True => simple_instruction("OP_TRUE", offset),
        OpCode::False => simple_instruction("OP_FALSE", offset),
        OpCode::Pop => simple_instruction("OP_POP", offset),
        OpCode::GetLocal => byte_instruction("OP_GET_LOCAL", chunk, offset),
        OpCode::SetLocal => byte_instruction("OP_SET_LOCAL", chunk, offset),
        OpCode::GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, offset, heap),
        OpCode::DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, offset, heap),
        OpCode::SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, offset, heap),
        OpCode::GetUpvalue => byte_instruction("OP_GET_UPVALUE", chunk, offset),
        OpCode::SetUpvalue => byte_instruction("OP_SET_UPVALUE", chunk, offset),
        OpCode::GetProperty => constant_instruction("OP_GET_PROPERTY", chunk, offset, heap),
        OpCode::SetProperty => constant_instruction("OP_SET_PROPERTY", chunk, offset, heap),
        OpCode::GetSuper => constant_instruction("OP_GET_SUPER", chunk, offset, heap),
        OpCode::Equal => simple_instruction("OP_EQUAL", offset),
        OpCode::Greater => simple_instruction("OP_GREATER", offset),
        OpCode::Less => simple_instruction("OP_LESS", offset),
        OpCode::Add => simple_instruction("OP_ADD", offset),
        OpCode::Subtract => simple_instruction("OP_SUBTRACT", offset),
        OpCode::Multiply => simple_instruction("OP_MULTIPLY", offset),
        OpCode::Divide => simple_instruction("OP_DIVIDE", offset),
        OpCode::Not => simple_instruction("OP_NOT", offset),
        OpCode::Negate => simple_instruction("OP_NEGATE", offset),
        OpCode::Print => simple_instruction("OP_PRINT", offset),
        OpCode::Jump => jump_instruction("OP_JUMP", 1, chunk, offset),
        OpCode::JumpIfFalse => jump_instruction("OP_JUMP_IF_FALSE", 1, chunk, offset),
        OpCode::Loop => jump_instruction("OP_LOOP", -1, chunk, offset),
        OpCode::Call => byte_instruction("OP_CALL", chunk, offset),
        OpCode::Invoke => invoke_instruction("OP_INVOKE", chunk, offset, heap),
        OpCode::SuperInvoke => invoke_instruction("OP_SUPER_INVOKE", chunk, offset, heap),
        OpCode::Closure => closure_instruction(chunk, offset, heap),
        OpCode::CloseUpvalue => simple_instruction("OP_CLOSE_UPVALUE", offset),
        OpCode::Return => simple_instruction("OP_RETURN", offset),
        OpCode::Class => constant_instruction("OP_CLASS", chunk, offset, heap),
        OpCode::Inherit => simple_instruction("OP_INHERIT", offset),
        OpCode::Method => constant_instruction("OP_METHOD", chunk, offset, heap),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    eprintln!("{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    eprintln!("{:<16} {:4}", name, slot);
    offset + 2
}

fn jump_instruction(name: &str, sign: i32, chunk: &Chunk, offset: usize) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = (hi << 8) | lo;
    let target = offset as i64 + 3 + sign as i64 * jump as i64;
    eprintln!("{:<16} {:4} -> {}", name, offset, target);
    offset + 3
}

fn constant_instruction(name: &str, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    eprintln!("{:<16} {:4} '{}'", name, index, value.display(heap));
    offset + 2
}

fn invoke_instruction(name: &str, chunk: &Chunk, offset: usize, heap: &Heap) -> usize {
    let index = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    let value = chunk.constants[index as usize];
    eprintln!("{:<16} ({} args) {:4} '{}'", name, argc, index, value.display(heap));
    offset + 3
}

fn closure_instruction(chunk: &Chunk, mut offset: usize, heap: &Heap) -> usize {
    offset += 1;
    let index = chunk.code[offset];
    offset += 1;
    let value = chunk.constants[index as usize];
    eprintln!("{:<16} {:4} '{}'", "OP_CLOSURE", index, value.display(heap));

    if let Some(obj) = value.as_obj() {
        if let Some(function) = heap.get(obj).as_function() {
            for _ in 0..function.upvalue_count {
                let is_local = chunk.code[offset] != 0;
                offset += 1;
                let upvalue_index = chunk.code[offset];
                offset += 1;
                eprintln!(
                    "{:04}      |                     {} {}",
                    offset - 2,
                    if is_local { "local" } else { "upvalue" },
                    upvalue_index
                );
            }
        }
    }
    offset
}
