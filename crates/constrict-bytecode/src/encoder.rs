//! Bytecode encoding and decoding utilities
//!
//! This module provides tools for encoding and decoding Constrict bytecode
//! instructions. Jump operands are signed 32-bit offsets relative to the end
//! of the jump instruction.

use crate::opcode::Opcode;
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#x} at offset {1}")]
    InvalidOpcode(u8, usize),

    /// Jump to an offset that is not an instruction boundary
    #[error("Invalid jump target {target} at offset {offset}")]
    InvalidJumpTarget {
        /// Resolved absolute target offset
        target: u32,
        /// Offset of the jump instruction
        offset: u32,
    },
}

/// Bytecode writer for encoding instructions
///
/// Provides methods for emitting opcodes and their operands into a binary
/// buffer, plus patchable jump sites for forward branches.
#[derive(Default)]
pub struct BytecodeWriter {
    /// Internal buffer containing the bytecode
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> u32 {
        self.buffer.len() as u32
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 16-bit signed integer (little-endian)
    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    // ===== Stack Manipulation & Constants =====

    /// Emit NOP instruction
    pub fn emit_nop(&mut self) {
        self.emit_opcode(Opcode::Nop);
    }

    /// Emit POP instruction
    pub fn emit_pop(&mut self) {
        self.emit_opcode(Opcode::Pop);
    }

    /// Emit DUP instruction
    pub fn emit_dup(&mut self) {
        self.emit_opcode(Opcode::Dup);
    }

    /// Emit SWAP instruction
    pub fn emit_swap(&mut self) {
        self.emit_opcode(Opcode::Swap);
    }

    /// Emit CONST_NULL instruction
    pub fn emit_const_null(&mut self) {
        self.emit_opcode(Opcode::ConstNull);
    }

    /// Emit CONST_TRUE instruction
    pub fn emit_const_true(&mut self) {
        self.emit_opcode(Opcode::ConstTrue);
    }

    /// Emit CONST_FALSE instruction
    pub fn emit_const_false(&mut self) {
        self.emit_opcode(Opcode::ConstFalse);
    }

    /// Emit CONST_I32 instruction
    pub fn emit_const_i32(&mut self, value: i32) {
        self.emit_opcode(Opcode::ConstI32);
        self.emit_i32(value);
    }

    /// Emit CONST_I64 instruction
    pub fn emit_const_i64(&mut self, value: i64) {
        self.emit_opcode(Opcode::ConstI64);
        self.emit_i64(value);
    }

    /// Emit CONST_F64 instruction
    pub fn emit_const_f64(&mut self, value: f64) {
        self.emit_opcode(Opcode::ConstF64);
        self.emit_f64(value);
    }

    /// Emit CONST_STR instruction (string pool index)
    pub fn emit_const_str(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstStr);
        self.emit_u32(index);
    }

    /// Emit CONST_CLASS instruction (class ref index)
    pub fn emit_const_class(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstClass);
        self.emit_u32(index);
    }

    // ===== Local Variables =====

    /// Emit LOAD_LOCAL instruction
    pub fn emit_load_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(index);
    }

    /// Emit STORE_LOCAL instruction
    pub fn emit_store_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(index);
    }

    /// Emit INC_LOCAL instruction
    pub fn emit_inc_local(&mut self, index: u16, delta: i16) {
        self.emit_opcode(Opcode::IncLocal);
        self.emit_u16(index);
        self.emit_i16(delta);
    }

    // ===== Arithmetic =====

    /// Emit IADD instruction
    pub fn emit_iadd(&mut self) {
        self.emit_opcode(Opcode::Iadd);
    }

    /// Emit ISUB instruction
    pub fn emit_isub(&mut self) {
        self.emit_opcode(Opcode::Isub);
    }

    /// Emit IMUL instruction
    pub fn emit_imul(&mut self) {
        self.emit_opcode(Opcode::Imul);
    }

    /// Emit ILT instruction
    pub fn emit_ilt(&mut self) {
        self.emit_opcode(Opcode::Ilt);
    }

    // ===== Control Flow =====

    /// Emit a jump instruction with a placeholder offset
    ///
    /// Returns a patch site to be resolved with [`Self::patch_jump`] once the
    /// target offset is known.
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpSite {
        debug_assert!(opcode.is_jump());
        self.emit_opcode(opcode);
        let operand_pos = self.buffer.len();
        self.emit_i32(0);
        JumpSite { operand_pos }
    }

    /// Emit a jump instruction targeting an already emitted offset
    pub fn emit_jump_to(&mut self, opcode: Opcode, target: u32) {
        debug_assert!(opcode.is_jump());
        self.emit_opcode(opcode);
        let end_of_insn = self.buffer.len() as i64 + 4;
        self.emit_i32((target as i64 - end_of_insn) as i32);
    }

    /// Resolve a forward jump to the current offset
    pub fn patch_jump(&mut self, site: JumpSite) {
        let target = self.buffer.len() as i64;
        let end_of_insn = site.operand_pos as i64 + 4;
        let relative = (target - end_of_insn) as i32;
        self.buffer[site.operand_pos..site.operand_pos + 4]
            .copy_from_slice(&relative.to_le_bytes());
    }

    /// Emit RETURN instruction
    pub fn emit_return(&mut self) {
        self.emit_opcode(Opcode::Return);
    }

    /// Emit RETURN_VOID instruction
    pub fn emit_return_void(&mut self) {
        self.emit_opcode(Opcode::ReturnVoid);
    }

    /// Emit THROW instruction
    pub fn emit_throw(&mut self) {
        self.emit_opcode(Opcode::Throw);
    }

    // ===== Calls, Fields, Objects & Arrays =====

    /// Emit CALL instruction (method ref index)
    pub fn emit_call(&mut self, method: u32) {
        self.emit_opcode(Opcode::Call);
        self.emit_u32(method);
    }

    /// Emit NEW instruction (class ref index)
    pub fn emit_new(&mut self, class: u32) {
        self.emit_opcode(Opcode::New);
        self.emit_u32(class);
    }

    /// Emit LOAD_FIELD instruction (field ref index)
    pub fn emit_load_field(&mut self, field: u32) {
        self.emit_opcode(Opcode::LoadField);
        self.emit_u32(field);
    }

    /// Emit STORE_FIELD instruction (field ref index)
    pub fn emit_store_field(&mut self, field: u32) {
        self.emit_opcode(Opcode::StoreField);
        self.emit_u32(field);
    }

    /// Emit LOAD_STATIC instruction (field ref index)
    pub fn emit_load_static(&mut self, field: u32) {
        self.emit_opcode(Opcode::LoadStatic);
        self.emit_u32(field);
    }

    /// Emit STORE_STATIC instruction (field ref index)
    pub fn emit_store_static(&mut self, field: u32) {
        self.emit_opcode(Opcode::StoreStatic);
        self.emit_u32(field);
    }

    /// Emit CAST_CHECK instruction (class ref index)
    pub fn emit_cast_check(&mut self, class: u32) {
        self.emit_opcode(Opcode::CastCheck);
        self.emit_u32(class);
    }

    /// Emit INSTANCE_OF instruction (class ref index)
    pub fn emit_instance_of(&mut self, class: u32) {
        self.emit_opcode(Opcode::InstanceOf);
        self.emit_u32(class);
    }

    /// Emit NEW_ARRAY instruction (class ref index of the element type)
    pub fn emit_new_array(&mut self, element_class: u32) {
        self.emit_opcode(Opcode::NewArray);
        self.emit_u32(element_class);
    }

    /// Emit LOAD_ELEM instruction
    pub fn emit_load_elem(&mut self) {
        self.emit_opcode(Opcode::LoadElem);
    }

    /// Emit STORE_ELEM instruction
    pub fn emit_store_elem(&mut self) {
        self.emit_opcode(Opcode::StoreElem);
    }

    /// Emit ARRAY_LEN instruction
    pub fn emit_array_len(&mut self) {
        self.emit_opcode(Opcode::ArrayLen);
    }
}

/// Patchable operand position of a forward jump
#[derive(Debug, Clone, Copy)]
pub struct JumpSite {
    operand_pos: usize,
}

/// Bytecode reader for decoding instructions
pub struct BytecodeReader<'a> {
    code: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader over a bytecode buffer
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, position: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether more bytes remain
    pub fn has_more(&self) -> bool {
        self.position < self.code.len()
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .code
            .get(self.position)
            .ok_or(DecodeError::UnexpectedEnd(self.position))?;
        self.position += 1;
        Ok(byte)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a 16-bit signed integer (little-endian)
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        let end = self.position + count;
        if end > self.code.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let bytes = self.code[self.position..end].to_vec();
        self.position = end;
        Ok(bytes)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.position + N;
        if end > self.code.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let mut array = [0u8; N];
        array.copy_from_slice(&self.code[self.position..end]);
        self.position = end;
        Ok(array)
    }
}
