//! Instruction decoding
//!
//! Turns a function's raw code bytes into a list of structured instructions
//! with resolved jump targets, the form consumed by the analysis passes.

use crate::encoder::{BytecodeReader, DecodeError};
use crate::opcode::Opcode;

/// A decoded instruction with its offset in the code stream
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode
    pub offset: u32,
    /// Decoded operation
    pub insn: Insn,
}

/// Decoded operation with structured operands
///
/// Jump targets are absolute code offsets, already resolved from the
/// relative encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// No operation
    Nop,
    /// Pop top of stack
    Pop,
    /// Duplicate top of stack
    Dup,
    /// Swap top two stack values
    Swap,
    /// Push null
    ConstNull,
    /// Push boolean
    ConstBool(bool),
    /// Push 32-bit integer
    ConstI32(i32),
    /// Push 64-bit integer
    ConstI64(i64),
    /// Push 64-bit float
    ConstF64(f64),
    /// Push string literal (pool index)
    ConstStr(u32),
    /// Push class literal (class ref index)
    ConstClass(u32),
    /// Load local variable
    LoadLocal(u16),
    /// Store local variable
    StoreLocal(u16),
    /// Increment local variable in place
    IncLocal(u16, i16),
    /// Binary operation popping two values and pushing one
    Binary(Opcode),
    /// Unary operation replacing the top of stack
    Unary(Opcode),
    /// Unconditional jump
    Jmp {
        /// Absolute target offset
        target: u32,
    },
    /// Conditional jump popping one operand
    Branch {
        /// The branch opcode
        opcode: Opcode,
        /// Absolute target offset
        target: u32,
    },
    /// Return top of stack
    Return,
    /// Return without a value
    ReturnVoid,
    /// Throw top of stack
    Throw,
    /// Invoke method (method ref index)
    Call(u32),
    /// Allocate object (class ref index)
    New(u32),
    /// Load instance field (field ref index)
    LoadField(u32),
    /// Store instance field (field ref index)
    StoreField(u32),
    /// Load static field (field ref index)
    LoadStatic(u32),
    /// Store static field (field ref index)
    StoreStatic(u32),
    /// Checked cast (class ref index)
    CastCheck(u32),
    /// Instance-of test (class ref index)
    InstanceOf(u32),
    /// Allocate array (class ref index of element type)
    NewArray(u32),
    /// Load array element
    LoadElem,
    /// Store array element
    StoreElem,
    /// Array length
    ArrayLen,
}

impl Insn {
    /// Normal (non-exception) successor offsets of this instruction
    ///
    /// `next` is the offset of the following instruction, or `None` at the
    /// end of the code stream.
    pub fn successors(&self, next: Option<u32>) -> Vec<u32> {
        match self {
            Self::Return | Self::ReturnVoid | Self::Throw => Vec::new(),
            Self::Jmp { target } => vec![*target],
            Self::Branch { target, .. } => match next {
                Some(next) if next != *target => vec![*target, next],
                _ => vec![*target],
            },
            _ => next.into_iter().collect(),
        }
    }

    /// Whether this instruction can transfer control to an exception handler
    pub fn can_throw(&self) -> bool {
        matches!(
            self,
            Self::Binary(Opcode::Idiv | Opcode::Imod)
                | Self::Throw
                | Self::Call(_)
                | Self::New(_)
                | Self::LoadField(_)
                | Self::StoreField(_)
                | Self::LoadStatic(_)
                | Self::StoreStatic(_)
                | Self::CastCheck(_)
                | Self::NewArray(_)
                | Self::LoadElem
                | Self::StoreElem
                | Self::ArrayLen
        )
    }
}

/// Decode a function's code bytes into structured instructions
///
/// Validates that every jump lands on an instruction boundary; malformed
/// code fails fast with a [`DecodeError`].
pub fn decode_function(code: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut reader = BytecodeReader::new(code);

    while reader.has_more() {
        let offset = reader.position() as u32;
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset as usize))?;
        let insn = decode_insn(opcode, offset, &mut reader)?;
        instructions.push(Instruction { offset, insn });
    }

    let boundaries: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
    for instruction in &instructions {
        let target = match &instruction.insn {
            Insn::Jmp { target } => *target,
            Insn::Branch { target, .. } => *target,
            _ => continue,
        };
        if !boundaries.contains(&target) {
            return Err(DecodeError::InvalidJumpTarget {
                target,
                offset: instruction.offset,
            });
        }
    }

    Ok(instructions)
}

fn decode_insn(
    opcode: Opcode,
    offset: u32,
    reader: &mut BytecodeReader<'_>,
) -> Result<Insn, DecodeError> {
    let insn = match opcode {
        Opcode::Nop => Insn::Nop,
        Opcode::Pop => Insn::Pop,
        Opcode::Dup => Insn::Dup,
        Opcode::Swap => Insn::Swap,

        Opcode::ConstNull => Insn::ConstNull,
        Opcode::ConstTrue => Insn::ConstBool(true),
        Opcode::ConstFalse => Insn::ConstBool(false),
        Opcode::ConstI32 => Insn::ConstI32(reader.read_i32()?),
        Opcode::ConstI64 => Insn::ConstI64(reader.read_i64()?),
        Opcode::ConstF64 => Insn::ConstF64(reader.read_f64()?),
        Opcode::ConstStr => Insn::ConstStr(reader.read_u32()?),
        Opcode::ConstClass => Insn::ConstClass(reader.read_u32()?),

        Opcode::LoadLocal => Insn::LoadLocal(reader.read_u16()?),
        Opcode::StoreLocal => Insn::StoreLocal(reader.read_u16()?),
        Opcode::IncLocal => Insn::IncLocal(reader.read_u16()?, reader.read_i16()?),

        Opcode::Iadd
        | Opcode::Isub
        | Opcode::Imul
        | Opcode::Idiv
        | Opcode::Imod
        | Opcode::Iand
        | Opcode::Ior
        | Opcode::Ixor
        | Opcode::Ishl
        | Opcode::Ishr
        | Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul
        | Opcode::Fdiv
        | Opcode::Ieq
        | Opcode::Ine
        | Opcode::Ilt
        | Opcode::Ile
        | Opcode::Igt
        | Opcode::Ige
        | Opcode::Feq
        | Opcode::Fne
        | Opcode::Flt
        | Opcode::Fle
        | Opcode::Fgt
        | Opcode::Fge
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::And
        | Opcode::Or => Insn::Binary(opcode),

        Opcode::Ineg
        | Opcode::Fneg
        | Opcode::Not
        | Opcode::I2F
        | Opcode::F2I
        | Opcode::I2B
        | Opcode::I2S
        | Opcode::I2C => Insn::Unary(opcode),

        Opcode::Jmp => Insn::Jmp {
            target: resolve_target(offset, reader)?,
        },
        Opcode::JmpIfTrue | Opcode::JmpIfFalse | Opcode::JmpIfNull | Opcode::JmpIfNotNull => {
            Insn::Branch {
                opcode,
                target: resolve_target(offset, reader)?,
            }
        }

        Opcode::Return => Insn::Return,
        Opcode::ReturnVoid => Insn::ReturnVoid,
        Opcode::Throw => Insn::Throw,

        Opcode::Call => Insn::Call(reader.read_u32()?),

        Opcode::New => Insn::New(reader.read_u32()?),
        Opcode::LoadField => Insn::LoadField(reader.read_u32()?),
        Opcode::StoreField => Insn::StoreField(reader.read_u32()?),
        Opcode::LoadStatic => Insn::LoadStatic(reader.read_u32()?),
        Opcode::StoreStatic => Insn::StoreStatic(reader.read_u32()?),
        Opcode::CastCheck => Insn::CastCheck(reader.read_u32()?),
        Opcode::InstanceOf => Insn::InstanceOf(reader.read_u32()?),

        Opcode::NewArray => Insn::NewArray(reader.read_u32()?),
        Opcode::LoadElem => Insn::LoadElem,
        Opcode::StoreElem => Insn::StoreElem,
        Opcode::ArrayLen => Insn::ArrayLen,
    };
    Ok(insn)
}

fn resolve_target(offset: u32, reader: &mut BytecodeReader<'_>) -> Result<u32, DecodeError> {
    let relative = reader.read_i32()? as i64;
    let end_of_insn = reader.position() as i64;
    let target = end_of_insn + relative;
    if target < 0 {
        return Err(DecodeError::InvalidJumpTarget {
            target: 0,
            offset,
        });
    }
    Ok(target as u32)
}
