//! Bytecode opcodes for the Constrict VM
//!
//! This module defines the instruction set operated on by the analysis
//! passes. All opcodes are single-byte instructions; some take additional
//! operands that follow the opcode byte in the bytecode stream.

/// Bytecode opcode enumeration
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Local variables
/// - 0x20-0x2F: Integer arithmetic & bitwise
/// - 0x30-0x3F: Float arithmetic
/// - 0x40-0x4F: Numeric conversions
/// - 0x50-0x5F: Comparison
/// - 0x60-0x6F: Logical
/// - 0x90-0x9F: Control flow
/// - 0xA0-0xAF: Function calls
/// - 0xB0-0xBF: Object & field operations
/// - 0xC0-0xCF: Array operations
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,

    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit integer constant (operand: i64)
    ConstI64 = 0x08,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x09,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x0A,
    /// Push class literal from pool (operand: u32 class ref index)
    ConstClass = 0x0B,

    // ===== Local Variables (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,
    /// Increment local variable in place (operands: u16 index, i16 delta)
    IncLocal = 0x12,

    // ===== Integer Arithmetic & Bitwise (0x20-0x2F) =====
    /// Integer addition: pop b, pop a, push a + b
    Iadd = 0x20,
    /// Integer subtraction: pop b, pop a, push a - b
    Isub = 0x21,
    /// Integer multiplication: pop b, pop a, push a * b
    Imul = 0x22,
    /// Integer division: pop b, pop a, push a / b
    Idiv = 0x23,
    /// Integer modulo: pop b, pop a, push a % b
    Imod = 0x24,
    /// Integer negation: pop a, push -a
    Ineg = 0x25,
    /// Bitwise and: pop b, pop a, push a & b
    Iand = 0x26,
    /// Bitwise or: pop b, pop a, push a | b
    Ior = 0x27,
    /// Bitwise xor: pop b, pop a, push a ^ b
    Ixor = 0x28,
    /// Shift left: pop b, pop a, push a << b
    Ishl = 0x29,
    /// Shift right: pop b, pop a, push a >> b
    Ishr = 0x2A,

    // ===== Float Arithmetic (0x30-0x3F) =====
    /// Float addition: pop b, pop a, push a + b
    Fadd = 0x30,
    /// Float subtraction: pop b, pop a, push a - b
    Fsub = 0x31,
    /// Float multiplication: pop b, pop a, push a * b
    Fmul = 0x32,
    /// Float division: pop b, pop a, push a / b
    Fdiv = 0x33,
    /// Float negation: pop a, push -a
    Fneg = 0x34,

    // ===== Numeric Conversions (0x40-0x4F) =====
    /// Convert integer to float
    I2F = 0x40,
    /// Convert float to integer
    F2I = 0x41,
    /// Narrow integer to 8 bits
    I2B = 0x42,
    /// Narrow integer to 16 bits
    I2S = 0x43,
    /// Narrow integer to character
    I2C = 0x44,

    // ===== Comparison (0x50-0x5F) =====
    /// Integer equality: pop b, pop a, push a == b
    Ieq = 0x50,
    /// Integer inequality
    Ine = 0x51,
    /// Integer less-than
    Ilt = 0x52,
    /// Integer less-or-equal
    Ile = 0x53,
    /// Integer greater-than
    Igt = 0x54,
    /// Integer greater-or-equal
    Ige = 0x55,
    /// Float equality
    Feq = 0x58,
    /// Float inequality
    Fne = 0x59,
    /// Float less-than
    Flt = 0x5A,
    /// Float less-or-equal
    Fle = 0x5B,
    /// Float greater-than
    Fgt = 0x5C,
    /// Float greater-or-equal
    Fge = 0x5D,

    // ===== Logical (0x60-0x6F) =====
    /// Reference equality: pop b, pop a, push a == b
    Eq = 0x60,
    /// Reference inequality
    Ne = 0x61,
    /// Boolean negation
    Not = 0x62,
    /// Boolean and
    And = 0x63,
    /// Boolean or
    Or = 0x64,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: i32 relative offset)
    Jmp = 0x90,
    /// Jump if top of stack is true (operand: i32 relative offset)
    JmpIfTrue = 0x91,
    /// Jump if top of stack is false (operand: i32 relative offset)
    JmpIfFalse = 0x92,
    /// Jump if top of stack is null (operand: i32 relative offset)
    JmpIfNull = 0x93,
    /// Jump if top of stack is not null (operand: i32 relative offset)
    JmpIfNotNull = 0x94,
    /// Return top of stack
    Return = 0x98,
    /// Return without a value
    ReturnVoid = 0x99,
    /// Pop value, throw it as an exception
    Throw = 0x9A,

    // ===== Function Calls (0xA0-0xAF) =====
    /// Invoke method (operand: u32 method ref index). Pops the arguments
    /// (and the receiver, if the method ref has one), pushes the result
    /// unless the return type is void.
    Call = 0xA0,

    // ===== Object & Field Operations (0xB0-0xBF) =====
    /// Allocate object (operand: u32 class ref index)
    New = 0xB0,
    /// Pop object, push field value (operand: u32 field ref index)
    LoadField = 0xB1,
    /// Pop value, pop object, store field (operand: u32 field ref index)
    StoreField = 0xB2,
    /// Push static field value (operand: u32 field ref index)
    LoadStatic = 0xB3,
    /// Pop value, store static field (operand: u32 field ref index)
    StoreStatic = 0xB4,
    /// Checked cast: pop object, push it unchanged or throw (operand: u32 class ref index)
    CastCheck = 0xB5,
    /// Pop object, push boolean (operand: u32 class ref index)
    InstanceOf = 0xB6,

    // ===== Array Operations (0xC0-0xCF) =====
    /// Pop length, push new array (operand: u32 class ref index of the element type)
    NewArray = 0xC0,
    /// Pop index, pop array, push element
    LoadElem = 0xC1,
    /// Pop value, pop index, pop array, store element
    StoreElem = 0xC2,
    /// Pop array, push its length
    ArrayLen = 0xC3,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            // Stack manipulation & constants
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::ConstNull),
            0x05 => Some(Self::ConstTrue),
            0x06 => Some(Self::ConstFalse),
            0x07 => Some(Self::ConstI32),
            0x08 => Some(Self::ConstI64),
            0x09 => Some(Self::ConstF64),
            0x0A => Some(Self::ConstStr),
            0x0B => Some(Self::ConstClass),

            // Local variables
            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),
            0x12 => Some(Self::IncLocal),

            // Integer arithmetic & bitwise
            0x20 => Some(Self::Iadd),
            0x21 => Some(Self::Isub),
            0x22 => Some(Self::Imul),
            0x23 => Some(Self::Idiv),
            0x24 => Some(Self::Imod),
            0x25 => Some(Self::Ineg),
            0x26 => Some(Self::Iand),
            0x27 => Some(Self::Ior),
            0x28 => Some(Self::Ixor),
            0x29 => Some(Self::Ishl),
            0x2A => Some(Self::Ishr),

            // Float arithmetic
            0x30 => Some(Self::Fadd),
            0x31 => Some(Self::Fsub),
            0x32 => Some(Self::Fmul),
            0x33 => Some(Self::Fdiv),
            0x34 => Some(Self::Fneg),

            // Numeric conversions
            0x40 => Some(Self::I2F),
            0x41 => Some(Self::F2I),
            0x42 => Some(Self::I2B),
            0x43 => Some(Self::I2S),
            0x44 => Some(Self::I2C),

            // Comparison
            0x50 => Some(Self::Ieq),
            0x51 => Some(Self::Ine),
            0x52 => Some(Self::Ilt),
            0x53 => Some(Self::Ile),
            0x54 => Some(Self::Igt),
            0x55 => Some(Self::Ige),
            0x58 => Some(Self::Feq),
            0x59 => Some(Self::Fne),
            0x5A => Some(Self::Flt),
            0x5B => Some(Self::Fle),
            0x5C => Some(Self::Fgt),
            0x5D => Some(Self::Fge),

            // Logical
            0x60 => Some(Self::Eq),
            0x61 => Some(Self::Ne),
            0x62 => Some(Self::Not),
            0x63 => Some(Self::And),
            0x64 => Some(Self::Or),

            // Control flow
            0x90 => Some(Self::Jmp),
            0x91 => Some(Self::JmpIfTrue),
            0x92 => Some(Self::JmpIfFalse),
            0x93 => Some(Self::JmpIfNull),
            0x94 => Some(Self::JmpIfNotNull),
            0x98 => Some(Self::Return),
            0x99 => Some(Self::ReturnVoid),
            0x9A => Some(Self::Throw),

            // Function calls
            0xA0 => Some(Self::Call),

            // Object & field operations
            0xB0 => Some(Self::New),
            0xB1 => Some(Self::LoadField),
            0xB2 => Some(Self::StoreField),
            0xB3 => Some(Self::LoadStatic),
            0xB4 => Some(Self::StoreStatic),
            0xB5 => Some(Self::CastCheck),
            0xB6 => Some(Self::InstanceOf),

            // Array operations
            0xC0 => Some(Self::NewArray),
            0xC1 => Some(Self::LoadElem),
            0xC2 => Some(Self::StoreElem),
            0xC3 => Some(Self::ArrayLen),

            _ => None,
        }
    }

    /// Convert opcode to byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this opcode is a jump instruction
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Self::Jmp | Self::JmpIfTrue | Self::JmpIfFalse | Self::JmpIfNull | Self::JmpIfNotNull
        )
    }

    /// Check if this opcode terminates the current control flow path
    ///
    /// Terminators never fall through to the following instruction.
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Jmp | Self::Return | Self::ReturnVoid | Self::Throw)
    }

    /// Get the operand size for this opcode (in bytes)
    pub fn operand_size(self) -> usize {
        match self {
            Self::Nop
            | Self::Pop
            | Self::Dup
            | Self::Swap
            | Self::ConstNull
            | Self::ConstTrue
            | Self::ConstFalse
            | Self::Iadd
            | Self::Isub
            | Self::Imul
            | Self::Idiv
            | Self::Imod
            | Self::Ineg
            | Self::Iand
            | Self::Ior
            | Self::Ixor
            | Self::Ishl
            | Self::Ishr
            | Self::Fadd
            | Self::Fsub
            | Self::Fmul
            | Self::Fdiv
            | Self::Fneg
            | Self::I2F
            | Self::F2I
            | Self::I2B
            | Self::I2S
            | Self::I2C
            | Self::Ieq
            | Self::Ine
            | Self::Ilt
            | Self::Ile
            | Self::Igt
            | Self::Ige
            | Self::Feq
            | Self::Fne
            | Self::Flt
            | Self::Fle
            | Self::Fgt
            | Self::Fge
            | Self::Eq
            | Self::Ne
            | Self::Not
            | Self::And
            | Self::Or
            | Self::Return
            | Self::ReturnVoid
            | Self::Throw
            | Self::LoadElem
            | Self::StoreElem
            | Self::ArrayLen => 0,

            // u16 operands
            Self::LoadLocal | Self::StoreLocal => 2,

            // u16 + i16 operands
            Self::IncLocal => 4,

            // i32 or u32 operands
            Self::ConstI32
            | Self::ConstStr
            | Self::ConstClass
            | Self::Jmp
            | Self::JmpIfTrue
            | Self::JmpIfFalse
            | Self::JmpIfNull
            | Self::JmpIfNotNull
            | Self::Call
            | Self::New
            | Self::LoadField
            | Self::StoreField
            | Self::LoadStatic
            | Self::StoreStatic
            | Self::CastCheck
            | Self::InstanceOf
            | Self::NewArray => 4,

            // 8-byte operands
            Self::ConstI64 | Self::ConstF64 => 8,
        }
    }
}
