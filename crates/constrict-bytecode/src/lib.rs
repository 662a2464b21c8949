//! Constrict VM Bytecode Definitions
//!
//! This crate provides the bytecode instruction set, module format and
//! constant pool structures consumed by the Constrict analysis passes,
//! together with encoding and decoding utilities.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod encoder;
pub mod insn;
pub mod module;
pub mod opcode;
pub mod pool;
pub mod types;

pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use insn::{decode_function, Insn, Instruction};
pub use module::{ExceptionHandler, Function, Module, ModuleError};
pub use opcode::Opcode;
pub use pool::{ClassRef, ConstantPool, FieldRef, MethodRef};
pub use types::{PrimitiveKind, TypeDesc};
