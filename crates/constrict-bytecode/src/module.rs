//! Bytecode module format
//!
//! A module bundles the constant pool and the compiled functions of one
//! compilation unit, with a checksummed binary encoding.

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use crate::pool::{ClassRef, ConstantPool, FieldRef, MethodRef};
use crate::types::TypeDesc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic number for Constrict bytecode files: "CSTR"
pub const MAGIC: [u8; 4] = *b"CSTR";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected CSTR, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum recorded in the file
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Invalid type descriptor tag
    #[error("Invalid type descriptor tag {0}")]
    InvalidTypeTag(u8),
}

/// Exception handler entry
///
/// The handler covers offsets in the half-open range `[start, end)`. Control
/// transfers to `handler` when an instruction in that range throws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    /// First covered offset
    pub start: u32,
    /// One past the last covered offset
    pub end: u32,
    /// Handler entry offset
    pub handler: u32,
}

impl ExceptionHandler {
    /// Whether this handler covers the given instruction offset
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Number of parameters
    pub param_count: usize,
    /// Number of local variables
    pub local_count: usize,
    /// Bytecode instructions
    pub code: Vec<u8>,
    /// Exception handler table
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl Function {
    /// Create a function with no exception handlers
    pub fn new(name: impl Into<String>, param_count: usize, local_count: usize, code: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            param_count,
            local_count,
            code,
            exception_handlers: Vec::new(),
        }
    }

    /// Handlers covering the given offset, innermost first (table order)
    pub fn handlers_for(&self, offset: u32) -> impl Iterator<Item = &ExceptionHandler> {
        self.exception_handlers.iter().filter(move |h| h.covers(offset))
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        encode_string(writer, &self.name);
        writer.emit_u32(self.param_count as u32);
        writer.emit_u32(self.local_count as u32);
        writer.emit_u32(self.code.len() as u32);
        writer.buffer.extend_from_slice(&self.code);
        writer.emit_u32(self.exception_handlers.len() as u32);
        for handler in &self.exception_handlers {
            writer.emit_u32(handler.start);
            writer.emit_u32(handler.end);
            writer.emit_u32(handler.handler);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, ModuleError> {
        let name = reader.read_string()?;
        let param_count = reader.read_u32()? as usize;
        let local_count = reader.read_u32()? as usize;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;
        let handler_count = reader.read_u32()? as usize;
        let mut exception_handlers = Vec::with_capacity(handler_count);
        for _ in 0..handler_count {
            exception_handlers.push(ExceptionHandler {
                start: reader.read_u32()?,
                end: reader.read_u32()?,
                handler: reader.read_u32()?,
            });
        }
        Ok(Self {
            name,
            param_count,
            local_count,
            code,
            exception_handlers,
        })
    }
}

/// A compiled Constrict module
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name
    pub name: String,
    /// Constant pool
    pub constants: ConstantPool,
    /// Function definitions
    pub functions: Vec<Function>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: ConstantPool::new(),
            functions: Vec::new(),
        }
    }

    /// Encode the module to its binary form
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytecodeWriter::new();
        encode_string(&mut payload, &self.name);
        encode_pool(&mut payload, &self.constants);
        payload.emit_u32(self.functions.len() as u32);
        for function in &self.functions {
            function.encode(&mut payload);
        }
        let payload = payload.into_bytes();

        let mut writer = BytecodeWriter::new();
        writer.buffer.extend_from_slice(&MAGIC);
        writer.emit_u32(VERSION);
        writer.emit_u32(crc32fast::hash(&payload));
        writer.buffer.extend_from_slice(&payload);
        writer.into_bytes()
    }

    /// Decode a module from its binary form
    pub fn decode(bytes: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(bytes);
        let magic: [u8; 4] = reader.read_array()?;
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }
        let expected = reader.read_u32()?;
        let payload = &bytes[reader.position()..];
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(ModuleError::ChecksumMismatch { expected, actual });
        }

        let mut reader = BytecodeReader::new(payload);
        let name = reader.read_string()?;
        let constants = decode_pool(&mut reader)?;
        let function_count = reader.read_u32()? as usize;
        let mut functions = Vec::with_capacity(function_count);
        for _ in 0..function_count {
            functions.push(Function::decode(&mut reader)?);
        }
        Ok(Self {
            name,
            constants,
            functions,
        })
    }
}

fn encode_string(writer: &mut BytecodeWriter, value: &str) {
    writer.emit_u32(value.len() as u32);
    writer.buffer.extend_from_slice(value.as_bytes());
}

fn encode_type(writer: &mut BytecodeWriter, ty: &TypeDesc) {
    writer.emit_u8(ty.tag());
    match ty {
        TypeDesc::Reference(name) => encode_string(writer, name),
        TypeDesc::Array(element) => encode_type(writer, element),
        _ => {}
    }
}

fn decode_type(reader: &mut BytecodeReader<'_>) -> Result<TypeDesc, ModuleError> {
    let tag = reader.read_u8()?;
    if let Some(simple) = TypeDesc::from_simple_tag(tag) {
        return Ok(simple);
    }
    match tag {
        9 => Ok(TypeDesc::Reference(reader.read_string()?)),
        10 => Ok(TypeDesc::array(decode_type(reader)?)),
        other => Err(ModuleError::InvalidTypeTag(other)),
    }
}

fn encode_pool(writer: &mut BytecodeWriter, pool: &ConstantPool) {
    writer.emit_u32(pool.strings.len() as u32);
    for string in &pool.strings {
        encode_string(writer, string);
    }
    writer.emit_u32(pool.classes.len() as u32);
    for class in &pool.classes {
        encode_string(writer, &class.name);
    }
    writer.emit_u32(pool.fields.len() as u32);
    for field in &pool.fields {
        encode_string(writer, &field.owner);
        encode_string(writer, &field.name);
        encode_type(writer, &field.ty);
        writer.emit_u8(u8::from(field.is_static));
    }
    writer.emit_u32(pool.methods.len() as u32);
    for method in &pool.methods {
        encode_string(writer, &method.owner);
        encode_string(writer, &method.name);
        writer.emit_u32(method.params.len() as u32);
        for param in &method.params {
            encode_type(writer, param);
        }
        encode_type(writer, &method.ret);
        writer.emit_u8(u8::from(method.has_receiver));
    }
}

fn decode_pool(reader: &mut BytecodeReader<'_>) -> Result<ConstantPool, ModuleError> {
    let mut pool = ConstantPool::new();

    let string_count = reader.read_u32()? as usize;
    for _ in 0..string_count {
        pool.strings.push(reader.read_string()?);
    }
    let class_count = reader.read_u32()? as usize;
    for _ in 0..class_count {
        pool.classes.push(ClassRef {
            name: reader.read_string()?,
        });
    }
    let field_count = reader.read_u32()? as usize;
    for _ in 0..field_count {
        pool.fields.push(FieldRef {
            owner: reader.read_string()?,
            name: reader.read_string()?,
            ty: decode_type(reader)?,
            is_static: reader.read_u8()? != 0,
        });
    }
    let method_count = reader.read_u32()? as usize;
    for _ in 0..method_count {
        let owner = reader.read_string()?;
        let name = reader.read_string()?;
        let param_count = reader.read_u32()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(decode_type(reader)?);
        }
        let ret = decode_type(reader)?;
        let has_receiver = reader.read_u8()? != 0;
        pool.methods.push(MethodRef {
            owner,
            name,
            params,
            ret,
            has_receiver,
        });
    }

    Ok(pool)
}
