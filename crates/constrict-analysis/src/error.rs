//! Analysis errors

use constrict_bytecode::DecodeError;
use thiserror::Error;

/// Errors raised while running a dataflow analysis over a function
///
/// Any of these indicates bytecode the analysis cannot reason about. Callers
/// treat a failed analysis as "nothing is constant" rather than aborting.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// An instruction popped more operands than the stack held
    #[error("operand stack underflow at offset {0}")]
    StackUnderflow(u32),

    /// Two control-flow paths reached the same offset with different stack depths
    #[error("operand stack depth mismatch at offset {offset}: {left} vs {right}")]
    StackDepthMismatch {
        /// Offset where the paths met
        offset: u32,
        /// Depth of the already-recorded state
        left: usize,
        /// Depth of the incoming state
        right: usize,
    },

    /// An instruction referenced a local variable outside the declared count
    #[error("undeclared local variable {index} at offset {offset}")]
    MissingLocal {
        /// Offset of the referencing instruction
        offset: u32,
        /// Local variable index
        index: u16,
    },

    /// An instruction referenced a constant pool entry that does not exist
    #[error("invalid constant pool reference {index} at offset {offset}")]
    InvalidPoolRef {
        /// Offset of the referencing instruction
        offset: u32,
        /// Pool index
        index: u32,
    },

    /// A jump or exception handler targets an offset with no instruction
    #[error("control transfer to unknown offset {0}")]
    UnknownOffset(u32),

    /// The function's code bytes could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
