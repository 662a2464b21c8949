//! Strict-reflection constant analysis
//!
//! This crate proves, at the bytecode level, that the arguments of calls to
//! sensitive reflective APIs are compile-time constants. It runs a forward
//! abstract interpretation over each method ([`Interpreter`]), tracks
//! literals, single-origin locals and array pictures ([`ReflectionAnalyzer`]),
//! and caches the per-call-site results for enforcement-time queries
//! ([`StrictReflectionRegistry`]).
//!
//! The analysis is intraprocedural and fail-closed: anything it cannot prove
//! constant is reported as unknown, and a method it cannot analyze at all
//! answers every query with unknown.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod frame;
pub mod interpreter;
pub mod reflect;
pub mod registry;
pub mod value;

pub use error::AnalysisError;
pub use frame::{AbstractFrame, StackDepthMismatch};
pub use interpreter::{Interpretation, Interpreter, Literal};
pub use reflect::{well_known, ClassResolver, ReflectionAnalyzer};
pub use registry::{is_sensitive_target, ConstOperand, MethodId, StrictReflectionRegistry};
pub use value::{AnalysisValue, ArrayConstant, Origin, ScalarConstant, ScalarValue, TypeToken};
