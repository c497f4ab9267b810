//! # wren-core
//!
//! Typed values, memory layouts, and the emitter-context strategy that every
//! Wren node writes its math against.
//!
//! This crate provides:
//! - [`DType`] / [`Literal`] — element types and typed element arithmetic
//! - [`MemoryLayout`] — padded, strided, permutable placement in memory
//! - [`Value`] — a typed, layout-aware handle to host or emitted memory
//! - [`EmitterContext`] — the strategy trait; [`ComputeContext`] runs it on the host
//! - [`Scalar`] / [`Vector`] / [`Matrix`] — shape-checked views over a Value
//! - [`buffer::shift_and_update`] — sliding-window block moves

pub mod buffer;
pub mod context;
pub mod dtype;
pub mod error;
pub mod functions;
pub mod layout;
pub mod literal;
pub mod matrix;
pub mod ops;
pub mod scalar;
pub mod value;
pub mod vector;

pub use context::{ComputeContext, EmitterContext};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use layout::MemoryLayout;
pub use literal::Literal;
pub use matrix::Matrix;
pub use ops::{BinaryOp, CmpOp, UnaryOp};
pub use scalar::Scalar;
pub use value::{Location, SharedStorage, Storage, Value, ValueData};
pub use vector::Vector;
