//! # wren-emit
//!
//! The compilation side of Wren: a block-structured instruction IR, builders
//! for it, an optimizer, and an in-process executor.
//!
//! - [`ir`] — Module, Function, BasicBlock, Instruction, Terminator
//! - [`FunctionEmitter`] / [`ModuleEmitter`] — build functions and modules
//! - [`ForLoopEmitter`] / [`WhileLoopEmitter`] — structured loops
//! - [`IrContext`] — the `EmitterContext` that records node math as IR
//! - [`Optimizer`] — function and module pass pipelines
//! - [`Engine`] — runs a finished module

pub mod context;
pub mod execute;
pub mod function;
pub mod ir;
pub mod loops;
pub mod module;
pub mod optimizer;
pub mod passes;

pub use context::IrContext;
pub use execute::{Argument, Engine};
pub use function::{FunctionEmitter, StateGlobal};
pub use ir::{BlockId, Function, Global, Instruction, IrType, LoopMetadata, Module, Operand, Reg};
pub use loops::{ForLoopEmitter, LoopState, WhileLoopEmitter};
pub use module::ModuleEmitter;
pub use optimizer::{FunctionPass, FunctionSession, ModulePass, Optimizer, OptimizerConfig, OptimizerStats};
