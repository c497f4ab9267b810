// Engine — Executes a Module in-process
//
// The engine is the runtime for compiled models. It owns the module and a
// byte-addressed memory made of separate allocations:
//
//   [ global 0 | global 1 | ... | argument buffers | allocas of each frame ]
//
// Globals are laid down once when the engine is created and persist across
// calls, so node state written by one call is seen by the next. Everything
// after the globals belongs to a single call and is released when it returns.
//
// A pointer is an (allocation, byte offset) pair. Every load, store and
// memmove is bounds-checked against its allocation; a violation, a missing
// function or a runaway loop (the step limit) ends the call with an
// execution error instead of corrupting memory.
//
// Caller buffers are copied into the engine before the call and copied back
// afterwards, so the caller observes writes to output arguments.

use std::collections::HashMap;

use log::trace;

use wren_core::error::{Error, Result};
use wren_core::{DType, Literal, Storage};

use crate::ir::{BlockId, Function, Instruction, IrType, Module, Operand, Reg, Terminator};

/// Default bound on executed instructions per top-level call.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000_000;

/// One argument of an exported function.
pub enum Argument<'a> {
    /// Memory the callee reads and may write; bound to a pointer parameter.
    Buffer(&'a mut Storage),
    /// A value parameter.
    Scalar(Literal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pointer {
    allocation: usize,
    offset: usize,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Value(Literal),
    Pointer(Pointer),
}

pub struct Engine {
    module: Module,
    memory: Vec<Vec<u8>>,
    global_index: HashMap<String, usize>,
    step_limit: usize,
}

impl Engine {
    /// Verify `module` and lay down its globals.
    pub fn new(module: Module) -> Result<Self> {
        module.verify()?;
        let mut memory = Vec::with_capacity(module.globals.len());
        let mut global_index = HashMap::new();
        for (name, g) in &module.globals {
            global_index.insert(name.clone(), memory.len());
            memory.push(g.data.to_le_bytes());
        }
        Ok(Engine {
            module,
            memory,
            global_index,
            step_limit: DEFAULT_STEP_LIMIT,
        })
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Current contents of a global.
    pub fn global(&self, name: &str) -> Result<Storage> {
        let idx = *self
            .global_index
            .get(name)
            .ok_or_else(|| Error::Execution(format!("unknown global '{}'", name)))?;
        let dtype = self.module.globals[name].dtype();
        Storage::from_le_bytes(dtype, &self.memory[idx])
    }

    /// Run an exported function.
    pub fn call(&mut self, name: &str, args: &mut [Argument<'_>]) -> Result<()> {
        let function = self
            .module
            .function(name)
            .ok_or_else(|| Error::Execution(format!("no function named '{}'", name)))?;
        if !function.exported {
            return Err(Error::Execution(format!("function '{}' is not exported", name)));
        }
        if function.params.len() != args.len() {
            return Err(Error::Execution(format!(
                "function '{}' takes {} arguments, got {}",
                name,
                function.params.len(),
                args.len()
            )));
        }

        let globals_end = self.global_index.len();
        let mut slots = Vec::with_capacity(args.len());
        let mut buffers = Vec::new();
        for (i, (arg, p)) in args.iter().zip(&function.params).enumerate() {
            let ty = function.reg_type(*p).ok_or_else(|| {
                Error::Execution(format!("parameter {} of '{}' has no type", i, name))
            })?;
            match (arg, ty) {
                (Argument::Buffer(s), IrType::Ptr(d)) if s.dtype() == d => {
                    buffers.push((i, self.memory.len(), d));
                    self.memory.push(s.to_le_bytes());
                    slots.push(Slot::Pointer(Pointer {
                        allocation: self.memory.len() - 1,
                        offset: 0,
                    }));
                }
                (Argument::Scalar(l), IrType::Value(d)) if l.dtype() == d => {
                    slots.push(Slot::Value(*l));
                }
                _ => {
                    self.memory.truncate(globals_end);
                    return Err(Error::Execution(format!(
                        "argument {} of '{}' does not match parameter type {}",
                        i, name, ty
                    )));
                }
            }
        }

        let mut machine = Machine {
            module: &self.module,
            globals: &self.global_index,
            memory: &mut self.memory,
            steps: 0,
            limit: self.step_limit,
        };
        let result = machine.run(function, slots);
        trace!("call '{}': {} steps", name, machine.steps);

        if result.is_ok() {
            for (i, allocation, dtype) in &buffers {
                if let Argument::Buffer(s) = &mut args[*i] {
                    **s = Storage::from_le_bytes(*dtype, &self.memory[*allocation])?;
                }
            }
        }
        self.memory.truncate(globals_end);
        result
    }
}

struct Machine<'m> {
    module: &'m Module,
    globals: &'m HashMap<String, usize>,
    memory: &'m mut Vec<Vec<u8>>,
    steps: usize,
    limit: usize,
}

fn exec_error(function: &Function, what: impl std::fmt::Display) -> Error {
    Error::Execution(format!("in '{}': {}", function.name, what))
}

impl Machine<'_> {
    fn run(&mut self, function: &Function, args: Vec<Slot>) -> Result<()> {
        let frame_start = self.memory.len();
        let mut regs: Vec<Option<Slot>> = vec![None; function.reg_types.len()];
        for (p, a) in function.params.iter().zip(args) {
            regs[p.0 as usize] = Some(a);
        }
        let index: HashMap<BlockId, usize> = function
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();

        let mut current = 0usize;
        let result = loop {
            let block = &function.blocks[current];
            for inst in &block.instructions {
                self.steps += 1;
                if self.steps > self.limit {
                    return Err(exec_error(function, "step limit exceeded"));
                }
                self.step(function, &mut regs, inst)?;
            }
            let next = match &block.terminator {
                Some(Terminator::Branch(b)) => *b,
                Some(Terminator::CondBranch {
                    cond,
                    then,
                    otherwise,
                    ..
                }) => {
                    if value(function, &regs, cond)?.is_true() {
                        *then
                    } else {
                        *otherwise
                    }
                }
                Some(Terminator::Return) => break Ok(()),
                None => break Err(exec_error(function, format!("block {} falls off", block.label))),
            };
            current = *index
                .get(&next)
                .ok_or_else(|| exec_error(function, format!("missing block {}", next)))?;
        };
        self.memory.truncate(frame_start);
        result
    }

    fn step(&mut self, function: &Function, regs: &mut [Option<Slot>], inst: &Instruction) -> Result<()> {
        let out = match inst {
            Instruction::Alloca { dtype, count, .. } => {
                self.memory.push(vec![0u8; dtype.size_in_bytes() * count]);
                Some(Slot::Pointer(Pointer {
                    allocation: self.memory.len() - 1,
                    offset: 0,
                }))
            }
            Instruction::GlobalAddr { name, .. } => {
                let idx = *self
                    .globals
                    .get(name)
                    .ok_or_else(|| exec_error(function, format!("unknown global '{}'", name)))?;
                Some(Slot::Pointer(Pointer {
                    allocation: idx,
                    offset: 0,
                }))
            }
            Instruction::Gep { base, index, .. } => {
                let p = pointer(function, regs, *base)?;
                let i = value(function, regs, index)?.to_i64();
                let size = element_type(function, *base)?.size_in_bytes() as i64;
                let offset = p.offset as i64 + i * size;
                let offset = usize::try_from(offset)
                    .map_err(|_| exec_error(function, format!("negative address offset {}", offset)))?;
                Some(Slot::Pointer(Pointer {
                    allocation: p.allocation,
                    offset,
                }))
            }
            Instruction::Load { ptr, .. } => {
                let p = pointer(function, regs, *ptr)?;
                let dtype = element_type(function, *ptr)?;
                let bytes = self.bytes(function, p, dtype.size_in_bytes())?;
                Some(Slot::Value(Literal::from_le_bytes(dtype, bytes)?))
            }
            Instruction::Store { ptr, value: v } => {
                let p = pointer(function, regs, *ptr)?;
                let lit = value(function, regs, v)?;
                let encoded = lit.to_le_bytes();
                self.bytes_mut(function, p, encoded.len())?
                    .copy_from_slice(&encoded);
                None
            }
            Instruction::Binary { op, lhs, rhs, .. } => {
                let (a, b) = (value(function, regs, lhs)?, value(function, regs, rhs)?);
                Some(Slot::Value(
                    a.binary(*op, &b).map_err(|e| exec_error(function, e))?,
                ))
            }
            Instruction::Unary { op, operand, .. } => {
                let a = value(function, regs, operand)?;
                Some(Slot::Value(a.unary(*op).map_err(|e| exec_error(function, e))?))
            }
            Instruction::Compare { op, lhs, rhs, .. } => {
                let (a, b) = (value(function, regs, lhs)?, value(function, regs, rhs)?);
                Some(Slot::Value(Literal::Bool(
                    a.compare(*op, &b).map_err(|e| exec_error(function, e))?,
                )))
            }
            Instruction::Cast { operand, dtype, .. } => {
                Some(Slot::Value(value(function, regs, operand)?.cast(*dtype)))
            }
            Instruction::MemMove { dst, src, bytes } => {
                let (d, s) = (pointer(function, regs, *dst)?, pointer(function, regs, *src)?);
                let data = self.bytes(function, s, *bytes)?.to_vec();
                self.bytes_mut(function, d, *bytes)?.copy_from_slice(&data);
                None
            }
            Instruction::Call { function: callee, args } => {
                let module = self.module;
                let target = module
                    .function(callee)
                    .ok_or_else(|| exec_error(function, format!("call to unknown '{}'", callee)))?;
                let slots = args
                    .iter()
                    .map(|a| match a {
                        Operand::Const(l) => Ok(Slot::Value(*l)),
                        Operand::Reg(r) => slot(function, regs, *r),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.run(target, slots)?;
                None
            }
        };
        if let (Some(d), Some(s)) = (inst.def(), out) {
            regs[d.0 as usize] = Some(s);
        }
        Ok(())
    }

    fn bytes(&self, function: &Function, p: Pointer, len: usize) -> Result<&[u8]> {
        let alloc = self
            .memory
            .get(p.allocation)
            .ok_or_else(|| exec_error(function, "dangling pointer"))?;
        alloc
            .get(p.offset..p.offset + len)
            .ok_or_else(|| out_of_bounds(function, p, len, alloc.len()))
    }

    fn bytes_mut(&mut self, function: &Function, p: Pointer, len: usize) -> Result<&mut [u8]> {
        let alloc = self
            .memory
            .get_mut(p.allocation)
            .ok_or_else(|| exec_error(function, "dangling pointer"))?;
        let size = alloc.len();
        alloc
            .get_mut(p.offset..p.offset + len)
            .ok_or_else(|| out_of_bounds(function, p, len, size))
    }
}

fn out_of_bounds(function: &Function, p: Pointer, len: usize, size: usize) -> Error {
    exec_error(
        function,
        format!(
            "access of {} bytes at offset {} outside allocation of {} bytes",
            len, p.offset, size
        ),
    )
}

fn slot(function: &Function, regs: &[Option<Slot>], r: Reg) -> Result<Slot> {
    regs.get(r.0 as usize)
        .copied()
        .flatten()
        .ok_or_else(|| exec_error(function, format!("register {} read before definition", r)))
}

fn value(function: &Function, regs: &[Option<Slot>], o: &Operand) -> Result<Literal> {
    match o {
        Operand::Const(l) => Ok(*l),
        Operand::Reg(r) => match slot(function, regs, *r)? {
            Slot::Value(l) => Ok(l),
            Slot::Pointer(_) => Err(exec_error(function, format!("{} is a pointer", r))),
        },
    }
}

fn pointer(function: &Function, regs: &[Option<Slot>], r: Reg) -> Result<Pointer> {
    match slot(function, regs, r)? {
        Slot::Pointer(p) => Ok(p),
        Slot::Value(_) => Err(exec_error(function, format!("{} is not a pointer", r))),
    }
}

fn element_type(function: &Function, r: Reg) -> Result<DType> {
    match function.reg_type(r) {
        Some(IrType::Ptr(d)) => Ok(d),
        _ => Err(exec_error(function, format!("{} is not a pointer", r))),
    }
}
