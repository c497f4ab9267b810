// Instruction IR — The target of compiled models
//
// A Module is a set of named globals and functions. A Function is a list of
// basic blocks; each block is a straight run of instructions closed by one
// terminator. Registers are typed and defined exactly once.
//
// COMPONENTS:
//
//   Module       — globals (BTreeMap, deterministic dump order) + functions
//   Global       — named, typed, initialized memory; mutable for node state
//   Function     — parameters, register types, blocks; `exported` marks entry points
//   BasicBlock   — instructions + terminator
//   Instruction  — memory, arithmetic, mem-move, call
//   Terminator   — branch, conditional branch (optionally tagged as a loop), return
//
// Memory is byte-addressed. `Gep` scales its element index by the pointee
// size, and `MemMove` lengths are byte counts. Loop metadata attached to a
// conditional branch is a hint only and never changes what runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use wren_core::error::{Error, Result};
use wren_core::{BinaryOp, CmpOp, DType, Literal, Storage, UnaryOp};

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Register type: an element value or a pointer to elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    Value(DType),
    Ptr(DType),
}

impl IrType {
    pub fn element(&self) -> DType {
        match self {
            IrType::Value(d) | IrType::Ptr(d) => *d,
        }
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Const(Literal),
}

impl Operand {
    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            Operand::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<Literal> {
        match self {
            Operand::Const(l) => Some(*l),
            Operand::Reg(_) => None,
        }
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<Literal> for Operand {
    fn from(l: Literal) -> Self {
        Operand::Const(l)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Zero-filled stack memory for `count` elements, fresh per call.
    Alloca { dst: Reg, dtype: DType, count: usize },
    /// Address of a module global.
    GlobalAddr { dst: Reg, name: String },
    /// `dst = base + index × size(pointee)`; index is I64.
    Gep { dst: Reg, base: Reg, index: Operand },
    Load { dst: Reg, ptr: Reg },
    Store { ptr: Reg, value: Operand },
    Binary { dst: Reg, op: BinaryOp, lhs: Operand, rhs: Operand },
    Unary { dst: Reg, op: UnaryOp, operand: Operand },
    Compare { dst: Reg, op: CmpOp, lhs: Operand, rhs: Operand },
    Cast { dst: Reg, operand: Operand, dtype: DType },
    /// memmove of `bytes` bytes; regions may overlap.
    MemMove { dst: Reg, src: Reg, bytes: usize },
    Call { function: String, args: Vec<Operand> },
}

impl Instruction {
    /// The register this instruction defines, if any.
    pub fn def(&self) -> Option<Reg> {
        match self {
            Instruction::Alloca { dst, .. }
            | Instruction::GlobalAddr { dst, .. }
            | Instruction::Gep { dst, .. }
            | Instruction::Load { dst, .. }
            | Instruction::Binary { dst, .. }
            | Instruction::Unary { dst, .. }
            | Instruction::Compare { dst, .. }
            | Instruction::Cast { dst, .. } => Some(*dst),
            Instruction::Store { .. } | Instruction::MemMove { .. } | Instruction::Call { .. } => {
                None
            }
        }
    }

    /// Instructions whose effect is visible beyond their result register.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Instruction::Store { .. } | Instruction::MemMove { .. } | Instruction::Call { .. }
        )
    }

    /// Registers read by this instruction.
    pub fn uses(&self) -> Vec<Reg> {
        let mut out = Vec::new();
        let mut op = |o: &Operand| {
            if let Operand::Reg(r) = o {
                out.push(*r);
            }
        };
        match self {
            Instruction::Alloca { .. } | Instruction::GlobalAddr { .. } => {}
            Instruction::Gep { base, index, .. } => {
                op(&Operand::Reg(*base));
                op(index);
            }
            Instruction::Load { ptr, .. } => op(&Operand::Reg(*ptr)),
            Instruction::Store { ptr, value } => {
                op(&Operand::Reg(*ptr));
                op(value);
            }
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                op(lhs);
                op(rhs);
            }
            Instruction::Unary { operand, .. } | Instruction::Cast { operand, .. } => op(operand),
            Instruction::MemMove { dst, src, .. } => {
                op(&Operand::Reg(*dst));
                op(&Operand::Reg(*src));
            }
            Instruction::Call { args, .. } => args.iter().for_each(op),
        }
        out
    }

    /// Operand slots that constant propagation may rewrite.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::Gep { index, .. } => vec![index],
            Instruction::Store { value, .. } => vec![value],
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            Instruction::Unary { operand, .. } | Instruction::Cast { operand, .. } => vec![operand],
            Instruction::Call { args, .. } => args.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}

/// Unroll / parallel hints for a loop's back-edge branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopMetadata {
    pub unroll: bool,
    pub parallel: bool,
}

impl LoopMetadata {
    pub fn is_empty(&self) -> bool {
        !self.unroll && !self.parallel
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        cond: Operand,
        then: BlockId,
        otherwise: BlockId,
        metadata: Option<LoopMetadata>,
    },
    Return,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(b) => vec![*b],
            Terminator::CondBranch { then, otherwise, .. } => vec![*then, *otherwise],
            Terminator::Return => Vec::new(),
        }
    }

    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Terminator::Branch(b) => {
                if *b == from {
                    *b = to;
                }
            }
            Terminator::CondBranch { then, otherwise, .. } => {
                if *then == from {
                    *then = to;
                }
                if *otherwise == from {
                    *otherwise = to;
                }
            }
            Terminator::Return => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId, label: impl Into<String>) -> Self {
        BasicBlock {
            id,
            label: label.into(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Reg>,
    /// Type of every register, indexed by register number.
    pub reg_types: Vec<IrType>,
    /// The first block is the entry.
    pub blocks: Vec<BasicBlock>,
    pub exported: bool,
}

impl Function {
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub fn reg_type(&self, r: Reg) -> Option<IrType> {
        self.reg_types.get(r.0 as usize).copied()
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Names of functions this one calls.
    pub fn callees(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| match i {
                Instruction::Call { function, .. } => Some(function.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Names of globals this function takes the address of.
    pub fn referenced_globals(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| match i {
                Instruction::GlobalAddr { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Structural checks: terminated blocks, known branch targets, single
    /// definition of every register.
    pub fn verify(&self) -> Result<()> {
        let ids: HashSet<BlockId> = self.blocks.iter().map(|b| b.id).collect();
        let mut defined: HashSet<Reg> = self.params.iter().copied().collect();
        for block in &self.blocks {
            let term = block.terminator.as_ref().ok_or_else(|| {
                Error::msg(format!(
                    "function '{}': block {} has no terminator",
                    self.name, block.label
                ))
            })?;
            for succ in term.successors() {
                if !ids.contains(&succ) {
                    return Err(Error::msg(format!(
                        "function '{}': block {} branches to missing block {}",
                        self.name, block.label, succ
                    )));
                }
            }
            for inst in &block.instructions {
                if let Some(d) = inst.def() {
                    if !defined.insert(d) {
                        return Err(Error::msg(format!(
                            "function '{}': register {} defined twice",
                            self.name, d
                        )));
                    }
                    if self.reg_type(d).is_none() {
                        return Err(Error::msg(format!(
                            "function '{}': register {} has no type",
                            self.name, d
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub data: Storage,
    pub mutable: bool,
}

impl Global {
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn bytes(&self) -> usize {
        self.data.len() * self.dtype().size_in_bytes()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub name: String,
    pub globals: BTreeMap<String, Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn verify(&self) -> Result<()> {
        for f in &self.functions {
            f.verify()?;
            for g in f.referenced_globals() {
                if !self.globals.contains_key(g) {
                    return Err(Error::msg(format!(
                        "function '{}' references unknown global '{}'",
                        f.name, g
                    )));
                }
            }
        }
        Ok(())
    }
}

//  Display

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Value(d) => write!(f, "{}", d),
            IrType::Ptr(d) => write!(f, "{}*", d),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Const(l) => write!(f, "{}", l),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Alloca { dst, dtype, count } => {
                write!(f, "{} = alloca {} x {}", dst, dtype, count)
            }
            Instruction::GlobalAddr { dst, name } => write!(f, "{} = addr @{}", dst, name),
            Instruction::Gep { dst, base, index } => write!(f, "{} = gep {}, {}", dst, base, index),
            Instruction::Load { dst, ptr } => write!(f, "{} = load {}", dst, ptr),
            Instruction::Store { ptr, value } => write!(f, "store {}, {}", value, ptr),
            Instruction::Binary { dst, op, lhs, rhs } => {
                write!(f, "{} = {} {}, {}", dst, op, lhs, rhs)
            }
            Instruction::Unary { dst, op, operand } => write!(f, "{} = {} {}", dst, op, operand),
            Instruction::Compare { dst, op, lhs, rhs } => {
                write!(f, "{} = cmp {} {}, {}", dst, op, lhs, rhs)
            }
            Instruction::Cast { dst, operand, dtype } => {
                write!(f, "{} = cast {} to {}", dst, operand, dtype)
            }
            Instruction::MemMove { dst, src, bytes } => {
                write!(f, "memmove {}, {}, {} bytes", dst, src, bytes)
            }
            Instruction::Call { function, args } => {
                write!(f, "call @{}(", function)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch(b) => write!(f, "br {}", b),
            Terminator::CondBranch {
                cond,
                then,
                otherwise,
                metadata,
            } => {
                write!(f, "br {}, {}, {}", cond, then, otherwise)?;
                if let Some(m) = metadata {
                    write!(f, " !loop(unroll={}, parallel={})", m.unroll, m.parallel)?;
                }
                Ok(())
            }
            Terminator::Return => write!(f, "ret"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}fn @{}(", if self.exported { "export " } else { "" }, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match self.reg_type(*p) {
                Some(t) => write!(f, "{}: {}", p, t)?,
                None => write!(f, "{}", p)?,
            }
        }
        writeln!(f, ") {{")?;
        for b in &self.blocks {
            writeln!(f, "{}:  ; {}", b.id, b.label)?;
            for inst in &b.instructions {
                writeln!(f, "    {}", inst)?;
            }
            match &b.terminator {
                Some(t) => writeln!(f, "    {}", t)?,
                None => writeln!(f, "    <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for g in self.globals.values() {
            writeln!(
                f,
                "@{} = {} {} x {}",
                g.name,
                if g.mutable { "global" } else { "constant" },
                g.dtype(),
                g.data.len()
            )?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
