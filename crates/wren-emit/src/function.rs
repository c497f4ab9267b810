use std::collections::{BTreeMap, HashMap};

use wren_core::error::{Error, Result};
use wren_core::{BinaryOp, CmpOp, DType, Literal, Storage, UnaryOp};

use crate::ir::{
    BasicBlock, BlockId, Function, Global, Instruction, IrType, LoopMetadata, Operand, Reg,
    Terminator,
};

/// A mutable global together with the immutable global holding its reset
/// image. The reset function copies `init` over `state`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateGlobal {
    pub state: String,
    pub init: String,
    pub bytes: usize,
}

// FunctionEmitter — Builds one Function block by block
//
// The emitter keeps an insertion point (the current block) and appends each
// instruction there. Allocas and global addresses are collected in a
// prologue that is placed at the top of the entry block when the function is
// finished, so memory obtained inside a loop body is allocated once per call
// rather than once per iteration.
//
// Globals created while emitting are collected here and merged into the
// module by `ModuleEmitter::end_function`. Their names are made unique with
// a `hint.N` suffix.

pub struct FunctionEmitter {
    function: Function,
    current: BlockId,
    next_block: u32,
    prologue: Vec<Instruction>,
    global_addrs: HashMap<String, Reg>,
    globals: BTreeMap<String, Global>,
    imported: HashMap<String, DType>,
    states: Vec<StateGlobal>,
    name_counter: usize,
}

impl FunctionEmitter {
    /// Start a function with one parameter register per entry of `params`.
    pub fn new(name: impl Into<String>, params: &[IrType]) -> Self {
        let name = name.into();
        let entry = BasicBlock::new(BlockId(0), "entry");
        let function = Function {
            name: name.clone(),
            params: (0..params.len() as u32).map(Reg).collect(),
            reg_types: params.to_vec(),
            blocks: vec![entry],
            exported: true,
        };
        FunctionEmitter {
            function,
            current: BlockId(0),
            next_block: 1,
            prologue: Vec::new(),
            global_addrs: HashMap::new(),
            globals: BTreeMap::new(),
            imported: HashMap::new(),
            states: Vec::new(),
            name_counter: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn set_exported(&mut self, exported: bool) {
        self.function.exported = exported;
    }

    pub fn param(&self, index: usize) -> Option<Reg> {
        self.function.params.get(index).copied()
    }

    pub fn new_reg(&mut self, ty: IrType) -> Reg {
        let r = Reg(self.function.reg_types.len() as u32);
        self.function.reg_types.push(ty);
        r
    }

    pub fn reg_type(&self, r: Reg) -> Result<IrType> {
        self.function
            .reg_type(r)
            .ok_or_else(|| Error::msg(format!("unknown register {}", r)))
    }

    pub fn operand_type(&self, o: &Operand) -> Result<IrType> {
        match o {
            Operand::Reg(r) => self.reg_type(*r),
            Operand::Const(l) => Ok(IrType::Value(l.dtype())),
        }
    }

    fn value_type(&self, o: &Operand) -> Result<DType> {
        match self.operand_type(o)? {
            IrType::Value(d) => Ok(d),
            IrType::Ptr(d) => Err(Error::TypeMismatch {
                expected: "value".into(),
                got: format!("{}*", d),
            }),
        }
    }

    fn ptr_type(&self, r: Reg) -> Result<DType> {
        match self.reg_type(r)? {
            IrType::Ptr(d) => Ok(d),
            IrType::Value(d) => Err(Error::TypeMismatch {
                expected: "pointer".into(),
                got: d.to_string(),
            }),
        }
    }

    //  Blocks

    /// Create a block without moving the insertion point.
    pub fn append_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.function.blocks.push(BasicBlock::new(id, label));
        id
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        let idx = self
            .function
            .blocks
            .iter()
            .position(|b| b.id == id)
            .unwrap_or_else(|| panic!("block {} does not exist", id));
        &mut self.function.blocks[idx]
    }

    pub fn is_terminated(&self) -> bool {
        self.function
            .block(self.current)
            .map(|b| b.terminator.is_some())
            .unwrap_or(false)
    }

    fn push(&mut self, inst: Instruction) {
        let current = self.current;
        let block = self.block_mut(current);
        assert!(
            block.terminator.is_none(),
            "emitting into terminated block {}",
            block.label
        );
        block.instructions.push(inst);
    }

    fn terminate(&mut self, term: Terminator) {
        let current = self.current;
        let block = self.block_mut(current);
        assert!(
            block.terminator.is_none(),
            "block {} is already terminated",
            block.label
        );
        block.terminator = Some(term);
    }

    //  Memory

    /// Zero-filled stack memory, allocated at function entry.
    pub fn alloca(&mut self, dtype: DType, count: usize) -> Reg {
        let dst = self.new_reg(IrType::Ptr(dtype));
        self.prologue.push(Instruction::Alloca { dst, dtype, count });
        dst
    }

    /// Register a global; returns its unique name.
    pub fn global(&mut self, hint: &str, data: Storage, mutable: bool) -> String {
        let name = format!("{}.{}.{}", self.function.name, hint, self.name_counter);
        self.name_counter += 1;
        self.globals.insert(
            name.clone(),
            Global {
                name: name.clone(),
                data,
                mutable,
            },
        );
        name
    }

    /// Register node state: a mutable global seeded with `data` and a zero
    /// image used by the reset function.
    pub fn state_global(&mut self, hint: &str, data: Storage) -> String {
        let bytes = data.len() * data.dtype().size_in_bytes();
        let zeros = Storage::zeros(data.dtype(), data.len());
        let state = self.global(hint, data, true);
        let init = self.global(&format!("{}.reset", hint), zeros, false);
        self.states.push(StateGlobal { state: state.clone(), init, bytes });
        state
    }

    /// Make a global that already lives in the module addressable.
    pub fn import_global(&mut self, name: &str, dtype: DType) {
        self.imported.insert(name.to_string(), dtype);
    }

    /// Address of a global, emitted once in the prologue.
    pub fn global_addr(&mut self, name: &str) -> Result<Reg> {
        if let Some(r) = self.global_addrs.get(name) {
            return Ok(*r);
        }
        let dtype = self
            .globals
            .get(name)
            .map(|g| g.dtype())
            .or_else(|| self.imported.get(name).copied())
            .ok_or_else(|| Error::msg(format!("unknown global '{}'", name)))?;
        let dst = self.new_reg(IrType::Ptr(dtype));
        self.prologue.push(Instruction::GlobalAddr {
            dst,
            name: name.to_string(),
        });
        self.global_addrs.insert(name.to_string(), dst);
        Ok(dst)
    }

    /// `base + index` elements.
    pub fn gep(&mut self, base: Reg, index: Operand) -> Result<Reg> {
        let dtype = self.ptr_type(base)?;
        let it = self.value_type(&index)?;
        if it != DType::I64 {
            return Err(Error::dtype_mismatch(DType::I64, it));
        }
        if index == Operand::Const(Literal::I64(0)) {
            return Ok(base);
        }
        let dst = self.new_reg(IrType::Ptr(dtype));
        self.push(Instruction::Gep { dst, base, index });
        Ok(dst)
    }

    pub fn load(&mut self, ptr: Reg) -> Result<Reg> {
        let dtype = self.ptr_type(ptr)?;
        let dst = self.new_reg(IrType::Value(dtype));
        self.push(Instruction::Load { dst, ptr });
        Ok(dst)
    }

    pub fn store(&mut self, ptr: Reg, value: Operand) -> Result<()> {
        let pd = self.ptr_type(ptr)?;
        let vd = self.value_type(&value)?;
        if pd != vd {
            return Err(Error::dtype_mismatch(pd, vd));
        }
        self.push(Instruction::Store { ptr, value });
        Ok(())
    }

    pub fn mem_move(&mut self, dst: Reg, src: Reg, bytes: usize) -> Result<()> {
        let (dd, sd) = (self.ptr_type(dst)?, self.ptr_type(src)?);
        if dd != sd {
            return Err(Error::dtype_mismatch(dd, sd));
        }
        self.push(Instruction::MemMove { dst, src, bytes });
        Ok(())
    }

    pub fn call(&mut self, function: &str, args: Vec<Operand>) {
        self.push(Instruction::Call {
            function: function.to_string(),
            args,
        });
    }

    //  Arithmetic

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Reg> {
        let (lt, rt) = (self.value_type(&lhs)?, self.value_type(&rhs)?);
        if lt != rt {
            return Err(Error::dtype_mismatch(lt, rt));
        }
        let dst = self.new_reg(IrType::Value(lt));
        self.push(Instruction::Binary { dst, op, lhs, rhs });
        Ok(dst)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Operand) -> Result<Reg> {
        let t = self.value_type(&operand)?;
        let dst = self.new_reg(IrType::Value(t));
        self.push(Instruction::Unary { dst, op, operand });
        Ok(dst)
    }

    pub fn compare(&mut self, op: CmpOp, lhs: Operand, rhs: Operand) -> Result<Reg> {
        let (lt, rt) = (self.value_type(&lhs)?, self.value_type(&rhs)?);
        if lt != rt {
            return Err(Error::dtype_mismatch(lt, rt));
        }
        let dst = self.new_reg(IrType::Value(DType::Bool));
        self.push(Instruction::Compare { dst, op, lhs, rhs });
        Ok(dst)
    }

    pub fn cast(&mut self, operand: Operand, dtype: DType) -> Result<Reg> {
        self.value_type(&operand)?;
        let dst = self.new_reg(IrType::Value(dtype));
        self.push(Instruction::Cast {
            dst,
            operand,
            dtype,
        });
        Ok(dst)
    }

    //  Terminators

    pub fn branch(&mut self, target: BlockId) {
        self.terminate(Terminator::Branch(target));
    }

    pub fn cond_branch(
        &mut self,
        cond: Operand,
        then: BlockId,
        otherwise: BlockId,
        metadata: Option<LoopMetadata>,
    ) -> Result<()> {
        let t = self.value_type(&cond)?;
        if t != DType::Bool {
            return Err(Error::dtype_mismatch(DType::Bool, t));
        }
        self.terminate(Terminator::CondBranch {
            cond,
            then,
            otherwise,
            metadata,
        });
        Ok(())
    }

    pub fn ret(&mut self) {
        self.terminate(Terminator::Return);
    }

    /// Close the function: place the prologue, and return the function with
    /// the globals and state it created.
    pub fn finish(mut self) -> Result<(Function, BTreeMap<String, Global>, Vec<StateGlobal>)> {
        if !self.is_terminated() {
            self.ret();
        }
        let mut instructions = std::mem::take(&mut self.prologue);
        let entry = &mut self.function.blocks[0];
        instructions.append(&mut entry.instructions);
        entry.instructions = instructions;
        self.function.verify()?;
        Ok((self.function, self.globals, self.states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prologue_hoisted() {
        let mut f = FunctionEmitter::new("f", &[]);
        let body = f.append_block("body");
        f.branch(body);
        f.set_insert_point(body);
        let p = f.alloca(DType::F32, 4);
        f.store(p, Operand::Const(Literal::F32(1.0))).unwrap();
        let (func, _, _) = f.finish().unwrap();
        assert!(matches!(func.blocks[0].instructions[0], Instruction::Alloca { .. }));
        assert_eq!(func.blocks[1].instructions.len(), 1);
    }

    #[test]
    fn test_type_checked() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::F32)]);
        let p = f.param(0).unwrap();
        let r = f.store(p, Operand::Const(Literal::I32(1)));
        assert!(matches!(r, Err(Error::TypeMismatch { .. })));
        let r = f.binary(
            BinaryOp::Add,
            Operand::Const(Literal::F32(1.0)),
            Operand::Const(Literal::F64(1.0)),
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_state_global_pair() {
        let mut f = FunctionEmitter::new("f", &[]);
        let name = f.state_global("lstm", Storage::F32(vec![1.0, 2.0]));
        let (_, globals, states) = f.finish().unwrap();
        assert!(globals[&name].mutable);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].bytes, 8);
        assert!(!globals[&states[0].init].mutable);
    }

    #[test]
    #[should_panic(expected = "terminated")]
    fn test_emit_after_terminator_panics() {
        let mut f = FunctionEmitter::new("f", &[]);
        f.ret();
        let p = f.alloca(DType::F32, 1);
        let _ = f.load(p);
    }
}
