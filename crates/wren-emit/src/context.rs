use std::collections::HashMap;

use wren_core::error::{Error, Result};
use wren_core::{
    BinaryOp, CmpOp, DType, EmitterContext, Literal, Location, MemoryLayout, Scalar,
    SharedStorage, Storage, UnaryOp, Value, ValueData,
};

use crate::function::FunctionEmitter;
use crate::ir::{LoopMetadata, Operand, Reg};
use crate::loops::ForLoopEmitter;

// IrContext — The emitting strategy
//
// Runs the same node code as ComputeContext, but every primitive appends
// instructions to a FunctionEmitter instead of touching memory. The values it
// hands out are `ValueData::Emitted(Location)`, where the location is the
// pointer register of the value's base element.
//
// Host values reaching this context are build-time constants (weights,
// literals). Rank-0 host operands fold straight into instruction operands;
// a host array is embedded as an immutable global the first time its address
// is needed. Writing to a host value is rejected, since the compiled code
// cannot reach the caller's memory.
//
// Arithmetic on two known operands is evaluated while emitting and yields a
// host literal, so index computations over constant coordinates cost nothing
// at run time.
//
// Loops with zero iterations emit nothing and loops with one iteration run
// the body inline with a constant index. Memory allocated inside a loop body
// is re-zeroed on every iteration to match the fresh allocation the
// interpreter performs.

pub struct IrContext<'f> {
    function: &'f mut FunctionEmitter,
    constants: HashMap<usize, (SharedStorage, String)>,
    states: HashMap<usize, (SharedStorage, String)>,
    zeros: HashMap<(DType, usize), String>,
    metadata: LoopMetadata,
    loop_depth: usize,
    labels: usize,
}

impl<'f> IrContext<'f> {
    pub fn new(function: &'f mut FunctionEmitter) -> Self {
        IrContext {
            function,
            constants: HashMap::new(),
            states: HashMap::new(),
            zeros: HashMap::new(),
            metadata: LoopMetadata::default(),
            loop_depth: 0,
            labels: 0,
        }
    }

    /// Hints attached to every loop emitted from here on.
    pub fn with_loop_metadata(mut self, metadata: LoopMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn function(&mut self) -> &mut FunctionEmitter {
        &mut *self.function
    }

    /// Value over the memory a pointer parameter addresses.
    pub fn bind_parameter(&self, index: usize, dtype: DType, layout: MemoryLayout) -> Result<Value> {
        let reg = self
            .function
            .param(index)
            .ok_or_else(|| Error::invalid_argument(format!("no parameter {}", index)))?;
        Ok(Value::emitted(dtype, Location(reg.0), Some(layout)))
    }

    fn label(&mut self, hint: &str) -> String {
        self.labels += 1;
        format!("{}{}", hint, self.labels)
    }

    fn embed(&mut self, storage: &SharedStorage) -> Result<Reg> {
        let id = storage.id();
        if let Some((_, name)) = self.states.get(&id) {
            let name = name.clone();
            return self.function.global_addr(&name);
        }
        let name = match self.constants.get(&id) {
            Some((_, name)) => name.clone(),
            None => {
                let data = storage.read().clone();
                let name = self.function.global("const", data, false);
                self.constants.insert(id, (storage.clone(), name.clone()));
                name
            }
        };
        self.function.global_addr(&name)
    }

    /// Pointer to the base element of `value`.
    fn pointer(&mut self, value: &Value) -> Result<Reg> {
        match value.data() {
            ValueData::Emitted(loc) => Ok(Reg(loc.0)),
            ValueData::Host { storage, offset } => {
                let (storage, offset) = (storage.clone(), *offset);
                let base = self.embed(&storage)?;
                self.function
                    .gep(base, Operand::Const(Literal::I64(offset as i64)))
            }
            ValueData::Empty => Err(Error::invalid_argument("value is undefined")),
        }
    }

    fn writable_pointer(&mut self, value: &Value) -> Result<Reg> {
        match value.data() {
            ValueData::Emitted(loc) => Ok(Reg(loc.0)),
            ValueData::Host { .. } => Err(Error::invalid_argument(
                "cannot write to host memory from emitted code",
            )),
            ValueData::Empty => Err(Error::invalid_argument("value is undefined")),
        }
    }

    /// Operand holding the element of a rank-0 value.
    fn operand(&mut self, value: &Value) -> Result<Operand> {
        if let Some(l) = self.literal(value) {
            return Ok(Operand::Const(l));
        }
        let ptr = self.pointer(value)?;
        Ok(Operand::Reg(self.function.load(ptr)?))
    }

    /// Put a computed register into fresh rank-0 memory.
    fn spill(&mut self, dtype: DType, reg: Reg) -> Result<Value> {
        let slot = self.function.alloca(dtype, 1);
        self.function.store(slot, Operand::Reg(reg))?;
        Ok(Value::emitted(dtype, Location(slot.0), Some(MemoryLayout::scalar())))
    }

    fn index_operand(&mut self, s: &Scalar) -> Result<Operand> {
        let op = self.operand(s.value())?;
        if s.dtype() == DType::I64 {
            return Ok(op);
        }
        if !s.dtype().is_integer() {
            return Err(Error::dtype_mismatch(DType::I64, s.dtype()));
        }
        Ok(Operand::Reg(self.function.cast(op, DType::I64)?))
    }

    fn zero_fill(&mut self, ptr: Reg, dtype: DType, count: usize) -> Result<()> {
        let name = match self.zeros.get(&(dtype, count)) {
            Some(n) => n.clone(),
            None => {
                let n = self.function.global("zeros", Storage::zeros(dtype, count), false);
                self.zeros.insert((dtype, count), n.clone());
                n
            }
        };
        let src = self.function.global_addr(&name)?;
        self.function
            .mem_move(ptr, src, count * dtype.size_in_bytes())
    }
}

impl EmitterContext for IrContext<'_> {
    fn allocate(&mut self, dtype: DType, layout: MemoryLayout) -> Result<Value> {
        let count = layout.memory_size();
        let ptr = self.function.alloca(dtype, count);
        if self.loop_depth > 0 {
            self.zero_fill(ptr, dtype, count)?;
        }
        Ok(Value::emitted(dtype, Location(ptr.0), Some(layout)))
    }

    fn state(&mut self, name: &str, value: &Value) -> Result<Value> {
        let layout = value.check_ready()?.clone();
        let dtype = value.dtype()?;
        let (storage, offset) = value
            .host()
            .ok_or_else(|| Error::invalid_argument("node state must live in host memory"))?;
        let id = storage.id();
        let global = match self.states.get(&id) {
            Some((_, g)) => g.clone(),
            None => {
                let data = storage.read().clone();
                let g = self.function.state_global(name, data);
                self.states.insert(id, (storage.clone(), g.clone()));
                g
            }
        };
        let base = self.function.global_addr(&global)?;
        let ptr = self
            .function
            .gep(base, Operand::Const(Literal::I64(offset as i64)))?;
        Ok(Value::emitted(dtype, Location(ptr.0), Some(layout)))
    }

    fn offset(&mut self, value: &Value, indices: &[Scalar]) -> Result<Value> {
        let layout = value.check_ready()?.clone();
        if indices.len() != layout.rank() {
            return Err(Error::invalid_argument(format!(
                "offset needs {} indices, got {}",
                layout.rank(),
                indices.len()
            )));
        }
        let known: Vec<Option<i64>> = indices
            .iter()
            .map(|s| self.literal(s.value()).map(|l| l.to_i64()))
            .collect();
        if let Some(i) = known.iter().flatten().find(|i| **i < 0) {
            return Err(Error::invalid_argument(format!("negative index {}", i)));
        }

        if known.iter().all(Option::is_some) {
            let coords: Vec<usize> = known.iter().flatten().map(|i| *i as usize).collect();
            let pos = layout.flat_offset(&coords)?;
            if value.is_host() {
                return value.advanced(pos);
            }
            let base = self.pointer(value)?;
            let ptr = self.function.gep(base, Operand::Const(Literal::I64(pos as i64)))?;
            return Ok(Value::emitted(value.dtype()?, Location(ptr.0), None));
        }

        // Σ (coord[order[p]] + offset[p]) · increment[p], with the constant
        // part accumulated separately.
        let mut constant = 0i64;
        let mut dynamic: Option<Operand> = None;
        for p in 0..layout.rank() {
            let l = layout.order()[p];
            let inc = layout.increments()[p] as i64;
            constant += layout.offsets()[p] as i64 * inc;
            match known[l] {
                Some(i) => constant += i * inc,
                None => {
                    let idx = self.index_operand(&indices[l])?;
                    let term = if inc == 1 {
                        idx
                    } else {
                        Operand::Reg(self.function.binary(
                            BinaryOp::Mul,
                            idx,
                            Operand::Const(Literal::I64(inc)),
                        )?)
                    };
                    dynamic = Some(match dynamic {
                        None => term,
                        Some(acc) => Operand::Reg(self.function.binary(BinaryOp::Add, acc, term)?),
                    });
                }
            }
        }
        let mut index = dynamic.unwrap_or(Operand::Const(Literal::I64(0)));
        if constant != 0 {
            index = Operand::Reg(self.function.binary(
                BinaryOp::Add,
                index,
                Operand::Const(Literal::I64(constant)),
            )?);
        }
        let base = self.pointer(value)?;
        let ptr = self.function.gep(base, index)?;
        Ok(Value::emitted(value.dtype()?, Location(ptr.0), None))
    }

    fn literal(&self, value: &Value) -> Option<Literal> {
        if !value.is_host() {
            return None;
        }
        match value.layout() {
            Ok(l) if l.rank() == 0 => value.literal().ok(),
            _ => None,
        }
    }

    fn store(&mut self, dst: &Value, src: &Value) -> Result<()> {
        let (dt, st) = (dst.dtype()?, src.dtype()?);
        if dt != st {
            return Err(Error::dtype_mismatch(dt, st));
        }
        let ptr = self.writable_pointer(dst)?;
        let v = self.operand(src)?;
        self.function.store(ptr, v)
    }

    fn move_elements(
        &mut self,
        dst: &Value,
        dst_offset: usize,
        src: &Value,
        src_offset: usize,
        count: usize,
    ) -> Result<()> {
        let (dt, st) = (dst.dtype()?, src.dtype()?);
        if dt != st {
            return Err(Error::dtype_mismatch(dt, st));
        }
        if count == 0 {
            return Ok(());
        }
        let d = self.writable_pointer(dst)?;
        let d = self
            .function
            .gep(d, Operand::Const(Literal::I64(dst_offset as i64)))?;
        let s = self.pointer(src)?;
        let s = self
            .function
            .gep(s, Operand::Const(Literal::I64(src_offset as i64)))?;
        self.function.mem_move(d, s, count * dt.size_in_bytes())
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        if let (Some(a), Some(b)) = (self.literal(lhs), self.literal(rhs)) {
            if let Ok(r) = a.binary(op, &b) {
                return Ok(Value::from_literal(r));
            }
        }
        let dtype = lhs.dtype()?;
        let (a, b) = (self.operand(lhs)?, self.operand(rhs)?);
        let r = self.function.binary(op, a, b)?;
        self.spill(dtype, r)
    }

    fn unary(&mut self, op: UnaryOp, operand: &Value) -> Result<Value> {
        if let Some(a) = self.literal(operand) {
            return Ok(Value::from_literal(a.unary(op)?));
        }
        let dtype = operand.dtype()?;
        let a = self.operand(operand)?;
        let r = self.function.unary(op, a)?;
        self.spill(dtype, r)
    }

    fn compare(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        if let (Some(a), Some(b)) = (self.literal(lhs), self.literal(rhs)) {
            return Ok(Value::from_literal(Literal::Bool(a.compare(op, &b)?)));
        }
        let (a, b) = (self.operand(lhs)?, self.operand(rhs)?);
        let r = self.function.compare(op, a, b)?;
        self.spill(DType::Bool, r)
    }

    fn cast(&mut self, operand: &Value, dtype: DType) -> Result<Value> {
        if let Some(a) = self.literal(operand) {
            return Ok(Value::from_literal(a.cast(dtype)));
        }
        let a = self.operand(operand)?;
        let r = self.function.cast(a, dtype)?;
        self.spill(dtype, r)
    }

    fn for_range<F>(&mut self, start: usize, stop: usize, step: usize, mut body: F) -> Result<()>
    where
        F: FnMut(&mut Self, Scalar) -> Result<()>,
    {
        assert!(step > 0, "for_range step must be positive");
        if start >= stop {
            return Ok(());
        }
        if (stop - start).div_ceil(step) == 1 {
            return body(self, Scalar::from(start));
        }
        let label = self.label("loop");
        let mut lp = ForLoopEmitter::new(label).with_metadata(self.metadata);
        let bound = |n: usize| {
            i64::try_from(n).map_err(|_| Error::invalid_argument(format!("loop bound {} exceeds i64", n)))
        };
        let (start, stop, step) = (bound(start)?, bound(stop)?, bound(step)?);
        let var = lp.begin_range(&mut *self.function, start, stop, step)?;
        let index = Scalar::new(Value::emitted(
            DType::I64,
            Location(var.0),
            Some(MemoryLayout::scalar()),
        ))?;
        self.loop_depth += 1;
        let result = body(self, index);
        self.loop_depth -= 1;
        lp.end(&mut *self.function)?;
        result
    }

    fn if_else<T, E>(&mut self, cond: &Value, then: T, otherwise: E) -> Result<()>
    where
        T: FnOnce(&mut Self) -> Result<()>,
        E: FnOnce(&mut Self) -> Result<()>,
    {
        if let Some(c) = self.literal(cond) {
            return if c.is_true() { then(self) } else { otherwise(self) };
        }
        let c = self.operand(cond)?;
        let then_label = self.label("if.then");
        let else_label = self.label("if.else");
        let merge_label = self.label("if.end");
        let then_block = self.function.append_block(&then_label);
        let else_block = self.function.append_block(&else_label);
        let merge = self.function.append_block(&merge_label);
        self.function.cond_branch(c, then_block, else_block, None)?;

        self.function.set_insert_point(then_block);
        then(self)?;
        if !self.function.is_terminated() {
            self.function.branch(merge);
        }
        self.function.set_insert_point(else_block);
        otherwise(self)?;
        if !self.function.is_terminated() {
            self.function.branch(merge);
        }
        self.function.set_insert_point(merge);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::{Argument, Engine};
    use crate::module::ModuleEmitter;
    use crate::ir::IrType;
    use wren_core::{functions, Vector};

    fn run_unary(
        build: impl FnOnce(&mut IrContext, &Value, &Value) -> Result<()>,
        input: Vec<f32>,
        n_out: usize,
    ) -> Vec<f32> {
        let mut m = ModuleEmitter::new("m");
        let mut f = m.begin_function("f", &[IrType::Ptr(DType::F32), IrType::Ptr(DType::F32)]);
        {
            let mut ctx = IrContext::new(&mut f);
            let x = ctx
                .bind_parameter(0, DType::F32, MemoryLayout::new(&[input.len()]))
                .unwrap();
            let y = ctx.bind_parameter(1, DType::F32, MemoryLayout::new(&[n_out])).unwrap();
            build(&mut ctx, &x, &y).unwrap();
        }
        m.end_function(f).unwrap();
        let mut engine = Engine::new(m.into_module()).unwrap();
        let mut a = Storage::F32(input);
        let mut b = Storage::zeros(DType::F32, n_out);
        engine
            .call("f", &mut [Argument::Buffer(&mut a), Argument::Buffer(&mut b)])
            .unwrap();
        match b {
            Storage::F32(v) => v,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_elementwise_with_host_weights() {
        let w = Value::from_slice(&[1.0f32, 2.0, 3.0]);
        let out = run_unary(
            |ctx, x, y| {
                functions::assign(ctx, y, x)?;
                functions::elementwise(ctx, y, &w, BinaryOp::Mul)
            },
            vec![1.0, 1.0, 2.0],
            3,
        );
        assert_eq!(out, vec![1.0, 2.0, 6.0]);
    }

    #[test]
    fn test_dot_inside_loop() {
        let out = run_unary(
            |ctx, x, y| {
                let xv = Vector::new(x.clone())?;
                let yv = Vector::new(y.clone())?;
                ctx.for_range(0, 2, 1, |ctx, j| {
                    let d = xv.dot(ctx, &xv)?;
                    yv.at(ctx, j)?.assign(ctx, &d)
                })
            },
            vec![1.0, 2.0],
            2,
        );
        assert_eq!(out, vec![5.0, 5.0]);
    }

    #[test]
    fn test_allocation_in_loop_rezeroed() {
        // every iteration adds 1 to a fresh zero cell, so y[j] ends as 1
        let out = run_unary(
            |ctx, _x, y| {
                let yv = Vector::new(y.clone())?;
                ctx.for_range(0, 3, 1, |ctx, j| {
                    let cell = Scalar::new(ctx.allocate(DType::F32, MemoryLayout::scalar())?)?;
                    let next = cell.add(ctx, &Scalar::constant(1.0f32))?;
                    cell.assign(ctx, &next)?;
                    yv.at(ctx, j)?.assign(ctx, &cell)
                })
            },
            vec![0.0],
            3,
        );
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_store_into_host_rejected() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut ctx = IrContext::new(&mut f);
        let host = Value::from_literal(Literal::F32(1.0));
        let r = ctx.store(&host, &Value::from_literal(Literal::F32(2.0)));
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_known_arithmetic_folds_while_emitting() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut ctx = IrContext::new(&mut f);
        let a = Scalar::constant(3i64);
        let b = Scalar::constant(4i64);
        let c = a.mul(&mut ctx, &b).unwrap();
        assert_eq!(c.known(&ctx), Some(Literal::I64(12)));
        drop(ctx);
        let (func, _, _) = f.finish().unwrap();
        assert_eq!(func.instruction_count(), 0);
    }

    #[test]
    fn test_loop_with_single_iteration_inlined() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut ctx = IrContext::new(&mut f);
        let mut seen = None;
        ctx.for_range(2, 3, 1, |ctx, i| {
            seen = i.known(ctx);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some(Literal::I64(2)));
        drop(ctx);
        let (func, _, _) = f.finish().unwrap();
        assert_eq!(func.blocks.len(), 1);
    }
}
