// Loop emitters — Structured loops over a FunctionEmitter
//
// A for loop is laid out as five blocks:
//
//     (current) ─▶ init ─▶ condition ─┬─▶ body ─▶ ... ─▶ increment ─┐
//                              ▲      │                             │
//                              │      └─▶ after                     │
//                              └────────────────────────────────────┘
//
// The iteration variable lives in an I64 alloca; the condition block loads
// it and tests `current < max`; the increment block adds `step`. The body
// may itself open nested loops, so `end` branches from whatever block is
// current when the body is closed.
//
// PROTOCOL:
//
//   Uninitialized ─begin_*─▶ BodyOpen ─end─▶ Closed
//
// (`Initialized` is passed through inside `begin_*` once the blocks exist.)
// Calling `begin_*` twice, `end` without `begin`, or `end` twice is a bug in
// the caller and panics. Emitters hold no borrow of the function, so loops
// nest simply by creating a new emitter inside the body.

use wren_core::error::{Error, Result};
use wren_core::{BinaryOp, CmpOp, DType, Literal};

use crate::function::FunctionEmitter;
use crate::ir::{BlockId, LoopMetadata, Operand, Reg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Initialized,
    BodyOpen,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct ForBlocks {
    init: BlockId,
    condition: BlockId,
    body: BlockId,
    increment: BlockId,
    after: BlockId,
}

pub struct ForLoopEmitter {
    label: String,
    state: LoopState,
    blocks: Option<ForBlocks>,
    iteration: Option<Reg>,
    step: Operand,
    metadata: LoopMetadata,
}

impl ForLoopEmitter {
    pub fn new(label: impl Into<String>) -> Self {
        ForLoopEmitter {
            label: label.into(),
            state: LoopState::Uninitialized,
            blocks: None,
            iteration: None,
            step: Operand::Const(Literal::I64(1)),
            metadata: LoopMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: LoopMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn create_blocks(&mut self, f: &mut FunctionEmitter) -> ForBlocks {
        assert_eq!(
            self.state,
            LoopState::Uninitialized,
            "loop '{}' already begun",
            self.label
        );
        let blocks = ForBlocks {
            init: f.append_block(&format!("{}.init", self.label)),
            condition: f.append_block(&format!("{}.cond", self.label)),
            body: f.append_block(&format!("{}.body", self.label)),
            increment: f.append_block(&format!("{}.inc", self.label)),
            after: f.append_block(&format!("{}.after", self.label)),
        };
        self.blocks = Some(blocks);
        self.state = LoopState::Initialized;
        blocks
    }

    /// `for i in 0..count`.
    pub fn begin_repeat(&mut self, f: &mut FunctionEmitter, count: usize) -> Result<Reg> {
        let max = i64::try_from(count).map_err(|_| {
            Error::invalid_argument(format!("loop '{}': count {} exceeds i64", self.label, count))
        })?;
        self.begin_range(f, 0, max, 1)
    }

    /// `for i in 0..count` with a runtime count (I64).
    pub fn begin_repeat_value(&mut self, f: &mut FunctionEmitter, count: Operand) -> Result<Reg> {
        self.begin_range_values(
            f,
            Operand::Const(Literal::I64(0)),
            count,
            Operand::Const(Literal::I64(1)),
        )
    }

    /// `for i in (start..max).step_by(step)`; `step` must be positive.
    pub fn begin_range(&mut self, f: &mut FunctionEmitter, start: i64, max: i64, step: i64) -> Result<Reg> {
        assert!(step > 0, "loop '{}': step must be positive", self.label);
        self.begin_range_values(
            f,
            Operand::Const(Literal::I64(start)),
            Operand::Const(Literal::I64(max)),
            Operand::Const(Literal::I64(step)),
        )
    }

    /// General form; all three operands are I64. Returns the pointer to the
    /// iteration variable and leaves the insertion point in the body.
    pub fn begin_range_values(
        &mut self,
        f: &mut FunctionEmitter,
        start: Operand,
        max: Operand,
        step: Operand,
    ) -> Result<Reg> {
        let blocks = self.create_blocks(f);
        let var = f.alloca(DType::I64, 1);
        self.iteration = Some(var);
        self.step = step;

        f.branch(blocks.init);
        f.set_insert_point(blocks.init);
        f.store(var, start)?;
        f.branch(blocks.condition);

        f.set_insert_point(blocks.condition);
        let current = f.load(var)?;
        let cond = f.compare(CmpOp::Lt, Operand::Reg(current), max)?;
        let metadata = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata)
        };
        f.cond_branch(Operand::Reg(cond), blocks.body, blocks.after, metadata)?;

        f.set_insert_point(blocks.body);
        self.state = LoopState::BodyOpen;
        Ok(var)
    }

    /// Pointer to the I64 iteration variable.
    pub fn iteration_variable(&self) -> Option<Reg> {
        self.iteration
    }

    /// Load the current iteration value at the insertion point.
    pub fn load_iteration_variable(&self, f: &mut FunctionEmitter) -> Result<Reg> {
        assert_eq!(self.state, LoopState::BodyOpen, "loop '{}' has no open body", self.label);
        let Some(var) = self.iteration else {
            unreachable!("an open loop has an iteration variable")
        };
        f.load(var)
    }

    /// Close the body: emit the increment and continue in the after block.
    pub fn end(&mut self, f: &mut FunctionEmitter) -> Result<()> {
        assert_eq!(
            self.state,
            LoopState::BodyOpen,
            "loop '{}': end without matching begin",
            self.label
        );
        self.state = LoopState::Closed;
        let (blocks, var) = match (self.blocks, self.iteration) {
            (Some(b), Some(v)) => (b, v),
            _ => unreachable!("an open loop has blocks and a variable"),
        };
        if !f.is_terminated() {
            f.branch(blocks.increment);
        }
        f.set_insert_point(blocks.increment);
        let current = f.load(var)?;
        let next = f.binary(BinaryOp::Add, Operand::Reg(current), self.step)?;
        f.store(var, Operand::Reg(next))?;
        f.branch(blocks.condition);
        f.set_insert_point(blocks.after);
        Ok(())
    }
}

/// Loop that runs while a runtime condition holds.
pub struct WhileLoopEmitter {
    label: String,
    state: LoopState,
    condition: Option<BlockId>,
    after: Option<BlockId>,
}

impl WhileLoopEmitter {
    pub fn new(label: impl Into<String>) -> Self {
        WhileLoopEmitter {
            label: label.into(),
            state: LoopState::Uninitialized,
            condition: None,
            after: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Loop while the Bool at `flag` is true. The body is expected to clear it.
    pub fn begin_flag(&mut self, f: &mut FunctionEmitter, flag: Reg) -> Result<()> {
        self.begin_with(f, |f| Ok(Operand::Reg(f.load(flag)?)))
    }

    /// Loop while the Bool produced by `condition` is true. The callback is
    /// emitted in the condition block and runs before every iteration.
    pub fn begin_with<F>(&mut self, f: &mut FunctionEmitter, condition: F) -> Result<()>
    where
        F: FnOnce(&mut FunctionEmitter) -> Result<Operand>,
    {
        assert_eq!(
            self.state,
            LoopState::Uninitialized,
            "loop '{}' already begun",
            self.label
        );
        let cond_block = f.append_block(&format!("{}.cond", self.label));
        let body = f.append_block(&format!("{}.body", self.label));
        let after = f.append_block(&format!("{}.after", self.label));
        self.condition = Some(cond_block);
        self.after = Some(after);
        self.state = LoopState::Initialized;

        f.branch(cond_block);
        f.set_insert_point(cond_block);
        let c = condition(f)?;
        f.cond_branch(c, body, after, None)?;
        f.set_insert_point(body);
        self.state = LoopState::BodyOpen;
        Ok(())
    }

    pub fn end(&mut self, f: &mut FunctionEmitter) {
        assert_eq!(
            self.state,
            LoopState::BodyOpen,
            "loop '{}': end without matching begin",
            self.label
        );
        self.state = LoopState::Closed;
        let (cond, after) = match (self.condition, self.after) {
            (Some(c), Some(a)) => (c, a),
            _ => unreachable!("an open loop has its blocks"),
        };
        if !f.is_terminated() {
            f.branch(cond);
        }
        f.set_insert_point(after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::{Argument, Engine};
    use crate::ir::IrType;
    use crate::module::ModuleEmitter;
    use wren_core::Storage;

    /// Build `visit(out: *i64, scalars...)` whose loop stores `i + 1` at
    /// `out[i]` on every iteration, run it, and return `out`.
    fn run_visits<F>(len: usize, scalars: Vec<Literal>, open: F) -> Vec<i64>
    where
        F: FnOnce(&mut FunctionEmitter, &mut ForLoopEmitter) -> Result<Reg>,
    {
        let mut params = vec![IrType::Ptr(DType::I64)];
        params.extend(scalars.iter().map(|l| IrType::Value(l.dtype())));
        let mut m = ModuleEmitter::new("m");
        let mut f = m.begin_function("visit", &params);
        let out = f.param(0).unwrap();
        let mut lp = ForLoopEmitter::new("i");
        open(&mut f, &mut lp).unwrap();
        let i = lp.load_iteration_variable(&mut f).unwrap();
        let v = f
            .binary(BinaryOp::Add, Operand::Reg(i), Operand::Const(Literal::I64(1)))
            .unwrap();
        let dst = f.gep(out, Operand::Reg(i)).unwrap();
        f.store(dst, Operand::Reg(v)).unwrap();
        lp.end(&mut f).unwrap();
        m.end_function(f).unwrap();

        let mut engine = Engine::new(m.into_module()).unwrap();
        let mut buffer = Storage::zeros(DType::I64, len);
        {
            let mut args = vec![Argument::Buffer(&mut buffer)];
            args.extend(scalars.into_iter().map(Argument::Scalar));
            engine.call("visit", &mut args).unwrap();
        }
        match buffer {
            Storage::I64(v) => v,
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_constant_bounds_execute() {
        assert_eq!(run_visits(4, vec![], |f, lp| lp.begin_repeat(f, 0)), vec![0; 4]);
        assert_eq!(run_visits(4, vec![], |f, lp| lp.begin_repeat(f, 3)), vec![1, 2, 3, 0]);
        assert_eq!(run_visits(8, vec![], |f, lp| lp.begin_range(f, 5, 5, 1)), vec![0; 8]);
        assert_eq!(
            run_visits(10, vec![], |f, lp| lp.begin_range(f, 0, 10, 3)),
            vec![1, 0, 0, 4, 0, 0, 7, 0, 0, 10]
        );
    }

    #[test]
    fn test_runtime_bounds_execute() {
        let repeat = |count: i64| {
            run_visits(4, vec![Literal::I64(count)], |f, lp| {
                let n = f.param(1).unwrap();
                lp.begin_repeat_value(f, Operand::Reg(n))
            })
        };
        assert_eq!(repeat(0), vec![0; 4]);
        assert_eq!(repeat(2), vec![1, 2, 0, 0]);

        let range = |start: i64, max: i64, step: i64| {
            let scalars = vec![Literal::I64(start), Literal::I64(max), Literal::I64(step)];
            run_visits(10, scalars, |f, lp| {
                let (s, m, st) = (f.param(1).unwrap(), f.param(2).unwrap(), f.param(3).unwrap());
                lp.begin_range_values(f, Operand::Reg(s), Operand::Reg(m), Operand::Reg(st))
            })
        };
        assert_eq!(range(5, 5, 1), vec![0; 10]);
        assert_eq!(range(7, 3, 1), vec![0; 10]);
        assert_eq!(range(1, 10, 4), vec![0, 2, 0, 0, 0, 6, 0, 0, 0, 10]);
    }

    /// `while counter < limit { counter += 1 }`; returns the final counter.
    fn run_while(limit: i64) -> i64 {
        let mut m = ModuleEmitter::new("m");
        let mut f = m.begin_function("count", &[IrType::Ptr(DType::I64), IrType::Value(DType::I64)]);
        let (counter, limit_reg) = (f.param(0).unwrap(), f.param(1).unwrap());
        let mut lp = WhileLoopEmitter::new("w");
        lp.begin_with(&mut f, |f| {
            let c = f.load(counter)?;
            let lt = f.compare(CmpOp::Lt, Operand::Reg(c), Operand::Reg(limit_reg))?;
            Ok(Operand::Reg(lt))
        })
        .unwrap();
        let c = f.load(counter).unwrap();
        let next = f
            .binary(BinaryOp::Add, Operand::Reg(c), Operand::Const(Literal::I64(1)))
            .unwrap();
        f.store(counter, Operand::Reg(next)).unwrap();
        lp.end(&mut f);
        m.end_function(f).unwrap();

        let mut engine = Engine::new(m.into_module()).unwrap();
        let mut out = Storage::zeros(DType::I64, 1);
        engine
            .call(
                "count",
                &mut [Argument::Buffer(&mut out), Argument::Scalar(Literal::I64(limit))],
            )
            .unwrap();
        match out {
            Storage::I64(v) => v[0],
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_while_condition_checked_first() {
        assert_eq!(run_while(0), 0);
        assert_eq!(run_while(-3), 0);
        assert_eq!(run_while(5), 5);
    }

    #[test]
    fn test_repeat_count_overflow() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i");
        let count = usize::try_from(i64::MAX).unwrap() + 1;
        assert!(matches!(
            lp.begin_repeat(&mut f, count),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(lp.state(), LoopState::Uninitialized);
    }

    #[test]
    fn test_for_loop_shape() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i");
        lp.begin_repeat(&mut f, 4).unwrap();
        assert_eq!(lp.state(), LoopState::BodyOpen);
        lp.end(&mut f).unwrap();
        assert_eq!(lp.state(), LoopState::Closed);
        let (func, _, _) = f.finish().unwrap();
        // entry + init, cond, body, inc, after
        assert_eq!(func.blocks.len(), 6);
        func.verify().unwrap();
    }

    #[test]
    #[should_panic(expected = "end without matching begin")]
    fn test_end_without_begin_panics() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i");
        let _ = lp.end(&mut f);
    }

    #[test]
    #[should_panic(expected = "end without matching begin")]
    fn test_double_end_panics() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i");
        lp.begin_repeat(&mut f, 2).unwrap();
        lp.end(&mut f).unwrap();
        let _ = lp.end(&mut f);
    }

    #[test]
    #[should_panic(expected = "step must be positive")]
    fn test_zero_step_panics() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i");
        let _ = lp.begin_range(&mut f, 0, 4, 0);
    }

    #[test]
    fn test_metadata_tags_condition() {
        let mut f = FunctionEmitter::new("f", &[]);
        let mut lp = ForLoopEmitter::new("i").with_metadata(LoopMetadata {
            unroll: true,
            parallel: false,
        });
        lp.begin_repeat(&mut f, 3).unwrap();
        lp.end(&mut f).unwrap();
        let (func, _, _) = f.finish().unwrap();
        assert!(func.to_string().contains("!loop(unroll=true"));
    }

    #[test]
    fn test_while_flag() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::Bool)]);
        let flag = f.param(0).unwrap();
        let mut lp = WhileLoopEmitter::new("w");
        lp.begin_flag(&mut f, flag).unwrap();
        f.store(flag, Operand::Const(Literal::Bool(false))).unwrap();
        lp.end(&mut f);
        let (func, _, _) = f.finish().unwrap();
        func.verify().unwrap();
        assert_eq!(func.blocks.len(), 4);
    }
}
