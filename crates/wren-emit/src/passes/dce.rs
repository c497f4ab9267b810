use crate::ir::Function;
use crate::optimizer::FunctionPass;

use super::used_registers;

/// Removes instructions without side effects whose result is never read.
pub struct DeadCodeElimination;

impl FunctionPass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let used = used_registers(function);
            let mut removed = 0;
            for block in &mut function.blocks {
                let before = block.instructions.len();
                block.instructions.retain(|inst| {
                    inst.has_side_effects() || inst.def().map_or(true, |d| used.contains(&d))
                });
                removed += before - block.instructions.len();
            }
            if removed == 0 {
                return changed;
            }
            changed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionEmitter;
    use crate::ir::{Instruction, IrType, Operand};
    use wren_core::{DType, Literal, UnaryOp};

    #[test]
    fn test_unused_chain_removed() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::F32)]);
        let p = f.param(0).unwrap();
        let _scratch = f.alloca(DType::F32, 4);
        let a = f.load(p).unwrap();
        let _b = f.unary(UnaryOp::Exp, Operand::Reg(a)).unwrap();
        f.store(p, Operand::Const(Literal::F32(0.0))).unwrap();
        let (mut func, _, _) = f.finish().unwrap();
        assert!(DeadCodeElimination.run(&mut func));
        assert_eq!(func.instruction_count(), 1);
        assert!(matches!(func.blocks[0].instructions[0], Instruction::Store { .. }));
        assert!(!DeadCodeElimination.run(&mut func));
    }

    #[test]
    fn test_branch_condition_kept() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::Bool)]);
        let p = f.param(0).unwrap();
        let c = f.load(p).unwrap();
        let a = f.append_block("a");
        let b = f.append_block("b");
        f.cond_branch(Operand::Reg(c), a, b, None).unwrap();
        f.set_insert_point(a);
        f.ret();
        f.set_insert_point(b);
        f.ret();
        let (mut func, _, _) = f.finish().unwrap();
        assert!(!DeadCodeElimination.run(&mut func));
        assert_eq!(func.instruction_count(), 1);
    }
}
