use std::collections::HashMap;

use wren_core::Literal;

use crate::ir::{Function, Instruction, Operand, Reg, Terminator};
use crate::optimizer::FunctionPass;

/// Replaces registers computed from constants with the constants themselves.
///
/// Evaluation goes through the same `Literal` arithmetic the interpreter
/// uses, so folding never changes a result. Operations that fail to
/// evaluate (integer division by zero) are left for run time.
pub struct ConstantFolding;

fn known(consts: &HashMap<Reg, Literal>, o: &Operand) -> Option<Literal> {
    match o {
        Operand::Const(l) => Some(*l),
        Operand::Reg(r) => consts.get(r).copied(),
    }
}

fn evaluate(consts: &HashMap<Reg, Literal>, inst: &Instruction) -> Option<(Reg, Literal)> {
    match inst {
        Instruction::Binary { dst, op, lhs, rhs } => {
            let (a, b) = (known(consts, lhs)?, known(consts, rhs)?);
            a.binary(*op, &b).ok().map(|l| (*dst, l))
        }
        Instruction::Unary { dst, op, operand } => {
            let a = known(consts, operand)?;
            a.unary(*op).ok().map(|l| (*dst, l))
        }
        Instruction::Compare { dst, op, lhs, rhs } => {
            let (a, b) = (known(consts, lhs)?, known(consts, rhs)?);
            a.compare(*op, &b).ok().map(|c| (*dst, Literal::Bool(c)))
        }
        Instruction::Cast {
            dst,
            operand,
            dtype,
        } => known(consts, operand).map(|a| (*dst, a.cast(*dtype))),
        _ => None,
    }
}

impl FunctionPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&mut self, function: &mut Function) -> bool {
        // Block order is not a dominance order, so iterate until no new
        // constant appears before rewriting anything.
        let mut consts: HashMap<Reg, Literal> = HashMap::new();
        loop {
            let before = consts.len();
            for inst in function.blocks.iter().flat_map(|b| &b.instructions) {
                if let Some(d) = inst.def() {
                    if consts.contains_key(&d) {
                        continue;
                    }
                }
                if let Some((dst, lit)) = evaluate(&consts, inst) {
                    consts.insert(dst, lit);
                }
            }
            if consts.len() == before {
                break;
            }
        }

        let mut changed = false;
        for block in &mut function.blocks {
            let count = block.instructions.len();
            block
                .instructions
                .retain(|i| !i.def().is_some_and(|d| consts.contains_key(&d)));
            changed |= block.instructions.len() != count;

            for inst in &mut block.instructions {
                for slot in inst.operands_mut() {
                    if let Operand::Reg(r) = slot {
                        if let Some(l) = consts.get(r) {
                            *slot = Operand::Const(*l);
                            changed = true;
                        }
                    }
                }
            }

            let folded = match &mut block.terminator {
                Some(Terminator::CondBranch {
                    cond,
                    then,
                    otherwise,
                    ..
                }) => {
                    if let Some(l) = cond.as_reg().and_then(|r| consts.get(&r)) {
                        *cond = Operand::Const(*l);
                    }
                    cond.as_const()
                        .map(|l| if l.is_true() { *then } else { *otherwise })
                }
                _ => None,
            };
            if let Some(target) = folded {
                block.terminator = Some(Terminator::Branch(target));
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionEmitter;
    use crate::ir::IrType;
    use wren_core::{BinaryOp, CmpOp, DType};

    #[test]
    fn test_constant_branch_folds() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::I32)]);
        let p = f.param(0).unwrap();
        let then = f.append_block("then");
        let other = f.append_block("else");
        let c = f
            .compare(
                CmpOp::Lt,
                Operand::Const(Literal::I64(1)),
                Operand::Const(Literal::I64(2)),
            )
            .unwrap();
        f.cond_branch(Operand::Reg(c), then, other, None).unwrap();
        f.set_insert_point(then);
        f.store(p, Operand::Const(Literal::I32(1))).unwrap();
        f.ret();
        f.set_insert_point(other);
        f.store(p, Operand::Const(Literal::I32(2))).unwrap();
        f.ret();
        let (mut func, _, _) = f.finish().unwrap();

        assert!(ConstantFolding.run(&mut func));
        assert_eq!(func.blocks[0].terminator, Some(Terminator::Branch(then)));
        assert!(func.blocks[0].instructions.is_empty());
    }

    #[test]
    fn test_division_by_zero_left_alone() {
        let mut f = FunctionEmitter::new("f", &[IrType::Ptr(DType::I32)]);
        let p = f.param(0).unwrap();
        let q = f
            .binary(
                BinaryOp::Div,
                Operand::Const(Literal::I32(1)),
                Operand::Const(Literal::I32(0)),
            )
            .unwrap();
        f.store(p, Operand::Reg(q)).unwrap();
        let (mut func, _, _) = f.finish().unwrap();
        assert!(!ConstantFolding.run(&mut func));
        assert_eq!(func.instruction_count(), 2);
    }
}
