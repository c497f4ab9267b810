// Standard passes
//
//   ConstantFolding      — evaluate instructions whose operands are all known
//   DeadCodeElimination  — drop side-effect-free instructions nobody reads
//   SimplifyCfg          — remove unreachable blocks, thread empty forwarders,
//                          merge straight-line block chains
//   RemoveDeadFunctions  — drop unexported functions that are never called
//   RemoveUnusedGlobals  — drop globals no function takes the address of
//
// Every pass returns whether it changed anything, so the optimizer can run
// the function pipeline to a fixpoint.

mod cfg;
mod constant_fold;
mod dce;
mod globals;

pub use cfg::SimplifyCfg;
pub use constant_fold::ConstantFolding;
pub use dce::DeadCodeElimination;
pub use globals::{RemoveDeadFunctions, RemoveUnusedGlobals};

use crate::ir::{Function, Reg, Terminator};

/// Registers read anywhere in `function`, terminators included.
pub(crate) fn used_registers(function: &Function) -> std::collections::HashSet<Reg> {
    let mut used = std::collections::HashSet::new();
    for block in &function.blocks {
        for inst in &block.instructions {
            used.extend(inst.uses());
        }
        if let Some(Terminator::CondBranch { cond, .. }) = &block.terminator {
            if let Some(r) = cond.as_reg() {
                used.insert(r);
            }
        }
    }
    used
}
