use std::collections::HashSet;

use crate::ir::Module;
use crate::optimizer::ModulePass;

/// Drops functions that are neither exported nor called.
pub struct RemoveDeadFunctions;

impl ModulePass for RemoveDeadFunctions {
    fn name(&self) -> &'static str {
        "remove-dead-functions"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        loop {
            let called: HashSet<String> = module
                .functions
                .iter()
                .flat_map(|f| f.callees())
                .map(str::to_string)
                .collect();
            let before = module.functions.len();
            module
                .functions
                .retain(|f| f.exported || called.contains(&f.name));
            if module.functions.len() == before {
                return changed;
            }
            changed = true;
        }
    }
}

/// Drops globals whose address no function takes.
pub struct RemoveUnusedGlobals;

impl ModulePass for RemoveUnusedGlobals {
    fn name(&self) -> &'static str {
        "remove-unused-globals"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        let referenced: HashSet<String> = module
            .functions
            .iter()
            .flat_map(|f| f.referenced_globals())
            .map(str::to_string)
            .collect();
        let before = module.globals.len();
        module.globals.retain(|name, _| referenced.contains(name));
        module.globals.len() != before
    }
}
