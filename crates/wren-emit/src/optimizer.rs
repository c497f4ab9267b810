use log::{debug, trace};

use crate::ir::{Function, Module};
use crate::passes::{
    ConstantFolding, DeadCodeElimination, RemoveDeadFunctions, RemoveUnusedGlobals, SimplifyCfg,
};

// Optimizer — Function and module pass pipelines
//
// The optimizer owns two pipelines populated once, at construction, with the
// standard sequence enabled in its config:
//
//   function: constant folding → dead-code elimination → simplify CFG
//   module:   remove dead functions → remove unused globals
//
// Function optimization happens inside a session:
//
//     let mut session = optimizer.begin_function_session();
//     for f in &mut module.functions {
//         session.optimize_function(f);
//     }
//     session.end();                       // or just drop it
//     optimizer.optimize_module(&mut module);
//
// The session borrows the optimizer mutably, so function passes cannot run
// outside of one, and a second session cannot be opened while the first is
// alive. A session leaked with `mem::forget` leaves the optimizer marked as
// open; opening another then panics.

/// A transformation of one function. Returns true when it changed anything.
pub trait FunctionPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, function: &mut Function) -> bool;
}

pub trait ModulePass {
    fn name(&self) -> &'static str;
    fn run(&mut self, module: &mut Module) -> bool;
}

/// Which standard passes run, and how long function passes iterate.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub constant_folding: bool,
    pub dead_code_elimination: bool,
    pub simplify_cfg: bool,
    pub dead_functions: bool,
    pub unused_globals: bool,
    /// Maximum rounds of the function pipeline per function.
    pub max_iterations: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            constant_folding: true,
            dead_code_elimination: true,
            simplify_cfg: true,
            dead_functions: true,
            unused_globals: true,
            max_iterations: 8,
        }
    }
}

impl OptimizerConfig {
    /// Config with every standard pass disabled.
    pub fn none() -> Self {
        Self {
            constant_folding: false,
            dead_code_elimination: false,
            simplify_cfg: false,
            dead_functions: false,
            unused_globals: false,
            max_iterations: 1,
        }
    }

    pub fn with_constant_folding(mut self, on: bool) -> Self {
        self.constant_folding = on;
        self
    }

    pub fn with_dead_code_elimination(mut self, on: bool) -> Self {
        self.dead_code_elimination = on;
        self
    }

    pub fn with_simplify_cfg(mut self, on: bool) -> Self {
        self.simplify_cfg = on;
        self
    }

    pub fn with_dead_functions(mut self, on: bool) -> Self {
        self.dead_functions = on;
        self
    }

    pub fn with_unused_globals(mut self, on: bool) -> Self {
        self.unused_globals = on;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }
}

/// Counters reported after optimization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizerStats {
    pub functions_optimized: usize,
    pub function_pass_changes: usize,
    pub module_pass_changes: usize,
}

pub struct Optimizer {
    config: OptimizerConfig,
    function_passes: Vec<Box<dyn FunctionPass>>,
    module_passes: Vec<Box<dyn ModulePass>>,
    session_open: bool,
    stats: OptimizerStats,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let mut optimizer = Optimizer {
            config,
            function_passes: Vec::new(),
            module_passes: Vec::new(),
            session_open: false,
            stats: OptimizerStats::default(),
        };
        optimizer.add_standard_passes();
        optimizer
    }

    fn add_standard_passes(&mut self) {
        if self.config.constant_folding {
            self.function_passes.push(Box::new(ConstantFolding));
        }
        if self.config.dead_code_elimination {
            self.function_passes.push(Box::new(DeadCodeElimination));
        }
        if self.config.simplify_cfg {
            self.function_passes.push(Box::new(SimplifyCfg));
        }
        if self.config.dead_functions {
            self.module_passes.push(Box::new(RemoveDeadFunctions));
        }
        if self.config.unused_globals {
            self.module_passes.push(Box::new(RemoveUnusedGlobals));
        }
        debug!(
            "optimizer: {} function passes, {} module passes",
            self.function_passes.len(),
            self.module_passes.len()
        );
    }

    pub fn add_function_pass(&mut self, pass: Box<dyn FunctionPass>) {
        self.function_passes.push(pass);
    }

    pub fn add_module_pass(&mut self, pass: Box<dyn ModulePass>) {
        self.module_passes.push(pass);
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Open the function-pass session.
    ///
    /// # Panics
    /// When a previous session was never closed.
    pub fn begin_function_session(&mut self) -> FunctionSession<'_> {
        assert!(
            !self.session_open,
            "begin_function_session: a function session is already open"
        );
        self.session_open = true;
        FunctionSession { optimizer: self }
    }

    /// Run the module pipeline once.
    pub fn optimize_module(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for pass in &mut self.module_passes {
            if pass.run(module) {
                trace!("module pass {} changed {}", pass.name(), module.name);
                self.stats.module_pass_changes += 1;
                changed = true;
            }
        }
        changed
    }
}

pub struct FunctionSession<'a> {
    optimizer: &'a mut Optimizer,
}

impl FunctionSession<'_> {
    /// Run the function pipeline until nothing changes or the iteration
    /// limit is reached.
    pub fn optimize_function(&mut self, function: &mut Function) -> bool {
        let opt = &mut *self.optimizer;
        let before = function.instruction_count();
        let mut changed_any = false;
        for round in 0..opt.config.max_iterations {
            let mut changed = false;
            for pass in &mut opt.function_passes {
                if pass.run(function) {
                    trace!("round {}: {} changed {}", round, pass.name(), function.name);
                    opt.stats.function_pass_changes += 1;
                    changed = true;
                }
            }
            changed_any |= changed;
            if !changed {
                break;
            }
        }
        opt.stats.functions_optimized += 1;
        debug!(
            "optimized '{}': {} → {} instructions",
            function.name,
            before,
            function.instruction_count()
        );
        changed_any
    }

    pub fn end(self) {}
}

impl Drop for FunctionSession<'_> {
    fn drop(&mut self) {
        self.optimizer.session_open = false;
    }
}
