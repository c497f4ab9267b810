use log::{debug, trace};

use wren_core::error::{Error, Result};

use crate::function::{FunctionEmitter, StateGlobal};
use crate::ir::{IrType, Module};

/// Collects finished functions and their globals into one Module.
pub struct ModuleEmitter {
    module: Module,
    states: Vec<StateGlobal>,
}

impl ModuleEmitter {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleEmitter {
            module: Module::new(name),
            states: Vec::new(),
        }
    }

    pub fn begin_function(&self, name: &str, params: &[IrType]) -> FunctionEmitter {
        debug!("module {}: begin function '{}'", self.module.name, name);
        FunctionEmitter::new(name, params)
    }

    /// Finish `function` and merge its globals.
    pub fn end_function(&mut self, function: FunctionEmitter) -> Result<()> {
        let (function, globals, states) = function.finish()?;
        if self.module.function(&function.name).is_some() {
            return Err(Error::msg(format!(
                "function '{}' emitted twice",
                function.name
            )));
        }
        for (name, g) in globals {
            if self.module.globals.contains_key(&name) {
                return Err(Error::msg(format!("global '{}' defined twice", name)));
            }
            self.module.globals.insert(name, g);
        }
        self.states.extend(states);
        trace!("emitted function:\n{}", function);
        debug!(
            "module {}: end function '{}' ({} blocks, {} instructions)",
            self.module.name,
            function.name,
            function.blocks.len(),
            function.instruction_count()
        );
        self.module.functions.push(function);
        Ok(())
    }

    /// State globals registered so far.
    pub fn states(&self) -> &[StateGlobal] {
        &self.states
    }

    /// Emit a parameterless function that restores every state global from
    /// its reset image.
    pub fn emit_reset_function(&mut self, name: &str) -> Result<()> {
        let mut f = FunctionEmitter::new(name, &[]);
        let mut globals = Vec::new();
        for s in &self.states {
            let state = self
                .module
                .globals
                .get(&s.state)
                .cloned()
                .ok_or_else(|| Error::msg(format!("unknown state global '{}'", s.state)))?;
            let init = self
                .module
                .globals
                .get(&s.init)
                .cloned()
                .ok_or_else(|| Error::msg(format!("unknown reset image '{}'", s.init)))?;
            globals.push((state, init, s.bytes));
        }
        for (state, init, _) in &globals {
            f.import_global(&state.name, state.dtype());
            f.import_global(&init.name, init.dtype());
        }
        for (state, init, bytes) in &globals {
            let dst = f.global_addr(&state.name)?;
            let src = f.global_addr(&init.name)?;
            f.mem_move(dst, src, *bytes)?;
        }
        f.ret();
        let (function, _, _) = f.finish()?;
        debug!(
            "module {}: reset function '{}' restores {} state globals",
            self.module.name,
            name,
            globals.len()
        );
        self.module.functions.push(function);
        Ok(())
    }

    pub fn into_module(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::{DType, Storage};

    #[test]
    fn test_reset_function() {
        let mut m = ModuleEmitter::new("m");
        let mut f = m.begin_function("predict", &[]);
        f.state_global("delay", Storage::F32(vec![3.0; 4]));
        m.end_function(f).unwrap();
        m.emit_reset_function("reset").unwrap();
        let module = m.into_module();
        module.verify().unwrap();
        let reset = module.function("reset").unwrap();
        let text = reset.to_string();
        assert!(text.contains("memmove"));
        assert!(text.contains("16 bytes"));
        assert_eq!(module.globals.len(), 2);
        assert!(module.globals.values().any(|g| g.mutable && g.dtype() == DType::F32));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let mut m = ModuleEmitter::new("m");
        let f = m.begin_function("f", &[]);
        m.end_function(f).unwrap();
        let f = m.begin_function("f", &[]);
        assert!(m.end_function(f).is_err());
    }
}
