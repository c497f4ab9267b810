use log::{debug, info};

use wren_core::error::{Error, Result};
use wren_core::{functions, MemoryLayout, Storage};
use wren_emit::{
    Argument, Engine, IrContext, IrType, LoopMetadata, Module, ModuleEmitter, Optimizer, OptimizerConfig,
};

use crate::map::{Map, PortSpec};
use crate::model::Feeds;

/// How a map is turned into executable code.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Name of the step function; the reset function is `<name>_reset`.
    pub function_name: String,
    pub optimize: bool,
    pub optimizer: OptimizerConfig,
    pub unroll_loops: bool,
    pub parallel_loops: bool,
    /// Log the final module at debug level.
    pub dump_ir: bool,
    pub refine_iterations: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            function_name: "predict".to_string(),
            optimize: true,
            optimizer: OptimizerConfig::default(),
            unroll_loops: false,
            parallel_loops: false,
            dump_ir: false,
            refine_iterations: 8,
        }
    }
}

impl CompilerOptions {
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    pub fn with_optimize(mut self, on: bool) -> Self {
        self.optimize = on;
        self
    }

    pub fn with_optimizer(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = config;
        self
    }

    pub fn with_unroll_loops(mut self, on: bool) -> Self {
        self.unroll_loops = on;
        self
    }

    pub fn with_parallel_loops(mut self, on: bool) -> Self {
        self.parallel_loops = on;
        self
    }

    pub fn with_dump_ir(mut self, on: bool) -> Self {
        self.dump_ir = on;
        self
    }

    pub fn with_refine_iterations(mut self, n: usize) -> Self {
        self.refine_iterations = n;
        self
    }

    pub fn reset_function_name(&self) -> String {
        format!("{}_reset", self.function_name)
    }
}

// MapCompiler — Map → Module → Engine
//
//   1. refine the map so only primitive nodes remain
//   2. emit the step function: one pointer parameter per map input, then
//      one per map output, in declaration order
//   3. bind the input parameters as feeds and let every node emit itself
//   4. copy each output port's value into its output parameter
//   5. emit the reset function zeroing every state global
//   6. optimize, then load the module into an Engine

pub struct MapCompiler {
    options: CompilerOptions,
}

impl MapCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        MapCompiler { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// The optimized module for `map`.
    pub fn emit_module(&self, map: &Map) -> Result<(Module, Vec<PortSpec>, Vec<PortSpec>)> {
        let map = map.refine(self.options.refine_iterations)?;
        let model = map.model();
        let inputs = map.input_specs()?;
        let outputs = map.output_specs()?;
        let params: Vec<IrType> = inputs
            .iter()
            .chain(&outputs)
            .map(|s| IrType::Ptr(s.dtype))
            .collect();

        let name = &self.options.function_name;
        let mut module = ModuleEmitter::new("wren");
        let mut function = module.begin_function(name, &params);
        {
            let metadata = LoopMetadata {
                unroll: self.options.unroll_loops,
                parallel: self.options.parallel_loops,
            };
            let mut ctx = IrContext::new(&mut function).with_loop_metadata(metadata);
            let mut feeds = Feeds::new();
            for (i, (spec, (_, id))) in inputs.iter().zip(map.inputs()).enumerate() {
                let v = ctx.bind_parameter(i, spec.dtype, MemoryLayout::new(&spec.shape))?;
                feeds.insert(*id, v);
            }
            let values = model.compile(&mut ctx, &feeds)?;
            for (j, (spec, (oname, port))) in outputs.iter().zip(map.outputs()).enumerate() {
                let dst = ctx.bind_parameter(inputs.len() + j, spec.dtype, MemoryLayout::new(&spec.shape))?;
                let src = values
                    .get(port)
                    .ok_or_else(|| Error::invalid_argument(format!("output '{}' was not emitted", oname)))?;
                functions::assign(&mut ctx, &dst, src)?;
            }
        }
        module.end_function(function)?;
        module.emit_reset_function(&self.options.reset_function_name())?;
        let mut ir = module.into_module();

        if self.options.optimize {
            let mut optimizer = Optimizer::new(self.options.optimizer.clone());
            let mut session = optimizer.begin_function_session();
            for f in ir.functions.iter_mut() {
                session.optimize_function(f);
            }
            session.end();
            optimizer.optimize_module(&mut ir);
            debug!("optimizer stats: {:?}", optimizer.stats());
        }
        if self.options.dump_ir {
            debug!("compiled module:\n{}", ir);
        }
        Ok((ir, inputs, outputs))
    }

    pub fn compile(&self, map: &Map) -> Result<CompiledMap> {
        let (module, inputs, outputs) = self.emit_module(map)?;
        info!(
            "compiled map '{}': {} functions, {} globals",
            self.options.function_name,
            module.functions.len(),
            module.globals.len()
        );
        Ok(CompiledMap {
            engine: Engine::new(module)?,
            function: self.options.function_name.clone(),
            reset_function: self.options.reset_function_name(),
            inputs,
            outputs,
        })
    }
}

/// A map lowered to IR and loaded into an executor. State lives in the
/// engine's globals, starts from the nodes' state at compile time, and
/// carries over between calls.
pub struct CompiledMap {
    engine: Engine,
    function: String,
    reset_function: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
}

impl CompiledMap {
    pub fn module(&self) -> &Module {
        self.engine.module()
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    /// One time step through the compiled code.
    pub fn compute(&mut self, data: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        if data.len() != self.inputs.len() {
            return Err(Error::invalid_argument(format!(
                "compiled map takes {} inputs, got {}",
                self.inputs.len(),
                data.len()
            )));
        }
        let mut buffers = Vec::with_capacity(self.inputs.len() + self.outputs.len());
        for (spec, values) in self.inputs.iter().zip(data) {
            if values.len() != spec.size() {
                return Err(Error::SizeMismatch {
                    expected: spec.shape.clone(),
                    got: vec![values.len()],
                });
            }
            buffers.push(Storage::from_f64(spec.dtype, values));
        }
        for spec in &self.outputs {
            buffers.push(Storage::zeros(spec.dtype, spec.size()));
        }
        {
            let mut args: Vec<Argument<'_>> = buffers.iter_mut().map(Argument::Buffer).collect();
            self.engine.call(&self.function, &mut args)?;
        }
        Ok(buffers[self.inputs.len()..]
            .iter()
            .map(Storage::to_f64_vec)
            .collect())
    }

    /// Restore every state global to zero.
    pub fn reset(&mut self) -> Result<()> {
        self.engine.call(&self.reset_function, &mut [])
    }
}
