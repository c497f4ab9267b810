use log::debug;

use wren_core::error::{Error, Result};
use wren_core::functions;
use wren_core::{CmpOp, EmitterContext, Literal, Matrix, MemoryLayout, Scalar, Storage, Value, Vector};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

use super::ActivationFunction;

// Lstm — Long short-term memory cell, one time step per evaluation
//
// Weights stack the four gates in the order input, forget, candidate,
// output, each block `hidden_units` rows tall:
//
//     input_weights  [4h, n]     hidden_weights [4h, h]
//     input_bias     [4h]        hidden_bias    [4h]
//
// Per step, with z = Wx·x + Wh·h + bx + bh:
//
//     i = σ(z_i)   f = σ(z_f)   g = act(z_g)   o = σ(z_o)
//     c ← f·c + i·g
//     h ← o·act(c)
//
// where σ is the recurrent activation (sigmoid by default) and act the
// activation (tanh by default). Output 0 is h, output 1 is c.
//
// An optional second input is a reset trigger. When it was 1 on the
// previous step and is 0 now, h and c are cleared before the step runs.

#[derive(Debug)]
pub struct Lstm {
    base: NodeBase,
    hidden_units: usize,
    input_weights: Vec<f64>,
    hidden_weights: Vec<f64>,
    input_bias: Vec<f64>,
    hidden_bias: Vec<f64>,
    activation: ActivationFunction,
    recurrent_activation: ActivationFunction,
    params: LstmParams,
    hidden: Value,
    cell: Value,
    last_trigger: Value,
}

#[derive(Debug, Clone)]
struct LstmParams {
    wx: Matrix,
    wh: Matrix,
    bx: Vector,
    bh: Vector,
}

/// Everything an [`Lstm`] is built from besides its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmWeights {
    pub hidden_units: usize,
    pub input_weights: Vec<f64>,
    pub hidden_weights: Vec<f64>,
    pub input_bias: Vec<f64>,
    pub hidden_bias: Vec<f64>,
    pub activation: ActivationFunction,
    pub recurrent_activation: ActivationFunction,
}

impl LstmWeights {
    /// Zero biases, tanh / sigmoid activations.
    pub fn new(hidden_units: usize, input_weights: Vec<f64>, hidden_weights: Vec<f64>) -> Self {
        LstmWeights {
            hidden_units,
            input_weights,
            hidden_weights,
            input_bias: vec![0.0; 4 * hidden_units],
            hidden_bias: vec![0.0; 4 * hidden_units],
            activation: ActivationFunction::Tanh,
            recurrent_activation: ActivationFunction::Sigmoid,
        }
    }

    pub fn with_biases(mut self, input_bias: Vec<f64>, hidden_bias: Vec<f64>) -> Self {
        self.input_bias = input_bias;
        self.hidden_bias = hidden_bias;
        self
    }

    pub fn with_activations(mut self, activation: ActivationFunction, recurrent: ActivationFunction) -> Self {
        self.activation = activation;
        self.recurrent_activation = recurrent;
        self
    }
}

impl Lstm {
    pub const KIND: &'static str = "lstm";

    pub fn new(model: &Model, input: PortRef, reset_trigger: Option<PortRef>, weights: LstmWeights) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        let dtype = source.dtype();
        super::require_float(Self::KIND, dtype)?;
        let n = source.size();
        let h = weights.hidden_units;
        if h == 0 {
            return Err(Error::invalid_argument("lstm needs at least one hidden unit"));
        }
        super::check_len("input weights", &weights.input_weights, 4 * h * n)?;
        super::check_len("hidden weights", &weights.hidden_weights, 4 * h * h)?;
        super::check_len("input bias", &weights.input_bias, 4 * h)?;
        super::check_len("hidden bias", &weights.hidden_bias, 4 * h)?;

        let mut inputs = vec![source];
        let mut trigger_dtype = dtype;
        if let Some(t) = reset_trigger {
            let trigger = super::input_from(model, "reset_trigger", t)?;
            if trigger.size() != 1 {
                return Err(Error::SizeMismatch {
                    expected: vec![1],
                    got: trigger.layout().logical_sizes(),
                });
            }
            trigger_dtype = trigger.dtype();
            inputs.push(trigger);
        }

        let params = LstmParams {
            wx: Matrix::from_rows(dtype, 4 * h, n, &weights.input_weights)?,
            wh: Matrix::from_rows(dtype, 4 * h, h, &weights.hidden_weights)?,
            bx: Vector::new(super::parameter(dtype, &weights.input_bias, &[4 * h])?)?,
            bh: Vector::new(super::parameter(dtype, &weights.hidden_bias, &[4 * h])?)?,
        };
        let outputs = vec![
            super::output("output", dtype, &[h]),
            super::output("cell_state", dtype, &[h]),
        ];
        Ok(Lstm {
            base: NodeBase::new(inputs, outputs),
            hidden_units: h,
            input_weights: weights.input_weights,
            hidden_weights: weights.hidden_weights,
            input_bias: weights.input_bias,
            hidden_bias: weights.hidden_bias,
            activation: weights.activation,
            recurrent_activation: weights.recurrent_activation,
            params,
            hidden: Value::allocate(dtype, MemoryLayout::new(&[h])),
            cell: Value::allocate(dtype, MemoryLayout::new(&[h])),
            last_trigger: Value::allocate(trigger_dtype, MemoryLayout::new(&[1])),
        })
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden_units
    }

    pub fn has_reset_trigger(&self) -> bool {
        self.base.inputs().len() > 1
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let h = self.hidden_units;
        let dtype = self.params.wx.dtype();
        // state views are taken up front so emitted addresses dominate every branch
        let hidden = Vector::new(ctx.state("lstm.hidden", &self.hidden)?)?;
        let cell = Vector::new(ctx.state("lstm.cell", &self.cell)?)?;
        let last = if self.has_reset_trigger() {
            Some(Vector::new(ctx.state("lstm.trigger", &self.last_trigger)?)?)
        } else {
            None
        };

        if let Some(last) = last {
            let trigger = Vector::new(functions::flatten(super::bound(inputs, 1, Self::KIND)?)?)?;
            let now = trigger.at(ctx, 0usize)?;
            let before = last.at(ctx, 0usize)?;
            let was_on = before.compare(ctx, CmpOp::Eq, &before.like(1.0))?;
            let now_off = now.compare(ctx, CmpOp::Eq, &now.like(0.0))?;
            let zero = Scalar::constant(Literal::zero(dtype));
            ctx.if_then(was_on.value(), |ctx| {
                ctx.if_then(now_off.value(), |ctx| {
                    hidden.fill(ctx, &zero)?;
                    cell.fill(ctx, &zero)
                })
            })?;
            before.assign(ctx, &now)?;
        }

        let x = Vector::new(functions::flatten(super::bound(inputs, 0, Self::KIND)?)?)?;
        let z = Vector::new(ctx.allocate(dtype, MemoryLayout::new(&[4 * h]))?)?;
        let zh = Vector::new(ctx.allocate(dtype, MemoryLayout::new(&[4 * h]))?)?;
        self.params.wx.gemv(ctx, &x, &z)?;
        self.params.wh.gemv(ctx, &hidden, &zh)?;
        z.add_assign(ctx, &zh)?;
        z.add_assign(ctx, &self.params.bx)?;
        z.add_assign(ctx, &self.params.bh)?;

        let out_h = Vector::new(super::bound(outputs, 0, Self::KIND)?.clone())?;
        let out_c = Vector::new(super::bound(outputs, 1, Self::KIND)?.clone())?;
        ctx.for_range(0, h, 1, |ctx, k| {
            let gate = |ctx: &mut C, g: usize| -> Result<Scalar> {
                let idx = k.add(ctx, &Scalar::from(g * h))?;
                z.at(ctx, idx)
            };
            let zi = gate(ctx, 0)?;
            let zf = gate(ctx, 1)?;
            let zg = gate(ctx, 2)?;
            let zo = gate(ctx, 3)?;
            let i = self.recurrent_activation.apply(ctx, &zi)?;
            let f = self.recurrent_activation.apply(ctx, &zf)?;
            let g = self.activation.apply(ctx, &zg)?;
            let o = self.recurrent_activation.apply(ctx, &zo)?;

            let c_prev = cell.at(ctx, k.clone())?;
            let fc = f.mul(ctx, &c_prev)?;
            let ig = i.mul(ctx, &g)?;
            let c = fc.add(ctx, &ig)?;
            let act_c = self.activation.apply(ctx, &c)?;
            let hv = o.mul(ctx, &act_c)?;

            c_prev.assign(ctx, &c)?;
            hidden.at(ctx, k.clone())?.assign(ctx, &hv)?;
            out_c.at(ctx, k.clone())?.assign(ctx, &c)?;
            out_h.at(ctx, k)?.assign(ctx, &hv)
        })
    }

    fn state_values(&self) -> [&Value; 3] {
        [&self.hidden, &self.cell, &self.last_trigger]
    }
}

impl Clone for Lstm {
    fn clone(&self) -> Self {
        Lstm {
            base: self.base.clone(),
            hidden_units: self.hidden_units,
            input_weights: self.input_weights.clone(),
            hidden_weights: self.hidden_weights.clone(),
            input_bias: self.input_bias.clone(),
            hidden_bias: self.hidden_bias.clone(),
            activation: self.activation,
            recurrent_activation: self.recurrent_activation,
            params: self.params.clone(),
            hidden: self.hidden.duplicate(),
            cell: self.cell.duplicate(),
            last_trigger: self.last_trigger.duplicate(),
        }
    }
}

impl Node for Lstm {
    crate::node_common!(Lstm::KIND);
    crate::dual_emit!();

    fn has_state(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<()> {
        debug!("reset lstm {}", self.base.id());
        for v in self.state_values() {
            v.fill_zero()?;
        }
        Ok(())
    }

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("hidden_units", self.hidden_units)?
            .with("input_weights", &self.input_weights)?
            .with("hidden_weights", &self.hidden_weights)?
            .with("input_bias", &self.input_bias)?
            .with("hidden_bias", &self.hidden_bias)?
            .with("activation", self.activation)?
            .with("recurrent_activation", self.recurrent_activation)
    }

    /// Hidden, cell, last trigger.
    fn write_state(&self) -> Result<Vec<Storage>> {
        self.state_values().iter().map(|v| v.to_storage()).collect()
    }

    fn read_state(&mut self, buffers: &[Storage]) -> Result<()> {
        super::restore_state(Self::KIND, &self.state_values(), buffers)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let h: usize = args.get("hidden_units")?;
    let weights = LstmWeights::new(h, args.get("input_weights")?, args.get("hidden_weights")?)
        .with_biases(
            args.get_or("input_bias", vec![0.0; 4 * h])?,
            args.get_or("hidden_bias", vec![0.0; 4 * h])?,
        )
        .with_activations(
            args.get_or("activation", ActivationFunction::Tanh)?,
            args.get_or("recurrent_activation", ActivationFunction::Sigmoid)?,
        );
    let trigger = args.inputs()?.get(1).copied();
    let node = Lstm::new(model, args.input(0)?, trigger, weights)?;
    model.insert(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Feeds;
    use crate::nodes::Input;
    use crate::registry::NodeRegistry;
    use std::sync::Arc;
    use wren_core::{ComputeContext, DType};

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_single_unit_step() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F64, &[1])).unwrap();
        // gates read x with weights 1, 2, 3, 4; no recurrence
        let weights = LstmWeights::new(1, vec![1.0, 2.0, 3.0, 4.0], vec![0.0; 4]);
        let lstm = model
            .insert(Lstm::new(&model, PortRef::new(input, 0), None, weights).unwrap())
            .unwrap();
        let mut ctx = ComputeContext::new();
        let x = 0.5;
        let feeds = Feeds::from([(input, Value::from_slice(&[x]))]);
        let values = model.compute(&mut ctx, &feeds).unwrap();
        let (i, f, g, o) = (sigmoid(x), sigmoid(2.0 * x), (3.0 * x).tanh(), sigmoid(4.0 * x));
        let c = i * g;
        let expected_h = o * c.tanh();
        let h = values[&PortRef::new(lstm, 0)].to_f64_vec().unwrap()[0];
        let cs = values[&PortRef::new(lstm, 1)].to_f64_vec().unwrap()[0];
        assert!((h - expected_h).abs() < 1e-12);
        assert!((cs - c).abs() < 1e-12);

        // the cell carries over: c' = f·c + i·g
        let values = model.compute(&mut ctx, &feeds).unwrap();
        let cs2 = values[&PortRef::new(lstm, 1)].to_f64_vec().unwrap()[0];
        assert!((cs2 - (f * c + i * g)).abs() < 1e-12);
    }

    #[test]
    fn test_trigger_falling_edge_resets() {
        let mut model = Model::new(Arc::new(NodeRegistry::with_standard_nodes()));
        let input = model.insert(Input::new(DType::F64, &[1])).unwrap();
        let trigger = model.insert(Input::new(DType::F64, &[1])).unwrap();
        let weights = LstmWeights::new(1, vec![1.0; 4], vec![0.5; 4]);
        let lstm = model
            .insert(
                Lstm::new(&model, PortRef::new(input, 0), Some(PortRef::new(trigger, 0)), weights)
                    .unwrap(),
            )
            .unwrap();
        let mut ctx = ComputeContext::new();
        let step = |ctx: &mut ComputeContext, t: f64| {
            let feeds = Feeds::from([
                (input, Value::from_slice(&[1.0f64])),
                (trigger, Value::from_slice(&[t])),
            ]);
            model.compute(ctx, &feeds).unwrap()[&PortRef::new(lstm, 0)]
                .to_f64_vec()
                .unwrap()[0]
        };
        let first = step(&mut ctx, 0.0);
        let second = step(&mut ctx, 1.0);
        assert!((first - second).abs() > 1e-6);
        // 1 → 0: state cleared, so this step matches the very first one
        let third = step(&mut ctx, 0.0);
        assert!((third - first).abs() < 1e-12);
    }
}
