use serde::{Deserialize, Serialize};

use wren_core::error::Result;
use wren_core::functions::{element, for_each};
use wren_core::{EmitterContext, Scalar, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};

/// Pointwise nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationFunction {
    Relu,
    /// `x` for positive inputs, `alpha · x` otherwise.
    LeakyRelu { alpha: f64 },
    Sigmoid,
    Tanh,
    /// Piecewise-linear sigmoid: `clamp(0.2 x + 0.5, 0, 1)`.
    HardSigmoid,
}

impl ActivationFunction {
    pub fn apply<C: EmitterContext>(&self, ctx: &mut C, x: &Scalar) -> Result<Scalar> {
        match *self {
            ActivationFunction::Relu => x.max(ctx, &x.like(0.0)),
            ActivationFunction::LeakyRelu { alpha } => {
                // max(x, a·x) is the leaky form for a ≤ 1, min(x, a·x) for a > 1
                let ax = x.mul(ctx, &x.like(alpha))?;
                if alpha <= 1.0 {
                    x.max(ctx, &ax)
                } else {
                    x.min(ctx, &ax)
                }
            }
            ActivationFunction::Sigmoid => sigmoid(ctx, x),
            ActivationFunction::Tanh => x.tanh(ctx),
            ActivationFunction::HardSigmoid => {
                let y = x.mul(ctx, &x.like(0.2))?.add(ctx, &x.like(0.5))?;
                y.max(ctx, &x.like(0.0))?.min(ctx, &x.like(1.0))
            }
        }
    }

    /// The same function on an f64, for reference values.
    pub fn eval(&self, x: f64) -> f64 {
        match *self {
            ActivationFunction::Relu => x.max(0.0),
            ActivationFunction::LeakyRelu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            ActivationFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
        }
    }
}

/// `1 / (1 + exp(-x))`.
pub fn sigmoid<C: EmitterContext>(ctx: &mut C, x: &Scalar) -> Result<Scalar> {
    let e = x.neg(ctx)?.exp(ctx)?;
    let one = x.like(1.0);
    let d = one.add(ctx, &e)?;
    one.div(ctx, &d)
}

#[derive(Debug, Clone)]
pub struct Activation {
    base: NodeBase,
    function: ActivationFunction,
}

impl Activation {
    pub const KIND: &'static str = "activation";

    pub fn new(model: &Model, input: PortRef, function: ActivationFunction) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let out = super::output("output", source.dtype(), &source.layout().logical_sizes());
        Ok(Activation {
            base: NodeBase::new(vec![source], vec![out]),
            function,
        })
    }

    pub fn function(&self) -> ActivationFunction {
        self.function
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let input = super::bound(inputs, 0, Self::KIND)?;
        let output = super::bound(outputs, 0, Self::KIND)?;
        let layout = output.layout()?.clone();
        for_each(ctx, &layout, |ctx, idx| {
            let x = element(ctx, input, idx)?;
            let y = self.function.apply(ctx, &x)?;
            element(ctx, output, idx)?.assign(ctx, &y)
        })
    }
}

impl Node for Activation {
    crate::node_common!(Activation::KIND);
    crate::dual_emit!();

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new().with("function", self.function)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = Activation::new(model, args.input(0)?, args.get("function")?)?;
    model.insert(node)
}
