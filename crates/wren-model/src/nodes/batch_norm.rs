use serde::{Deserialize, Serialize};

use wren_core::error::{Error, Result};
use wren_core::functions::{element, for_each};
use wren_core::{EmitterContext, Scalar, Value};

use crate::args::NodeArgs;
use crate::model::Model;
use crate::node::{Node, NodeBase};
use crate::port::{NodeId, PortRef};
use crate::transformer::ModelTransformer;

use super::{Bias, Scaling};

/// Where epsilon enters the denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpsilonSummand {
    /// `sqrt(variance + epsilon)`
    Variance,
    /// `sqrt(variance) + epsilon`
    SqrtVariance,
}

/// `output[.., c] = (input[.., c] - mean[c]) / denominator[c]`.
///
/// Refines into a [`Scaling`] by `1 / denominator` followed by a [`Bias`]
/// of `-mean / denominator`.
#[derive(Debug, Clone)]
pub struct BatchNormalization {
    base: NodeBase,
    mean: Vec<f64>,
    variance: Vec<f64>,
    epsilon: f64,
    summand: EpsilonSummand,
    mean_param: Value,
    inv_std: Value,
}

impl BatchNormalization {
    pub const KIND: &'static str = "batch_normalization";

    pub fn new(
        model: &Model,
        input: PortRef,
        mean: Vec<f64>,
        variance: Vec<f64>,
        epsilon: f64,
        summand: EpsilonSummand,
    ) -> Result<Self> {
        let source = super::input_from(model, "input", input)?;
        super::require_float(Self::KIND, source.dtype())?;
        let n = super::channels(source.layout());
        super::check_len("mean", &mean, n)?;
        super::check_len("variance", &variance, n)?;
        if variance.iter().any(|v| *v < 0.0) || epsilon < 0.0 {
            return Err(Error::invalid_argument(
                "variance and epsilon must be non-negative",
            ));
        }
        let dtype = source.dtype();
        let out = super::output("output", dtype, &source.layout().logical_sizes());
        let mut node = BatchNormalization {
            base: NodeBase::new(vec![source], vec![out]),
            mean,
            variance,
            epsilon,
            summand,
            mean_param: Value::empty(),
            inv_std: Value::empty(),
        };
        node.mean_param = super::parameter(dtype, &node.mean, &[n])?;
        node.inv_std = super::parameter(dtype, &node.scale(), &[n])?;
        Ok(node)
    }

    fn denominator(&self, variance: f64) -> f64 {
        match self.summand {
            EpsilonSummand::Variance => (variance + self.epsilon).sqrt(),
            EpsilonSummand::SqrtVariance => variance.sqrt() + self.epsilon,
        }
    }

    /// Per-channel `1 / denominator`.
    pub fn scale(&self) -> Vec<f64> {
        self.variance.iter().map(|v| 1.0 / self.denominator(*v)).collect()
    }

    fn emit<C: EmitterContext>(&self, ctx: &mut C, inputs: &[Value], outputs: &[Value]) -> Result<()> {
        let input = super::bound(inputs, 0, Self::KIND)?;
        let output = super::bound(outputs, 0, Self::KIND)?;
        let layout = output.layout()?.clone();
        for_each(ctx, &layout, |ctx, idx| {
            let c = idx.last().cloned().unwrap_or_else(|| Scalar::from(0usize));
            let m = element(ctx, &self.mean_param, &[c.clone()])?;
            let s = element(ctx, &self.inv_std, &[c])?;
            let y = element(ctx, input, idx)?.sub(ctx, &m)?.mul(ctx, &s)?;
            element(ctx, output, idx)?.assign(ctx, &y)
        })
    }
}

impl Node for BatchNormalization {
    crate::node_common!(BatchNormalization::KIND);
    crate::dual_emit!();

    fn refine(&self, transformer: &mut ModelTransformer) -> Result<bool> {
        let source = transformer.corresponding_port(self.base.inputs()[0].source())?;
        let scale = self.scale();
        let shift: Vec<f64> = self.mean.iter().zip(&scale).map(|(m, s)| -m * s).collect();
        let scaled = {
            let node = Scaling::new(transformer.target(), source, scale)?;
            transformer.add_node(node)?
        };
        let biased = {
            let node = Bias::new(transformer.target(), PortRef::new(scaled, 0), shift)?;
            transformer.add_node(node)?
        };
        transformer.map_output(self.base.output_ref(0), PortRef::new(biased, 0));
        Ok(true)
    }

    fn write_fields(&self) -> Result<NodeArgs> {
        NodeArgs::new()
            .with("mean", &self.mean)?
            .with("variance", &self.variance)?
            .with("epsilon", self.epsilon)?
            .with("epsilon_summand", self.summand)
    }
}

pub(crate) fn create(model: &mut Model, args: &NodeArgs) -> Result<NodeId> {
    let node = BatchNormalization::new(
        model,
        args.input(0)?,
        args.get("mean")?,
        args.get("variance")?,
        args.get_or("epsilon", 1e-5)?,
        args.get_or("epsilon_summand", EpsilonSummand::Variance)?,
    )?;
    model.insert(node)
}
