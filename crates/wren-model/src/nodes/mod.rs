//! The standard node catalog.
//!
//! | kind                  | node                 | notes                                   |
//! |-----------------------|----------------------|-----------------------------------------|
//! | `input`               | [`Input`]            | fed by the caller                       |
//! | `constant`            | [`Constant`]         |                                         |
//! | `activation`          | [`Activation`]       | relu, leaky relu, sigmoid, tanh, hard sigmoid |
//! | `binary_operation`    | [`BinaryOperation`]  | add, sub, mul, div, min, max            |
//! | `bias`                | [`Bias`]             | per channel (last dimension)            |
//! | `scaling`             | [`Scaling`]          | per channel (last dimension)            |
//! | `batch_normalization` | [`BatchNormalization`] | refines to scaling + bias             |
//! | `fully_connected`     | [`FullyConnected`]   | matrix × flattened input                |
//! | `convolution`         | [`Convolution`]      | [rows, cols, channels], zero padding    |
//! | `pooling`             | [`Pooling`]          | max / mean                              |
//! | `softmax`             | [`Softmax`]          | over all elements                       |
//! | `region_detection`    | [`RegionDetection`]  | per-anchor box decoding                 |
//! | `dense_layer`         | [`DenseLayer`]       | refines to fully connected + bias + activation |
//! | `delay`               | [`Delay`]            | stateful sliding window                 |
//! | `lstm`                | [`Lstm`]             | stateful, optional reset trigger        |

mod activation;
mod batch_norm;
mod binary;
mod channel;
mod constant;
mod convolution;
mod delay;
mod dense;
mod fully_connected;
mod input;
mod lstm;
mod pooling;
mod region;
mod softmax;

pub use activation::{Activation, ActivationFunction};
pub use batch_norm::{BatchNormalization, EpsilonSummand};
pub use binary::BinaryOperation;
pub use channel::{Bias, Scaling};
pub use constant::Constant;
pub use convolution::Convolution;
pub use delay::Delay;
pub use dense::DenseLayer;
pub use fully_connected::FullyConnected;
pub use input::Input;
pub use lstm::{Lstm, LstmWeights};
pub use pooling::{Pooling, PoolingKind};
pub use region::RegionDetection;
pub use softmax::Softmax;

use wren_core::error::{Error, Result};
use wren_core::{DType, MemoryLayout, Storage, Value};

use crate::model::Model;
use crate::port::{InputPort, OutputPort, PortRef};
use crate::registry::NodeRegistry;

pub fn register_standard_nodes(registry: &mut NodeRegistry) {
    registry.register(Input::KIND, input::create);
    registry.register(Constant::KIND, constant::create);
    registry.register(Activation::KIND, activation::create);
    registry.register(BinaryOperation::KIND, binary::create);
    registry.register(Bias::KIND, channel::create_bias);
    registry.register(Scaling::KIND, channel::create_scaling);
    registry.register(BatchNormalization::KIND, batch_norm::create);
    registry.register(FullyConnected::KIND, fully_connected::create);
    registry.register(Convolution::KIND, convolution::create);
    registry.register(Pooling::KIND, pooling::create);
    registry.register(Softmax::KIND, softmax::create);
    registry.register(RegionDetection::KIND, region::create);
    registry.register(DenseLayer::KIND, dense::create);
    registry.register(Delay::KIND, delay::create);
    registry.register(Lstm::KIND, lstm::create);
}

//  Shared construction helpers

/// Input port named `name` reading from `source`.
pub(crate) fn input_from(model: &Model, name: &str, source: PortRef) -> Result<InputPort> {
    let port = model.output_port(source)?;
    Ok(InputPort::new(name, source, port))
}

/// Compact output port.
pub(crate) fn output(name: &str, dtype: DType, sizes: &[usize]) -> OutputPort {
    OutputPort::new(name, dtype, MemoryLayout::new(sizes))
}

pub(crate) fn check_len(what: &str, data: &[f64], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(Error::SizeMismatch {
            expected: vec![expected],
            got: vec![data.len()],
        });
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(Error::invalid_argument(format!("{} contains non-finite values", what)));
    }
    Ok(())
}

pub(crate) fn require_float(kind: &str, dtype: DType) -> Result<()> {
    if !dtype.is_float() {
        return Err(Error::TypeMismatch {
            expected: "f32 or f64".to_string(),
            got: format!("{} for {}", dtype, kind),
        });
    }
    Ok(())
}

/// Host parameter array of the given shape.
pub(crate) fn parameter(dtype: DType, data: &[f64], sizes: &[usize]) -> Result<Value> {
    Value::from_f64(dtype, data, MemoryLayout::new(sizes))
}

/// Copy archived buffers back into a node's state values, one for one.
pub(crate) fn restore_state(kind: &str, targets: &[&Value], buffers: &[Storage]) -> Result<()> {
    if buffers.len() != targets.len() {
        return Err(Error::Archive(format!(
            "{} node keeps {} state buffers, archive has {}",
            kind,
            targets.len(),
            buffers.len()
        )));
    }
    for (value, data) in targets.iter().zip(buffers) {
        value.copy_from_storage(data)?;
    }
    Ok(())
}

/// Number of channels: the last logical dimension, 1 for rank 0.
pub(crate) fn channels(layout: &MemoryLayout) -> usize {
    layout.logical_sizes().last().copied().unwrap_or(1)
}

/// Input `index` bound by the model, or invalid-argument.
pub(crate) fn bound<'a>(values: &'a [Value], index: usize, kind: &str) -> Result<&'a Value> {
    values.get(index).ok_or_else(|| {
        Error::invalid_argument(format!("{} node is missing value {}", kind, index))
    })
}
