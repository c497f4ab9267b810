//! Human-readable renderings of a model graph.

use std::fmt::Write;

use crate::model::Model;
use crate::port::OutputPort;

fn shape(port: &OutputPort) -> String {
    let sizes: Vec<String> = port
        .layout()
        .logical_sizes()
        .iter()
        .map(|s| s.to_string())
        .collect();
    format!("{}[{}]", port.dtype(), sizes.join(", "))
}

/// One line per node in topological order:
///
/// ```text
/// n2 = activation [n1.0] -> output: f32[4]
/// ```
pub fn to_text(model: &Model) -> String {
    let mut out = String::new();
    for node in model.nodes() {
        let base = node.base();
        let inputs: Vec<String> = base.inputs().iter().map(|p| p.source().to_string()).collect();
        let outputs: Vec<String> = base
            .outputs()
            .iter()
            .map(|p| format!("{}: {}", p.name(), shape(p)))
            .collect();
        let _ = writeln!(
            out,
            "{} = {} [{}] -> {}",
            base.id(),
            node.kind(),
            inputs.join(", "),
            outputs.join(", ")
        );
    }
    out
}

/// Graphviz rendering; edges are labelled with the consuming input's name.
pub fn to_dot(model: &Model) -> String {
    let mut dot = String::from("digraph model {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box];\n\n");

    for node in model.nodes() {
        let base = node.base();
        let outputs: Vec<String> = base.outputs().iter().map(shape).collect();
        let style = if node.has_state() { ",style=rounded" } else { "" };
        let _ = writeln!(
            dot,
            "  {} [label=\"{}\\n{}\\n{}\"{}];",
            base.id(),
            base.id(),
            node.kind(),
            outputs.join("\\n"),
            style
        );
    }
    dot.push('\n');

    for node in model.nodes() {
        let base = node.base();
        for input in base.inputs() {
            let source = input.source();
            let _ = writeln!(
                dot,
                "  {} -> {} [label=\"{}\"];",
                source.node,
                base.id(),
                input.name()
            );
        }
    }
    dot.push_str("}\n");
    dot
}
