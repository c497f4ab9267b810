// Host interpreter vs compiled execution
//
// Every node kind is wrapped in a small map, run step by step on the host
// and through the optimized IR executor, and the outputs compared. Stateful
// nodes are driven over several steps so their state updates are compared
// too.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wren::prelude::*;

const TOL: f64 = 1e-9;

fn registry() -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_standard_nodes())
}

fn random(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn assert_close(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            (g - e).abs() <= tol,
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

/// Run `steps` on a host copy of `map` and on its compiled form.
fn check_agreement_with(map: &Map, steps: &[Vec<Vec<f64>>], options: CompilerOptions) {
    let mut host = map.clone();
    let mut compiled = map.compile(options).unwrap();
    for (t, step) in steps.iter().enumerate() {
        let refs: Vec<&[f64]> = step.iter().map(Vec::as_slice).collect();
        let expected = host.compute(&refs).unwrap();
        let got = compiled.compute(&refs).unwrap();
        assert_eq!(got.len(), expected.len(), "step {}", t);
        for (g, e) in got.iter().zip(&expected) {
            assert_close(g, e, TOL);
        }
    }
}

fn check_agreement(map: &Map, steps: &[Vec<Vec<f64>>]) {
    check_agreement_with(map, steps, CompilerOptions::default());
}

fn steps(rng: &mut StdRng, sizes: &[usize], count: usize) -> Vec<Vec<Vec<f64>>> {
    (0..count)
        .map(|_| sizes.iter().map(|&n| random(rng, n)).collect())
        .collect()
}

/// A map with one F64 input of `shape` feeding the node `build` inserts.
fn map_of(
    shape: &[usize],
    build: impl FnOnce(&mut Model, PortRef) -> Result<NodeId>,
) -> Map {
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F64, shape)).unwrap();
    let y = build(&mut model, PortRef::new(x, 0)).unwrap();
    Map::new(model, vec![("x".into(), x)], vec![("y".into(), PortRef::new(y, 0))]).unwrap()
}

#[test]
fn test_activations_agree() {
    let mut rng = StdRng::seed_from_u64(1);
    let functions = [
        ActivationFunction::Relu,
        ActivationFunction::LeakyRelu { alpha: 0.1 },
        ActivationFunction::LeakyRelu { alpha: 2.0 },
        ActivationFunction::Sigmoid,
        ActivationFunction::Tanh,
        ActivationFunction::HardSigmoid,
    ];
    for function in functions {
        let map = map_of(&[6], |m, x| {
            let node = Activation::new(m, x, function)?;
            m.insert(node)
        });
        check_agreement(&map, &steps(&mut rng, &[6], 3));
    }
}

#[test]
fn test_binary_operations_agree() {
    let mut rng = StdRng::seed_from_u64(2);
    for op in [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Min,
        BinaryOp::Max,
    ] {
        let mut model = Model::new(registry());
        let a = model.insert(Input::new(DType::F64, &[5])).unwrap();
        let b = model.insert(Input::new(DType::F64, &[5])).unwrap();
        let node = BinaryOperation::new(&model, PortRef::new(a, 0), PortRef::new(b, 0), op).unwrap();
        let y = model.insert(node).unwrap();
        let map = Map::new(
            model,
            vec![("a".into(), a), ("b".into(), b)],
            vec![("y".into(), PortRef::new(y, 0))],
        )
        .unwrap();
        // keep divisors away from zero
        let data: Vec<Vec<Vec<f64>>> = (0..3)
            .map(|_| {
                let lhs = random(&mut rng, 5);
                let rhs = (0..5).map(|_| rng.gen_range(0.5..1.5)).collect();
                vec![lhs, rhs]
            })
            .collect();
        check_agreement(&map, &data);
    }
}

#[test]
fn test_constant_operand_agrees() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F64, &[3])).unwrap();
    let c = model
        .insert(Constant::new(DType::F64, vec![0.5, -1.0, 2.0], &[3]).unwrap())
        .unwrap();
    let node = BinaryOperation::new(&model, PortRef::new(x, 0), PortRef::new(c, 0), BinaryOp::Mul).unwrap();
    let y = model.insert(node).unwrap();
    let map = Map::new(model, vec![("x".into(), x)], vec![("y".into(), PortRef::new(y, 0))]).unwrap();
    check_agreement(&map, &steps(&mut rng, &[3], 2));
}

#[test]
fn test_channel_nodes_agree() {
    let mut rng = StdRng::seed_from_u64(4);
    let bias = map_of(&[2, 3], |m, x| {
        let node = Bias::new(m, x, vec![0.1, -0.2, 0.3])?;
        m.insert(node)
    });
    check_agreement(&bias, &steps(&mut rng, &[6], 2));

    let scaling = map_of(&[2, 3], |m, x| {
        let node = Scaling::new(m, x, vec![2.0, -1.0, 0.5])?;
        m.insert(node)
    });
    check_agreement(&scaling, &steps(&mut rng, &[6], 2));
}

#[test]
fn test_batch_normalization_agrees() {
    let mut rng = StdRng::seed_from_u64(5);
    for summand in [EpsilonSummand::Variance, EpsilonSummand::SqrtVariance] {
        let map = map_of(&[2, 3], |m, x| {
            let node = BatchNormalization::new(m, x, vec![0.1, 0.2, -0.3], vec![1.0, 0.25, 4.0], 1e-3, summand)?;
            m.insert(node)
        });
        check_agreement(&map, &steps(&mut rng, &[6], 2));
    }
}

#[test]
fn test_fully_connected_and_dense_agree() {
    let mut rng = StdRng::seed_from_u64(6);
    let weights = random(&mut rng, 4 * 6);
    let fc = map_of(&[2, 3], |m, x| {
        let node = FullyConnected::new(m, x, 4, weights.clone())?;
        m.insert(node)
    });
    check_agreement(&fc, &steps(&mut rng, &[6], 2));

    let weights = random(&mut rng, 3 * 5);
    let bias = random(&mut rng, 3);
    let dense = map_of(&[5], |m, x| {
        let node = DenseLayer::new(m, x, 3, weights, bias, ActivationFunction::Tanh)?;
        m.insert(node)
    });
    check_agreement(&dense, &steps(&mut rng, &[5], 2));
}

#[test]
fn test_convolution_agrees() {
    let mut rng = StdRng::seed_from_u64(7);
    let weights = random(&mut rng, 3 * 3 * 3 * 2);
    let padded = map_of(&[4, 4, 2], |m, x| {
        let node = Convolution::new(m, x, 3, 3, 1, 1, weights)?;
        m.insert(node)
    });
    check_agreement(&padded, &steps(&mut rng, &[32], 2));

    let weights = random(&mut rng, 2 * 2 * 1);
    let strided = map_of(&[5, 5, 1], |m, x| {
        let node = Convolution::new(m, x, 1, 2, 2, 0, weights)?;
        m.insert(node)
    });
    check_agreement(&strided, &steps(&mut rng, &[25], 2));
}

#[test]
fn test_pooling_agrees() {
    let mut rng = StdRng::seed_from_u64(8);
    for kind in [PoolingKind::Max, PoolingKind::Mean] {
        let tiled = map_of(&[4, 4, 2], |m, x| {
            let node = Pooling::new(m, x, kind, 2, 2)?;
            m.insert(node)
        });
        check_agreement(&tiled, &steps(&mut rng, &[32], 2));

        let overlapping = map_of(&[5, 4, 1], |m, x| {
            let node = Pooling::new(m, x, kind, 3, 1)?;
            m.insert(node)
        });
        check_agreement(&overlapping, &steps(&mut rng, &[20], 2));
    }
}

#[test]
fn test_softmax_and_region_agree() {
    let mut rng = StdRng::seed_from_u64(9);
    let softmax = map_of(&[7], |m, x| {
        let node = Softmax::new(m, x)?;
        m.insert(node)
    });
    check_agreement(&softmax, &steps(&mut rng, &[7], 2));

    let region = map_of(&[2, 2, 16], |m, x| {
        let node = RegionDetection::new(m, x, 2, 3)?;
        m.insert(node)
    });
    check_agreement(&region, &steps(&mut rng, &[64], 2));
}

#[test]
fn test_delay_agrees_over_time() {
    let mut rng = StdRng::seed_from_u64(10);
    let map = map_of(&[2], |m, x| {
        let node = Delay::new(m, x, 3)?;
        m.insert(node)
    });
    check_agreement(&map, &steps(&mut rng, &[2], 6));
}

fn lstm_map(rng: &mut StdRng, with_trigger: bool) -> Map {
    let (n, h) = (3, 2);
    let weights = LstmWeights::new(h, random(rng, 4 * h * n), random(rng, 4 * h * h))
        .with_biases(random(rng, 4 * h), random(rng, 4 * h));
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F64, &[n])).unwrap();
    let mut inputs = vec![("x".to_string(), x)];
    let trigger = if with_trigger {
        let t = model.insert(Input::new(DType::F64, &[1])).unwrap();
        inputs.push(("reset".to_string(), t));
        Some(PortRef::new(t, 0))
    } else {
        None
    };
    let node = Lstm::new(&model, PortRef::new(x, 0), trigger, weights).unwrap();
    let y = model.insert(node).unwrap();
    Map::new(
        model,
        inputs,
        vec![
            ("h".into(), PortRef::new(y, 0)),
            ("c".into(), PortRef::new(y, 1)),
        ],
    )
    .unwrap()
}

#[test]
fn test_lstm_agrees_over_time() {
    let mut rng = StdRng::seed_from_u64(11);
    let map = lstm_map(&mut rng, false);
    check_agreement(&map, &steps(&mut rng, &[3], 5));
}

#[test]
fn test_lstm_trigger_agrees() {
    let mut rng = StdRng::seed_from_u64(12);
    let map = lstm_map(&mut rng, true);
    let data: Vec<Vec<Vec<f64>>> = [1.0, 1.0, 0.0, 0.0, 1.0, 0.0]
        .iter()
        .map(|&t| vec![random(&mut rng, 3), vec![t]])
        .collect();
    check_agreement(&map, &data);
}

#[test]
fn test_loop_hints_do_not_change_results() {
    let mut rng = StdRng::seed_from_u64(13);
    let weights = random(&mut rng, 2 * 3 * 3 * 1);
    let map = map_of(&[4, 4, 1], |m, x| {
        let node = Convolution::new(m, x, 2, 3, 1, 1, weights)?;
        m.insert(node)
    });
    let data = steps(&mut rng, &[16], 2);
    check_agreement_with(
        &map,
        &data,
        CompilerOptions::default().with_unroll_loops(true).with_parallel_loops(true),
    );
    check_agreement_with(&map, &data, CompilerOptions::default().with_optimize(false));
}

#[test]
fn test_compiled_reset_matches_host_reset() {
    let mut rng = StdRng::seed_from_u64(14);
    let mut host = lstm_map(&mut rng, false);
    let mut compiled = host.compile(CompilerOptions::default()).unwrap();
    let data = steps(&mut rng, &[3], 3);
    for step in &data {
        host.compute(&[&step[0]]).unwrap();
        compiled.compute(&[&step[0]]).unwrap();
    }
    host.reset().unwrap();
    compiled.reset().unwrap();
    let expected = host.compute(&[&data[0][0]]).unwrap();
    let got = compiled.compute(&[&data[0][0]]).unwrap();
    for (g, e) in got.iter().zip(&expected) {
        assert_close(g, e, TOL);
    }
}

#[test]
fn test_compiled_state_starts_from_host_state() {
    let mut rng = StdRng::seed_from_u64(15);
    let mut host = map_of(&[2], |m, x| {
        let node = Delay::new(m, x, 2)?;
        m.insert(node)
    });
    host.compute(&[&[1.0, 2.0]]).unwrap();
    host.compute(&[&[3.0, 4.0]]).unwrap();
    let mut compiled = host.compile(CompilerOptions::default()).unwrap();
    let next = random(&mut rng, 2);
    let expected = host.compute(&[&next]).unwrap();
    assert_eq!(expected, vec![vec![1.0, 2.0]]);
    assert_close(&compiled.compute(&[&next]).unwrap()[0], &expected[0], TOL);
}
