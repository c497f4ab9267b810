// Integration tests for model construction, refinement, archives and maps
//
// These tests build a small convolutional + recurrent network through the
// public API and check that the graph-level operations preserve what the
// network computes.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wren::archive::{to_dot, to_text};
use wren::prelude::*;
use wren::{Error, Feeds, Storage};

fn registry() -> Arc<NodeRegistry> {
    Arc::new(NodeRegistry::with_standard_nodes())
}

fn random(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn assert_close(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len(), "length mismatch");
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!((g - e).abs() <= tol, "index {}: got {} expected {} (tol {})", i, g, e, tol);
    }
}

fn assert_outputs_close(got: &[Vec<f64>], expected: &[Vec<f64>], tol: f64) {
    assert_eq!(got.len(), expected.len());
    for (g, e) in got.iter().zip(expected) {
        assert_close(g, e, tol);
    }
}

// input [4, 4, 1] → conv 3×3 ×2 → batch norm → relu → max pool 2
//                 → dense 6 (sigmoid) → lstm 2 → delay 2
fn network(rng: &mut StdRng) -> Map {
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F64, &[4, 4, 1])).unwrap();

    let conv = Convolution::new(&model, PortRef::new(x, 0), 2, 3, 1, 1, random(rng, 2 * 9)).unwrap();
    let conv = model.insert(conv).unwrap();
    let bn = BatchNormalization::new(
        &model,
        PortRef::new(conv, 0),
        vec![0.1, -0.1],
        vec![0.5, 2.0],
        1e-5,
        EpsilonSummand::Variance,
    )
    .unwrap();
    let bn = model.insert(bn).unwrap();
    let relu = Activation::new(&model, PortRef::new(bn, 0), ActivationFunction::Relu).unwrap();
    let relu = model.insert(relu).unwrap();
    let pool = Pooling::new(&model, PortRef::new(relu, 0), PoolingKind::Max, 2, 2).unwrap();
    let pool = model.insert(pool).unwrap();
    let dense = DenseLayer::new(
        &model,
        PortRef::new(pool, 0),
        6,
        random(rng, 6 * 8),
        random(rng, 6),
        ActivationFunction::Sigmoid,
    )
    .unwrap();
    let dense = model.insert(dense).unwrap();
    let weights = LstmWeights::new(2, random(rng, 8 * 6), random(rng, 8 * 2))
        .with_biases(random(rng, 8), random(rng, 8));
    let lstm = Lstm::new(&model, PortRef::new(dense, 0), None, weights).unwrap();
    let lstm = model.insert(lstm).unwrap();
    let delay = Delay::new(&model, PortRef::new(lstm, 0), 2).unwrap();
    let delay = model.insert(delay).unwrap();

    Map::new(
        model,
        vec![("image".into(), x)],
        vec![
            ("features".into(), PortRef::new(dense, 0)),
            ("hidden".into(), PortRef::new(lstm, 0)),
            ("delayed".into(), PortRef::new(delay, 0)),
        ],
    )
    .unwrap()
}

#[test]
fn test_archive_round_trip_keeps_state() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut map = network(&mut rng);
    for _ in 0..3 {
        map.compute(&[&random(&mut rng, 16)]).unwrap();
    }
    let json = map.to_json().unwrap();
    let mut restored = Map::from_json(registry(), &json).unwrap();
    assert_eq!(restored.model().len(), map.model().len());

    for _ in 0..3 {
        let x = random(&mut rng, 16);
        let expected = map.compute(&[&x]).unwrap();
        let got = restored.compute(&[&x]).unwrap();
        assert_outputs_close(&got, &expected, 1e-12);
    }
}

#[test]
fn test_restored_map_compiles_with_its_state() {
    let mut rng = StdRng::seed_from_u64(22);
    let mut map = network(&mut rng);
    for _ in 0..2 {
        map.compute(&[&random(&mut rng, 16)]).unwrap();
    }
    let mut restored = Map::from_json(registry(), &map.to_json().unwrap()).unwrap();
    let mut compiled = restored.compile(CompilerOptions::default()).unwrap();
    for _ in 0..3 {
        let x = random(&mut rng, 16);
        let expected = restored.compute(&[&x]).unwrap();
        let got = compiled.compute(&[&x]).unwrap();
        assert_outputs_close(&got, &expected, 1e-9);
    }
}

#[test]
fn test_unknown_kind_in_archive() {
    let mut rng = StdRng::seed_from_u64(23);
    let json = network(&mut rng).to_json().unwrap();
    let broken = json.replace("\"pooling\"", "\"no_such_node\"");
    assert!(matches!(
        Map::from_json(registry(), &broken),
        Err(Error::UnknownNodeKind(kind)) if kind == "no_such_node"
    ));
}

#[test]
fn test_refine_preserves_outputs_and_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(24);
    let mut map = network(&mut rng);
    let mut refined = map.refine(8).unwrap();
    let kinds: Vec<&str> = refined.model().nodes().map(|n| n.kind()).collect();
    assert!(!kinds.contains(&"dense_layer"));
    assert!(!kinds.contains(&"batch_normalization"));
    assert!(kinds.contains(&"fully_connected"));

    let twice = refined.refine(8).unwrap();
    assert_eq!(to_text(twice.model()), to_text(refined.model()));

    for _ in 0..3 {
        let x = random(&mut rng, 16);
        let expected = map.compute(&[&x]).unwrap();
        let got = refined.compute(&[&x]).unwrap();
        assert_outputs_close(&got, &expected, 1e-12);
    }
}

#[test]
fn test_reset_restores_initial_behavior() {
    let mut rng = StdRng::seed_from_u64(25);
    let mut map = network(&mut rng);
    let x = random(&mut rng, 16);
    let first = map.compute(&[&x]).unwrap();
    map.compute(&[&random(&mut rng, 16)]).unwrap();
    map.reset().unwrap();
    assert_outputs_close(&map.compute(&[&x]).unwrap(), &first, 0.0);
}

#[test]
fn test_absent_port_rejected() {
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F32, &[2])).unwrap();
    assert!(matches!(
        Softmax::new(&model, PortRef::new(NodeId(5), 0)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        Softmax::new(&model, PortRef::new(x, 1)),
        Err(Error::InvalidArgument(_))
    ));
    let args = NodeArgs::new().with_inputs(&[PortRef::new(NodeId(9), 0)]).unwrap();
    assert!(matches!(model.add("softmax", &args), Err(Error::InvalidArgument(_))));
    assert_eq!(model.len(), 1);
}

#[test]
fn test_add_by_kind_matches_typed_insert() {
    let mut typed = Model::new(registry());
    let x = typed.insert(Input::new(DType::F64, &[3])).unwrap();
    let node = Activation::new(&typed, PortRef::new(x, 0), ActivationFunction::LeakyRelu { alpha: 0.2 }).unwrap();
    typed.insert(node).unwrap();

    let mut by_kind = Model::new(registry());
    let input_args = NodeArgs::new()
        .with("dtype", DType::F64)
        .unwrap()
        .with("shape", vec![3usize])
        .unwrap();
    let x = by_kind.add("input", &input_args).unwrap();
    let args = NodeArgs::new()
        .with_inputs(&[PortRef::new(x, 0)])
        .unwrap()
        .with("function", ActivationFunction::LeakyRelu { alpha: 0.2 })
        .unwrap();
    by_kind.add("activation", &args).unwrap();

    assert_eq!(to_text(&typed), to_text(&by_kind));
    assert!(by_kind.node_as::<Activation>(NodeId(1)).is_ok());
    assert!(by_kind.node_as::<Softmax>(NodeId(1)).is_err());
}

#[test]
fn test_batch_matches_sequential() {
    let mut rng = StdRng::seed_from_u64(26);
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F64, &[6])).unwrap();
    let dense = DenseLayer::new(
        &model,
        PortRef::new(x, 0),
        4,
        random(&mut rng, 24),
        random(&mut rng, 4),
        ActivationFunction::Tanh,
    )
    .unwrap();
    let dense = model.insert(dense).unwrap();
    let soft = model.insert(Softmax::new(&model, PortRef::new(dense, 0)).unwrap()).unwrap();
    let mut map = Map::new(model, vec![("x".into(), x)], vec![("p".into(), PortRef::new(soft, 0))]).unwrap();

    let batch: Vec<Vec<Vec<f64>>> = (0..32).map(|_| vec![random(&mut rng, 6)]).collect();
    let pool = WorkerPool::new(4).unwrap();
    let parallel = map.compute_batch(&pool, &batch).unwrap();
    for (sample, out) in batch.iter().zip(&parallel) {
        let expected = map.compute(&[&sample[0]]).unwrap();
        assert_outputs_close(out, &expected, 0.0);
        let total: f64 = out[0].iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_graph_dumps() {
    let mut rng = StdRng::seed_from_u64(27);
    let map = network(&mut rng);
    let text = to_text(map.model());
    assert_eq!(text.lines().count(), map.model().len());
    assert!(text.contains("= convolution [n0.0]"));
    let dot = to_dot(map.model());
    assert!(dot.contains("n6 -> n7"));
}

#[test]
fn test_archive_keeps_non_finite_state() {
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::F32, &[3])).unwrap();
    let delay = model.insert(Delay::new(&model, PortRef::new(x, 0), 1).unwrap()).unwrap();
    let mut map = Map::new(model, vec![("x".into(), x)], vec![("y".into(), PortRef::new(delay, 0))]).unwrap();
    map.compute(&[&[f64::INFINITY, f64::NEG_INFINITY, f64::NAN]]).unwrap();

    let json = map.to_json().unwrap();
    assert!(!json.contains("null"));
    let mut restored = Map::from_json(registry(), &json).unwrap();
    let out = restored.compute(&[&[0.0, 0.0, 0.0]]).unwrap();
    assert_eq!(out[0][..2], [f64::INFINITY, f64::NEG_INFINITY]);
    assert!(out[0][2].is_nan());
}

#[test]
fn test_archive_keeps_wide_integers() {
    let big = (1i64 << 53) + 1;
    let mut model = Model::new(registry());
    let x = model.insert(Input::new(DType::I64, &[2])).unwrap();
    let delay = model.insert(Delay::new(&model, PortRef::new(x, 0), 1).unwrap()).unwrap();
    let c = model.insert(Constant::from_storage(Storage::I64(vec![big, -big]), &[2]).unwrap()).unwrap();

    let mut ctx = ComputeContext::new();
    let feed = |v: &[i64]| Feeds::from([(x, Value::from_slice(v))]);
    model.compute(&mut ctx, &feed(&[big, i64::MAX])).unwrap();

    let restored = Model::from_json(registry(), &model.to_json().unwrap()).unwrap();
    let values = restored.compute(&mut ctx, &feed(&[0, 0])).unwrap();
    assert_eq!(values[&PortRef::new(delay, 0)].to_vec::<i64>().unwrap(), vec![big, i64::MAX]);
    assert_eq!(values[&PortRef::new(c, 0)].to_vec::<i64>().unwrap(), vec![big, -big]);
    assert_eq!(
        restored.node_as::<Constant>(c).unwrap().values().unwrap(),
        Storage::I64(vec![big, -big])
    );
}
