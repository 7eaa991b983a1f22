use chx_compiler::chxvm::Opcode;
use chx_compiler::gradient::{
    forward_references, generate_backward, generate_backward_to, generate_backward_to_with_order,
    GradientError, GRAD_IN_PREFIX, GRAD_OUT_PREFIX,
};
use chx_compiler::graph::document::GraphDocument;
use chx_compiler::graph::{Graph, ValueKind, ValueType};
use chx_compiler::tensor::Dtype;
use chx_compiler::ops::names;
use chx_compiler::{compile, CompilerConfig};

const ADD_RELU: &str = r#"{
  "name": "add_relu",
  "inputs": [
    {"name": "X", "elem_type": 1, "shape": [2, 3]},
    {"name": "W", "elem_type": 1, "shape": [2, 3]}
  ],
  "outputs": [{"name": "Z", "elem_type": 1, "shape": [2, 3]}],
  "nodes": [
    {"op_type": "Add", "inputs": ["X", "W"], "outputs": ["Y"]},
    {"op_type": "Relu", "inputs": ["Y"], "outputs": ["Z"]}
  ],
  "initializers": [
    {"name": "W", "data_type": 1, "dims": [2, 3], "float_data": [1, 2, 3, 4, 5, 6]}
  ]
}"#;

/// y = Relu(x) * W, with the activation only needed by W's gradient.
const SCALED_ACTIVATION: &str = r#"{
  "name": "scaled",
  "inputs": [
    {"name": "x", "elem_type": 1, "shape": [4]},
    {"name": "W", "elem_type": 1, "shape": [4]},
    {"name": "unused", "elem_type": 1, "shape": [4]}
  ],
  "outputs": [{"name": "y"}],
  "nodes": [
    {"name": "act", "op_type": "Relu", "inputs": ["x"], "outputs": ["h"]},
    {"name": "scale", "op_type": "Mul", "inputs": ["h", "W"], "outputs": ["y"]}
  ],
  "initializers": [
    {"name": "W", "data_type": 1, "dims": [4], "float_data": [1, 2, 3, 4]}
  ]
}"#;

fn load(src: &str) -> Graph {
    Graph::from_document(&GraphDocument::from_json_str(src).unwrap()).unwrap()
}

fn producer_op(graph: &Graph, name: &str) -> String {
    let id = graph.value_by_name(name).unwrap();
    let node = graph.value(id).unwrap().producer().unwrap();
    graph.node(node).unwrap().op_type().to_string()
}

#[test]
fn add_relu_backward_reads_the_forward_output() {
    let (forward, backward) = generate_backward(load(ADD_RELU), &CompilerConfig::default()).unwrap();

    assert_eq!(backward.input_names(), vec!["grad_in@Z", "Z"]);
    assert_eq!(backward.output_names(), vec!["grad_out@W"]);
    assert_eq!(forward.output_names(), vec!["Z"]);

    assert_eq!(producer_op(&backward, "grad_out@W"), names::IDENTITY);
    let out = backward.value_by_name("grad_out@W").unwrap();
    let identity = backward.value(out).unwrap().producer().unwrap();
    let grad = backward.node(identity).unwrap().inputs()[0];
    let relu_grad = backward
        .node(backward.value(grad).unwrap().producer().unwrap())
        .unwrap();
    assert_eq!(relu_grad.op_type(), names::RELU_GRAD);
    let operands: Vec<&str> = relu_grad
        .inputs()
        .iter()
        .map(|&v| backward.value_name(v))
        .collect();
    assert_eq!(operands, vec!["Z", "grad_in@Z"]);
    backward.check_sanity().unwrap();
}

#[test]
fn backward_inputs_name_forward_values_or_seeds() {
    let (forward, backward) =
        generate_backward(load(SCALED_ACTIVATION), &CompilerConfig::default()).unwrap();

    let forward_names: Vec<String> = forward
        .live_values()
        .map(|(_, value)| value.name().to_string())
        .collect();
    for name in backward.input_names() {
        match name.strip_prefix(GRAD_IN_PREFIX) {
            Some(output) => assert!(forward.output_names().contains(&output.to_string())),
            None => assert!(forward_names.contains(&name), "{name}"),
        }
    }
    for name in backward.output_names() {
        let target = name.strip_prefix(GRAD_OUT_PREFIX).unwrap();
        assert!(forward.value_by_name(target).is_some(), "{name}");
    }

    // The activation is retained, so the forward graph now exports it.
    assert_eq!(forward.output_names(), vec!["y", "h"]);
    assert_eq!(
        forward_references(&forward, &backward).get("h"),
        Some(&ValueKind::Output)
    );
}

#[test]
fn recompute_policy_rebuilds_cheap_activations() {
    let (forward, backward) = generate_backward_to_with_order(
        load(SCALED_ACTIVATION),
        "recompute",
        &CompilerConfig::default(),
    )
    .unwrap();

    assert_eq!(forward.output_names(), vec!["y"]);
    assert_eq!(backward.input_names(), vec!["grad_in@y", "x"]);
    assert_eq!(producer_op(&backward, "h"), names::RELU);
    assert_eq!(backward.output_names(), vec!["grad_out@W"]);
}

#[test]
fn configured_policy_applies_when_none_is_requested() {
    let config = CompilerConfig {
        computation_order: "recompute".into(),
        ..CompilerConfig::default()
    };
    let (forward, _) = generate_backward(load(SCALED_ACTIVATION), &config).unwrap();
    assert_eq!(forward.output_names(), vec!["y"]);
}

#[test]
fn unknown_policy_is_an_error() {
    let err = generate_backward_to_with_order(
        load(SCALED_ACTIVATION),
        "sublinear",
        &CompilerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GradientError::UnknownOrderPolicy(name) if name == "sublinear"));
}

#[test]
fn targets_follow_request_order() {
    let (_, backward) = generate_backward_to(
        load(SCALED_ACTIVATION),
        &["W", "x"],
        &CompilerConfig::default(),
    )
    .unwrap();
    assert_eq!(backward.output_names(), vec!["grad_out@W", "grad_out@x"]);
    assert_eq!(producer_op(&backward, "grad_out@x"), names::IDENTITY);
}

#[test]
fn unreachable_target_gets_zeros() {
    let (_, backward) = generate_backward_to(
        load(SCALED_ACTIVATION),
        &["unused"],
        &CompilerConfig::default(),
    )
    .unwrap();
    assert_eq!(backward.output_names(), vec!["grad_out@unused"]);
    let out = backward.value_by_name("grad_out@unused").unwrap();
    let identity = backward.value(out).unwrap().producer().unwrap();
    let zeros = backward.node(identity).unwrap().inputs()[0];
    assert_eq!(producer_op(&backward, backward.value_name(zeros)), names::ZEROS_LIKE);
    assert!(backward.input_names().contains(&"unused".to_string()));
}

#[test]
fn unknown_target_is_reported() {
    let err = generate_backward_to(load(ADD_RELU), &["nope"], &CompilerConfig::default())
        .unwrap_err();
    assert!(matches!(err, GradientError::UnknownTarget(name) if name == "nope"));
}

#[test]
fn operator_without_rule_fails() {
    let src = r#"{
      "name": "floor",
      "inputs": [{"name": "W", "elem_type": 1, "shape": [3]}],
      "outputs": [{"name": "y"}],
      "nodes": [{"name": "round_down", "op_type": "Floor", "inputs": ["W"], "outputs": ["y"]}],
      "initializers": [{"name": "W", "data_type": 1, "dims": [3], "float_data": [0.5, 1.5, 2.5]}]
    }"#;
    let err = generate_backward(load(src), &CompilerConfig::default()).unwrap_err();
    match err {
        GradientError::MissingRule { op_type, node } => {
            assert_eq!(op_type, "Floor");
            assert_eq!(node, "round_down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// loss = ReduceMean(Softmax(Relu(x @ W + b))), with the bias broadcast over rows.
const MLP: &str = r#"{
  "name": "mlp",
  "inputs": [
    {"name": "x", "elem_type": 1, "shape": [2, 3]},
    {"name": "W", "elem_type": 1, "shape": [3, 4]},
    {"name": "b", "elem_type": 1, "shape": [4]}
  ],
  "outputs": [{"name": "loss"}],
  "nodes": [
    {"op_type": "MatMul", "inputs": ["x", "W"], "outputs": ["m"]},
    {"op_type": "Add", "inputs": ["m", "b"], "outputs": ["a"]},
    {"op_type": "Relu", "inputs": ["a"], "outputs": ["h"]},
    {"op_type": "Softmax", "inputs": ["h"], "outputs": ["s"],
     "attributes": [{"name": "axis", "value": {"int": 1}}]},
    {"op_type": "ReduceMean", "inputs": ["s"], "outputs": ["loss"],
     "attributes": [{"name": "keepdims", "value": {"int": 0}}]}
  ],
  "initializers": [
    {"name": "W", "data_type": 1, "dims": [3, 4],
     "float_data": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]},
    {"name": "b", "data_type": 1, "dims": [4], "float_data": [0, 1, 0, 1]}
  ]
}"#;

/// Keeps ReduceMean intact so its own backward rule runs.
fn mlp_config() -> CompilerConfig {
    CompilerConfig {
        simplifier_backend: "chxvm_test".into(),
        ..CompilerConfig::default()
    }
}

fn compiled_pair(forward: &mut Graph, backward: &mut Graph) -> (Vec<Opcode>, Vec<Opcode>) {
    let config = mlp_config();
    let forward = compile(forward, &config).unwrap();
    let backward = compile(backward, &config).unwrap();
    (forward.opcodes(), backward.opcodes())
}

#[test]
fn mlp_backward_retains_activations() {
    let (mut forward, mut backward) =
        generate_backward_to_with_order(load(MLP), "none", &mlp_config()).unwrap();

    assert_eq!(backward.input_names(), vec!["grad_in@loss", "s", "h", "x"]);
    assert_eq!(backward.output_names(), vec!["grad_out@W", "grad_out@b"]);
    assert_eq!(forward.output_names(), vec!["loss", "s", "h"]);
    assert_eq!(producer_op(&backward, "grad_out@W"), names::IDENTITY);

    let out_w = backward.value_by_name("grad_out@W").unwrap();
    assert_eq!(
        backward.value_type(out_w),
        Some(&ValueType::new(Dtype::Float32, &[3, 4]))
    );
    let out_b = backward.value_by_name("grad_out@b").unwrap();
    assert_eq!(
        backward.value_type(out_b),
        Some(&ValueType::new(Dtype::Float32, &[4]))
    );

    let (forward_ops, backward_ops) = compiled_pair(&mut forward, &mut backward);
    assert_eq!(
        forward_ops,
        vec![
            Opcode::MatMul,
            Opcode::Add,
            Opcode::Relu,
            Opcode::Softmax,
            Opcode::ReduceMean
        ]
    );
    for op in [
        Opcode::Expand,
        Opcode::ReduceSum,
        Opcode::ReluGrad,
        Opcode::ReduceSumTo,
        Opcode::Transpose,
        Opcode::MatMul,
    ] {
        assert!(backward_ops.contains(&op), "{op} missing from {backward_ops:?}");
    }
    assert!(!backward_ops.contains(&Opcode::Relu));
}

#[test]
fn mlp_backward_recomputes_elementwise_activations() {
    let (mut forward, mut backward) =
        generate_backward_to_with_order(load(MLP), "recompute", &mlp_config()).unwrap();

    // Softmax and MatMul results are kept; Add and Relu are rebuilt.
    assert_eq!(backward.input_names(), vec!["grad_in@loss", "s", "m", "b", "x"]);
    assert_eq!(backward.output_names(), vec!["grad_out@W", "grad_out@b"]);
    assert_eq!(forward.output_names(), vec!["loss", "s", "m"]);
    assert_eq!(producer_op(&backward, "h"), names::RELU);
    assert_eq!(producer_op(&backward, "a"), names::ADD);

    let (_, backward_ops) = compiled_pair(&mut forward, &mut backward);
    assert!(backward_ops.contains(&Opcode::Relu));
    assert!(backward_ops.contains(&Opcode::ReluGrad));
}

/// y = Reshape(Transpose(Gemm(x, W, transB=1)), [8]).
const GEMM_LAYOUT: &str = r#"{
  "name": "gemm_layout",
  "inputs": [
    {"name": "x", "elem_type": 1, "shape": [2, 3]},
    {"name": "W", "elem_type": 1, "shape": [4, 3]},
    {"name": "target", "elem_type": 7, "shape": [1]}
  ],
  "outputs": [{"name": "y"}],
  "nodes": [
    {"op_type": "Gemm", "inputs": ["x", "W"], "outputs": ["g"],
     "attributes": [{"name": "transB", "value": {"int": 1}}]},
    {"op_type": "Transpose", "inputs": ["g"], "outputs": ["t"],
     "attributes": [{"name": "perm", "value": {"ints": [1, 0]}}]},
    {"op_type": "Reshape", "inputs": ["t", "target"], "outputs": ["y"]}
  ],
  "initializers": [
    {"name": "W", "data_type": 1, "dims": [4, 3],
     "float_data": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]},
    {"name": "target", "data_type": 7, "dims": [1], "int64_data": [8]}
  ]
}"#;

#[test]
fn gemm_transpose_and_reshape_gradients_restore_layouts() {
    let (mut forward, mut backward) =
        generate_backward_to(load(GEMM_LAYOUT), &["W", "x"], &CompilerConfig::default()).unwrap();

    assert_eq!(backward.input_names(), vec!["grad_in@y", "W", "x"]);
    assert_eq!(backward.output_names(), vec!["grad_out@W", "grad_out@x"]);
    for (name, dims) in [("grad_out@W", [4, 3]), ("grad_out@x", [2, 3])] {
        let id = backward.value_by_name(name).unwrap();
        assert_eq!(
            backward.value_type(id),
            Some(&ValueType::new(Dtype::Float32, &dims)),
            "{name}"
        );
    }
    let forward = compile(&mut forward, &CompilerConfig::default()).unwrap();
    assert_eq!(
        forward.opcodes(),
        vec![Opcode::Gemm, Opcode::Transpose, Opcode::Reshape]
    );
    let backward = compile(&mut backward, &CompilerConfig::default()).unwrap();
    let ops = backward.opcodes();
    for op in [Opcode::Reshape, Opcode::Transpose, Opcode::MatMul] {
        assert!(ops.contains(&op), "{op} missing from {ops:?}");
    }
}
