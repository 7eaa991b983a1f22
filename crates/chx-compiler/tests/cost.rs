use chx_compiler::cost::{calculate_total_flops, node_flops, simulate_memory_usage, MemoryUsage};
use chx_compiler::graph::document::GraphDocument;
use chx_compiler::graph::{Graph, ParamNaming, ValueType};
use chx_compiler::ops::names;
use chx_compiler::passes::run_default_passes;
use chx_compiler::tensor::Dtype;
use chx_compiler::CompilerConfig;

/// A two-layer perceptron: y = Relu(x @ W1 + b1) @ W2.
const MLP: &str = r#"{
  "name": "mlp",
  "inputs": [
    {"name": "x", "elem_type": 1, "shape": [2, 3]},
    {"name": "W1", "elem_type": 1, "shape": [3, 4]},
    {"name": "b1", "elem_type": 1, "shape": [4]},
    {"name": "W2", "elem_type": 1, "shape": [4, 5]}
  ],
  "outputs": [{"name": "y"}],
  "nodes": [
    {"op_type": "MatMul", "inputs": ["x", "W1"], "outputs": ["h0"]},
    {"op_type": "Add", "inputs": ["h0", "b1"], "outputs": ["h1"]},
    {"op_type": "Relu", "inputs": ["h1"], "outputs": ["h2"]},
    {"op_type": "MatMul", "inputs": ["h2", "W2"], "outputs": ["y"]}
  ],
  "initializers": [
    {"name": "W1", "data_type": 1, "dims": [3, 4],
     "float_data": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]},
    {"name": "b1", "data_type": 1, "dims": [4], "float_data": [0, 0, 0, 0]},
    {"name": "W2", "data_type": 1, "dims": [4, 5],
     "float_data": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]}
  ]
}"#;

fn inferred_mlp() -> Graph {
    let mut graph = Graph::from_document(&GraphDocument::from_json_str(MLP).unwrap()).unwrap();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();
    graph
}

#[test]
fn total_flops_is_the_sum_over_nodes() {
    let graph = inferred_mlp();
    let per_node: i64 = graph
        .live_node_ids()
        .into_iter()
        .map(|id| node_flops(&graph, id))
        .sum();
    assert_eq!(calculate_total_flops(&graph), per_node);
    // 2x4x3 + 8 + 8 + 2x5x4
    assert_eq!(per_node, 24 + 8 + 8 + 40);
}

#[test]
fn gemm_honours_trans_a() {
    let src = r#"{
      "name": "gemm",
      "inputs": [
        {"name": "a", "elem_type": 1, "shape": [3, 2]},
        {"name": "b", "elem_type": 1, "shape": [3, 4]}
      ],
      "outputs": [{"name": "c", "elem_type": 1, "shape": [2, 4]}],
      "nodes": [{"op_type": "Gemm", "inputs": ["a", "b"], "outputs": ["c"],
                 "attributes": [{"name": "transA", "value": {"int": 1}}]}]
    }"#;
    let graph = Graph::from_document(&GraphDocument::from_json_str(src).unwrap()).unwrap();
    assert_eq!(calculate_total_flops(&graph), 2 * 4 * 3);
}

#[test]
fn unsupported_op_counts_zero() {
    let mut graph = Graph::new("mystery");
    let ty = ValueType::new(Dtype::Float32, &[16]);
    let x = graph.add_input_value("x", ty.clone()).unwrap();
    let y = graph.add_output_value("y", ty).unwrap();
    graph.add_node("Mystery", &[x], &[y]).unwrap();
    assert_eq!(calculate_total_flops(&graph), 0);
}

#[test]
fn reshape_and_identity_are_free() {
    let mut graph = Graph::new("free");
    let ty = ValueType::new(Dtype::Float32, &[6]);
    let x = graph.add_input_value("x", ty.clone()).unwrap();
    let y = graph.add_output_value("y", ty).unwrap();
    let id = graph.add_node(names::IDENTITY, &[x], &[y]).unwrap();
    assert_eq!(node_flops(&graph, id), 0);
}

#[test]
fn memory_bounds_hold_for_an_inferred_graph() {
    let graph = inferred_mlp();
    let usage = simulate_memory_usage(&graph, ParamNaming::InitializerOnly).unwrap();
    assert!(usage.peak <= usage.all, "{usage:?}");
    assert!(usage.param <= usage.all, "{usage:?}");

    // W1 (48) + b1 (16) + W2 (80)
    assert_eq!(usage.param, 144);
    // x (24) + params (144) + h0, h1, h2 (32 each) + y (40)
    assert_eq!(usage.all, 24 + 144 + 3 * 32 + 40);
    // Inputs stay resident; at most two activations are live at once.
    assert_eq!(usage.peak, 24 + 144 + 32 + 40);
}

#[test]
fn unknown_sizes_count_as_zero_bytes() {
    let mut graph = Graph::new("unknown");
    let x = graph.add_input_value("x", ValueType::unknown()).unwrap();
    let y = graph.add_output_value("y", ValueType::unknown()).unwrap();
    graph.add_node(names::RELU, &[x], &[y]).unwrap();
    assert_eq!(
        simulate_memory_usage(&graph, ParamNaming::LegacySlashPrefix).unwrap(),
        MemoryUsage::default()
    );
}
