use std::cell::RefCell;

use chx_compiler::backend_config::{list_backend_configs, BackendConfig};
use chx_compiler::graph::document::GraphDocument;
use chx_compiler::graph::{Attribute, Graph, ValueId, ValueType};
use chx_compiler::ops::names;
use chx_compiler::passes::{
    run_default_passes, run_default_passes_with, DeadNodeEliminationPass, GraphPass, PassContext,
    PassError, SubgraphAcceptor, FUSION_SUBGRAPH_ATTR, FUSION_TYPE_ATTR,
};
use chx_compiler::tensor::Dtype;
use chx_compiler::CompilerConfig;

fn ops_of(graph: &Graph) -> Vec<String> {
    graph
        .sorted_nodes()
        .unwrap()
        .into_iter()
        .map(|id| graph.node(id).unwrap().op_type().to_string())
        .collect()
}

/// a, b -> Less, Sub -> Identity -> ReduceMean, plus one dead Neg.
fn decomposable_graph() -> Graph {
    let mut graph = Graph::new("decomposable");
    let vec4 = ValueType::new(Dtype::Float32, &[4]);
    let a = graph.add_input_value("a", vec4.clone()).unwrap();
    let b = graph.add_input_value("b", vec4).unwrap();
    let lt = graph.add_output_value("lt", ValueType::unknown()).unwrap();
    let mean = graph.add_output_value("mean", ValueType::unknown()).unwrap();
    let diff = graph.add_temp_value("diff", ValueType::unknown()).unwrap();
    let same = graph.add_temp_value("same", ValueType::unknown()).unwrap();
    let dead = graph.add_temp_value("dead", ValueType::unknown()).unwrap();

    graph.add_node(names::LESS, &[a, b], &[lt]).unwrap();
    graph.add_node(names::SUB, &[a, b], &[diff]).unwrap();
    graph.add_node(names::IDENTITY, &[diff], &[same]).unwrap();
    let reduce = graph.add_node(names::REDUCE_MEAN, &[same], &[mean]).unwrap();
    graph
        .node_mut(reduce)
        .unwrap()
        .set_attr("keepdims", Attribute::Int(0));
    graph.add_node(names::NEG, &[a], &[dead]).unwrap();
    graph
}

fn unary_chain(ops: &[&str]) -> Graph {
    let mut graph = Graph::new("chain");
    let ty = ValueType::new(Dtype::Float32, &[8]);
    let mut current = graph.add_input_value("x", ty.clone()).unwrap();
    for (index, op) in ops.iter().enumerate() {
        let out = if index + 1 == ops.len() {
            graph.add_output_value("y", ty.clone()).unwrap()
        } else {
            graph.add_temp_value(format!("t{index}"), ValueType::unknown()).unwrap()
        };
        graph.add_node(*op, &[current], &[out]).unwrap();
        current = out;
    }
    graph
}

#[test]
fn chxvm_backend_lists_its_simplifiers() {
    let chxvm = BackendConfig::from_name("chxvm").unwrap();
    assert!(chxvm.has_simplifier("ReplaceLess"));
    assert!(!chxvm.has_simplifier("NOT FOUND"));
    assert!(BackendConfig::from_name("no_such_backend").is_none());

    let test = BackendConfig::from_name("chxvm_test").unwrap();
    assert!(test.has_simplifier("ReplaceLess"));
    assert!(!test.has_simplifier("ReplaceSub"));
    assert_eq!(list_backend_configs(), vec!["chxvm", "chxvm_test"]);
}

#[test]
fn unknown_simplifier_backend_is_rejected() {
    let config = CompilerConfig {
        simplifier_backend: "missing".into(),
        ..CompilerConfig::default()
    };
    let mut graph = unary_chain(&[names::RELU]);
    assert!(matches!(
        run_default_passes(&mut graph, &config),
        Err(PassError::UnknownBackend(name)) if name == "missing"
    ));
}

#[test]
fn default_passes_lower_decomposable_ops() {
    let mut graph = decomposable_graph();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();

    let ops = ops_of(&graph);
    for gone in [names::LESS, names::SUB, names::IDENTITY, names::REDUCE_MEAN] {
        assert!(!ops.iter().any(|op| op == gone), "{gone} survived: {ops:?}");
    }
    assert_eq!(ops.iter().filter(|op| *op == names::NEG).count(), 1, "{ops:?}");
    for expected in [names::GREATER, names::ADD, names::REDUCE_SUM, names::DIV, names::CONSTANT] {
        assert!(ops.iter().any(|op| op == expected), "missing {expected}: {ops:?}");
    }

    // Less(a, b) became Greater(b, a).
    let lt = graph.value_by_name("lt").unwrap();
    let greater = graph.node(graph.value(lt).unwrap().producer().unwrap()).unwrap();
    let operands: Vec<&str> = greater.inputs().iter().map(|&v| graph.value_name(v)).collect();
    assert_eq!(operands, vec!["b", "a"]);

    let mean = graph.value_by_name("mean").unwrap();
    assert_eq!(
        graph.value_type(mean),
        Some(&ValueType::new(Dtype::Float32, &[]))
    );
    assert_eq!(
        graph.value_type(lt),
        Some(&ValueType::new(Dtype::Bool, &[4]))
    );
    graph.check_sanity().unwrap();
}

#[test]
fn default_passes_are_idempotent() {
    let config = CompilerConfig::default();
    let mut once = decomposable_graph();
    run_default_passes(&mut once, &config).unwrap();
    let mut twice = once.clone();
    run_default_passes(&mut twice, &config).unwrap();
    assert_eq!(once, twice, "{}\n---\n{}", once.debug_string(), twice.debug_string());
}

#[test]
fn scheduling_assigns_a_slot_to_every_node() {
    let mut graph = decomposable_graph();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();
    let order = graph.scheduled_order().unwrap();
    let slots: Vec<usize> = order
        .iter()
        .map(|&id| graph.node(id).unwrap().order().unwrap())
        .collect();
    let mut sorted = slots.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), graph.num_live_nodes());
    assert_eq!(slots, sorted);
}

#[test]
fn fusion_collapses_elementwise_chains() {
    let config = CompilerConfig {
        fuse_operations: true,
        ..CompilerConfig::default()
    };
    let mut graph = unary_chain(&[names::RELU, names::NEG, names::EXP]);
    run_default_passes(&mut graph, &config).unwrap();

    assert_eq!(ops_of(&graph), vec![names::FUSION_GROUP]);
    let (_, group) = graph.live_nodes().next().unwrap();
    assert_eq!(
        group.string_attr(FUSION_TYPE_ATTR).unwrap().as_deref(),
        Some("elementwise")
    );
    let body = group.graph_attr(FUSION_SUBGRAPH_ATTR).unwrap().unwrap();
    assert_eq!(ops_of(body), vec![names::RELU, names::NEG, names::EXP]);
    assert_eq!(body.input_names(), vec!["x"]);
    assert_eq!(body.output_names(), vec!["y"]);

    let mut again = graph.clone();
    run_default_passes(&mut again, &config).unwrap();
    assert_eq!(again, graph);
}

struct RejectingBackend {
    seen: RefCell<usize>,
}

impl SubgraphAcceptor for RejectingBackend {
    fn backend_name(&self) -> &str {
        "picky"
    }

    fn accept(&self, candidate: &Graph) -> bool {
        *self.seen.borrow_mut() += candidate.num_live_nodes();
        false
    }
}

#[test]
fn alternative_backend_can_reject_candidates() {
    let config = CompilerConfig {
        fuse_operations: true,
        use_alt_backend: true,
        backend_name: "picky".into(),
        ..CompilerConfig::default()
    };
    let backend = RejectingBackend {
        seen: RefCell::new(0),
    };
    let mut graph = unary_chain(&[names::TANH, names::SIGMOID]);
    let mut cx = PassContext::new(&config).unwrap().with_acceptor(&backend);
    run_default_passes_with(&mut graph, &mut cx).unwrap();
    assert_eq!(*backend.seen.borrow(), 2);
    assert_eq!(ops_of(&graph), vec![names::TANH, names::SIGMOID]);

    let mut missing = unary_chain(&[names::TANH, names::SIGMOID]);
    assert!(matches!(
        run_default_passes(&mut missing, &config),
        Err(PassError::MissingAcceptor(name)) if name == "picky"
    ));
}

#[test]
fn captured_values_become_explicit_inputs() {
    let doc = GraphDocument::from_json_str(
        r#"{
          "name": "branchy",
          "inputs": [
            {"name": "cond", "elem_type": 9, "shape": []},
            {"name": "x", "elem_type": 1, "shape": [3]}
          ],
          "outputs": [{"name": "y"}],
          "nodes": [{
            "name": "branch", "op_type": "If", "inputs": ["cond"], "outputs": ["y"],
            "attributes": [
              {"name": "then_branch", "value": {"graph": {
                "name": "then", "outputs": [{"name": "t"}],
                "nodes": [{"op_type": "Relu", "inputs": ["x"], "outputs": ["t"]}]}}},
              {"name": "else_branch", "value": {"graph": {
                "name": "else", "outputs": [{"name": "e"}],
                "nodes": [{"op_type": "Neg", "inputs": ["x"], "outputs": ["e"]}]}}}
            ]
          }]
        }"#,
    )
    .unwrap();
    let mut graph = Graph::from_document(&doc).unwrap();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();

    let y = graph.value_by_name("y").unwrap();
    let branch = graph.node(graph.value(y).unwrap().producer().unwrap()).unwrap();
    let operands: Vec<&str> = branch.inputs().iter().map(|&v| graph.value_name(v)).collect();
    assert_eq!(operands, vec!["cond", "x"]);
    for (_, _, body) in graph.subgraphs() {
        assert!(body.free_values().is_empty());
        assert_eq!(body.input_names(), vec!["x"]);
    }
    assert_eq!(
        graph.value_type(y),
        Some(&ValueType::new(Dtype::Float32, &[3]))
    );
}

#[test]
fn dump_hook_sees_enabled_stages() {
    let config = CompilerConfig {
        dump_after_inference: true,
        dump_after_scheduling: true,
        ..CompilerConfig::default()
    };
    let stages = RefCell::new(Vec::new());
    let mut graph = unary_chain(&[names::RELU]);
    let mut cx = PassContext::new(&config)
        .unwrap()
        .with_dump_hook(|stage: &str, _: &Graph| stages.borrow_mut().push(stage.to_string()));
    run_default_passes_with(&mut graph, &mut cx).unwrap();
    drop(cx);
    assert_eq!(
        stages.into_inner(),
        vec!["after_inference".to_string(), "after_scheduling".to_string()]
    );
}

#[test]
fn dead_values_do_not_keep_nodes_alive() {
    let mut graph = decomposable_graph();
    let dead: ValueId = graph.value_by_name("dead").unwrap();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();
    assert!(graph.value(dead).is_err());
}

/// `If` whose then-branch reads an intermediate of the parent graph.
const CAPTURES_INTERMEDIATE: &str = r#"{
  "name": "branchy",
  "inputs": [
    {"name": "cond", "elem_type": 9, "shape": []},
    {"name": "x", "elem_type": 1, "shape": [3]}
  ],
  "outputs": [{"name": "y"}],
  "nodes": [
    {"name": "act", "op_type": "Relu", "inputs": ["x"], "outputs": ["h"]},
    {
      "name": "branch", "op_type": "If", "inputs": ["cond"], "outputs": ["y"],
      "attributes": [
        {"name": "then_branch", "value": {"graph": {
          "name": "then", "outputs": [{"name": "t"}],
          "nodes": [{"op_type": "Neg", "inputs": ["h"], "outputs": ["t"]}]}}},
        {"name": "else_branch", "value": {"graph": {
          "name": "else", "outputs": [{"name": "e"}],
          "nodes": [{"op_type": "Neg", "inputs": ["x"], "outputs": ["e"]}]}}}
      ]
    }
  ]
}"#;

#[test]
fn captured_intermediates_survive_dead_node_elimination() {
    let doc = GraphDocument::from_json_str(CAPTURES_INTERMEDIATE).unwrap();
    let mut graph = Graph::from_document(&doc).unwrap();
    run_default_passes(&mut graph, &CompilerConfig::default()).unwrap();

    assert_eq!(ops_of(&graph), vec![names::RELU, names::IF]);
    let y = graph.value_by_name("y").unwrap();
    let branch = graph.node(graph.value(y).unwrap().producer().unwrap()).unwrap();
    let operands: Vec<&str> = branch.inputs().iter().map(|&v| graph.value_name(v)).collect();
    assert_eq!(operands, vec!["cond", "h", "x"]);
    for (_, _, body) in graph.subgraphs() {
        assert_eq!(body.input_names(), vec!["h", "x"]);
    }
    assert_eq!(
        graph.value_type(y),
        Some(&ValueType::new(Dtype::Float32, &[3]))
    );
}

#[test]
fn dead_node_elimination_keeps_implicit_captures() {
    let doc = GraphDocument::from_json_str(CAPTURES_INTERMEDIATE).unwrap();
    let mut graph = Graph::from_document(&doc).unwrap();
    let config = CompilerConfig::default();
    let mut cx = PassContext::new(&config).unwrap();
    let result = DeadNodeEliminationPass.run(&mut graph, &mut cx).unwrap();
    assert!(!result.changed);
    assert_eq!(ops_of(&graph), vec![names::RELU, names::IF]);
}

fn mismatched_add() -> Graph {
    let mut graph = Graph::new("mismatch");
    let a = graph
        .add_input_value("a", ValueType::new(Dtype::Float32, &[2]))
        .unwrap();
    let b = graph
        .add_input_value("b", ValueType::new(Dtype::Float32, &[3]))
        .unwrap();
    let c = graph.add_output_value("c", ValueType::unknown()).unwrap();
    graph.add_node(names::ADD, &[a, b], &[c]).unwrap();
    graph
}

#[test]
fn inference_failures_are_fatal_unless_permissive() {
    let mut strict = mismatched_add();
    let err = run_default_passes(&mut strict, &CompilerConfig::default()).unwrap_err();
    assert!(
        matches!(&err, PassError::Inference { node, op_type, .. } if node == "Add_0" && op_type == names::ADD),
        "{err}"
    );

    let config = CompilerConfig {
        permissive: true,
        ..CompilerConfig::default()
    };
    let mut relaxed = mismatched_add();
    run_default_passes(&mut relaxed, &config).unwrap();
    let c = relaxed.value_by_name("c").unwrap();
    assert_eq!(relaxed.value_type(c), Some(&ValueType::unknown()));
}

#[test]
fn skip_inference_leaves_types_alone() {
    let config = CompilerConfig {
        skip_inference: true,
        ..CompilerConfig::default()
    };
    let mut skipped = unary_chain(&[names::RELU, names::NEG]);
    run_default_passes(&mut skipped, &config).unwrap();
    let t0 = skipped.value_by_name("t0").unwrap();
    assert_eq!(skipped.value_type(t0), Some(&ValueType::unknown()));

    let mut inferred = unary_chain(&[names::RELU, names::NEG]);
    run_default_passes(&mut inferred, &CompilerConfig::default()).unwrap();
    let t0 = inferred.value_by_name("t0").unwrap();
    assert_eq!(
        inferred.value_type(t0),
        Some(&ValueType::new(Dtype::Float32, &[8]))
    );
}

/// x[8] -> Relu -> t -> Neg -> y, with `t` or `y` declared with a stale shape.
fn stale_chain(stale_temp: bool) -> Graph {
    let mut graph = Graph::new("stale");
    let good = ValueType::new(Dtype::Float32, &[8]);
    let stale = ValueType::new(Dtype::Float32, &[3]);
    let x = graph.add_input_value("x", good.clone()).unwrap();
    let (t_ty, y_ty) = if stale_temp { (stale, good) } else { (good, stale) };
    let t = graph.add_temp_value("t", t_ty).unwrap();
    let y = graph.add_output_value("y", y_ty).unwrap();
    graph.add_node(names::RELU, &[x], &[t]).unwrap();
    graph.add_node(names::NEG, &[t], &[y]).unwrap();
    graph
}

#[test]
fn reset_shape_discards_stale_temporaries() {
    let mut graph = stale_chain(true);
    assert!(matches!(
        run_default_passes(&mut graph, &CompilerConfig::default()),
        Err(PassError::Inference { .. })
    ));

    let config = CompilerConfig {
        reset_shape: true,
        ..CompilerConfig::default()
    };
    let mut graph = stale_chain(true);
    run_default_passes(&mut graph, &config).unwrap();
    let t = graph.value_by_name("t").unwrap();
    assert_eq!(graph.value_type(t), Some(&ValueType::new(Dtype::Float32, &[8])));
}

#[test]
fn reset_output_shape_discards_stale_outputs() {
    let mut graph = stale_chain(false);
    assert!(matches!(
        run_default_passes(&mut graph, &CompilerConfig::default()),
        Err(PassError::Inference { .. })
    ));

    // Temporaries alone are not enough.
    let temps_only = CompilerConfig {
        reset_shape: true,
        ..CompilerConfig::default()
    };
    assert!(run_default_passes(&mut stale_chain(false), &temps_only).is_err());

    let config = CompilerConfig {
        reset_output_shape: true,
        ..CompilerConfig::default()
    };
    let mut graph = stale_chain(false);
    run_default_passes(&mut graph, &config).unwrap();
    let y = graph.value_by_name("y").unwrap();
    assert_eq!(graph.value_type(y), Some(&ValueType::new(Dtype::Float32, &[8])));
}
