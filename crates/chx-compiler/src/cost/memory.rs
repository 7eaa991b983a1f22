use std::collections::HashMap;

use crate::graph::{Graph, GraphError, ParamNaming, ValueId};

/// Byte totals from one liveness walk over a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Largest number of bytes live at once.
    pub peak: u64,
    /// Bytes of every value the graph touches, as if nothing were freed.
    pub all: u64,
    /// Bytes held by parameters.
    pub param: u64,
}

/// Simulates buffer lifetimes over the scheduled order.
///
/// Graph inputs are live for the whole run. A node output becomes live when
/// its producer runs and is released after its last consumer unless it is a
/// graph output. Values without a static size count as zero bytes.
pub fn simulate_memory_usage(graph: &Graph, naming: ParamNaming) -> Result<MemoryUsage, GraphError> {
    let order = graph.scheduled_order()?;
    let size = |value: ValueId| -> u64 {
        graph
            .value_type(value)
            .and_then(|ty| ty.nbytes())
            .unwrap_or(0)
    };

    let mut last_use: HashMap<ValueId, usize> = HashMap::new();
    for (step, &id) in order.iter().enumerate() {
        for &input in graph.node(id)?.inputs() {
            last_use.insert(input, step);
        }
    }

    let mut usage = MemoryUsage::default();
    let mut live = 0u64;
    for &input in graph.input_values() {
        let bytes = size(input);
        live = live.saturating_add(bytes);
        usage.all = usage.all.saturating_add(bytes);
        if graph.is_param(input, naming) {
            usage.param = usage.param.saturating_add(bytes);
        }
    }
    usage.peak = live;

    for (step, &id) in order.iter().enumerate() {
        let node = graph.node(id)?;
        for &out in node.outputs() {
            let bytes = size(out);
            live = live.saturating_add(bytes);
            usage.all = usage.all.saturating_add(bytes);
        }
        usage.peak = usage.peak.max(live);

        // Unread outputs die right away; everything else at its last reader.
        let mut released: Vec<ValueId> = node
            .inputs()
            .iter()
            .chain(node.outputs())
            .copied()
            .filter(|&v| !graph.is_graph_output(v) && produced(graph, v))
            .filter(|v| last_use.get(v).map_or(true, |&last| last == step))
            .collect();
        released.sort();
        released.dedup();
        for value in released {
            live = live.saturating_sub(size(value));
        }
    }

    tracing::debug!(
        graph = graph.name(),
        peak = usage.peak,
        all = usage.all,
        param = usage.param,
        "simulated memory usage"
    );
    Ok(usage)
}

fn produced(graph: &Graph, value: ValueId) -> bool {
    graph
        .value(value)
        .map_or(false, |value| value.producer().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ValueType;
    use crate::ops::names;
    use crate::tensor::Dtype;

    #[test]
    fn intermediate_is_released_after_last_reader() {
        let mut graph = Graph::new("chain");
        let ty = ValueType::new(Dtype::Float32, &[4]);
        let x = graph.add_input_value("x", ty.clone()).unwrap();
        let a = graph.add_temp_value("a", ty.clone()).unwrap();
        let b = graph.add_temp_value("b", ty.clone()).unwrap();
        let y = graph.add_output_value("y", ty).unwrap();
        graph.add_node(names::RELU, &[x], &[a]).unwrap();
        graph.add_node(names::NEG, &[a], &[b]).unwrap();
        graph.add_node(names::EXP, &[b], &[y]).unwrap();

        let usage = simulate_memory_usage(&graph, ParamNaming::InitializerOnly).unwrap();
        assert_eq!(usage.all, 64);
        // x plus two 16-byte values at any time.
        assert_eq!(usage.peak, 48);
        assert_eq!(usage.param, 0);
    }
}
