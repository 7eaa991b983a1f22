use std::fmt::{self, Write};

use super::{Attribute, Graph, ValueId};

impl Graph {
    /// Deterministic multi-line rendering, used by the dump hooks and in tests.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        let _ = self.fmt_graph(&mut out, 0);
        out
    }

    fn fmt_graph(&self, out: &mut String, indent: usize) -> fmt::Result {
        write_line(out, indent, &format!("graph {} {{", self.name))?;
        for &id in &self.input_values {
            let value = &self.values[id.0 as usize];
            let mut line = format!("input {}: {}", value.name, value.ty);
            if let Some(init) = &value.initializer {
                write!(line, " = initializer {}{:?}", init.dtype(), init.dims())?;
            }
            write_line(out, indent + 1, &line)?;
        }
        for &id in &self.free_values {
            let value = &self.values[id.0 as usize];
            write_line(out, indent + 1, &format!("captured {}", value.name))?;
        }
        let order = self
            .sorted_nodes()
            .unwrap_or_else(|_| self.live_node_ids());
        for id in order {
            let node = &self.nodes[id.0 as usize];
            let mut line = format!(
                "{} = {}({}) -> ({})",
                node.name,
                node.op_type,
                self.join_names(&node.inputs),
                self.join_typed(&node.outputs)
            );
            if let Some(order) = node.order {
                write!(line, " @{order}")?;
            }
            let mut nested = Vec::new();
            if !node.attributes.is_empty() {
                let attrs = node
                    .attributes
                    .iter()
                    .map(|(key, attr)| {
                        if let Attribute::Graph(graph) = attr {
                            nested.push(graph.as_ref());
                        }
                        format!("{key}={attr}")
                    })
                    .collect::<Vec<_>>();
                write!(line, " {{{}}}", attrs.join(", "))?;
            }
            write_line(out, indent + 1, &line)?;
            for graph in nested {
                graph.fmt_graph(out, indent + 2)?;
            }
        }
        for &id in &self.output_values {
            let value = &self.values[id.0 as usize];
            write_line(out, indent + 1, &format!("output {}: {}", value.name, value.ty))?;
        }
        write_line(out, indent, "}")
    }

    fn join_names(&self, ids: &[ValueId]) -> String {
        ids.iter()
            .map(|&id| self.value_name(id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn join_typed(&self, ids: &[ValueId]) -> String {
        ids.iter()
            .map(|&id| {
                let value = &self.values[id.0 as usize];
                format!("{}: {}", value.name, value.ty)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn write_line(out: &mut String, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        out.write_str("  ")?;
    }
    out.write_str(line)?;
    out.write_char('\n')
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}
