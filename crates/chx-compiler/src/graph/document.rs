//! Interchange graph documents and their conversion to and from [`Graph`].
//!
//! The document mirrors the ONNX `GraphProto` layout closely enough that an
//! exporter can map onto it field by field. Nested graphs (branch and loop
//! bodies) may read names they never declare; those become the nested
//! graph's captured values.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Attribute, Dimension, Graph, GraphError, ValueId, ValueKind, ValueType};
use crate::tensor::{Dtype, Tensor, TensorError, TensorRecord};

/// Serialized graph in interchange form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDocument {
    pub name: String,
    pub inputs: Vec<ValueInfoDoc>,
    pub outputs: Vec<ValueInfoDoc>,
    pub value_info: Vec<ValueInfoDoc>,
    pub nodes: Vec<NodeDoc>,
    pub initializers: Vec<TensorRecord>,
    pub doc_string: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueInfoDoc {
    pub name: String,
    /// ONNX element type tag; `0` or absent means unknown.
    pub elem_type: i32,
    pub shape: Option<Vec<DimDoc>>,
    pub doc_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimDoc {
    Value(i64),
    Param(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDoc {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Vec<AttributeDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDoc {
    pub name: String,
    pub value: AttributeValueDoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueDoc {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strings(Vec<String>),
    Tensor(TensorRecord),
    Graph(Box<GraphDocument>),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<TensorError> for DocumentError {
    fn from(err: TensorError) -> Self {
        DocumentError::Graph(GraphError::Tensor(err))
    }
}

impl GraphDocument {
    pub fn from_json_str(src: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(src).map_err(DocumentError::from)
    }

    pub fn to_json_string(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(self).map_err(DocumentError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, DocumentError> {
        let contents = fs::read_to_string(path)?;
        GraphDocument::from_json_str(&contents)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), DocumentError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

impl ValueInfoDoc {
    fn value_type(&self) -> Result<ValueType, TensorError> {
        let dtype = match self.elem_type {
            0 => None,
            tag => Some(Dtype::from_onnx(tag)?),
        };
        let shape = match &self.shape {
            None => None,
            Some(dims) => Some(
                dims.iter()
                    .map(|dim| match dim {
                        DimDoc::Value(v) if *v >= 0 => Ok(Dimension::Static(*v as usize)),
                        DimDoc::Value(v) => Err(TensorError::NegativeDim {
                            name: self.name.clone(),
                            dim: *v,
                        }),
                        DimDoc::Param(p) => Ok(Dimension::Symbolic(p.clone())),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        Ok(ValueType { dtype, shape })
    }

    fn from_value(name: &str, ty: &ValueType, doc_string: &str) -> Self {
        ValueInfoDoc {
            name: name.to_string(),
            elem_type: ty.dtype.map(Dtype::to_onnx).unwrap_or(0),
            shape: ty.shape.as_ref().map(|dims| {
                dims.iter()
                    .map(|dim| match dim {
                        Dimension::Static(v) => DimDoc::Value(*v as i64),
                        Dimension::Symbolic(p) => DimDoc::Param(p.clone()),
                    })
                    .collect()
            }),
            doc_string: doc_string.to_string(),
        }
    }
}

impl Graph {
    /// Builds a graph from a top-level document. Every referenced name must be
    /// declared by the document.
    pub fn from_document(doc: &GraphDocument) -> Result<Graph, DocumentError> {
        build_graph(doc, false)
    }

    pub fn to_document(&self) -> GraphDocument {
        let mut doc = GraphDocument {
            name: self.name.clone(),
            doc_string: self.doc_string.clone(),
            ..GraphDocument::default()
        };
        for &id in &self.input_values {
            let value = &self.values[id.0 as usize];
            doc.inputs
                .push(ValueInfoDoc::from_value(&value.name, &value.ty, &value.doc_string));
            if let Some(init) = &value.initializer {
                let mut record = init.to_record();
                record.name = value.name.clone();
                doc.initializers.push(record);
            }
        }
        for &id in &self.output_values {
            let value = &self.values[id.0 as usize];
            doc.outputs
                .push(ValueInfoDoc::from_value(&value.name, &value.ty, &value.doc_string));
        }
        for (id, value) in self.live_values() {
            if value.kind == ValueKind::Temp && value.ty != ValueType::unknown() {
                if !self.is_graph_output(id) {
                    doc.value_info
                        .push(ValueInfoDoc::from_value(&value.name, &value.ty, &value.doc_string));
                }
            }
        }
        let order = self
            .sorted_nodes()
            .unwrap_or_else(|_| self.live_node_ids());
        for id in order {
            let node = &self.nodes[id.0 as usize];
            doc.nodes.push(NodeDoc {
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                domain: String::new(),
                inputs: node.inputs.iter().map(|&v| self.value_name(v).to_string()).collect(),
                outputs: node.outputs.iter().map(|&v| self.value_name(v).to_string()).collect(),
                attributes: node
                    .attributes
                    .iter()
                    .map(|(key, attr)| AttributeDoc {
                        name: key.clone(),
                        value: attribute_to_doc(attr),
                    })
                    .collect(),
            });
        }
        doc
    }
}

fn build_graph(doc: &GraphDocument, nested: bool) -> Result<Graph, DocumentError> {
    let mut graph = Graph::new(doc.name.clone());
    graph.doc_string = doc.doc_string.clone();

    for info in &doc.inputs {
        let id = graph.add_input_value(info.name.clone(), info.value_type()?)?;
        graph.value_mut(id)?.doc_string = info.doc_string.clone();
    }
    for record in &doc.initializers {
        let tensor = Tensor::from_record(record)?;
        let id = match graph.value_by_name(&record.name) {
            Some(id) => id,
            None => graph.add_input_value(record.name.clone(), ValueType::of_tensor(&tensor))?,
        };
        graph.set_initializer(id, tensor)?;
    }
    for info in &doc.outputs {
        match graph.value_by_name(&info.name) {
            Some(id) => graph.mark_output(id)?,
            None => {
                let id = graph.add_output_value(info.name.clone(), info.value_type()?)?;
                graph.value_mut(id)?.doc_string = info.doc_string.clone();
            }
        }
    }

    let hints: HashMap<&str, &ValueInfoDoc> = doc
        .value_info
        .iter()
        .map(|info| (info.name.as_str(), info))
        .collect();

    let mut node_outputs: Vec<Vec<ValueId>> = Vec::with_capacity(doc.nodes.len());
    for node in &doc.nodes {
        let mut outputs = Vec::with_capacity(node.outputs.len());
        for name in &node.outputs {
            if name.is_empty() {
                outputs.push(graph.add_fresh_value("unused", ValueType::unknown()));
                continue;
            }
            let id = match graph.value_by_name(name) {
                Some(id) => id,
                None => {
                    let ty = match hints.get(name.as_str()) {
                        Some(info) => info.value_type()?,
                        None => ValueType::unknown(),
                    };
                    graph.add_temp_value(name.clone(), ty)?
                }
            };
            outputs.push(id);
        }
        node_outputs.push(outputs);
    }

    for (node, outputs) in doc.nodes.iter().zip(node_outputs) {
        let declared = node
            .inputs
            .iter()
            .rposition(|name| !name.is_empty())
            .map_or(0, |last| last + 1);
        let mut inputs = Vec::with_capacity(declared);
        for name in &node.inputs[..declared] {
            let id = match graph.value_by_name(name) {
                Some(id) => id,
                None if nested && !name.is_empty() => graph.add_captured_value(name.clone())?,
                None => {
                    return Err(GraphError::UndefinedValue {
                        graph: doc.name.clone(),
                        name: name.clone(),
                    }
                    .into())
                }
            };
            inputs.push(id);
        }
        let id = if node.name.is_empty() {
            graph.add_node(node.op_type.clone(), &inputs, &outputs)?
        } else {
            graph.add_named_node(node.name.clone(), node.op_type.clone(), &inputs, &outputs)?
        };
        for attr in &node.attributes {
            let value = attribute_from_doc(&attr.value)?;
            graph.node_mut(id)?.set_attr(attr.name.clone(), value);
        }
    }
    Ok(graph)
}

fn attribute_from_doc(doc: &AttributeValueDoc) -> Result<Attribute, DocumentError> {
    Ok(match doc {
        AttributeValueDoc::Int(v) => Attribute::Int(*v),
        AttributeValueDoc::Float(v) => Attribute::Float(*v),
        AttributeValueDoc::String(v) => Attribute::String(v.clone()),
        AttributeValueDoc::Ints(v) => Attribute::Ints(v.clone()),
        AttributeValueDoc::Floats(v) => Attribute::Floats(v.clone()),
        AttributeValueDoc::Strings(v) => Attribute::Strings(v.clone()),
        AttributeValueDoc::Tensor(record) => Attribute::Tensor(Tensor::from_record(record)?),
        AttributeValueDoc::Graph(body) => Attribute::Graph(Box::new(build_graph(body, true)?)),
    })
}

fn attribute_to_doc(attr: &Attribute) -> AttributeValueDoc {
    match attr {
        Attribute::Int(v) => AttributeValueDoc::Int(*v),
        Attribute::Float(v) => AttributeValueDoc::Float(*v),
        Attribute::String(v) => AttributeValueDoc::String(v.clone()),
        Attribute::Ints(v) => AttributeValueDoc::Ints(v.clone()),
        Attribute::Floats(v) => AttributeValueDoc::Floats(v.clone()),
        Attribute::Strings(v) => AttributeValueDoc::Strings(v.clone()),
        Attribute::Tensor(t) => AttributeValueDoc::Tensor(t.to_record()),
        Attribute::Graph(g) => AttributeValueDoc::Graph(Box::new(g.to_document())),
    }
}
