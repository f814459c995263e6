//! Declared metadata of a nested graph and of the node that owns it.
//!
//! Only the interface of the nested graph matters here: the names, element
//! types and (possibly symbolic) shapes of its inputs and outputs.

use std::fmt;

use kore_core::{Dim, KoreError, Result, SymbolicShape};
use serde::{Deserialize, Serialize};

/// Element type of a graph value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemType {
    Float32,
    Float16,
    Int32,
    Int64,
}

impl ElemType {
    pub fn is_float(&self) -> bool {
        matches!(self, ElemType::Float32 | ElemType::Float16)
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemType::Float32 => "float32",
            ElemType::Float16 => "float16",
            ElemType::Int32 => "int32",
            ElemType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

/// One declared graph input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub elem_type: ElemType,
    /// `None` when the graph declares no shape at all.
    pub shape: Option<SymbolicShape>,
}

impl ValueInfo {
    pub fn new(name: impl Into<String>, elem_type: ElemType, shape: SymbolicShape) -> Self {
        Self {
            name: name.into(),
            elem_type,
            shape: Some(shape),
        }
    }

    pub fn unshaped(name: impl Into<String>, elem_type: ElemType) -> Self {
        Self {
            name: name.into(),
            elem_type,
            shape: None,
        }
    }
}

/// Interface of a nested graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDef {
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
}

impl GraphDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, info: ValueInfo) -> Self {
        self.inputs.push(info);
        self
    }

    pub fn with_output(mut self, info: ValueInfo) -> Self {
        self.outputs.push(info);
        self
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|v| v.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|v| v.name.clone()).collect()
    }

    /// Parse a graph interface from JSON.
    ///
    /// ```
    /// use kore_subgraph::GraphDef;
    /// let graph = GraphDef::from_json(r#"{
    ///     "name": "decoder",
    ///     "inputs": [{"name": "input_ids", "elem_type": "int32", "shape": ["batch", "seq"]}],
    ///     "outputs": [{"name": "logits", "elem_type": "float32", "shape": ["batch", "seq", 50257]}]
    /// }"#).unwrap();
    /// assert_eq!(graph.outputs[0].shape.as_ref().unwrap().fixed(2), Some(50257));
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let def: GraphJson = serde_json::from_str(json)
            .map_err(|e| KoreError::GraphError(format!("invalid graph description: {e}")))?;
        Ok(def.into())
    }
}

/// Node that owns a nested graph attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDef {
    pub name: String,
    pub op_type: String,
    /// Outer-scope values the nested graph captures, in capture order.
    pub implicit_inputs: Vec<String>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            implicit_inputs: Vec::new(),
        }
    }

    pub fn with_implicit_input(mut self, name: impl Into<String>) -> Self {
        self.implicit_inputs.push(name.into());
        self
    }
}

#[derive(Deserialize)]
struct GraphJson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<ValueJson>,
    #[serde(default)]
    outputs: Vec<ValueJson>,
}

#[derive(Deserialize)]
struct ValueJson {
    name: String,
    elem_type: ElemType,
    #[serde(default)]
    shape: Option<Vec<DimJson>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DimJson {
    Fixed(i64),
    Symbolic(String),
}

impl From<GraphJson> for GraphDef {
    fn from(json: GraphJson) -> Self {
        let convert = |values: Vec<ValueJson>| {
            values
                .into_iter()
                .map(|v| ValueInfo {
                    name: v.name,
                    elem_type: v.elem_type,
                    shape: v.shape.map(|dims| {
                        SymbolicShape::new(
                            dims.into_iter()
                                .map(|d| match d {
                                    DimJson::Fixed(v) => Dim::Fixed(v),
                                    DimJson::Symbolic(s) => Dim::Symbolic(s),
                                })
                                .collect(),
                        )
                    }),
                })
                .collect()
        };
        GraphDef {
            name: json.name,
            inputs: convert(json.inputs),
            outputs: convert(json.outputs),
        }
    }
}
