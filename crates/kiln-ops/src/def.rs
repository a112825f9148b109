//! Serializable operator and graph definitions.

use std::collections::BTreeMap;

use kiln_core::Device;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A named configuration value attached to an operator definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argument {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Str(String),
}

impl Argument {
    /// Short kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::Int(_) => "int",
            Argument::Float(_) => "float",
            Argument::Ints(_) => "ints",
            Argument::Floats(_) => "floats",
            Argument::Str(_) => "string",
        }
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Float(v as f32)
    }
}

impl From<Vec<i64>> for Argument {
    fn from(v: Vec<i64>) -> Self {
        Argument::Ints(v)
    }
}

impl From<Vec<f32>> for Argument {
    fn from(v: Vec<f32>) -> Self {
        Argument::Floats(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Str(v)
    }
}

/// One node of a graph: what to run, on which tensors, with which arguments.
///
/// `device` is optional; the graph builder fills it from the executor
/// configuration when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub args: BTreeMap<String, Argument>,
}

impl OperatorDef {
    pub fn new<I, O, S1, S2>(op_type: &str, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S1>,
        O: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            name: String::new(),
            op_type: op_type.to_string(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            device: None,
            args: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_arg(mut self, name: &str, value: impl Into<Argument>) -> Self {
        self.args.insert(name.to_string(), value.into());
        self
    }

    /// Node name if set, otherwise the op type. Used as the log/error label.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }
}

/// An ordered list of operator definitions executed front to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ops: Vec<OperatorDef>,
    /// Reject the graph unless every operator has a gradient.
    #[serde(default)]
    pub requires_grad: bool,
}

impl GraphDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push(mut self, op: OperatorDef) -> Self {
        self.ops.push(op);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let def = OperatorDef::new("OneHot", ["x"], ["y"])
            .with_name("encode")
            .with_arg("depth", 4)
            .with_arg("on_value", 2.0);
        assert_eq!(def.inputs, vec!["x".to_string()]);
        assert_eq!(def.args["depth"], Argument::Int(4));
        assert_eq!(def.args["on_value"], Argument::Float(2.0));
        assert_eq!(def.display_name(), "encode");
        assert_eq!(OperatorDef::new("Copy", ["a"], ["b"]).display_name(), "Copy");
    }

    #[test]
    fn test_graph_from_json() {
        let json = r#"{
            "name": "eval",
            "ops": [
                {
                    "op_type": "Accuracy",
                    "inputs": ["logits", "labels"],
                    "outputs": ["acc"],
                    "args": { "top_k": { "int": 5 }, "ignore_labels": { "ints": [-1] } }
                }
            ]
        }"#;
        let graph = GraphDef::from_json(json).unwrap();
        assert_eq!(graph.name, "eval");
        assert!(!graph.requires_grad);
        let op = &graph.ops[0];
        assert_eq!(op.device, None);
        assert_eq!(op.args["top_k"], Argument::Int(5));
        assert_eq!(op.args["ignore_labels"], Argument::Ints(vec![-1]));

        let again = GraphDef::from_json(&graph.to_json().unwrap()).unwrap();
        assert_eq!(again, graph);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            GraphDef::from_json("{\"ops\": 3}"),
            Err(crate::Error::Serde(_))
        ));
    }
}
