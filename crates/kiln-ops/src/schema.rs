//! Declarative input/output arity for operator types.

use crate::def::OperatorDef;
use crate::{Error, Result};

/// Arity constraints for one operator type.
///
/// Built once at registration and immutable afterwards. A fresh schema
/// accepts any number of inputs and outputs.
///
/// ```
/// use kiln_ops::OpSchema;
///
/// let schema = OpSchema::new("Accuracy").num_inputs(2).num_outputs_range(1, 2);
/// assert_eq!(schema.inputs(), (2, 2));
/// assert_eq!(schema.outputs(), (1, 2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    name: String,
    min_inputs: usize,
    max_inputs: usize,
    min_outputs: usize,
    max_outputs: usize,
    doc: Option<String>,
}

impl OpSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            min_inputs: 0,
            max_inputs: usize::MAX,
            min_outputs: 0,
            max_outputs: usize::MAX,
            doc: None,
        }
    }

    pub fn num_inputs(self, n: usize) -> Self {
        self.num_inputs_range(n, n)
    }

    pub fn num_inputs_range(mut self, min: usize, max: usize) -> Self {
        assert!(min <= max, "{}: empty input range {min}..={max}", self.name);
        self.min_inputs = min;
        self.max_inputs = max;
        self
    }

    pub fn num_outputs(self, n: usize) -> Self {
        self.num_outputs_range(n, n)
    }

    pub fn num_outputs_range(mut self, min: usize, max: usize) -> Self {
        assert!(min <= max, "{}: empty output range {min}..={max}", self.name);
        self.min_outputs = min;
        self.max_outputs = max;
        self
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(min, max)` input count.
    pub fn inputs(&self) -> (usize, usize) {
        (self.min_inputs, self.max_inputs)
    }

    /// `(min, max)` output count.
    pub fn outputs(&self) -> (usize, usize) {
        (self.min_outputs, self.max_outputs)
    }

    pub fn doc_str(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Check a definition's input and output counts against this schema.
    pub fn verify(&self, def: &OperatorDef) -> Result<()> {
        check_range(def, "inputs", def.inputs.len(), self.min_inputs, self.max_inputs)?;
        check_range(def, "outputs", def.outputs.len(), self.min_outputs, self.max_outputs)
    }
}

fn check_range(def: &OperatorDef, what: &'static str, got: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&got) {
        return Ok(());
    }
    Err(Error::SchemaViolation {
        op: def.display_name().to_string(),
        what,
        expected: fmt_range(min, max),
        got,
    })
}

fn fmt_range(min: usize, max: usize) -> String {
    if min == max {
        format!("{min}")
    } else if max == usize::MAX {
        format!("at least {min}")
    } else {
        format!("{min} to {max}")
    }
}
