use kiln_core::{DType, DeviceKind, KilnError};
use thiserror::Error;

/// Errors raised while registering, building or running operators.
///
/// All of them abort the graph run that produced them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: expected {expected} {what}, got {got}")]
    SchemaViolation {
        op: String,
        what: &'static str,
        expected: String,
        got: usize,
    },

    #[error("{op}: unsupported dtype {dtype} (supported: {})", fmt_dtypes(.supported))]
    UnsupportedDType {
        op: String,
        dtype: DType,
        supported: Vec<DType>,
    },

    #[error("{op}: shape mismatch: {msg}")]
    ShapeMismatch { op: String, msg: String },

    #[error("{op} is not deployed on {device}")]
    UndeployedDevice { op: String, device: DeviceKind },

    #[error("Unknown operator type: {0}")]
    UnknownOperator(String),

    #[error("{op}: {what} is already registered")]
    DuplicateRegistration { op: String, what: String },

    #[error("{0} is registered as not differentiable")]
    NotDifferentiable(String),

    #[error("{0} has no gradient registration")]
    MissingGradient(String),

    #[error("{op}: invalid argument: {msg}")]
    InvalidArgument { op: String, msg: String },

    #[error("{op}: index {value} at position {position} is out of range [0, {depth})")]
    IndexOutOfRange {
        op: String,
        value: f32,
        position: usize,
        depth: usize,
    },

    #[error("{op}: missing {what}")]
    MissingInput { op: String, what: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed definition: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] KilnError),
}

fn fmt_dtypes(dtypes: &[DType]) -> String {
    dtypes
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_operator() {
        let e = Error::UnsupportedDType {
            op: "Copy".into(),
            dtype: DType::I64,
            supported: vec![DType::F32, DType::F16],
        };
        assert_eq!(e.to_string(), "Copy: unsupported dtype i64 (supported: f32, f16)");

        let e = Error::SchemaViolation {
            op: "Copy".into(),
            what: "inputs",
            expected: "1".into(),
            got: 2,
        };
        assert_eq!(e.to_string(), "Copy: expected 1 inputs, got 2");
    }
}
