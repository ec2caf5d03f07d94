//! JSON ↔ OSC argument conversion (the JSON boundary).
//!
//! Integers become `i` (or `h` when they don't fit in 32 bits), other numbers
//! become `f`, which is what AbletonOSC expects.

use base64::Engine;
use serde_json::Value;

use crate::envelope::EnvelopeError;
use crate::osc::OscArg;

/// Convert one JSON value into an OSC argument.
pub fn json_to_osc(index: usize, value: &Value) -> Result<OscArg, EnvelopeError> {
    match value {
        Value::Null => Ok(OscArg::Nil),
        Value::Bool(b) => Ok(OscArg::Bool(*b)),
        Value::String(s) => Ok(OscArg::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i32::try_from(i).map(OscArg::Int).unwrap_or(OscArg::Long(i)))
            } else if let Some(u) = n.as_u64() {
                Ok(i64::try_from(u)
                    .map(OscArg::Long)
                    .unwrap_or(OscArg::Double(u as f64)))
            } else {
                // as_f64 is always Some for non-integer numbers
                Ok(OscArg::Float(n.as_f64().unwrap_or_default() as f32))
            }
        }
        Value::Array(_) => Err(EnvelopeError::UnsupportedArgument {
            index,
            kind: "array",
        }),
        Value::Object(_) => Err(EnvelopeError::UnsupportedArgument {
            index,
            kind: "object",
        }),
    }
}

/// Convert a JSON argument list into OSC arguments.
pub fn args_from_json(values: &[Value]) -> Result<Vec<OscArg>, EnvelopeError> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| json_to_osc(i, v))
        .collect()
}

/// Convert one OSC argument into JSON.
///
/// Blobs become base64 strings; non-finite floats become null.
pub fn osc_to_json(arg: &OscArg) -> Value {
    match arg {
        OscArg::Int(v) => Value::from(*v),
        OscArg::Long(v) => Value::from(*v),
        OscArg::Float(v) => float(f64::from(*v)),
        OscArg::Double(v) => float(*v),
        OscArg::String(s) => Value::String(s.clone()),
        OscArg::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        OscArg::Bool(b) => Value::Bool(*b),
        OscArg::Nil | OscArg::Impulse => Value::Null,
    }
}

/// Convert reply arguments into a JSON array.
pub fn args_to_json(args: &[OscArg]) -> Value {
    Value::Array(args.iter().map(osc_to_json).collect())
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
