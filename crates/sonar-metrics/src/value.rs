//! Coercion of raw measure values to gauge values.

use thiserror::Error;

use crate::model::{Measure, ValueKind};

/// Error converting a raw measure value to a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert value `{raw}` of metric `{metric}` to a number")]
pub struct CoercionError {
    /// Key of the measured metric.
    pub metric: String,
    /// Raw value that could not be parsed.
    pub raw: String,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Converts a measure to a gauge value.
///
/// The direct measure value is used if it's non-empty, otherwise the leak period value.
/// Boolean values map to `1.0` / `0.0`; an unparsable boolean is reported as `0.0`.
///
/// # Errors
///
/// Returns an error if a non-boolean value cannot be parsed as a float.
pub fn coerce(kind: ValueKind, measure: &Measure) -> Result<f64, CoercionError> {
    let raw = measure.raw_value();
    if kind == ValueKind::Boolean {
        return Ok(match parse_bool(raw) {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => {
                tracing::debug!(
                    metric = %measure.metric,
                    raw,
                    "Unparsable boolean value, reporting 0"
                );
                0.0
            }
        });
    }

    raw.parse().map_err(|_| CoercionError {
        metric: measure.metric.clone(),
        raw: raw.to_owned(),
    })
}
