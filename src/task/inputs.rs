use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::{Result, RiceError};

const INPUT_PREFIX: &str = "input_anything";

/// Maps the decrypt node's `input_anything…` arguments to positional indexes.
///
/// `input_anything (12)` is slot 0, `input_anything3 (40)` slot 3; the parenthesised
/// part only names the source node. Other keys are ignored.
pub fn collect_inputs(kwargs: &Map<String, Value>) -> Result<BTreeMap<String, String>> {
    let annotation = Regex::new(r"\s*\([^)]*\)").map_err(|e| RiceError::Convert(e.to_string()))?;
    let mut inputs = BTreeMap::new();
    for (key, value) in kwargs {
        let Some(suffix) = key.strip_prefix(INPUT_PREFIX) else {
            continue;
        };
        let suffix = annotation.replace_all(suffix, "");
        let index = if suffix.is_empty() {
            0
        } else {
            suffix
                .parse::<u32>()
                .map_err(|_| RiceError::Validation(format!("Invalid input_anything index: {}", key)))?
        };
        let Value::String(value) = value else {
            return Err(RiceError::Validation(format!("Invalid input type for {}: {}", key, value)));
        };
        if inputs.insert(index.to_string(), value.clone()).is_some() {
            return Err(RiceError::Validation(format!("Duplicate input_anything index: {}", index)));
        }
    }
    Ok(inputs)
}
