use crate::config::ConfigCheck;
use crate::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Overwrites fields of `target` with same-named keys from `section`.
///
/// Values are coerced between JSON primitive kinds to match the kind the
/// field currently holds. Fields that are currently `null` take the incoming
/// value as is. Arrays and objects must match exactly. Unknown keys are
/// ignored. If any field fails, `target` is left untouched.
pub fn merge_json_into<T>(target: &mut T, section: &Map<String, Value>) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    if section.is_empty() {
        return Ok(());
    }

    let mut current = match serde_json::to_value(&*target)? {
        Value::Object(map) => map,
        other => {
            return Err(CoreError::Config {
                field: "<root>".to_string(),
                reason: format!("target is not an object but {}", kind_of(&other)),
            })
        }
    };

    for (field, slot) in current.iter_mut() {
        if let Some(incoming) = section.get(field) {
            *slot = coerce(field, slot, incoming)?;
        }
    }

    let merged: T = serde_json::from_value(Value::Object(current)).map_err(|e| CoreError::Config {
        field: "<document>".to_string(),
        reason: e.to_string(),
    })?;
    *target = merged;
    Ok(())
}

/// Merge followed by the target's own validation. A config that fails
/// validation is not applied.
pub fn merge_and_check<T>(target: &mut T, section: &Map<String, Value>) -> Result<()>
where
    T: Serialize + DeserializeOwned + ConfigCheck + Clone,
{
    let mut candidate = target.clone();
    merge_json_into(&mut candidate, section)?;
    candidate.check()?;
    *target = candidate;
    Ok(())
}

fn coerce(field: &str, current: &Value, incoming: &Value) -> Result<Value> {
    let mismatch = || CoreError::Config {
        field: field.to_string(),
        reason: format!(
            "cannot convert {} {} to {}",
            kind_of(incoming),
            incoming,
            kind_of(current)
        ),
    };

    match current {
        Value::Null => Ok(incoming.clone()),
        Value::String(_) => match incoming {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        Value::Bool(_) => match incoming {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Number(n) => match n.as_f64() {
                Some(v) if v == 0.0 => Ok(Value::Bool(false)),
                Some(v) if v == 1.0 => Ok(Value::Bool(true)),
                _ => Err(mismatch()),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        Value::Number(existing) => {
            let number = match incoming {
                Value::Number(n) => Some(n.clone()),
                Value::String(s) => parse_number(s.trim()),
                Value::Bool(b) => Some(Number::from(u8::from(*b))),
                _ => None,
            }
            .ok_or_else(mismatch)?;
            fit_number(existing, &number).ok_or_else(mismatch)
        }
        Value::Array(_) => match incoming {
            Value::Array(_) => Ok(incoming.clone()),
            _ => Err(mismatch()),
        },
        Value::Object(_) => match incoming {
            Value::Object(_) => Ok(incoming.clone()),
            _ => Err(mismatch()),
        },
    }
}

fn parse_number(raw: &str) -> Option<Number> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(Number::from(v));
    }
    if let Ok(v) = raw.parse::<u64>() {
        return Some(Number::from(v));
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64)
}

// Integer fields stay integral; signedness is left to deserialization.
fn fit_number(existing: &Number, incoming: &Number) -> Option<Value> {
    if existing.is_f64() {
        return incoming.as_f64().and_then(Number::from_f64).map(Value::Number);
    }

    if !incoming.is_f64() {
        return Some(Value::Number(incoming.clone()));
    }

    let v = incoming.as_f64()?;
    if !v.is_finite() || v.fract() != 0.0 {
        return None;
    }
    let integral = if v < 0.0 {
        Number::from(v as i64)
    } else {
        Number::from(v as u64)
    };
    Some(Value::Number(integral))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
