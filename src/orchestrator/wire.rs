//! Flat-array form of the headless save-and-close call:
//! `[count, id_1..id_count, svg_1..svg_count, actionName]`.

use crate::error::WireError;
use crate::model::{PostCloseAction, SaveCloseRequest};
use serde_json::Value;

fn string_at(arr: &[Value], index: usize) -> Result<String, WireError> {
    arr[index]
        .as_str()
        .map(str::to_string)
        .ok_or(WireError::NotAString { index })
}

pub fn decode(arr: &[Value]) -> Result<SaveCloseRequest, WireError> {
    let first = arr.first().ok_or(WireError::Empty)?;
    // The remote side sends the count as a float.
    let count = first
        .as_f64()
        .filter(|c| *c >= 0.0 && c.fract() == 0.0)
        .ok_or_else(|| WireError::BadCount(first.to_string()))? as usize;

    let expected = count
        .checked_mul(2)
        .and_then(|n| n.checked_add(2))
        .ok_or_else(|| WireError::BadCount(first.to_string()))?;
    if arr.len() != expected {
        return Err(WireError::Length {
            count,
            expected,
            actual: arr.len(),
        });
    }

    let project_ids = (1..=count)
        .map(|i| string_at(arr, i))
        .collect::<Result<Vec<_>, _>>()?;
    let snapshots = (count + 1..=2 * count)
        .map(|i| string_at(arr, i))
        .collect::<Result<Vec<_>, _>>()?;
    let action_name = string_at(arr, 2 * count + 1)?;
    let action = PostCloseAction::from_name(&action_name)
        .ok_or(WireError::UnknownAction(action_name))?;

    Ok(SaveCloseRequest {
        project_ids,
        snapshots,
        action,
    })
}

pub fn encode(request: &SaveCloseRequest) -> Vec<Value> {
    let mut arr = Vec::with_capacity(2 * request.len() + 2);
    arr.push(Value::from(request.len() as f64));
    arr.extend(request.project_ids.iter().cloned().map(Value::String));
    arr.extend(request.snapshots.iter().cloned().map(Value::String));
    arr.push(Value::String(request.action.as_str().to_string()));
    arr
}
