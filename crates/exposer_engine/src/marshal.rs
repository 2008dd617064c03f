//! Conversion between positional arguments and the named wire payload.
//!
//! Arguments beyond the declared names travel under their index as key (`"2"`), and payload
//! keys that match no declared name are appended positionally on the way back. Both
//! directions preserve order, which relies on `serde_json`'s `preserve_order` feature.

use serde_json::{Map, Value};

/// Name positional `args` after `names`; extra arguments are keyed by their index.
pub fn to_named_object(args: &[Value], names: &[String]) -> Map<String, Value> {
    args.iter()
        .enumerate()
        .map(|(index, arg)| {
            let key = names
                .get(index)
                .cloned()
                .unwrap_or_else(|| index.to_string());
            (key, arg.clone())
        })
        .collect()
}

/// Positional arguments for `names` (missing ones as `null`), followed by every
/// other payload value in payload order.
pub fn to_positional(payload: &Map<String, Value>, names: &[String]) -> Vec<Value> {
    let declared = names
        .iter()
        .map(|name| payload.get(name).cloned().unwrap_or(Value::Null));
    let overflow = payload
        .iter()
        .filter(|(key, _)| !names.contains(key))
        .map(|(_, value)| value.clone());
    declared.chain(overflow).collect()
}
