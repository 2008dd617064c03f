/* 📖 # Why compile one object schema per API?

Validation fragments are written per parameter, but requests arrive as one named object. The
fragments are zipped with the parameter names into a single object schema with
`additionalProperties: false` and compiled once at registration (Draft 7, `jsonschema`), so a
request is checked in one pass and unknown keys are reported next to type errors.
*/

use std::sync::atomic::{AtomicU64, Ordering};

use exposer_base::error::ErrorKind;
use exposer_base::{Diagnostic, ExposerError, ExposerResult};
use jsonschema::{Draft, JSONSchema};
use serde_json::{Map, Value, json};

/// A compiled JSON schema.
pub struct CompiledSchema {
    compiled: JSONSchema,
    source: Value,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> ExposerResult<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| Box::new(ExposerError::message(e.to_string())))?;
        Ok(Self {
            compiled,
            source: schema.clone(),
        })
    }

    /// The schema document this was compiled from.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Field diagnostics for `instance`, empty when it is valid.
    pub fn diagnostics(&self, instance: &Value) -> Vec<Diagnostic> {
        match self.compiled.validate(instance) {
            Ok(()) => vec![],
            Err(errors) => errors
                .map(|error| {
                    let pointer = error.instance_path.to_string();
                    Diagnostic::new(top_level_field(&pointer), error.to_string())
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("source", &self.source)
            .finish()
    }
}

/// First segment of a JSON pointer such as `/a/0/b`, unescaped.
fn top_level_field(pointer: &str) -> Option<String> {
    let segment = pointer.strip_prefix('/')?.split('/').next()?;
    Some(segment.replace("~1", "/").replace("~0", "~"))
}

/// Schema of the named request payload of one API.
#[derive(Debug)]
pub struct PayloadSchema {
    schema: CompiledSchema,
}

impl PayloadSchema {
    pub fn source(&self) -> &Value {
        self.schema.source()
    }
}

/// Zip per-parameter `fragments` with `names` into a compiled object schema.
///
/// Parameters without a fragment (or with a `null` fragment) accept any value.
pub fn build_schema(fragments: &[Value], names: &[String]) -> ExposerResult<PayloadSchema> {
    if fragments.len() > names.len() {
        return Err(Box::new(ExposerError::message(format!(
            "{} validation fragments given for {} parameters",
            fragments.len(),
            names.len()
        ))));
    }
    let properties: Map<String, Value> = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let fragment = match fragments.get(index) {
                None | Some(Value::Null) => json!({}),
                Some(fragment) => fragment.clone(),
            };
            (name.clone(), fragment)
        })
        .collect();
    let schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
    });
    Ok(PayloadSchema {
        schema: CompiledSchema::compile(&schema)?,
    })
}

/// Check a named payload against the parameter count and the payload schema.
///
/// A payload with more keys than `expected_count` is rejected before the
/// schema is consulted.
pub fn validate(
    named: &Map<String, Value>,
    schema: &PayloadSchema,
    id: &str,
    expected_count: usize,
) -> ExposerResult<()> {
    if named.len() > expected_count {
        return Err(Box::new(ExposerError::new(
            ErrorKind::ParameterCountMismatch {
                id: id.to_string(),
                expected: expected_count,
                actual: named.len(),
            },
        )));
    }
    // TODO: avoid cloning the payload once requests are decoded into a Value directly
    let diagnostics = schema.schema.diagnostics(&Value::Object(named.clone()));
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(Box::new(ExposerError::new(ErrorKind::ValidationFailed {
            id: id.to_string(),
            diagnostics,
        })))
    }
}

/// Deterministic every-Nth sampler deciding which responses are validated.
///
/// A rate of 1.0 checks every response, 0.0 none; a rate in between checks
/// every `round(1 / rate)`-th response, starting with the first.
#[derive(Debug)]
pub struct ResponseSampler {
    interval: Option<u64>,
    counter: AtomicU64,
}

impl ResponseSampler {
    pub fn new(rate: f64) -> Self {
        let interval = if rate.is_nan() || rate <= 0.0 {
            None
        } else if rate >= 1.0 {
            Some(1)
        } else {
            Some((1.0 / rate).round().max(1.0) as u64)
        };
        Self {
            interval,
            counter: AtomicU64::new(0),
        }
    }

    pub fn should_sample(&self) -> bool {
        match self.interval {
            None => false,
            Some(1) => true,
            Some(interval) => self.counter.fetch_add(1, Ordering::Relaxed) % interval == 0,
        }
    }
}

/// Check an API result against its response schema.
pub fn validate_response(value: &Value, schema: &CompiledSchema, id: &str) -> ExposerResult<()> {
    let diagnostics = schema.diagnostics(value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(Box::new(ExposerError::new(
            ErrorKind::ResponseValidationFailed {
                id: id.to_string(),
                diagnostics,
            },
        )))
    }
}
