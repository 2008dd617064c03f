use std::sync::Arc;

use exposer_base::error::ErrorKind;
use exposer_base::pal::http::HttpMethod;
use exposer_base::{ExposerError, ExposerResult, ResultExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::{ApiFunction, ApiMap, Callable};
use crate::validation::{CompiledSchema, PayloadSchema, build_schema};

/// Everything needed to serve one API, fixed at registration.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub group: String,
    pub id: String,
    pub path: String,
    pub method: HttpMethod,
    pub params: Vec<String>,
    pub has_buffer_input: bool,
    pub has_stream_input: bool,
    pub payload_schema: Option<Arc<PayloadSchema>>,
    pub response_schema: Option<Arc<CompiledSchema>>,
    pub validate_response: bool,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub function: Callable,
}

impl Descriptor {
    /// The public projection listed by the discovery endpoint.
    pub fn exposed(&self) -> ExposedApi {
        ExposedApi {
            group: self.group.clone(),
            id: self.id.clone(),
            params: self.params.clone(),
            path: self.path.clone(),
            has_buffer_input: self.has_buffer_input,
            has_stream_input: self.has_stream_input,
        }
    }

    /// Whether the request body reaches the function unparsed.
    pub fn takes_raw_body(&self) -> bool {
        self.has_buffer_input || self.has_stream_input
    }
}

/// Public description of one exposed API. Field order is part of the checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedApi {
    pub group: String,
    pub id: String,
    pub params: Vec<String>,
    pub path: String,
    pub has_buffer_input: bool,
    pub has_stream_input: bool,
}

/// GET for functions without parameters, POST otherwise.
pub fn select_method(params: &[String]) -> HttpMethod {
    if params.is_empty() {
        HttpMethod::Get
    } else {
        HttpMethod::Post
    }
}

/// `base_path/group/id`, with `base_path` already normalized.
pub fn api_path(base_path: &str, group: &str, id: &str) -> String {
    format!("{}/{}/{}", base_path, group, id)
}

/// Normalize a base path to a leading slash and no trailing slash (`""` for the root).
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn invalid_schema(group: &str, id: &str, error: Box<ExposerError>) -> Box<ExposerError> {
    Box::new(ExposerError::new(ErrorKind::InvalidValidationSchema {
        group: group.to_string(),
        id: id.to_string(),
        message: error.to_string(),
    }))
}

fn check_api_id(id: &str) -> ExposerResult<()> {
    if id.is_empty() || id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(Box::new(ExposerError::configuration(format!(
            "API id '{}' cannot be used as a path segment",
            id
        ))));
    }
    Ok(())
}

/// Build the descriptor of a single API.
pub fn build_descriptor(
    base_path: &str,
    group: &str,
    id: &str,
    function: &ApiFunction,
) -> ExposerResult<Descriptor> {
    check_api_id(id)?;
    function.check_metadata()?;
    let params = function.param_names()?;

    // Functions without parameters have no payload to validate
    let payload_schema = match function.validation_fragments() {
        Some(fragments) if !params.is_empty() => Some(Arc::new(
            build_schema(fragments, &params).map_err(|e| invalid_schema(group, id, e))?,
        )),
        _ => None,
    };
    let response_schema = function
        .response_schema_value()
        .map(|schema| CompiledSchema::compile(schema).map_err(|e| invalid_schema(group, id, e)))
        .transpose()?
        .map(Arc::new);

    Ok(Descriptor {
        group: group.to_string(),
        id: id.to_string(),
        path: api_path(base_path, group, id),
        method: select_method(&params),
        params,
        has_buffer_input: function.has_buffer_input(),
        has_stream_input: function.has_stream_input(),
        payload_schema,
        response_schema,
        validate_response: function.validates_response(),
        description: function.description_text().map(str::to_string),
        notes: function.notes_text().map(str::to_string),
        function: function.callable().clone(),
    })
}

/// Build descriptors for every API of every group, in group then API order.
pub fn build_descriptors(
    base_path: &str,
    groups: &IndexMap<String, ApiMap>,
) -> ExposerResult<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    for (group, apis) in groups {
        for (id, function) in apis {
            let descriptor = build_descriptor(base_path, group, id, function)
                .with_context(|| format!("registering API {}.{}", group, id))?;
            debug!(
                group = %group,
                id = %id,
                method = %descriptor.method,
                path = %descriptor.path,
                "built API descriptor"
            );
            if let Some(description) = &descriptor.description {
                info!(group = %group, id = %id, description = %description, "API documentation");
            }
            if let Some(notes) = &descriptor.notes {
                debug!(group = %group, id = %id, notes = %notes, "API notes");
            }
            descriptors.push(descriptor);
        }
    }
    Ok(descriptors)
}
