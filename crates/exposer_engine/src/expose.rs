/* 📖 # Why is exposure a single async call?

Exposing a service is all-or-nothing: groups are initialized, every API is described, the
checksum is computed and only then are routes handed out. If any step fails the caller gets
the error and no route exists, so a half-registered service is never reachable. The result
(`Exposure`) keeps everything that was computed so that tests and tools can inspect it.
*/

use std::sync::Arc;

use exposer_base::pal::http::{HttpMethod, HttpRequest, HttpResponse};
use exposer_base::{ExposerError, ExposerResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::checksum::{CHECKSUM_HEADER, checksum};
use crate::descriptor::{Descriptor, ExposedApi, build_descriptors, normalize_base_path};
use crate::group::{Group, GroupOptions, initialize_groups};
use crate::handler::RequestHandler;
use crate::logger::Logger;
use crate::router::{
    DEFAULT_MAX_BODY_BYTES, Output, RequestOptions, Route, RouteTable, Router,
};

/// Base path used when none is configured.
pub const DEFAULT_BASE_PATH: &str = "/api";

/// In-memory configuration of an exposed service.
#[derive(Debug, Clone)]
pub struct ExposeConfig {
    pub name: String,
    pub version: String,
    pub base_path: String,
    pub groups: Vec<Group>,
    pub group_opts: GroupOptions,
    pub logger: Option<Logger>,
    pub max_body_bytes: usize,
}

impl ExposeConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            groups: vec![],
            group_opts: GroupOptions::new(),
            logger: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Append a group; groups are initialized in the order they are added.
    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_group_options(mut self, group: impl Into<String>, options: Map<String, Value>) -> Self {
        self.group_opts.insert(group.into(), options);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn check(&self) -> ExposerResult<()> {
        if self.name.trim().is_empty() {
            return Err(Box::new(ExposerError::configuration("service name is required")));
        }
        if self.version.trim().is_empty() {
            return Err(Box::new(ExposerError::configuration(
                "service version is required",
            )));
        }
        Ok(())
    }
}

/// Body of the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub name: String,
    pub version: String,
    pub checksum: String,
    pub apis: Vec<ExposedApi>,
}

/// A fully registered service.
#[derive(Debug)]
pub struct Exposure {
    base_path: String,
    descriptors: Vec<Arc<Descriptor>>,
    document: Arc<DiscoveryDocument>,
    routes: Vec<Route>,
}

impl Exposure {
    pub fn name(&self) -> &str {
        &self.document.name
    }

    pub fn version(&self) -> &str {
        &self.document.version
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn checksum(&self) -> &str {
        &self.document.checksum
    }

    pub fn exposed(&self) -> &[ExposedApi] {
        &self.document.apis
    }

    pub fn descriptors(&self) -> &[Arc<Descriptor>] {
        &self.descriptors
    }

    pub fn discovery_document(&self) -> &DiscoveryDocument {
        &self.document
    }

    /// All routes, the discovery endpoint first.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Hand every route to `router`.
    pub fn register(&self, router: &mut dyn Router) -> ExposerResult<()> {
        router.register(self.routes.clone())
    }

    /// A route table serving this exposure.
    pub fn route_table(&self) -> ExposerResult<RouteTable> {
        let mut table = RouteTable::new().with_checksum(self.checksum());
        self.register(&mut table)?;
        Ok(table)
    }
}

/// Route options for an API, following its input flags.
pub fn request_options(descriptor: &Descriptor, max_body_bytes: usize) -> RequestOptions {
    RequestOptions {
        parse: !descriptor.takes_raw_body(),
        output: if descriptor.has_stream_input {
            Output::Stream
        } else {
            Output::Data
        },
        max_body_bytes: if descriptor.has_stream_input {
            None
        } else {
            Some(max_body_bytes)
        },
        response_sample_rate: if descriptor.validate_response { 1.0 } else { 0.0 },
    }
}

fn discovery_route(path: String, document: Arc<DiscoveryDocument>) -> Route {
    let handler = move |_request: HttpRequest| -> ExposerResult<HttpResponse> {
        Ok(HttpResponse::json_value(document.as_ref())?
            .with_header(CHECKSUM_HEADER, document.checksum.as_str()))
    };
    Route::new(HttpMethod::Get, path, handler, RequestOptions::default())
}

/// Initialize all groups and describe, fingerprint and route every exported API.
#[instrument(skip_all, fields(service = %config.name, version = %config.version))]
pub async fn expose(config: ExposeConfig) -> ExposerResult<Exposure> {
    config.check()?;
    let base_path = normalize_base_path(&config.base_path);
    let logger = config
        .logger
        .clone()
        .unwrap_or_else(|| Logger::new(&config.name));

    let groups = initialize_groups(&config.groups, &config.group_opts, &logger).await?;
    let descriptors: Vec<Arc<Descriptor>> = build_descriptors(&base_path, &groups)?
        .into_iter()
        .map(Arc::new)
        .collect();
    let apis: Vec<ExposedApi> = descriptors.iter().map(|d| d.exposed()).collect();
    let checksum = checksum(&apis)?;
    let document = Arc::new(DiscoveryDocument {
        name: config.name.clone(),
        version: config.version.clone(),
        checksum: checksum.clone(),
        apis,
    });

    let mut routes = vec![discovery_route(
        format!("{}/exposed", base_path),
        document.clone(),
    )];
    for descriptor in &descriptors {
        let options = request_options(descriptor, config.max_body_bytes);
        let handler = RequestHandler::new(descriptor.clone(), options.clone(), checksum.clone());
        routes.push(Route::new(
            descriptor.method,
            descriptor.path.clone(),
            handler,
            options,
        ));
    }

    info!(
        groups = config.groups.len(),
        apis = descriptors.len(),
        checksum = %checksum,
        base_path = %base_path,
        "service exposed"
    );
    Ok(Exposure {
        base_path,
        descriptors,
        document,
        routes,
    })
}
