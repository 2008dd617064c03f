use exposer_base::pal::http::HttpServerConfig;
use exposer_base::{ExposerError, ExposerResult, FilePath, Pal, ResultExt};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::expose::{DEFAULT_BASE_PATH, ExposeConfig};
use crate::group::{Group, GroupOptions};
use crate::router::DEFAULT_MAX_BODY_BYTES;

/* 📖 # Why does the settings file only name groups?

Group inits are code and cannot live in a TOML file. The file declares which groups run, in
which order, and with which options; the binary registers the actual init functions in a
`GroupCatalog`. A group named in the file but missing from the catalog is refused before any
group runs.
*/

/// Settings of an exposed service, as read from `exposer.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub name: String,
    pub version: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    /// Group names in initialization order.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub group_opts: GroupOptions,
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on, OS-assigned when absent.
    pub port: Option<u16>,
    /// Largest body the server reads on any route, stream routes included.
    pub max_body_bytes: Option<usize>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            max_body_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitSettings {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn parse(text: &str) -> ExposerResult<Self> {
        toml::from_str(text).map_err(|e| Box::new(ExposerError::configuration(e.to_string())))
    }

    /// Resolve the declared groups against `catalog` into an expose configuration.
    pub fn expose_config(&self, catalog: &GroupCatalog) -> ExposeConfig {
        let mut config = ExposeConfig::new(&self.name, &self.version)
            .with_base_path(&self.base_path)
            .with_max_body_bytes(self.limits.max_body_bytes);
        for name in &self.groups {
            config = config.with_group(catalog.resolve(name));
        }
        config.group_opts = self.group_opts.clone();
        config
    }

    pub fn server_config(&self) -> HttpServerConfig {
        let mut config = HttpServerConfig::new(&self.server.host).with_server_name(&self.name);
        if let Some(port) = self.server.port {
            config = config.with_port(port);
        }
        if let Some(limit) = self.server.max_body_bytes {
            config = config.with_max_body_bytes(limit);
        }
        config
    }
}

/// Load settings through the PAL.
#[instrument(skip(pal), fields(path = %path))]
pub fn load_settings(pal: &dyn Pal, path: &FilePath) -> ExposerResult<Settings> {
    let text = pal
        .read_file_to_string(path)
        .with_context(|| format!("reading settings from {}", path))?;
    let settings =
        Settings::parse(&text).with_context(|| format!("parsing settings from {}", path))?;
    debug!(name = %settings.name, groups = settings.groups.len(), "settings loaded");
    Ok(settings)
}

/// Group init functions available to a binary, by group name.
#[derive(Debug, Clone, Default)]
pub struct GroupCatalog {
    groups: IndexMap<String, Group>,
}

impl GroupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, group: Group) -> Self {
        self.groups.insert(group.name().to_string(), group);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// The registered group, or a declared-only group that fails initialization checks.
    pub fn resolve(&self, name: &str) -> Group {
        self.groups
            .get(name)
            .cloned()
            .unwrap_or_else(|| Group::declared(name))
    }
}
