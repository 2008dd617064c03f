/* 📖 # Why initialize groups one after another?

Groups may depend on what earlier groups set up (a database pool, a cache warmed by a previous
group), so the declared order is the initialization order. Each init is awaited before the
next one starts, and the first failure stops the whole sequence: later groups never run and
earlier groups keep whatever they did, since there is no generic way to undo a side effect.
*/

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use exposer_base::error::ErrorKind;
use exposer_base::{ExposerError, ExposerResult};
use futures::future::{BoxFuture, FutureExt};
use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{Instrument, debug, info};

use crate::api::{ApiFunction, ApiMap};
use crate::logger::Logger;
use crate::signature::is_identifier;

/// Per-group options, keyed by group name.
pub type GroupOptions = IndexMap<String, Map<String, Value>>;

/// What a group hands back from its init.
#[derive(Debug, Clone)]
pub enum GroupExports {
    /// The group only exists for its side effects
    NoApis,
    Apis(ApiMap),
}

impl GroupExports {
    /// Collect `(id, function)` pairs, keeping their order.
    pub fn apis<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, ApiFunction)>,
        K: Into<String>,
    {
        Self::Apis(items.into_iter().map(|(id, f)| (id.into(), f)).collect())
    }
}

/// Everything a group init receives.
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub logger: Logger,
    pub options: Map<String, Value>,
}

impl GroupContext {
    /// Deserialize a single option, `None` when it is not set.
    pub fn option<T: DeserializeOwned>(&self, key: &str) -> ExposerResult<Option<T>> {
        self.options
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    Box::new(ExposerError::configuration(format!(
                        "option '{}' is invalid: {}",
                        key, e
                    )))
                })
            })
            .transpose()
    }
}

type InitFn = dyn Fn(GroupContext) -> BoxFuture<'static, ExposerResult<GroupExports>> + Send + Sync;

/// A named, ordered initialization unit.
#[derive(Clone)]
pub struct Group {
    name: String,
    init: Option<Arc<InitFn>>,
}

impl Group {
    /// A group with an asynchronous init.
    pub fn new<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn(GroupContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExposerResult<GroupExports>> + Send + 'static,
    {
        Self {
            name: name.into(),
            init: Some(Arc::new(
                move |context: GroupContext| -> BoxFuture<'static, ExposerResult<GroupExports>> {
                    init(context).boxed()
                },
            )),
        }
    }

    /// A group with a synchronous init.
    pub fn from_sync<F>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn(GroupContext) -> ExposerResult<GroupExports> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            init: Some(Arc::new(
                move |context: GroupContext| -> BoxFuture<'static, ExposerResult<GroupExports>> {
                    futures::future::ready(init(context)).boxed()
                },
            )),
        }
    }

    /// A group that is named but has no init; rejected by `initialize_groups`.
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("has_init", &self.init.is_some())
            .finish()
    }
}

/// Reject malformed group lists before any init runs.
pub fn check_groups(groups: &[Group]) -> ExposerResult<()> {
    let mut seen = IndexSet::new();
    for (index, group) in groups.iter().enumerate() {
        if !is_identifier(&group.name) {
            return Err(Box::new(ExposerError::configuration(format!(
                "group #{} has invalid name '{}'",
                index + 1,
                group.name
            ))));
        }
        if !seen.insert(group.name.as_str()) {
            return Err(Box::new(ExposerError::configuration(format!(
                "group '{}' is declared more than once",
                group.name
            ))));
        }
        if group.init.is_none() {
            return Err(Box::new(ExposerError::configuration(format!(
                "group '{}' has no init function",
                group.name
            ))));
        }
    }
    Ok(())
}

/// Run every group's init in declaration order, collecting exported APIs.
///
/// Stops at the first failing group with `GroupInit`. Groups exporting no
/// APIs contribute no entry.
pub async fn initialize_groups(
    groups: &[Group],
    group_opts: &GroupOptions,
    logger: &Logger,
) -> ExposerResult<IndexMap<String, ApiMap>> {
    check_groups(groups)?;

    let mut collected = IndexMap::new();
    for group in groups {
        let Some(init) = &group.init else {
            continue;
        };
        let context = GroupContext {
            logger: logger.child(&group.name),
            options: group_opts.get(&group.name).cloned().unwrap_or_default(),
        };
        let span = context.logger.span().clone();
        debug!(group = %group.name, "initializing group");

        let exports = init(context).instrument(span).await.map_err(|source| {
            Box::new(ExposerError::new(ErrorKind::GroupInit {
                group: group.name.clone(),
                source,
            }))
        })?;

        match exports {
            GroupExports::Apis(apis) if !apis.is_empty() => {
                info!(group = %group.name, apis = apis.len(), "group initialized");
                collected.insert(group.name.clone(), apis);
            }
            _ => info!(group = %group.name, "group initialized without APIs"),
        }
    }
    Ok(collected)
}
