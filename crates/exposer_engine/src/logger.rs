use tracing::Span;

/* 📖 # Why hand a Logger to group inits instead of calling tracing directly?

Group inits run inside the pipeline, but their log lines belong to the group. The Logger
carries a span named after the service (and a child span per group), so every line a group
emits is tagged with where it came from, and tests can pass their own logger in.
*/

/// Span-scoped logger injected into group initialization.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Root logger of an exposed service.
    pub fn new(service: &str) -> Self {
        Self {
            span: tracing::info_span!("exposer", service = %service),
        }
    }

    /// Logger for one group, nested under this one.
    pub fn child(&self, group: &str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "group", group = %group),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!("{}", message));
    }

    pub fn info(&self, message: &str) {
        self.span.in_scope(|| tracing::info!("{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| tracing::warn!("{}", message));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| tracing::error!("{}", message));
    }
}
