//! Configuration for database tracing and request handling.

use std::time::Duration;

/// Options controlling the `db.query` spans emitted by
/// [`TracedConnection`](crate::TracedConnection).
///
/// # Example
///
/// ```rust
/// use product_tracing::TracingConfig;
/// use std::time::Duration;
///
/// let config = TracingConfig::default()
///     .with_statement_logging(true)
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to include the SQL statement in spans.
    /// Default: `false`
    pub log_statements: bool,

    /// Whether to include bound query values in spans.
    /// Default: `false` (values are user input: product codes and names)
    pub log_parameters: bool,

    /// Statements slower than this are logged at WARN level.
    /// Default: 500ms
    pub slow_query_threshold: Duration,

    /// Whether to record the number of rows affected/returned.
    /// Default: `true`
    pub record_row_counts: bool,

    /// Database name attached to every span as `db.name`.
    /// Default: `None`
    pub database_name: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_statements: false,
            log_parameters: false,
            slow_query_threshold: Duration::from_millis(500),
            record_row_counts: true,
            database_name: None,
        }
    }
}

impl TracingConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable SQL statement logging in spans.
    pub fn with_statement_logging(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Enable or disable logging of bound values in spans.
    pub fn with_parameter_logging(mut self, enabled: bool) -> Self {
        self.log_parameters = enabled;
        self
    }

    /// Set the threshold for slow query warnings.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Enable or disable row count recording.
    pub fn with_row_count_recording(mut self, enabled: bool) -> Self {
        self.record_row_counts = enabled;
        self
    }

    /// Set a database name to include in spans.
    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }

    /// Full statement and parameter logging. Not for production.
    pub fn development() -> Self {
        Self {
            log_statements: true,
            log_parameters: true,
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// No statement text in spans, one second slow query threshold.
    pub fn production() -> Self {
        Self {
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}

/// How a lookup that matched no record is reported to the caller.
///
/// Earlier versions of the handlers disagreed on this, so it is chosen
/// explicitly at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    /// `500 - backend error`, indistinguishable from a store failure.
    #[default]
    BackendError,
    /// `404 - not found`.
    NotFound,
}

impl std::str::FromStr for NotFoundPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "backend-error" | "500" => Ok(Self::BackendError),
            "not-found" | "404" => Ok(Self::NotFound),
            other => Err(format!(
                "unknown not-found policy `{other}` (expected `backend-error` or `not-found`)"
            )),
        }
    }
}

/// Request handling options shared by every handler.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound for a single store call. Default: 5s
    pub store_timeout: Duration,

    /// Status mapping for lookups with no match.
    pub not_found_policy: NotFoundPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            not_found_policy: NotFoundPolicy::default(),
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_not_found_policy(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found_policy = policy;
        self
    }
}
