//! Traced database connection wrapper.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, ExecResult, QueryResult, Statement,
};
use tracing::{field, Instrument, Span};

use crate::config::TracingConfig;
use crate::parser::ParsedSql;

/// A traced wrapper around SeaORM's `DatabaseConnection`.
///
/// Implements `ConnectionTrait`, so entities and active models accept it
/// wherever they accept a plain connection. Every statement runs inside a
/// `db.query` span that is a child of the current span: statements issued
/// while a request segment's span is entered (or instrumented) show up
/// under that segment.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use product_tracing::TracedConnection;
///
/// let db = Database::connect("sqlite::memory:").await?;
/// let traced = TracedConnection::from(db);
///
/// let products = product::Entity::find().all(&traced).await?;
/// ```
#[derive(Debug, Clone)]
pub struct TracedConnection {
    inner: DatabaseConnection,
    config: Arc<TracingConfig>,
}

impl TracedConnection {
    /// Create a new traced connection with the given configuration.
    pub fn new(connection: DatabaseConnection, config: TracingConfig) -> Self {
        Self {
            inner: connection,
            config: Arc::new(config),
        }
    }

    /// Create a new traced connection with default configuration.
    pub fn wrap(connection: DatabaseConnection) -> Self {
        Self::new(connection, TracingConfig::default())
    }

    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    fn db_system(&self) -> &'static str {
        match self.inner.get_database_backend() {
            DbBackend::Postgres => "postgresql",
            DbBackend::MySql => "mysql",
            DbBackend::Sqlite => "sqlite",
        }
    }

    fn statement_span(&self, stmt: &Statement) -> Span {
        let parsed = ParsedSql::parse(&stmt.sql);

        let span = tracing::info_span!(
            "db.query",
            otel.name = %parsed.span_name(),
            db.system = %self.db_system(),
            db.operation = %parsed.operation,
            db.metric = %parsed.metric_name(self.inner.get_database_backend()),
            db.sql.table = field::Empty,
            db.name = field::Empty,
            db.statement = field::Empty,
            db.parameters = field::Empty,
            db.rows_affected = field::Empty,
            db.duration_ms = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
            slow_query = field::Empty,
        );

        if let Some(collection) = &parsed.collection {
            span.record("db.sql.table", collection.as_str());
        }
        if let Some(db_name) = &self.config.database_name {
            span.record("db.name", db_name.as_str());
        }
        if self.config.log_statements {
            span.record("db.statement", stmt.sql.as_str());
        }
        if self.config.log_parameters {
            if let Some(values) = &stmt.values {
                span.record("db.parameters", field::debug(values));
            }
        }

        span
    }

    /// Run `query` inside `span` and record its outcome on the span.
    async fn observe<T, F>(&self, span: Span, query: F, rows: fn(&T) -> u64) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        let start = Instant::now();
        let result = query.instrument(span.clone()).await;
        let elapsed = start.elapsed();

        span.record("db.duration_ms", elapsed.as_millis() as i64);

        if self.config.record_row_counts {
            if let Ok(value) = &result {
                span.record("db.rows_affected", rows(value));
            }
        }

        if elapsed > self.config.slow_query_threshold {
            span.record("slow_query", true);
            tracing::warn!(
                parent: &span,
                duration_ms = elapsed.as_millis() as i64,
                threshold_ms = self.config.slow_query_threshold.as_millis() as i64,
                "Slow query detected"
            );
        }

        match &result {
            Ok(_) => {
                span.record("otel.status_code", "OK");
            }
            Err(e) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.message", e.to_string().as_str());
                tracing::error!(parent: &span, error = %e, "Database query failed");
            }
        }

        result
    }
}

impl From<DatabaseConnection> for TracedConnection {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}

impl AsRef<DatabaseConnection> for TracedConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

#[async_trait]
impl ConnectionTrait for TracedConnection {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let span = self.statement_span(&stmt);
        self.observe(span, self.inner.execute(stmt), |r: &ExecResult| r.rows_affected())
            .await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let stmt = Statement::from_string(self.get_database_backend(), sql);
        let span = self.statement_span(&stmt);
        self.observe(span, self.inner.execute_unprepared(sql), |r: &ExecResult| {
            r.rows_affected()
        })
        .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let span = self.statement_span(&stmt);
        self.observe(span, self.inner.query_one(stmt), |row: &Option<QueryResult>| {
            row.is_some() as u64
        })
        .await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let span = self.statement_span(&stmt);
        self.observe(span, self.inner.query_all(stmt), |rows: &Vec<QueryResult>| {
            rows.len() as u64
        })
        .await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait TracingExt {
    /// Wrap this connection with tracing instrumentation.
    fn with_tracing(self) -> TracedConnection;

    /// Wrap this connection with custom tracing configuration.
    fn with_tracing_config(self, config: TracingConfig) -> TracedConnection;
}

impl TracingExt for DatabaseConnection {
    fn with_tracing(self) -> TracedConnection {
        TracedConnection::wrap(self)
    }

    fn with_tracing_config(self, config: TracingConfig) -> TracedConnection {
        TracedConnection::new(self, config)
    }
}
