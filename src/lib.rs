//! # product-tracing
//!
//! A small product service whose every request is traced end to end: the
//! HTTP handler, the data-access call and the response write each run in a
//! named segment of a per-request trace, and every SQL statement issued by
//! SeaORM gets its own span nested underneath.
//!
//! ## Request lifecycle
//!
//! 1. A [`TraceContext`] is started from the request headers
//!    (`traceparent`, then `x-request-id`, else a fresh id).
//! 2. Input is validated. Invalid input never reaches the store.
//! 3. Exactly one store call runs inside a `get-product` or
//!    `create-product` segment, bounded by the store timeout.
//! 4. The outcome is written in an `ok-response` or `error-response`
//!    segment. Store failures reach the caller only as `backend error`; the
//!    detail is noticed on the trace.
//! 5. The trace is finished with the response status and handed to the
//!    [`Monitor`]'s sink.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use product_tracing::prelude::*;
//!
//! let db = product_tracing::store::connect("sqlite::memory:", TracingConfig::default()).await?;
//! product_tracing::store::migrate(&db).await?;
//!
//! let state = AppState::new(
//!     Arc::new(SeaOrmStore::new(db)),
//!     Monitor::logging("gorm-demo"),
//!     ServiceConfig::default(),
//! );
//! let app = product_tracing::http::router(state, None);
//! ```
//!
//! ## Statement Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | "postgresql", "mysql", or "sqlite" |
//! | `db.operation` | SQL operation (SELECT, INSERT, UPDATE, DELETE) |
//! | `db.metric` | `Datastore/statement/<product>/<table>/<operation>` |
//! | `db.sql.table` | Target table name (when detectable) |
//! | `db.statement` | Full SQL query (when enabled) |
//! | `db.rows_affected` | Number of rows returned/affected |
//! | `otel.status_code` | "OK" or "ERROR" |
//! | `error.message` | Error details (on failure) |

mod config;
mod connection;
pub mod entity;
mod error;
pub mod http;
pub mod logging;
pub mod monitor;
mod parser;
pub mod response;
pub mod service;
pub mod store;
pub mod trace;

pub use config::{NotFoundPolicy, ServiceConfig, TracingConfig};
pub use connection::{TracedConnection, TracingExt};
pub use error::{ProductError, StoreError, BACKEND_ERROR};
pub use parser::{ParsedSql, SqlOperation};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::http::AppState;
    pub use crate::monitor::{LogSink, MemorySink, Monitor, TraceSink};
    pub use crate::service::{AddForm, GetQuery, ProductService};
    pub use crate::store::{Lookup, NewProduct, Product, ProductStore, SeaOrmStore};
    pub use crate::trace::{SegmentOutcome, TraceContext, TraceId};
    pub use crate::{
        NotFoundPolicy, ProductError, ServiceConfig, StoreError, TracedConnection, TracingConfig,
        TracingExt,
    };
}
