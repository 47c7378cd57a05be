//! HTTP surface: `GET /get`, `POST /add` and a static file fallback.
//!
//! Handlers are registered on an explicit [`Router`] built once at startup.
//! Each request gets its own [`TraceContext`](crate::trace::TraceContext),
//! which is passed by reference to the service and the response writers and
//! finished with the final status before the reply leaves the handler.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::error::ProductError;
use crate::monitor::Monitor;
use crate::response::{describe_added, describe_product, error_response, ok_response, Reply};
use crate::service::{AddForm, GetQuery, ProductService};
use crate::store::ProductStore;
use crate::trace::TraceContext;

/// Shared by every handler: the store-backed service and the monitor.
#[derive(Clone)]
pub struct AppState {
    service: ProductService<dyn ProductStore>,
    monitor: Monitor,
}

impl AppState {
    pub fn new(store: Arc<dyn ProductStore>, monitor: Monitor, config: ServiceConfig) -> Self {
        Self {
            service: ProductService::new(store, config),
            monitor,
        }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Translate `result`, then finish the trace with the reply's status.
    fn reply(&self, trace: TraceContext, result: Result<String, ProductError>) -> Reply {
        let reply = match result {
            Ok(message) => ok_response(&trace, message),
            Err(e) => error_response(&trace, &e, self.service.config().not_found_policy),
        };
        self.monitor.finish(trace, reply.status_code());
        reply
    }
}

/// Build the application router.
///
/// Unmatched paths are served from `static_root` when one is given.
pub fn router(state: AppState, static_root: Option<PathBuf>) -> Router {
    let mut router = Router::new()
        .route("/get", get(get_product))
        .route("/add", post(add_product))
        .with_state(state);

    if let Some(root) = static_root {
        router = router.fallback_service(ServeDir::new(root));
    }

    router.layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` completes, then drain in-flight requests.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "HTTP server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Malformed input is the caller's fault; record it like any other
/// validation failure.
fn malformed(trace: &TraceContext, detail: String) -> ProductError {
    let err = ProductError::validation(detail);
    trace.notice_error(err.class(), err.internal_message());
    err
}

type Pairs = Vec<(String, String)>;

async fn get_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<Pairs>, QueryRejection>,
) -> Reply {
    let trace = state.monitor.start_trace("GET /get", &headers);

    let result = match query {
        Ok(Query(pairs)) => state
            .service
            .get(&trace, &GetQuery::from_pairs(&pairs))
            .await
            .map(|product| describe_product(&product)),
        Err(rejection) => Err(malformed(&trace, rejection.body_text())),
    };

    state.reply(trace, result)
}

async fn add_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<Pairs>, FormRejection>,
) -> Reply {
    let trace = state.monitor.start_trace("POST /add", &headers);

    let result = match form {
        Ok(Form(pairs)) => {
            let form = AddForm::from_pairs(&pairs);
            state
                .service
                .add(&trace, &form)
                .await
                .map(|product| describe_added(&product, &form.price))
        }
        Err(rejection) => Err(malformed(&trace, rejection.body_text())),
    };

    state.reply(trace, result)
}
