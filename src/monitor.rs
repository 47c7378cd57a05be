//! The monitoring client: creates trace contexts and receives them back
//! once their request is over.

use std::sync::Arc;

use axum::http::HeaderMap;
use parking_lot::Mutex;

use crate::trace::{FinishedTrace, TraceContext, TraceId};

/// Destination for finished traces.
pub trait TraceSink: Send + Sync {
    fn record(&self, trace: FinishedTrace);
}

/// Reports every finished trace through `tracing`.
#[derive(Debug, Clone)]
pub struct LogSink {
    app_name: Arc<str>,
}

impl LogSink {
    pub fn new(app_name: impl Into<Arc<str>>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl TraceSink for LogSink {
    fn record(&self, trace: FinishedTrace) {
        let segments = trace
            .segments
            .iter()
            .map(|s| {
                let millis = s.duration().unwrap_or_default().as_secs_f64() * 1000.0;
                let outcome = s.outcome.map(|o| o.as_str()).unwrap_or("open");
                format!("{}={:.3}ms/{}", s.name, millis, outcome)
            })
            .collect::<Vec<_>>()
            .join(",");

        match trace.status {
            Some(status) => tracing::info!(
                app = %self.app_name,
                trace_id = %trace.id,
                transaction = %trace.name,
                status,
                duration_ms = trace.duration.as_millis() as u64,
                segments = %segments,
                errors = trace.errors.len(),
                "Transaction finished"
            ),
            None => tracing::warn!(
                app = %self.app_name,
                trace_id = %trace.id,
                transaction = %trace.name,
                duration_ms = trace.duration.as_millis() as u64,
                segments = %segments,
                "Transaction abandoned before a response was produced"
            ),
        }

        for error in &trace.errors {
            tracing::error!(
                app = %self.app_name,
                trace_id = %trace.id,
                transaction = %trace.name,
                error.class = %error.class,
                error.message = %error.message,
                "Transaction error"
            );
        }
    }
}

/// Keeps finished traces in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    traces: Mutex<Vec<FinishedTrace>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<FinishedTrace> {
        self.traces.lock().clone()
    }

    pub fn last(&self) -> Option<FinishedTrace> {
        self.traces.lock().last().cloned()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, trace: FinishedTrace) {
        self.traces.lock().push(trace);
    }
}

/// Shared handle every request uses to start its trace.
#[derive(Clone)]
pub struct Monitor {
    app_name: Arc<str>,
    sink: Arc<dyn TraceSink>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(app_name: impl Into<Arc<str>>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            app_name: app_name.into(),
            sink,
        }
    }

    /// Monitor reporting through [`LogSink`].
    pub fn logging(app_name: impl Into<Arc<str>>) -> Self {
        let app_name = app_name.into();
        let sink = Arc::new(LogSink::new(app_name.clone()));
        Self::new(app_name, sink)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Trace for an inbound request, correlated with its headers.
    pub fn start_trace(&self, name: impl Into<String>, headers: &HeaderMap) -> TraceContext {
        TraceContext::from_headers(name, headers).with_sink(self.sink.clone())
    }

    /// Trace for work not triggered by a request.
    pub fn start_background_trace(&self, name: impl Into<String>) -> TraceContext {
        TraceContext::new(name, TraceId::generate()).with_sink(self.sink.clone())
    }

    /// Close `trace` with `status` and report it to this monitor's sink.
    ///
    /// A trace started elsewhere is reported here as well as to any sink it
    /// already carries.
    pub fn finish(&self, trace: TraceContext, status: u16) -> FinishedTrace {
        let reported = trace.reports_to(&self.sink);
        let finished = trace.finish(status);
        if !reported {
            self.sink.record(finished.clone());
        }
        finished
    }
}
