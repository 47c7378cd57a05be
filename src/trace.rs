//! Per-request trace contexts and their timed segments.
//!
//! A [`TraceContext`] is created when a request enters the service and is
//! passed by reference to everything that should be attributed to that
//! request. Work is measured with [`SegmentGuard`]s: a guard closes its
//! segment on every exit path, so an early `return`, a `?` or a dropped
//! future still leaves the segment with an end time (marked
//! [`SegmentOutcome::Aborted`]).
//!
//! ```rust
//! use product_tracing::trace::{SegmentOutcome, TraceContext, TraceId};
//!
//! let trace = TraceContext::new("GET /get", TraceId::generate());
//! {
//!     let segment = trace.start_segment("get-product");
//!     segment.end();
//! }
//! let finished = trace.finish(200);
//! assert_eq!(finished.segments[0].outcome, Some(SegmentOutcome::Ok));
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{field, Span};
use uuid::Uuid;

use crate::error::ProductError;
use crate::monitor::TraceSink;

const TRACEPARENT: &str = "traceparent";
const REQUEST_ID: &str = "x-request-id";

/// Correlation id of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Id carried by the request, if any.
    ///
    /// Prefers the trace-id of a W3C `traceparent` header and falls back to
    /// `x-request-id`.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_traceparent)
            .or_else(|| {
                headers
                    .get(REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|id| !id.is_empty() && id.len() <= 128)
                    .filter(|id| id.chars().all(|c| c.is_ascii_graphic()))
                    .map(|id| Self(id.to_string()))
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `00-<32 hex trace-id>-<16 hex parent-id>-<2 hex flags>`
fn parse_traceparent(value: &str) -> Option<TraceId> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let parent_id = parts.next()?;
    let flags = parts.next()?;

    let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());
    if !is_hex(version, 2) || version == "ff" || !is_hex(parent_id, 16) || !is_hex(flags, 2) {
        return None;
    }
    if !is_hex(trace_id, 32) || trace_id.chars().all(|c| c == '0') {
        return None;
    }
    Some(TraceId(trace_id.to_ascii_lowercase()))
}

/// Handle for a segment within its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentId(usize);

/// How a segment was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Ok,
    Error,
    /// Closed by scope exit rather than explicitly: early return,
    /// cancellation, or the trace finishing first.
    Aborted,
}

impl SegmentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentOutcome::Ok => "ok",
            SegmentOutcome::Error => "error",
            SegmentOutcome::Aborted => "aborted",
        }
    }
}

/// A named, timed unit of work. Offsets are relative to the trace start.
#[derive(Debug, Clone)]
pub struct Segment {
    pub name: Cow<'static, str>,
    pub start: Duration,
    pub end: Option<Duration>,
    pub outcome: Option<SegmentOutcome>,
}

impl Segment {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_sub(self.start))
    }
}

/// An error attributed to a trace for operator visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticedError {
    pub class: String,
    pub message: String,
    pub at: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("segment {0} was never started")]
    UnknownSegment(usize),

    #[error("segment `{0}` already ended")]
    AlreadyClosed(String),
}

#[derive(Debug, Default)]
struct TraceState {
    segments: Vec<Segment>,
    errors: Vec<NoticedError>,
}

/// Everything recorded for one request, handed to the [`TraceSink`].
#[derive(Debug, Clone)]
pub struct FinishedTrace {
    pub id: TraceId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Final response status; `None` when the request was abandoned.
    pub status: Option<u16>,
    pub segments: Vec<Segment>,
    pub errors: Vec<NoticedError>,
}

impl FinishedTrace {
    pub fn segments_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Segment> + 'a {
        self.segments.iter().filter(move |s| s.name == name)
    }

    pub fn open_segments(&self) -> usize {
        self.segments.iter().filter(|s| s.is_open()).count()
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty() || self.status.map_or(true, |status| status >= 500)
    }
}

/// Per-request correlation object.
///
/// Owned by the request's handling flow and only ever lent out by
/// reference. The state sits behind a lock so `&TraceContext` can be held
/// across `.await` in a `Send` future.
pub struct TraceContext {
    id: TraceId,
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
    span: Span,
    state: Mutex<TraceState>,
    sink: Option<Arc<dyn TraceSink>>,
    finished: bool,
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("started_at", &self.started_at)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl TraceContext {
    /// A trace that is not reported anywhere when it finishes.
    pub fn new(name: impl Into<String>, id: TraceId) -> Self {
        let name = name.into();
        let span = tracing::info_span!(
            "transaction",
            otel.name = %name,
            trace_id = %id,
            http.status_code = field::Empty,
        );
        Self {
            id,
            name,
            started_at: Utc::now(),
            start: Instant::now(),
            span,
            state: Mutex::new(TraceState::default()),
            sink: None,
            finished: false,
        }
    }

    /// Trace for an inbound request; the id comes from its headers or is
    /// synthesized.
    pub fn from_headers(name: impl Into<String>, headers: &HeaderMap) -> Self {
        Self::new(
            name,
            TraceId::from_headers(headers).unwrap_or_else(TraceId::generate),
        )
    }

    /// Report to `sink` once finished or dropped.
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> &TraceId {
        &self.id
    }

    /// Whether this trace reports to exactly `sink` when it finishes.
    pub(crate) fn reports_to(&self, sink: &Arc<dyn TraceSink>) -> bool {
        self.sink.as_ref().is_some_and(|own| Arc::ptr_eq(own, sink))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Root span of the request; segment spans are its children.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Open a segment closed when the returned guard ends or drops.
    pub fn start_segment(&self, name: impl Into<Cow<'static, str>>) -> SegmentGuard<'_> {
        let name = name.into();
        let span = tracing::info_span!(
            parent: &self.span,
            "segment",
            otel.name = %name,
            trace_id = %self.id,
            outcome = field::Empty,
        );
        let id = self.open_segment(name);
        SegmentGuard {
            trace: self,
            id,
            span,
            closed: false,
        }
    }

    /// Open a segment that must be closed with [`end_segment`](Self::end_segment).
    ///
    /// Prefer [`start_segment`](Self::start_segment); segments left open
    /// here are only closed when the trace finishes.
    pub fn open_segment(&self, name: impl Into<Cow<'static, str>>) -> SegmentId {
        let start = self.start.elapsed();
        let mut state = self.state.lock();
        state.segments.push(Segment {
            name: name.into(),
            start,
            end: None,
            outcome: None,
        });
        SegmentId(state.segments.len() - 1)
    }

    /// Close a segment and return its duration.
    pub fn end_segment(
        &self,
        id: SegmentId,
        outcome: SegmentOutcome,
    ) -> Result<Duration, TraceError> {
        let now = self.start.elapsed();
        let mut state = self.state.lock();
        let segment = state
            .segments
            .get_mut(id.0)
            .ok_or(TraceError::UnknownSegment(id.0))?;
        if !segment.is_open() {
            return Err(TraceError::AlreadyClosed(segment.name.to_string()));
        }
        segment.end = Some(now);
        segment.outcome = Some(outcome);
        Ok(now.saturating_sub(segment.start))
    }

    /// Attach an error to this trace.
    pub fn notice_error(&self, class: impl Into<String>, message: impl Into<String>) {
        let at = self.start.elapsed();
        let class = class.into();
        let message = message.into();
        tracing::debug!(
            parent: &self.span,
            error.class = %class,
            error.message = %message,
            "Error noticed"
        );
        self.state.lock().errors.push(NoticedError { class, message, at });
    }

    /// Snapshot of the segments recorded so far.
    pub fn segments(&self) -> Vec<Segment> {
        self.state.lock().segments.clone()
    }

    /// Snapshot of the errors noticed so far.
    pub fn errors(&self) -> Vec<NoticedError> {
        self.state.lock().errors.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Close the trace with the final response status.
    pub fn finish(mut self, status: u16) -> FinishedTrace {
        self.seal(Some(status))
    }

    fn seal(&mut self, status: Option<u16>) -> FinishedTrace {
        self.finished = true;
        let duration = self.start.elapsed();
        let state = std::mem::take(&mut *self.state.lock());

        let mut segments = state.segments;
        for segment in segments.iter_mut().filter(|s| s.is_open()) {
            segment.end = Some(duration);
            segment.outcome = Some(SegmentOutcome::Aborted);
        }

        if let Some(status) = status {
            self.span.record("http.status_code", status);
        }

        let finished = FinishedTrace {
            id: self.id.clone(),
            name: self.name.clone(),
            started_at: self.started_at,
            duration,
            status,
            segments,
            errors: state.errors,
        };

        if let Some(sink) = &self.sink {
            sink.record(finished.clone());
        }
        finished
    }
}

impl Drop for TraceContext {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(parent: &self.span, "Trace dropped before finishing");
            self.seal(None);
        }
    }
}

/// Scoped ownership of one open segment.
///
/// Instrument the measured future with [`span`](Self::span) so spans
/// created inside it (database statements) nest under the segment.
#[must_use = "a segment guard ends its segment when dropped"]
pub struct SegmentGuard<'a> {
    trace: &'a TraceContext,
    id: SegmentId,
    span: Span,
    closed: bool,
}

impl SegmentGuard<'_> {
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Close the segment successfully.
    pub fn end(mut self) -> Duration {
        self.close(SegmentOutcome::Ok)
    }

    /// Close the segment as failed and attach `err` to the trace.
    pub fn fail(mut self, err: &ProductError) -> Duration {
        self.trace.notice_error(err.class(), err.internal_message());
        self.close(SegmentOutcome::Error)
    }

    fn close(&mut self, outcome: SegmentOutcome) -> Duration {
        self.closed = true;
        self.span.record("outcome", outcome.as_str());
        // The guard is the only holder of its id, so this cannot fail
        // unless the trace already sealed it.
        self.trace
            .end_segment(self.id, outcome)
            .unwrap_or_default()
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(parent: &self.span, "Segment closed by scope exit");
            self.close(SegmentOutcome::Aborted);
        }
    }
}
