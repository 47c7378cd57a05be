//! Translation of operation outcomes into response bodies.
//!
//! Writing the response is measured in its own segment so formatting cost
//! shows up separately from store access.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::config::NotFoundPolicy;
use crate::error::ProductError;
use crate::store::Product;
use crate::trace::TraceContext;

pub const OK_SEGMENT: &str = "ok-response";
pub const ERROR_SEGMENT: &str = "error-response";

/// Status and plain-text body of a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl Reply {
    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

/// `"<name>,<code>: $<price>"`
pub fn describe_product(product: &Product) -> String {
    format!("{},{}: ${}", product.name, product.code, product.price)
}

/// `"Added Product: {Code: <code>, Name: <name>, Price: <price>}"`, with
/// the price echoed as the caller submitted it.
pub fn describe_added(product: &Product, submitted_price: &str) -> String {
    format!(
        "Added Product: {{Code: {}, Name: {}, Price: {}}}",
        product.code, product.name, submitted_price
    )
}

pub fn ok_response(trace: &TraceContext, message: String) -> Reply {
    let segment = trace.start_segment(OK_SEGMENT);
    let reply = Reply {
        status: StatusCode::OK,
        body: message,
    };
    segment.end();
    reply
}

/// `"<status> - <client message>"`; the internal description goes to the
/// log and the trace, never into the body.
pub fn error_response(trace: &TraceContext, err: &ProductError, policy: NotFoundPolicy) -> Reply {
    let segment = trace.start_segment(ERROR_SEGMENT);

    let status = StatusCode::from_u16(err.status(policy)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::warn!(
        parent: segment.span(),
        trace_id = %trace.id(),
        status = status.as_u16(),
        error.class = err.class(),
        "{}",
        err.internal_message()
    );

    let reply = Reply {
        status,
        body: format!("{} - {}", status.as_u16(), err.client_message(policy)),
    };
    segment.end();
    reply
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sea_orm::DbErr;

    use super::*;
    use crate::error::StoreError;
    use crate::trace::TraceId;

    fn widget() -> Product {
        let now = Utc::now();
        Product {
            id: 7,
            code: "D42".into(),
            name: "widget".into(),
            price: 100,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_success_bodies() {
        assert_eq!(describe_product(&widget()), "widget,D42: $100");
        assert_eq!(
            describe_added(&widget(), "100"),
            "Added Product: {Code: D42, Name: widget, Price: 100}"
        );
        assert_eq!(
            describe_added(&widget(), "0100"),
            "Added Product: {Code: D42, Name: widget, Price: 0100}"
        );
    }

    #[test]
    fn test_ok_response_has_its_own_segment() {
        let trace = TraceContext::new("test", TraceId::generate());
        let reply = ok_response(&trace, describe_product(&widget()));

        assert_eq!(reply.status_code(), 200);
        let segments = trace.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, OK_SEGMENT);
        assert!(!segments[0].is_open());
    }

    #[test]
    fn test_store_error_body_is_generic() {
        let trace = TraceContext::new("test", TraceId::generate());
        let err = ProductError::from(StoreError::Database(DbErr::Custom(
            "UNIQUE constraint failed: products.id".into(),
        )));

        let reply = error_response(&trace, &err, NotFoundPolicy::BackendError);

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body, "500 - backend error");
        assert_eq!(trace.segments()[0].name, ERROR_SEGMENT);
    }

    #[test]
    fn test_not_found_policy() {
        let trace = TraceContext::new("test", TraceId::generate());
        let err = ProductError::NotFound {
            field: "code",
            value: "missing".into(),
        };

        let reply = error_response(&trace, &err, NotFoundPolicy::BackendError);
        assert_eq!(reply.body, "500 - backend error");

        let reply = error_response(&trace, &err, NotFoundPolicy::NotFound);
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.body, "404 - not found");
    }

    #[test]
    fn test_validation_body() {
        let trace = TraceContext::new("test", TraceId::generate());
        let err = ProductError::validation("either name or code must be provided for get");

        let reply = error_response(&trace, &err, NotFoundPolicy::BackendError);
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            reply.body,
            "400 - bad request: either name or code must be provided for get"
        );
    }
}
