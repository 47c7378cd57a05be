//! The two request-level operations: look a product up, add a product.
//!
//! Both follow the same shape: validate the caller's input without touching
//! the store, run exactly one store call inside a named segment of the
//! request's [`TraceContext`], and attach any failure to that trace.

use std::future::Future;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::ServiceConfig;
use crate::error::{ProductError, StoreError};
use crate::store::{Lookup, NewProduct, Product, ProductStore};
use crate::trace::TraceContext;

pub const GET_SEGMENT: &str = "get-product";
pub const CREATE_SEGMENT: &str = "create-product";

/// Value of the first pair named `key`. Later repeats are ignored.
fn first_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

/// Parameters of a lookup. Code takes precedence when both are given.
#[derive(Debug, Clone, Default)]
pub struct GetQuery {
    pub code: Option<String>,
    pub name: Option<String>,
}

impl GetQuery {
    /// Build from decoded query pairs, keeping the first value of each key.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            code: first_value(pairs, "code"),
            name: first_value(pairs, "name"),
        }
    }

    pub fn by_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            code: None,
            name: Some(name.into()),
        }
    }

    /// Select the lookup flavor. Names are lowercased.
    pub fn lookup(&self) -> Result<Lookup, ProductError> {
        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_owned);

        if let Some(code) = present(&self.code) {
            Ok(Lookup::ByCode(code))
        } else if let Some(name) = present(&self.name) {
            Ok(Lookup::ByName(name.to_lowercase()))
        } else {
            Err(ProductError::validation(
                "either name or code must be provided for get",
            ))
        }
    }
}

/// Raw fields of an add request, exactly as submitted.
#[derive(Debug, Clone, Default)]
pub struct AddForm {
    pub code: String,
    pub name: String,
    pub price: String,
}

impl AddForm {
    /// Build from decoded form pairs; absent fields are empty and repeated
    /// keys keep their first value.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let field = |key: &str| first_value(pairs, key).unwrap_or_default();
        Self {
            code: field("code"),
            name: field("name"),
            price: field("price"),
        }
    }

    pub fn new(code: impl Into<String>, name: impl Into<String>, price: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            price: price.into(),
        }
    }

    /// Check presence first, then the price format. Nothing is written
    /// unless both pass. Surrounding whitespace makes a price invalid.
    pub fn validate(&self) -> Result<NewProduct, ProductError> {
        if self.code.is_empty() || self.name.is_empty() || self.price.is_empty() {
            return Err(ProductError::validation(
                "code, name, and price can not be empty",
            ));
        }

        let price = self.price.parse::<i64>().map_err(|e| {
            ProductError::validation(format!(
                "error converting {} to an integer: {e}",
                self.price
            ))
        })?;

        Ok(NewProduct {
            code: self.code.clone(),
            name: self.name.to_lowercase(),
            price,
        })
    }
}

/// Request-level operations over a shared store.
pub struct ProductService<S: ?Sized> {
    store: Arc<S>,
    config: ServiceConfig,
}

impl<S: ?Sized> Clone for ProductService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> ProductService<S>
where
    S: ProductStore + ?Sized,
{
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Look up the first product matching `query`.
    pub async fn get(&self, trace: &TraceContext, query: &GetQuery) -> Result<Product, ProductError> {
        let result = self.lookup(trace, query).await;
        notice_outside_segment(trace, &result);
        result
    }

    async fn lookup(&self, trace: &TraceContext, query: &GetQuery) -> Result<Product, ProductError> {
        let lookup = query.lookup()?;

        let found = self
            .in_segment(trace, GET_SEGMENT, self.store.first(&lookup))
            .await?;

        found.ok_or_else(|| ProductError::NotFound {
            field: lookup.field(),
            value: lookup.value().to_string(),
        })
    }

    /// Validate `form` and insert a new product.
    ///
    /// Not idempotent: identical forms create distinct records.
    pub async fn add(&self, trace: &TraceContext, form: &AddForm) -> Result<Product, ProductError> {
        let result = self.create(trace, form).await;
        notice_outside_segment(trace, &result);
        result
    }

    async fn create(&self, trace: &TraceContext, form: &AddForm) -> Result<Product, ProductError> {
        let product = form.validate()?;
        let created = self
            .in_segment(trace, CREATE_SEGMENT, self.store.create(product))
            .await?;
        tracing::info!(
            parent: trace.span(),
            product.id = created.id,
            product.code = %created.code,
            "Product created"
        );
        Ok(created)
    }

    /// Run one store call inside a segment, bounded by the store timeout.
    /// A failure is recorded on the trace by the segment itself.
    async fn in_segment<T, F>(
        &self,
        trace: &TraceContext,
        name: &'static str,
        call: F,
    ) -> Result<T, ProductError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let segment = trace.start_segment(name);
        let timeout = self.config.store_timeout;

        let result = tokio::time::timeout(timeout, call)
            .instrument(segment.span().clone())
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)));

        match result {
            Ok(value) => {
                segment.end();
                Ok(value)
            }
            Err(e) => {
                let err = ProductError::from(e);
                segment.fail(&err);
                Err(err)
            }
        }
    }
}

/// Notice errors raised outside a store segment. Store failures were
/// already attached by [`SegmentGuard::fail`](crate::trace::SegmentGuard::fail).
fn notice_outside_segment<T>(trace: &TraceContext, result: &Result<T, ProductError>) {
    match result {
        Ok(_) | Err(ProductError::Store(_)) => {}
        Err(e) => trace.notice_error(e.class(), e.internal_message()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use sea_orm::{DbErr, RuntimeErr};

    use super::*;
    use crate::store::tests::memory_store;
    use crate::store::SeaOrmStore;
    use crate::trace::{SegmentOutcome, TraceId};

    fn trace() -> TraceContext {
        TraceContext::new("test", TraceId::generate())
    }

    async fn service() -> ProductService<SeaOrmStore> {
        ProductService::new(Arc::new(memory_store().await), ServiceConfig::default())
    }

    /// Counts calls and fails or stalls on demand.
    #[derive(Default)]
    struct ScriptedStore {
        calls: AtomicUsize,
        stall: bool,
    }

    #[async_trait]
    impl ProductStore for ScriptedStore {
        async fn first(&self, _lookup: &Lookup) -> Result<Option<Product>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                std::future::pending::<()>().await;
            }
            Err(StoreError::Database(DbErr::Conn(RuntimeErr::Internal(
                "dial tcp 127.0.0.1:3306: connect: connection refused".into(),
            ))))
        }

        async fn create(&self, product: NewProduct) -> Result<Product, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            Ok(Product {
                id: 1,
                code: product.code,
                name: product.name,
                price: product.price,
                created_at: now,
                updated_at: now,
            })
        }
    }

    #[tokio::test]
    async fn test_add_then_get_by_code() {
        let service = service().await;
        let trace = trace();

        let created = service
            .add(&trace, &AddForm::new("D42", "Widget", "100"))
            .await
            .unwrap();
        assert_eq!(created.name, "widget");

        let found = service.get(&trace, &GetQuery::by_code("D42")).await.unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.name, "widget");
        assert_eq!(found.price, 100);
    }

    #[tokio::test]
    async fn test_name_lookup_ignores_case() {
        let service = service().await;
        let trace = trace();
        service
            .add(&trace, &AddForm::new("D42", "Widget", "100"))
            .await
            .unwrap();

        for name in ["widget", "WIDGET", "wIdGeT"] {
            let found = service.get(&trace, &GetQuery::by_name(name)).await.unwrap();
            assert_eq!(found.code, "D42");
        }
    }

    #[tokio::test]
    async fn test_code_wins_over_name() {
        let service = service().await;
        let trace = trace();
        service.add(&trace, &AddForm::new("A1", "alpha", "1")).await.unwrap();
        service.add(&trace, &AddForm::new("B2", "beta", "2")).await.unwrap();

        let query = GetQuery {
            code: Some("B2".into()),
            name: Some("alpha".into()),
        };
        assert_eq!(service.get(&trace, &query).await.unwrap().code, "B2");
    }

    #[tokio::test]
    async fn test_get_without_parameters_never_reaches_store() {
        let store = Arc::new(ScriptedStore::default());
        let service = ProductService::new(store.clone(), ServiceConfig::default());
        let trace = trace();

        let query = GetQuery {
            code: Some(String::new()),
            name: None,
        };
        let err = service.get(&trace, &query).await.unwrap_err();

        assert!(matches!(err, ProductError::Validation(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(trace.segments().is_empty());
        assert_eq!(trace.errors()[0].class, "ValidationError");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let service = service().await;
        let trace = trace();

        let err = service
            .get(&trace, &GetQuery::by_code("missing"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProductError::NotFound { field: "code", .. }));
        let segments = trace.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, GET_SEGMENT);
        assert_eq!(segments[0].outcome, Some(SegmentOutcome::Ok));
    }

    #[tokio::test]
    async fn test_empty_fields_are_rejected_before_store() {
        let service = service().await;
        let trace = trace();

        for form in [
            AddForm::new("", "widget", "100"),
            AddForm::new("D42", "", "100"),
            AddForm::new("D42", "widget", ""),
        ] {
            let err = service.add(&trace, &form).await.unwrap_err();
            assert!(matches!(err, ProductError::Validation(_)));
        }

        assert_eq!(service.store().count().await.unwrap(), 0);
        assert!(trace.segments().is_empty());
    }

    #[tokio::test]
    async fn test_non_numeric_price_is_rejected_before_store() {
        let service = service().await;
        let trace = trace();

        let err = service
            .add(&trace, &AddForm::new("D42", "widget", "ten"))
            .await
            .unwrap_err();

        match err {
            ProductError::Validation(message) => assert!(message.contains("ten")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(service.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_is_not_idempotent() {
        let service = service().await;
        let trace = trace();
        let form = AddForm::new("D42", "widget", "100");

        let a = service.add(&trace, &form).await.unwrap();
        let b = service.add(&trace, &form).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(service.store().count().await.unwrap(), 2);
        assert_eq!(trace.segments().len(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_attached_to_trace() {
        let store = Arc::new(ScriptedStore::default());
        let service = ProductService::new(store, ServiceConfig::default());
        let trace = trace();

        let err = service
            .get(&trace, &GetQuery::by_name("widget"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProductError::Store(StoreError::Database(_))));
        assert_eq!(trace.segments()[0].outcome, Some(SegmentOutcome::Error));
        let errors = trace.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_closes_segment() {
        let store = Arc::new(ScriptedStore {
            stall: true,
            ..ScriptedStore::default()
        });
        let config = ServiceConfig::default().with_store_timeout(Duration::from_millis(50));
        let service = ProductService::new(store, config);
        let trace = trace();

        let err = service
            .get(&trace, &GetQuery::by_code("D42"))
            .await
            .unwrap_err();

        assert!(matches!(err, ProductError::Store(StoreError::Timeout(_))));
        let finished = trace.finish(500);
        assert_eq!(finished.open_segments(), 0);
        assert_eq!(finished.segments[0].outcome, Some(SegmentOutcome::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_aborts_segment() {
        let store = Arc::new(ScriptedStore {
            stall: true,
            ..ScriptedStore::default()
        });
        let config = ServiceConfig::default().with_store_timeout(Duration::from_secs(60));
        let service = ProductService::new(store, config);
        let trace = trace();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            service.get(&trace, &GetQuery::by_code("D42")),
        )
        .await;
        assert!(cancelled.is_err());

        let segments = trace.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].outcome, Some(SegmentOutcome::Aborted));
    }

    #[test]
    fn test_add_form_validation() {
        let product = AddForm::new("D42", "Widget", "100").validate().unwrap();
        assert_eq!(
            product,
            NewProduct {
                code: "D42".into(),
                name: "widget".into(),
                price: 100,
            }
        );

        let err = AddForm::new("D42", "Widget", "1.5").validate().unwrap_err();
        assert!(err.to_string().contains("error converting 1.5 to an integer"));

        let err = AddForm::new("D42", "Widget", " 100").validate().unwrap_err();
        assert!(err.to_string().contains("error converting  100 to an integer"));

        assert_eq!(AddForm::new("D42", "Widget", "007").validate().unwrap().price, 7);
    }

    #[test]
    fn test_repeated_keys_keep_first_value() {
        let pairs = |raw: &[(&str, &str)]| {
            raw.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        };

        let query = GetQuery::from_pairs(&pairs(&[("code", "A"), ("code", "B")]));
        assert_eq!(query.lookup().unwrap(), Lookup::ByCode("A".into()));

        let query = GetQuery::from_pairs(&pairs(&[("name", "Widget"), ("other", "x")]));
        assert_eq!(query.lookup().unwrap(), Lookup::ByName("widget".into()));

        let form = AddForm::from_pairs(&pairs(&[
            ("code", "D42"),
            ("name", "widget"),
            ("price", "100"),
            ("price", "200"),
        ]));
        assert_eq!(form.price, "100");

        let form = AddForm::from_pairs(&pairs(&[("code", "D42")]));
        assert!(form.name.is_empty());
        assert!(form.validate().is_err());
    }
}
