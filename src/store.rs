//! Record store for products.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Schema, Set,
};

use crate::config::TracingConfig;
use crate::connection::{TracedConnection, TracingExt};
use crate::entity::product;
use crate::error::StoreError;

pub use crate::entity::product::Product;

/// Recycle period for the single in-memory SQLite connection. Closing it
/// would drop the database, so it is effectively never recycled.
const MEMORY_CONNECTION_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Field values for a product that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub price: i64,
}

/// Equality lookup on one of the two string keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    ByCode(String),
    ByName(String),
}

impl Lookup {
    pub fn field(&self) -> &'static str {
        match self {
            Lookup::ByCode(_) => "code",
            Lookup::ByName(_) => "name",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Lookup::ByCode(value) | Lookup::ByName(value) => value,
        }
    }
}

/// What request handlers need from storage.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// First live record matching `lookup`, by ascending id.
    async fn first(&self, lookup: &Lookup) -> Result<Option<Product>, StoreError>;

    /// Insert a record; the store assigns id and timestamps.
    async fn create(&self, product: NewProduct) -> Result<Product, StoreError>;
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub price: Option<i64>,
}

/// Connect to `url` and wrap the connection for tracing.
pub async fn connect(url: &str, config: TracingConfig) -> Result<TracedConnection, DbErr> {
    let db = Database::connect(connect_options(url)).await?;
    Ok(db.with_tracing_config(config))
}

/// Pool options for `url`.
///
/// An in-memory SQLite database lives inside a single connection, so for
/// `:memory:` URLs the pool is pinned to exactly one connection that is
/// neither reaped when idle nor recycled by age.
fn connect_options(url: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(url);
    options.sqlx_logging(false);
    if url.starts_with("sqlite") && url.contains(":memory:") {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(MEMORY_CONNECTION_LIFETIME)
            .max_lifetime(MEMORY_CONNECTION_LIFETIME);
    }
    options
}

/// Create the `products` table and its indexes if they are missing.
pub async fn migrate<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut table = schema.create_table_from_entity(product::Entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(product::Entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }

    tracing::info!(table = "products", "Schema migrated");
    Ok(())
}

/// SeaORM-backed store. Soft-deleted rows are excluded from every read.
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: TracedConnection,
}

impl SeaOrmStore {
    pub fn new(db: TracedConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &TracedConnection {
        &self.db
    }

    fn live() -> sea_orm::Select<product::Entity> {
        product::Entity::find().filter(product::Column::DeletedAt.is_null())
    }

    async fn live_model(&self, id: i32) -> Result<Option<product::Model>, DbErr> {
        Self::live()
            .filter(product::Column::Id.eq(id))
            .one(&self.db)
            .await
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Product>, StoreError> {
        Ok(self.live_model(id).await?.map(Product::from))
    }

    /// Number of live records.
    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(Self::live().count(&self.db).await?)
    }

    pub async fn update_price(&self, id: i32, price: i64) -> Result<Product, StoreError> {
        self.update_fields(
            id,
            ProductChanges {
                price: Some(price),
                ..ProductChanges::default()
            },
        )
        .await
    }

    /// Write the `Some` fields of `changes` and bump `updated_at`.
    pub async fn update_fields(
        &self,
        id: i32,
        changes: ProductChanges,
    ) -> Result<Product, StoreError> {
        let current = self
            .live_model(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("product {id}")))?;

        let mut active: product::ActiveModel = current.into();
        if let Some(code) = changes.code {
            active.code = Set(code);
        }
        if let Some(name) = changes.name {
            active.name = Set(name.to_lowercase());
        }
        if let Some(price) = changes.price {
            active.price = Set(price);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&self.db).await?.into())
    }

    /// Mark a record deleted. Returns `false` if it was not live.
    pub async fn soft_delete(&self, id: i32) -> Result<bool, StoreError> {
        let result = product::Entity::update_many()
            .col_expr(product::Column::DeletedAt, Expr::value(Some(Utc::now())))
            .filter(product::Column::Id.eq(id))
            .filter(product::Column::DeletedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl ProductStore for SeaOrmStore {
    async fn first(&self, lookup: &Lookup) -> Result<Option<Product>, StoreError> {
        let query = match lookup {
            Lookup::ByCode(code) => Self::live().filter(product::Column::Code.eq(code.as_str())),
            Lookup::ByName(name) => Self::live().filter(product::Column::Name.eq(name.as_str())),
        };
        let found = query.order_by_asc(product::Column::Id).one(&self.db).await?;
        Ok(found.map(Product::from))
    }

    async fn create(&self, product: NewProduct) -> Result<Product, StoreError> {
        let now = Utc::now();
        let active = product::ActiveModel {
            code: Set(product.code),
            name: Set(product.name),
            price: Set(product.price),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
            ..Default::default()
        };
        Ok(active.insert(&self.db).await?.into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn memory_store() -> SeaOrmStore {
        let db = connect("sqlite::memory:", TracingConfig::default())
            .await
            .unwrap();
        migrate(&db).await.unwrap();
        SeaOrmStore::new(db)
    }

    fn widget(code: &str) -> NewProduct {
        NewProduct {
            code: code.into(),
            name: "widget".into(),
            price: 100,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_distinct_ids() {
        let store = memory_store().await;

        let a = store.create(widget("D42")).await.unwrap();
        let b = store.create(widget("D42")).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_first_returns_lowest_id() {
        let store = memory_store().await;
        let first = store.create(widget("D42")).await.unwrap();
        store.create(widget("D42")).await.unwrap();

        let found = store
            .first(&Lookup::ByCode("D42".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, first.id);

        let by_name = store
            .first(&Lookup::ByName("widget".into()))
            .await
            .unwrap();
        assert_eq!(by_name.map(|p| p.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_code_lookup_is_case_sensitive() {
        let store = memory_store().await;
        store.create(widget("D42")).await.unwrap();

        let found = store.first(&Lookup::ByCode("d42".into())).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_update_fields() {
        let store = memory_store().await;
        let created = store.create(widget("D42")).await.unwrap();

        let updated = store.update_price(created.id, 200).await.unwrap();
        assert_eq!(updated.price, 200);
        assert_eq!(updated.code, "D42");

        let updated = store
            .update_fields(
                created.id,
                ProductChanges {
                    code: Some("F42".into()),
                    name: Some("Gadget".into()),
                    price: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.code, "F42");
        assert_eq!(updated.name, "gadget");
        assert_eq!(updated.price, 200);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_record_fails() {
        let store = memory_store().await;
        let err = store.update_price(99, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(DbErr::RecordNotFound(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_record() {
        let store = memory_store().await;
        let created = store.create(widget("D42")).await.unwrap();

        assert!(store.soft_delete(created.id).await.unwrap());
        assert!(!store.soft_delete(created.id).await.unwrap());

        assert!(store.find_by_id(created.id).await.unwrap().is_none());
        let row = product::Entity::find_by_id(created.id)
            .one(store.connection())
            .await
            .unwrap()
            .unwrap();
        assert!(row.deleted_at.is_some());
        assert!(store
            .first(&Lookup::ByCode("D42".into()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_memory_pool_keeps_its_connection() {
        let options = connect_options("sqlite::memory:");
        assert_eq!(options.get_max_connections(), Some(1));
        assert_eq!(options.get_min_connections(), Some(1));
        assert!(options.get_idle_timeout().is_some());
        assert!(options.get_max_lifetime().is_some());

        let options = connect_options("sqlite://product.db?mode=rwc");
        assert_eq!(options.get_max_connections(), None);
        assert!(options.get_idle_timeout().is_none());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = memory_store().await;
        migrate(store.connection()).await.unwrap();
    }
}
