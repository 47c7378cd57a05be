//! The `products` table.

use sea_orm::entity::prelude::*;

/// A persisted product.
///
/// `id`, `created_at` and `updated_at` are assigned by the store; `name` is
/// stored lowercase. Rows with a `deleted_at` are soft deleted and invisible
/// to lookups.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub code: String,
    #[sea_orm(indexed)]
    pub name: String,
    pub price: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Call-scoped copy of a live product, handed to request handlers.
///
/// Carries no soft-delete marker: only live rows are ever turned into one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Product {
    pub id: i32,
    pub code: String,
    pub name: String,
    pub price: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl From<Model> for Product {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            name: model.name,
            price: model.price,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_product_from_model() {
        let now = Utc::now();
        let model = Model {
            id: 3,
            code: "D42".into(),
            name: "widget".into(),
            price: 100,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let product = Product::from(model.clone());
        assert_eq!(product.id, model.id);
        assert_eq!(product.code, "D42");
        assert_eq!(product.price, 100);
        assert_eq!(product.updated_at, now);
    }
}
