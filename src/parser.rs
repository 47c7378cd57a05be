//! SQL classification for span and datastore metric names.

use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::DbBackend;

/// Statement kinds distinguished in span names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Begin,
    Commit,
    Rollback,
    Set,
    Other,
}

impl SqlOperation {
    const KEYWORDS: [(&'static str, SqlOperation); 14] = [
        ("SELECT", SqlOperation::Select),
        ("WITH", SqlOperation::Select),
        ("INSERT", SqlOperation::Insert),
        ("UPDATE", SqlOperation::Update),
        ("DELETE", SqlOperation::Delete),
        ("CREATE", SqlOperation::Create),
        ("DROP", SqlOperation::Drop),
        ("ALTER", SqlOperation::Alter),
        ("TRUNCATE", SqlOperation::Truncate),
        ("BEGIN", SqlOperation::Begin),
        ("START", SqlOperation::Begin),
        ("COMMIT", SqlOperation::Commit),
        ("ROLLBACK", SqlOperation::Rollback),
        ("SET", SqlOperation::Set),
    ];

    /// Classify a statement by its leading keyword.
    pub fn classify(sql: &str) -> Self {
        let head: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();

        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == head)
            .map(|(_, op)| *op)
            .unwrap_or(SqlOperation::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Select => "SELECT",
            SqlOperation::Insert => "INSERT",
            SqlOperation::Update => "UPDATE",
            SqlOperation::Delete => "DELETE",
            SqlOperation::Create => "CREATE",
            SqlOperation::Drop => "DROP",
            SqlOperation::Alter => "ALTER",
            SqlOperation::Truncate => "TRUNCATE",
            SqlOperation::Begin => "BEGIN",
            SqlOperation::Commit => "COMMIT",
            SqlOperation::Rollback => "ROLLBACK",
            SqlOperation::Set => "SET",
            SqlOperation::Other => "QUERY",
        }
    }

    fn has_collection(&self) -> bool {
        matches!(
            self,
            SqlOperation::Select
                | SqlOperation::Insert
                | SqlOperation::Update
                | SqlOperation::Delete
                | SqlOperation::Create
                | SqlOperation::Drop
                | SqlOperation::Alter
                | SqlOperation::Truncate
        )
    }
}

impl std::fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// First identifier after the clause keyword that names the target table.
static COLLECTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:FROM|INTO|UPDATE|TRUNCATE(?:\s+TABLE)?|TABLE(?:\s+IF\s+(?:NOT\s+)?EXISTS)?)\s+[`"\[]?(\w+)[`"\]]?"#,
    )
    .unwrap()
});

/// Operation and collection of one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    pub operation: SqlOperation,
    pub collection: Option<String>,
}

impl ParsedSql {
    pub fn parse(sql: &str) -> Self {
        let operation = SqlOperation::classify(sql);
        let collection = if operation.has_collection() {
            COLLECTION_REGEX
                .captures(sql)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_lowercase())
        } else {
            None
        };
        Self {
            operation,
            collection,
        }
    }

    /// Span name: `"SELECT products"`, or just the operation.
    pub fn span_name(&self) -> String {
        match &self.collection {
            Some(collection) => format!("{} {}", self.operation, collection),
            None => self.operation.to_string(),
        }
    }

    /// Datastore metric name, e.g. `Datastore/statement/SQLite/products/select`.
    ///
    /// Without a collection this degrades to
    /// `Datastore/operation/<product>/<operation>`.
    pub fn metric_name(&self, backend: DbBackend) -> String {
        let product = datastore_product(backend);
        let operation = self.operation.as_str().to_lowercase();
        match &self.collection {
            Some(collection) => {
                format!("Datastore/statement/{product}/{collection}/{operation}")
            }
            None => format!("Datastore/operation/{product}/{operation}"),
        }
    }
}

/// Product label used in datastore metric names.
pub fn datastore_product(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Postgres => "Postgres",
        DbBackend::MySql => "MySQL",
        DbBackend::Sqlite => "SQLite",
    }
}
