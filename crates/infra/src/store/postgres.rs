//! Postgres-backed document store.
//!
//! All collections live in one JSONB table:
//!
//! ```sql
//! CREATE TABLE batch_documents (
//!     id         BIGSERIAL PRIMARY KEY,
//!     collection TEXT  NOT NULL,
//!     body       JSONB NOT NULL
//! );
//! ```
//!
//! Values are stored in their tagged form (`{"Int": 3}`, `{"String": "x"}`,
//! `"Null"`). An immutable SQL function `<table>_key(jsonb)` unwraps the three
//! number tags to a bare JSON number and leaves everything else untouched, so
//! numbers compare by value across `Int`, `Float` and `Decimal`. Secondary
//! indexes are built on `<table>_key(body -> 'field')` and filters compare the
//! same expression, so `Eq` and `In` are answered from the index.
//!
//! Filters, sorting and paging are rendered to SQL in full:
//! - `Eq(field, Null)` becomes `body -> 'field' IS NULL OR ... = '"Null"'`
//! - an empty `In` matches nothing
//! - each sort field orders by type rank first (null, number, string, map,
//!   timestamp), then by value, with strings in byte order; ties fall back
//!   to insertion order
//!
//! ## Atomicity
//!
//! Every mutation runs in a transaction that first takes a transaction-scoped
//! advisory lock on `(table, collection)`. Mutations of one collection are
//! therefore serialized, which makes conditional updates and
//! `find_one_and_update` atomic across processes. Reads take no lock.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | `PoolTimedOut`, `PoolClosed`, `Io`, `Tls` | `Unavailable` |
//! | unique violation (`23505`) | `DuplicateKey` |
//! | anything else | `Backend` |
//!
//! The trait is synchronous: the store owns a small Tokio runtime and blocks on
//! it, so it must not be called from inside another async runtime.

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::query::{
    push_distinct, validate_document, Filter, FindOptions, IndexSpec, SortOrder, Update, UpdateResult,
    ID_FIELD,
};
use super::r#trait::{DocumentStore, StoreError};
use super::value::{Document, Value};

/// Postgres JSONB document store.
#[derive(Debug)]
pub struct PostgresDocumentStore {
    pool: PgPool,
    runtime: Runtime,
    table: String,
}

impl PostgresDocumentStore {
    /// Connect, then create the backing table if it does not exist.
    pub fn connect(url: &str, max_connections: u32, table: &str) -> Result<Self, StoreError> {
        if !is_identifier(table) {
            return Err(StoreError::Backend(format!("invalid table name '{table}'")));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self {
            pool,
            runtime,
            table: table.to_string(),
        };
        store.ensure_schema()?;
        info!(table = %store.table, "postgres document store ready");
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id BIGSERIAL PRIMARY KEY,
                collection TEXT NOT NULL,
                body JSONB NOT NULL
            )",
            t = self.table
        );
        let create_collection_index = format!(
            "CREATE INDEX IF NOT EXISTS {t}_collection_idx ON {t} (collection)",
            t = self.table
        );
        let create_key_function = format!(
            "CREATE OR REPLACE FUNCTION {f}(v jsonb) RETURNS jsonb
                LANGUAGE sql IMMUTABLE PARALLEL SAFE
                AS $$ SELECT CASE
                    WHEN v ? 'Int' THEN v -> 'Int'
                    WHEN v ? 'Float' THEN v -> 'Float'
                    WHEN v ? 'Decimal' THEN to_jsonb((v ->> 'Decimal')::numeric)
                    ELSE v
                END $$",
            f = key_function(&self.table)
        );

        self.runtime.block_on(async {
            sqlx::query(&create_table)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_table", e))?;
            sqlx::query(&create_collection_index)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_collection_index", e))?;
            sqlx::query(&create_key_function)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_key_function", e))?;
            Ok(())
        })
    }

    /// Rows of `collection` that satisfy `filter`, ordered and paged by
    /// `options`.
    async fn matching_rows(
        conn: &mut PgConnection,
        table: &str,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<(i64, Document)>, StoreError> {
        let selection = Selection::new(table, filter)?;
        let mut sql = format!(
            "SELECT id, body FROM {table} WHERE {} {}",
            selection.clause,
            order_by(&options.sort)
        );
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if options.skip > 0 {
            sql.push_str(&format!(" OFFSET {}", options.skip));
        }

        let mut query = sqlx::query(&sql).bind(collection);
        for bind in selection.binds {
            query = query.bind(bind);
        }
        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("select_documents", e))?;

        rows.iter().map(decode_row).collect()
    }

    /// First row in insertion order that satisfies `filter`.
    async fn first_match(
        conn: &mut PgConnection,
        table: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<(i64, Document)>, StoreError> {
        let rows =
            Self::matching_rows(conn, table, collection, filter, &FindOptions::new().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_row(
        conn: &mut PgConnection,
        table: &str,
        collection: &str,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let sql = format!("INSERT INTO {table} (collection, body) VALUES ($1, $2)");
        sqlx::query(&sql)
            .bind(collection)
            .bind(encode_body(doc)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    async fn update_row(
        conn: &mut PgConnection,
        table: &str,
        id: i64,
        doc: &Document,
    ) -> Result<(), StoreError> {
        let sql = format!("UPDATE {table} SET body = $1 WHERE id = $2");
        sqlx::query(&sql)
            .bind(encode_body(doc)?)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("update_document", e))?;
        Ok(())
    }

    async fn lock_collection(conn: &mut PgConnection, table: &str, collection: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{table}/{collection}"))
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("lock_collection", e))?;
        Ok(())
    }

    /// Shared body of `update_one` and `find_one_and_update`.
    fn locked_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<(UpdateResult, Option<Document>), StoreError> {
        let table = self.table.as_str();
        self.runtime.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;
            Self::lock_collection(&mut tx, table, collection).await?;

            let existing = Self::first_match(&mut tx, table, collection, filter).await?;

            let outcome = match existing {
                Some((id, mut doc)) => {
                    let modified = update.apply(&mut doc)?;
                    validate_document(&doc)?;
                    if modified {
                        Self::update_row(&mut tx, table, id, &doc).await?;
                    }
                    let result = UpdateResult {
                        matched: 1,
                        modified: u64::from(modified),
                        upserted: false,
                    };
                    (result, Some(doc))
                }
                None if upsert => {
                    let mut doc = filter.equalities();
                    update.apply(&mut doc)?;
                    doc.insert(ID_FIELD.to_string(), new_id());
                    validate_document(&doc)?;
                    Self::insert_row(&mut tx, table, collection, &doc).await?;
                    let result = UpdateResult {
                        matched: 0,
                        modified: 0,
                        upserted: true,
                    };
                    (result, Some(doc))
                }
                None => (UpdateResult::default(), None),
            };

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            Ok(outcome)
        })
    }
}

impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self, doc), fields(table = %self.table), err)]
    fn insert_one(&self, collection: &str, mut doc: Document) -> Result<(), StoreError> {
        validate_document(&doc)?;
        doc.entry(ID_FIELD.to_string()).or_insert_with(new_id);

        let table = self.table.as_str();
        self.runtime.block_on(async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("acquire", e))?;
            Self::insert_row(&mut conn, table, collection, &doc).await
        })
    }

    #[instrument(skip(self, filter, options), fields(table = %self.table), err)]
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let table = self.table.as_str();
        let rows = self.runtime.block_on(async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| map_sqlx_error("acquire", e))?;
            Self::matching_rows(&mut conn, table, collection, filter, options).await
        })?;

        debug!(collection, matched = rows.len(), "find");
        Ok(rows.into_iter().map(|(_, doc)| doc).collect())
    }

    #[instrument(skip(self, filter, update), fields(table = %self.table), err)]
    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        let (result, _) = self.locked_update(collection, filter, update, upsert)?;
        Ok(result)
    }

    #[instrument(skip(self, filter, update), fields(table = %self.table), err)]
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<Option<Document>, StoreError> {
        let (_, doc) = self.locked_update(collection, filter, update, upsert)?;
        Ok(doc)
    }

    #[instrument(skip(self, filter, doc), fields(table = %self.table), err)]
    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        mut doc: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        validate_document(&doc)?;

        let table = self.table.as_str();
        self.runtime.block_on(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;
            Self::lock_collection(&mut tx, table, collection).await?;

            let existing = Self::first_match(&mut tx, table, collection, filter).await?;

            let result = match existing {
                Some((id, current)) => {
                    let kept_id = current.get(ID_FIELD).cloned().unwrap_or_else(new_id);
                    doc.insert(ID_FIELD.to_string(), kept_id);
                    let modified = current != doc;
                    if modified {
                        Self::update_row(&mut tx, table, id, &doc).await?;
                    }
                    UpdateResult {
                        matched: 1,
                        modified: u64::from(modified),
                        upserted: false,
                    }
                }
                None if upsert => {
                    doc.insert(ID_FIELD.to_string(), new_id());
                    Self::insert_row(&mut tx, table, collection, &doc).await?;
                    UpdateResult {
                        matched: 0,
                        modified: 0,
                        upserted: true,
                    }
                }
                None => UpdateResult::default(),
            };

            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
            Ok(result)
        })
    }

    #[instrument(skip(self, filter), fields(table = %self.table), err)]
    fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let selection = Selection::new(&self.table, filter)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table, selection.clause
        );

        let count: i64 = self.runtime.block_on(async {
            let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(collection);
            for bind in selection.binds {
                query = query.bind(bind);
            }
            query
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("count_documents", e))
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[instrument(skip(self, filter), fields(table = %self.table), err)]
    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let docs = self.find(collection, filter, &FindOptions::new())?;
        let mut out = Vec::new();
        for value in docs.iter().filter_map(|d| d.get(field)) {
            push_distinct(&mut out, value);
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let sql = index_sql(&self.table, collection, index);
        self.runtime.block_on(async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_index", e))
        })?;
        Ok(())
    }
}

fn new_id() -> Value {
    Value::String(Uuid::now_v7().to_string())
}

fn key_function(table: &str) -> String {
    format!("{table}_key")
}

fn field_path(field: &str) -> String {
    format!("(body -> '{}')", quote_literal(field))
}

/// `WHERE` clause of a filter. `$1` is the collection, filter values follow.
#[derive(Debug)]
struct Selection {
    clause: String,
    binds: Vec<serde_json::Value>,
}

impl Selection {
    fn new(table: &str, filter: &Filter) -> Result<Self, StoreError> {
        let mut selection = Selection {
            clause: "collection = $1".to_string(),
            binds: Vec::new(),
        };
        selection.push(&key_function(table), filter)?;
        Ok(selection)
    }

    fn push(&mut self, key: &str, filter: &Filter) -> Result<(), StoreError> {
        let condition = match filter {
            Filter::All => return Ok(()),
            Filter::Eq(field, value) => self.condition(key, field, std::slice::from_ref(value))?,
            Filter::In(field, values) => self.condition(key, field, values)?,
            Filter::And(filters) => {
                for filter in filters {
                    self.push(key, filter)?;
                }
                return Ok(());
            }
        };
        self.clause.push_str(" AND ");
        self.clause.push_str(&condition);
        Ok(())
    }

    fn condition(&mut self, key: &str, field: &str, candidates: &[Value]) -> Result<String, StoreError> {
        let path = field_path(field);
        let mut placeholders = Vec::new();
        let mut matches_null = false;
        for candidate in candidates {
            if candidate.is_null() {
                matches_null = true;
            } else {
                self.binds.push(encode_value(candidate)?);
                placeholders.push(format!("{key}(${})", self.binds.len() + 1));
            }
        }

        let mut alternatives = Vec::new();
        match placeholders.as_slice() {
            [] => {}
            [one] => alternatives.push(format!("{key}({path}) = {one}")),
            many => alternatives.push(format!("{key}({path}) IN ({})", many.join(", "))),
        }
        if matches_null {
            alternatives.push(format!("{path} IS NULL OR {path} = '\"Null\"'::jsonb"));
        }

        Ok(match alternatives.as_slice() {
            [] => "FALSE".to_string(),
            [only] if !matches_null => only.clone(),
            _ => format!("({})", alternatives.join(" OR ")),
        })
    }
}

/// `ORDER BY` matching `Value::compare` field by field, then insertion order.
fn order_by(sort: &[(String, SortOrder)]) -> String {
    let mut keys = Vec::new();
    for (field, order) in sort {
        let dir = match order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let p = field_path(field);
        keys.push(format!(
            "CASE WHEN {p} IS NULL OR {p} = '\"Null\"'::jsonb THEN 0 \
             WHEN {p} ?| array['Int', 'Float', 'Decimal'] THEN 1 \
             WHEN {p} ? 'String' THEN 2 WHEN {p} ? 'Map' THEN 3 ELSE 4 END {dir}"
        ));
        keys.push(format!(
            "COALESCE(({p} ->> 'Int')::numeric, ({p} ->> 'Float')::numeric, ({p} ->> 'Decimal')::numeric) {dir}"
        ));
        keys.push(format!("({p} ->> 'String') COLLATE \"C\" {dir}"));
        keys.push(format!("({p} -> 'Map') {dir}"));
        keys.push(format!("({p} ->> 'Timestamp')::timestamptz {dir}"));
    }
    keys.push("id ASC".to_string());
    format!("ORDER BY {}", keys.join(", "))
}

fn index_sql(table: &str, collection: &str, index: &IndexSpec) -> String {
    let key = key_function(table);
    let keys = index
        .keys
        .iter()
        .map(|(field, order)| {
            let direction = match order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            format!("{key}({}) {direction}", field_path(field))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE {unique}INDEX IF NOT EXISTS {name} ON {table} ({keys}) WHERE collection = '{collection}'",
        unique = if index.unique { "UNIQUE " } else { "" },
        name = index_name(table, collection, index),
        collection = quote_literal(collection),
    )
}

/// serde_json turns NaN and the infinities into `null`, so they never reach it.
fn encode_body(doc: &Document) -> Result<serde_json::Value, StoreError> {
    validate_document(doc)?;
    serde_json::to_value(doc)
        .map_err(|e| StoreError::InvalidDocument(format!("document serialization failed: {e}")))
}

fn encode_value(value: &Value) -> Result<serde_json::Value, StoreError> {
    match value {
        Value::Float(f) if !f.is_finite() => {
            return Err(StoreError::InvalidDocument(format!(
                "filter holds non-finite number {f}"
            )));
        }
        Value::Map(nested) => validate_document(nested)?,
        _ => {}
    }
    serde_json::to_value(value)
        .map_err(|e| StoreError::InvalidDocument(format!("filter serialization failed: {e}")))
}

fn decode_row(row: &PgRow) -> Result<(i64, Document), StoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| StoreError::Backend(format!("failed to read row id: {e}")))?;
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| StoreError::Backend(format!("failed to read row body: {e}")))?;
    let doc = serde_json::from_value(body)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize document: {e}")))?;
    Ok((id, doc))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 48
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

fn quote_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Postgres identifiers are limited to 63 bytes.
fn index_name(table: &str, collection: &str, index: &IndexSpec) -> String {
    let raw = format!("{table}_{collection}_{}", index.name()).to_ascii_lowercase();
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    name.truncate(63);
    name
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {operation}: {e}")),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::DuplicateKey(format!("{operation}: {}", db_err.message()))
        }
        sqlx::Error::Database(db_err) => {
            StoreError::Backend(format!("database error in {operation}: {}", db_err.message()))
        }
        other => StoreError::Backend(format!("error in {operation}: {other}")),
    }
}
