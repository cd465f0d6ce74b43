//! Local SQLite mirror of remote item collections
//!
//! One [`CachedItemStore`] connects an authenticated [`Session`] and a
//! SQLite database. Each cached app gets one data table holding the
//! full item document plus denormalized projection columns, and a row
//! in the `cached_apps` control table recording how that projection was
//! configured.
//!
//! The cache is a read-through, write-back mirror with no automatic
//! invalidation: it reflects the last [`CachedItemStore::cache_app`]
//! refresh plus any create/update calls routed through this store.
//! External mutation of the remote items is not detected.

use std::collections::{BTreeMap, HashMap};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{json, Value};

use crate::error::Error;
use crate::paging::{self, PageMethod};
use crate::record::Record;
use crate::schema::{AppConfig, AppConfigCache};
use crate::session::Session;

/// Projection configuration for one cached app
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// External ids projected into their own text columns
    pub extra_fields: Vec<String>,
    /// External ids whose joined values form the `__natural_key` column
    pub natural_key: Option<Vec<String>>,
}

fn table_name(app_id: i64) -> String {
    format!("podio_app_{}", app_id)
}

/// Quote an identifier so arbitrary external ids survive as column names
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// List-valued configuration columns hold JSON arrays, so external ids
/// containing arbitrary characters survive the round trip.
fn decode_list(raw: Option<String>) -> Result<Vec<String>, Error> {
    match raw {
        Some(raw) if !raw.is_empty() => Ok(serde_json::from_str(&raw)?),
        _ => Ok(Vec::new()),
    }
}

/// Join natural-key components into one indexable string.
///
/// `\` and the separator are escaped inside components, so distinct
/// component lists never collide on the joined form.
fn natural_key_string<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|part| part.as_ref().replace('\\', "\\\\").replace('-', "\\-"))
        .collect::<Vec<_>>()
        .join("-")
}

fn constraint_to_duplicate(err: rusqlite::Error, context: String) -> Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
        if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::DuplicateNaturalKey(context);
        }
    }
    Error::Sqlite(err)
}

/// Make sure a document names its owning app; collection endpoints
/// sometimes omit it.
fn ensure_app_ref(item_data: &mut Value, app_id: i64) {
    let has_app_id = item_data
        .get("app")
        .and_then(|app| app.get("app_id"))
        .is_some();
    if !has_app_id {
        if let Some(obj) = item_data.as_object_mut() {
            obj.insert("app".to_string(), json!({ "app_id": app_id }));
        }
    }
}

/// A queryable local mirror of remote app item collections
pub struct CachedItemStore {
    conn: Connection,
    session: Session,
    schemas: AppConfigCache,
    configs: HashMap<String, CacheConfig>,
}

impl CachedItemStore {
    /// Connect a session and a SQLite database.
    ///
    /// Call [`CachedItemStore::init_cache`] afterwards to pick up the
    /// projection configuration persisted by earlier runs.
    pub fn new(conn: Connection, session: Session) -> Self {
        Self {
            conn,
            session,
            schemas: AppConfigCache::new(),
            configs: HashMap::new(),
        }
    }

    /// The underlying database connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The session used for remote calls
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Load the persisted cache configuration into memory.
    ///
    /// A database without a control table is a fresh cache and leaves
    /// the configuration empty.
    pub fn init_cache(&mut self) -> Result<(), Error> {
        let control_exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cached_apps'",
            [],
            |row| row.get(0),
        )?;
        if control_exists == 0 {
            log::debug!("No cached_apps control table yet, cache starts empty.");
            return Ok(());
        }
        let mut stmt = self
            .conn
            .prepare("SELECT table_name, extra_fields, natural_key FROM cached_apps")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (table, extra_fields, natural_key) = row?;
            let natural_key = {
                let components = decode_list(natural_key)?;
                if components.is_empty() {
                    None
                } else {
                    Some(components)
                }
            };
            self.configs.insert(
                table,
                CacheConfig {
                    extra_fields: decode_list(extra_fields)?,
                    natural_key,
                },
            );
        }
        log::debug!("Cache initialized with cache configuration: {:?}", self.configs);
        Ok(())
    }

    /// The memoized schema for an app, fetching it on first access
    pub async fn app_config(&mut self, app_id: i64) -> Result<AppConfig, Error> {
        self.schemas.get_or_fetch(&self.session, app_id).await
    }

    /// Explicitly drop a memoized schema
    pub fn invalidate_app_config(&mut self, app_id: i64) -> Option<AppConfig> {
        self.schemas.invalidate(app_id)
    }

    /// Create a local copy of all the items in one app.
    ///
    /// Idempotent setup and populate: the control row is upserted, the
    /// data table is created (columns are only ever added, never
    /// dropped), the full collection is fetched page by page and
    /// upserted row by row, and finally the unique natural-key index is
    /// created. Duplicate natural keys across remote items surface as
    /// [`Error::DuplicateNaturalKey`].
    ///
    /// Returns the number of items fetched.
    pub async fn cache_app(
        &mut self,
        app_id: i64,
        extra_fields: &[&str],
        natural_key: Option<&[&str]>,
    ) -> Result<usize, Error> {
        let table = table_name(app_id);
        let config = CacheConfig {
            extra_fields: extra_fields.iter().map(|s| s.to_string()).collect(),
            natural_key: natural_key
                .filter(|keys| !keys.is_empty())
                .map(|keys| keys.iter().map(|s| s.to_string()).collect()),
        };

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS cached_apps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT UNIQUE NOT NULL,
                extra_fields TEXT NULL,
                natural_key TEXT NULL)",
            [],
        )?;
        self.conn.execute(
            "INSERT INTO cached_apps (table_name, extra_fields, natural_key)
                 VALUES (?1, ?2, ?3)
             ON CONFLICT(table_name) DO UPDATE SET
                 extra_fields = excluded.extra_fields,
                 natural_key = excluded.natural_key",
            params![
                table,
                serde_json::to_string(&config.extra_fields)?,
                config
                    .natural_key
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;

        self.create_data_table(&table, &config)?;

        // INSERT OR REPLACE resolves unique-index conflicts by deleting
        // the other row, so the index is rebuilt around every population
        // pass; colliding keys must raise on a refresh too.
        if config.natural_key.is_some() {
            self.conn.execute(
                &format!("DROP INDEX IF EXISTS idx_{}_natural_key", app_id),
                [],
            )?;
        }

        let url = self.session.url(&format!("item/app/{}/filter/", app_id));
        let items = paging::fetch_collection(
            &self.session,
            &url,
            PageMethod::Post,
            self.session.options().page_size,
            None,
        )
        .await?;
        for item_data in &items {
            self.insert_item_data(app_id, item_data, &config)?;
        }

        if config.natural_key.is_some() {
            let idx_sql = format!(
                "CREATE UNIQUE INDEX idx_{}_natural_key ON {} (__natural_key)",
                app_id,
                quote_ident(&table)
            );
            log::debug!("{}", idx_sql);
            self.conn.execute(&idx_sql, []).map_err(|err| {
                constraint_to_duplicate(
                    err,
                    format!("duplicate natural keys while indexing {}", table),
                )
            })?;
        }

        self.configs.insert(table, config);
        Ok(items.len())
    }

    /// Create the per-app data table, adding any projection columns that
    /// an earlier run did not declare. Columns are never dropped.
    fn create_data_table(&self, table: &str, config: &CacheConfig) -> Result<(), Error> {
        let mut columns = vec![
            "item_id INTEGER PRIMARY KEY NOT NULL".to_string(),
            "item_data TEXT NULL".to_string(),
        ];
        if config.natural_key.is_some() {
            columns.push("__natural_key TEXT NULL".to_string());
        }
        for name in &config.extra_fields {
            columns.push(format!("{} TEXT NULL", quote_ident(name)));
        }
        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            columns.join(", ")
        );
        log::debug!("{}", create_sql);
        self.conn.execute(&create_sql, [])?;

        // The CREATE above is a no-op when the table already exists, so
        // newly requested projection columns are added here.
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<String>, _>>()?;

        let mut wanted: Vec<&str> = Vec::new();
        if config.natural_key.is_some() {
            wanted.push("__natural_key");
        }
        wanted.extend(config.extra_fields.iter().map(String::as_str));
        for name in wanted {
            if !existing.iter().any(|col| col == name) {
                let alter_sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} TEXT NULL",
                    quote_ident(table),
                    quote_ident(name)
                );
                log::debug!("{}", alter_sql);
                self.conn.execute(&alter_sql, [])?;
            }
        }
        Ok(())
    }

    /// Project one item document into its app's data table.
    ///
    /// The upsert is keyed on `item_id`, which makes population and
    /// individual updates the same idempotent operation.
    fn insert_item_data(
        &self,
        app_id: i64,
        item_data: &Value,
        config: &CacheConfig,
    ) -> Result<(), Error> {
        let mut item_data = item_data.clone();
        ensure_app_ref(&mut item_data, app_id);
        let record = Record::from_value(item_data.clone())?;

        let mut columns = vec!["item_id".to_string(), "item_data".to_string()];
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Integer(record.item_id()),
            SqlValue::Text(serde_json::to_string(&item_data)?),
        ];

        if let Some(keys) = &config.natural_key {
            let mut parts = Vec::new();
            for key in keys {
                let part = record
                    .get(key)?
                    .map(|value| value.column_string())
                    .unwrap_or_default();
                parts.push(part);
            }
            columns.push("__natural_key".to_string());
            values.push(SqlValue::Text(natural_key_string(&parts)));
        }

        for name in &config.extra_fields {
            let text = record
                .get(name)?
                .map(|value| value.column_string())
                .unwrap_or_default();
            columns.push(quote_ident(name));
            values.push(SqlValue::Text(text));
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(&table_name(app_id)),
            columns.join(", "),
            placeholders
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }

    fn stored_config(&self, app_id: i64) -> Result<CacheConfig, Error> {
        self.configs
            .get(&table_name(app_id))
            .cloned()
            .ok_or(Error::AppNotCached(app_id))
    }

    /// Run a lookup that must match exactly one row.
    ///
    /// Zero rows is a typed cache miss; two or more rows violate the
    /// uniqueness the lookups are defined on and are never coerced into
    /// "not found".
    fn find_one(&self, app_id: i64, sql: &str, params: Vec<SqlValue>) -> Result<Record, Error> {
        let shown_params = format!("{:?}", params);
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;

        match rows.len() {
            0 => Err(Error::not_found(format!(
                "SQL query: {}, parameters: {}",
                sql, shown_params
            ))),
            1 => {
                let item_data: Value = serde_json::from_str(&rows[0])?;
                let mut record = Record::from_value(item_data)?;
                // Attach the schema when it is already memoized; lookups
                // never trigger a remote round trip.
                if let Some(schema) = self.schemas.get(app_id) {
                    record = record.with_app_config(schema.clone());
                }
                Ok(record)
            }
            n => Err(Error::DuplicateNaturalKey(format!(
                "{} rows match query: {}",
                n, sql
            ))),
        }
    }

    /// Direct primary-key lookup
    pub fn get_by_id(&self, app_id: i64, item_id: i64) -> Result<Record, Error> {
        let sql = format!(
            "SELECT item_data FROM {} WHERE item_id = ?1",
            quote_ident(&table_name(app_id))
        );
        self.find_one(app_id, &sql, vec![SqlValue::Integer(item_id)])
    }

    /// Exact-match conjunction across projection columns
    pub fn get_by_join_ids(
        &self,
        app_id: i64,
        select_for: &BTreeMap<String, String>,
    ) -> Result<Record, Error> {
        let clauses: Vec<String> = select_for
            .keys()
            .map(|key| format!("{} = ?", quote_ident(key)))
            .collect();
        let sql = format!(
            "SELECT item_data FROM {} WHERE {}",
            quote_ident(&table_name(app_id)),
            clauses.join(" AND ")
        );
        let params = select_for
            .values()
            .map(|value| SqlValue::Text(value.clone()))
            .collect();
        self.find_one(app_id, &sql, params)
    }

    /// Like [`CachedItemStore::get_by_join_ids`], further restricted to
    /// an allow-list of item ids (e.g. the targets of a relation field).
    ///
    /// An empty allow-list is an immediate cache miss; no query with an
    /// always-false `IN ()` is ever issued.
    pub fn get_referenced(
        &self,
        app_id: i64,
        item_ids: &[i64],
        select_for: &BTreeMap<String, String>,
    ) -> Result<Record, Error> {
        if item_ids.is_empty() {
            return Err(Error::not_found("empty allow-list of item ids".to_string()));
        }
        let mut clauses: Vec<String> = select_for
            .keys()
            .map(|key| format!("{} = ?", quote_ident(key)))
            .collect();
        let ids: Vec<String> = item_ids.iter().map(|id| id.to_string()).collect();
        clauses.push(format!("item_id IN ({})", ids.join(", ")));
        let sql = format!(
            "SELECT item_data FROM {} WHERE {}",
            quote_ident(&table_name(app_id)),
            clauses.join(" AND ")
        );
        let params = select_for
            .values()
            .map(|value| SqlValue::Text(value.clone()))
            .collect();
        self.find_one(app_id, &sql, params)
    }

    /// Lookup by single- or multi-component natural key
    pub fn get_by_natural_key(&self, app_id: i64, key: &[&str]) -> Result<Record, Error> {
        let key_val = natural_key_string(key);
        let sql = format!(
            "SELECT item_data FROM {} WHERE __natural_key = ?1",
            quote_ident(&table_name(app_id))
        );
        self.find_one(app_id, &sql, vec![SqlValue::Text(key_val)])
    }

    /// Re-project a record into its cache row using the currently
    /// configured projections.
    pub fn update_item(&self, record: &Record) -> Result<(), Error> {
        let app_id = record
            .app_id()
            .ok_or_else(|| Error::invalid_value("item document carries no app id"))?;
        let config = self.stored_config(app_id)?;
        let item_data = record.to_value()?;
        self.insert_item_data(app_id, &item_data, &config)
    }

    /// Send a record's tainted fields to the remote service, then
    /// re-synchronize its cache row. A no-op when nothing is tainted.
    pub async fn save_item(&mut self, record: &mut Record) -> Result<(), Error> {
        if record.tainted().is_empty() {
            return Ok(());
        }
        let payload = record.as_podio_dict(Some(record.tainted()))?;
        let url = self.session.url(&format!("item/{}/value", record.item_id()));
        let response = self.session.put(&url, Some(&Value::Object(payload))).await?;
        Session::check(response).await?;
        self.update_item(record)?;
        record.clear_tainted();
        Ok(())
    }

    /// Create an item remotely and project the returned document into
    /// the cache. Returns a record wrapping the created document.
    pub async fn create_item(&mut self, app_id: i64, field_values: Value) -> Result<Record, Error> {
        let config = self.stored_config(app_id)?;
        let url = self.session.url(&format!("item/app/{}/", app_id));
        let payload = json!({ "fields": field_values });
        let response = self.session.post(&url, Some(&payload)).await?;
        let response = Session::check(response).await?;
        let mut item_data: Value = response.json().await?;
        ensure_app_ref(&mut item_data, app_id);
        self.insert_item_data(app_id, &item_data, &config)?;
        let mut record = Record::from_value(item_data)?;
        if let Some(schema) = self.schemas.get(app_id) {
            record = record.with_app_config(schema.clone());
        }
        Ok(record)
    }

    /// Deleting items, remotely or locally, is out of scope for this
    /// layer.
    pub fn delete_item(&self, _app_id: i64, _item_id: i64) -> Result<(), Error> {
        Err(Error::NotImplemented("delete_item"))
    }
}
