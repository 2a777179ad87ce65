//! Relational feature driver
//!
//! Stores one row per (feature, scope) in a SQLite table through an sqlx
//! pool. Requires the `database` feature to be enabled.
//!
//! Expected schema (see [`DatabaseDriver::create_table`]):
//!
//! ```sql
//! CREATE TABLE features (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     name TEXT NOT NULL,
//!     scope TEXT,
//!     value TEXT NOT NULL,
//!     created_at TEXT,
//!     updated_at TEXT,
//!     UNIQUE (name, scope)
//! );
//! ```

use crate::drivers::{Driver, DriverContext, FeatureScopes, ResolvedValues};
use crate::error::{FeatureError, FeatureResult};
use crate::scope::Scope;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{debug, info, trace};

/// Pairs per lookup query, kept well below SQLite's bind parameter limit.
const LOOKUP_CHUNK: usize = 1000;

/// Rows per insert statement.
const INSERT_CHUNK: usize = 1000;

/// Database-backed feature driver
#[derive(Debug, Clone)]
pub struct DatabaseDriver {
    context: DriverContext,
    pool: SqlitePool,
    table: String,
}

struct PendingRow {
    feature: String,
    key: String,
    value: Value,
    encoded: String,
}

type Pair = (String, String);

impl DatabaseDriver {
    /// Open a pool for the given database URL.
    ///
    /// The database file is created if it does not exist.
    pub async fn connect(
        context: DriverContext,
        url: &str,
        table: impl Into<String>,
        max_connections: u32,
    ) -> FeatureResult<Self> {
        debug!(store = %context.store(), url = %url, "Connecting to feature database");

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| FeatureError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| FeatureError::Connection(e.to_string()))?;

        Self::new(context, pool, table)
    }

    /// Create a driver on an existing pool.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `table` is not a plain identifier.
    pub fn new(
        context: DriverContext,
        pool: SqlitePool,
        table: impl Into<String>,
    ) -> FeatureResult<Self> {
        let table = table.into();
        validate_identifier(&table)?;

        Ok(Self {
            context,
            pool,
            table,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the features table if it does not exist.
    pub async fn create_table(&self) -> FeatureResult<()> {
        debug!(table = %self.table, "Creating features table");

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                scope TEXT,
                value TEXT NOT NULL,
                created_at TEXT,
                updated_at TEXT,
                UNIQUE (name, scope)
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        Ok(())
    }

    async fn retrieve(&self, feature: &str, key: &str) -> FeatureResult<Option<Value>> {
        let sql = format!(
            "SELECT value FROM {} WHERE name = ? AND scope = ?",
            self.table
        );
        let raw: Option<String> = sqlx::query_scalar(&sql)
            .bind(feature)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|raw| decode(&raw)).transpose()
    }

    /// Fetch stored values for many (feature, scope key) pairs.
    async fn retrieve_many(&self, pairs: &[Pair]) -> FeatureResult<HashMap<Pair, Value>> {
        let mut found = HashMap::new();

        for chunk in pairs.chunks(LOOKUP_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "SELECT name, scope, value FROM {} WHERE ",
                self.table
            ));

            let mut filters = query.separated(" OR ");
            for (feature, key) in chunk {
                filters
                    .push("(name = ")
                    .push_bind_unseparated(feature.clone())
                    .push_unseparated(" AND scope = ")
                    .push_bind_unseparated(key.clone())
                    .push_unseparated(")");
            }

            // `scope = ?` never matches a NULL scope, as in `retrieve`
            let rows: Vec<(String, String, String)> =
                query.build_query_as().fetch_all(&self.pool).await?;

            for (name, key, raw) in rows {
                found.insert((name, key), decode(&raw)?);
            }
        }

        Ok(found)
    }

    /// Insert resolved rows, skipping rows another writer stored first.
    ///
    /// Returns the number of rows inserted.
    async fn insert_many(&self, rows: &[PendingRow]) -> FeatureResult<u64> {
        let now = timestamp();
        let mut inserted = 0;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT INTO {} (name, scope, value, created_at, updated_at) ",
                self.table
            ));

            query.push_values(chunk, |mut row, pending| {
                row.push_bind(pending.feature.clone())
                    .push_bind(pending.key.clone())
                    .push_bind(pending.encoded.clone())
                    .push_bind(now.clone())
                    .push_bind(now.clone());
            });
            query.push(" ON CONFLICT (name, scope) DO NOTHING");

            inserted += query.build().execute(&self.pool).await?.rows_affected();
        }

        Ok(inserted)
    }
}

fn decode(raw: &str) -> FeatureResult<Value> {
    serde_json::from_str(raw)
        .map_err(|e| FeatureError::serialization(format!("stored value is not valid JSON: {}", e)))
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn validate_identifier(table: &str) -> FeatureResult<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(FeatureError::config(format!(
            "invalid feature table name: {table:?}"
        )))
    }
}

#[async_trait]
impl Driver for DatabaseDriver {
    fn context(&self) -> &DriverContext {
        &self.context
    }

    fn driver_name(&self) -> &'static str {
        "database"
    }

    async fn get_all(&self, features: &FeatureScopes) -> FeatureResult<ResolvedValues> {
        let mut pairs = Vec::new();
        for (feature, scopes) in features {
            for scope in scopes {
                pairs.push((feature.clone(), self.context.key(scope)));
            }
        }

        let mut stored = self.retrieve_many(&pairs).await?;
        debug!(
            store = %self.context.store(),
            requested = pairs.len(),
            stored = stored.len(),
            "Loaded stored feature values from database"
        );

        let mut pending = Vec::new();
        let mut unknown: HashSet<Pair> = HashSet::new();
        for ((feature, key), scope) in pairs.iter().zip(
            features
                .iter()
                .flat_map(|(_, scopes)| scopes.iter()),
        ) {
            let pair = (feature.clone(), key.clone());
            if stored.contains_key(&pair) || unknown.contains(&pair) {
                continue;
            }

            match self.context.resolve(feature, scope) {
                Some(value) => {
                    pending.push(PendingRow {
                        feature: feature.clone(),
                        key: key.clone(),
                        encoded: serde_json::to_string(&value)?,
                        value: value.clone(),
                    });
                    stored.insert(pair, value);
                }
                None => {
                    unknown.insert(pair);
                }
            }
        }

        if !pending.is_empty() {
            let inserted = self.insert_many(&pending).await?;

            if inserted == pending.len() as u64 {
                for row in &pending {
                    self.context.resolved(&row.feature, &row.key, &row.value);
                }
            } else {
                // Another writer stored some of these first; theirs win
                let contested: Vec<Pair> = pending
                    .iter()
                    .map(|row| (row.feature.clone(), row.key.clone()))
                    .collect();
                let current = self.retrieve_many(&contested).await?;

                for row in &pending {
                    let pair = (row.feature.clone(), row.key.clone());
                    match current.get(&pair) {
                        Some(value) if *value != row.value => {
                            stored.insert(pair, value.clone());
                        }
                        _ => self.context.resolved(&row.feature, &row.key, &row.value),
                    }
                }
            }
        }

        let mut results = ResolvedValues::with_capacity(features.len());
        let mut pairs = pairs.into_iter();
        for (feature, scopes) in features {
            let values = results.entry(feature.clone()).or_default();
            for pair in pairs.by_ref().take(scopes.len()) {
                values.push(stored.get(&pair).cloned().unwrap_or(Value::Bool(false)));
            }
        }

        Ok(results)
    }

    async fn get(&self, feature: &str, scope: &Scope) -> FeatureResult<Value> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Database get");

        if let Some(value) = self.retrieve(feature, &key).await? {
            return Ok(value);
        }

        let Some(value) = self.context.resolve(feature, scope) else {
            return Ok(Value::Bool(false));
        };

        let row = PendingRow {
            feature: feature.to_string(),
            key,
            encoded: serde_json::to_string(&value)?,
            value,
        };

        if self.insert_many(std::slice::from_ref(&row)).await? == 1 {
            self.context.resolved(feature, &row.key, &row.value);
            return Ok(row.value);
        }

        Ok(self.retrieve(feature, &row.key).await?.unwrap_or(row.value))
    }

    async fn set(&self, feature: &str, scope: &Scope, value: Value) -> FeatureResult<()> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Database set");

        let now = timestamp();
        let sql = format!(
            "INSERT INTO {} (name, scope, value, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (name, scope) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            self.table
        );

        sqlx::query(&sql)
            .bind(feature)
            .bind(&key)
            .bind(serde_json::to_string(&value)?)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_for_all_scopes(&self, feature: &str, value: Value) -> FeatureResult<()> {
        trace!(feature = %feature, "Database set for all scopes");

        let sql = format!(
            "UPDATE {} SET value = ?, updated_at = ? WHERE name = ?",
            self.table
        );

        sqlx::query(&sql)
            .bind(serde_json::to_string(&value)?)
            .bind(timestamp())
            .bind(feature)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, feature: &str, scope: &Scope) -> FeatureResult<()> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Database delete");

        let sql = format!("DELETE FROM {} WHERE name = ? AND scope = ?", self.table);
        sqlx::query(&sql)
            .bind(feature)
            .bind(&key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge(&self, features: Option<&[String]>) -> FeatureResult<()> {
        let Some(features) = features else {
            info!(table = %self.table, "Purging all features from database store");
            sqlx::query(&format!("DELETE FROM {}", self.table))
                .execute(&self.pool)
                .await?;
            return Ok(());
        };

        if features.is_empty() {
            return Ok(());
        }

        info!(table = %self.table, features = ?features, "Purging features from database store");

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {} WHERE name IN (", self.table));
        let mut names = query.separated(", ");
        for feature in features {
            names.push_bind(feature.clone());
        }
        names.push_unseparated(")");

        query.build().execute(&self.pool).await?;

        Ok(())
    }

    async fn stored(&self) -> FeatureResult<Vec<String>> {
        let sql = format!("SELECT DISTINCT name FROM {} ORDER BY name", self.table);
        let names: Vec<String> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
        Ok(names)
    }
}
