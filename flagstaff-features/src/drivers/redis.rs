//! Redis feature driver
//!
//! Each feature is a hash at `{prefix}:{feature}` mapping scope keys to
//! JSON-encoded values. The set at `{prefix}` indexes the names of features
//! with stored values. Requires the `redis` feature to be enabled.

use crate::drivers::{Driver, DriverContext, FeatureScopes, ResolvedValues};
use crate::error::{FeatureError, FeatureResult};
use crate::scope::Scope;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Redis-backed feature driver
#[derive(Clone)]
pub struct RedisDriver {
    context: DriverContext,
    connection: ConnectionManager,
    prefix: String,
}

/// A value resolved during a batched load that still has to be written.
struct PendingWrite {
    feature: String,
    key: String,
    value: Value,
    encoded: String,
}

impl RedisDriver {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(
        context: DriverContext,
        url: &str,
        prefix: impl Into<String>,
    ) -> FeatureResult<Self> {
        debug!(store = %context.store(), url = %url, "Connecting to Redis feature store");

        let client =
            redis::Client::open(url).map_err(|e| FeatureError::Connection(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| FeatureError::Connection(e.to_string()))?;

        Ok(Self::new(context, connection, prefix))
    }

    /// Create a driver on an existing connection.
    pub fn new(
        context: DriverContext,
        connection: ConnectionManager,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            context,
            connection,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn hash_key(&self, feature: &str) -> String {
        format!("{}:{}", self.prefix, feature)
    }
}

fn decode(raw: &str) -> FeatureResult<Value> {
    serde_json::from_str(raw)
        .map_err(|e| FeatureError::serialization(format!("stored value is not valid JSON: {}", e)))
}

#[async_trait]
impl Driver for RedisDriver {
    fn context(&self) -> &DriverContext {
        &self.context
    }

    fn driver_name(&self) -> &'static str {
        "redis"
    }

    async fn get_all(&self, features: &FeatureScopes) -> FeatureResult<ResolvedValues> {
        let requests: Vec<(&str, Vec<String>)> = features
            .iter()
            .filter(|(_, scopes)| !scopes.is_empty())
            .map(|(feature, scopes)| {
                let keys = scopes.iter().map(|scope| self.context.key(scope)).collect();
                (feature.as_str(), keys)
            })
            .collect();

        let mut conn = self.connection.clone();

        let stored: Vec<Vec<Option<String>>> = if requests.is_empty() {
            Vec::new()
        } else {
            let mut pipe = redis::pipe();
            for (feature, keys) in &requests {
                pipe.cmd("HMGET").arg(self.hash_key(feature)).arg(keys);
            }
            pipe.query_async(&mut conn).await?
        };

        debug!(
            store = %self.context.store(),
            features = requests.len(),
            "Loaded stored feature values from Redis"
        );

        let mut results = ResolvedValues::with_capacity(features.len());
        let mut resolved_here: HashMap<(String, String), Value> = HashMap::new();
        let mut writes = Vec::new();

        // Scope keys per feature, aligned with the values in `results`
        let mut positions: HashMap<String, Vec<String>> = HashMap::new();

        let mut stored = stored.into_iter();
        for (feature, scopes) in features {
            let values = results.entry(feature.clone()).or_default();
            if scopes.is_empty() {
                continue;
            }

            let row = stored.next().unwrap_or_default();
            let keys = positions.entry(feature.clone()).or_default();
            for (index, scope) in scopes.iter().enumerate() {
                let key = self.context.key(scope);
                keys.push(key.clone());

                if let Some(Some(raw)) = row.get(index) {
                    values.push(decode(raw)?);
                    continue;
                }

                let pair = (feature.clone(), key.clone());
                if let Some(value) = resolved_here.get(&pair) {
                    values.push(value.clone());
                    continue;
                }

                match self.context.resolve(feature, scope) {
                    Some(value) => {
                        writes.push(PendingWrite {
                            feature: feature.clone(),
                            key,
                            encoded: serde_json::to_string(&value)?,
                            value: value.clone(),
                        });
                        resolved_here.insert(pair, value.clone());
                        values.push(value);
                    }
                    None => values.push(Value::Bool(false)),
                }
            }
        }

        if writes.is_empty() {
            return Ok(results);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in &writes {
            pipe.cmd("HSETNX")
                .arg(self.hash_key(&write.feature))
                .arg(&write.key)
                .arg(&write.encoded)
                .cmd("SADD")
                .arg(&self.prefix)
                .arg(&write.feature)
                .ignore();
        }
        let inserted: Vec<bool> = pipe.query_async(&mut conn).await?;

        // Values another process stored first win over ours
        let mut lost = Vec::new();
        for (write, inserted) in writes.iter().zip(inserted) {
            if inserted {
                self.context.resolved(&write.feature, &write.key, &write.value);
            } else {
                lost.push(write);
            }
        }

        if lost.is_empty() {
            return Ok(results);
        }

        let mut pipe = redis::pipe();
        for write in &lost {
            pipe.cmd("HGET")
                .arg(self.hash_key(&write.feature))
                .arg(&write.key);
        }
        let current: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        let mut replacements = HashMap::new();
        for (write, raw) in lost.into_iter().zip(current) {
            if let Some(raw) = raw {
                replacements.insert((write.feature.clone(), write.key.clone()), decode(&raw)?);
            }
        }

        for (feature, values) in results.iter_mut() {
            let Some(keys) = positions.get(feature) else {
                continue;
            };
            for (key, value) in keys.iter().zip(values.iter_mut()) {
                if let Some(replacement) = replacements.get(&(feature.clone(), key.clone())) {
                    *value = replacement.clone();
                }
            }
        }

        Ok(results)
    }

    async fn get(&self, feature: &str, scope: &Scope) -> FeatureResult<Value> {
        let key = self.context.key(scope);
        let hash = self.hash_key(feature);
        trace!(feature = %feature, scope = %key, "Redis get");

        let mut conn = self.connection.clone();
        let stored: Option<String> = conn.hget(&hash, &key).await?;
        if let Some(raw) = stored {
            return decode(&raw);
        }

        let Some(value) = self.context.resolve(feature, scope) else {
            return Ok(Value::Bool(false));
        };
        let encoded = serde_json::to_string(&value)?;

        let (inserted,): (bool,) = redis::pipe()
            .atomic()
            .cmd("HSETNX")
            .arg(&hash)
            .arg(&key)
            .arg(&encoded)
            .cmd("SADD")
            .arg(&self.prefix)
            .arg(feature)
            .ignore()
            .query_async(&mut conn)
            .await?;

        if inserted {
            self.context.resolved(feature, &key, &value);
            return Ok(value);
        }

        let stored: Option<String> = conn.hget(&hash, &key).await?;
        match stored {
            Some(raw) => decode(&raw),
            None => Ok(value),
        }
    }

    async fn set(&self, feature: &str, scope: &Scope, value: Value) -> FeatureResult<()> {
        let key = self.context.key(scope);
        trace!(feature = %feature, scope = %key, "Redis set");

        let encoded = serde_json::to_string(&value)?;
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(self.hash_key(feature))
            .arg(&key)
            .arg(&encoded)
            .ignore()
            .cmd("SADD")
            .arg(&self.prefix)
            .arg(feature)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn set_for_all_scopes(&self, feature: &str, value: Value) -> FeatureResult<()> {
        trace!(feature = %feature, "Redis set for all scopes");

        let hash = self.hash_key(feature);
        let encoded = serde_json::to_string(&value)?;
        let mut conn = self.connection.clone();

        let keys: Vec<String> = conn.hkeys(&hash).await?;
        if keys.is_empty() {
            return Ok(());
        }

        let fields: Vec<(String, String)> = keys
            .into_iter()
            .map(|key| (key, encoded.clone()))
            .collect();
        let _: () = conn.hset_multiple(&hash, fields.as_slice()).await?;

        Ok(())
    }

    async fn delete(&self, feature: &str, scope: &Scope) -> FeatureResult<()> {
        let key = self.context.key(scope);
        let hash = self.hash_key(feature);
        trace!(feature = %feature, scope = %key, "Redis delete");

        let mut conn = self.connection.clone();
        let _: () = conn.hdel(&hash, &key).await?;

        let remaining: usize = conn.hlen(&hash).await?;
        if remaining == 0 {
            let _: () = conn.srem(&self.prefix, feature).await?;
        }

        Ok(())
    }

    async fn purge(&self, features: Option<&[String]>) -> FeatureResult<()> {
        let mut conn = self.connection.clone();

        let features = match features {
            Some(features) => {
                info!(features = ?features, "Purging features from Redis store");
                features.to_vec()
            }
            None => {
                info!(prefix = %self.prefix, "Purging all features from Redis store");
                conn.smembers(&self.prefix).await?
            }
        };

        if features.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for feature in &features {
            pipe.cmd("DEL").arg(self.hash_key(feature)).ignore();
            pipe.cmd("SREM").arg(&self.prefix).arg(feature).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn stored(&self) -> FeatureResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut names: Vec<String> = conn.smembers(&self.prefix).await?;
        names.sort();
        Ok(names)
    }
}
