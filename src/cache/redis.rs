use std::time::Duration;

use async_trait::async_trait;
use redis::{
    ConnectionInfo, IntoConnectionInfo, Value, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};

use super::{
    error::{CacheError, CacheResult},
    traits::Cache,
};
use crate::config::RedisCacheConfig;

/// Either a standalone or a cluster connection. Both speak the same command
/// protocol, so commands are dispatched through the macros below.
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

macro_rules! redis_script {
    ($conn:expr, $script:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $script.invoke_async(c).await,
            RedisConn::Cluster(ref mut c) => $script.invoke_async(c).await,
        }
    };
}

/// An entry read from a Redis Stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Entry ID assigned by XADD (e.g. "1700000000000-0")
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Atomic INCRBY that sets the expiry only when the key has none.
///
/// Daily counters get their expiry on the first increment of the day; later
/// increments must not push it past midnight.
const INCR_PRESERVE_TTL_SCRIPT: &str = r#"
local key = KEYS[1]
local delta = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

local new_value = redis.call('INCRBY', key, delta)
if ttl > 0 and redis.call('TTL', key) < 0 then
    redis.call('EXPIRE', key, ttl)
end
return new_value
"#;

enum RedisClient {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// Redis-backed cache, also used as the transport for the event streams.
pub struct RedisCache {
    client: RedisClient,
    key_prefix: String,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let client = match &config.cluster {
            Some(cluster) => {
                // Cluster nodes are comma-separated: "redis://a:6379,b:6379"
                let nodes: Vec<ConnectionInfo> = config
                    .url
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        if s.starts_with("redis://") || s.starts_with("rediss://") {
                            s.to_string()
                        } else {
                            format!("redis://{}", s)
                        }
                        .into_connection_info()
                    })
                    .collect::<Result<_, _>>()?;

                if nodes.is_empty() {
                    return Err(CacheError::Redis(redis::RedisError::from((
                        redis::ErrorKind::InvalidClientConfig,
                        "No cluster nodes specified in URL",
                    ))));
                }

                let mut builder = redis::cluster::ClusterClientBuilder::new(nodes)
                    .retries(cluster.retries)
                    .connection_timeout(Duration::from_secs(cluster.connection_timeout_secs))
                    .response_timeout(Duration::from_secs(cluster.response_timeout_secs));
                if cluster.read_from_replicas {
                    builder = builder.read_from_replicas();
                }
                RedisClient::Cluster(builder.build()?)
            }
            None => RedisClient::Standalone(redis::Client::open(config.url.as_str())?),
        };

        let cache = Self {
            client,
            key_prefix: config.key_prefix.clone(),
        };

        // Fail at startup rather than on the first event
        let mut conn = cache.connection().await?;
        let _: String = redis_cmd!(conn, redis::cmd("PING"))?;

        Ok(cache)
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> CacheResult<RedisConn> {
        match &self.client {
            RedisClient::Standalone(client) => Ok(RedisConn::Standalone(
                client.get_multiplexed_async_connection().await?,
            )),
            RedisClient::Cluster(client) => {
                Ok(RedisConn::Cluster(client.get_async_connection().await?))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Streams
    // ─────────────────────────────────────────────────────────────────────────────

    /// XADD with an auto-generated ID and optional approximate trimming.
    pub async fn stream_add(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
        max_len: Option<u64>,
    ) -> CacheResult<String> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(self.prefixed_key(stream));
        if let Some(max) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max);
        }
        cmd.arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }

        let id: String = redis_cmd!(conn, cmd)?;
        Ok(id)
    }

    /// Create a consumer group, creating the stream too if needed.
    ///
    /// Returns false when the group already exists.
    pub async fn stream_create_group(&self, stream: &str, group: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis_cmd!(
            conn,
            redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.prefixed_key(stream))
                .arg(group)
                .arg("$")
                .arg("MKSTREAM")
        );

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// XREADGROUP for entries never delivered to any consumer of the group.
    pub async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> CacheResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms);
        }
        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(self.prefixed_key(stream))
            .arg(">");

        // Nil on timeout, otherwise [[stream, [[id, [field, value, ...]], ...]]]
        let value: Value = redis_cmd!(conn, cmd)?;
        let mut entries = Vec::new();
        if let Value::Array(streams) = value {
            for stream in streams {
                if let Value::Array(mut parts) = stream
                    && parts.len() >= 2
                {
                    entries.extend(parse_entries(parts.swap_remove(1)));
                }
            }
        }
        Ok(entries)
    }

    pub async fn stream_ack(&self, stream: &str, group: &str, ids: &[&str]) -> CacheResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("XACK");
        cmd.arg(self.prefixed_key(stream)).arg(group);
        for id in ids {
            cmd.arg(*id);
        }

        let count: u64 = redis_cmd!(conn, cmd)?;
        Ok(count)
    }

    /// Take ownership of entries delivered to some consumer but not
    /// acknowledged within `min_idle_ms`, and return them for reprocessing.
    ///
    /// This is how a negative acknowledgement turns into a redelivery: the
    /// entry stays pending until it goes idle and is claimed here.
    pub async fn stream_claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> CacheResult<Vec<StreamEntry>> {
        let mut conn = self.connection().await?;
        let key = self.prefixed_key(stream);

        let pending: Value = redis_cmd!(
            conn,
            redis::cmd("XPENDING")
                .arg(&key)
                .arg(group)
                .arg("IDLE")
                .arg(min_idle_ms)
                .arg("-")
                .arg("+")
                .arg(count)
        )?;

        // Each pending entry is [id, consumer, idle_ms, delivery_count]
        let ids: Vec<String> = match pending {
            Value::Array(rows) => rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Array(mut fields) if !fields.is_empty() => {
                        bulk_to_string(fields.swap_remove(0))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&key).arg(group).arg(consumer).arg(min_idle_ms);
        for id in &ids {
            cmd.arg(id);
        }
        let claimed: Value = redis_cmd!(conn, cmd)?;

        Ok(parse_entries(claimed))
    }
}

fn bulk_to_string(value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) => Some(s),
        _ => None,
    }
}

/// Parse `[[id, [field, value, ...]], ...]` as returned by XREADGROUP and
/// XCLAIM. Entries deleted while pending come back as nil and are skipped.
fn parse_entries(value: Value) -> Vec<StreamEntry> {
    let Value::Array(raw) = value else {
        return Vec::new();
    };

    raw.into_iter()
        .filter_map(|entry| {
            let Value::Array(mut parts) = entry else {
                return None;
            };
            if parts.len() < 2 {
                return None;
            }
            let raw_fields = parts.swap_remove(1);
            let id = bulk_to_string(parts.swap_remove(0))?;

            let mut fields = Vec::new();
            if let Value::Array(flat) = raw_fields {
                let mut iter = flat.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    if let (Some(k), Some(v)) = (bulk_to_string(k), bulk_to_string(v)) {
                        fields.push((k, v));
                    }
                }
            }

            Some(StreamEntry { id, fields })
        })
        .collect()
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = redis_cmd!(conn, redis::cmd("GET").arg(self.prefixed_key(key)))?;
        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        if ttl.as_secs() > 0 {
            let _: () = redis_cmd!(
                conn,
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs())
            )?;
        } else {
            let _: () = redis_cmd!(conn, redis::cmd("SET").arg(&full_key).arg(value))?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let _: () = redis_cmd!(conn, redis::cmd("DEL").arg(self.prefixed_key(key)))?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let value: i64 = if ttl.as_secs() > 0 {
            redis_script!(
                conn,
                redis::Script::new(INCR_PRESERVE_TTL_SCRIPT)
                    .key(&full_key)
                    .arg(delta)
                    .arg(ttl.as_secs() as i64)
            )?
        } else {
            redis_cmd!(conn, redis::cmd("INCRBY").arg(&full_key).arg(delta))?
        };

        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.connection().await?;
        let value: Option<i64> = redis_cmd!(conn, redis::cmd("GET").arg(self.prefixed_key(key)))?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_entries() {
        let raw = Value::Array(vec![
            Value::Array(vec![
                bulk("1-0"),
                Value::Array(vec![bulk("payload"), bulk("{\"a\":1}")]),
            ]),
            // Deleted while pending
            Value::Nil,
            Value::Array(vec![bulk("2-0"), Value::Array(vec![bulk("payload"), bulk("x")])]),
        ]);

        let entries = parse_entries(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].get("payload"), Some("{\"a\":1}"));
        assert_eq!(entries[1].get("payload"), Some("x"));
        assert_eq!(entries[1].get("missing"), None);
    }

    #[test]
    fn test_parse_entries_nil() {
        assert!(parse_entries(Value::Nil).is_empty());
    }
}
