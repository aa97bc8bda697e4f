//! Redis-backed status store.
//!
//! Each video is a hash at `<prefix>:<video_id>`. Status transitions run as
//! Lua scripts so the status check and the write are one atomic step.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};
use vproc_models::{VideoAccess, VideoId, VideoRecord, VideoStatus};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_operation, record_rejected_transition};
use crate::repo::{ProcessingClaim, VideoStatusStore, DEFAULT_PROCESSING_LEASE};

const CLAIM_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status == 'processed' or status == 'failed' then
    return status
end
if status == 'processing' then
    local since = tonumber(redis.call('HGET', KEYS[1], 'processing_since') or '')
    if since and (tonumber(ARGV[1]) - since) < tonumber(ARGV[2]) then
        return 'inflight:' .. since
    end
end
redis.call('HSET', KEYS[1], 'status', 'processing', 'processing_since', ARGV[1], 'updated_at', ARGV[1])
return 'claimed'
"#;

const PROCESSED_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status ~= 'processing' then
    return status
end
redis.call('HSET', KEYS[1], 'status', 'processed', 'processed_path', ARGV[1], 'updated_at', ARGV[2])
redis.call('HDEL', KEYS[1], 'processing_since')
return 'ok'
"#;

const FAILED_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status == 'processed' or status == 'failed' then
    return status
end
redis.call('HSET', KEYS[1], 'status', 'failed', 'failure_reason', ARGV[1], 'updated_at', ARGV[2])
redis.call('HDEL', KEYS[1], 'processing_since')
return 'ok'
"#;

const RELEASE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status == 'processing' then
    redis.call('HDEL', KEYS[1], 'processing_since')
    redis.call('HSET', KEYS[1], 'updated_at', ARGV[1])
end
return 'ok'
"#;

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Configuration for the Redis status store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix of video hashes
    pub key_prefix: String,
    /// How long a processing claim is honoured
    pub processing_lease: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vproc:video".to_string(),
            processing_lease: DEFAULT_PROCESSING_LEASE,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            processing_lease: std::env::var("STORE_PROCESSING_LEASE")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.processing_lease),
        }
    }
}

/// `VideoStatusStore` over Redis hashes.
#[derive(Clone)]
pub struct RedisVideoStore {
    client: redis::Client,
    key_prefix: String,
    lease: Duration,
    claim: Script,
    processed: Script,
    failed: Script,
    release: Script,
    create: Script,
}

impl RedisVideoStore {
    /// Create a new store from configuration.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            key_prefix: config.key_prefix,
            lease: config.processing_lease,
            claim: Script::new(CLAIM_SCRIPT),
            processed: Script::new(PROCESSED_SCRIPT),
            failed: Script::new(FAILED_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            create: Script::new(CREATE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    fn key(&self, id: &VideoId) -> String {
        format!("{}:{}", self.key_prefix, id)
    }

    async fn conn(&self) -> StoreResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Insert a new record. Fails if the id is taken.
    pub async fn create(&self, record: &VideoRecord) -> StoreResult<()> {
        observe("create", async {
            let mut conn = self.conn().await?;
            let mut invocation = self.create.key(self.key(&record.id));
            for (field, value) in encode_record(record) {
                invocation.arg(field).arg(value);
            }

            let created: i32 = invocation.invoke_async(&mut conn).await?;
            if created == 0 {
                return Err(StoreError::AlreadyExists(record.id.to_string()));
            }

            info!("Created video record: {}", record.id);
            Ok(())
        })
        .await
    }

    async fn run_transition(
        &self,
        script: &Script,
        id: &VideoId,
        args: &[String],
        operation: &'static str,
        to: VideoStatus,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut invocation = script.key(self.key(id));
        for arg in args {
            invocation.arg(arg);
        }

        let reply: String = invocation.invoke_async(&mut conn).await?;
        match reply.as_str() {
            "ok" => {
                debug!(video_id = %id, operation, "Status transition applied");
                Ok(())
            }
            "missing" => Err(StoreError::not_found(id.as_str())),
            current => {
                let from = parse_status(id, current)?;
                record_rejected_transition(operation, from.as_str());
                Err(StoreError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to,
                })
            }
        }
    }
}

#[async_trait]
impl VideoStatusStore for RedisVideoStore {
    async fn get(&self, id: &VideoId, access: VideoAccess) -> StoreResult<Option<VideoRecord>> {
        observe("get", async {
            let mut conn = self.conn().await?;
            let fields: HashMap<String, String> = conn.hgetall(self.key(id)).await?;
            if fields.is_empty() {
                return Ok(None);
            }

            let record = decode_record(id, &fields)?;
            Ok(record.is_visible_to(&access).then_some(record))
        })
        .await
    }

    async fn mark_processing(&self, id: &VideoId) -> StoreResult<ProcessingClaim> {
        observe("mark_processing", async {
            let mut conn = self.conn().await?;
            let lease_ms = u64::try_from(self.lease.as_millis()).unwrap_or(u64::MAX);
            let reply: String = self
                .claim
                .key(self.key(id))
                .arg(Utc::now().timestamp_millis())
                .arg(lease_ms)
                .invoke_async(&mut conn)
                .await?;

            let claim = parse_claim(id, &reply)?;
            if !claim.is_claimed() {
                record_rejected_transition("mark_processing", claim_label(&claim));
            }
            debug!(video_id = %id, ?claim, "mark_processing");
            Ok(claim)
        })
        .await
    }

    async fn mark_processed(&self, id: &VideoId, processed_path: &str) -> StoreResult<()> {
        let args = [processed_path.to_string(), now_millis()];
        observe(
            "mark_processed",
            self.run_transition(&self.processed, id, &args, "mark_processed", VideoStatus::Processed),
        )
        .await
    }

    async fn mark_failed(&self, id: &VideoId, reason: &str) -> StoreResult<()> {
        let args = [reason.to_string(), now_millis()];
        observe(
            "mark_failed",
            self.run_transition(&self.failed, id, &args, "mark_failed", VideoStatus::Failed),
        )
        .await
    }

    async fn release_claim(&self, id: &VideoId) -> StoreResult<()> {
        let args = [now_millis()];
        observe(
            "release_claim",
            self.run_transition(&self.release, id, &args, "release_claim", VideoStatus::Uploaded),
        )
        .await
    }
}

async fn observe<T, F>(operation: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let start = Instant::now();
    let result = fut.await;
    record_operation(operation, result.is_ok(), start.elapsed().as_secs_f64() * 1000.0);
    result
}

fn now_millis() -> String {
    Utc::now().timestamp_millis().to_string()
}

fn claim_label(claim: &ProcessingClaim) -> &'static str {
    match claim {
        ProcessingClaim::Claimed | ProcessingClaim::InFlight { .. } => "processing",
        ProcessingClaim::AlreadyProcessed => "processed",
        ProcessingClaim::AlreadyFailed => "failed",
    }
}

fn parse_claim(id: &VideoId, reply: &str) -> StoreResult<ProcessingClaim> {
    match reply {
        "claimed" => Ok(ProcessingClaim::Claimed),
        "missing" => Err(StoreError::not_found(id.as_str())),
        "processed" => Ok(ProcessingClaim::AlreadyProcessed),
        "failed" => Ok(ProcessingClaim::AlreadyFailed),
        other => {
            let since = other
                .strip_prefix("inflight:")
                .and_then(|ms| ms.parse::<i64>().ok())
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| StoreError::corrupt(id.as_str(), format!("unexpected claim reply: {other}")))?;
            Ok(ProcessingClaim::InFlight { since })
        }
    }
}

fn parse_status(id: &VideoId, value: &str) -> StoreResult<VideoStatus> {
    value
        .parse::<VideoStatus>()
        .map_err(|e| StoreError::corrupt(id.as_str(), e))
}

fn encode_record(record: &VideoRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", record.id.to_string()),
        ("owner_id", record.owner_id.clone()),
        ("status", record.status.as_str().to_string()),
        ("original_path_ref", record.original_path_ref.clone()),
        ("created_at", record.created_at.timestamp_millis().to_string()),
        ("updated_at", record.updated_at.timestamp_millis().to_string()),
    ];
    if let Some(path) = &record.processed_path {
        fields.push(("processed_path", path.clone()));
    }
    if let Some(reason) = &record.failure_reason {
        fields.push(("failure_reason", reason.clone()));
    }
    if let Some(since) = record.processing_since {
        fields.push(("processing_since", since.timestamp_millis().to_string()));
    }
    fields
}

fn decode_record(id: &VideoId, fields: &HashMap<String, String>) -> StoreResult<VideoRecord> {
    let required = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::corrupt(id.as_str(), format!("missing field {name}")))
    };
    let timestamp = |name: &str| -> StoreResult<Option<DateTime<Utc>>> {
        fields
            .get(name)
            .map(|ms| {
                ms.parse::<i64>()
                    .ok()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .ok_or_else(|| StoreError::corrupt(id.as_str(), format!("invalid {name}: {ms}")))
            })
            .transpose()
    };

    let created_at = timestamp("created_at")?
        .ok_or_else(|| StoreError::corrupt(id.as_str(), "missing field created_at"))?;

    Ok(VideoRecord {
        id: id.clone(),
        owner_id: required("owner_id")?,
        status: parse_status(id, &required("status")?)?,
        original_path_ref: required("original_path_ref")?,
        processed_path: fields.get("processed_path").cloned(),
        failure_reason: fields.get("failure_reason").cloned(),
        processing_since: timestamp("processing_since")?,
        updated_at: timestamp("updated_at")?.unwrap_or(created_at),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fields_roundtrip() {
        let id = VideoId::from("v1");
        let mut record = VideoRecord::uploaded(id.clone(), "user-1", "raw/v1.mp4");
        record.status = VideoStatus::Processed;
        record.processed_path = Some("/processed/v1_processed.mp4".to_string());

        let fields: HashMap<String, String> = encode_record(&record)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let decoded = decode_record(&id, &fields).unwrap();

        assert_eq!(decoded.status, VideoStatus::Processed);
        assert_eq!(decoded.processed_path, record.processed_path);
        assert_eq!(
            decoded.created_at.timestamp_millis(),
            record.created_at.timestamp_millis()
        );
        assert!(decoded.processing_since.is_none());
    }

    #[test]
    fn test_decode_rejects_bad_status() {
        let id = VideoId::from("v1");
        let fields: HashMap<String, String> = [
            ("owner_id", "u"),
            ("status", "done"),
            ("original_path_ref", "raw/v1.mp4"),
            ("created_at", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert!(matches!(
            decode_record(&id, &fields),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_parse_claim_replies() {
        let id = VideoId::from("v1");

        assert_eq!(parse_claim(&id, "claimed").unwrap(), ProcessingClaim::Claimed);
        assert_eq!(
            parse_claim(&id, "failed").unwrap(),
            ProcessingClaim::AlreadyFailed
        );
        assert!(matches!(
            parse_claim(&id, "inflight:1700000000000").unwrap(),
            ProcessingClaim::InFlight { .. }
        ));
        assert!(matches!(
            parse_claim(&id, "missing"),
            Err(StoreError::NotFound(_))
        ));
        assert!(parse_claim(&id, "garbage").is_err());
    }
}
