use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use common_redis::{Client as RedisClient, CustomRedisError};
use serde::Serialize;
use tracing::instrument;

use crate::{
    api::{auth::Principal, errors::FlagError},
    audit::{AuditAction, AuditEvent, AuditSink},
    flags::{
        fallback_cache::FallbackCache,
        flag_key::{flag_key, flag_name_from_key, scan_pattern, NAMESPACE_DELIMITER},
        flag_record::{decode, encode, FlagRecord, StoredFlag},
    },
    metrics::{
        consts::{
            FLAG_CORRUPTED_RECORDS_COUNTER, FLAG_FALLBACK_CACHE_READS_COUNTER,
            FLAG_MUTATIONS_COUNTER, FLAG_STORE_READS_COUNTER, FLAG_STORE_UNAVAILABLE_COUNTER,
        },
        utils::inc,
    },
};

/// Where a read answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    Store,
    /// The store was unreachable; the answer is the last confirmed state.
    LocalCache,
}

/// State of a flag after a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagSnapshot {
    pub feature: String,
    pub enabled: bool,
    pub deleted: bool,
}

impl FlagSnapshot {
    fn new(feature: &str, record: &FlagRecord) -> Self {
        Self {
            feature: feature.to_string(),
            enabled: record.enabled,
            deleted: record.deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagStatus {
    pub feature: String,
    /// On the fallback path this only says whether the flag was ever observed.
    pub exists: bool,
    pub active: bool,
    pub source: ReadSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagListing {
    /// Flag name to activation state.
    pub features: BTreeMap<String, bool>,
    pub source: ReadSource,
}

/// Create, read, update, soft delete, restore and enumerate flags against the
/// store, answering reads from the fallback cache while the store is down.
///
/// Callers are expected to have authenticated and authorized the request, and to
/// have validated the flag name.
#[derive(Clone)]
pub struct FlagService {
    store: Arc<dyn RedisClient + Send + Sync>,
    cache: FallbackCache,
    audit: Arc<dyn AuditSink>,
    namespace: String,
    scan_batch_size: usize,
}

impl FlagService {
    pub fn new(
        store: Arc<dyn RedisClient + Send + Sync>,
        cache: FallbackCache,
        audit: Arc<dyn AuditSink>,
        namespace: impl Into<String>,
        scan_batch_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            audit,
            namespace: namespace.into(),
            scan_batch_size: scan_batch_size.max(1),
        }
    }

    pub fn cache(&self) -> &FallbackCache {
        &self.cache
    }

    fn key(&self, name: &str) -> String {
        flag_key(&self.namespace, name)
    }

    #[instrument(skip_all, fields(feature = %name))]
    pub async fn create(&self, name: &str, actor: &Principal) -> Result<FlagSnapshot, FlagError> {
        let key = self.key(name);

        let exists = self
            .store
            .exists(key.clone())
            .await
            .map_err(|e| store_error("exists", e))?;
        if exists {
            return Err(FlagError::AlreadyExists(name.to_string()));
        }

        let record = FlagRecord::new(false, false);
        let created = self
            .store
            .set_nx(key.clone(), encode(&record))
            .await
            .map_err(|e| store_error("set_nx", e))?;
        if !created {
            // Another writer created it between EXISTS and SET NX.
            return Err(FlagError::AlreadyExists(name.to_string()));
        }

        self.cache.set(&key, record.is_active());
        self.emit(AuditAction::Create, name, Some(record.enabled), actor)
            .await;

        Ok(FlagSnapshot::new(name, &record))
    }

    /// Never fails: absence, corruption and outages all resolve to an answer.
    #[instrument(skip_all, fields(feature = %name))]
    pub async fn read(&self, name: &str) -> FlagStatus {
        let key = self.key(name);
        inc(FLAG_STORE_READS_COUNTER, &[], 1);

        let (exists, active, source) = match self.store.get(key.clone()).await {
            Ok(raw) => {
                let active = self.active_or_corrupted(name, decode(&raw).ok());
                self.cache.set(&key, active);
                (true, active, ReadSource::Store)
            }
            Err(e) if e.is_unavailable() => {
                let cached = self.cached_after_outage(&key, e);
                (cached.is_some(), cached.unwrap_or(false), ReadSource::LocalCache)
            }
            Err(CustomRedisError::NotFound) => {
                self.cache.delete(&key);
                (false, false, ReadSource::Store)
            }
            // The store answered, but with bytes that are not a record.
            Err(_) => {
                let active = self.active_or_corrupted(name, None);
                self.cache.set(&key, active);
                (true, active, ReadSource::Store)
            }
        };

        FlagStatus {
            feature: name.to_string(),
            exists,
            active,
            source,
        }
    }

    #[instrument(skip_all, fields(feature = %name, enabled = enabled))]
    pub async fn update(
        &self,
        name: &str,
        enabled: bool,
        actor: &Principal,
    ) -> Result<FlagSnapshot, FlagError> {
        let key = self.key(name);
        let existing = self.load_for_mutation(name, &key).await?;

        if existing.is_deleted() {
            return Err(FlagError::InvalidState(format!(
                "Feature '{name}' is deleted; restore it before updating"
            )));
        }

        let record = existing.into_record().with_state(enabled, false);
        self.write(&key, &record).await?;
        self.emit(AuditAction::Update, name, Some(enabled), actor)
            .await;

        Ok(FlagSnapshot::new(name, &record))
    }

    /// Soft delete: the key stays, marked deleted and disabled.
    #[instrument(skip_all, fields(feature = %name))]
    pub async fn delete(&self, name: &str, actor: &Principal) -> Result<FlagSnapshot, FlagError> {
        let key = self.key(name);
        let existing = self.load_for_mutation(name, &key).await?;

        if existing.is_deleted() {
            return Err(FlagError::InvalidState(format!(
                "Feature '{name}' is already deleted"
            )));
        }

        let record = existing.into_record().with_state(false, true);
        self.write(&key, &record).await?;
        self.emit(AuditAction::Delete, name, None, actor).await;

        Ok(FlagSnapshot::new(name, &record))
    }

    /// Brings a soft-deleted flag back, always disabled.
    #[instrument(skip_all, fields(feature = %name))]
    pub async fn restore(&self, name: &str, actor: &Principal) -> Result<FlagSnapshot, FlagError> {
        let key = self.key(name);
        let existing = self.load_for_mutation(name, &key).await?;

        if !existing.is_deleted() {
            return Err(FlagError::InvalidState(format!(
                "Feature '{name}' is not deleted"
            )));
        }

        let record = existing.into_record().with_state(false, false);
        self.write(&key, &record).await?;
        self.emit(AuditAction::Update, name, Some(false), actor)
            .await;

        Ok(FlagSnapshot::new(name, &record))
    }

    /// Every flag under the namespace. Soft-deleted flags are listed as inactive.
    #[instrument(skip_all)]
    pub async fn list_all(&self) -> FlagListing {
        match self.scan_all().await {
            Ok(features) => FlagListing {
                features,
                source: ReadSource::Store,
            },
            Err(e) => {
                inc(FLAG_FALLBACK_CACHE_READS_COUNTER, &[op_label("list")], 1);
                tracing::warn!(error = %e, "Store unavailable, listing flags from local cache");

                let prefix = format!("{}{}", self.namespace, NAMESPACE_DELIMITER);
                let features = self
                    .cache
                    .entries_with_prefix(&prefix)
                    .into_iter()
                    .filter_map(|(key, active)| {
                        flag_name_from_key(&self.namespace, &key).map(|name| (name.to_string(), active))
                    })
                    .collect();

                FlagListing {
                    features,
                    source: ReadSource::LocalCache,
                }
            }
        }
    }

    async fn scan_all(&self) -> Result<BTreeMap<String, bool>, CustomRedisError> {
        let pattern = scan_pattern(&self.namespace);
        let mut seen = HashSet::new();
        let mut features = BTreeMap::new();
        let mut cursor = 0;

        loop {
            let (next_cursor, keys) = self
                .store
                .scan(pattern.clone(), cursor, self.scan_batch_size)
                .await?;

            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                let Some(name) = flag_name_from_key(&self.namespace, &key) else {
                    continue;
                };

                let active = match self.store.get(key.clone()).await {
                    Ok(raw) => self.active_or_corrupted(name, decode(&raw).ok()),
                    Err(e) if e.is_unavailable() => return Err(e),
                    Err(CustomRedisError::NotFound) => {
                        // Removed between SCAN and GET.
                        self.cache.delete(&key);
                        continue;
                    }
                    Err(_) => self.active_or_corrupted(name, None),
                };

                self.cache.set(&key, active);
                features.insert(name.to_string(), active);
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(features)
    }

    /// Fetches and decodes the current value for a mutation, refusing absent or
    /// undecodable records.
    async fn load_for_mutation(&self, name: &str, key: &str) -> Result<StoredFlag, FlagError> {
        match self.store.get(key.to_string()).await {
            Ok(raw) => decode(&raw).map_err(|_| corrupted(name)),
            Err(CustomRedisError::NotFound) => Err(FlagError::NotFound(name.to_string())),
            Err(CustomRedisError::ParseError(_)) => Err(corrupted(name)),
            Err(e) => Err(store_error("get", e)),
        }
    }

    async fn write(&self, key: &str, record: &FlagRecord) -> Result<(), FlagError> {
        self.store
            .set(key.to_string(), encode(record))
            .await
            .map_err(|e| store_error("set", e))?;
        self.cache.set(key, record.is_active());
        Ok(())
    }

    fn active_or_corrupted(&self, name: &str, stored: Option<StoredFlag>) -> bool {
        match stored {
            Some(stored) => stored.is_active(),
            None => {
                inc(FLAG_CORRUPTED_RECORDS_COUNTER, &[], 1);
                tracing::warn!(feature = %name, "Corrupted flag record, treating as inactive");
                false
            }
        }
    }

    fn cached_after_outage(&self, key: &str, err: CustomRedisError) -> Option<bool> {
        inc(FLAG_FALLBACK_CACHE_READS_COUNTER, &[op_label("read")], 1);
        let cached = self.cache.get(key);
        tracing::warn!(
            error = %err,
            key,
            cached = ?cached,
            "Store unavailable, reading flag from local cache"
        );
        cached
    }

    async fn emit(
        &self,
        action: AuditAction,
        name: &str,
        new_value: Option<bool>,
        actor: &Principal,
    ) {
        inc(
            FLAG_MUTATIONS_COUNTER,
            &[("action".to_string(), action.to_string())],
            1,
        );
        self.audit
            .record(AuditEvent::new(action, name, new_value, &actor.id))
            .await;
    }
}

fn op_label(op: &str) -> (String, String) {
    ("op".to_string(), op.to_string())
}

fn corrupted(name: &str) -> FlagError {
    inc(FLAG_CORRUPTED_RECORDS_COUNTER, &[], 1);
    tracing::warn!(feature = %name, "Refusing to mutate corrupted flag record");
    FlagError::Corrupted(name.to_string())
}

/// Outages become `ServiceUnavailable`; any other failure on the write path is a
/// reply the service has no meaning for.
fn store_error(op: &str, err: CustomRedisError) -> FlagError {
    if !err.is_unavailable() {
        return FlagError::Internal(format!("unexpected store reply to {op}: {err}"));
    }
    inc(FLAG_STORE_UNAVAILABLE_COUNTER, &[op_label(op)], 1);
    tracing::warn!(error = %err, op, "Store unavailable for flag write path");
    FlagError::ServiceUnavailable
}
