use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use common_redis::MockRedisClient;
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    api::auth::{Principal, StaticAdminDirectory},
    audit::{AuditEvent, AuditSink},
    flags::{
        flag_key::flag_key,
        flag_record::{encode, FlagRecord},
    },
};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// A principal holding every scope.
pub fn admin(id: &str) -> Principal {
    admin_with_scopes(id, &["*"])
}

pub fn admin_with_scopes(id: &str, scopes: &[&str]) -> Principal {
    Principal::new(
        id,
        scopes
            .iter()
            .map(|scope| scope.to_string())
            .collect::<HashSet<_>>(),
    )
}

/// Keeps every event in memory, in order.
#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Directory with one key per scope set: `read-key`, `write-key`, `delete-key`
/// and `root-key` (`*`).
pub fn test_admin_directory() -> StaticAdminDirectory {
    StaticAdminDirectory::default()
        .with_admin("read-key", admin_with_scopes("reader", &["read"]))
        .with_admin("write-key", admin_with_scopes("writer", &["write"]))
        .with_admin("delete-key", admin_with_scopes("deleter", &["delete"]))
        .with_admin("root-key", admin("root"))
}

/// Seeds a structured record straight into the mock store.
pub fn insert_flag(store: &MockRedisClient, namespace: &str, name: &str, record: &FlagRecord) {
    let mut store = store.clone();
    store.with_value(&flag_key(namespace, name), &encode(record));
}
