use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::AdminKeys;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

const WILDCARD_SCOPE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Read,
    Write,
    Delete,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
            Scope::Delete => "delete",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request intends to do with the flag store, decided by routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOperation {
    Read,
    List,
    Create,
    Update,
    Delete,
    Restore,
}

impl FlagOperation {
    pub fn required_scope(&self) -> Scope {
        match self {
            FlagOperation::Read | FlagOperation::List => Scope::Read,
            FlagOperation::Create | FlagOperation::Update | FlagOperation::Restore => Scope::Write,
            FlagOperation::Delete => Scope::Delete,
        }
    }
}

/// An authenticated administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub scopes: HashSet<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, scopes: HashSet<String>) -> Self {
        Self {
            id: id.into(),
            scopes,
        }
    }

    /// `*` grants everything and `write` also grants `read`.
    pub fn has_scope(&self, scope: Scope) -> bool {
        if self.scopes.contains(WILDCARD_SCOPE) || self.scopes.contains(scope.as_str()) {
            return true;
        }
        scope == Scope::Read && self.scopes.contains(Scope::Write.as_str())
    }
}

/// Resolves an API key to an active administrator.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    /// `None` when the key is unknown or its admin is inactive.
    async fn lookup(&self, api_key: &str) -> Option<Principal>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAdminDirectory {
    keys: HashMap<String, Principal>,
}

impl StaticAdminDirectory {
    pub fn new(keys: AdminKeys) -> Self {
        Self { keys: keys.0 }
    }

    pub fn with_admin(mut self, api_key: &str, principal: Principal) -> Self {
        self.keys.insert(api_key.to_string(), principal);
        self
    }
}

#[async_trait]
impl AdminDirectory for StaticAdminDirectory {
    async fn lookup(&self, api_key: &str) -> Option<Principal> {
        self.keys.get(api_key).cloned()
    }
}

/// Reads the admin key from `X-ADMIN-KEY`, falling back to `Authorization: Bearer`.
pub fn extract_admin_key(headers: &HeaderMap) -> Option<String> {
    let from_header = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(key) = from_header {
        return Some(key.to_string());
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
