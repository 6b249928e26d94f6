use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::api::{
    admin_rate_limiter::{QuotaSubject, QuotaTracker},
    auth::{extract_admin_key, AdminDirectory, FlagOperation, Principal},
    errors::FlagError,
};
use crate::config::QuotaSubjectMode;
use crate::metrics::{consts::ADMIN_AUTH_FAILURES_COUNTER, utils::inc};

/// What the stages know about a request so far.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: FlagOperation,
    pub credential: Option<String>,
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(operation: FlagOperation, headers: &HeaderMap) -> Self {
        Self {
            operation,
            credential: extract_admin_key(headers),
            principal: None,
        }
    }

    fn require_principal(&self) -> Result<&Principal, FlagError> {
        self.principal
            .as_ref()
            .ok_or_else(|| FlagError::Unauthorized("Unauthorized".to_string()))
    }
}

/// One step that runs before a flag operation and may reject the request.
#[async_trait]
pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), FlagError>;
}

pub struct Authenticate {
    directory: Arc<dyn AdminDirectory>,
}

impl Authenticate {
    pub fn new(directory: Arc<dyn AdminDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl RequestStage for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), FlagError> {
        let Some(credential) = ctx.credential.as_deref() else {
            inc(
                ADMIN_AUTH_FAILURES_COUNTER,
                &[("reason".to_string(), "missing_key".to_string())],
                1,
            );
            return Err(FlagError::Unauthorized("Missing admin API key".to_string()));
        };

        match self.directory.lookup(credential).await {
            Some(principal) => {
                ctx.principal = Some(principal);
                Ok(())
            }
            None => {
                inc(
                    ADMIN_AUTH_FAILURES_COUNTER,
                    &[("reason".to_string(), "invalid_key".to_string())],
                    1,
                );
                Err(FlagError::Forbidden(
                    "Invalid or inactive admin key".to_string(),
                ))
            }
        }
    }
}

pub struct RateLimit {
    tracker: QuotaTracker,
    mode: QuotaSubjectMode,
}

impl RateLimit {
    pub fn new(tracker: QuotaTracker, mode: QuotaSubjectMode) -> Self {
        Self { tracker, mode }
    }
}

#[async_trait]
impl RequestStage for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), FlagError> {
        let principal = ctx.require_principal()?;
        let credential = ctx.credential.as_deref().unwrap_or_default();

        let subject = QuotaSubject::for_mode(self.mode, &principal.id, credential);
        if self.tracker.allow(subject).await {
            Ok(())
        } else {
            Err(FlagError::RateLimited)
        }
    }
}

/// Checks the scope the request's operation needs.
pub struct RequireScope;

#[async_trait]
impl RequestStage for RequireScope {
    fn name(&self) -> &'static str {
        "require_scope"
    }

    async fn apply(&self, ctx: &mut RequestContext) -> Result<(), FlagError> {
        let principal = ctx.require_principal()?;
        let scope = ctx.operation.required_scope();

        if principal.has_scope(scope) {
            Ok(())
        } else {
            tracing::info!(admin = %principal.id, %scope, "Admin missing required scope");
            Err(FlagError::Forbidden(format!(
                "Missing required scope: {scope}"
            )))
        }
    }
}

/// Ordered stages run before an admin operation; the first rejection wins.
#[derive(Clone)]
pub struct RequestPipeline {
    stages: Vec<Arc<dyn RequestStage>>,
}

impl RequestPipeline {
    pub fn new(stages: Vec<Arc<dyn RequestStage>>) -> Self {
        Self { stages }
    }

    /// Authenticate, then rate limit, then check scope.
    pub fn admin(
        directory: Arc<dyn AdminDirectory>,
        tracker: QuotaTracker,
        mode: QuotaSubjectMode,
    ) -> Self {
        let authenticate: Arc<dyn RequestStage> = Arc::new(Authenticate::new(directory));
        let rate_limit: Arc<dyn RequestStage> = Arc::new(RateLimit::new(tracker, mode));
        let require_scope: Arc<dyn RequestStage> = Arc::new(RequireScope);
        Self::new(vec![authenticate, rate_limit, require_scope])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage and returns the authenticated principal.
    pub async fn run(
        &self,
        operation: FlagOperation,
        headers: &HeaderMap,
    ) -> Result<Principal, FlagError> {
        let mut ctx = RequestContext::new(operation, headers);

        for stage in &self.stages {
            if let Err(e) = stage.apply(&mut ctx).await {
                tracing::debug!(stage = stage.name(), error = %e, "Request rejected");
                return Err(e);
            }
        }

        ctx.principal
            .ok_or_else(|| FlagError::Unauthorized("Unauthorized".to_string()))
    }
}
