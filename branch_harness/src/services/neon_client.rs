//! Neon API client: branch creation, lookup, readiness and deletion.
//!
//! Every request carries the bearer token and goes through [`with_retry`],
//! except readiness probes: each poll tick is already a retry.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

use crate::config::{HarnessConfig, NeonApiConfig};
use crate::error::NeonError;
use crate::models::{BranchInfo, ConnectionStrings, Endpoint, Role};
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::validator::{host_start, validate_branch_name, validate_not_production_branch};

/// Maps a pooled connection URL to its direct (session) counterpart.
///
/// Returns `None` when the URL has no pooled form to strip; callers then
/// use the pooled URL for both purposes.
pub trait DirectUrlResolver: Send + Sync {
    fn direct_url(&self, pooled_url: &str) -> Option<String>;
}

/// Neon naming: `ep-x-y-123-pooler.region.aws.neon.tech` → `ep-x-y-123.region.aws.neon.tech`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolerHostResolver;

impl DirectUrlResolver for PoolerHostResolver {
    fn direct_url(&self, pooled_url: &str) -> Option<String> {
        let host_start = host_start(pooled_url)?;
        let rest = &pooled_url[host_start..];
        let label_len = rest.find(['.', ':', '/', '?']).unwrap_or(rest.len());
        let stripped = rest[..label_len].strip_suffix("-pooler")?;
        Some(format!(
            "{}{}{}",
            &pooled_url[..host_start],
            stripped,
            &rest[label_len..]
        ))
    }
}

#[derive(Debug, Clone)]
pub struct CreateBranchOptions {
    /// Defaults to the configured staging branch.
    pub parent_id: Option<String>,
    /// Copy only table definitions from the parent, no rows.
    pub schema_only: bool,
}

impl Default for CreateBranchOptions {
    fn default() -> Self {
        Self {
            parent_id: None,
            schema_only: true,
        }
    }
}

/// Result of a best-effort branch deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The API answered 404; nothing left to delete.
    AlreadyGone,
    Failed(String),
}

impl DeleteOutcome {
    pub fn is_gone(&self) -> bool {
        !matches!(self, DeleteOutcome::Failed(_))
    }

    fn as_label(&self) -> &'static str {
        match self {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::AlreadyGone => "already_gone",
            DeleteOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Deserialize)]
struct BranchEnvelope {
    branch: BranchInfo,
}

#[derive(Deserialize)]
struct BranchesEnvelope {
    branches: Vec<BranchInfo>,
}

#[derive(Deserialize)]
struct EndpointsEnvelope {
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct RolesEnvelope {
    roles: Vec<Role>,
}

#[derive(Deserialize)]
struct ConnectionUriEnvelope {
    #[serde(default)]
    uri: String,
}

#[derive(Clone)]
pub struct NeonClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    retry: RetryPolicy,
    poll_interval: Duration,
    staging_branch_id: Option<String>,
    primary_branch_id: Option<String>,
    role_name: Option<String>,
    database_name: String,
    direct_urls: Arc<dyn DirectUrlResolver>,
}

impl std::fmt::Debug for NeonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeonClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("staging_branch_id", &self.staging_branch_id)
            .field("primary_branch_id", &self.primary_branch_id)
            .finish_non_exhaustive()
    }
}

impl NeonClient {
    pub fn new(api: &NeonApiConfig) -> Result<Self, NeonError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api.api_key))
            .map_err(|_| NeonError::Decode("NEON_API_KEY contains invalid header characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("neon-branch-harness/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| NeonError::Transport { attempts: 0, source })?;

        let defaults = HarnessConfig::default();
        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            project_id: api.project_id.clone(),
            retry: RetryPolicy::default(),
            poll_interval: defaults.ready_poll_interval,
            staging_branch_id: None,
            primary_branch_id: None,
            role_name: None,
            database_name: defaults.database_name,
            direct_urls: Arc::new(PoolerHostResolver),
        })
    }

    /// Default parent for new branches, and the id no branch may fork from.
    pub fn with_branch_guards(mut self, staging: Option<String>, primary: Option<String>) -> Self {
        self.staging_branch_id = staging;
        self.primary_branch_id = primary;
        self
    }

    pub fn with_harness_config(mut self, config: &HarnessConfig) -> Self {
        self.poll_interval = config.ready_poll_interval;
        self.role_name = config.role_name.clone();
        self.database_name = config.database_name.clone();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_direct_url_resolver(mut self, resolver: Arc<dyn DirectUrlResolver>) -> Self {
        self.direct_urls = resolver;
        self
    }

    pub fn staging_branch_id(&self) -> Option<&str> {
        self.staging_branch_id.as_deref()
    }

    pub fn primary_branch_id(&self) -> Option<&str> {
        self.primary_branch_id.as_deref()
    }

    fn branches_path(&self) -> String {
        format!("/projects/{}/branches", self.project_id)
    }

    fn branch_path(&self, branch_id: &str) -> String {
        format!("/projects/{}/branches/{}", self.project_id, branch_id)
    }

    /// Fork a new test branch with one read-write endpoint.
    ///
    /// The name and parent are checked before any request is sent.
    pub async fn create_test_branch(
        &self,
        name: Option<&str>,
        options: CreateBranchOptions,
    ) -> Result<BranchInfo, NeonError> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("test-{}", chrono::Utc::now().timestamp_millis()));
        validate_branch_name(&name)?;

        let parent_id = options
            .parent_id
            .or_else(|| self.staging_branch_id.clone())
            .ok_or(NeonError::NoParent)?;
        validate_not_production_branch(&parent_id, self.primary_branch_id.as_deref())?;

        let mut branch = json!({ "name": name, "parent_id": parent_id });
        if options.schema_only {
            branch["init_source"] = json!("schema-only");
        }
        let body = json!({
            "branch": branch,
            "endpoints": [{ "type": "read_write" }],
        });

        let created: BranchEnvelope = self
            .request(Method::POST, &self.branches_path(), &[], Some(&body))
            .await?;

        let prefix = created.branch.name.split('-').next().unwrap_or("test");
        crate::metrics::branch_created(prefix);
        tracing::info!(
            branch_id = %created.branch.id,
            name = %created.branch.name,
            parent_id = %parent_id,
            schema_only = options.schema_only,
            "Created test branch"
        );
        Ok(created.branch)
    }

    pub async fn get_branch(&self, branch_id: &str) -> Result<BranchInfo, NeonError> {
        let env: BranchEnvelope = self
            .request(Method::GET, &self.branch_path(branch_id), &[], None)
            .await?;
        Ok(env.branch)
    }

    pub async fn list_endpoints(&self, branch_id: &str) -> Result<Vec<Endpoint>, NeonError> {
        let path = format!("{}/endpoints", self.branch_path(branch_id));
        let env: EndpointsEnvelope = self.request(Method::GET, &path, &[], None).await?;
        Ok(env.endpoints)
    }

    /// Every branch in the project, unfiltered.
    pub async fn list_all_branches(&self) -> Result<Vec<BranchInfo>, NeonError> {
        let env: BranchesEnvelope = self
            .request(Method::GET, &self.branches_path(), &[], None)
            .await?;
        Ok(env.branches)
    }

    /// Pooled and direct URLs for the branch's endpoint.
    pub async fn get_branch_connection_strings(
        &self,
        branch_id: &str,
    ) -> Result<ConnectionStrings, NeonError> {
        let endpoints = self.list_endpoints(branch_id).await?;
        if endpoints.is_empty() {
            return Err(NeonError::NoEndpoints {
                branch_id: branch_id.to_string(),
            });
        }

        let role_name = self.resolve_role(branch_id).await?;
        let path = format!("/projects/{}/connection_uri", self.project_id);
        let query = [
            ("branch_id", branch_id),
            ("role_name", role_name.as_str()),
            ("database_name", self.database_name.as_str()),
            ("pooled", "true"),
        ];
        let env: ConnectionUriEnvelope = self.request(Method::GET, &path, &query, None).await?;

        let database_url = env.uri.trim().to_string();
        if database_url.is_empty() {
            return Err(NeonError::EmptyConnectionUri {
                branch_id: branch_id.to_string(),
            });
        }
        let direct_url = self
            .direct_urls
            .direct_url(&database_url)
            .unwrap_or_else(|| database_url.clone());

        Ok(ConnectionStrings {
            database_url,
            direct_url,
        })
    }

    async fn resolve_role(&self, branch_id: &str) -> Result<String, NeonError> {
        if let Some(role) = &self.role_name {
            return Ok(role.clone());
        }
        let path = format!("{}/roles", self.branch_path(branch_id));
        let env: RolesEnvelope = self.request(Method::GET, &path, &[], None).await?;
        env.roles
            .into_iter()
            .find(|r| !r.protected)
            .map(|r| r.name)
            .ok_or_else(|| NeonError::NoRole {
                branch_id: branch_id.to_string(),
            })
    }

    /// Delete a branch. Never fails: 404 counts as done, anything else is logged.
    pub async fn delete_test_branch(&self, branch_id: &str) -> DeleteOutcome {
        let path = self.branch_path(branch_id);
        let outcome = match self.send(Method::DELETE, &path, &[], None).await {
            Ok(_) => {
                tracing::info!(branch_id, "Deleted test branch");
                DeleteOutcome::Deleted
            }
            Err(err) if err.status() == Some(404) => {
                tracing::info!(branch_id, "Test branch already deleted");
                DeleteOutcome::AlreadyGone
            }
            Err(err) => {
                tracing::error!(branch_id, "Failed to delete test branch: {err}");
                DeleteOutcome::Failed(err.to_string())
            }
        };
        crate::metrics::branch_deleted(outcome.as_label());
        outcome
    }

    /// Poll until the branch and at least one endpoint are usable.
    pub async fn wait_for_branch_ready(
        &self,
        branch_id: &str,
        timeout: Duration,
    ) -> Result<(), NeonError> {
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.probe_ready(branch_id).await {
                Ok(true) => {
                    let waited = started.elapsed();
                    crate::metrics::branch_ready_wait(waited.as_millis() as u64);
                    tracing::info!(
                        branch_id,
                        polls,
                        waited_ms = waited.as_millis() as u64,
                        "Branch ready"
                    );
                    return Ok(());
                }
                Ok(false) => tracing::debug!(branch_id, polls, "Branch not ready yet"),
                Err(err) => tracing::debug!(branch_id, polls, "Readiness probe failed: {err}"),
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(NeonError::ReadyTimeout {
                    branch_id: branch_id.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
        }
    }

    async fn probe_ready(&self, branch_id: &str) -> Result<bool, NeonError> {
        let branch: BranchEnvelope = decode(
            self.send_once(Method::GET, &self.branch_path(branch_id), &[], None, 1)
                .await?,
        )
        .await?;
        if !branch.branch.is_state_ready() {
            return Ok(false);
        }

        let path = format!("{}/endpoints", self.branch_path(branch_id));
        let endpoints: EndpointsEnvelope =
            decode(self.send_once(Method::GET, &path, &[], None, 1).await?).await?;

        if endpoints.endpoints.iter().any(Endpoint::is_serving) {
            return Ok(true);
        }
        if !endpoints.endpoints.is_empty() {
            tracing::debug!(branch_id, "Endpoint present but not yet active, accepting");
            return Ok(true);
        }
        Ok(false)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, NeonError> {
        decode(self.send(method, path, query, body).await?).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, NeonError> {
        let label = format!("{method} {path}");
        let method = &method;
        with_retry(self.retry, &label, move |attempt| {
            self.send_once(method.clone(), path, query, body, attempt)
        })
        .await
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        attempt: u32,
    ) -> Result<reqwest::Response, NeonError> {
        let mut req = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, path));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(|source| NeonError::Transport {
            attempts: attempt,
            source,
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(NeonError::Status {
            method: method.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, NeonError> {
    let url = resp.url().path().to_string();
    resp.json::<T>()
        .await
        .map_err(|e| NeonError::Decode(format!("{url}: {e}")))
}
