// ============================================================================
// NAME RESOLVERS
// ============================================================================
// Turn an application identifier into a display name. Resolvers are only
// ever called from the name resolution worker, never from ingestion.
// ============================================================================

use std::fmt;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::error::{AuditError, AuditResult};

#[async_trait]
pub trait NameResolver: Send + Sync + fmt::Debug {
    /// Resolve an application identifier. An empty name or an error both
    /// mean "unresolvable" to the caller.
    async fn resolve(&self, app_id: &str) -> AuditResult<String>;
}

// ----------------------------------------------------------------------------
// Noop & Static Resolvers
// ----------------------------------------------------------------------------

/// Never resolves anything; every record gets the synthetic label.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl NameResolver for NoopResolver {
    async fn resolve(&self, _app_id: &str) -> AuditResult<String> {
        Ok(String::new())
    }
}

/// Resolves from a fixed identifier-to-name table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    names: AHashMap<String, String>,
}

impl StaticResolver {
    pub fn new<I, K, V>(names: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: names.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve(&self, app_id: &str) -> AuditResult<String> {
        Ok(self.names.get(app_id).cloned().unwrap_or_default())
    }
}

// ----------------------------------------------------------------------------
// HTTP Resolver - platform apps API
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AppResource {
    #[serde(default)]
    name: String,
}

/// Looks names up through `GET {endpoint}/v3/apps/{guid}`.
pub struct HttpResolver {
    client: HttpClient,
    endpoint: String,
    token: Option<String>,
}

impl fmt::Debug for HttpResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResolver")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpResolver {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> AuditResult<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| AuditError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl NameResolver for HttpResolver {
    async fn resolve(&self, app_id: &str) -> AuditResult<String> {
        let url = format!("{}/v3/apps/{}", self.endpoint, app_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuditError::resolution_failure(app_id, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuditError::resolution_failure(
                app_id,
                format!("apps API returned status {}", response.status()),
            ));
        }

        let app: AppResource = response
            .json()
            .await
            .map_err(|e| AuditError::resolution_failure(app_id, format!("bad response body: {e}")))?;
        Ok(app.name)
    }
}
