//! Identity authentication with a cached token
//!
//! A run first tries the token stored in the token file (by default
//! `~/.rax-autoscaler-token`). If that token is rejected, it authenticates
//! with username and API key and stores the new token for the next run.
//! Both paths return the service catalog used to locate regional endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::cloud::{CloudError, CloudResult};
use crate::error::{AutoscaleError, AutoscaleResult};

pub const DEFAULT_IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com/v2.0";

const TOKEN_FILE_NAME: &str = ".rax-autoscaler-token";

pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(TOKEN_FILE_NAME)
}

/// Token and tenant persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub region: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogService {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    pub services: Vec<CatalogService>,
}

impl ServiceCatalog {
    /// Public URL of a service type in a region.
    ///
    /// Global services (no region on the endpoint) match every region.
    pub fn endpoint(&self, service_type: &str, region: &str) -> CloudResult<String> {
        self.services
            .iter()
            .filter(|service| service.service_type == service_type)
            .flat_map(|service| service.endpoints.iter())
            .find(|endpoint| match &endpoint.region {
                Some(r) => r.eq_ignore_ascii_case(region),
                None => true,
            })
            .map(|endpoint| endpoint.public_url.trim_end_matches('/').to_string())
            .ok_or_else(|| CloudError::MissingEndpoint(service_type.to_string()))
    }
}

/// An authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub tenant_id: String,
    pub region: String,
    pub catalog: ServiceCatalog,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: AccessToken,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: ServiceCatalog,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    id: String,
    tenant: Tenant,
}

#[derive(Debug, Deserialize)]
struct Tenant {
    id: String,
}

pub struct Auth {
    client: Client,
    identity_url: String,
    username: String,
    api_key: String,
    region: String,
    token_path: PathBuf,
}

impl Auth {
    pub fn new(
        username: String,
        api_key: String,
        region: String,
        timeout: Duration,
    ) -> CloudResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            username,
            api_key,
            region,
            token_path: default_token_path(),
        })
    }

    pub fn with_identity_url(mut self, url: impl Into<String>) -> Self {
        self.identity_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Authenticate with the cached token, falling back to credentials.
    #[instrument(skip(self), fields(username = %self.username, region = %self.region))]
    pub async fn authenticate(&self) -> AutoscaleResult<Session> {
        if let Some(cached) = self.load_token() {
            debug!("loaded token from {}", self.token_path.display());
            match self.authenticate_token(&cached).await {
                Ok(session) => {
                    info!("authenticated successfully");
                    return Ok(session);
                }
                Err(e) => debug!("cannot authenticate with cached token: {e}"),
            }
        }

        match self.authenticate_credentials().await {
            Ok(session) => {
                info!("authenticated successfully");
                self.save_token(&CachedToken {
                    token: session.token.clone(),
                    tenant_id: session.tenant_id.clone(),
                });
                Ok(session)
            }
            Err(e) => {
                warn!("cannot authenticate with credentials: {e}");
                Err(AutoscaleError::Auth(e.to_string()))
            }
        }
    }

    async fn authenticate_credentials(&self) -> CloudResult<Session> {
        let body = json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": self.username,
                    "apiKey": self.api_key,
                }
            }
        });
        self.request_token(&body).await
    }

    async fn authenticate_token(&self, cached: &CachedToken) -> CloudResult<Session> {
        let body = json!({
            "auth": {
                "token": { "id": cached.token },
                "tenantId": cached.tenant_id,
            }
        });
        self.request_token(&body).await
    }

    async fn request_token(&self, body: &serde_json::Value) -> CloudResult<Session> {
        let url = format!("{}/tokens", self.identity_url);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let access: AccessResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Decode(e.to_string()))?;

        Ok(Session {
            token: access.access.token.id,
            tenant_id: access.access.token.tenant.id,
            region: self.region.clone(),
            catalog: access.access.service_catalog,
        })
    }

    pub fn load_token(&self) -> Option<CachedToken> {
        let content = match std::fs::read_to_string(&self.token_path) {
            Ok(content) => content,
            Err(e) => {
                debug!("cannot read token file {}: {e}", self.token_path.display());
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(cached) => Some(cached),
            Err(e) => {
                error!(
                    "cannot decode JSON data in token file {}: {e}",
                    self.token_path.display()
                );
                None
            }
        }
    }

    fn save_token(&self, cached: &CachedToken) {
        let result = serde_json::to_string(cached)
            .map_err(std::io::Error::other)
            .and_then(|data| std::fs::write(&self.token_path, data));

        if let Err(e) = result {
            error!(
                "cannot write token to file {}: {e}",
                self.token_path.display()
            );
        }
    }

    /// Forget the session: delete the token file.
    pub fn force_unauthenticate(&self) {
        if let Err(e) = std::fs::remove_file(&self.token_path) {
            debug!("no token file removed: {e}");
        }
    }
}
