//! Container registry tag-existence check

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::config::{DockerConfig, DockerRegistryKind};
use crate::lookup::error::DockerError;
use crate::template::render_version;

/// Registry tokens are reused for this long
const TOKEN_TTL: Duration = Duration::from_secs(4 * 60);

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json";

/// Base URLs of the supported registries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoints {
    pub hub: String,
    pub ghcr: String,
    pub quay: String,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            hub: "https://hub.docker.com".to_string(),
            ghcr: "https://ghcr.io".to_string(),
            quay: "https://quay.io".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct QuayTags {
    #[serde(default)]
    tags: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires: Instant,
}

#[derive(Debug)]
pub struct DockerCheck {
    kind: DockerRegistryKind,
    image: String,
    /// May contain `{{ version }}`
    tag: String,
    username: Option<String>,
    token: Option<String>,
    cached_token: Mutex<Option<CachedToken>>,
}

impl DockerCheck {
    pub fn from_config(config: &DockerConfig) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        if config.image.trim().is_empty() {
            problems.push("image: required".to_string());
        }
        if config.tag.trim().is_empty() {
            problems.push("tag: required".to_string());
        }
        if config.kind == DockerRegistryKind::Hub
            && config.username.is_some()
            && config.token.is_none()
        {
            problems.push("token: required when username is set".to_string());
        }
        if !problems.is_empty() {
            return Err(problems);
        }

        let image = match config.kind {
            DockerRegistryKind::Hub if !config.image.contains('/') => {
                format!("library/{}", config.image)
            }
            _ => config.image.clone(),
        };

        Ok(Self {
            kind: config.kind,
            image,
            tag: config.tag.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
            cached_token: Mutex::new(None),
        })
    }

    /// Verify that `image:tag` exists, with `{{ version }}` rendered into the tag
    pub async fn check(
        &self,
        client: &reqwest::Client,
        endpoints: &RegistryEndpoints,
        version: &str,
    ) -> Result<(), DockerError> {
        let tag = render_version(&self.tag, version);
        debug!("Checking {}:{} on {:?}", self.image, tag, self.kind);

        match self.kind {
            DockerRegistryKind::Hub => self.check_hub(client, &endpoints.hub, &tag).await,
            DockerRegistryKind::Ghcr => self.check_ghcr(client, &endpoints.ghcr, &tag).await,
            DockerRegistryKind::Quay => self.check_quay(client, &endpoints.quay, &tag).await,
        }
    }

    async fn check_hub(
        &self,
        client: &reqwest::Client,
        base: &str,
        tag: &str,
    ) -> Result<(), DockerError> {
        let url = format!("{}/v2/repositories/{}/tags/{}", base, self.image, tag);
        let mut request = client.get(&url);
        if let Some(token) = self.hub_token(client, base).await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        self.interpret_status(response.status(), tag)
    }

    async fn check_ghcr(
        &self,
        client: &reqwest::Client,
        base: &str,
        tag: &str,
    ) -> Result<(), DockerError> {
        let token = self.ghcr_token(client, base).await?;
        let url = format!("{}/v2/{}/manifests/{}", base, self.image, tag);
        let response = client
            .get(&url)
            .header("Accept", MANIFEST_ACCEPT)
            .bearer_auth(token)
            .send()
            .await?;
        self.interpret_status(response.status(), tag)
    }

    async fn check_quay(
        &self,
        client: &reqwest::Client,
        base: &str,
        tag: &str,
    ) -> Result<(), DockerError> {
        let url = format!(
            "{}/api/v1/repository/{}/tag/?onlyActiveTags=true&specificTag={}",
            base, self.image, tag
        );
        let mut request = client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        self.interpret_status(response.status(), tag)?;

        let tags: QuayTags = response.json().await?;
        if tags.tags.is_empty() {
            return Err(self.not_found(tag));
        }
        Ok(())
    }

    /// Docker Hub only needs a token for private repositories
    async fn hub_token(
        &self,
        client: &reqwest::Client,
        base: &str,
    ) -> Result<Option<String>, DockerError> {
        let (Some(username), Some(password)) = (&self.username, &self.token) else {
            return Ok(None);
        };
        if let Some(token) = self.cached() {
            return Ok(Some(token));
        }

        let response = client
            .post(format!("{}/v2/users/login", base))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DockerError::Auth {
                image: self.image.clone(),
                message: format!("login returned status {}", response.status()),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(Some(self.store(token.token)))
    }

    /// GHCR accepts a configured token directly, otherwise an anonymous pull token
    async fn ghcr_token(&self, client: &reqwest::Client, base: &str) -> Result<String, DockerError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let response = client
            .get(format!(
                "{}/token?scope=repository:{}:pull",
                base, self.image
            ))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DockerError::Auth {
                image: self.image.clone(),
                message: format!("token exchange returned status {}", response.status()),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(self.store(token.token))
    }

    fn cached(&self) -> Option<String> {
        let guard = self
            .cached_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|t| t.expires > Instant::now())
            .map(|t| t.value.clone())
    }

    fn store(&self, token: String) -> String {
        let mut guard = self
            .cached_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(CachedToken {
            value: token.clone(),
            expires: Instant::now() + TOKEN_TTL,
        });
        token
    }

    fn interpret_status(&self, status: reqwest::StatusCode, tag: &str) -> Result<(), DockerError> {
        match status {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Err(self.not_found(tag)),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(DockerError::Auth {
                    image: self.image.clone(),
                    message: format!("status {}", status),
                })
            }
            other => Err(DockerError::UnexpectedStatus {
                image: self.image.clone(),
                tag: tag.to_string(),
                status: other.as_u16(),
            }),
        }
    }

    fn not_found(&self, tag: &str) -> DockerError {
        DockerError::TagNotFound {
            image: self.image.clone(),
            tag: tag.to_string(),
        }
    }
}
