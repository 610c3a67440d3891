//! [`ContainerRegistry`] over the registry v2 HTTP API.

use crate::error::ObsError;
use crate::retry::RetryPolicy;
use crate::traits::ContainerRegistry;
use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Registry that the openSUSE build service publishes to
pub const OPENSUSE_REGISTRY: &str = "registry.opensuse.org";

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Anonymous registry client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    hostname: String,
    base_url: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl RegistryClient {
    /// Client for `https://<hostname>`.
    pub fn new(hostname: impl Into<String>) -> Result<Self> {
        let hostname = hostname.into();
        let base_url = format!("https://{hostname}");
        Self::with_base_url(hostname, base_url)
    }

    /// Client with an explicit base url, e.g. a plain http mirror.
    pub fn with_base_url(hostname: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("scratch-build-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            hostname: hostname.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(&format!("GET {path}"), || async {
                let response = self.http_client.get(&url).send().await?;
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(ObsError::NotFound(url.clone()));
                }
                if !status.is_success() {
                    return Err(ObsError::HttpStatus {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                let body = response.text().await?;
                Ok(serde_json::from_str(&body)?)
            })
            .await
    }
}

#[async_trait]
impl ContainerRegistry for RegistryClient {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn catalog(&self) -> Result<Vec<String>> {
        let catalog: Catalog = self.get_json("/v2/_catalog").await?;
        Ok(catalog.repositories)
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        let list: TagList = self
            .get_json(&format!("/v2/{repository}/tags/list"))
            .await?;
        Ok(list.tags.unwrap_or_default())
    }
}
