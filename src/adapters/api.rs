use async_trait::async_trait;
use reqwest::Client;
use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::error::{CigraphError, Result};

/// Registry capability used for cross-project (`project:`) includes.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Fetches one file from another project's repository, optionally at a
    /// specific ref.
    async fn fetch_project_file(
        &self,
        project: &str,
        file: &str,
        ref_: Option<&str>,
    ) -> Result<String>;

    /// Cheap existence probe, for callers that want to validate a reference
    /// without pulling content.
    async fn project_file_exists(&self, project: &str, file: &str, ref_: Option<&str>) -> bool;
}

/// GitLab REST implementation using the raw repository-file endpoint.
pub struct GitLabRegistryApi {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl GitLabRegistryApi {
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `token` - Optional personal access token
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the client cannot be
    /// built.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CigraphError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base = Url::parse(base_url)
            .map_err(|e| CigraphError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn raw_file_url(&self, project: &str, file: &str, ref_: Option<&str>) -> Result<Url> {
        let project_id: String = byte_serialize(project.as_bytes()).collect();
        let file_path: String = byte_serialize(file.trim_start_matches('/').as_bytes()).collect();

        let mut url = self
            .base
            .join(&format!(
                "api/v4/projects/{project_id}/repository/files/{file_path}/raw"
            ))
            .map_err(|e| CigraphError::Config(format!("Invalid API URL: {e}")))?;

        if let Some(ref_) = ref_ {
            url.query_pairs_mut().append_pair("ref", ref_);
        }
        Ok(url)
    }
}

#[async_trait]
impl RegistryApi for GitLabRegistryApi {
    async fn fetch_project_file(
        &self,
        project: &str,
        file: &str,
        ref_: Option<&str>,
    ) -> Result<String> {
        let url = self.raw_file_url(project, file, ref_)?;

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CigraphError::Api(format!(
                "fetching {file} from {project} failed with status {status}"
            )));
        }
        Ok(response.text().await?)
    }

    async fn project_file_exists(&self, project: &str, file: &str, ref_: Option<&str>) -> bool {
        self.fetch_project_file(project, file, ref_).await.is_ok()
    }
}

/// Canned-response registry for engine tests, keyed by `project:file`.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockRegistryApi {
    files: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MockRegistryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, project: &str, file: &str, content: &str) {
        self.files
            .insert(format!("{project}:{file}"), content.to_string());
    }
}

#[cfg(test)]
#[async_trait]
impl RegistryApi for MockRegistryApi {
    async fn fetch_project_file(
        &self,
        project: &str,
        file: &str,
        _ref: Option<&str>,
    ) -> Result<String> {
        self.files
            .get(&format!("{project}:{file}"))
            .cloned()
            .ok_or_else(|| CigraphError::Api(format!("no such file: {project}:{file}")))
    }

    async fn project_file_exists(&self, project: &str, file: &str, _ref: Option<&str>) -> bool {
        self.files.contains_key(&format!("{project}:{file}"))
    }
}
