use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::GoogleConfig;
use crate::forms::model::{Form, FormResponse};
use crate::forms::{DriveApi, FetchError, FormsApi};

/// Where the bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Static(String),
    /// Re-read on every request.
    File(PathBuf),
}

impl TokenSource {
    async fn token(&self) -> Result<String, FetchError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    FetchError::Transient(format!(
                        "failed to read token file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let token = content.trim();
                if token.is_empty() {
                    return Err(FetchError::Denied(format!(
                        "token file {} is empty",
                        path.display()
                    )));
                }
                Ok(token.to_string())
            }
        }
    }
}

/// Google Forms v1 + Drive v3 REST client.
pub struct GoogleClient {
    client: reqwest::Client,
    token: TokenSource,
    forms_base_url: String,
    drive_base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponsesPage {
    #[serde(default)]
    responses: Vec<FormResponse>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    #[serde(default)]
    name: Option<String>,
}

fn classify(status: StatusCode, body: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Denied(format!("{}: {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("{}: {}", status, body))
        }
        s if s.is_server_error() => FetchError::Transient(format!("{}: {}", status, body)),
        _ => FetchError::Denied(format!("{}: {}", status, body)),
    }
}

impl GoogleClient {
    pub fn new(config: &GoogleConfig) -> Result<Self> {
        let token = match (&config.access_token_file, &config.access_token) {
            (Some(path), _) => TokenSource::File(path.clone()),
            (None, Some(token)) => TokenSource::Static(token.clone()),
            (None, None) => anyhow::bail!("No Google credentials configured"),
        };

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            token,
            forms_base_url: config.forms_base_url.trim_end_matches('/').to_string(),
            drive_base_url: config.drive_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let token = self.token.token().await?;

        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl FormsApi for GoogleClient {
    async fn list_responses(&self, form_id: &str) -> Result<Vec<FormResponse>, FetchError> {
        let url = format!("{}/forms/{}/responses", self.forms_base_url, form_id);
        let mut responses = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = Vec::new();
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: ListResponsesPage = self.get_json(&url, &query).await?;
            responses.extend(page.responses);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        Ok(responses)
    }

    async fn get_response(
        &self,
        form_id: &str,
        response_id: &str,
    ) -> Result<FormResponse, FetchError> {
        let url = format!(
            "{}/forms/{}/responses/{}",
            self.forms_base_url, form_id, response_id
        );
        self.get_json(&url, &[]).await
    }

    async fn get_form(&self, form_id: &str) -> Result<Form, FetchError> {
        let url = format!("{}/forms/{}", self.forms_base_url, form_id);
        self.get_json(&url, &[]).await
    }
}

#[async_trait]
impl DriveApi for GoogleClient {
    async fn file_name(&self, file_id: &str) -> Result<String, FetchError> {
        let url = format!("{}/files/{}", self.drive_base_url, file_id);
        let file: DriveFile = self.get_json(&url, &[("fields", "name")]).await?;
        file.name
            .ok_or_else(|| FetchError::Malformed(format!("file {} has no name", file_id)))
    }
}
