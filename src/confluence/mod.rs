// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Confluence REST API client.
//!
//! Tools talk to the wiki through [`DocumentApi`]; [`ConfluenceClient`] is the reqwest-backed
//! implementation against `<base url>/rest/api`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;

pub const ENV_BASE_URL: &str = "CONFLUENCE_BASE_URL";
pub const ENV_USERNAME: &str = "CONFLUENCE_USERNAME";
pub const ENV_API_TOKEN: &str = "CONFLUENCE_API_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Confluence configuration is incomplete")]
    Incomplete,
    #[error("invalid page id {0:?}")]
    InvalidPageId(String),
    #[error("page version {0} cannot be incremented")]
    InvalidVersion(u64),
    #[error("Confluence returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_url: String,
    pub username: String,
    pub api_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let credentials = Self {
            base_url: base_url.into(),
            username: username.into(),
            api_token: api_token.into(),
        };
        if credentials.base_url.trim().is_empty()
            || credentials.username.trim().is_empty()
            || credentials.api_token.is_empty()
        {
            return Err(ApiError::Incomplete);
        }
        Ok(credentials)
    }

    pub fn from_env() -> Result<Self, ApiError> {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self::new(var(ENV_BASE_URL), var(ENV_USERNAME), var(ENV_API_TOKEN))
    }

    /// REST root, tolerant of a trailing slash on the configured site URL.
    pub fn api_root(&self) -> String {
        format!("{}/rest/api", self.base_url.trim().trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Space {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub version: u64,
}

#[async_trait]
pub trait DocumentApi: Send + Sync {
    async fn list_spaces(&self) -> Result<Vec<Space>, ApiError>;

    async fn list_pages(&self, space_key: &str) -> Result<Vec<Page>, ApiError>;

    async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        storage: &str,
        parent_id: Option<&str>,
    ) -> Result<Page, ApiError>;

    /// Replace the page body; `current_version` is the version being replaced.
    async fn update_page(
        &self,
        page_id: &str,
        title: &str,
        storage: &str,
        current_version: u64,
        parent_id: Option<&str>,
    ) -> Result<Page, ApiError>;

    async fn delete_page(&self, page_id: &str) -> Result<(), ApiError>;

    /// Create or replace the attachment `filename` on the page.
    async fn upload_attachment(
        &self,
        page_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<(), ApiError>;
}

/// Builds a [`DocumentApi`] for a set of credentials.
pub trait DocumentApiFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn DocumentApi>, ApiError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConfluenceConnector;

impl DocumentApiFactory for ConfluenceConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn DocumentApi>, ApiError> {
        Ok(Arc::new(ConfluenceClient::new(credentials.clone())?))
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceClient {
    client: Client,
    root: String,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Results<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SpaceDto {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct VersionDto {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: String,
    title: String,
    #[serde(default)]
    space: Option<SpaceRef>,
    #[serde(default)]
    version: Option<VersionDto>,
}

impl PageDto {
    fn into_page(self, fallback_space: &str) -> Page {
        Page {
            id: self.id,
            title: self.title,
            space_key: self
                .space
                .map(|space| space.key)
                .unwrap_or_else(|| fallback_space.to_owned()),
            version: self.version.map(|v| v.number).unwrap_or(1),
        }
    }
}

fn check_page_id(page_id: &str) -> Result<(), ApiError> {
    if page_id.is_empty() || !page_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::InvalidPageId(page_id.to_owned()));
    }
    Ok(())
}

fn page_body(title: &str, storage: &str, parent_id: Option<&str>) -> Value {
    let mut body = json!({
        "type": "page",
        "title": title,
        "body": { "storage": { "value": storage, "representation": "storage" } },
    });
    if let Some(parent_id) = parent_id {
        body["ancestors"] = json!([{ "id": parent_id }]);
    }
    body
}

/// Prefer the `message` field of a Confluence error body over the raw text.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(ToOwned::to_owned))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

impl ConfluenceClient {
    pub fn new(credentials: Credentials) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            root: credentials.api_root(),
            credentials,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.root))
            .basic_auth(&self.credentials.username, Some(&self.credentials.api_token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: upstream_message(&body),
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl DocumentApi for ConfluenceClient {
    async fn list_spaces(&self) -> Result<Vec<Space>, ApiError> {
        let request = self
            .request(reqwest::Method::GET, "/space")
            .query(&[("limit", PAGE_SIZE.to_string())]);
        let spaces: Results<SpaceDto> = self.json(request).await?;
        debug!(count = spaces.results.len(), "listed spaces");
        Ok(spaces
            .results
            .into_iter()
            .map(|space| Space {
                key: space.key,
                name: space.name,
            })
            .collect())
    }

    async fn list_pages(&self, space_key: &str) -> Result<Vec<Page>, ApiError> {
        let request = self.request(reqwest::Method::GET, "/content").query(&[
            ("spaceKey", space_key.to_owned()),
            ("type", "page".to_owned()),
            ("limit", PAGE_SIZE.to_string()),
            ("expand", "version".to_owned()),
        ]);
        let pages: Results<PageDto> = self.json(request).await?;
        Ok(pages
            .results
            .into_iter()
            .map(|page| page.into_page(space_key))
            .collect())
    }

    async fn create_page(
        &self,
        space_key: &str,
        title: &str,
        storage: &str,
        parent_id: Option<&str>,
    ) -> Result<Page, ApiError> {
        let mut body = page_body(title, storage, parent_id);
        body["space"] = json!({ "key": space_key });
        let request = self.request(reqwest::Method::POST, "/content").json(&body);
        let page: PageDto = self.json(request).await?;
        Ok(page.into_page(space_key))
    }

    async fn update_page(
        &self,
        page_id: &str,
        title: &str,
        storage: &str,
        current_version: u64,
        parent_id: Option<&str>,
    ) -> Result<Page, ApiError> {
        check_page_id(page_id)?;
        let next_version = current_version
            .checked_add(1)
            .ok_or(ApiError::InvalidVersion(current_version))?;
        let mut body = page_body(title, storage, parent_id);
        body["version"] = json!({ "number": next_version });
        let request = self
            .request(reqwest::Method::PUT, &format!("/content/{page_id}"))
            .json(&body);
        let mut page: PageDto = self.json(request).await?;

        // Update replies do not always expand the space.
        if page.space.is_none() {
            let lookup = self
                .request(reqwest::Method::GET, &format!("/content/{page_id}"))
                .query(&[("expand", "space")]);
            let current: PageDto = self.json(lookup).await?;
            page.space = current.space;
        }
        let Some(space_key) = page.space.as_ref().map(|space| space.key.clone()) else {
            return Err(ApiError::InvalidResponse(format!("page {page_id} has no space")));
        };
        Ok(page.into_page(&space_key))
    }

    async fn delete_page(&self, page_id: &str) -> Result<(), ApiError> {
        check_page_id(page_id)?;
        self.send(self.request(reqwest::Method::DELETE, &format!("/content/{page_id}")))
            .await?;
        Ok(())
    }

    async fn upload_attachment(
        &self,
        page_id: &str,
        filename: &str,
        png: Vec<u8>,
    ) -> Result<(), ApiError> {
        check_page_id(page_id)?;
        let part = Part::bytes(png)
            .file_name(filename.to_owned())
            .mime_str("image/png")?;
        let form = Form::new().part("file", part).text("minorEdit", "true");
        let request = self
            .request(
                reqwest::Method::PUT,
                &format!("/content/{page_id}/child/attachment"),
            )
            .header("X-Atlassian-Token", "no-check")
            .multipart(form);
        self.send(request).await?;
        debug!(page = page_id, filename, "attachment uploaded");
        Ok(())
    }
}
