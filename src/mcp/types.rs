// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::confluence::{Page, Space};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListPagesParams {
    /// The key of the Confluence space to list pages from
    pub space_key: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePageParams {
    /// The title of the new page
    pub title: String,
    /// The Markdown content to be converted and used for the page
    pub markdown_content: String,
    /// Optional: The path to the Markdown file in the local codebase for caching
    #[serde(default)]
    pub markdown_path: Option<String>,
    /// Optional: Override the default space key from project config
    #[serde(default)]
    pub space_key: Option<String>,
    /// Optional: Override the default parent page from project config
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePageParams {
    /// The ID of the Confluence page to update
    pub page_id: String,
    /// The new title for the page
    pub title: String,
    /// The Markdown content to be converted and used for the page
    pub markdown_content: String,
    /// Optional: The path to the Markdown file in the local codebase for caching
    #[serde(default)]
    pub markdown_path: Option<String>,
    /// The current version number of the page (required for updates)
    pub version: u64,
    /// Optional: Override the default parent page from project config
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeletePageParams {
    /// The ID of the Confluence page to delete
    pub page_id: String,
    /// Optional: The path to the Markdown file in the local codebase to remove from cache
    #[serde(default)]
    pub markdown_path: Option<String>,
}

#[derive(Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetupProjectParams {
    /// Confluence base URL (e.g., https://your-domain.atlassian.net/wiki)
    pub confluence_url: String,
    /// Confluence username/email
    pub username: String,
    /// Confluence API token
    pub api_token: String,
    /// Default space key
    pub space_key: String,
    /// Parent page title in hierarchy
    #[serde(default)]
    pub parent_page_title: Option<String>,
    /// Local file path mapping (optional)
    #[serde(default)]
    pub base_dir: Option<String>,
}

impl std::fmt::Debug for SetupProjectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupProjectParams")
            .field("confluence_url", &self.confluence_url)
            .field("space_key", &self.space_key)
            .field("parent_page_title", &self.parent_page_title)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSpacesResponse {
    pub spaces: Vec<Space>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPagesResponse {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageVersion {
    pub number: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub space_key: String,
    pub version: PageVersion,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_page_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageWriteResponse {
    pub success: bool,
    pub message: String,
    pub page: PageSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletePageResponse {
    pub success: bool,
    pub message: String,
}

/// Project configuration as shown to clients: the token is never echoed and the username is
/// masked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigView {
    pub confluence_url: String,
    pub username: String,
    pub space_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupProjectResponse {
    pub success: bool,
    pub message: String,
    pub config: ConfigView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ShowConfigResponse {
    Missing { message: String, configured: bool },
    Present { configured: bool, config: ConfigView },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResponse {
    pub success: bool,
    pub message: String,
    pub spaces_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRef {
    pub id: String,
    pub title: String,
}
