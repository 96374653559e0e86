// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::confluence::{ApiError, Credentials, DocumentApi, DocumentApiFactory, Page};
use crate::convert::{ConvertedPage, Converter};
use crate::store::{
    PageMapping, PageMappingStore, ProjectConfig, ProjectConfigStore, ProjectConfigUpdate,
};

use super::types::*;

pub const SERVER_NAME: &str = "confluence-mcp";
pub const SERVER_VERSION: &str = "0.1.0";

/// Everything a tool call needs. Shared by every session.
pub struct ToolContext {
    pub project_config: Arc<ProjectConfigStore>,
    pub page_mappings: Arc<PageMappingStore>,
    pub connector: Arc<dyn DocumentApiFactory>,
    pub converter: Arc<Converter>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("project_config", &self.project_config.path())
            .field("page_mappings", &self.page_mappings.path())
            .field("converter", &self.converter)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ConfluenceMcp {
    context: Arc<ToolContext>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ConfluenceMcp {
    pub fn new(context: ToolContext) -> Self {
        Self {
            context: Arc::new(context),
            tool_router: Self::tool_router(),
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Credentials from the saved project configuration when it is complete, else from the
    /// environment.
    fn credentials(&self) -> Result<Credentials, ApiError> {
        match self.context.project_config.get() {
            Some(config) if config.is_complete() => config.credentials(),
            _ => Credentials::from_env(),
        }
    }

    fn client(&self) -> Result<Arc<dyn DocumentApi>, ApiError> {
        self.context.connector.connect(&self.credentials()?)
    }

    #[tool(
        name = "confluence_list_spaces",
        description = "List all available Confluence spaces"
    )]
    async fn list_spaces(&self) -> Result<CallToolResult, ErrorData> {
        let spaces = match self.client() {
            Ok(client) => client.list_spaces().await,
            Err(err) => Err(err),
        };
        Ok(match spaces {
            Ok(spaces) => success(&ListSpacesResponse { spaces }),
            Err(err) => failure(err),
        })
    }

    #[tool(
        name = "confluence_list_pages",
        description = "List all pages in a Confluence space"
    )]
    async fn list_pages(
        &self,
        params: Parameters<ListPagesParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let ListPagesParams { space_key } = params.0;
        let pages = match self.client() {
            Ok(client) => client.list_pages(&space_key).await,
            Err(err) => Err(err),
        };
        Ok(match pages {
            Ok(pages) => success(&ListPagesResponse { pages }),
            Err(err) => failure(err),
        })
    }

    #[tool(
        name = "confluence_create_page",
        description = "Create a new Confluence page from Markdown content"
    )]
    async fn create_page(
        &self,
        params: Parameters<CreatePageParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let CreatePageParams { title, markdown_content, markdown_path, space_key, parent_page_id } =
            params.0;
        let config = self.context.project_config.get();

        let space_key = non_empty(space_key)
            .or_else(|| config.as_ref().and_then(|c| non_empty(Some(c.space_key.clone()))));
        let parent_page_id = non_empty(parent_page_id)
            .or_else(|| config.as_ref().and_then(|c| c.parent_page_id.clone()));

        let Some(space_key) = space_key else {
            return Ok(failure(
                "No space key provided. Either pass spaceKey parameter or set up project config with confluence_setup_project",
            ));
        };

        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return Ok(failure(err)),
        };
        let converted = match self.context.converter.convert(&markdown_content).await {
            Ok(converted) => converted,
            Err(err) => return Ok(failure(err)),
        };
        let page = match client
            .create_page(&space_key, &title, &converted.storage, parent_page_id.as_deref())
            .await
        {
            Ok(page) => page,
            Err(err) => return Ok(failure(err)),
        };
        info!(page = %page.id, space = %page.space_key, "page created");

        let (attachments, warnings) = upload_diagrams(client.as_ref(), &page.id, converted).await;
        self.record_mapping(markdown_path, &page);

        Ok(success(&PageWriteResponse {
            success: true,
            message: format!("✅ Page '{title}' created successfully!"),
            page: page_summary(page, parent_page_id),
            attachments,
            warnings,
        }))
    }

    #[tool(
        name = "confluence_update_page",
        description = "Update an existing Confluence page from Markdown content"
    )]
    async fn update_page(
        &self,
        params: Parameters<UpdatePageParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let UpdatePageParams { page_id, title, markdown_content, markdown_path, version, parent_page_id } =
            params.0;
        let parent_page_id = non_empty(parent_page_id).or_else(|| {
            self.context
                .project_config
                .get()
                .and_then(|config| config.parent_page_id)
        });

        let client = match self.client() {
            Ok(client) => client,
            Err(err) => return Ok(failure(err)),
        };
        let converted = match self.context.converter.convert(&markdown_content).await {
            Ok(converted) => converted,
            Err(err) => return Ok(failure(err)),
        };
        let page = match client
            .update_page(&page_id, &title, &converted.storage, version, parent_page_id.as_deref())
            .await
        {
            Ok(page) => page,
            Err(err) => return Ok(failure(err)),
        };
        info!(page = %page.id, version = page.version, "page updated");

        let (attachments, warnings) = upload_diagrams(client.as_ref(), &page.id, converted).await;
        self.record_mapping(markdown_path, &page);

        Ok(success(&PageWriteResponse {
            success: true,
            message: format!("✅ Page '{title}' updated successfully!"),
            page: page_summary(page, parent_page_id),
            attachments,
            warnings,
        }))
    }

    #[tool(
        name = "confluence_delete_page",
        description = "Delete a Confluence page and remove it from cache"
    )]
    async fn delete_page(
        &self,
        params: Parameters<DeletePageParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let DeletePageParams { page_id, markdown_path } = params.0;

        let deleted = match self.client() {
            Ok(client) => client.delete_page(&page_id).await,
            Err(err) => Err(err),
        };
        if let Err(err) = deleted {
            return Ok(failure(err));
        }
        info!(page = %page_id, "page deleted");

        let removed = match non_empty(markdown_path) {
            Some(path) => self.context.page_mappings.remove(&path),
            None => self.context.page_mappings.remove_by_page_id(&page_id),
        };
        if let Err(err) = removed {
            warn!(page = %page_id, error = %err, "cannot update page mappings");
        }

        Ok(success(&DeletePageResponse {
            success: true,
            message: format!("Page {page_id} deleted successfully"),
        }))
    }

    #[tool(
        name = "confluence_setup_project",
        description = "Set up Confluence project configuration with your specific settings"
    )]
    async fn setup_project(
        &self,
        params: Parameters<SetupProjectParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let SetupProjectParams { confluence_url, username, api_token, space_key, parent_page_title, base_dir } =
            params.0;

        let client = match Credentials::new(&confluence_url, &username, &api_token)
            .and_then(|credentials| self.context.connector.connect(&credentials))
        {
            Ok(client) => client,
            Err(err) => return Ok(connect_failure(&err)),
        };

        match client.list_spaces().await {
            Ok(spaces) if spaces.iter().any(|space| space.key == space_key) => {}
            Ok(spaces) => {
                return Ok(failure_with(json!({
                    "error": format!("Space with key '{space_key}' not found"),
                    "availableSpaces": spaces,
                })));
            }
            Err(err) => return Ok(connect_failure(&err)),
        }

        let parent_page_title = non_empty(parent_page_title);
        let mut parent_page_id = None;
        if let Some(parent_title) = &parent_page_title {
            let pages = match client.list_pages(&space_key).await {
                Ok(pages) => pages,
                Err(err) => {
                    return Ok(failure(format!("Failed to find parent page: {err}")));
                }
            };
            match pages.iter().find(|page| &page.title == parent_title) {
                Some(parent) => parent_page_id = Some(parent.id.clone()),
                None => {
                    let available = pages
                        .into_iter()
                        .take(10)
                        .map(|page| PageRef { id: page.id, title: page.title })
                        .collect::<Vec<_>>();
                    return Ok(failure_with(json!({
                        "error": format!("Parent page '{parent_title}' not found in space '{space_key}'"),
                        "availablePages": available,
                    })));
                }
            }
        }

        let saved = self.context.project_config.save(ProjectConfigUpdate {
            confluence_url: Some(confluence_url),
            username: Some(username),
            api_token: Some(api_token),
            space_key: Some(space_key),
            parent_page_title,
            parent_page_id,
            base_dir: non_empty(base_dir),
        });
        let saved = match saved {
            Ok(saved) => saved,
            Err(err) => return Ok(failure(err)),
        };
        info!(space = %saved.space_key, "project configuration saved");

        let mut config = config_view(&saved);
        config.last_updated = None;
        Ok(success(&SetupProjectResponse {
            success: true,
            message: "✅ Confluence project configuration saved successfully!".to_owned(),
            config,
        }))
    }

    #[tool(
        name = "confluence_show_config",
        description = "Show current project configuration"
    )]
    async fn show_config(&self) -> Result<CallToolResult, ErrorData> {
        let response = match self.context.project_config.get() {
            None => ShowConfigResponse::Missing {
                message: "No project configuration found. Use confluence_setup_project to configure."
                    .to_owned(),
                configured: false,
            },
            Some(config) => ShowConfigResponse::Present {
                configured: true,
                config: config_view(&config),
            },
        };
        Ok(success(&response))
    }

    #[tool(
        name = "confluence_test_connection",
        description = "Test Confluence connection"
    )]
    async fn test_connection(&self) -> Result<CallToolResult, ErrorData> {
        let spaces = match self.client() {
            Ok(client) => client.list_spaces().await,
            Err(err) => Err(err),
        };
        Ok(match spaces {
            Ok(spaces) => success(&TestConnectionResponse {
                success: true,
                message: format!("✅ Connection successful! Found {} spaces.", spaces.len()),
                spaces_count: spaces.len(),
            }),
            Err(err) => failure_with(json!({
                "success": false,
                "error": format!("❌ Connection failed: {err}"),
                "troubleshooting": [
                    "Check your Confluence base URL",
                    "Verify your username/email is correct",
                    "Ensure your API token is valid",
                    "Make sure you have access to the Confluence instance",
                ],
            })),
        })
    }

    fn record_mapping(&self, markdown_path: Option<String>, page: &Page) {
        let Some(markdown_path) = non_empty(markdown_path) else {
            return;
        };
        let mapping = PageMapping {
            markdown_path,
            page_id: page.id.clone(),
            space_key: page.space_key.clone(),
            title: page.title.clone(),
            last_updated: crate::store::timestamp(),
        };
        if let Err(err) = self.context.page_mappings.set(mapping) {
            warn!(page = %page.id, error = %err, "cannot record page mapping");
        }
    }
}

#[tool_handler]
impl ServerHandler for ConfluenceMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: SERVER_NAME.to_owned(),
                version: SERVER_VERSION.to_owned(),
                ..Default::default()
            },
            instructions: Some(
                "Confluence publishing server (tools: confluence_list_spaces, confluence_list_pages, confluence_create_page, confluence_update_page, confluence_delete_page, confluence_setup_project, confluence_show_config, confluence_test_connection)"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// Result payloads, masking and attachment upload shared by the tool handlers.
include!("server/helpers.rs");
