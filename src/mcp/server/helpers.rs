// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

/// Tool result helpers: pretty JSON payloads, `{"error": ...}` failures, username masking and
/// diagram attachment upload.
fn pretty(value: &impl Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| {
        warn!(error = %err, "cannot serialize tool result");
        format!("{{\"error\": \"{err}\"}}")
    })
}

fn success(value: &impl Serialize) -> CallToolResult {
    CallToolResult::success(vec![Content::text(pretty(value))])
}

fn failure(message: impl std::fmt::Display) -> CallToolResult {
    failure_with(json!({ "error": message.to_string() }))
}

fn failure_with(payload: Value) -> CallToolResult {
    CallToolResult::error(vec![Content::text(pretty(&payload))])
}

fn connect_failure(err: &ApiError) -> CallToolResult {
    failure_with(json!({
        "error": format!("Failed to connect to Confluence: {err}"),
        "troubleshooting": [
            "Check your Confluence URL format",
            "Verify your username/email is correct",
            "Ensure your API token is valid",
            "Make sure you have access to the Confluence instance",
        ],
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// `someone@example.com` becomes `som***@example.com`; strings without an `@` after the third
/// character are returned unchanged.
fn mask_username(username: &str) -> String {
    static MASK: OnceLock<Option<Regex>> = OnceLock::new();
    match MASK.get_or_init(|| Regex::new(r"(.{3}).*(@.*)").ok()) {
        Some(mask) => mask.replace(username, "${1}***${2}").into_owned(),
        None => username.to_owned(),
    }
}

fn config_view(config: &ProjectConfig) -> ConfigView {
    ConfigView {
        confluence_url: config.confluence_url.clone(),
        username: mask_username(&config.username),
        space_key: config.space_key.clone(),
        parent_page_title: config.parent_page_title.clone(),
        parent_page_id: config.parent_page_id.clone(),
        base_dir: config.base_dir.clone(),
        last_updated: Some(config.last_updated.clone()).filter(|value| !value.is_empty()),
    }
}

fn page_summary(page: Page, parent_page_id: Option<String>) -> PageSummary {
    PageSummary {
        id: page.id,
        title: page.title,
        space_key: page.space_key,
        version: PageVersion { number: page.version },
        parent_page_id,
    }
}

/// Attach every rendered diagram to the page so the image references in the markup resolve.
/// Upload failures do not undo the page write; they come back as warnings.
async fn upload_diagrams(
    client: &dyn DocumentApi,
    page_id: &str,
    converted: ConvertedPage,
) -> (Vec<String>, Vec<String>) {
    let mut uploaded = Vec::with_capacity(converted.diagrams.len());
    let mut warnings = Vec::new();
    for diagram in converted.diagrams {
        match client
            .upload_attachment(page_id, &diagram.filename, diagram.png)
            .await
        {
            Ok(()) => uploaded.push(diagram.filename),
            Err(err) => {
                warn!(page = %page_id, file = %diagram.filename, error = %err, "attachment upload failed");
                warnings.push(format!("Failed to upload {}: {err}", diagram.filename));
            }
        }
    }
    (uploaded, warnings)
}
