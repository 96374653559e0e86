// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Mermaid diagram rendering.
//!
//! [`DiagramRenderer`] turns one Mermaid source string into PNG bytes. The default implementation,
//! [`ChromiumRenderer`], drives a disposable headless browser per call.

mod cdp;
mod chromium;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use chromium::{find_browser, ChromiumConfig, ChromiumRenderer, DEFAULT_MERMAID_SCRIPT_URL};

pub const DEFAULT_WIDTH: u32 = 1200;
pub const DEFAULT_HEIGHT: u32 = 800;
pub const DEFAULT_BACKGROUND: &str = "white";
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Default,
    Dark,
    Forest,
    Neutral,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Dark => "dark",
            Self::Forest => "forest",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub theme: Theme,
    /// CSS color for the page behind the diagram. `"transparent"` produces a PNG with alpha.
    pub background_color: String,
    pub width: u32,
    pub height: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            theme: Theme::Default,
            background_color: DEFAULT_BACKGROUND.to_owned(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl RenderOptions {
    pub fn is_transparent(&self) -> bool {
        self.background_color.trim().eq_ignore_ascii_case("transparent")
    }

    /// Background color safe to interpolate into a stylesheet. Anything that is not a plain color
    /// token falls back to the default.
    pub fn css_background(&self) -> &str {
        let color = self.background_color.trim();
        let plain = !color.is_empty()
            && color.len() <= 64
            && color
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | '.' | '%' | ' '));
        if plain {
            color
        } else {
            DEFAULT_BACKGROUND
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiagramError {
    #[error("diagram did not render within {0:?}")]
    Timeout(Duration),
    #[error("mermaid rejected the diagram: {message}")]
    Rejected { message: String },
    #[error("rendering environment failure: {message}")]
    Environment { message: String },
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DiagramError {
    pub(crate) fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, DiagramError>;
}

/// Render `source` and write the PNG to `path`. The file holds exactly the bytes `render` returns.
pub async fn render_to_file(
    renderer: &dyn DiagramRenderer,
    source: &str,
    options: &RenderOptions,
    path: &Path,
) -> Result<(), DiagramError> {
    let png = renderer.render(source, options).await?;
    tokio::fs::write(path, &png)
        .await
        .map_err(|source| DiagramError::Io {
            path: path.to_path_buf(),
            source,
        })
}
