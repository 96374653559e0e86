// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Markdown to Confluence storage format.
//!
//! The Markdown is parsed into a typed tree ([`document`]), annotated (callouts, table of
//! contents), its Mermaid blocks are rendered through a [`DiagramRenderer`], and the resolved tree
//! is serialized ([`storage`]). Diagram failures degrade to a warning macro in place; only invalid
//! input fails the whole conversion.

pub mod document;
pub mod storage;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::render::{DiagramRenderer, RenderOptions};

use self::document::DiagramOutcome;

pub use self::storage::diagram_filename;

/// Largest Markdown input accepted for conversion.
pub const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    #[error("markdown input is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("markdown contains character U+{code:04X} at line {line}, which is not allowed in XML")]
    InvalidCharacter { code: u32, line: usize },
}

/// Rendered diagram to upload next to the page as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDiagram {
    pub filename: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedPage {
    pub storage: String,
    pub diagrams: Vec<RenderedDiagram>,
}

#[derive(Clone)]
pub struct Converter {
    renderer: Arc<dyn DiagramRenderer>,
    options: RenderOptions,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Converter {
    pub fn new(renderer: Arc<dyn DiagramRenderer>) -> Self {
        Self {
            renderer,
            options: RenderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn convert(&self, markdown: &str) -> Result<ConvertedPage, ConvertError> {
        validate(markdown)?;

        let mut doc = document::parse(markdown);
        document::annotate(&mut doc.blocks);

        let mut outcomes = Vec::with_capacity(doc.diagrams.len());
        let mut rendered = Vec::new();
        for (index, source) in doc.diagrams.iter().enumerate() {
            let number = index + 1;
            match self.renderer.render(source, &self.options).await {
                Ok(png) => {
                    debug!(diagram = number, bytes = png.len(), "diagram rendered");
                    rendered.push(RenderedDiagram {
                        filename: diagram_filename(number),
                        png,
                    });
                    outcomes.push(DiagramOutcome::Rendered);
                }
                Err(err) => {
                    warn!(diagram = number, error = %err, "failed to render diagram");
                    outcomes.push(DiagramOutcome::Failed(err.to_string()));
                }
            }
        }

        document::resolve_diagrams(&mut doc.blocks, &outcomes);
        Ok(ConvertedPage {
            storage: storage::render_page(&doc.blocks),
            diagrams: rendered,
        })
    }
}

/// Reject input that cannot produce well-formed storage markup.
pub fn validate(markdown: &str) -> Result<(), ConvertError> {
    if markdown.len() > MAX_INPUT_BYTES {
        return Err(ConvertError::TooLarge {
            size: markdown.len(),
            limit: MAX_INPUT_BYTES,
        });
    }
    for (line, text) in markdown.split('\n').enumerate() {
        if let Some(c) = text.chars().find(|&c| !is_xml_char(c)) {
            return Err(ConvertError::InvalidCharacter {
                code: u32::from(c),
                line: line + 1,
            });
        }
    }
    Ok(())
}

fn is_xml_char(c: char) -> bool {
    !matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

#[cfg(test)]
mod tests;
