// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Confluence MCP: an MCP tool server over HTTP+SSE that turns Markdown (with Mermaid
//! diagrams rendered to PNG) into Confluence pages.

pub mod config;
pub mod confluence;
pub mod convert;
pub mod gateway;
pub mod mcp;
pub mod render;
pub mod session;
pub mod store;
