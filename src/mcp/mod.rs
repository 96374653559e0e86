// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Model Context Protocol (MCP) tool surface.
//!
//! One [`ConfluenceMcp`] value is cloned into every session; the clones share a
//! [`ToolContext`] holding the stores, the Confluence connector and the converter.

mod server;
mod types;

pub use server::{ConfluenceMcp, ToolContext, SERVER_NAME, SERVER_VERSION};
