// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{read_json, timestamp, write_json, StoreError};
use crate::confluence::{ApiError, Credentials};

pub const DEFAULT_PROJECT_CONFIG_FILE: &str = "confluence-project-config.json";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub confluence_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub space_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub last_updated: String,
}

impl std::fmt::Debug for ProjectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectConfig")
            .field("confluence_url", &self.confluence_url)
            .field("username", &self.username)
            .field("space_key", &self.space_key)
            .field("parent_page_title", &self.parent_page_title)
            .field("parent_page_id", &self.parent_page_id)
            .field("base_dir", &self.base_dir)
            .field("last_updated", &self.last_updated)
            .finish_non_exhaustive()
    }
}

impl ProjectConfig {
    pub fn is_complete(&self) -> bool {
        !self.confluence_url.is_empty()
            && !self.username.is_empty()
            && !self.api_token.is_empty()
            && !self.space_key.is_empty()
    }

    pub fn credentials(&self) -> Result<Credentials, ApiError> {
        Credentials::new(&self.confluence_url, &self.username, &self.api_token)
    }
}

/// Partial update merged over the stored configuration; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfigUpdate {
    pub confluence_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub space_key: Option<String>,
    pub parent_page_title: Option<String>,
    pub parent_page_id: Option<String>,
    pub base_dir: Option<String>,
}

#[derive(Debug)]
pub struct ProjectConfigStore {
    path: PathBuf,
    config: Mutex<Option<ProjectConfig>>,
}

impl ProjectConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match read_json::<ProjectConfig>(&path) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "cannot load project config");
                None
            }
        };
        Self {
            path,
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProjectConfig>> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Option<ProjectConfig> {
        self.lock().clone()
    }

    pub fn is_configured(&self) -> bool {
        self.lock().as_ref().is_some_and(ProjectConfig::is_complete)
    }

    /// Merge `update` into the stored configuration, stamp `lastUpdated` and persist.
    pub fn save(&self, update: ProjectConfigUpdate) -> Result<ProjectConfig, StoreError> {
        let mut current = self.lock();
        let mut next = current.clone().unwrap_or_default();

        let overwrite = |slot: &mut String, value: Option<String>| {
            if let Some(value) = value {
                *slot = value;
            }
        };
        overwrite(&mut next.confluence_url, update.confluence_url);
        overwrite(&mut next.username, update.username);
        overwrite(&mut next.api_token, update.api_token);
        overwrite(&mut next.space_key, update.space_key);
        if update.parent_page_title.is_some() {
            next.parent_page_title = update.parent_page_title;
        }
        if update.parent_page_id.is_some() {
            next.parent_page_id = update.parent_page_id;
        }
        if update.base_dir.is_some() {
            next.base_dir = update.base_dir;
        }
        next.last_updated = timestamp();

        write_json(&self.path, &next)?;
        *current = Some(next.clone());
        Ok(next)
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        let mut current = self.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
        *current = None;
        Ok(())
    }
}
