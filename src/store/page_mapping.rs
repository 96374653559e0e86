// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{read_json, write_json, StoreError};

pub const DEFAULT_PAGE_MAPPING_FILE: &str = "markdown-page-mapping.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMapping {
    pub markdown_path: String,
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    pub last_updated: String,
}

/// Which Confluence page a local Markdown file was published to, keyed by Markdown path.
#[derive(Debug)]
pub struct PageMappingStore {
    path: PathBuf,
    mappings: Mutex<BTreeMap<String, PageMapping>>,
}

impl PageMappingStore {
    /// Load the mapping file. A missing file starts empty; an unreadable one is logged and
    /// replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mappings = match read_json::<BTreeMap<String, PageMapping>>(&path) {
            Ok(Some(mappings)) => {
                info!(count = mappings.len(), path = %path.display(), "loaded page mappings");
                mappings
            }
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                warn!(error = %err, "cannot load page mappings; starting empty");
                BTreeMap::new()
            }
        };
        Self {
            path,
            mappings: Mutex::new(mappings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, PageMapping>> {
        self.mappings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, markdown_path: &str) -> Option<PageMapping> {
        self.lock().get(markdown_path).cloned()
    }

    pub fn set(&self, mapping: PageMapping) -> Result<(), StoreError> {
        let mut mappings = self.lock();
        mappings.insert(mapping.markdown_path.clone(), mapping);
        write_json(&self.path, &*mappings)
    }

    pub fn remove(&self, markdown_path: &str) -> Result<Option<PageMapping>, StoreError> {
        let mut mappings = self.lock();
        let removed = mappings.remove(markdown_path);
        if removed.is_some() {
            write_json(&self.path, &*mappings)?;
        }
        Ok(removed)
    }

    /// Remove the first mapping (in path order) that points at `page_id`.
    pub fn remove_by_page_id(&self, page_id: &str) -> Result<Option<PageMapping>, StoreError> {
        let mut mappings = self.lock();
        let Some(key) = mappings
            .iter()
            .find(|(_, mapping)| mapping.page_id == page_id)
            .map(|(key, _)| key.clone())
        else {
            return Ok(None);
        };
        let removed = mappings.remove(&key);
        write_json(&self.path, &*mappings)?;
        Ok(removed)
    }

    pub fn all(&self) -> BTreeMap<String, PageMapping> {
        self.lock().clone()
    }
}
