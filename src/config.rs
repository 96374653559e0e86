// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Process configuration read from the environment (after `.env` has been loaded).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::rate_limit::RateLimitSettings;
use crate::gateway::GatewaySettings;
use crate::render::ChromiumConfig;
use crate::store::{DEFAULT_PAGE_MAPPING_FILE, DEFAULT_PROJECT_CONFIG_FILE};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub gateway: GatewaySettings,
    pub project_config_path: PathBuf,
    pub page_mapping_path: PathBuf,
    pub chromium: ChromiumConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key_set", &self.gateway.api_key.is_some())
            .field("rate_limit", &self.gateway.rate_limit)
            .field("trust_proxy", &self.gateway.trust_proxy)
            .field("project_config_path", &self.project_config_path)
            .field("page_mapping_path", &self.page_mapping_path)
            .field("chromium", &self.chromium)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let defaults = RateLimitSettings::default();
        let window_secs = parse_var(&var, "MCP_RATE_LIMIT_WINDOW_SECS", "seconds")?
            .unwrap_or(defaults.window.as_secs());
        let max_requests = parse_var(&var, "MCP_RATE_LIMIT_MAX_REQUESTS", "a request count")?
            .unwrap_or(defaults.max_requests);
        let trust_proxy = match var("MCP_TRUST_PROXY") {
            None => true,
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::Invalid {
                name: "MCP_TRUST_PROXY",
                value: raw,
                expected: "true or false",
            })?,
        };

        let mut chromium = ChromiumConfig {
            executable: var("CHROME_PATH").map(PathBuf::from),
            ..ChromiumConfig::default()
        };
        if let Some(url) = var("MERMAID_SCRIPT_URL") {
            chromium.script_url = url;
        }
        if let Some(secs) = parse_var::<u64>(&var, "MERMAID_RENDER_TIMEOUT_SECS", "seconds")? {
            chromium.render_timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: parse_var(&var, "PORT", "a port number")?.unwrap_or(DEFAULT_PORT),
            gateway: GatewaySettings {
                api_key: var("MCP_API_KEY"),
                rate_limit: RateLimitSettings {
                    window: Duration::from_secs(window_secs),
                    max_requests,
                },
                trust_proxy,
            },
            project_config_path: var("MCP_PROJECT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROJECT_CONFIG_FILE)),
            page_mapping_path: var("MCP_PAGE_MAPPING")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PAGE_MAPPING_FILE)),
            chromium,
        })
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid { name, value: raw, expected })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).expect("config");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3001);
        assert_eq!(config.gateway.api_key, None);
        assert_eq!(config.gateway.rate_limit.window, Duration::from_secs(900));
        assert_eq!(config.gateway.rate_limit.max_requests, 100);
        assert!(config.gateway.trust_proxy);
        assert_eq!(config.project_config_path, PathBuf::from("confluence-project-config.json"));
        assert_eq!(config.page_mapping_path, PathBuf::from("markdown-page-mapping.json"));
        assert_eq!(config.chromium.render_timeout, Duration::from_secs(10));
        assert_eq!(config.chromium.executable, None);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("MCP_API_KEY", "k"),
            ("MCP_RATE_LIMIT_WINDOW_SECS", "60"),
            ("MCP_RATE_LIMIT_MAX_REQUESTS", "5"),
            ("MCP_TRUST_PROXY", "false"),
            ("CHROME_PATH", "/usr/bin/chromium"),
            ("MERMAID_SCRIPT_URL", "http://localhost/mermaid.js"),
            ("MERMAID_RENDER_TIMEOUT_SECS", "3"),
        ])
        .expect("config");
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.gateway.api_key.as_deref(), Some("k"));
        assert_eq!(config.gateway.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.gateway.rate_limit.max_requests, 5);
        assert!(!config.gateway.trust_proxy);
        assert_eq!(config.chromium.executable, Some(PathBuf::from("/usr/bin/chromium")));
        assert_eq!(config.chromium.script_url, "http://localhost/mermaid.js");
        assert_eq!(config.chromium.render_timeout, Duration::from_secs(3));
    }

    #[test]
    fn blank_api_key_counts_as_unset() {
        let config = config(&[("MCP_API_KEY", "  ")]).expect("config");
        assert_eq!(config.gateway.api_key, None);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        assert_eq!(
            config(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::Invalid { name: "PORT", value: "eighty".to_owned(), expected: "a port number" }
        );
        assert!(config(&[("MCP_TRUST_PROXY", "maybe")]).is_err());
    }

    #[test]
    fn debug_output_does_not_leak_the_api_key() {
        let config = config(&[("MCP_API_KEY", "super-secret")]).expect("config");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
