// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Confluence MCP CLI entrypoint.
//!
//! Serves MCP over HTTP+SSE at `http://<host>:<port>/mcp` (messages at `/messages`).
//! Use `--generate-api-key` to print a fresh value for `MCP_API_KEY` and exit.

use std::error::Error;
use std::sync::Arc;

use confluence_mcp::config::AppConfig;
use confluence_mcp::confluence::ConfluenceConnector;
use confluence_mcp::convert::Converter;
use confluence_mcp::gateway::{self, auth, AppState, HEALTH_PATH, STREAM_PATH};
use confluence_mcp::mcp::{ConfluenceMcp, ToolContext};
use confluence_mcp::render::{find_browser, ChromiumRenderer};
use confluence_mcp::store::{PageMappingStore, ProjectConfigStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--host <addr>] [--port <port>]\n  {program} --generate-api-key\n\nServes MCP over HTTP+SSE at `/mcp`. Flags override HOST and PORT from the environment\n(a `.env` file in the working directory is loaded first).\n\n--generate-api-key prints a random value suitable for MCP_API_KEY and exits."
    );
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CliOptions {
    host: Option<String>,
    port: Option<u16>,
    generate_api_key: bool,
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<CliOptions, ()> {
    let mut options = CliOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => {
                if options.host.is_some() {
                    return Err(());
                }
                options.host = Some(args.next().ok_or(())?);
            }
            "--port" => {
                if options.port.is_some() {
                    return Err(());
                }
                let raw = args.next().ok_or(())?;
                let port: u16 = raw.parse().map_err(|_| ())?;
                options.port = Some(port);
            }
            "--generate-api-key" => {
                if options.generate_api_key {
                    return Err(());
                }
                options.generate_api_key = true;
            }
            _ => return Err(()),
        }
    }

    if options.generate_api_key && (options.host.is_some() || options.port.is_some()) {
        return Err(());
    }

    Ok(options)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

fn main() {
    let result = (|| -> Result<(), Box<dyn Error>> {
        let mut args = std::env::args();
        let program = args.next().unwrap_or_else(|| "confluence-mcp".to_owned());

        let options = match parse_options(args) {
            Ok(options) => options,
            Err(()) => {
                print_usage(&program);
                std::process::exit(2);
            }
        };

        if options.generate_api_key {
            println!("{}", auth::generate_api_key());
            return Ok(());
        }

        let _ = dotenvy::dotenv();
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        let mut config = AppConfig::from_env()?;
        if let Some(host) = options.host {
            config.host = host;
        }
        if let Some(port) = options.port {
            config.port = port;
        }

        if config.gateway.api_key.is_none() {
            warn!(
                "MCP_API_KEY is not set; /mcp and /messages will answer 500 until it is configured \
                 (generate one with --generate-api-key)"
            );
        }
        if config.chromium.executable.is_none() && find_browser().is_none() {
            warn!("no Chromium or Chrome found on PATH; set CHROME_PATH or diagrams will render as warnings");
        }

        let context = ToolContext {
            project_config: Arc::new(ProjectConfigStore::open(&config.project_config_path)),
            page_mappings: Arc::new(PageMappingStore::open(&config.page_mapping_path)),
            connector: Arc::new(ConfluenceConnector),
            converter: Arc::new(Converter::new(Arc::new(ChromiumRenderer::new(
                config.chromium.clone(),
            )))),
        };
        let mcp = ConfluenceMcp::new(context);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
            let addr = listener.local_addr()?;
            info!(%addr, "Confluence MCP server listening");
            info!("stream endpoint: http://{addr}{STREAM_PATH}");
            info!("health check: http://{addr}{HEALTH_PATH}");

            let state = AppState::new(mcp, config.gateway.clone());
            gateway::serve(listener, state, shutdown_signal()).await?;
            info!("server stopped");
            Ok::<(), Box<dyn Error>>(())
        })?;

        Ok(())
    })();

    if let Err(err) = result {
        eprintln!("confluence-mcp: {err}");
        std::process::exit(1);
    }
}
