// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, warn};

use super::cdp::CdpConnection;
use super::{DiagramError, DiagramRenderer, RenderOptions, DEFAULT_RENDER_TIMEOUT};

pub const DEFAULT_MERMAID_SCRIPT_URL: &str =
    "https://cdn.jsdelivr.net/npm/mermaid@10.6.0/dist/mermaid.min.js";

const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEVTOOLS_BANNER: &str = "DevTools listening on ";

const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Browser binary. `None` searches `PATH` for a Chromium or Chrome executable.
    pub executable: Option<PathBuf>,
    pub script_url: String,
    /// Budget for rendering and capturing one diagram once Mermaid is loaded.
    pub render_timeout: Duration,
    pub launch_timeout: Duration,
    /// Budget for connecting to the browser, opening the page and loading Mermaid.
    pub setup_timeout: Duration,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            executable: None,
            script_url: DEFAULT_MERMAID_SCRIPT_URL.to_owned(),
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }
}

/// Renders each diagram in a fresh headless browser with a throwaway profile.
#[derive(Debug, Clone, Default)]
pub struct ChromiumRenderer {
    config: ChromiumConfig,
}

impl ChromiumRenderer {
    pub fn new(config: ChromiumConfig) -> Self {
        Self { config }
    }

    fn executable(&self) -> Result<PathBuf, DiagramError> {
        if let Some(path) = &self.config.executable {
            return Ok(path.clone());
        }
        find_browser().ok_or_else(|| {
            DiagramError::environment("no Chromium or Chrome executable found (set CHROME_PATH)")
        })
    }
}

#[async_trait]
impl DiagramRenderer for ChromiumRenderer {
    async fn render(&self, source: &str, options: &RenderOptions) -> Result<Vec<u8>, DiagramError> {
        let executable = self.executable()?;
        let browser = Browser::launch(&executable, self.config.launch_timeout).await?;
        let outcome = capture(&self.config, &browser.websocket_url, source, options).await;
        browser.close().await;
        outcome
    }
}

/// First Chromium-like executable on `PATH`.
pub fn find_browser() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| BROWSER_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

struct Browser {
    child: Child,
    websocket_url: String,
    _profile: TempDir,
}

impl Browser {
    async fn launch(executable: &Path, launch_timeout: Duration) -> Result<Self, DiagramError> {
        let profile = tempfile::Builder::new()
            .prefix("confluence-mcp-chromium.")
            .tempdir()
            .map_err(|err| DiagramError::environment(format!("cannot create browser profile: {err}")))?;

        let mut child = Command::new(executable)
            .args(launch_args(profile.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                DiagramError::environment(format!("cannot launch {}: {err}", executable.display()))
            })?;

        let Some(stderr) = child.stderr.take() else {
            return Err(DiagramError::environment("browser stderr is not captured"));
        };

        let websocket_url = match tokio::time::timeout(launch_timeout, devtools_url(stderr)).await {
            Ok(Ok(url)) => url,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(DiagramError::environment(format!(
                    "browser did not report a DevTools endpoint within {launch_timeout:?}"
                )))
            }
        };
        debug!(url = %websocket_url, "browser launched");

        Ok(Self {
            child,
            websocket_url,
            _profile: profile,
        })
    }

    async fn close(mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "cannot stop browser process");
        }
    }
}

fn launch_args(profile: &Path) -> Vec<String> {
    vec![
        "--headless=new".to_owned(),
        "--no-sandbox".to_owned(),
        "--disable-setuid-sandbox".to_owned(),
        "--disable-dev-shm-usage".to_owned(),
        "--disable-gpu".to_owned(),
        "--no-first-run".to_owned(),
        "--no-default-browser-check".to_owned(),
        "--hide-scrollbars".to_owned(),
        "--mute-audio".to_owned(),
        "--remote-debugging-port=0".to_owned(),
        format!("--user-data-dir={}", profile.display()),
        "about:blank".to_owned(),
    ]
}

fn parse_devtools_banner(line: &str) -> Option<&str> {
    let (_, rest) = line.split_once(DEVTOOLS_BANNER)?;
    let url = rest.trim();
    url.starts_with("ws://").then_some(url)
}

/// Read stderr until the DevTools banner shows up, then keep draining it in the background so the
/// browser never blocks on a full pipe.
async fn devtools_url(stderr: ChildStderr) -> Result<String, DiagramError> {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|err| DiagramError::environment(format!("cannot read browser output: {err}")))?;
        let Some(line) = line else {
            return Err(DiagramError::environment(
                "browser exited before reporting a DevTools endpoint",
            ));
        };
        if let Some(url) = parse_devtools_banner(&line) {
            let url = url.to_owned();
            tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });
            return Ok(url);
        }
    }
}

#[derive(Debug, Deserialize)]
struct RenderReport {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

/// Setup failures (including a slow Mermaid download) are environment errors; only the render
/// itself counts against `render_timeout`.
async fn capture(
    config: &ChromiumConfig,
    websocket_url: &str,
    source: &str,
    options: &RenderOptions,
) -> Result<Vec<u8>, DiagramError> {
    let setup = config.setup_timeout;
    let mut cdp = tokio::time::timeout(setup, CdpConnection::connect(websocket_url))
        .await
        .map_err(|_| DiagramError::environment(format!("browser did not accept a connection within {setup:?}")))??;

    let result = match tokio::time::timeout(setup, prepare(&mut cdp, &config.script_url, options)).await {
        Ok(Ok(())) => {
            let budget = config.render_timeout;
            tokio::time::timeout(budget, draw(&mut cdp, source))
                .await
                .unwrap_or(Err(DiagramError::Timeout(budget)))
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(DiagramError::environment(format!(
            "page setup did not finish within {setup:?}"
        ))),
    };
    cdp.close().await;
    result
}

/// Open a blank target, load the diagram page and wait until Mermaid is ready.
async fn prepare(
    cdp: &mut CdpConnection,
    script_url: &str,
    options: &RenderOptions,
) -> Result<(), DiagramError> {
    let target = cdp
        .call("Target.createTarget", json!({ "url": "about:blank" }))
        .await?;
    let target_id = string_field(&target, "targetId")?;
    let attached = cdp
        .call(
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
        )
        .await?;
    cdp.attach(string_field(&attached, "sessionId")?);

    cdp.call(
        "Emulation.setDeviceMetricsOverride",
        json!({
            "width": options.width,
            "height": options.height,
            "deviceScaleFactor": 1,
            "mobile": false,
        }),
    )
    .await?;
    if options.is_transparent() {
        cdp.call(
            "Emulation.setDefaultBackgroundColorOverride",
            json!({ "color": { "r": 0, "g": 0, "b": 0, "a": 0 } }),
        )
        .await?;
    }

    let page = base64::engine::general_purpose::STANDARD.encode(page_html(script_url, options));
    cdp.call(
        "Page.navigate",
        json!({ "url": format!("data:text/html;base64,{page}") }),
    )
    .await?;

    loop {
        match evaluate(cdp, "window.__mermaidState || 'loading'", false)
            .await?
            .as_str()
        {
            Some("ready") => break,
            Some("failed") => {
                return Err(DiagramError::environment(format!(
                    "cannot load Mermaid from {script_url}"
                )))
            }
            _ => tokio::time::sleep(READY_POLL_INTERVAL).await,
        }
    }
    Ok(())
}

async fn draw(cdp: &mut CdpConnection, source: &str) -> Result<Vec<u8>, DiagramError> {
    let report = evaluate(cdp, &render_expression(source)?, true).await?;
    let report: RenderReport = serde_json::from_value(report)
        .map_err(|err| DiagramError::environment(format!("unexpected render report: {err}")))?;
    if !report.ok {
        return Err(DiagramError::Rejected {
            message: report.error.unwrap_or_else(|| "unknown Mermaid error".to_owned()),
        });
    }
    if report.width <= 0.0 || report.height <= 0.0 {
        return Err(DiagramError::Rejected {
            message: "diagram rendered with an empty bounding box".to_owned(),
        });
    }

    let shot = cdp
        .call(
            "Page.captureScreenshot",
            json!({
                "format": "png",
                "captureBeyondViewport": true,
                "clip": {
                    "x": report.x,
                    "y": report.y,
                    "width": report.width,
                    "height": report.height,
                    "scale": 1,
                },
            }),
        )
        .await?;
    let data = string_field(&shot, "data")?;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|err| DiagramError::environment(format!("screenshot is not valid base64: {err}")))
}

async fn evaluate(
    cdp: &mut CdpConnection,
    expression: &str,
    await_promise: bool,
) -> Result<Value, DiagramError> {
    let mut reply = cdp
        .call(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "awaitPromise": await_promise,
                "returnByValue": true,
            }),
        )
        .await?;
    if let Some(details) = reply.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script exception");
        return Err(DiagramError::environment(message.to_owned()));
    }
    Ok(reply
        .get_mut("result")
        .and_then(|result| result.get_mut("value"))
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn string_field(value: &Value, field: &str) -> Result<String, DiagramError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| DiagramError::environment(format!("DevTools reply without {field}")))
}

/// The diagram source enters the page only as a JSON string literal.
fn render_expression(source: &str) -> Result<String, DiagramError> {
    let literal = serde_json::to_string(source)
        .map_err(|err| DiagramError::environment(format!("cannot encode diagram source: {err}")))?;
    Ok(format!("window.__renderDiagram({literal})"))
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
body { background: __BACKGROUND__; margin: 0; padding: 20px; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; }
#diagram { display: inline-block; padding: 20px; }
#diagram svg { max-width: none; height: auto; }
</style>
<script>window.__mermaidState = 'loading';</script>
<script src="__SCRIPT_URL__" onerror="window.__mermaidState = 'failed'"></script>
<script>
if (window.mermaid) {
  mermaid.initialize({
    startOnLoad: false,
    theme: '__THEME__',
    securityLevel: 'loose',
    themeVariables: {
      primaryColor: '#0052CC',
      primaryTextColor: '#172B4D',
      primaryBorderColor: '#DFE1E6',
      lineColor: '#42526E',
      secondaryColor: '#F4F5F7',
      tertiaryColor: '#FFFFFF'
    },
    flowchart: { useMaxWidth: false, htmlLabels: true, curve: 'basis' },
    sequence: {
      diagramMarginX: 50, diagramMarginY: 10, actorMargin: 50, width: 150, height: 65,
      boxMargin: 10, boxTextMargin: 5, noteMargin: 10, messageMargin: 35
    }
  });
  window.__renderDiagram = async function (source) {
    const container = document.getElementById('diagram');
    try {
      const { svg } = await mermaid.render('confluence-diagram', source);
      container.innerHTML = svg;
      const box = container.querySelector('svg').getBoundingClientRect();
      return { ok: true, x: box.x, y: box.y, width: box.width, height: box.height };
    } catch (err) {
      return { ok: false, error: String((err && err.message) || err) };
    }
  };
  window.__mermaidState = 'ready';
} else if (window.__mermaidState !== 'failed') {
  window.__mermaidState = 'failed';
}
</script>
</head>
<body><div id="diagram"></div></body>
</html>
"#;

fn page_html(script_url: &str, options: &RenderOptions) -> String {
    PAGE_TEMPLATE
        .replace("__BACKGROUND__", options.css_background())
        .replace("__SCRIPT_URL__", &escape_attribute(script_url))
        .replace("__THEME__", options.theme.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Theme;
    use rstest::rstest;

    #[rstest]
    #[case(
        "DevTools listening on ws://127.0.0.1:39211/devtools/browser/8f1c",
        Some("ws://127.0.0.1:39211/devtools/browser/8f1c")
    )]
    #[case("[0101/000000.0:ERROR:gpu_init.cc] DevTools listening on ws://127.0.0.1:1/x  ", Some("ws://127.0.0.1:1/x"))]
    #[case("[0101/000000.0:WARNING] something else", None)]
    #[case("DevTools listening on http://nope", None)]
    fn devtools_banner(#[case] line: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_devtools_banner(line), expected);
    }

    #[test]
    fn launch_args_use_an_ephemeral_port_and_the_given_profile() {
        let args = launch_args(Path::new("/tmp/profile-x"));
        assert!(args.iter().any(|a| a == "--remote-debugging-port=0"));
        assert!(args.iter().any(|a| a == "--user-data-dir=/tmp/profile-x"));
        assert!(args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn page_embeds_theme_background_and_script() {
        let options = RenderOptions {
            theme: Theme::Forest,
            background_color: "#FAFBFC".to_owned(),
            ..RenderOptions::default()
        };
        let html = page_html(DEFAULT_MERMAID_SCRIPT_URL, &options);
        assert!(html.contains("theme: 'forest'"));
        assert!(html.contains("background: #FAFBFC;"));
        assert!(html.contains(r#"src="https://cdn.jsdelivr.net/npm/mermaid@10.6.0/dist/mermaid.min.js""#));
        assert!(html.contains("primaryColor: '#0052CC'"));
        for placeholder in ["__BACKGROUND__", "__SCRIPT_URL__", "__THEME__"] {
            assert!(!html.contains(placeholder), "unreplaced {placeholder}");
        }
    }

    #[test]
    fn script_url_cannot_break_out_of_the_attribute() {
        let html = page_html(r#"x"></script><script>alert(1)</script>"#, &RenderOptions::default());
        assert!(!html.contains("<script>alert(1)"));
        assert!(html.contains("&quot;&gt;&lt;/script&gt;"));
    }

    #[test]
    fn diagram_source_is_passed_as_a_json_literal() {
        let expression = render_expression("graph TD\n  A[\"</script>\"] --> B").expect("expression");
        assert_eq!(
            expression,
            r#"window.__renderDiagram("graph TD\n  A[\"</script>\"] --> B")"#
        );
    }

    #[tokio::test]
    async fn missing_browser_is_an_environment_error() {
        let renderer = ChromiumRenderer::new(ChromiumConfig {
            executable: Some(PathBuf::from("/nonexistent/chromium-for-tests")),
            ..ChromiumConfig::default()
        });
        let err = renderer
            .render("graph TD; A-->B", &RenderOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DiagramError::Environment { .. }), "{err}");
    }

    /// Shell stand-in for Chromium: records its pid and arguments, prints the DevTools banner for
    /// `websocket_url` and idles until killed.
    #[cfg(unix)]
    fn fake_browser(dir: &Path, websocket_url: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-chromium");
        let script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{dir}/args'\necho $$ > '{dir}/pid'\necho 'DevTools listening on {websocket_url}' >&2\nexec sleep 30\n",
            dir = dir.display(),
        );
        std::fs::write(&path, script).expect("write fake browser");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[cfg(unix)]
    fn assert_torn_down(dir: &Path) {
        let pid = std::fs::read_to_string(dir.join("pid")).expect("pid file");
        let alive = std::process::Command::new("kill")
            .args(["-0", pid.trim()])
            .stderr(Stdio::null())
            .status()
            .expect("run kill")
            .success();
        assert!(!alive, "browser process {} still running", pid.trim());

        let args = std::fs::read_to_string(dir.join("args")).expect("args file");
        let profile = args
            .lines()
            .find_map(|arg| arg.strip_prefix("--user-data-dir="))
            .expect("profile argument");
        assert!(!Path::new(profile).exists(), "profile {profile} left behind");
    }

    #[cfg(unix)]
    /// Accepts one DevTools connection. With `answer_setup` every command except the diagram
    /// render gets a generic reply (Mermaid reports ready); the render itself is never answered.
    async fn stalling_devtools(listener: tokio::net::TcpListener, answer_setup: bool) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message;

        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        while let Some(Ok(frame)) = socket.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let request: Value = serde_json::from_str(&text).expect("request json");
            let expression = request
                .pointer("/params/expression")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !answer_setup || expression.contains("__renderDiagram") {
                continue;
            }
            let reply = json!({
                "id": request["id"],
                "result": {
                    "targetId": "target-1",
                    "sessionId": "session-1",
                    "result": { "type": "string", "value": "ready" },
                },
            });
            if socket.send(Message::text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unanswered_render_times_out_and_stops_the_browser() {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/devtools/browser/fake", listener.local_addr().expect("addr"));
        let server = tokio::spawn(stalling_devtools(listener, true));

        let renderer = ChromiumRenderer::new(ChromiumConfig {
            executable: Some(fake_browser(dir.path(), &url)),
            script_url: "http://127.0.0.1:9/mermaid.js".to_owned(),
            render_timeout: Duration::from_millis(300),
            launch_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(5),
        });
        let err = renderer
            .render("graph TD; A-->B", &RenderOptions::default())
            .await
            .unwrap_err();

        assert!(
            matches!(err, DiagramError::Timeout(budget) if budget == Duration::from_millis(300)),
            "{err}"
        );
        assert_torn_down(dir.path());
        server.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_setup_is_an_environment_error_not_a_render_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("ws://{}/devtools/browser/fake", listener.local_addr().expect("addr"));
        let server = tokio::spawn(stalling_devtools(listener, false));

        let renderer = ChromiumRenderer::new(ChromiumConfig {
            executable: Some(fake_browser(dir.path(), &url)),
            render_timeout: Duration::from_secs(60),
            launch_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_millis(300),
            ..ChromiumConfig::default()
        });
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            renderer.render("graph TD; A-->B", &RenderOptions::default()),
        )
        .await
        .expect("setup bound applies")
        .unwrap_err();

        assert!(matches!(err, DiagramError::Environment { .. }), "{err}");
        assert_torn_down(dir.path());
        server.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreachable_devtools_endpoint_is_an_environment_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let closed = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("ws://{}/devtools/browser/fake", closed.local_addr().expect("addr"));
        drop(closed);

        let renderer = ChromiumRenderer::new(ChromiumConfig {
            executable: Some(fake_browser(dir.path(), &url)),
            launch_timeout: Duration::from_secs(5),
            setup_timeout: Duration::from_secs(5),
            ..ChromiumConfig::default()
        });
        let err = renderer
            .render("graph TD; A-->B", &RenderOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DiagramError::Environment { .. }), "{err}");
        assert_torn_down(dir.path());
    }
}
