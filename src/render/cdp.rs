// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Minimal Chrome DevTools Protocol client: request/response over one websocket, events ignored.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

use super::DiagramError;

pub(crate) struct CdpConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    session_id: Option<String>,
}

impl CdpConnection {
    pub(crate) async fn connect(url: &str) -> Result<Self, DiagramError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|err| DiagramError::environment(format!("cannot connect to browser: {err}")))?;
        Ok(Self {
            socket,
            next_id: 1,
            session_id: None,
        })
    }

    /// Route subsequent commands to an attached target (flattened session mode).
    pub(crate) fn attach(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    pub(crate) async fn call(&mut self, method: &str, params: Value) -> Result<Value, DiagramError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = &self.session_id {
            request["sessionId"] = Value::String(session_id.clone());
        }
        trace!(id, method, "cdp request");
        self.socket
            .send(Message::text(request.to_string()))
            .await
            .map_err(|err| DiagramError::environment(format!("{method}: {err}")))?;

        loop {
            let frame = match self.socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Err(DiagramError::environment(format!("{method}: {err}"))),
                None => return Err(DiagramError::environment(format!("{method}: browser went away"))),
            };
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(DiagramError::environment(format!("{method}: browser closed the connection")))
                }
                _ => continue,
            };
            let Ok(reply) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = reply.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(DiagramError::environment(format!("{method}: {message}")));
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    pub(crate) async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}
