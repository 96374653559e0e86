// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Fixed-window rate limiting keyed by client address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use super::client_address;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    reset_at: Instant,
}

/// Rejection carrying the number of whole seconds until the window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter(pub u64);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    error: &'static str,
    retry_after: u64,
}

impl IntoResponse for RetryAfter {
    fn into_response(self) -> Response {
        let body = RateLimitBody {
            error: "Rate limit exceeded",
            retry_after: self.0,
        };
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, self.0.to_string())],
            Json(body),
        )
            .into_response()
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), RetryAfter> {
        self.check_at(key, Instant::now())
    }

    /// Count one request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), RetryAfter> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|_, record| now <= record.reset_at);

        let Some(record) = records.get_mut(key) else {
            records.insert(
                key.to_owned(),
                RateLimitRecord {
                    count: 1,
                    reset_at: now + self.settings.window,
                },
            );
            return Ok(());
        };

        if record.count >= self.settings.max_requests {
            let remaining = record.reset_at.saturating_duration_since(now);
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(RetryAfter(secs));
        }

        record.count += 1;
        Ok(())
    }

    pub fn tracked_clients(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub trust_proxy: bool,
}

/// Middleware applied to every route, the liveness probe included.
pub async fn enforce(State(state): State<RateLimitState>, request: Request, next: Next) -> Response {
    let key = client_address(&request, state.trust_proxy);
    match state.limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            debug!(client = %key, retry_after_secs = retry_after.0, "rate limit exceeded");
            retry_after.into_response()
        }
    }
}
