// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Shared-secret authentication for the streaming and message endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore as _;
use serde::Serialize;
use subtle::{Choice, ConstantTimeEq};
use tracing::{error, warn};

use super::client_address;

pub const API_KEY_HEADER: &str = "x-mcp-api-key";
pub const API_KEY_QUERY_PARAM: &str = "apiKey";

/// Fresh shared secret: 32 bytes of OS randomness, base64url without padding.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Server-side secret. `None` means the deployment is misconfigured and every protected
    /// request fails with 500.
    pub api_key: Option<Arc<str>>,
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    NotConfigured,
    Unauthorized,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Server configuration error",
                }),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "Unauthorized: Invalid or missing API key",
                }),
            )
                .into_response(),
        }
    }
}

/// Byte comparison that inspects every byte of `expected` regardless of where the first
/// mismatch is.
/// Constant-time comparison. The presented key is padded or cut to the expected length so the
/// work done never depends on where the first mismatch is; the length check is folded in last.
fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    let aligned = (0..expected.len())
        .map(|i| presented.get(i).copied().unwrap_or(0))
        .collect::<Vec<u8>>();
    let same_length = Choice::from(u8::from(presented.len() == expected.len()));
    bool::from(aligned.as_slice().ct_eq(expected) & same_length)
}

fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(API_KEY_HEADER) {
        return value.to_str().ok().map(ToOwned::to_owned);
    }
    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove(API_KEY_QUERY_PARAM))
}

pub fn authenticate(settings: &AuthSettings, request: &Request) -> Result<(), AuthRejection> {
    let Some(expected) = settings.api_key.as_deref() else {
        error!("MCP_API_KEY is not configured on the server; rejecting request");
        return Err(AuthRejection::NotConfigured);
    };

    match presented_key(request) {
        Some(presented) if secrets_match(presented.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            let user_agent = request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            warn!(
                client = %client_address(request, settings.trust_proxy),
                user_agent,
                timestamp = %chrono::Utc::now().to_rfc3339(),
                path = request.uri().path(),
                "unauthorized access attempt"
            );
            Err(AuthRejection::Unauthorized)
        }
    }
}

pub async fn require_api_key(
    State(settings): State<AuthSettings>,
    request: Request,
    next: Next,
) -> Response {
    match authenticate(&settings, &request) {
        Ok(()) => next.run(request).await,
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use rstest::rstest;

    #[test]
    fn generated_keys_are_url_safe_and_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).expect("decode").len(), 32);
    }

    fn settings(key: Option<&str>) -> AuthSettings {
        AuthSettings {
            api_key: key.map(Arc::from),
            trust_proxy: true,
        }
    }

    fn request(uri: &str, header_key: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(key) = header_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[rstest]
    #[case("s3cret")]
    #[case("a-much-longer-shared-secret-value-0123456789")]
    fn matching_header_is_accepted(#[case] secret: &str) {
        let settings = settings(Some(secret));
        assert_eq!(authenticate(&settings, &request("/mcp", Some(secret))), Ok(()));
    }

    #[test]
    fn matching_query_parameter_is_accepted() {
        let settings = settings(Some("s3cret"));
        assert_eq!(authenticate(&settings, &request("/mcp?apiKey=s3cret", None)), Ok(()));
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("s3cre"))]
    #[case(Some("s3cret!"))]
    #[case(Some("S3CRET"))]
    fn other_values_are_rejected(#[case] presented: Option<&str>) {
        let settings = settings(Some("s3cret"));
        assert_eq!(
            authenticate(&settings, &request("/mcp", presented)),
            Err(AuthRejection::Unauthorized)
        );
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let settings = settings(Some("s3cret"));
        assert_eq!(
            authenticate(&settings, &request("/mcp?apiKey=s3cret", Some("wrong"))),
            Err(AuthRejection::Unauthorized)
        );
    }

    #[test]
    fn missing_server_secret_is_a_configuration_error() {
        let settings = settings(None);
        assert_eq!(
            authenticate(&settings, &request("/mcp", Some("anything"))),
            Err(AuthRejection::NotConfigured)
        );
        assert_eq!(
            AuthRejection::NotConfigured.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AuthRejection::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn secret_comparison_handles_length_mismatch() {
        assert!(secrets_match(b"abc", b"abc"));
        assert!(!secrets_match(b"ab", b"abc"));
        assert!(!secrets_match(b"abcd", b"abc"));
        assert!(!secrets_match(b"", b"abc"));
        assert!(!secrets_match(b"abc\0", b"abc"));
        assert!(!secrets_match(b"ab", b"ab\0"));
        assert!(!secrets_match(b"abd", b"abc"));
        assert!(secrets_match(b"", b""));
    }
}
