//! Optional bearer-token auth for the `/mcp/*` surface (§4.2 "Authentication:
//! optional bearer token; when configured, all endpoints require
//! `Authorization: Bearer <token>`").

use axum::http::{HeaderMap, StatusCode};

pub fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), StatusCode> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match header {
        Some(h) if h.strip_prefix("Bearer ").is_some_and(|tok| tok == expected) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn no_expected_token_always_allows() {
        assert!(check_bearer(&HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn missing_header_denied_when_token_configured() {
        assert_eq!(
            check_bearer(&HeaderMap::new(), Some("secret")),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn correct_bearer_token_allowed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        );
        assert!(check_bearer(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn wrong_bearer_token_denied() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert_eq!(
            check_bearer(&headers, Some("secret")),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
