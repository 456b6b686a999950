//! HTTP authentication middleware for Axum

use super::{AuthError, Authenticator, BasicCredentials};
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::sync::Arc;

pub const BASIC_REALM: &str = "Basic realm=\"docseries\"";

/// Decode `Authorization: Basic <base64(username:password)>`
fn extract_basic_credentials(headers: &HeaderMap) -> Result<Option<BasicCredentials>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AuthError::unauthorized("Invalid Authorization header"))?;

    let (scheme, encoded) = value
        .split_once(' ')
        .ok_or_else(|| AuthError::unauthorized("Authorization header must use Basic scheme"))?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::unauthorized(
            "Authorization header must use Basic scheme",
        ));
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::unauthorized("Invalid Basic credentials"))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::unauthorized("Invalid Basic credentials"))?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| AuthError::unauthorized("Invalid Basic credentials"))?;

    Ok(Some(BasicCredentials::new(username, password)))
}

fn reject(err: AuthError) -> Response {
    let status = StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::UNAUTHORIZED);
    let mut response = (status, err.message).into_response();
    if status == StatusCode::UNAUTHORIZED {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(BASIC_REALM),
        );
    }
    response
}

/// Axum middleware function for HTTP basic authentication
///
/// Returns 401 (with a `WWW-Authenticate` challenge) when credentials are
/// missing or unreadable and 403 when they don't match.
pub async fn auth_middleware(
    authenticator: Arc<Authenticator>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = match extract_basic_credentials(request.headers()) {
        Ok(credentials) => credentials,
        Err(err) => return reject(err),
    };

    match authenticator.authenticate(credentials.as_ref()) {
        Ok(username) => {
            log::debug!("Authenticated request for user '{username}'");
            next.run(request).await
        }
        Err(err) => {
            if let Some(credentials) = &credentials {
                log::warn!(
                    "Authentication failed for user '{}': {}",
                    credentials.username,
                    err.message
                );
            }
            reject(err)
        }
    }
}
