use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;
use uuid::Uuid;

use super::{routes, tokens::JwtKeys};

pub const SESSION_COOKIE_NAME: &str = "accounts_session";

/// Authenticated user id taken from the session cookie or a bearer token.
///
/// Anonymous requests are turned away with a redirect to the login page.
pub struct AuthUser(pub Uuid);

/// Rejection for [`AuthUser`]: send the browser to log in, then come back.
#[derive(Debug)]
pub struct LoginRedirect {
    pub next: String,
}

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        Redirect::to(&login_url(&self.next)).into_response()
    }
}

pub fn login_url(next: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{}?next={}", routes::LOGIN, encoded)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = LoginRedirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| routes::HOME.to_string());

        let Some(token) = extract_session_token(&parts.headers) else {
            return Err(LoginRedirect { next });
        };

        let keys = JwtKeys::from_ref(state);
        match keys.verify_session(&token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(e) => {
                debug!(error = %e, "invalid or expired session");
                Err(LoginRedirect { next })
            }
        }
    }
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> anyhow::Result<HeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    Ok(HeaderValue::from_str(&cookie)?)
}

pub fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static(
            "accounts_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure",
        )
    } else {
        HeaderValue::from_static("accounts_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    }
}
