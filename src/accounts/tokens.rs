use std::time::Duration;

use axum::extract::FromRef;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    accounts::repo_types::User,
    config::{JwtConfig, MAX_TTL_MINUTES},
    state::AppState,
};

/// Distinguishes session JWTs from activation-link JWTs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Activation,
}

/// Session token payload.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,       // user ID
    pub iat: usize,      // issued at
    pub exp: usize,      // expires at
    pub iss: String,     // issuer
    pub aud: String,     // audience
    pub kind: TokenKind, // always Access
}

/// Activation link payload. `active` snapshots the user's flag at issue time.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivationClaims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub kind: TokenKind,
    pub active: bool,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub session_ttl: Duration,
    pub activation_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            session_ttl: ttl(cfg.session_ttl_minutes),
            activation_ttl: ttl(cfg.activation_ttl_minutes),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    fn window(ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn sign_session(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.session_ttl);
        let claims = Claims {
            sub: user_id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session token signed");
        Ok(token)
    }

    pub fn verify_session(&self, token: &str) -> anyhow::Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation())?;
        if data.claims.kind != TokenKind::Access {
            anyhow::bail!("not a session token");
        }
        Ok(data.claims)
    }

    /// Issue an activation token bound to the user's id and current active flag.
    pub fn make_activation_token(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = Self::window(self.activation_ttl);
        let claims = ActivationClaims {
            sub: user.id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind: TokenKind::Activation,
            active: user.is_active,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, "activation token signed");
        Ok(token)
    }

    /// True only when `token` was issued for `user` and the user's active flag
    /// has not changed since.
    pub fn check_activation_token(&self, user: &User, token: &str) -> bool {
        let claims = match decode::<ActivationClaims>(token, &self.decoding, &self.validation()) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(user_id = %user.id, error = %e, "activation token rejected");
                return false;
            }
        };
        claims.kind == TokenKind::Activation
            && claims.sub == user.id
            && claims.active == user.is_active
    }
}

fn ttl(minutes: i64) -> Duration {
    Duration::from_secs(minutes.clamp(0, MAX_TTL_MINUTES) as u64 * 60)
}

/// URL-safe base64 of the user id, as embedded in activation links.
pub fn encode_uid(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.to_string().as_bytes())
}

/// Inverse of [`encode_uid`]. Every kind of malformed input yields `None`.
pub fn decode_uid(uidb64: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(uidb64.trim_end_matches('=')).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Uuid::parse_str(&text).ok()
}
