use serde::Deserialize;

/// Upper bound for token lifetimes, one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub session_ttl_minutes: i64,
    pub activation_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Domain used in activation links; the request `Host` is used when unset.
    pub site_domain: Option<String>,
    /// Hostnames a request `Host` may name when `site_domain` is unset.
    pub allowed_hosts: Vec<String>,
    pub session_cookie_secure: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "accounts".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "accounts-users".into()),
            session_ttl_minutes: env_ttl("SESSION_TTL_MINUTES", 60 * 24 * 14),
            activation_ttl_minutes: env_ttl("ACTIVATION_TTL_MINUTES", 60 * 24 * 3),
        };
        let site_domain = std::env::var("SITE_DOMAIN")
            .ok()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let allowed_hosts = std::env::var("ALLOWED_HOSTS")
            .map(|v| {
                v.split(',')
                    .map(|h| h.trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["localhost".to_string(), "127.0.0.1".to_string()]);
        let session_cookie_secure = env_parse("SESSION_COOKIE_SECURE").unwrap_or(false);
        Ok(Self {
            database_url,
            jwt,
            site_domain,
            allowed_hosts,
            session_cookie_secure,
        })
    }

    /// Whether a `Host` header value (port optional) names an allowed host.
    pub fn host_allowed(&self, host: &str) -> bool {
        let name = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        };
        let name = name.to_ascii_lowercase();
        self.allowed_hosts.iter().any(|allowed| *allowed == name)
    }
}

fn env_ttl(key: &str, default: i64) -> i64 {
    env_parse::<i64>(key)
        .unwrap_or(default)
        .clamp(0, MAX_TTL_MINUTES)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
