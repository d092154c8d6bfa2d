use std::{str::FromStr, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which credential flavour the gateway hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    #[serde(alias = "oauth")]
    OAuth2,
    Jwt,
}

impl FromStr for GatewayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oauth2" | "oauth" => Ok(Self::OAuth2),
            "jwt" => Ok(Self::Jwt),
            other => anyhow::bail!("unknown GATEWAY_MODE {other:?} (expected oauth2 or jwt)"),
        }
    }
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OAuth2 => f.write_str("oauth2"),
            Self::Jwt => f.write_str("jwt"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub query_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub admin_url: String,
    pub proxy_url: String,
    pub provision_key: String,
    pub app_name: String,
    pub redirect_uri: String,
    pub accept_invalid_certs: bool,
    pub timeout_secs: u64,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// How long a registration may hold a row while provisioning it. One
    /// provision run makes at most five gateway calls.
    pub fn provisioning_lease(&self) -> Duration {
        self.timeout() * 5
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub ttl_minutes: i64,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database = DatabaseConfig {
            url: database_url(&var)?,
            max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", 10)?,
            query_timeout_secs: parse_or(&var, "DB_QUERY_TIMEOUT_SECS", 5)?,
        };

        let mode = match var("GATEWAY_MODE") {
            Some(v) => v.parse()?,
            None => GatewayMode::OAuth2,
        };
        let provision_key = var("GATEWAY_PROVISION_KEY").unwrap_or_default();
        if mode == GatewayMode::OAuth2 && provision_key.is_empty() {
            anyhow::bail!("GATEWAY_PROVISION_KEY is required in oauth2 mode");
        }
        let gateway = GatewayConfig {
            mode,
            admin_url: var("GATEWAY_ADMIN_URL").unwrap_or_else(|| "http://127.0.0.1:8001".into()),
            proxy_url: var("GATEWAY_PROXY_URL").unwrap_or_else(|| "https://127.0.0.1:8443".into()),
            provision_key,
            app_name: var("GATEWAY_APP_NAME").unwrap_or_else(|| "auth-service".into()),
            redirect_uri: var("GATEWAY_REDIRECT_URI")
                .unwrap_or_else(|| "http://127.0.0.1/callback".into()),
            accept_invalid_certs: parse_or(&var, "GATEWAY_ACCEPT_INVALID_CERTS", false)?,
            timeout_secs: parse_or(&var, "GATEWAY_TIMEOUT_SECS", 10)?,
        };

        let jwt = JwtConfig {
            ttl_minutes: parse_or(&var, "JWT_TTL_MINUTES", 5)?,
            role: var("JWT_ROLE").unwrap_or_else(|| "authenticated".into()),
        };

        Ok(Self {
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "APP_PORT", 8080)?,
            database,
            gateway,
            jwt,
        })
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn database_url<F>(var: &F) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = var("DATABASE_URL") {
        return Ok(url);
    }

    let host = var("POSTGRES_HOST").context("DATABASE_URL or POSTGRES_HOST must be set")?;
    let port = var("POSTGRES_PORT").unwrap_or_else(|| "5432".into());
    let user = var("POSTGRES_USER").unwrap_or_else(|| "postgres".into());
    let db = var("POSTGRES_DB").unwrap_or_else(|| user.clone());
    let ssl = var("POSTGRES_SSL").unwrap_or_else(|| "disable".into());

    let auth = match var("POSTGRES_PASS").filter(|p| !p.is_empty()) {
        Some(pass) => format!("{user}:{pass}"),
        None => user,
    };
    Ok(format!("postgres://{auth}@{host}:{port}/{db}?sslmode={ssl}"))
}
