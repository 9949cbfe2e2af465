//! Gateway configuration loaded from the environment (and `.env`).
//!
//! Every setting has a development default so the gateway starts with zero
//! configuration on a laptop.

use std::net::SocketAddr;

pub const DEFAULT_TEST_TOKEN: &str = "test-token";
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2_000;
const FALLBACK_JWT_SECRET: &str = "fallback-secret";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Env: `HTTP_ADDR`
    pub http_addr: SocketAddr,

    /// Env: `DATABASE_URL`
    pub database_url: String,

    /// HS256 secret shared with whoever issues tokens.
    /// Env: `JWT_SECRET`
    pub jwt_secret: String,

    /// Reject connections whose token fails verification instead of
    /// admitting them as guests.
    /// Env: `STRICT_AUTH` (true/false)
    pub strict_auth: bool,

    /// Accept `test_token` as a synthetic identity. Forced off in production.
    /// Env: `ALLOW_TEST_TOKEN` (true/false)
    pub allow_test_token: bool,

    /// Env: `TEST_TOKEN`
    pub test_token: String,

    /// CORS origin, `*` for any.
    /// Env: `CLIENT_URL`
    pub client_url: String,

    /// Env: `APP_ENV`
    pub app_env: String,

    /// Env: `MAX_MESSAGE_LENGTH`
    pub max_message_length: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5000).into(),
            database_url: "sqlite://motorchat.db?mode=rwc".to_string(),
            jwt_secret: FALLBACK_JWT_SECRET.to_string(),
            strict_auth: true,
            allow_test_token: false,
            test_token: DEFAULT_TEST_TOKEN.to_string(),
            client_url: "*".to_string(),
            app_env: "development".to_string(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to
    /// defaults for missing or unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }

        match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using the development fallback secret"),
        }

        if let Some(val) = lookup("STRICT_AUTH") {
            config.strict_auth = parse_flag(&val, true);
        }

        if let Some(val) = lookup("ALLOW_TEST_TOKEN") {
            config.allow_test_token = parse_flag(&val, false);
        }

        if let Some(token) = lookup("TEST_TOKEN") {
            if !token.is_empty() {
                config.test_token = token;
            }
        }

        if let Some(url) = lookup("CLIENT_URL") {
            config.client_url = url;
        }

        if let Some(env) = lookup("APP_ENV") {
            config.app_env = env;
        }

        if let Some(val) = lookup("MAX_MESSAGE_LENGTH") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_length = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_MESSAGE_LENGTH, using default"),
            }
        }

        if config.is_production() && config.allow_test_token {
            tracing::warn!("ALLOW_TEST_TOKEN ignored in production");
            config.allow_test_token = false;
        }

        config
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn test_token_enabled(&self) -> bool {
        self.allow_test_token && !self.is_production()
    }
}

fn parse_flag(val: &str, default: bool) -> bool {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
