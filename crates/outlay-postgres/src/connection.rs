use std::str::FromStr;

use postgres::config::SslMode;
use postgres::Config;

use outlay_core::StoreError;

/// Where and how to reach the database. `location` is either a full
/// `postgres://` URL or the part after the scheme (`host:port/dbname`).
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub location: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl: Option<String>,
}

impl ConnectionOptions {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    pub fn to_config(&self) -> Result<Config, StoreError> {
        let has_scheme = self.location.starts_with("postgres://")
            || self.location.starts_with("postgresql://");
        let url = if has_scheme {
            self.location.clone()
        } else {
            format!("postgres://{}", self.location)
        };
        let mut config = Config::from_str(&url)
            .map_err(|e| StoreError::Backend(format!("invalid PostgreSQL location: {}", e)))?;

        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            config.user(user);
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            config.password(password);
        }
        if let Some(ssl) = self.ssl.as_deref() {
            config.ssl_mode(parse_ssl_mode(ssl)?);
        }
        Ok(config)
    }
}

/// Maps libpq `sslmode` names onto what the client supports. The
/// certificate-checking modes fall back to plain `require`.
pub fn parse_ssl_mode(mode: &str) -> Result<SslMode, StoreError> {
    match mode {
        "" | "disable" => Ok(SslMode::Disable),
        "prefer" => Ok(SslMode::Prefer),
        "require" => Ok(SslMode::Require),
        "verify-ca" | "verify-full" => {
            tracing::warn!(mode, "Certificate verification is not supported, using require");
            Ok(SslMode::Require)
        }
        other => Err(StoreError::Validation(format!("invalid SSL mode: {}", other))),
    }
}
