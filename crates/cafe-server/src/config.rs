//! Server configuration
//!
//! Configuration comes from flat environment variables (`AUTH_DOMAIN`,
//! `API_AUDIENCE`, `ALGORITHM`, `DB_URL`, ...), optionally layered over a
//! TOML, YAML or JSON file. Environment variables always win.
//!
//! ```toml
//! auth_domain = "dev-shop.us.auth0.com"
//! api_audience = "drinks"
//! algorithm = "RS256"
//! db_url = "file:///var/lib/cafe/drinks.json"
//! bind_address = "0.0.0.0:8080"
//! ```

use cafe_auth::{AuthConfigError, AuthSettings};
use config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a configuration file to layer under the
/// environment.
pub const CONFIG_FILE_ENV: &str = "CAFE_CONFIG";

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity provider domain (`AUTH_DOMAIN`)
    pub auth_domain: String,
    /// Expected `aud` claim (`API_AUDIENCE`)
    pub api_audience: String,
    /// Accepted token signing algorithm (`ALGORITHM`)
    pub algorithm: String,
    /// Catalog location (`DB_URL`): `memory://` or `file://<path>`
    pub db_url: String,
    /// Listen address (`BIND_ADDRESS`)
    pub bind_address: String,
    /// Log level when `RUST_LOG` is unset (`LOG_LEVEL`)
    pub log_level: String,
    /// Emit JSON logs (`LOG_JSON`)
    pub log_json: bool,
    /// Issuer override (`AUTH_ISSUER`), defaults to `https://{auth_domain}/`
    pub auth_issuer: Option<String>,
    /// JWKS endpoint override (`JWKS_URL`)
    pub jwks_url: Option<String>,
    /// Key set TTL in seconds (`JWKS_CACHE_TTL_SECS`)
    pub jwks_cache_ttl_secs: u64,
    /// JWKS fetch timeout in seconds (`JWKS_TIMEOUT_SECS`)
    pub jwks_timeout_secs: u64,
    /// Minimum seconds between miss-triggered refreshes (`JWKS_MIN_REFRESH_SECS`)
    pub jwks_min_refresh_secs: u64,
    /// Clock skew tolerated on `exp` in seconds (`TOKEN_LEEWAY_SECS`)
    pub token_leeway_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_domain: String::new(),
            api_audience: String::new(),
            algorithm: "RS256".to_string(),
            db_url: "memory://".to_string(),
            bind_address: "127.0.0.1:5000".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            auth_issuer: None,
            jwks_url: None,
            jwks_cache_ttl_secs: 600,
            jwks_timeout_secs: 5,
            jwks_min_refresh_secs: 5,
            token_leeway_secs: 0,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported configuration file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Sources could not be merged or deserialized
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Auth settings are invalid
    #[error("Invalid auth configuration: {0}")]
    Auth(#[from] AuthConfigError),
}

impl ServerConfig {
    /// Load from the process environment, layered over the file named by
    /// `CAFE_CONFIG` when it is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unparseable, or a value has
    /// the wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path)),
            None => Self::from_env(),
        }
    }

    /// Load from the process environment only.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong type.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None, environment(None))
    }

    /// Load a configuration file with environment variables layered on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, has an unknown extension,
    /// or cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(Some(path.as_ref()), environment(None))
    }

    /// Load from an explicit variable map instead of the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_file`].
    pub fn from_vars(
        path: Option<&Path>,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self, ConfigError> {
        let vars: Map<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::build(path, environment(Some(vars)))
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }

            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(ConfigError::UnsupportedFormat),
            };

            builder = builder.add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ));
        }

        let config = builder.add_source(env).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validated auth settings for [`cafe_auth::TokenVerifier`].
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm is unknown or symmetric, a required
    /// value is empty, or the JWKS URL is not HTTPS.
    pub fn auth_settings(&self) -> Result<AuthSettings, ConfigError> {
        let mut settings =
            AuthSettings::new(&self.auth_domain, &self.api_audience, &self.algorithm)?
                .with_jwks_ttl(Duration::from_secs(self.jwks_cache_ttl_secs))
                .with_jwks_timeout(Duration::from_secs(self.jwks_timeout_secs))
                .with_min_refresh_interval(Duration::from_secs(self.jwks_min_refresh_secs))
                .with_leeway(Duration::from_secs(self.token_leeway_secs));

        if let Some(issuer) = &self.auth_issuer {
            settings = settings.with_issuer(issuer);
        }
        if let Some(url) = &self.jwks_url {
            settings = settings.with_jwks_url(url);
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Unprefixed variables; `AUTH_DOMAIN` maps to `auth_domain`
fn environment(vars: Option<Map<String, String>>) -> Environment {
    Environment::default().try_parsing(true).source(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const NO_VARS: [(&str, &str); 0] = [];

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_vars(None, NO_VARS).unwrap();
        assert_eq!(config.algorithm, "RS256");
        assert_eq!(config.db_url, "memory://");
        assert_eq!(config.bind_address, "127.0.0.1:5000");
        assert_eq!(config.jwks_cache_ttl_secs, 600);
        assert_eq!(config.token_leeway_secs, 0);
    }

    #[test]
    fn test_environment_variables() {
        let config = ServerConfig::from_vars(
            None,
            [
                ("AUTH_DOMAIN", "dev-shop.us.auth0.com"),
                ("API_AUDIENCE", "drinks"),
                ("ALGORITHM", "RS384"),
                ("DB_URL", "file:///tmp/drinks.json"),
                ("LOG_JSON", "true"),
                ("JWKS_TIMEOUT_SECS", "2"),
            ],
        )
        .unwrap();

        assert_eq!(config.auth_domain, "dev-shop.us.auth0.com");
        assert_eq!(config.api_audience, "drinks");
        assert_eq!(config.algorithm, "RS384");
        assert_eq!(config.db_url, "file:///tmp/drinks.json");
        assert!(config.log_json);
        assert_eq!(config.jwks_timeout_secs, 2);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "auth_domain = \"file.example\"\napi_audience = \"from-file\"\nbind_address = \"0.0.0.0:9000\""
        )
        .unwrap();

        let config =
            ServerConfig::from_vars(Some(file.path()), [("API_AUDIENCE", "from-env")]).unwrap();

        assert_eq!(config.auth_domain, "file.example");
        assert_eq!(config.api_audience, "from-env");
        assert_eq!(config.bind_address, "0.0.0.0:9000");
    }

    #[test]
    fn test_missing_file() {
        let result = ServerConfig::from_vars(Some(Path::new("/nonexistent/cafe.toml")), NO_VARS);
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_unsupported_format() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let result = ServerConfig::from_vars(Some(file.path()), NO_VARS);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat)));
    }

    #[test]
    fn test_auth_settings() {
        let config = ServerConfig::from_vars(
            None,
            [
                ("AUTH_DOMAIN", "trust.example"),
                ("API_AUDIENCE", "api"),
                ("TOKEN_LEEWAY_SECS", "30"),
            ],
        )
        .unwrap();

        let settings = config.auth_settings().unwrap();
        assert_eq!(settings.issuer(), "https://trust.example/");
        assert_eq!(settings.leeway, Duration::from_secs(30));
    }

    #[test]
    fn test_auth_settings_reject_symmetric_algorithm() {
        let config = ServerConfig::from_vars(
            None,
            [
                ("AUTH_DOMAIN", "trust.example"),
                ("API_AUDIENCE", "api"),
                ("ALGORITHM", "HS256"),
            ],
        )
        .unwrap();

        assert!(matches!(
            config.auth_settings(),
            Err(ConfigError::Auth(AuthConfigError::SymmetricAlgorithm(_)))
        ));
    }

    #[test]
    fn test_auth_settings_require_audience() {
        let config = ServerConfig::from_vars(None, [("AUTH_DOMAIN", "trust.example")]).unwrap();
        assert!(matches!(
            config.auth_settings(),
            Err(ConfigError::Auth(AuthConfigError::MissingSetting("API_AUDIENCE")))
        ));
    }
}
