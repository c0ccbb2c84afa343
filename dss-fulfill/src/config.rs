//! Configuration for dss-fulfill
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--port`, `--api-url`, ...)
//! 2. Environment variables (`DSS_API_URL`, `DSS_ACCESS_TOKEN`, ...), via clap
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! The TOML file is located with `dss_common::config::resolve_config_path`:
//! `--config`, then `DSS_FULFILL_CONFIG`, then `~/.config/dss/fulfill.toml`,
//! then `/etc/dss/fulfill.toml`.

use crate::credentials::{Credentials, OidcCredentials, StaticCredentials};
use crate::error::{Error, Result};
use crate::feed::FeedConfig;
use dss_common::config::{load_toml, resolve_config_path, ConfigSource};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE_NAME: &str = "fulfill.toml";
pub const CONFIG_ENV_VAR: &str = "DSS_FULFILL_CONFIG";

/// Contents of the TOML configuration file
///
/// Every field is optional; missing values take the built-in defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    /// Fulfillment API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Live feed endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Port for the local HTTP/SSE server
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub feed: FeedSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            port: default_port(),
            auth: AuthConfig::default(),
            feed: FeedSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Credential settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// OpenID Connect realm URL
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Enables automatic token refresh when present
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Fixed bearer token, or the initial token when refreshing
    #[serde(default)]
    pub access_token: Option<String>,

    /// Minimum remaining token lifetime before a request
    #[serde(default = "default_min_validity_secs")]
    pub min_validity_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: default_issuer_url(),
            client_id: default_client_id(),
            refresh_token: None,
            access_token: None,
            min_validity_secs: default_min_validity_secs(),
        }
    }
}

/// Live feed timers
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSettings {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_freshness_check_interval_ms")]
    pub freshness_check_interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            freshness_check_interval_ms: default_freshness_check_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directives (e.g. `info` or `dss_fulfill=trace`); `RUST_LOG` wins
    #[serde(default)]
    pub level: Option<String>,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:3000/ws".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_issuer_url() -> String {
    "https://sds.zone/auth/realms/dss-realm".to_string()
}

fn default_client_id() -> String {
    "portal-app".to_string()
}

fn default_min_validity_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_freshness_check_interval_ms() -> u64 {
    60_000
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Url,
    pub ws_url: Url,
    pub port: u16,
    pub auth: AuthConfig,
    pub feed: FeedSettings,
    pub logging: LoggingConfig,
    /// Where the TOML layer came from
    pub source: ConfigSource,
}

impl Config {
    /// Locate and load the TOML file, then apply overrides
    ///
    /// Runs before logging is configured, so it reports through `source`
    /// rather than logging; see [`Config::uses_defaults`].
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let source = resolve_config_path(config_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);

        let toml_config = match source.path() {
            Some(path) => load_toml::<TomlConfig>(path)?,
            None => TomlConfig::default(),
        };

        Self::resolve(toml_config, overrides, source)
    }

    /// True when no config file was found and compiled defaults apply
    pub fn uses_defaults(&self) -> bool {
        self.source.path().is_none()
    }

    /// Merge a parsed TOML layer with overrides and validate
    pub fn resolve(
        toml_config: TomlConfig,
        overrides: ConfigOverrides,
        source: ConfigSource,
    ) -> Result<Self> {
        let api_url = overrides.api_url.unwrap_or(toml_config.api_url);
        let ws_url = overrides.ws_url.unwrap_or(toml_config.ws_url);
        let port = overrides.port.unwrap_or(toml_config.port);

        let mut auth = toml_config.auth;
        if overrides.access_token.is_some() {
            auth.access_token = overrides.access_token;
        }
        if overrides.refresh_token.is_some() {
            auth.refresh_token = overrides.refresh_token;
        }

        let api_url = parse_url("api_url", &api_url, &["http", "https"])?;
        let ws_url = parse_url("ws_url", &ws_url, &["ws", "wss"])?;
        if toml_config.feed.reconnect_delay_ms == 0 {
            return Err(Error::Config("feed.reconnect_delay_ms must be positive".to_string()));
        }
        if toml_config.feed.freshness_check_interval_ms == 0 {
            return Err(Error::Config(
                "feed.freshness_check_interval_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            api_url,
            ws_url,
            port,
            auth,
            feed: toml_config.feed,
            logging: toml_config.logging,
            source,
        })
    }

    pub fn min_validity(&self) -> Duration {
        Duration::from_secs(self.auth.min_validity_secs)
    }

    /// Live feed settings
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            url: self.ws_url.clone(),
            reconnect_delay: Duration::from_millis(self.feed.reconnect_delay_ms),
            freshness_interval: Duration::from_millis(self.feed.freshness_check_interval_ms),
            min_validity: self.min_validity(),
        }
    }

    /// Credential provider implied by the auth settings
    ///
    /// A refresh token selects OpenID Connect refresh; otherwise the access
    /// token (if any) is used as-is.
    pub fn credentials(&self, http: reqwest::Client) -> Credentials {
        match (&self.auth.refresh_token, &self.auth.access_token) {
            (Some(refresh_token), access_token) => {
                info!(issuer = %self.auth.issuer_url, client_id = %self.auth.client_id, "Using OpenID Connect token refresh");
                let oidc = OidcCredentials::new(
                    http,
                    &self.auth.issuer_url,
                    self.auth.client_id.clone(),
                    refresh_token.clone(),
                );
                match access_token {
                    Some(token) => oidc.with_access_token(token.clone()).into(),
                    None => oidc.into(),
                }
            }
            (None, Some(access_token)) => {
                info!("Using static access token");
                StaticCredentials::new(access_token.clone()).into()
            }
            (None, None) => {
                warn!("No access or refresh token configured; API calls and the live feed will fail until one is provided");
                StaticCredentials::empty().into()
            }
        }
    }
}

fn parse_url(key: &str, value: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, value, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::Config(format!(
            "Invalid {} '{}': scheme must be one of {}",
            key,
            value,
            schemes.join(", ")
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialProvider;

    fn resolve(toml_config: TomlConfig, overrides: ConfigOverrides) -> Result<Config> {
        Config::resolve(toml_config, overrides, ConfigSource::Defaults)
    }

    #[test]
    fn test_uses_defaults_follows_source() {
        let config = resolve(TomlConfig::default(), ConfigOverrides::default()).unwrap();
        assert!(config.uses_defaults());

        let from_file = Config::resolve(
            TomlConfig::default(),
            ConfigOverrides::default(),
            ConfigSource::CommandLine(PathBuf::from("/tmp/fulfill.toml")),
        )
        .unwrap();
        assert!(!from_file.uses_defaults());
    }

    #[test]
    fn test_defaults() {
        let config = resolve(TomlConfig::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(config.port, 5780);
        assert_eq!(config.api_url.as_str(), "http://localhost:3000/");
        assert_eq!(config.ws_url.as_str(), "ws://localhost:3000/ws");
        assert_eq!(config.auth.client_id, "portal-app");

        let feed = config.feed_config();
        assert_eq!(feed.reconnect_delay, Duration::from_secs(5));
        assert_eq!(feed.freshness_interval, Duration::from_secs(60));
        assert_eq!(feed.min_validity, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            api_url = "https://api.example.com"
            [feed]
            reconnect_delay_ms = 1500
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = resolve(toml_config, ConfigOverrides::default()).unwrap();
        assert_eq!(config.api_url.host_str(), Some("api.example.com"));
        assert_eq!(config.feed.reconnect_delay_ms, 1500);
        assert_eq!(config.feed.freshness_check_interval_ms, 60_000);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let parsed = toml::from_str::<TomlConfig>("api_ulr = \"http://x\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            port: Some(6000),
            ws_url: Some("wss://feed.example.com/ws".into()),
            access_token: Some("cli-token".into()),
            ..Default::default()
        };
        let mut toml_config = TomlConfig::default();
        toml_config.auth.access_token = Some("file-token".into());

        let config = resolve(toml_config, overrides).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.ws_url.scheme(), "wss");
        assert_eq!(config.auth.access_token.as_deref(), Some("cli-token"));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let bad_scheme = ConfigOverrides {
            ws_url: Some("http://feed.example.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(TomlConfig::default(), bad_scheme),
            Err(Error::Config(_))
        ));

        let unparsable = ConfigOverrides {
            api_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(resolve(TomlConfig::default(), unparsable).is_err());
    }

    #[test]
    fn test_zero_timer_rejected() {
        let mut toml_config = TomlConfig::default();
        toml_config.feed.freshness_check_interval_ms = 0;
        assert!(resolve(toml_config, ConfigOverrides::default()).is_err());
    }

    #[test]
    fn test_credentials_selection() {
        let http = reqwest::Client::new();

        let mut config = resolve(TomlConfig::default(), ConfigOverrides::default()).unwrap();
        assert!(matches!(config.credentials(http.clone()), Credentials::Static(_)));

        config.auth.access_token = Some("a".into());
        let creds = config.credentials(http.clone());
        assert_eq!(creds.token().as_deref(), Some("a"));

        config.auth.refresh_token = Some("r".into());
        match config.credentials(http) {
            Credentials::Oidc(oidc) => {
                assert_eq!(oidc.token().as_deref(), Some("a"));
                assert_eq!(
                    oidc.token_url(),
                    "https://sds.zone/auth/realms/dss-realm/protocol/openid-connect/token"
                );
            }
            Credentials::Static(_) => panic!("expected OIDC credentials"),
        }
    }
}
