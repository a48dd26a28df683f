//! Application configuration

use std::env;
use std::fmt;
use std::time::Duration;

use mailbridge_mailgun::{MailgunConfig, DEFAULT_API_BASE};

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    // Discord
    pub discord_name: String,
    pub discord_token: String,
    pub discord_server_id: u64,
    pub discord_setup_channel_id: u64,

    // Mailgun
    pub mailgun_domain: String,
    pub mailgun_private_key: String,
    pub mailgun_api_base: String,
    pub mailgun_smtp_server: String,
    /// Description prefix separating our routes from others in the account
    pub mailgun_route_identity_prefix: String,

    // Route cache
    pub route_refresh_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Discord
            discord_name: env::var("DISCORD_NAME").unwrap_or_else(|_| "mailbridge".to_string()),
            discord_token: required("DISCORD_TOKEN")?,
            discord_server_id: snowflake("DISCORD_SERVER_ID")?,
            discord_setup_channel_id: snowflake("DISCORD_SETUP_CHANNEL_ID")?,

            // Mailgun
            mailgun_domain: required("MAILGUN_DOMAIN")?,
            mailgun_private_key: required("MAILGUN_PRIVATE_KEY")?,
            mailgun_api_base: env::var("MAILGUN_API_BASE")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            mailgun_smtp_server: env::var("MAILGUN_SMTP_SERVER")
                .unwrap_or_else(|_| "mxb.mailgun.org".to_string()),
            mailgun_route_identity_prefix: required("MAILGUN_ROUTE_IDENTITY_PREFIX")?,

            // Route cache
            route_refresh_interval: {
                let secs: u64 = env::var("ROUTE_REFRESH_INTERVAL_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .unwrap_or(600);
                if secs == 0 {
                    return Err(ConfigError::Invalid(
                        "ROUTE_REFRESH_INTERVAL_SECS",
                        "must be greater than zero",
                    ));
                }
                Duration::from_secs(secs)
            },
        })
    }

    /// Mailgun client settings derived from this config
    pub fn mailgun(&self) -> MailgunConfig {
        MailgunConfig::new(&self.mailgun_domain, &self.mailgun_private_key)
            .with_api_base(&self.mailgun_api_base)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_name", &self.discord_name)
            .field("discord_token", &"<redacted>")
            .field("discord_server_id", &self.discord_server_id)
            .field("discord_setup_channel_id", &self.discord_setup_channel_id)
            .field("mailgun_domain", &self.mailgun_domain)
            .field("mailgun_private_key", &"<redacted>")
            .field("mailgun_api_base", &self.mailgun_api_base)
            .field("mailgun_smtp_server", &self.mailgun_smtp_server)
            .field(
                "mailgun_route_identity_prefix",
                &self.mailgun_route_identity_prefix,
            )
            .field("route_refresh_interval", &self.route_refresh_interval)
            .finish()
    }
}

/// Required, non-empty variable
fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Required Discord ID; snowflakes are never zero
fn snowflake(name: &'static str) -> Result<u64, ConfigError> {
    match required(name)?.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ConfigError::Invalid(name, "must be a non-zero numeric Discord ID")),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
