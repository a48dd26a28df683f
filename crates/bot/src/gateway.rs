//! `!email` command handling
//!
//! Parses chat commands, drives the [`Forwarder`] and renders the replies. Has
//! no knowledge of Discord beyond its mention syntax, so it can be tested
//! without a gateway connection.

use std::sync::{Arc, LazyLock};

use mailbridge_forwarder::{ForwardError, Forwarder};
use regex::Regex;
use tracing::{error, info};

/// Command prefix the bot reacts to
pub const COMMAND: &str = "!email";

/// Longest accepted alias (RFC 5321 local-part limit)
const MAX_ALIAS_LEN: usize = 64;

/// Standard email syntax check for forwarding destinations
#[allow(clippy::expect_used)]
static EMAIL_VALIDATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex is valid")
});

/// A parsed `!email` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!email <alias> <destination>`
    Forward { alias: String, destination: String },
    /// `!email delete`
    Delete,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("malformed command")]
    Usage,
}

/// Messages to send in response to a command
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    /// Posted to the setup channel
    pub setup_channel: Option<String>,
    /// Sent to the requester by direct message
    pub direct: Option<String>,
}

/// True when `content` is addressed to this bot
pub fn is_command(content: &str) -> bool {
    content.split_whitespace().next() == Some(COMMAND)
}

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_VALIDATOR.is_match(address)
}

/// Parse an `!email` command; `None` if `content` isn't one
///
/// The alias is lowercased and a trailing `@<domain>` is accepted and stripped.
pub fn parse_command(content: &str, domain: &str) -> Option<Result<Command, GatewayError>> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.first() != Some(&COMMAND) {
        return None;
    }

    let command = match fields[1..] {
        ["delete"] | ["remove"] => Ok(Command::Delete),
        [alias, destination, ..] => {
            let alias = alias.to_ascii_lowercase();
            let domain = domain.to_ascii_lowercase();
            let alias = alias
                .strip_suffix(domain.as_str())
                .and_then(|a| a.strip_suffix('@'))
                .unwrap_or(alias.as_str());

            if is_valid_alias(alias) && is_valid_email(destination) {
                Ok(Command::Forward {
                    alias: alias.to_string(),
                    destination: destination.to_string(),
                })
            } else {
                Err(GatewayError::Usage)
            }
        }
        _ => Err(GatewayError::Usage),
    };

    Some(command)
}

/// Alias must be a bare local part that can't escape the match expression
///
/// The provider reads the alias as a regex. `.` is the only metacharacter let
/// through; overlaps it creates are caught by the forwarder's conflict check.
fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= MAX_ALIAS_LEN
        && alias
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
}

/// Turns chat commands into forwarder calls
pub struct CommandGateway {
    forwarder: Arc<Forwarder>,
    smtp_server: String,
}

impl CommandGateway {
    pub fn new(forwarder: Arc<Forwarder>, smtp_server: impl Into<String>) -> Self {
        Self {
            forwarder,
            smtp_server: smtp_server.into(),
        }
    }

    fn domain(&self) -> &str {
        self.forwarder.domain()
    }

    pub fn usage(&self) -> String {
        format!(
            "`{cmd} <name> <email address>` - for example: `{cmd} first.last email@example.org` would forward emails sent to `first.last@{domain}` to the mailbox `email@example.org`. `{cmd} delete` removes your forwarding address.",
            cmd = COMMAND,
            domain = self.domain(),
        )
    }

    /// Handle one message from `author_id`; `None` if it isn't a command
    pub async fn handle(&self, content: &str, author_id: &str) -> Option<GatewayReply> {
        let command = match parse_command(content, self.domain())? {
            Ok(command) => command,
            Err(GatewayError::Usage) => {
                return Some(GatewayReply {
                    setup_channel: Some(self.usage()),
                    direct: None,
                })
            }
        };

        let reply = match command {
            Command::Forward { alias, destination } => {
                self.forward(&alias, &destination, author_id).await
            }
            Command::Delete => self.delete(author_id).await,
        };

        Some(reply)
    }

    async fn forward(&self, alias: &str, destination: &str, author_id: &str) -> GatewayReply {
        let domain = self.domain();

        match self.forwarder.forward(alias, destination, author_id).await {
            Ok(provisioned) => {
                info!(alias = %alias, author_id = %author_id, "Configured forwarding address");
                GatewayReply {
                    setup_channel: Some(format!(
                        "Configured `{}@{}` for <@{}>",
                        alias, domain, author_id
                    )),
                    direct: Some(format!(
                        "Your forwarding address {alias}@{domain} has been configured. This allows you to receive email to your personal mailbox. To send email from this address, you may need to configure your mail client with these SMTP details:\n```server: {server}\nusername: {user}\npassword: {pass}```",
                        alias = alias,
                        domain = domain,
                        server = self.smtp_server,
                        user = provisioned.mailbox,
                        pass = provisioned.secret,
                    )),
                }
            }
            Err(e) => {
                let reason = match &e {
                    ForwardError::Conflict { alias, owner } => {
                        format!("`{}` already assigned to <@{}>", alias, owner)
                    }
                    other => {
                        error!(alias = %alias, author_id = %author_id, error = %other, "Failed to configure forwarding address");
                        other.to_string()
                    }
                };
                GatewayReply {
                    setup_channel: Some(format!(
                        "Error configuring `{}@{}`: {}",
                        alias, domain, reason
                    )),
                    direct: None,
                }
            }
        }
    }

    async fn delete(&self, author_id: &str) -> GatewayReply {
        let text = match self.forwarder.delete(author_id).await {
            Ok(true) => {
                info!(author_id = %author_id, "Removed forwarding address");
                format!("Removed forwarding address for <@{}>", author_id)
            }
            Ok(false) => format!("<@{}> has no forwarding address configured", author_id),
            Err(e) => {
                error!(author_id = %author_id, error = %e, "Failed to remove forwarding address");
                format!("Error removing forwarding address for <@{}>: {}", author_id, e)
            }
        };

        GatewayReply {
            setup_channel: Some(text),
            direct: None,
        }
    }
}
