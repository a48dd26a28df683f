//! mailbridge Discord bot
//!
//! Lets members of a Discord server provision a personal forwarding alias on
//! the Mailgun domain, plus SMTP credentials to send from it.

pub mod config;
pub mod discord;
pub mod gateway;

pub use config::Config;
pub use discord::DiscordHandler;
pub use gateway::{Command, CommandGateway, GatewayReply};
