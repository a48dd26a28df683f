//! Discord event handler
//!
//! Filters gateway messages down to `!email` commands from server members and
//! delivers the [`CommandGateway`] replies.

use std::sync::Arc;

use serenity::all::{
    ChannelId, Context, CreateMessage, EventHandler, GatewayIntents, GuildId, Message, Ready,
};
use serenity::async_trait;
use tracing::{debug, error, info, warn};

use crate::gateway::{self, CommandGateway, GatewayReply};

/// Handler for Discord gateway events
pub struct DiscordHandler {
    gateway: Arc<CommandGateway>,
    server_id: GuildId,
    setup_channel_id: ChannelId,
    nickname: String,
}

impl DiscordHandler {
    pub fn new(
        gateway: Arc<CommandGateway>,
        server_id: u64,
        setup_channel_id: u64,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            server_id: GuildId::new(server_id),
            setup_channel_id: ChannelId::new(setup_channel_id),
            nickname: nickname.into(),
        }
    }

    /// Required gateway intents for the bot
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }

    /// Commands are taken from DMs or the setup channel only
    fn accepts_channel(&self, guild_id: Option<GuildId>, channel_id: ChannelId) -> bool {
        guild_id.is_none() || channel_id == self.setup_channel_id
    }

    async fn deliver(&self, ctx: &Context, msg: &Message, reply: GatewayReply) {
        if let Some(text) = reply.setup_channel {
            if let Err(e) = self.setup_channel_id.say(&ctx.http, text).await {
                error!(error = %e, "Failed to post to setup channel");
            }
        }

        if let Some(text) = reply.direct {
            if let Err(e) = msg
                .author
                .direct_message(ctx, CreateMessage::new().content(text))
                .await
            {
                warn!(author_id = %msg.author.id, error = %e, "Failed to send direct message");
                let notice = format!(
                    "<@{}> I couldn't send you a direct message with your SMTP details. Please allow DMs from server members and try again.",
                    msg.author.id
                );
                if let Err(e) = self.setup_channel_id.say(&ctx.http, notice).await {
                    error!(error = %e, "Failed to post to setup channel");
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord bot ready"
        );

        if let Err(e) = self
            .server_id
            .edit_nickname(&ctx.http, Some(self.nickname.as_str()))
            .await
        {
            warn!(error = %e, nickname = %self.nickname, "Failed to set nickname");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Skip bot messages to prevent loops
        if msg.author.bot || !gateway::is_command(&msg.content) {
            return;
        }

        if !self.accepts_channel(msg.guild_id, msg.channel_id) {
            debug!(channel_id = %msg.channel_id, "Ignoring command outside setup channel");
            return;
        }

        if let Err(e) = self.server_id.member(&ctx, msg.author.id).await {
            info!(author_id = %msg.author.id, error = %e, "Ignoring command from non-member");
            return;
        }

        let author_id = msg.author.id.to_string();
        if let Some(reply) = self.gateway.handle(&msg.content, &author_id).await {
            self.deliver(&ctx, &msg, reply).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mailbridge_forwarder::{Forwarder, ForwarderConfig, InMemoryRouteStore};

    fn handler() -> DiscordHandler {
        let store = Arc::new(InMemoryRouteStore::new());
        let forwarder =
            Forwarder::without_initial_refresh(store, ForwarderConfig::new("mg.example.org", "mb:"));
        let gateway = CommandGateway::new(Arc::new(forwarder), "mxb.mailgun.org");
        DiscordHandler::new(Arc::new(gateway), 100, 200, "mailbridge")
    }

    #[test]
    fn test_intents_include_message_content() {
        let intents = DiscordHandler::intents();
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(intents.contains(GatewayIntents::DIRECT_MESSAGES));
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
    }

    #[test]
    fn test_accepts_dm_and_setup_channel_only() {
        let handler = handler();

        // DM
        assert!(handler.accepts_channel(None, ChannelId::new(999)));
        // Setup channel
        assert!(handler.accepts_channel(Some(GuildId::new(100)), ChannelId::new(200)));
        // Other channel in the server
        assert!(!handler.accepts_channel(Some(GuildId::new(100)), ChannelId::new(201)));
    }
}
