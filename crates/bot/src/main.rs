//! mailbridge Discord bot entry point

use std::sync::Arc;

use anyhow::Context as _;
use mailbridge_bot::{CommandGateway, Config, DiscordHandler};
use mailbridge_forwarder::{spawn_refresh_worker, Forwarder, ForwarderConfig};
use mailbridge_mailgun::MailgunClient;
use mailbridge_shared::RouteStore;
use serenity::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        domain = %config.mailgun_domain,
        prefix = %config.mailgun_route_identity_prefix,
        "Starting mailbridge"
    );

    let store: Arc<dyn RouteStore> =
        Arc::new(MailgunClient::new(config.mailgun()).context("failed to build Mailgun client")?);

    let forwarder = Arc::new(
        Forwarder::new(
            store,
            ForwarderConfig::new(
                &config.mailgun_domain,
                &config.mailgun_route_identity_prefix,
            ),
        )
        .await,
    );

    let shutdown = CancellationToken::new();
    let refresh_worker = spawn_refresh_worker(
        Arc::clone(forwarder.cache()),
        config.route_refresh_interval,
        shutdown.clone(),
    );

    let gateway = Arc::new(CommandGateway::new(
        forwarder,
        &config.mailgun_smtp_server,
    ));
    let handler = DiscordHandler::new(
        gateway,
        config.discord_server_id,
        config.discord_setup_channel_id,
        &config.discord_name,
    );

    let mut client = Client::builder(&config.discord_token, DiscordHandler::intents())
        .event_handler(handler)
        .await
        .context("failed to build Discord client")?;
    let shard_manager = Arc::clone(&client.shard_manager);

    let result = tokio::select! {
        result = client.start() => result.context("Discord client stopped"),
        _ = shutdown_signal() => {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
            Ok(())
        }
    };

    shutdown.cancel();
    if let Err(e) = refresh_worker.await {
        error!(error = %e, "Route refresh worker panicked");
    }

    result
}

/// `RUST_LOG` filter, JSON output when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
