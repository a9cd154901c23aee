use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::player::{DriverSettings, PlaybackDriver};
use crate::audio::voice::SongbirdBackend;
use crate::bot::{DiscordNotifier, MusicBot, ShardManagerContainer};
use crate::config::Config;
use crate::sources::{resolver::QueryResolver, ytdlp::YtDlp};
use crate::storage::PanelStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Jukebox Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Paneles persistidos
    let panels = Arc::new(PanelStore::load(config.data_dir.clone()).await?);

    // Avisos del reproductor y refresco de paneles
    let http = Arc::new(Http::new(&config.discord_token));
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let notifier = Arc::new(DiscordNotifier::new(http, refresh_tx));

    // Voz y extracción
    let songbird = Songbird::serenity();
    let backend = Arc::new(SongbirdBackend::new(Arc::clone(&songbird))?);
    let resolver = Arc::new(QueryResolver::new(YtDlp::new(
        config.ytdlp_path.clone(),
        config.extract_timeout,
    )));

    let driver = PlaybackDriver::new(
        backend,
        resolver,
        notifier.clone(),
        DriverSettings::from(config.as_ref()),
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(Arc::clone(&config), driver, panels, notifier, refresh_rx);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    {
        let mut data = client.data.write().await;
        data.insert::<ShardManagerContainer>(Arc::clone(&client.shard_manager));
    }

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("No se pudo escuchar Ctrl+C: {:?}", e),
        }
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("yt-dlp no está disponible en {}", config.ytdlp_path);
    }
}
