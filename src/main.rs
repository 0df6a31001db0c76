use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod dashboard;
mod sources;
mod storage;
mod ui;

use crate::audio::{
    controller::TransitionController, pipeline::FfmpegPipeline, registry::SessionRegistry,
    voice::SongbirdTransport,
};
use crate::bot::AkazaBot;
use crate::config::Config;
use crate::dashboard::{BroadcastHub, DashboardService, NoopPublisher, Publisher};
use crate::sources::{ytdlp::verify_dependencies, YtDlpResolver};
use crate::storage::JsonStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("akaza_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Akaza Music v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        verify_dependencies(&config.ytdlp_path, &config.ffmpeg_path).await?;
        println!("OK");
        return Ok(());
    }

    if let Err(e) = verify_dependencies(&config.ytdlp_path, &config.ffmpeg_path).await {
        warn!("⚠️ Dependencias incompletas, la reproducción fallará: {:?}", e);
    }

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);

    // Voz y decodificación
    let songbird = Songbird::serenity();
    let voice = Arc::new(SongbirdTransport::new(songbird.clone()));
    let pipeline = Arc::new(FfmpegPipeline::new(songbird.clone(), config.ffmpeg_path.clone()));
    let resolver = Arc::new(YtDlpResolver::new(
        config.ytdlp_path.clone(),
        config.cookies_path.clone(),
        config.retry_policy(),
    ));

    // Motor de sesiones y dashboard
    let hub = Arc::new(BroadcastHub::new(
        Duration::from_secs(config.snapshot_drift_secs),
        config.observer_buffer,
    ));
    let publisher: Arc<dyn Publisher> = if config.dashboard_enabled {
        hub.clone()
    } else {
        Arc::new(NoopPublisher)
    };
    let registry = Arc::new(SessionRegistry::new(config.session_limits(), publisher));
    let controller = Arc::new(TransitionController::new(
        registry,
        resolver,
        pipeline,
        voice.clone(),
        storage,
        config.pipeline_start_attempts,
    ));

    if config.dashboard_enabled {
        let dashboard = Arc::new(DashboardService::new(controller.clone(), hub));
        let _sync = dashboard.spawn_sync_loop(Duration::from_secs(config.sync_interval_secs));
        info!("📡 Dashboard listo para observadores");
    } else {
        info!("📴 Dashboard desactivado");
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = AkazaBot::new(config.clone(), controller.clone(), voice);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        controller.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
