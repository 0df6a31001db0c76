//! # Bot Module
//!
//! Front-end de Discord para el motor de sesiones.
//!
//! - Registro de comandos slash (globales o por guild)
//! - Traducción de interacciones a órdenes del [`TransitionController`]
//! - Seguimiento de desconexiones de voz del propio bot
//!
//! ## Arquitectura
//!
//! [`AkazaBot`] implementa el [`EventHandler`] de serenity. No guarda estado
//! de reproducción propio: todo pasa por el controlador, igual que las órdenes
//! que llegan desde el dashboard.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::controller::TransitionController, audio::voice::SongbirdTransport, config::Config};

/// Handler de eventos de Discord.
///
/// ## Fields
///
/// - `config`: configuración (application id, guild de desarrollo)
/// - `controller`: único punto de entrada a las sesiones de reproducción
/// - `voice`: transporte de voz; necesita la caché de serenity para elegir canal
pub struct AkazaBot {
    config: Arc<Config>,
    pub controller: Arc<TransitionController>,
    voice: Arc<SongbirdTransport>,
}

impl AkazaBot {
    pub fn new(
        config: Arc<Config>,
        controller: Arc<TransitionController>,
        voice: Arc<SongbirdTransport>,
    ) -> Self {
        Self {
            config,
            controller,
            voice,
        }
    }

    /// Registra los comandos slash.
    ///
    /// Con `GUILD_ID` configurado se registran sólo en esa guild (propagación
    /// inmediata); si no, de forma global.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for AkazaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.voice.attach_cache(ctx.cache.clone());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si el bot sale del canal por cualquier motivo ajeno a `/leave`
    /// (expulsión, canal borrado), la sesión se reinicia.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id.or_else(|| old.and_then(|state| state.guild_id)) else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        self.controller.handle_voice_disconnect(guild_id).await;
    }
}
