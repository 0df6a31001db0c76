use async_trait::async_trait;
use serenity::{
    cache::Cache,
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId},
    },
};
use songbird::{Call, Songbird};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("no hay un canal de voz disponible")]
    NoChannel,
    #[error("el bot no está conectado a un canal de voz")]
    NotConnected,
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),
    #[error("no se pudo salir del canal de voz: {0}")]
    Leave(String),
}

/// Conexión viva a un canal de voz
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild_id(&self) -> GuildId;
    async fn is_connected(&self) -> bool;
    async fn current_channel(&self) -> Option<ChannelId>;
}

/// Transporte de voz: unirse, moverse y salir de canales
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError>;

    async fn move_to(
        &self,
        connection: &dyn VoiceConnection,
        channel_id: ChannelId,
    ) -> Result<(), ConnectionError>;

    async fn disconnect(&self, connection: &dyn VoiceConnection) -> Result<(), ConnectionError>;

    /// Canal a usar cuando la orden no indica uno (p. ej. desde el dashboard)
    async fn pick_channel(&self, guild_id: GuildId) -> Option<ChannelId>;
}

pub struct SongbirdConnection {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        self.call
            .lock()
            .await
            .current_channel()
            .map(|channel| ChannelId::new(channel.0.get()))
    }
}

/// Transporte respaldado por Songbird.
///
/// La caché de serenity sólo existe una vez construido el cliente, así que
/// se adjunta en el evento `ready`.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    cache: OnceLock<Arc<Cache>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            cache: OnceLock::new(),
        }
    }

    pub fn attach_cache(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            debug!("Caché de serenity ya adjuntada al transporte de voz");
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdConnection { guild_id, call }))
    }

    async fn move_to(
        &self,
        connection: &dyn VoiceConnection,
        channel_id: ChannelId,
    ) -> Result<(), ConnectionError> {
        self.manager
            .join(connection.guild_id(), channel_id)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        info!("🔀 Movido al canal {} en guild {}", channel_id, connection.guild_id());
        Ok(())
    }

    async fn disconnect(&self, connection: &dyn VoiceConnection) -> Result<(), ConnectionError> {
        self.manager
            .remove(connection.guild_id())
            .await
            .map_err(|e| ConnectionError::Leave(e.to_string()))?;

        info!("👋 Desconectado del canal de voz en guild {}", connection.guild_id());
        Ok(())
    }

    async fn pick_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let cache = self.cache.get()?;
        let bot_id = cache.current_user().id;
        let guild = cache.guild(guild_id)?;

        let mut voice_channels: Vec<_> = guild
            .channels
            .values()
            .filter(|channel| channel.kind == ChannelType::Voice)
            .collect();
        voice_channels.sort_by_key(|channel| channel.position);

        let occupied = voice_channels.iter().find(|channel| {
            guild
                .voice_states
                .values()
                .any(|state| state.channel_id == Some(channel.id) && state.user_id != bot_id)
        });

        occupied.or(voice_channels.first()).map(|channel| channel.id)
    }
}
