use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::audio::{filters::EqGains, session::PlayStats, track::HistoryEntry};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("error de E/S en {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON inválido en {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Preferencias de reproducción de una guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub bass_boost: bool,
    #[serde(default)]
    pub auto_play: bool,
    #[serde(default)]
    pub eq_gains: EqGains,
}

fn default_volume() -> f32 {
    1.0
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            bass_boost: false,
            auto_play: false,
            eq_gains: EqGains::default(),
        }
    }
}

/// Estadísticas e historial de una guild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildStats {
    #[serde(default)]
    pub stats: PlayStats,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Persistencia de sesiones. Los fallos nunca detienen la reproducción:
/// quien llama los registra y sigue con el estado en memoria.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, PersistenceError>;
    async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), PersistenceError>;
    async fn load_stats(&self, guild_id: GuildId) -> Result<Option<GuildStats>, PersistenceError>;
    async fn save_stats(&self, guild_id: GuildId, stats: &GuildStats) -> Result<(), PersistenceError>;
}

/// Almacenamiento en archivos JSON, uno por guild y tipo de dato
pub struct JsonStorage {
    data_dir: PathBuf,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self, PersistenceError> {
        let guilds_dir = data_dir.join("guilds");
        fs::create_dir_all(&guilds_dir)
            .await
            .map_err(|source| PersistenceError::Io {
                path: guilds_dir.clone(),
                source,
            })?;

        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    fn guild_file(&self, guild_id: GuildId, kind: &str) -> PathBuf {
        self.data_dir
            .join("guilds")
            .join(format!("guild_{}.{}.json", guild_id, kind))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| PersistenceError::Serde {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Escribe en un `.tmp` hermano y lo renombra encima del destino
    async fn write_json<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Serde {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|source| PersistenceError::Io {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, path)
            .await
            .map_err(|source| PersistenceError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("💾 Guardado {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonStorage {
    async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, PersistenceError> {
        Self::read_json(&self.guild_file(guild_id, "settings")).await
    }

    async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), PersistenceError> {
        Self::write_json(&self.guild_file(guild_id, "settings"), settings).await
    }

    async fn load_stats(&self, guild_id: GuildId) -> Result<Option<GuildStats>, PersistenceError> {
        Self::read_json(&self.guild_file(guild_id, "stats")).await
    }

    async fn save_stats(&self, guild_id: GuildId, stats: &GuildStats) -> Result<(), PersistenceError> {
        Self::write_json(&self.guild_file(guild_id, "stats"), stats).await
    }
}
