use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, MutexGuard},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    clock::PlaybackClock,
    filters::FilterConfig,
    pipeline::PipelineHandle,
    queue::TrackQueue,
    track::Track,
    voice::VoiceConnection,
};
use crate::{
    dashboard::{publisher::Publisher, snapshot::Snapshot},
    storage::{GuildSettings, GuildStats},
};

/// Estados del ciclo de reproducción de una guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Cambio de pipeline en caliente por filtros
    Restarting,
}

/// Contadores de reproducción por guild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayStats {
    #[serde(default)]
    pub total_played: u64,
    #[serde(default)]
    pub tracks: HashMap<String, u64>,
}

impl PlayStats {
    pub fn record(&mut self, title: &str) {
        self.total_played += 1;
        *self.tracks.entry(title.to_string()).or_insert(0) += 1;
    }
}

/// Límites y valores iniciales de una sesión nueva
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub queue_capacity: usize,
    pub history_capacity: usize,
    pub default_volume: f32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            queue_capacity: super::queue::DEFAULT_QUEUE_CAPACITY,
            history_capacity: super::queue::DEFAULT_HISTORY_CAPACITY,
            default_volume: 1.0,
        }
    }
}

/// Pipeline activo junto con la tarea que espera su finalización
pub struct ActivePipeline {
    pub handle: Box<dyn PipelineHandle>,
    pub generation: u64,
    pub watcher: JoinHandle<()>,
}

/// Estado mutable de una sesión; sólo se toca con el lock de la sesión
pub struct SessionState {
    pub state: PlaybackState,
    pub queue: TrackQueue,
    pub current: Option<Track>,
    pub clock: PlaybackClock,
    pub filters: FilterConfig,
    pub volume: f32,
    pub autoplay: bool,
    pub looping: bool,
    pub stats: PlayStats,
    pub pipeline: Option<ActivePipeline>,
    pub connection: Option<Arc<dyn VoiceConnection>>,
    /// Generación del pipeline vigente; una señal de fin con otra generación
    /// pertenece a un pipeline ya descartado
    pub generation: u64,
    /// Se cancela para abortar resoluciones en curso (stop, skip, leave)
    pub load_token: CancellationToken,
    pub hydrated: bool,
}

impl SessionState {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            state: PlaybackState::Idle,
            queue: TrackQueue::new(limits.queue_capacity, limits.history_capacity),
            current: None,
            clock: PlaybackClock::new(),
            filters: FilterConfig::default(),
            volume: limits.default_volume.clamp(0.0, 2.0),
            autoplay: false,
            looping: false,
            stats: PlayStats::default(),
            pipeline: None,
            connection: None,
            generation: 0,
            load_token: CancellationToken::new(),
            hydrated: false,
        }
    }

    /// Tiempo transcurrido del track actual; cero si no hay track
    pub fn elapsed(&self) -> Duration {
        if self.current.is_some() {
            self.clock.snapshot()
        } else {
            Duration::ZERO
        }
    }

    /// Durante un reinicio en caliente manda el reloj, que conserva la pausa
    pub fn is_paused(&self) -> bool {
        match self.state {
            PlaybackState::Paused => true,
            PlaybackState::Restarting => self.clock.is_paused(),
            _ => false,
        }
    }

    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Detiene el pipeline activo y descarta su señal de finalización.
    /// Devuelve `true` si había un pipeline.
    pub fn teardown_pipeline(&mut self) -> bool {
        // Invalida cualquier continuación pendiente aunque ya haya disparado
        self.next_generation();

        match self.pipeline.take() {
            Some(active) => {
                active.watcher.abort();
                active.handle.stop();
                debug!("🛑 Pipeline {} detenido", active.generation);
                true
            }
            None => false,
        }
    }

    /// Cancela las resoluciones en vuelo y prepara un token nuevo
    pub fn cancel_loads(&mut self) {
        self.load_token.cancel();
        self.load_token = CancellationToken::new();
    }

    /// Vuelve a `Idle`: cola vacía, sin track ni pipeline. La conexión de
    /// voz se conserva; `leave` la libera aparte.
    pub fn reset(&mut self) {
        self.cancel_loads();
        self.teardown_pipeline();
        self.queue.clear();
        self.current = None;
        self.clock.start();
        self.state = PlaybackState::Idle;
    }

    pub fn settings(&self) -> GuildSettings {
        GuildSettings {
            volume: self.volume,
            bass_boost: self.filters.bass_boost,
            auto_play: self.autoplay,
            eq_gains: self.filters.eq_gains,
        }
    }

    pub fn apply_settings(&mut self, settings: GuildSettings) {
        self.volume = if settings.volume.is_finite() {
            settings.volume.clamp(0.0, 2.0)
        } else {
            self.volume
        };
        self.filters = FilterConfig {
            bass_boost: settings.bass_boost,
            eq_gains: settings.eq_gains,
        };
        self.autoplay = settings.auto_play;
    }

    pub fn stats_record(&self) -> GuildStats {
        GuildStats {
            stats: self.stats.clone(),
            history: self.queue.history().iter().cloned().collect(),
        }
    }

    pub fn apply_stats(&mut self, record: GuildStats) {
        self.stats = record.stats;
        self.queue.restore_history(record.history);
    }
}

/// Sesión de reproducción de una guild.
///
/// Todo cambio de estado pasa por [`PlaybackSession::lock`]; las sesiones
/// no comparten nada entre sí salvo el publisher.
pub struct PlaybackSession {
    guild_id: GuildId,
    state: Mutex<SessionState>,
    publisher: Arc<dyn Publisher>,
}

impl PlaybackSession {
    pub fn new(guild_id: GuildId, limits: SessionLimits, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            guild_id,
            state: Mutex::new(SessionState::new(limits)),
            publisher,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// El lock sólo si está libre ahora mismo
    pub fn try_lock(&self) -> Option<MutexGuard<'_, SessionState>> {
        self.state.try_lock().ok()
    }

    pub async fn snapshot(&self, state: &SessionState) -> Snapshot {
        Snapshot::capture(self.guild_id, state).await
    }

    /// Publica el estado actual a los observadores (con coalescencia)
    pub async fn publish(&self, state: &SessionState) {
        let snapshot = self.snapshot(state).await;
        self.publisher.publish(self.guild_id, snapshot);
    }
}
