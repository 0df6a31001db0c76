use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::time::Duration;

use crate::audio::{
    filters::EqGains,
    session::{PlayStats, PlaybackState, SessionState},
    track::{HistoryEntry, Track},
};

/// Vista de un track para los observadores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: u64,
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<u64>,
    pub requester: String,
    pub url: String,
}

impl From<&Track> for TrackSummary {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            title: track.title.clone(),
            thumbnail: track.thumbnail.clone(),
            duration: track.duration_secs,
            requester: track.requester.clone(),
            url: track.original_url.clone(),
        }
    }
}

/// Proyección serializable del estado de una sesión
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub guild_id: String,
    pub online: bool,
    pub connected: bool,
    pub channel_id: Option<String>,
    pub state: PlaybackState,
    pub current_song: Option<TrackSummary>,
    pub is_paused: bool,
    /// Porcentaje, 0..=200
    pub volume: u32,
    pub queue: Vec<TrackSummary>,
    pub bass_boost: bool,
    pub eq_gains: EqGains,
    pub auto_play: bool,
    pub loop_enabled: bool,
    /// Segundos enteros
    pub elapsed: u64,
    pub stats: PlayStats,
    pub history: Vec<HistoryEntry>,
}

impl Snapshot {
    pub async fn capture(guild_id: GuildId, state: &SessionState) -> Self {
        let (connected, channel_id) = match &state.connection {
            Some(connection) if connection.is_connected().await => {
                (true, connection.current_channel().await)
            }
            _ => (false, None),
        };

        Self {
            guild_id: guild_id.to_string(),
            online: true,
            connected,
            channel_id: channel_id.map(|id| id.to_string()),
            state: state.state,
            current_song: state.current.as_ref().map(TrackSummary::from),
            is_paused: state.is_paused(),
            volume: (state.volume * 100.0).round() as u32,
            queue: state.queue.list().iter().map(TrackSummary::from).collect(),
            bass_boost: state.filters.bass_boost,
            eq_gains: state.filters.eq_gains,
            auto_play: state.autoplay,
            loop_enabled: state.looping,
            elapsed: state.elapsed().as_secs(),
            stats: state.stats.clone(),
            history: state.queue.history().iter().cloned().collect(),
        }
    }

    /// Igualdad ignorando el tiempo transcurrido y las estadísticas
    pub fn same_structure(&self, other: &Snapshot) -> bool {
        let Snapshot {
            guild_id,
            online,
            connected,
            channel_id,
            state,
            current_song,
            is_paused,
            volume,
            queue,
            bass_boost,
            eq_gains,
            auto_play,
            loop_enabled,
            elapsed: _,
            stats: _,
            history,
        } = self;

        *guild_id == other.guild_id
            && *online == other.online
            && *connected == other.connected
            && *channel_id == other.channel_id
            && *state == other.state
            && current_song.as_ref().map(|s| s.id) == other.current_song.as_ref().map(|s| s.id)
            && *is_paused == other.is_paused
            && *volume == other.volume
            && *queue == other.queue
            && *bass_boost == other.bass_boost
            && *eq_gains == other.eq_gains
            && *auto_play == other.auto_play
            && *loop_enabled == other.loop_enabled
            && *history == other.history
    }

    /// `true` si hay un cambio estructural o el tiempo se desvió más de `drift`
    pub fn differs_from(&self, previous: &Snapshot, drift: Duration) -> bool {
        !self.same_structure(previous) || self.elapsed.abs_diff(previous.elapsed) > drift.as_secs()
    }
}
