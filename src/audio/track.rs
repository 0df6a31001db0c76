use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Requester usado cuando el track llega por autoplay
pub const AUTOPLAY_REQUESTER: &str = "Autoplay";

/// Track resuelto y listo para reproducir.
///
/// Cada resolución recibe un `id` propio, de modo que dos peticiones de la
/// misma canción siguen siendo tracks distintos para la cola y el dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub title: String,
    pub stream_url: String,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    pub requester: String,
    pub original_url: String,
}

impl Track {
    pub fn new(title: impl Into<String>, stream_url: impl Into<String>) -> Self {
        let stream_url = stream_url.into();
        Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            title: title.into(),
            original_url: stream_url.clone(),
            stream_url,
            duration_secs: None,
            thumbnail: None,
            requester: "Dashboard".to_string(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = Some(duration.as_secs());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_original_url(mut self, url: impl Into<String>) -> Self {
        self.original_url = url.into();
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }
}

/// Entrada del historial de reproducción (más reciente primero)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub thumbnail: Option<String>,
    pub requester: String,
    pub played_at: DateTime<Utc>,
}

impl From<&Track> for HistoryEntry {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            thumbnail: track.thumbnail.clone(),
            requester: track.requester.clone(),
            played_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_track_gets_its_own_id() {
        let a = Track::new("Song", "https://cdn.example/a");
        let b = Track::new("Song", "https://cdn.example/a");
        assert_ne!(a.id, b.id);
        assert_eq!(a.original_url, "https://cdn.example/a");
    }

    #[test]
    fn test_history_entry_keeps_requester() {
        let track = Track::new("Song", "https://cdn.example/a")
            .with_requester("alice")
            .with_thumbnail("https://img.example/a.jpg");
        let entry = HistoryEntry::from(&track);
        assert_eq!(entry.requester, "alice");
        assert_eq!(entry.thumbnail.as_deref(), Some("https://img.example/a.jpg"));
    }
}
