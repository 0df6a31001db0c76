use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::debug;

use super::session::{PlaybackSession, SessionLimits};
use crate::dashboard::publisher::Publisher;

/// Registro de sesiones: exactamente una [`PlaybackSession`] por guild,
/// creada en la primera referencia y nunca destruida por inactividad.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    limits: SessionLimits,
    publisher: Arc<dyn Publisher>,
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            sessions: DashMap::new(),
            limits,
            publisher,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Sesión creada para guild {}", guild_id);
                Arc::new(PlaybackSession::new(
                    guild_id,
                    self.limits,
                    self.publisher.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    /// Copia de las guilds registradas; no retiene ningún shard del mapa
    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::publisher::NoopPublisher;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(SessionLimits::default(), Arc::new(NoopPublisher))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();
        let guild = GuildId::new(1);

        let first = registry.get_or_create(guild);
        let second = registry.get_or_create(guild);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.guild_ids(), vec![guild]);
    }

    #[test]
    fn test_guilds_are_isolated() {
        let registry = registry();
        let a = registry.get_or_create(GuildId::new(1));
        let b = registry.get_or_create(GuildId::new(2));
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.get(GuildId::new(3)).is_none());

        let mut ids = registry.guild_ids();
        ids.sort();
        assert_eq!(ids, vec![GuildId::new(1), GuildId::new(2)]);
    }

    #[tokio::test]
    async fn test_try_lock_skips_busy_session() {
        let registry = registry();
        let session = registry.get_or_create(GuildId::new(1));

        let held = session.lock().await;
        assert!(session.try_lock().is_none());
        drop(held);
        assert!(session.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_one_guild_lock_does_not_block_another() {
        let registry = registry();
        let a = registry.get_or_create(GuildId::new(1));
        let b = registry.get_or_create(GuildId::new(2));

        let _held = a.lock().await;
        let other = tokio::time::timeout(std::time::Duration::from_millis(50), b.lock()).await;
        assert!(other.is_ok());
    }
}
