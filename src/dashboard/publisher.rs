use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::debug;

use super::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Sin cambios relevantes o sin observadores
    Skipped,
    /// Entregado a `n` observadores
    Delivered(usize),
}

/// Destino de los snapshots de sesión. Nunca bloquea: quien publica está
/// dentro del lock de la sesión.
pub trait Publisher: Send + Sync {
    fn publish(&self, guild_id: GuildId, snapshot: Snapshot) -> PublishOutcome;
}

/// Publisher para cuando no hay dashboard
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, _guild_id: GuildId, _snapshot: Snapshot) -> PublishOutcome {
        PublishOutcome::Skipped
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<Snapshot>>,
}

/// Suscripción recién creada a los snapshots de una guild
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<Snapshot>>,
}

/// Difusión de snapshots por guild con coalescencia.
///
/// Sólo se publica cuando cambia algo estructural o el tiempo transcurrido
/// se desvía más de `drift` del último publicado. Un observador con el
/// buffer lleno o cerrado se elimina sin reintentos.
pub struct BroadcastHub {
    subscribers: DashMap<GuildId, Vec<Subscriber>>,
    last_published: DashMap<GuildId, Snapshot>,
    drift: Duration,
    buffer: usize,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(drift: Duration, buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            last_published: DashMap::new(),
            drift,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registra un observador y le entrega `initial` de inmediato
    pub fn subscribe(&self, guild_id: GuildId, initial: Snapshot) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);

        let initial = Arc::new(initial);
        // El buffer recién creado tiene hueco para el primer snapshot
        let _ = tx.try_send(initial.clone());
        self.last_published
            .insert(guild_id, Snapshot::clone(&initial));
        self.subscribers
            .entry(guild_id)
            .or_default()
            .push(Subscriber { id, tx });

        debug!("👀 Observador {} suscrito a guild {}", id, guild_id);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, guild_id: GuildId, id: u64) {
        if let Some(mut subscribers) = self.subscribers.get_mut(&guild_id) {
            subscribers.retain(|subscriber| subscriber.id != id);
        }
        self.subscribers
            .remove_if(&guild_id, |_, subscribers| subscribers.is_empty());
        debug!("👋 Observador {} desuscrito de guild {}", id, guild_id);
    }

    /// Guilds con al menos un observador
    pub fn subscribed_guilds(&self) -> Vec<GuildId> {
        self.subscribers
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn subscriber_count(&self, guild_id: GuildId) -> usize {
        self.subscribers
            .get(&guild_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    fn deliver(&self, guild_id: GuildId, snapshot: Arc<Snapshot>) -> usize {
        let remaining = {
            let Some(mut subscribers) = self.subscribers.get_mut(&guild_id) else {
                return 0;
            };

            subscribers.retain(|subscriber| match subscriber.tx.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(
                        "🔌 Observador {} de guild {} descartado: {}",
                        subscriber.id, guild_id, e
                    );
                    false
                }
            });
            subscribers.len()
        };

        if remaining == 0 {
            self.subscribers
                .remove_if(&guild_id, |_, subscribers| subscribers.is_empty());
        }
        remaining
    }
}

impl Publisher for BroadcastHub {
    fn publish(&self, guild_id: GuildId, snapshot: Snapshot) -> PublishOutcome {
        if self.subscriber_count(guild_id) == 0 {
            return PublishOutcome::Skipped;
        }

        match self.last_published.entry(guild_id) {
            Entry::Occupied(mut previous) => {
                if !snapshot.differs_from(previous.get(), self.drift) {
                    return PublishOutcome::Skipped;
                }
                previous.insert(snapshot.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot.clone());
            }
        }

        match self.deliver(guild_id, Arc::new(snapshot)) {
            0 => PublishOutcome::Skipped,
            delivered => PublishOutcome::Delivered(delivered),
        }
    }
}
