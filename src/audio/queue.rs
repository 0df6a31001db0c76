use std::collections::VecDeque;
use tracing::{debug, info};

use super::track::{HistoryEntry, Track};

/// Capacidad canónica de la cola por guild
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Tamaño por defecto del historial
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Cola FIFO acotada de una guild, con su historial de reproducción.
///
/// Ninguna operación reordena los elementos que no toca: `remove_at` y
/// `move_item` sólo desplazan lo estrictamente necesario.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    history: VecDeque<HistoryEntry>,
    capacity: usize,
    history_capacity: usize,
}

impl TrackQueue {
    pub fn new(capacity: usize, history_capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            history: VecDeque::new(),
            capacity,
            history_capacity,
        }
    }

    /// Agrega un track al final. Devuelve `false` sin tocar la cola si está llena.
    pub fn enqueue(&mut self, track: Track) -> bool {
        if self.items.len() >= self.capacity {
            debug!("🚫 Cola llena ({} canciones), rechazando: {}", self.capacity, track.title);
            return false;
        }

        info!("➕ Agregado a la cola: {}", track.title);
        self.items.push_back(track);
        true
    }

    /// Saca el siguiente track (FIFO) y lo registra en el historial
    pub fn dequeue(&mut self) -> Option<Track> {
        let track = self.items.pop_front()?;
        self.history.push_front(HistoryEntry::from(&track));
        self.history.truncate(self.history_capacity);
        info!("➡️ Siguiente en cola: {}", track.title);
        Some(track)
    }

    /// Copia ordenada de la cola
    pub fn list(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    /// Elimina el track en `index`; fuera de rango no modifica nada
    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        let removed = self.items.remove(index)?;
        debug!("❌ Track eliminado en posición {}", index);
        Some(removed)
    }

    /// Mueve un track de `from` a `to`. Ambos índices deben existir.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }

        if from != to {
            if let Some(item) = self.items.remove(from) {
                self.items.insert(to, item);
                debug!("📍 Track movido de posición {} a {}", from, to);
            }
        }

        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        info!("🗑️ Cola limpiada");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    /// Restaura el historial persistido, respetando el límite
    pub fn restore_history(&mut self, entries: Vec<HistoryEntry>) {
        self.history = entries.into_iter().take(self.history_capacity).collect();
    }
}
