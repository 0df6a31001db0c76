use std::time::Duration;
use tokio::time::Instant;

/// Reloj de reproducción de una sesión.
///
/// El tiempo transcurrido es `base + (fin - inicio) - pausado`, donde `fin`
/// es el instante de la pausa activa o el presente. `base` sólo es distinto
/// de cero tras un reinicio en caliente (`restart_at`).
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    base: Duration,
    start_ref: Instant,
    paused_accum: Duration,
    paused_at: Option<Instant>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            base: Duration::ZERO,
            start_ref: Instant::now(),
            paused_accum: Duration::ZERO,
            paused_at: None,
        }
    }

    pub fn start(&mut self) {
        *self = Self::new();
    }

    /// Congela el reloj. Devuelve `false` si ya estaba pausado.
    pub fn pause(&mut self) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(Instant::now());
        true
    }

    /// Reanuda desde el valor congelado. Devuelve `false` si no estaba pausado.
    pub fn resume(&mut self) -> bool {
        match self.paused_at.take() {
            Some(paused_at) => {
                self.paused_accum += paused_at.elapsed();
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn snapshot(&self) -> Duration {
        let end = self.paused_at.unwrap_or_else(Instant::now);
        self.base + end.saturating_duration_since(self.start_ref).saturating_sub(self.paused_accum)
    }

    /// Reposiciona el reloj en `offset` conservando la disposición previa
    pub fn restart_at(&mut self, offset: Duration, was_paused: bool) {
        let now = Instant::now();
        self.base = offset;
        self.start_ref = now;
        self.paused_accum = Duration::ZERO;
        self.paused_at = was_paused.then_some(now);
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
