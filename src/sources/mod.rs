//! # Sources Module
//!
//! Resolución de consultas o URLs a tracks reproducibles.
//!
//! El motor de sesiones sólo conoce el trait [`TrackResolver`]; la
//! implementación de producción es [`ytdlp::YtDlpResolver`]. Toda la lógica
//! de reintentos vive en [`RetryPolicy`]: número de intentos, timeout por
//! intento, espera con jitter entre intentos y clasificación de fallos.

pub mod ytdlp;

use async_trait::async_trait;
use rand::Rng;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

use crate::audio::track::Track;

pub use ytdlp::YtDlpResolver;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("no se encontraron resultados para '{0}'")]
    NotFound(String),
    #[error("la fuente bloqueó la extracción: {0}")]
    Blocked(String),
    #[error("límite de peticiones alcanzado")]
    RateLimited,
    #[error("la resolución superó el tiempo límite ({0:?})")]
    Timeout(Duration),
    #[error("fallo del extractor: {0}")]
    Process(String),
}

impl ResolveError {
    /// `NotFound` es definitivo; el resto puede resolverse con otro perfil
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResolveError::NotFound(_))
    }
}

/// Resuelve una consulta o URL a un [`Track`]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Track, ResolveError>;

    /// Track relacionado para autoplay
    async fn related(&self, seed: &Track) -> Result<Track, ResolveError> {
        self.resolve(&format!("{} mix", seed.title)).await
    }
}

/// Política única de reintentos del resolver
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            backoff_min: Duration::from_millis(1000),
            backoff_max: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    /// Espera con jitter entre intentos
    pub fn backoff(&self) -> Duration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }
        rand::thread_rng().gen_range(self.backoff_min..=self.backoff_max)
    }

    /// Ejecuta `attempt` hasta que tenga éxito, falle de forma definitiva o
    /// se agoten los intentos. Cada intento recibe su índice (desde 0).
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, ResolveError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResolveError>>,
    {
        let mut last_error = None;

        for index in 0..self.max_attempts {
            if index > 0 {
                let delay = self.backoff();
                debug!("⏳ Reintento {} en {:?}", index + 1, delay);
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(self.attempt_timeout, attempt(index)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ResolveError::Timeout(self.attempt_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("🔄 Intento {}/{} falló: {}", index + 1, self.max_attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ResolveError::Process("sin intentos configurados".into())))
    }
}
