use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

use super::{
    filters::{EqBand, FilterConfig},
    pipeline::{DecodePipeline, PipelineEnd, PipelineError, PipelineRequest, StartedPipeline},
    registry::SessionRegistry,
    session::{ActivePipeline, PlaybackSession, PlaybackState, SessionState},
    track::{Track, AUTOPLAY_REQUESTER},
    voice::{ConnectionError, VoiceTransport},
};
use crate::{
    dashboard::snapshot::Snapshot,
    sources::{ResolveError, TrackResolver},
    storage::SessionStore,
};

/// Errores visibles para quien emite una orden de control
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),
    #[error("no hay nada reproduciéndose")]
    NothingPlaying,
    #[error("la reproducción no está pausada")]
    NotPaused,
    #[error("la reproducción ya está pausada")]
    AlreadyPaused,
    #[error("posición {0} fuera de rango")]
    IndexOutOfRange(usize),
    #[error("volumen no válido")]
    InvalidVolume,
    #[error("la carga fue cancelada")]
    Cancelled,
    #[error("petición no válida: {0}")]
    InvalidRequest(String),
}

/// Quién provocó un avance de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Orden explícita: los fallos vuelven a quien la emitió
    User,
    /// Fin natural, skip o autoplay: los fallos se registran y se sigue
    Autoplay,
}

#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub query: String,
    pub requester: String,
    pub channel: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Started(Track),
    /// `position` empieza en 1
    Queued { track: Track, position: usize },
}

/// Máquina de estados de las sesiones y único escritor de su estado.
///
/// Cada operación toma el lock de la sesión, de modo que órdenes de usuario,
/// del dashboard y señales de fin de pipeline se aplican de una en una. La
/// resolución de tracks ocurre fuera del lock.
pub struct TransitionController {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn TrackResolver>,
    pipeline: Arc<dyn DecodePipeline>,
    voice: Arc<dyn VoiceTransport>,
    store: Arc<dyn SessionStore>,
    start_attempts: u32,
}

impl TransitionController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn TrackResolver>,
        pipeline: Arc<dyn DecodePipeline>,
        voice: Arc<dyn VoiceTransport>,
        store: Arc<dyn SessionStore>,
        start_attempts: u32,
    ) -> Self {
        Self {
            registry,
            resolver,
            pipeline,
            voice,
            store,
            start_attempts: start_attempts.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn session(&self, guild_id: GuildId) -> Arc<PlaybackSession> {
        self.registry.get_or_create(guild_id)
    }

    /// Toma el lock de la sesión y, la primera vez, carga lo persistido
    async fn lock<'a>(&self, session: &'a PlaybackSession) -> MutexGuard<'a, SessionState> {
        let mut state = session.lock().await;
        self.hydrate(session.guild_id(), &mut state).await;
        state
    }

    async fn hydrate(&self, guild_id: GuildId, state: &mut SessionState) {
        if !state.hydrated {
            state.hydrated = true;

            match self.store.load_settings(guild_id).await {
                Ok(Some(settings)) => state.apply_settings(settings),
                Ok(None) => {}
                Err(e) => warn!("⚠️ No se pudo cargar la configuración de {}: {}", guild_id, e),
            }
            match self.store.load_stats(guild_id).await {
                Ok(Some(record)) => state.apply_stats(record),
                Ok(None) => {}
                Err(e) => warn!("⚠️ No se pudieron cargar las estadísticas de {}: {}", guild_id, e),
            }
        }
    }

    async fn save_settings(&self, guild_id: GuildId, state: &SessionState) {
        if let Err(e) = self.store.save_settings(guild_id, &state.settings()).await {
            error!("💾 Error guardando configuración de {}: {}", guild_id, e);
        }
    }

    async fn save_stats(&self, guild_id: GuildId, state: &SessionState) {
        if let Err(e) = self.store.save_stats(guild_id, &state.stats_record()).await {
            error!("💾 Error guardando estadísticas de {}: {}", guild_id, e);
        }
    }

    async fn is_connected(state: &SessionState) -> bool {
        match &state.connection {
            Some(connection) => connection.is_connected().await,
            None => false,
        }
    }

    /// Garantiza una conexión de voz, moviéndose si se pide otro canal
    async fn ensure_connection(
        &self,
        guild_id: GuildId,
        state: &mut SessionState,
        channel: Option<ChannelId>,
    ) -> Result<(), ConnectionError> {
        if Self::is_connected(state).await {
            if let (Some(target), Some(connection)) = (channel, &state.connection) {
                if connection.current_channel().await != Some(target) {
                    self.voice.move_to(connection.as_ref(), target).await?;
                }
            }
            return Ok(());
        }

        let target = match channel {
            Some(channel) => channel,
            None => self
                .voice
                .pick_channel(guild_id)
                .await
                .ok_or(ConnectionError::NoChannel)?,
        };

        state.connection = Some(self.voice.connect(guild_id, target).await?);
        Ok(())
    }

    pub async fn join(&self, guild_id: GuildId, channel: Option<ChannelId>) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;
        self.ensure_connection(guild_id, &mut state, channel).await?;
        session.publish(&state).await;
        Ok(())
    }

    /// Resuelve `query` y lo reproduce, o lo encola si ya suena algo
    pub async fn play(
        self: &Arc<Self>,
        guild_id: GuildId,
        request: PlayRequest,
    ) -> Result<PlayOutcome, ControlError> {
        let session = self.session(guild_id);

        let token = {
            let mut state = self.lock(&session).await;
            self.ensure_connection(guild_id, &mut state, request.channel).await?;

            if state.queue.len() >= state.queue.capacity() {
                return Err(ControlError::QueueFull(state.queue.capacity()));
            }

            if state.state == PlaybackState::Idle {
                state.state = PlaybackState::Loading;
                session.publish(&state).await;
            }
            state.load_token.clone()
        };

        debug!("🔍 Resolviendo '{}' para guild {}", request.query, guild_id);
        let resolved = tokio::select! {
            _ = token.cancelled() => Err(ControlError::Cancelled),
            result = self.resolver.resolve(&request.query) => result.map_err(ControlError::from),
        };

        let mut state = self.lock(&session).await;
        if token.is_cancelled() {
            info!("🚫 Carga de '{}' cancelada en guild {}", request.query, guild_id);
            return Err(ControlError::Cancelled);
        }

        let track = match resolved {
            Ok(track) => track.with_requester(request.requester),
            Err(e) => {
                warn!("❌ No se pudo resolver '{}': {}", request.query, e);
                self.settle_failed_load(&session, &mut state).await;
                return Err(e);
            }
        };

        if !state.queue.enqueue(track.clone()) {
            self.settle_failed_load(&session, &mut state).await;
            return Err(ControlError::QueueFull(state.queue.capacity()));
        }

        let idle = state.current.is_none()
            && matches!(state.state, PlaybackState::Idle | PlaybackState::Loading);

        let outcome = if idle {
            let started = self.advance(guild_id, &mut state, Origin::User).await;
            match started {
                Ok(Some(started)) if started.id == track.id => Ok(PlayOutcome::Started(started)),
                Ok(_) => Ok(queued(&state, track)),
                Err(e) => Err(e),
            }
        } else {
            Ok(queued(&state, track))
        };

        session.publish(&state).await;
        outcome
    }

    /// Una carga fallida sin track en curso no deja la sesión en `Loading`:
    /// sigue con lo que quede en la cola o vuelve a `Idle`
    async fn settle_failed_load(self: &Arc<Self>, session: &PlaybackSession, state: &mut SessionState) {
        if state.state != PlaybackState::Loading || state.current.is_some() {
            return;
        }

        if state.queue.is_empty() {
            state.state = PlaybackState::Idle;
        } else if let Err(e) = self.advance(session.guild_id(), state, Origin::Autoplay).await {
            warn!("⚠️ No se pudo avanzar la cola en guild {}: {}", session.guild_id(), e);
        }
        session.publish(state).await;
    }

    /// Saca tracks de la cola hasta que uno arranque o la cola se agote.
    ///
    /// Devuelve el track que quedó sonando. Con `Origin::User` el primer
    /// fallo se devuelve al llamador después de haber seguido con la cola.
    async fn advance(
        self: &Arc<Self>,
        guild_id: GuildId,
        state: &mut SessionState,
        origin: Origin,
    ) -> Result<Option<Track>, ControlError> {
        if !Self::is_connected(state).await {
            state.teardown_pipeline();
            state.current = None;
            state.state = PlaybackState::Idle;
            return Err(ConnectionError::NotConnected.into());
        }

        let mut first_error: Option<ControlError> = None;
        let mut started = None;

        while let Some(track) = state.queue.dequeue() {
            state.state = PlaybackState::Loading;
            state.current = Some(track.clone());

            match self.start_pipeline(guild_id, state, &track, Duration::ZERO).await {
                Ok(()) => {
                    state.state = PlaybackState::Playing;
                    state.clock.start();
                    state.stats.record(&track.title);
                    info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title);
                    self.save_stats(guild_id, state).await;
                    started = Some(track);
                    break;
                }
                Err(e) => {
                    error!("❌ No se pudo iniciar '{}', saltando: {}", track.title, e);
                    state.current = None;
                    if origin == Origin::User && first_error.is_none() {
                        first_error = Some(e.into());
                    }
                }
            }
        }

        if started.is_none() {
            state.current = None;
            state.state = PlaybackState::Idle;
            state.clock.start();
            debug!("📭 Cola vacía en guild {}", guild_id);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(started),
        }
    }

    /// Arranca un pipeline nuevo, descartando el anterior. Reintenta una vez
    /// el mismo track antes de rendirse.
    async fn start_pipeline(
        self: &Arc<Self>,
        guild_id: GuildId,
        state: &mut SessionState,
        track: &Track,
        offset: Duration,
    ) -> Result<(), PipelineError> {
        state.teardown_pipeline();
        let generation = state.generation;

        let request = PipelineRequest {
            stream_url: track.stream_url.clone(),
            filters: state.filters,
            volume: state.volume,
            offset,
        };

        let mut last_error = PipelineError::Spawn("sin intentos".to_string());
        for attempt in 1..=self.start_attempts {
            match self.pipeline.start(guild_id, request.clone()).await {
                Ok(started) => {
                    self.install(guild_id, state, generation, started);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "🔄 Intento {}/{} de iniciar '{}' falló: {}",
                        attempt, self.start_attempts, track.title, e
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Registra el pipeline y entrega su señal de fin al camino serializado
    fn install(
        self: &Arc<Self>,
        guild_id: GuildId,
        state: &mut SessionState,
        generation: u64,
        started: StartedPipeline,
    ) {
        let controller = Arc::clone(self);
        let completion = started.completion;

        let watcher = tokio::spawn(async move {
            let end = completion
                .await
                .unwrap_or_else(|_| PipelineEnd::Error("señal de finalización perdida".to_string()));
            controller.on_pipeline_end(guild_id, generation, end).await;
        });

        state.pipeline = Some(ActivePipeline {
            handle: started.handle,
            generation,
            watcher,
        });
    }

    /// Fin de un pipeline, ya dentro del lock de la sesión
    pub(crate) async fn on_pipeline_end(
        self: &Arc<Self>,
        guild_id: GuildId,
        generation: u64,
        end: PipelineEnd,
    ) {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        let active = state.pipeline.as_ref().map(|p| p.generation);
        if active != Some(generation) {
            debug!(
                "⏭️ Fin de pipeline {} ignorado en guild {} (vigente: {:?})",
                generation, guild_id, active
            );
            return;
        }

        // Quien ejecuta esto es el propio watcher: se suelta sin abortarlo
        if let Some(finished) = state.pipeline.take() {
            finished.handle.stop();
        }

        match &end {
            PipelineEnd::NormalEnd => debug!("🏁 Track terminado en guild {}", guild_id),
            PipelineEnd::Error(e) => warn!("⚠️ El pipeline falló a mitad de track en guild {}: {}", guild_id, e),
        }

        let finished = state.current.take();

        if state.looping && end == PipelineEnd::NormalEnd {
            if let Some(track) = finished.clone() {
                state.current = Some(track.clone());
                match self.start_pipeline(guild_id, &mut state, &track, Duration::ZERO).await {
                    Ok(()) => {
                        state.state = PlaybackState::Playing;
                        state.clock.start();
                        state.stats.record(&track.title);
                        info!("🔁 Repitiendo en guild {}: {}", guild_id, track.title);
                        self.save_stats(guild_id, &state).await;
                        session.publish(&state).await;
                        return;
                    }
                    Err(e) => {
                        warn!("🔁 No se pudo repetir '{}': {}", track.title, e);
                        state.current = None;
                    }
                }
            }
        }

        if let Err(e) = self.advance(guild_id, &mut state, Origin::Autoplay).await {
            warn!("⚠️ No se pudo avanzar la cola en guild {}: {}", guild_id, e);
        }

        let wants_autoplay = state.state == PlaybackState::Idle && state.autoplay;
        session.publish(&state).await;
        drop(state);

        if let (true, Some(seed)) = (wants_autoplay, finished) {
            self.spawn_autoplay(guild_id, seed);
        }
    }

    fn spawn_autoplay(self: &Arc<Self>, guild_id: GuildId, seed: Track) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.autoplay_from(guild_id, seed).await;
        });
    }

    /// Busca un track relacionado fuera del lock y lo reproduce si la
    /// sesión sigue ociosa
    async fn autoplay_from(self: &Arc<Self>, guild_id: GuildId, seed: Track) {
        let session = self.session(guild_id);
        let token = self.lock(&session).await.load_token.clone();

        info!("🎲 Autoplay buscando algo parecido a '{}'", seed.title);
        let related = tokio::select! {
            _ = token.cancelled() => return,
            result = self.resolver.related(&seed) => result,
        };

        let track = match related {
            Ok(track) => track.with_requester(AUTOPLAY_REQUESTER),
            Err(e) => {
                warn!("🎲 Autoplay sin resultado para '{}': {}", seed.title, e);
                return;
            }
        };

        let mut state = self.lock(&session).await;
        let still_idle = !token.is_cancelled()
            && state.autoplay
            && state.current.is_none()
            && state.state == PlaybackState::Idle;
        if !still_idle {
            debug!("🎲 Autoplay descartado en guild {}", guild_id);
            return;
        }

        if state.queue.enqueue(track) {
            if let Err(e) = self.advance(guild_id, &mut state, Origin::Autoplay).await {
                warn!("🎲 Autoplay no pudo iniciar en guild {}: {}", guild_id, e);
            }
            session.publish(&state).await;
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        match state.state {
            PlaybackState::Playing => {
                if let Some(active) = &state.pipeline {
                    active.handle.pause();
                }
                state.clock.pause();
                state.state = PlaybackState::Paused;
                info!("⏸️ Pausado en guild {}", guild_id);
                session.publish(&state).await;
                Ok(())
            }
            PlaybackState::Paused => Err(ControlError::AlreadyPaused),
            _ => Err(ControlError::NothingPlaying),
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        if state.state != PlaybackState::Paused {
            return Err(ControlError::NotPaused);
        }

        if let Some(active) = &state.pipeline {
            active.handle.play();
        }
        state.clock.resume();
        state.state = PlaybackState::Playing;
        info!("▶️ Reanudado en guild {}", guild_id);
        session.publish(&state).await;
        Ok(())
    }

    /// Salta el track actual. Durante `Loading` cancela la resolución en
    /// curso. Devuelve el track saltado, si lo había.
    pub async fn skip(self: &Arc<Self>, guild_id: GuildId) -> Result<Option<Track>, ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        let skipped = match state.state {
            PlaybackState::Idle => {
                // Un autoplay en vuelo tampoco debe arrancar
                state.cancel_loads();
                return Err(ControlError::NothingPlaying);
            }
            PlaybackState::Loading => {
                info!("⏭️ Cancelando carga en guild {}", guild_id);
                state.cancel_loads();
                None
            }
            _ => {
                state.teardown_pipeline();
                state.current.take()
            }
        };

        let result = if state.queue.is_empty() {
            state.current = None;
            state.state = PlaybackState::Idle;
            Ok(())
        } else {
            self.advance(guild_id, &mut state, Origin::Autoplay).await.map(|_| ())
        };

        if let Some(track) = &skipped {
            info!("⏭️ Saltado en guild {}: {}", guild_id, track.title);
        }

        let wants_autoplay = state.state == PlaybackState::Idle && state.autoplay;
        session.publish(&state).await;
        drop(state);

        if let (true, Some(seed)) = (wants_autoplay, skipped.clone()) {
            self.spawn_autoplay(guild_id, seed);
        }

        result.map(|_| skipped)
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        state.reset();
        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        session.publish(&state).await;
        Ok(())
    }

    /// Detiene todo y sale del canal de voz
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        state.reset();
        let connection = state.connection.take();
        session.publish(&state).await;

        match connection {
            Some(connection) => {
                self.voice.disconnect(connection.as_ref()).await?;
                Ok(())
            }
            None => Err(ConnectionError::NotConnected.into()),
        }
    }

    /// Desconexión de voz señalada desde fuera (kick, caída del gateway)
    pub async fn handle_voice_disconnect(&self, guild_id: GuildId) {
        let Some(session) = self.registry.get(guild_id) else {
            return;
        };
        let mut state = self.lock(&session).await;

        state.reset();
        state.connection = None;
        warn!("🔌 Desconectado de voz en guild {}, sesión reiniciada", guild_id);
        session.publish(&state).await;
    }

    /// Fija el volumen (rango [0, 2]) y lo aplica al pipeline en marcha
    pub async fn set_volume(&self, guild_id: GuildId, volume: f32) -> Result<f32, ControlError> {
        if !volume.is_finite() {
            return Err(ControlError::InvalidVolume);
        }
        let volume = volume.clamp(0.0, 2.0);

        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        state.volume = volume;
        if let Some(active) = &state.pipeline {
            active.handle.set_volume(volume);
        }
        info!("🔊 Volumen {:.0}% en guild {}", volume * 100.0, guild_id);

        self.save_settings(guild_id, &state).await;
        session.publish(&state).await;
        Ok(volume)
    }

    pub async fn set_bass_boost(
        self: &Arc<Self>,
        guild_id: GuildId,
        enabled: bool,
    ) -> Result<FilterConfig, ControlError> {
        self.update_filters(guild_id, |filters| filters.bass_boost = enabled)
            .await
    }

    pub async fn set_eq(
        self: &Arc<Self>,
        guild_id: GuildId,
        band: EqBand,
        gain: i32,
    ) -> Result<FilterConfig, ControlError> {
        self.update_filters(guild_id, |filters| filters.eq_gains.set(band, gain))
            .await
    }

    /// Cambio combinado de filtros con un único reinicio del pipeline
    pub async fn set_filters(
        self: &Arc<Self>,
        guild_id: GuildId,
        bass_boost: Option<bool>,
        band_gain: Option<(EqBand, i32)>,
    ) -> Result<FilterConfig, ControlError> {
        self.update_filters(guild_id, |filters| {
            if let Some(enabled) = bass_boost {
                filters.bass_boost = enabled;
            }
            if let Some((band, gain)) = band_gain {
                filters.eq_gains.set(band, gain);
            }
        })
        .await
    }

    async fn update_filters<F>(
        self: &Arc<Self>,
        guild_id: GuildId,
        change: F,
    ) -> Result<FilterConfig, ControlError>
    where
        F: FnOnce(&mut FilterConfig) + Send,
    {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        let before = state.filters;
        change(&mut state.filters);
        if state.filters == before {
            return Ok(before);
        }

        info!("🎚️ Filtros actualizados en guild {}: {:?}", guild_id, state.filters);
        self.save_settings(guild_id, &state).await;

        if matches!(state.state, PlaybackState::Playing | PlaybackState::Paused) {
            self.hot_restart(&session, &mut state).await;
        }

        session.publish(&state).await;
        Ok(state.filters)
    }

    /// Cambia el pipeline en caliente conservando posición y pausa
    async fn hot_restart(self: &Arc<Self>, session: &PlaybackSession, state: &mut SessionState) {
        let guild_id = session.guild_id();
        let Some(track) = state.current.clone() else {
            return;
        };

        let was_paused = state.state == PlaybackState::Paused;
        let offset = state.clock.snapshot();
        state.state = PlaybackState::Restarting;
        session.publish(state).await;

        match self.start_pipeline(guild_id, state, &track, offset).await {
            Ok(()) => {
                if was_paused {
                    if let Some(active) = &state.pipeline {
                        active.handle.pause();
                    }
                }
                state.clock.restart_at(offset, was_paused);
                state.state = if was_paused {
                    PlaybackState::Paused
                } else {
                    PlaybackState::Playing
                };
                debug!("♻️ Pipeline reiniciado en {:.1}s", offset.as_secs_f64());
            }
            Err(e) => {
                error!("❌ Reinicio en caliente de '{}' falló: {}", track.title, e);
                state.current = None;
                if let Err(e) = self.advance(guild_id, state, Origin::Autoplay).await {
                    warn!("⚠️ No se pudo avanzar la cola en guild {}: {}", guild_id, e);
                }
            }
        }
    }

    pub async fn set_autoplay(&self, guild_id: GuildId, enabled: bool) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        state.autoplay = enabled;
        info!("🎲 Autoplay {} en guild {}", if enabled { "activado" } else { "desactivado" }, guild_id);
        self.save_settings(guild_id, &state).await;
        session.publish(&state).await;
        Ok(())
    }

    pub async fn set_loop(&self, guild_id: GuildId, enabled: bool) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        state.looping = enabled;
        info!("🔁 Repetición {} en guild {}", if enabled { "activada" } else { "desactivada" }, guild_id);
        session.publish(&state).await;
        Ok(())
    }

    pub async fn move_queue_item(
        &self,
        guild_id: GuildId,
        from: usize,
        to: usize,
    ) -> Result<(), ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        if !state.queue.move_item(from, to) {
            return Err(ControlError::IndexOutOfRange(from.max(to)));
        }
        session.publish(&state).await;
        Ok(())
    }

    pub async fn delete_queue_item(&self, guild_id: GuildId, index: usize) -> Result<Track, ControlError> {
        let session = self.session(guild_id);
        let mut state = self.lock(&session).await;

        let removed = state
            .queue
            .remove_at(index)
            .ok_or(ControlError::IndexOutOfRange(index))?;
        session.publish(&state).await;
        Ok(removed)
    }

    /// Snapshot actual de la guild (crea la sesión si no existía)
    pub async fn snapshot(&self, guild_id: GuildId) -> Snapshot {
        let session = self.session(guild_id);
        let state = self.lock(&session).await;
        session.snapshot(&state).await
    }

    /// Snapshot sin registrar la guild: las desconocidas se ven ociosas,
    /// con su configuración persistida
    pub async fn peek_snapshot(&self, guild_id: GuildId) -> Snapshot {
        match self.registry.get(guild_id) {
            Some(session) => {
                let state = self.lock(&session).await;
                session.snapshot(&state).await
            }
            None => {
                let mut state = SessionState::new(self.registry.limits());
                self.hydrate(guild_id, &mut state).await;
                Snapshot::capture(guild_id, &state).await
            }
        }
    }

    /// Publica el estado de una guild ya registrada sin esperar su lock.
    /// Una sesión ocupada se omite; su propia operación publicará al terminar.
    pub async fn try_publish(&self, guild_id: GuildId) -> bool {
        let Some(session) = self.registry.get(guild_id) else {
            return false;
        };
        let Some(mut state) = session.try_lock() else {
            debug!("⏳ Sesión de guild {} ocupada, se sincroniza en la próxima vuelta", guild_id);
            return false;
        };

        self.hydrate(guild_id, &mut state).await;
        session.publish(&state).await;
        true
    }

    /// Detiene todas las sesiones y sale de sus canales de voz
    pub async fn shutdown(&self) {
        let guilds = self.registry.guild_ids();
        for guild_id in &guilds {
            let Some(session) = self.registry.get(*guild_id) else {
                continue;
            };
            let mut state = session.lock().await;

            state.reset();
            if let Some(connection) = state.connection.take() {
                if let Err(e) = self.voice.disconnect(connection.as_ref()).await {
                    warn!("⚠️ No se pudo salir de voz en guild {}: {}", guild_id, e);
                }
            }
        }
        info!("🛑 {} sesiones cerradas", guilds.len());
    }
}

fn queued(state: &SessionState, track: Track) -> PlayOutcome {
    let position = state
        .queue
        .iter()
        .position(|queued| queued.id == track.id)
        .map(|index| index + 1)
        .unwrap_or(state.queue.len());
    PlayOutcome::Queued { track, position }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            pipeline::PipelineHandle,
            session::SessionLimits,
            voice::VoiceConnection,
        },
        dashboard::publisher::{PublishOutcome, Publisher},
        storage::{GuildSettings, GuildStats, PersistenceError},
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    };
    use tokio::{sync::oneshot, time::advance as advance_time};

    fn guild() -> GuildId {
        GuildId::new(42)
    }

    /// "missing*" no existe; "slow*" tarda un minuto; lo demás resuelve al instante
    #[derive(Default)]
    struct FakeResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrackResolver for FakeResolver {
        async fn resolve(&self, query: &str) -> Result<Track, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.starts_with("missing") {
                return Err(ResolveError::NotFound(query.to_string()));
            }
            if query.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(Track::new(query, format!("https://cdn.example/{query}")))
        }

        async fn related(&self, seed: &Track) -> Result<Track, ResolveError> {
            self.resolve(&format!("{} mix", seed.title)).await
        }
    }

    struct FakeHandle {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl PipelineHandle for FakeHandle {
        fn stop(&self) {
            self.log.lock().push("stop".to_string());
        }
        fn pause(&self) {
            self.log.lock().push("pause".to_string());
        }
        fn play(&self) {
            self.log.lock().push("play".to_string());
        }
        fn set_volume(&self, volume: f32) {
            self.log.lock().push(format!("volume:{volume}"));
        }
    }

    #[derive(Default)]
    struct FakePipeline {
        failures: AtomicU32,
        fail_urls: Mutex<Vec<String>>,
        requests: Mutex<Vec<PipelineRequest>>,
        completions: Mutex<Vec<oneshot::Sender<PipelineEnd>>>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl FakePipeline {
        /// Emite la señal de fin del último pipeline arrancado
        fn finish_latest(&self, end: PipelineEnd) {
            if let Some(tx) = self.completions.lock().pop() {
                let _ = tx.send(end);
            }
        }

        fn started(&self) -> Vec<PipelineRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl DecodePipeline for FakePipeline {
        async fn start(
            &self,
            _guild_id: GuildId,
            request: PipelineRequest,
        ) -> Result<StartedPipeline, PipelineError> {
            if self.fail_urls.lock().contains(&request.stream_url) {
                return Err(PipelineError::Spawn("stream roto".to_string()));
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PipelineError::Spawn("ffmpeg no arrancó".to_string()));
            }

            let (tx, rx) = oneshot::channel();
            self.requests.lock().push(request);
            self.completions.lock().push(tx);
            Ok(StartedPipeline {
                handle: Box::new(FakeHandle {
                    log: self.log.clone(),
                }),
                completion: rx,
            })
        }
    }

    struct FakeConnection {
        guild_id: GuildId,
        channel: Mutex<ChannelId>,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl VoiceConnection for FakeConnection {
        fn guild_id(&self) -> GuildId {
            self.guild_id
        }
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn current_channel(&self) -> Option<ChannelId> {
            Some(*self.channel.lock())
        }
    }

    #[derive(Default)]
    struct FakeVoice {
        refuse: AtomicBool,
        connected: Arc<AtomicBool>,
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl VoiceTransport for FakeVoice {
        async fn connect(
            &self,
            guild_id: GuildId,
            channel_id: ChannelId,
        ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ConnectionError::Join("sin permisos".to_string()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(Arc::new(FakeConnection {
                guild_id,
                channel: Mutex::new(channel_id),
                connected: self.connected.clone(),
            }))
        }

        async fn move_to(
            &self,
            _connection: &dyn VoiceConnection,
            _channel_id: ChannelId,
        ) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn disconnect(&self, _connection: &dyn VoiceConnection) -> Result<(), ConnectionError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn pick_channel(&self, _guild_id: GuildId) -> Option<ChannelId> {
            Some(ChannelId::new(7))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        settings: Mutex<HashMap<GuildId, GuildSettings>>,
        stats: Mutex<HashMap<GuildId, GuildStats>>,
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn load_settings(&self, guild_id: GuildId) -> Result<Option<GuildSettings>, PersistenceError> {
            Ok(self.settings.lock().get(&guild_id).cloned())
        }
        async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), PersistenceError> {
            self.settings.lock().insert(guild_id, settings.clone());
            Ok(())
        }
        async fn load_stats(&self, guild_id: GuildId) -> Result<Option<GuildStats>, PersistenceError> {
            Ok(self.stats.lock().get(&guild_id).cloned())
        }
        async fn save_stats(&self, guild_id: GuildId, stats: &GuildStats) -> Result<(), PersistenceError> {
            self.stats.lock().insert(guild_id, stats.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        snapshots: Mutex<Vec<Snapshot>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, _guild_id: GuildId, snapshot: Snapshot) -> PublishOutcome {
            self.snapshots.lock().push(snapshot);
            PublishOutcome::Delivered(1)
        }
    }

    struct Harness {
        controller: Arc<TransitionController>,
        resolver: Arc<FakeResolver>,
        pipeline: Arc<FakePipeline>,
        voice: Arc<FakeVoice>,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
    }

    impl Harness {
        fn new() -> Self {
            let resolver = Arc::new(FakeResolver::default());
            let pipeline = Arc::new(FakePipeline::default());
            let voice = Arc::new(FakeVoice::default());
            let store = Arc::new(MemoryStore::default());
            let publisher = Arc::new(RecordingPublisher::default());
            let registry = Arc::new(SessionRegistry::new(
                SessionLimits {
                    queue_capacity: 3,
                    ..Default::default()
                },
                publisher.clone(),
            ));
            let controller = Arc::new(TransitionController::new(
                registry,
                resolver.clone(),
                pipeline.clone(),
                voice.clone(),
                store.clone(),
                2,
            ));

            Self {
                controller,
                resolver,
                pipeline,
                voice,
                store,
                publisher,
            }
        }

        async fn play(&self, query: &str) -> Result<PlayOutcome, ControlError> {
            self.controller
                .play(
                    guild(),
                    PlayRequest {
                        query: query.to_string(),
                        requester: "tester".to_string(),
                        channel: None,
                    },
                )
                .await
        }

        async fn state(&self) -> PlaybackState {
            self.controller.snapshot(guild()).await.state
        }

        async fn current_title(&self) -> Option<String> {
            self.controller
                .snapshot(guild())
                .await
                .current_song
                .map(|song| song.title)
        }

        async fn elapsed(&self) -> u64 {
            self.controller.snapshot(guild()).await.elapsed
        }

        async fn generation(&self) -> u64 {
            let session = self.controller.registry().get_or_create(guild());
            let state = session.lock().await;
            state.generation
        }
    }

    /// Deja correr las tareas pendientes (watchers, autoplay)
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_pause_resume_keeps_elapsed() {
        let h = Harness::new();

        let outcome = h.play("A").await.expect("play");
        assert!(matches!(outcome, PlayOutcome::Started(ref t) if t.title == "A"));
        assert_eq!(h.state().await, PlaybackState::Playing);
        assert_eq!(h.elapsed().await, 0);

        let states: Vec<_> = h.publisher.snapshots.lock().iter().map(|s| s.state).collect();
        assert_eq!(states.first(), Some(&PlaybackState::Loading));

        advance_time(Duration::from_secs(5)).await;
        h.controller.pause(guild()).await.expect("pause");
        assert_eq!(h.state().await, PlaybackState::Paused);
        assert_eq!(h.elapsed().await, 5);

        advance_time(Duration::from_secs(10)).await;
        assert_eq!(h.elapsed().await, 5);

        h.controller.resume(guild()).await.expect("resume");
        assert_eq!(h.state().await, PlaybackState::Playing);
        advance_time(Duration::from_secs(2)).await;
        assert_eq!(h.elapsed().await, 7);

        assert_eq!(*h.pipeline.log.lock(), vec!["pause", "play"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_errors() {
        let h = Harness::new();
        assert_eq!(h.controller.pause(guild()).await, Err(ControlError::NothingPlaying));
        assert_eq!(h.controller.resume(guild()).await, Err(ControlError::NotPaused));

        h.play("A").await.expect("play");
        h.controller.pause(guild()).await.expect("pause");
        assert_eq!(h.controller.pause(guild()).await, Err(ControlError::AlreadyPaused));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bass_boost_restart_keeps_position() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        advance_time(Duration::from_secs(30)).await;

        let filters = h.controller.set_bass_boost(guild(), true).await.expect("filters");
        assert!(filters.bass_boost);

        assert_eq!(h.state().await, PlaybackState::Playing);
        assert_eq!(h.elapsed().await, 30);
        assert_eq!(h.current_title().await.as_deref(), Some("A"));

        let started = h.pipeline.started();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].offset, Duration::from_secs(30));
        assert!(started[1].filters.bass_boost);

        let states: Vec<_> = h.publisher.snapshots.lock().iter().map(|s| s.state).collect();
        assert!(states.contains(&PlaybackState::Restarting));
        assert_eq!(states.last(), Some(&PlaybackState::Playing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_while_paused_stays_paused() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        advance_time(Duration::from_secs(12)).await;
        h.controller.pause(guild()).await.expect("pause");

        h.controller.set_eq(guild(), EqBand::Mid, 5).await.expect("eq");
        advance_time(Duration::from_secs(20)).await;

        assert_eq!(h.state().await, PlaybackState::Paused);
        assert_eq!(h.elapsed().await, 12);
        assert_eq!(h.pipeline.log.lock().last().map(String::as_str), Some("pause"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_natural_end_advances_once() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        let second = h.play("B").await.expect("queue");
        assert!(matches!(second, PlayOutcome::Queued { position: 1, .. }));

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert_eq!(h.pipeline.started().len(), 2);

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;

        assert_eq!(h.state().await, PlaybackState::Idle);
        assert!(h.current_title().await.is_none());

        let snapshot = h.controller.snapshot(guild()).await;
        assert_eq!(snapshot.stats.total_played, 2);
        let history: Vec<_> = snapshot.history.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(history, vec!["B", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_completion_is_ignored() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");
        let stale = h.generation().await;

        h.controller.set_bass_boost(guild(), true).await.expect("filters");
        assert!(h.generation().await > stale);

        h.controller.on_pipeline_end(guild(), stale, PipelineEnd::NormalEnd).await;
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("A"));
        assert_eq!(h.controller.snapshot(guild()).await.queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_while_loading_cancels_resolution() {
        let h = Harness::new();
        let controller = h.controller.clone();
        let pending = tokio::spawn(async move {
            controller
                .play(
                    guild(),
                    PlayRequest {
                        query: "slow song".to_string(),
                        requester: "tester".to_string(),
                        channel: None,
                    },
                )
                .await
        });

        settle().await;
        assert_eq!(h.state().await, PlaybackState::Loading);

        assert_eq!(h.controller.skip(guild()).await, Ok(None));
        let result = pending.await.expect("join");
        assert_eq!(result, Err(ControlError::Cancelled));

        assert_eq!(h.state().await, PlaybackState::Idle);
        assert!(h.pipeline.started().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_loading_cancels_resolution() {
        let h = Harness::new();
        let controller = h.controller.clone();
        let pending = tokio::spawn(async move {
            controller
                .play(
                    guild(),
                    PlayRequest {
                        query: "slow song".to_string(),
                        requester: "tester".to_string(),
                        channel: None,
                    },
                )
                .await
        });

        settle().await;
        assert_eq!(h.state().await, PlaybackState::Loading);

        h.controller.stop(guild()).await.expect("stop");
        assert_eq!(pending.await.expect("join"), Err(ControlError::Cancelled));

        advance_time(Duration::from_secs(120)).await;
        assert_eq!(h.state().await, PlaybackState::Idle);
        assert!(h.pipeline.started().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_track_error_advances_without_looping() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");
        h.controller.set_loop(guild(), true).await.expect("loop");

        h.pipeline.finish_latest(PipelineEnd::Error("decoder".to_string()));
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert_eq!(h.state().await, PlaybackState::Playing);
        assert!(h.controller.snapshot(guild()).await.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_after_stop_or_leave_is_ignored() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        let stopped = h.generation().await;
        h.controller.stop(guild()).await.expect("stop");

        h.play("C").await.expect("play");
        h.play("D").await.expect("queue");
        h.controller.on_pipeline_end(guild(), stopped, PipelineEnd::NormalEnd).await;
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("C"));
        assert_eq!(h.controller.snapshot(guild()).await.queue.len(), 1);

        let left = h.generation().await;
        h.controller.leave(guild()).await.expect("leave");
        h.controller.on_pipeline_end(guild(), left, PipelineEnd::NormalEnd).await;
        settle().await;

        let snapshot = h.controller.snapshot(guild()).await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.current_song.is_none());
        assert_eq!(h.pipeline.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_play_does_not_strand_queued_tracks() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");

        // La conexión cae sin evento de voz: el fin natural deja B en cola
        h.voice.connected.store(false, Ordering::SeqCst);
        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;
        assert_eq!(h.state().await, PlaybackState::Idle);
        assert_eq!(h.controller.snapshot(guild()).await.queue.len(), 1);

        let missing = h.play("missing song").await;
        assert!(matches!(missing, Err(ControlError::Resolve(ResolveError::NotFound(_)))));

        assert_eq!(h.state().await, PlaybackState::Playing);
        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert!(h.controller.snapshot(guild()).await.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_when_idle_cancels_pending_autoplay() {
        let h = Harness::new();
        h.controller.set_autoplay(guild(), true).await.expect("autoplay");
        h.play("slow A").await.expect("play");

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;
        assert_eq!(h.state().await, PlaybackState::Idle);

        assert_eq!(h.controller.skip(guild()).await, Err(ControlError::NothingPlaying));
        advance_time(Duration::from_secs(120)).await;
        settle().await;

        assert_eq!(h.state().await, PlaybackState::Idle);
        assert!(h.current_title().await.is_none());
        assert_eq!(h.pipeline.started().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_every_guild() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");

        h.controller.shutdown().await;

        let snapshot = h.controller.snapshot(guild()).await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.is_empty());
        assert!(!snapshot.connected);
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_everything() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");

        h.controller.stop(guild()).await.expect("stop");
        settle().await;

        let snapshot = h.controller.snapshot(guild()).await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.queue.is_empty());
        assert!(snapshot.current_song.is_none());
        assert!(h.pipeline.log.lock().contains(&"stop".to_string()));
        assert!(snapshot.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_skip_and_pause_are_serialized() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");

        let (skip, pause) = tokio::join!(h.controller.skip(guild()), h.controller.pause(guild()));
        assert_eq!(skip.expect("skip").map(|t| t.title), Some("A".to_string()));
        assert!(pause.is_ok());

        assert_eq!(h.current_title().await.as_deref(), Some("B"));
        assert!(matches!(
            h.state().await,
            PlaybackState::Playing | PlaybackState::Paused
        ));
        assert_eq!(h.pipeline.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_retry_then_skip() {
        let h = Harness::new();

        h.pipeline.failures.store(1, Ordering::SeqCst);
        h.play("A").await.expect("second attempt succeeds");
        assert_eq!(h.current_title().await.as_deref(), Some("A"));

        h.play("B").await.expect("queue");
        h.play("C").await.expect("queue");
        h.pipeline
            .fail_urls
            .lock()
            .push("https://cdn.example/B".to_string());

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("C"));
        assert_eq!(h.state().await, PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_play_failure_is_reported() {
        let h = Harness::new();

        let missing = h.play("missing song").await;
        assert!(matches!(missing, Err(ControlError::Resolve(ResolveError::NotFound(_)))));
        assert_eq!(h.state().await, PlaybackState::Idle);

        h.pipeline
            .fail_urls
            .lock()
            .push("https://cdn.example/broken".to_string());
        let broken = h.play("broken").await;
        assert!(matches!(broken, Err(ControlError::Pipeline(_))));
        assert_eq!(h.state().await, PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_leaves_session_idle() {
        let h = Harness::new();
        h.voice.refuse.store(true, Ordering::SeqCst);

        let result = h.play("A").await;
        assert!(matches!(result, Err(ControlError::Connection(ConnectionError::Join(_)))));
        assert_eq!(h.state().await, PlaybackState::Idle);
        assert_eq!(h.resolver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full_is_rejected() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        for name in ["B", "C", "D"] {
            h.play(name).await.expect("queue");
        }

        assert_eq!(h.play("E").await, Err(ControlError::QueueFull(3)));
        let titles: Vec<_> = h
            .controller
            .snapshot(guild())
            .await
            .queue
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["B", "C", "D"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_is_clamped_and_applied() {
        let h = Harness::new();
        h.play("A").await.expect("play");

        assert_eq!(h.controller.set_volume(guild(), 3.5).await, Ok(2.0));
        assert_eq!(
            h.controller.set_volume(guild(), f32::NAN).await,
            Err(ControlError::InvalidVolume)
        );
        assert_eq!(h.pipeline.log.lock().last().map(String::as_str), Some("volume:2"));
        assert_eq!(h.store.settings.lock().get(&guild()).map(|s| s.volume), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_are_loaded_on_first_use() {
        let h = Harness::new();
        h.store.settings.lock().insert(
            guild(),
            GuildSettings {
                volume: 0.5,
                bass_boost: true,
                auto_play: false,
                eq_gains: Default::default(),
            },
        );

        h.play("A").await.expect("play");
        let request = &h.pipeline.started()[0];
        assert!(request.filters.bass_boost);
        assert_eq!(request.volume, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_replays_current_track() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        h.play("B").await.expect("queue");
        h.controller.set_loop(guild(), true).await.expect("loop");

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;

        assert_eq!(h.current_title().await.as_deref(), Some("A"));
        assert_eq!(h.controller.snapshot(guild()).await.queue.len(), 1);
        assert_eq!(h.pipeline.started().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_fills_empty_queue() {
        let h = Harness::new();
        h.controller.set_autoplay(guild(), true).await.expect("autoplay");
        h.play("A").await.expect("play");

        h.pipeline.finish_latest(PipelineEnd::NormalEnd);
        settle().await;
        settle().await;

        let snapshot = h.controller.snapshot(guild()).await;
        let current = snapshot.current_song.expect("autoplay track");
        assert_eq!(current.title, "A mix");
        assert_eq!(current.requester, AUTOPLAY_REQUESTER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_edits() {
        let h = Harness::new();
        h.play("A").await.expect("play");
        for name in ["B", "C", "D"] {
            h.play(name).await.expect("queue");
        }

        h.controller.move_queue_item(guild(), 2, 0).await.expect("move");
        assert_eq!(
            h.controller.move_queue_item(guild(), 0, 9).await,
            Err(ControlError::IndexOutOfRange(9))
        );
        let removed = h.controller.delete_queue_item(guild(), 1).await.expect("delete");
        assert_eq!(removed.title, "B");

        let titles: Vec<_> = h
            .controller
            .snapshot(guild())
            .await
            .queue
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["D", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_and_voice_disconnect_reset_session() {
        let h = Harness::new();
        h.play("A").await.expect("play");

        h.controller.leave(guild()).await.expect("leave");
        assert_eq!(h.voice.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(h.state().await, PlaybackState::Idle);
        assert!(!h.controller.snapshot(guild()).await.connected);

        h.play("B").await.expect("play again");
        assert_eq!(h.voice.connects.load(Ordering::SeqCst), 2);

        h.controller.handle_voice_disconnect(guild()).await;
        let snapshot = h.controller.snapshot(guild()).await;
        assert_eq!(snapshot.state, PlaybackState::Idle);
        assert!(snapshot.current_song.is_none());
    }
}
