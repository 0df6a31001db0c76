use futures::Stream;
use serenity::model::id::GuildId;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

use super::{
    control::{ControlAck, ControlAction, ControlRequest},
    publisher::BroadcastHub,
    snapshot::Snapshot,
};
use crate::audio::controller::{ControlError, PlayOutcome, PlayRequest, TransitionController};

/// Flujo de snapshots de una guild; se desuscribe al soltarse
pub struct SnapshotStream {
    guild_id: GuildId,
    id: u64,
    rx: mpsc::Receiver<Arc<Snapshot>>,
    hub: Arc<BroadcastHub>,
}

impl Stream for SnapshotStream {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.guild_id, self.id);
    }
}

/// Punto de entrada del dashboard: suscripciones y órdenes remotas
pub struct DashboardService {
    controller: Arc<TransitionController>,
    hub: Arc<BroadcastHub>,
}

impl DashboardService {
    pub fn new(controller: Arc<TransitionController>, hub: Arc<BroadcastHub>) -> Self {
        Self { controller, hub }
    }

    /// Suscribe a una guild sin crear su sesión si todavía no existe
    pub async fn subscribe(&self, guild_id: GuildId) -> SnapshotStream {
        let initial = self.controller.peek_snapshot(guild_id).await;
        let subscription = self.hub.subscribe(guild_id, initial);

        SnapshotStream {
            guild_id,
            id: subscription.id,
            rx: subscription.rx,
            hub: self.hub.clone(),
        }
    }

    pub async fn control(
        &self,
        guild_id: GuildId,
        request: ControlRequest,
    ) -> Result<ControlAck, ControlError> {
        let action = ControlAction::parse(&request.action, request.params)?;
        debug!("🛰️ Orden remota '{}' para guild {}", action.name(), guild_id);

        let controller = &self.controller;
        let detail = match &action {
            ControlAction::Play {
                query,
                requester,
                channel,
            } => {
                let outcome = controller
                    .play(
                        guild_id,
                        PlayRequest {
                            query: query.clone(),
                            requester: requester.clone(),
                            channel: *channel,
                        },
                    )
                    .await?;
                Some(match outcome {
                    PlayOutcome::Started(track) => format!("reproduciendo {}", track.title),
                    PlayOutcome::Queued { track, position } => {
                        format!("{} en la posición {}", track.title, position)
                    }
                })
            }
            ControlAction::Pause => controller.pause(guild_id).await.map(|_| None)?,
            ControlAction::Resume => controller.resume(guild_id).await.map(|_| None)?,
            ControlAction::Skip => controller
                .skip(guild_id)
                .await?
                .map(|track| format!("saltado {}", track.title)),
            ControlAction::Stop => controller.stop(guild_id).await.map(|_| None)?,
            ControlAction::SetVolume { percent } => {
                let applied = controller
                    .set_volume(guild_id, *percent as f32 / 100.0)
                    .await?;
                Some(format!("{:.0}%", applied * 100.0))
            }
            ControlAction::SetFilter {
                bass_boost,
                band_gain,
            } => {
                let filters = controller
                    .set_filters(guild_id, *bass_boost, *band_gain)
                    .await?;
                Some(format!(
                    "bass_boost={} eq={}/{}/{}",
                    filters.bass_boost, filters.eq_gains.low, filters.eq_gains.mid, filters.eq_gains.high
                ))
            }
            ControlAction::SetAutoplay { enabled } => {
                controller.set_autoplay(guild_id, *enabled).await.map(|_| None)?
            }
            ControlAction::SetLoop { enabled } => {
                controller.set_loop(guild_id, *enabled).await.map(|_| None)?
            }
            ControlAction::MoveQueueItem { from, to } => {
                controller.move_queue_item(guild_id, *from, *to).await.map(|_| None)?
            }
            ControlAction::DeleteQueueItem { index } => controller
                .delete_queue_item(guild_id, *index)
                .await
                .map(|track| Some(format!("eliminado {}", track.title)))?,
            ControlAction::Leave => controller.leave(guild_id).await.map(|_| None)?,
        };

        Ok(ControlAck::ok(&action, detail))
    }

    /// Publica periódicamente el estado de cada guild con observadores
    pub fn spawn_sync_loop(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        info!("🔄 Sincronización del dashboard cada {:?}", every);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.sync_once().await;
            }
        })
    }

    /// Una sesión ocupada no retrasa a las demás: se omite hasta la
    /// próxima vuelta
    pub async fn sync_once(&self) {
        for guild_id in self.hub.subscribed_guilds() {
            self.controller.try_publish(guild_id).await;
        }
    }
}
