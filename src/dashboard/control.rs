use serde::{Deserialize, Serialize};
use serenity::model::id::ChannelId;

use crate::audio::{controller::ControlError, filters::EqBand};

/// Orden remota tal como llega del dashboard
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub params: ControlParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlParams {
    pub query: Option<String>,
    pub requester: Option<String>,
    pub channel_id: Option<String>,
    /// Volumen en porcentaje
    pub level: Option<i64>,
    pub enabled: Option<bool>,
    pub bass_boost: Option<bool>,
    pub band: Option<String>,
    pub gain: Option<i32>,
    pub index: Option<usize>,
    #[serde(alias = "from_index")]
    pub from: Option<usize>,
    #[serde(alias = "to_index")]
    pub to: Option<usize>,
}

/// Volumen máximo aceptado desde el dashboard (porcentaje)
pub const MAX_VOLUME_PERCENT: i64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Play {
        query: String,
        requester: String,
        channel: Option<ChannelId>,
    },
    Pause,
    Resume,
    Skip,
    Stop,
    SetVolume { percent: u32 },
    SetFilter {
        bass_boost: Option<bool>,
        band_gain: Option<(EqBand, i32)>,
    },
    SetAutoplay { enabled: bool },
    SetLoop { enabled: bool },
    MoveQueueItem { from: usize, to: usize },
    DeleteQueueItem { index: usize },
    Leave,
}

fn missing(field: &str) -> ControlError {
    ControlError::InvalidRequest(format!("falta el parámetro '{field}'"))
}

impl ControlAction {
    /// Interpreta una acción, aceptando también los nombres antiguos del
    /// dashboard (`volume`, `bass_boost`, `equalizer`, `auto_play`,
    /// `move_queue`, `delete_queue`)
    pub fn parse(action: &str, params: ControlParams) -> Result<Self, ControlError> {
        let action = match action {
            "play" => {
                let query = params
                    .query
                    .filter(|q| !q.trim().is_empty())
                    .ok_or_else(|| missing("query"))?;
                let channel = params
                    .channel_id
                    .map(|raw| {
                        raw.parse::<u64>()
                            .ok()
                            .filter(|id| *id != 0)
                            .map(ChannelId::new)
                            .ok_or_else(|| ControlError::InvalidRequest(format!("canal '{raw}' no válido")))
                    })
                    .transpose()?;
                ControlAction::Play {
                    query,
                    requester: params.requester.unwrap_or_else(|| "Dashboard".to_string()),
                    channel,
                }
            }
            "pause" => ControlAction::Pause,
            "resume" => ControlAction::Resume,
            "skip" => ControlAction::Skip,
            "stop" => ControlAction::Stop,
            "set_volume" | "volume" => {
                let level = params.level.ok_or_else(|| missing("level"))?;
                if !(0..=MAX_VOLUME_PERCENT).contains(&level) {
                    return Err(ControlError::InvalidVolume);
                }
                ControlAction::SetVolume {
                    percent: level as u32,
                }
            }
            "set_filter" | "equalizer" => {
                let bass_boost = params.bass_boost;
                let band_gain = match (params.band, params.gain) {
                    (Some(band), Some(gain)) => {
                        let band = band
                            .parse::<EqBand>()
                            .map_err(ControlError::InvalidRequest)?;
                        Some((band, gain))
                    }
                    (None, None) => None,
                    (Some(_), None) => return Err(missing("gain")),
                    (None, Some(_)) => return Err(missing("band")),
                };
                if bass_boost.is_none() && band_gain.is_none() {
                    return Err(missing("bass_boost|band"));
                }
                ControlAction::SetFilter {
                    bass_boost,
                    band_gain,
                }
            }
            "bass_boost" => ControlAction::SetFilter {
                bass_boost: Some(params.enabled.or(params.bass_boost).unwrap_or(false)),
                band_gain: None,
            },
            "set_autoplay" | "auto_play" => ControlAction::SetAutoplay {
                enabled: params.enabled.unwrap_or(false),
            },
            "set_loop" => ControlAction::SetLoop {
                enabled: params.enabled.unwrap_or(false),
            },
            "move_queue_item" | "move_queue" => ControlAction::MoveQueueItem {
                from: params.from.ok_or_else(|| missing("from"))?,
                to: params.to.ok_or_else(|| missing("to"))?,
            },
            "delete_queue_item" | "delete_queue" => ControlAction::DeleteQueueItem {
                index: params.index.ok_or_else(|| missing("index"))?,
            },
            "leave" => ControlAction::Leave,
            other => {
                return Err(ControlError::InvalidRequest(format!(
                    "acción desconocida '{other}'"
                )))
            }
        };
        Ok(action)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlAction::Play { .. } => "play",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::Skip => "skip",
            ControlAction::Stop => "stop",
            ControlAction::SetVolume { .. } => "set_volume",
            ControlAction::SetFilter { .. } => "set_filter",
            ControlAction::SetAutoplay { .. } => "set_autoplay",
            ControlAction::SetLoop { .. } => "set_loop",
            ControlAction::MoveQueueItem { .. } => "move_queue_item",
            ControlAction::DeleteQueueItem { .. } => "delete_queue_item",
            ControlAction::Leave => "leave",
        }
    }
}

/// Respuesta a una orden aceptada
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlAck {
    pub status: &'static str,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ControlAck {
    pub fn ok(action: &ControlAction, detail: Option<String>) -> Self {
        Self {
            status: "ok",
            action: action.name(),
            detail,
        }
    }
}
