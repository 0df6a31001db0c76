use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    input::{ChildContainer, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    path::PathBuf,
    process::{Command, Stdio},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::filters::FilterConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("no hay llamada de voz activa para esta guild")]
    NotConnected,
    #[error("no se pudo lanzar ffmpeg: {0}")]
    Spawn(String),
    #[error("error de reproducción: {0}")]
    Playback(String),
}

/// Cómo terminó un pipeline de decodificación
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEnd {
    NormalEnd,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub stream_url: String,
    pub filters: FilterConfig,
    pub volume: f32,
    pub offset: Duration,
}

/// Control sobre un pipeline en marcha
pub trait PipelineHandle: Send + Sync {
    fn stop(&self);
    fn pause(&self);
    fn play(&self);
    fn set_volume(&self, volume: f32);
}

/// Pipeline recién arrancado: su handle y la señal de finalización.
///
/// `completion` entrega exactamente un valor, desde el contexto del driver
/// de voz; quien lo consuma debe volver al camino serializado de la sesión.
pub struct StartedPipeline {
    pub handle: Box<dyn PipelineHandle>,
    pub completion: oneshot::Receiver<PipelineEnd>,
}

#[async_trait]
pub trait DecodePipeline: Send + Sync {
    async fn start(
        &self,
        guild_id: GuildId,
        request: PipelineRequest,
    ) -> Result<StartedPipeline, PipelineError>;
}

/// Argumentos de ffmpeg para un stream con filtros y desplazamiento
pub fn ffmpeg_args(request: &PipelineRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if !request.offset.is_zero() {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", request.offset.as_secs_f64()));
    }

    args.push("-i".to_string());
    args.push(request.stream_url.clone());
    args.push("-vn".to_string());

    let chain = request.filters.ffmpeg_chain();
    if !chain.is_empty() {
        args.push("-af".to_string());
        args.push(chain.join(","));
    }

    args.extend(
        ["-c:a", "pcm_s16le", "-ar", "48000", "-ac", "2", "-f", "wav", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Pipeline que decodifica con ffmpeg y reproduce en la llamada de Songbird
pub struct FfmpegPipeline {
    manager: Arc<Songbird>,
    ffmpeg_path: PathBuf,
}

impl FfmpegPipeline {
    pub fn new(manager: Arc<Songbird>, ffmpeg_path: PathBuf) -> Self {
        Self {
            manager,
            ffmpeg_path,
        }
    }
}

#[async_trait]
impl DecodePipeline for FfmpegPipeline {
    async fn start(
        &self,
        guild_id: GuildId,
        request: PipelineRequest,
    ) -> Result<StartedPipeline, PipelineError> {
        let call = self.manager.get(guild_id).ok_or(PipelineError::NotConnected)?;

        let child = Command::new(&self.ffmpeg_path)
            .args(ffmpeg_args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;

        let input: Input = ChildContainer::from(child).into();
        let track = {
            let mut call = call.lock().await;
            call.play_input(input)
        };

        track
            .set_volume(request.volume)
            .map_err(|e| PipelineError::Playback(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let notifier = CompletionNotifier {
            guild_id,
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        track
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .map_err(|e| PipelineError::Playback(e.to_string()))?;
        track
            .add_event(Event::Track(TrackEvent::Error), notifier)
            .map_err(|e| PipelineError::Playback(e.to_string()))?;

        info!(
            "🎛️ Pipeline iniciado en guild {} (offset {:.1}s)",
            guild_id,
            request.offset.as_secs_f64()
        );

        Ok(StartedPipeline {
            handle: Box::new(SongbirdHandle(track)),
            completion: rx,
        })
    }
}

struct SongbirdHandle(TrackHandle);

impl PipelineHandle for SongbirdHandle {
    fn stop(&self) {
        let _ = self.0.stop();
    }

    fn pause(&self) {
        let _ = self.0.pause();
    }

    fn play(&self) {
        let _ = self.0.play();
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.0.set_volume(volume);
    }
}

/// Traduce los eventos de fin/error de Songbird a la señal única del pipeline
#[derive(Clone)]
struct CompletionNotifier {
    guild_id: GuildId,
    tx: Arc<Mutex<Option<oneshot::Sender<PipelineEnd>>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let end = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(PipelineEnd::Error(format!("{e:?}"))),
                    _ => None,
                })
                .unwrap_or(PipelineEnd::NormalEnd),
            _ => PipelineEnd::NormalEnd,
        };

        if let Some(tx) = self.tx.lock().take() {
            debug!("🏁 Pipeline terminado en guild {}: {:?}", self.guild_id, end);
            let _ = tx.send(end);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::EqBand;

    fn request(offset: Duration, filters: FilterConfig) -> PipelineRequest {
        PipelineRequest {
            stream_url: "https://cdn.example/stream".to_string(),
            filters,
            volume: 1.0,
            offset,
        }
    }

    #[test]
    fn test_args_without_offset_or_filters() {
        let args = ffmpeg_args(&request(Duration::ZERO, FilterConfig::default()));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-af".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_offset_precedes_input() {
        let mut filters = FilterConfig::default();
        filters.eq_gains.set(EqBand::Low, 4);
        let args = ffmpeg_args(&request(Duration::from_millis(30_500), filters));

        let ss = args.iter().position(|a| a == "-ss").expect("-ss presente");
        let input = args.iter().position(|a| a == "-i").expect("-i presente");
        assert!(ss < input);
        assert_eq!(args[ss + 1], "30.500");

        let af = args.iter().position(|a| a == "-af").expect("-af presente");
        assert_eq!(args[af + 1], "equalizer=f=100:width_type=h:width=200:g=4");
    }

    /// Cabecera WAV como la que emite ffmpeg con `pcm_s16le -ar 48000 -ac 2`
    fn wav_bytes(frames: u32) -> Vec<u8> {
        let data_len = frames * 4;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&48_000u32.to_le_bytes());
        bytes.extend_from_slice(&(48_000u32 * 4).to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(bytes.len() + data_len as usize, 0);
        bytes
    }

    #[test]
    fn test_ffmpeg_output_format_is_demuxable() {
        use symphonia::core::{
            codecs::DecoderOptions, formats::FormatOptions, io::MediaSourceStream,
            meta::MetadataOptions, probe::Hint,
        };

        let args = ffmpeg_args(&request(Duration::ZERO, FilterConfig::default()));
        let format = args.iter().position(|a| a == "-f").expect("-f presente");
        assert_eq!(args[format + 1], "wav");

        let source = MediaSourceStream::new(
            Box::new(std::io::Cursor::new(wav_bytes(4_800))),
            Default::default(),
        );
        let opened = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                source,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .expect("lector WAV registrado");

        let track = opened.format.default_track().expect("pista de audio");
        assert_eq!(track.codec_params.sample_rate, Some(48_000));
        symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .expect("decodificador PCM registrado");
    }
}
