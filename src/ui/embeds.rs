use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{filters::FilterConfig, track::Track},
    dashboard::snapshot::{Snapshot, TrackSummary},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Akaza Music";

/// Canciones de la cola mostradas en un embed
const QUEUE_PREVIEW: usize = 10;

/// Formatea segundos como `m:ss` o `h:mm:ss`
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn base(title: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn track_started_embed(track: &Track) -> CreateEmbed {
    track_embed("🎵 Reproduciendo Ahora", track, None)
}

pub fn track_queued_embed(track: &Track, position: usize) -> CreateEmbed {
    track_embed("📝 Añadida a la cola", track, Some(position))
}

fn track_embed(title: &str, track: &Track, position: Option<usize>) -> CreateEmbed {
    let duration = track
        .duration_secs
        .map(format_duration)
        .unwrap_or_else(|| "🔴 En vivo".to_string());

    let mut embed = base(title)
        .description(format!("**[{}]({})**", track.title, track.original_url))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration, true)
        .field("👤 Solicitado por", track.requester.as_str(), true);

    if let Some(position) = position {
        embed = embed.field("📍 Posición", format!("#{}", position), true);
    }
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

pub fn now_playing_embed(snapshot: &Snapshot) -> CreateEmbed {
    let Some(song) = &snapshot.current_song else {
        return base("🔇 Nada sonando")
            .description("Usa `/play` para empezar")
            .color(colors::NEUTRAL_GRAY);
    };

    let progress = match song.duration {
        Some(total) => format!(
            "{} / {}",
            format_duration(snapshot.elapsed.min(total)),
            format_duration(total)
        ),
        None => format!("{} / 🔴 En vivo", format_duration(snapshot.elapsed)),
    };
    let state = if snapshot.is_paused { "⏸️ Pausado" } else { "▶️ Sonando" };

    let mut embed = base("🎵 Reproduciendo Ahora")
        .description(format!("**[{}]({})**", song.title, song.url))
        .color(colors::MUSIC_PURPLE)
        .field("⏱️ Progreso", progress, true)
        .field("📻 Estado", state, true)
        .field("🔊 Volumen", format!("{}%", snapshot.volume), true)
        .field("👤 Solicitado por", song.requester.as_str(), true)
        .field(
            "🎛️ Filtros",
            describe_filters(&FilterConfig {
                bass_boost: snapshot.bass_boost,
                eq_gains: snapshot.eq_gains,
            }),
            true,
        );

    if let Some(thumbnail) = &song.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

pub fn queue_embed(snapshot: &Snapshot) -> CreateEmbed {
    let mut description = String::new();

    if let Some(song) = &snapshot.current_song {
        description.push_str(&format!("**Sonando:** {}\n\n", song.title));
    }

    if snapshot.queue.is_empty() {
        description.push_str("*La cola está vacía*");
    } else {
        for (index, item) in snapshot.queue.iter().take(QUEUE_PREVIEW).enumerate() {
            description.push_str(&queue_line(index + 1, item));
        }
        let hidden = snapshot.queue.len().saturating_sub(QUEUE_PREVIEW);
        if hidden > 0 {
            description.push_str(&format!("\n*...y {} más*", hidden));
        }
    }

    let mut modes = Vec::new();
    if snapshot.loop_enabled {
        modes.push("🔂 Repetir");
    }
    if snapshot.auto_play {
        modes.push("♾️ Autoplay");
    }

    let mut embed = base(&format!("📜 Cola ({} canciones)", snapshot.queue.len()))
        .description(description)
        .color(colors::INFO_BLUE);
    if !modes.is_empty() {
        embed = embed.field("Modos", modes.join(" · "), false);
    }
    embed
}

fn queue_line(position: usize, item: &TrackSummary) -> String {
    let duration = item
        .duration
        .map(format_duration)
        .unwrap_or_else(|| "en vivo".to_string());
    format!("`{}.` {} `[{}]` · {}\n", position, item.title, duration, item.requester)
}

pub fn describe_filters(filters: &FilterConfig) -> String {
    let gains = filters.eq_gains;
    format!(
        "Bass boost: {} · EQ {}/{}/{} dB",
        if filters.bass_boost { "on" } else { "off" },
        gains.low,
        gains.mid,
        gains.high
    )
}

pub fn success_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::default()
        .description(message.into())
        .color(colors::SUCCESS_GREEN)
}

pub fn error_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(message.into())
        .color(colors::ERROR_RED)
}
