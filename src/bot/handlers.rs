use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        controller::{ControlError, PlayOutcome, PlayRequest},
        filters::EqBand,
    },
    bot::AkazaBot,
    ui::embeds,
};

/// Resultado de un comando: embed para el canal o mensaje de error efímero
type Reply = std::result::Result<CreateEmbed, String>;

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &AkazaBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, Err("Este comando sólo funciona en un servidor".to_string())).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // La resolución puede tardar varios segundos: se difiere la respuesta
    if command.data.name == "play" {
        return handle_play(ctx, &command, bot, guild_id).await;
    }

    let reply = match command.data.name.as_str() {
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "pause" => done(bot.controller.pause(guild_id).await, "⏸️ Pausado"),
        "resume" => done(bot.controller.resume(guild_id).await, "▶️ Reanudado"),
        "skip" => bot
            .controller
            .skip(guild_id)
            .await
            .map(|skipped| match skipped {
                Some(track) => embeds::success_embed(format!("⏭️ Saltada **{}**", track.title)),
                None => embeds::success_embed("⏭️ Carga cancelada"),
            })
            .map_err(|e| e.to_string()),
        "stop" => done(bot.controller.stop(guild_id).await, "⏹️ Reproducción detenida y cola vaciada"),
        "leave" => done(bot.controller.leave(guild_id).await, "👋 Desconectado del canal de voz"),
        "queue" => Ok(embeds::queue_embed(&bot.controller.snapshot(guild_id).await)),
        "nowplaying" => Ok(embeds::now_playing_embed(&bot.controller.snapshot(guild_id).await)),
        "remove" => handle_remove(&command, bot, guild_id).await,
        "move" => handle_move(&command, bot, guild_id).await,
        "volume" => handle_volume(&command, bot, guild_id).await,
        "bassboost" => handle_bassboost(&command, bot, guild_id).await,
        "eq" => handle_eq(&command, bot, guild_id).await,
        "autoplay" => {
            let enabled = bool_option(&command, "enabled").unwrap_or(false);
            done(
                bot.controller.set_autoplay(guild_id, enabled).await,
                if enabled { "♾️ Autoplay activado" } else { "♾️ Autoplay desactivado" },
            )
        }
        "loop" => {
            let enabled = bool_option(&command, "enabled").unwrap_or(false);
            done(
                bot.controller.set_loop(guild_id, enabled).await,
                if enabled { "🔂 Repetición activada" } else { "🔂 Repetición desactivada" },
            )
        }
        _ => Err("Comando no reconocido".to_string()),
    };

    respond(ctx, &command, reply).await
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &AkazaBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(query) = str_option(command, "query") else {
        return respond(ctx, command, Err("Falta el término de búsqueda".to_string())).await;
    };
    let Some(channel) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, Err("Debes estar en un canal de voz".to_string())).await;
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let request = PlayRequest {
        query: query.to_string(),
        requester: command.user.name.clone(),
        channel: Some(channel),
    };

    let embed = match bot.controller.play(guild_id, request).await {
        Ok(PlayOutcome::Started(track)) => embeds::track_started_embed(&track),
        Ok(PlayOutcome::Queued { track, position }) => embeds::track_queued_embed(&track, position),
        Err(e) => {
            warn!("⚠️ /play falló en guild {}: {}", guild_id, e);
            embeds::error_embed(e.to_string())
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

async fn handle_join(ctx: &Context, command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let channel = user_voice_channel(ctx, guild_id, command.user.id)
        .ok_or_else(|| "Debes estar en un canal de voz".to_string())?;

    bot.controller
        .join(guild_id, Some(channel))
        .await
        .map(|_| embeds::success_embed(format!("🔊 Conectado a <#{}>", channel)))
        .map_err(|e| e.to_string())
}

async fn handle_remove(command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let index = queue_index(command, "position")?;

    bot.controller
        .delete_queue_item(guild_id, index)
        .await
        .map(|track| embeds::success_embed(format!("🗑️ Quitada **{}**", track.title)))
        .map_err(|e| e.to_string())
}

async fn handle_move(command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let from = queue_index(command, "from")?;
    let to = queue_index(command, "to")?;

    done(
        bot.controller.move_queue_item(guild_id, from, to).await,
        &format!("↕️ Movida de #{} a #{}", from + 1, to + 1),
    )
}

async fn handle_volume(command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let level = int_option(command, "level").ok_or_else(|| "Falta el nivel de volumen".to_string())?;

    bot.controller
        .set_volume(guild_id, level as f32 / 100.0)
        .await
        .map(|applied| embeds::success_embed(format!("🔊 Volumen: {:.0}%", applied * 100.0)))
        .map_err(|e| e.to_string())
}

async fn handle_bassboost(command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let enabled = bool_option(command, "enabled").unwrap_or(false);

    bot.controller
        .set_bass_boost(guild_id, enabled)
        .await
        .map(|filters| embeds::success_embed(format!("🎛️ {}", embeds::describe_filters(&filters))))
        .map_err(|e| e.to_string())
}

async fn handle_eq(command: &CommandInteraction, bot: &AkazaBot, guild_id: GuildId) -> Reply {
    let band: EqBand = str_option(command, "band")
        .ok_or_else(|| "Falta la banda".to_string())?
        .parse()?;
    let gain = int_option(command, "gain").ok_or_else(|| "Falta la ganancia".to_string())?;

    bot.controller
        .set_eq(guild_id, band, gain as i32)
        .await
        .map(|filters| embeds::success_embed(format!("🎛️ {}", embeds::describe_filters(&filters))))
        .map_err(|e| e.to_string())
}

fn done(result: std::result::Result<(), ControlError>, message: &str) -> Reply {
    result
        .map(|_| embeds::success_embed(message))
        .map_err(|e| e.to_string())
}

async fn respond(ctx: &Context, command: &CommandInteraction, reply: Reply) -> Result<()> {
    let message = match reply {
        Ok(embed) => CreateInteractionResponseMessage::new().embed(embed),
        Err(reason) => CreateInteractionResponseMessage::new()
            .embed(embeds::error_embed(reason))
            .ephemeral(true),
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn bool_option(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

/// Convierte una posición de usuario (empieza en 1) en índice de la cola
fn queue_index(command: &CommandInteraction, name: &str) -> std::result::Result<usize, String> {
    let position = int_option(command, name).ok_or_else(|| format!("Falta '{}'", name))?;
    to_index(position)
}

fn to_index(position: i64) -> std::result::Result<usize, String> {
    usize::try_from(position)
        .ok()
        .and_then(|p| p.checked_sub(1))
        .ok_or_else(|| format!("Posición {} no válida", position))
}

/// Canal de voz en el que está el usuario, según la caché
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
