use serenity::{
    builder::{CreateMessage, CreateAllowedMentions},
    model::{channel::Message, id::GuildId},
    prelude::Context,
};
use tracing::{error, info, warn};

use super::MusicBot;
use crate::{
    audio::player::{JoinOutcome, Origin, PauseToggle},
    error::{MusicError, MusicResult},
    ui::{buttons, embeds},
};

/// Comandos de texto con prefijo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixCommand {
    Play(Option<String>),
    Join,
    Leave,
    Pause,
    Resume,
    Stop,
    Skip,
    Loop,
    /// Página base 0
    Queue(usize),
    NowPlaying,
    Clear,
}

impl PrefixCommand {
    /// `None` si el mensaje no lleva el prefijo o el comando no existe.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "play" | "p" => Self::Play((!args.is_empty()).then(|| args.to_string())),
            "join" => Self::Join,
            "leave" | "disconnect" | "dc" => Self::Leave,
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "stop" => Self::Stop,
            "skip" | "s" => Self::Skip,
            "loop" | "l" => Self::Loop,
            "queue" | "q" => Self::Queue(
                args.split_whitespace()
                    .next()
                    .and_then(|page| page.parse::<usize>().ok())
                    .map_or(0, |page| page.saturating_sub(1)),
            ),
            "nowplaying" | "np" => Self::NowPlaying,
            "clear" | "clr" => Self::Clear,
            _ => return None,
        };
        Some(command)
    }
}

pub async fn handle(ctx: &Context, bot: &MusicBot, msg: &Message, command: PrefixCommand) {
    let Some(guild_id) = msg.guild_id else {
        return;
    };

    info!(
        "📝 Comando {:?} usado por {} en guild {}",
        command, msg.author.name, guild_id
    );

    let reply = match run(ctx, bot, msg, guild_id, command).await {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            if matches!(e, MusicError::Discord(_) | MusicError::Io(_) | MusicError::Json(_)) {
                error!("❌ Error en comando de texto en guild {}: {:?}", guild_id, e);
            }
            e.user_message()
        }
    };

    if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
        warn!("⚠️ No se pudo responder en {}: {}", msg.channel_id, e);
    }
}

/// Ejecuta el comando. Devuelve el texto de respuesta, si lo hay.
async fn run(
    ctx: &Context,
    bot: &MusicBot,
    msg: &Message,
    guild_id: GuildId,
    command: PrefixCommand,
) -> MusicResult<Option<String>> {
    let driver = &bot.driver;

    let reply = match command {
        PrefixCommand::Play(Some(query)) => {
            let voice_channel = bot
                .user_voice_channel(ctx, guild_id, msg.author.id)
                .ok_or(MusicError::NotInVoice)?;
            let origin = Origin {
                channel_id: msg.channel_id,
                silent: false,
            };
            let _typing = msg.channel_id.start_typing(&ctx.http);

            // El reproductor ya anuncia la canción o la playlist
            driver
                .play_query(guild_id, voice_channel, &query, msg.author.id, origin)
                .await?;
            None
        }
        PrefixCommand::Play(None) => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            match driver.resume_or_start(guild_id).await? {
                Some(PauseToggle::Resumed) => Some("▶️ Reproducción reanudada".to_string()),
                Some(_) => Some("▶️ Reproduciendo la cola".to_string()),
                None => Some(format!(
                    "❌ Indica una canción: `{}play <nombre o URL>`",
                    bot.config.command_prefix
                )),
            }
        }
        PrefixCommand::Join => {
            let voice_channel = bot
                .user_voice_channel(ctx, guild_id, msg.author.id)
                .ok_or(MusicError::NotInVoice)?;
            let outcome = driver.join(guild_id, voice_channel).await?;
            driver.ensure_state(guild_id);
            if driver.is_idle_without_loop(guild_id) {
                driver.schedule_auto_leave(guild_id, "join sin cola");
            }
            Some(match outcome {
                JoinOutcome::Joined => format!("✅ Conectado a <#{}>", voice_channel),
                JoinOutcome::Moved => format!("✅ Me moví a <#{}>", voice_channel),
                JoinOutcome::AlreadyConnected => format!("ℹ️ Ya estoy en <#{}>", voice_channel),
            })
        }
        PrefixCommand::Leave => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            driver.disconnect(guild_id).await?;
            Some("👋 Desconectado del canal de voz".to_string())
        }
        PrefixCommand::Pause => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            driver.pause(guild_id)?;
            Some("⏸️ Reproducción pausada".to_string())
        }
        PrefixCommand::Resume => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            driver.resume(guild_id)?;
            Some("▶️ Reproducción reanudada".to_string())
        }
        PrefixCommand::Stop => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            driver.stop(guild_id).await?;
            Some("⏹️ Reproducción detenida y cola vaciada".to_string())
        }
        PrefixCommand::Skip => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            let skipped = driver.skip(guild_id)?;
            Some(format!("⏭️ Saltada: **{}**", skipped.title))
        }
        PrefixCommand::Loop => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            let mode = driver.toggle_loop(guild_id);
            Some(format!("{} Repetición: **{}**", mode.emoji(), mode.label()))
        }
        PrefixCommand::Clear => {
            bot.ensure_same_channel(ctx, guild_id, msg.author.id).await?;
            let removed = driver.clear(guild_id);
            Some(format!("🗑️ Se eliminaron {} canciones de la cola", removed))
        }
        PrefixCommand::Queue(page) => {
            let snapshot = driver.snapshot(guild_id);
            let (embed, page, total_pages) = embeds::queue_embed(&snapshot, page);
            let mut message = CreateMessage::new().embed(embed);
            if total_pages > 1 {
                message = message.components(vec![buttons::pager_row(page, total_pages)]);
            }
            msg.channel_id.send_message(&ctx.http, message).await?;
            None
        }
        PrefixCommand::NowPlaying => {
            let snapshot = driver.snapshot(guild_id);
            let embed = embeds::now_playing_embed(&snapshot).ok_or(MusicError::NothingPlaying)?;
            msg.channel_id
                .send_message(
                    &ctx.http,
                    CreateMessage::new()
                        .embed(embed)
                        .allowed_mentions(CreateAllowedMentions::new()),
                )
                .await?;
            None
        }
    };

    Ok(reply)
}
