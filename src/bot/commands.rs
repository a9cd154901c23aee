use serenity::{
    all::{CommandInteraction, Permissions},
    builder::{
        CreateCommand, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::id::GuildId,
    prelude::Context,
};
use tracing::{error, info, warn};

use super::{panel, MusicBot, ShardManagerContainer};
use crate::{
    error::{MusicError, MusicResult},
    ui::embeds,
};

fn commands() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("help").description("Muestra los comandos del bot de música"),
        CreateCommand::new("ping").description("Muestra la latencia del bot"),
        CreateCommand::new("setup-music")
            .description("Crea el canal de música con su panel de control")
            .default_member_permissions(Permissions::MANAGE_CHANNELS | Permissions::MANAGE_MESSAGES),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> MusicResult<()> {
    for command in commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> MusicResult<()> {
    guild_id.set_commands(&ctx.http, commands()).await?;
    Ok(())
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> MusicResult<()> {
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    match command.data.name.as_str() {
        "help" => {
            let embed = embeds::help_embed(&bot.config.command_prefix);
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embed),
                    ),
                )
                .await?;
        }
        "ping" => {
            let latency = shard_latency(ctx).await;
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embeds::ping_embed(latency)),
                    ),
                )
                .await?;
        }
        "setup-music" => handle_setup_music(ctx, &command, bot).await?,
        _ => reply_ephemeral(ctx, &command, "❌ Comando no reconocido").await?,
    }

    Ok(())
}

async fn handle_setup_music(ctx: &Context, command: &CommandInteraction, bot: &MusicBot) -> MusicResult<()> {
    let Some(guild_id) = command.guild_id else {
        return reply_ephemeral(ctx, command, "❌ Este comando solo funciona en un servidor").await;
    };

    let allowed = command.member.as_ref().and_then(|member| member.permissions).is_some_and(|perms| {
        perms.administrator() || (perms.manage_channels() && perms.manage_messages())
    });
    if !allowed {
        let denied = MusicError::Permission("necesitas Gestionar canales y Gestionar mensajes".to_string());
        return reply_ephemeral(ctx, command, &denied.user_message()).await;
    }

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
        )
        .await?;

    let content = match panel::setup(ctx, bot, guild_id).await {
        Ok(channel_id) => {
            info!("✅ Panel de música configurado en guild {}", guild_id);
            format!("✅ Canal de música listo: <#{}>", channel_id)
        }
        Err(e) => {
            error!("❌ Error configurando el panel en guild {}: {:?}", guild_id, e);
            e.user_message()
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

async fn shard_latency(ctx: &Context) -> Option<std::time::Duration> {
    let manager = {
        let data = ctx.data.read().await;
        data.get::<ShardManagerContainer>().cloned()
    };
    let Some(manager) = manager else {
        warn!("⚠️ ShardManager no registrado");
        return None;
    };

    let runners = manager.runners.lock().await;
    runners.get(&ctx.shard_id).and_then(|runner| runner.latency)
}

async fn reply_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) -> MusicResult<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}
