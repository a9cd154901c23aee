use serenity::{
    all::{ChannelType, PermissionOverwrite, PermissionOverwriteType, Permissions},
    builder::{CreateChannel, CreateMessage, EditMessage},
    model::id::{ChannelId, GuildId},
    prelude::Context,
};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::MusicBot;
use crate::{
    error::{MusicError, MusicResult},
    ui::{buttons, embeds},
};

const CHANNEL_TOPIC: &str =
    "🎵 Escribe el nombre de una canción o pega un enlace para reproducirla. Los mensajes se borran solos.";

/// Crea o reutiliza el canal de música y publica un panel nuevo.
pub async fn setup(ctx: &Context, bot: &MusicBot, guild_id: GuildId) -> MusicResult<ChannelId> {
    let settings = bot.panels.get(guild_id).await;
    let wanted_name = bot.config.music_channel_name.as_str();

    let reusable = match settings.channel_id() {
        Some(channel_id) => match channel_id.to_channel(&ctx.http).await {
            Ok(channel) => channel
                .guild()
                .filter(|channel| channel.name == wanted_name)
                .map(|channel| channel.id),
            Err(e) => {
                debug!("Canal de música anterior no disponible: {}", e);
                None
            }
        },
        None => None,
    };

    let channel_id = match reusable {
        Some(channel_id) => {
            info!("♻️ Reutilizando canal de música {} en guild {}", channel_id, guild_id);
            channel_id
        }
        None => create_music_channel(ctx, guild_id, wanted_name).await?,
    };

    if let (Some(old_channel), Some(old_message)) = (settings.channel_id(), settings.message_id()) {
        if let Err(e) = old_channel.delete_message(&ctx.http, old_message).await {
            debug!("No se pudo borrar el panel anterior: {}", e);
        }
    }

    bot.panels
        .update(guild_id, |panel| {
            panel.music_channel_id = Some(channel_id.get());
            panel.music_panel_message_id = None;
        })
        .await?;

    refresh(ctx, bot, guild_id).await?;
    Ok(channel_id)
}

async fn create_music_channel(ctx: &Context, guild_id: GuildId, name: &str) -> MusicResult<ChannelId> {
    let bot_id = ctx.cache.current_user().id;

    let overwrites = vec![
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::READ_MESSAGE_HISTORY,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Role(guild_id.everyone_role()),
        },
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::MANAGE_MESSAGES
                | Permissions::EMBED_LINKS
                | Permissions::READ_MESSAGE_HISTORY,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(bot_id),
        },
    ];

    let channel = guild_id
        .create_channel(
            &ctx.http,
            CreateChannel::new(name)
                .kind(ChannelType::Text)
                .topic(CHANNEL_TOPIC)
                .permissions(overwrites),
        )
        .await
        .map_err(|e| MusicError::Permission(format!("no se pudo crear el canal de música ({})", e)))?;

    info!("📢 Canal de música #{} creado en guild {}", channel.name, guild_id);
    Ok(channel.id)
}

/// Redibuja el panel. Si el mensaje ya no existe, publica uno nuevo.
pub async fn refresh(ctx: &Context, bot: &MusicBot, guild_id: GuildId) -> MusicResult<()> {
    let settings = bot.panels.get(guild_id).await;
    let Some(channel_id) = settings.channel_id() else {
        return Ok(());
    };

    let snapshot = bot.driver.snapshot(guild_id);
    let connected = bot.driver.connected_channel(guild_id).await;
    let bot_name = ctx.cache.current_user().name.clone();

    let embed = embeds::panel_embed(&snapshot, connected, &bot_name, &bot.config.panel_image_url);
    let rows = buttons::panel_rows(
        guild_id,
        &snapshot,
        connected.is_some(),
        bot.config.support_url.as_deref(),
    );

    if let Some(message_id) = settings.message_id() {
        let edit = EditMessage::new().embed(embed.clone()).components(rows.clone());
        match channel_id.edit_message(&ctx.http, message_id, edit).await {
            Ok(_) => return Ok(()),
            Err(e) => debug!("Panel {} no editable, se publica otro: {}", message_id, e),
        }
    }

    let message = channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed).components(rows))
        .await?;

    bot.panels
        .update(guild_id, |panel| {
            panel.music_panel_message_id = Some(message.id.get());
        })
        .await?;

    debug!("🖼️ Panel publicado en {} para guild {}", channel_id, guild_id);
    Ok(())
}

/// Redibuja paneles a medida que el reproductor informa cambios.
/// Las peticiones acumuladas de un mismo servidor se agrupan en una.
pub async fn run_refresh_worker(ctx: Context, bot: MusicBot, mut requests: mpsc::UnboundedReceiver<GuildId>) {
    while let Some(first) = requests.recv().await {
        let mut pending = HashSet::from([first]);
        while let Ok(guild_id) = requests.try_recv() {
            pending.insert(guild_id);
        }

        for guild_id in pending {
            if let Err(e) = refresh(&ctx, &bot, guild_id).await {
                warn!("⚠️ No se pudo actualizar el panel de guild {}: {}", guild_id, e);
            }
        }
    }
    debug!("Worker de paneles terminado");
}

/// Al arrancar: olvida servidores que ya no existen y redibuja el resto.
pub async fn restore(ctx: &Context, bot: &MusicBot, current_guilds: &HashSet<GuildId>) {
    for guild_id in bot.panels.guilds().await {
        if !current_guilds.contains(&guild_id) {
            info!("🗑️ Guild {} ya no está disponible, se elimina su panel", guild_id);
            if let Err(e) = bot.panels.remove(guild_id).await {
                warn!("⚠️ No se pudo eliminar el panel de guild {}: {}", guild_id, e);
            }
            continue;
        }

        if let Err(e) = refresh(ctx, bot, guild_id).await {
            warn!("⚠️ No se pudo restaurar el panel de guild {}: {}", guild_id, e);
        }
    }
}
