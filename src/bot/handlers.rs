use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{application::ComponentInteraction, id::GuildId},
    prelude::Context,
};
use tracing::{debug, error, info};

use super::MusicBot;
use crate::{
    audio::{player::PauseToggle, queue::VOLUME_STEP},
    error::{MusicError, MusicResult},
    ui::{
        buttons::{self, PagerTarget, PanelAction},
        embeds,
    },
};

/// Maneja interacciones con componentes (botones del panel y paginador de la cola)
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, bot: &MusicBot) -> MusicResult<()> {
    let custom_id = component.data.custom_id.as_str();

    if let Some((action, guild_id)) = PanelAction::parse_custom_id(custom_id) {
        info!(
            "🔘 Botón {:?} presionado por {} en guild {}",
            action, component.user.name, guild_id
        );
        if component.guild_id != Some(guild_id) {
            return respond(ctx, &component, "❌ Este panel pertenece a otro servidor".to_string()).await;
        }

        // Conectar a voz puede pasar del plazo de 3 s de la interacción
        if action.defers_reply() {
            component
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
                )
                .await?;
        }

        let content = match run_panel_action(ctx, bot, &component, guild_id, action).await {
            Ok(PanelReply::Text(content)) => content,
            Ok(PanelReply::Sent) => return Ok(()),
            Err(e) => {
                if matches!(e, MusicError::Discord(_) | MusicError::Io(_) | MusicError::Json(_)) {
                    error!("❌ Error en botón {:?} de guild {}: {:?}", action, guild_id, e);
                }
                e.user_message()
            }
        };
        if action.defers_reply() {
            component
                .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
                .await?;
            return Ok(());
        }
        return respond(ctx, &component, content).await;
    }

    if let Some((target, page)) = PagerTarget::parse_custom_id(custom_id) {
        let Some(guild_id) = component.guild_id else {
            return Ok(());
        };
        return turn_queue_page(ctx, bot, &component, guild_id, target, page).await;
    }

    debug!("Componente desconocido: {}", custom_id);
    Ok(())
}

enum PanelReply {
    Text(String),
    /// La respuesta ya se envió (p. ej. la vista de la cola)
    Sent,
}

async fn run_panel_action(
    ctx: &Context,
    bot: &MusicBot,
    component: &ComponentInteraction,
    guild_id: GuildId,
    action: PanelAction,
) -> MusicResult<PanelReply> {
    let driver = &bot.driver;
    // Todos los botones exigen estar en el canal del bot
    let user_channel = bot.ensure_same_channel(ctx, guild_id, component.user.id).await?;

    let content = match action {
        PanelAction::Queue => {
            show_queue(ctx, bot, component, guild_id).await?;
            return Ok(PanelReply::Sent);
        }
        PanelAction::PlayPause => {
            if driver.connected_channel(guild_id).await.is_none() {
                driver.join(guild_id, user_channel).await?;
            }
            match driver.toggle_pause(guild_id).await {
                Ok(PauseToggle::Paused) => "⏸️ Reproducción pausada".to_string(),
                Ok(PauseToggle::Resumed) => "▶️ Reproducción reanudada".to_string(),
                Ok(PauseToggle::Started) => "▶️ Reproduciendo la cola...".to_string(),
                Err(MusicError::NothingPlaying) => {
                    // Si acaba de unirse sin cola, que no se quede en el canal
                    driver.ensure_state(guild_id);
                    if driver.is_idle_without_loop(guild_id) {
                        driver.schedule_auto_leave(guild_id, "panel sin cola");
                    }
                    "📭 No hay canciones en la cola".to_string()
                }
                Err(e) => return Err(e),
            }
        }
        PanelAction::Skip => {
            let skipped = driver.skip(guild_id)?;
            format!("⏭️ Saltada: **{}**", skipped.title)
        }
        PanelAction::Stop => {
            driver.stop(guild_id).await?;
            "⏹️ Reproducción detenida y cola vaciada".to_string()
        }
        PanelAction::Loop => {
            let mode = driver.toggle_loop(guild_id);
            format!("{} Repetición: **{}**", mode.emoji(), mode.label())
        }
        PanelAction::Mute => {
            if driver.toggle_mute(guild_id) {
                "🔇 Silenciado".to_string()
            } else {
                format!("🔊 Sonido activado ({}%)", driver.snapshot(guild_id).volume)
            }
        }
        PanelAction::VolumeUp => {
            format!("🔊 Volumen: {}%", driver.adjust_volume(guild_id, VOLUME_STEP))
        }
        PanelAction::VolumeDown => {
            format!("🔉 Volumen: {}%", driver.adjust_volume(guild_id, -VOLUME_STEP))
        }
    };

    Ok(PanelReply::Text(content))
}

/// Vista efímera de la primera página de la cola.
async fn show_queue(
    ctx: &Context,
    bot: &MusicBot,
    component: &ComponentInteraction,
    guild_id: GuildId,
) -> MusicResult<()> {
    let snapshot = bot.driver.snapshot(guild_id);
    let (embed, page, total_pages) = embeds::queue_embed(&snapshot, 0);
    let mut message = CreateInteractionResponseMessage::new().embed(embed).ephemeral(true);
    if total_pages > 1 {
        message = message.components(vec![buttons::pager_row(page, total_pages)]);
    }
    component
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

async fn turn_queue_page(
    ctx: &Context,
    bot: &MusicBot,
    component: &ComponentInteraction,
    guild_id: GuildId,
    target: PagerTarget,
    current: usize,
) -> MusicResult<()> {
    let snapshot = bot.driver.snapshot(guild_id);
    let (_, _, total_pages) = embeds::queue_embed(&snapshot, current);
    let (embed, page, total_pages) = embeds::queue_embed(&snapshot, target.resolve(current, total_pages));

    let components = if total_pages > 1 {
        vec![buttons::pager_row(page, total_pages)]
    } else {
        Vec::new()
    };

    component
        .create_response(
            &ctx.http,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .components(components),
            ),
        )
        .await?;
    Ok(())
}

async fn respond(ctx: &Context, component: &ComponentInteraction, content: String) -> MusicResult<()> {
    component
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
