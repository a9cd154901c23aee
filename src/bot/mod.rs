//! # Bot Module
//!
//! Discord front end for Jukebox Bot.
//!
//! - [`MusicBot`] implements Serenity's [`EventHandler`]: ready, messages,
//!   interactions and voice state updates
//! - [`prefix`]: text commands (`s!play`, `s!skip`, ...)
//! - [`commands`]: slash commands (`/help`, `/ping`, `/setup-music`)
//! - [`handlers`]: panel buttons and the queue pager
//! - [`panel`]: music channel setup and panel rendering
//! - [`notifier`]: [`DiscordNotifier`], the playback driver's way out to Discord
//!
//! Every handler resolves to an operation on the shared
//! [`PlaybackDriver`](crate::audio::player::PlaybackDriver).

use parking_lot::Mutex;
use serenity::{
    all::{ActivityData, ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
    gateway::ShardManager,
    model::channel::Message,
    prelude::TypeMapKey,
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;
pub mod panel;
pub mod prefix;

pub use notifier::DiscordNotifier;

use crate::{
    audio::{
        notify::Notifier,
        player::{Origin, PlaybackDriver},
    },
    config::Config,
    error::{MusicError, MusicResult},
    storage::PanelStore,
};
use prefix::PrefixCommand;

const MUSIC_CHANNEL_NOTICE: Duration = Duration::from_secs(10);

pub struct ShardManagerContainer;

impl TypeMapKey for ShardManagerContainer {
    type Value = Arc<ShardManager>;
}

/// Manejador de eventos de Discord. Barato de clonar: todo el estado es compartido.
#[derive(Clone)]
pub struct MusicBot {
    pub config: Arc<Config>,
    pub driver: Arc<PlaybackDriver>,
    pub panels: Arc<PanelStore>,
    notifier: Arc<dyn Notifier>,
    /// Receptor de refrescos de panel; lo toma el primer `ready`
    panel_refresh: Arc<Mutex<Option<mpsc::UnboundedReceiver<GuildId>>>>,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        driver: Arc<PlaybackDriver>,
        panels: Arc<PanelStore>,
        notifier: Arc<dyn Notifier>,
        panel_refresh: mpsc::UnboundedReceiver<GuildId>,
    ) -> Self {
        Self {
            config,
            driver,
            panels,
            notifier,
            panel_refresh: Arc::new(Mutex::new(Some(panel_refresh))),
        }
    }

    async fn register_commands(&self, ctx: &Context) -> MusicResult<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Canal de voz del usuario según la caché.
    pub fn user_voice_channel(&self, ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let guild = ctx.cache.guild(guild_id)?;
        guild.voice_states.get(&user_id).and_then(|state| state.channel_id)
    }

    /// El usuario debe estar en voz y, si el bot está conectado, en su mismo canal.
    pub async fn ensure_same_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        user_id: UserId,
    ) -> MusicResult<ChannelId> {
        let user_channel = self
            .user_voice_channel(ctx, guild_id, user_id)
            .ok_or(MusicError::NotInVoice)?;

        match self.driver.connected_channel(guild_id).await {
            Some(bot_channel) if bot_channel != user_channel => {
                Err(MusicError::WrongVoiceChannel(bot_channel))
            }
            _ => Ok(user_channel),
        }
    }

    /// Mensaje en el canal de música: se borra y se trata como `play` silencioso.
    async fn handle_music_channel_message(&self, ctx: &Context, msg: &Message, guild_id: GuildId) {
        if let Err(e) = msg.delete(&ctx.http).await {
            debug!("No se pudo borrar el mensaje {}: {}", msg.id, e);
        }

        let query = msg.content.trim();
        if query.is_empty() {
            return;
        }

        let Some(voice_channel) = self.user_voice_channel(ctx, guild_id, msg.author.id) else {
            self.notifier
                .send(
                    msg.channel_id,
                    format!("<@{}> {}", msg.author.id, MusicError::NotInVoice.user_message()),
                    Some(MUSIC_CHANNEL_NOTICE),
                )
                .await;
            return;
        };

        info!(
            "🎵 Petición '{}' de {} en el canal de música de guild {}",
            query, msg.author.name, guild_id
        );

        let origin = Origin {
            channel_id: msg.channel_id,
            silent: true,
        };
        if let Err(e) = self
            .driver
            .play_query(guild_id, voice_channel, query, msg.author.id, origin)
            .await
        {
            warn!("⚠️ Petición fallida en guild {}: {}", guild_id, e);
            self.notifier
                .send(
                    msg.channel_id,
                    format!("<@{}> {}", msg.author.id, e.user_message()),
                    Some(MUSIC_CHANNEL_NOTICE),
                )
                .await;
        }
    }

    /// Usuarios humanos en un canal de voz. `None` si el servidor no está en caché.
    fn humans_in_channel(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
        let guild = ctx.cache.guild(guild_id)?;
        let humans = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| {
                let is_bot = guild
                    .members
                    .get(&state.user_id)
                    .map(|member| member.user.bot)
                    .or_else(|| state.member.as_ref().map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .count();
        Some(humans)
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(&self.config.status_message)));

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Error al registrar comandos: {:?}", e);
        }

        let receiver = self.panel_refresh.lock().take();
        if let Some(receiver) = receiver {
            tokio::spawn(panel::run_refresh_worker(ctx.clone(), self.clone(), receiver));
        }

        let guilds: HashSet<GuildId> = ready.guilds.iter().map(|guild| guild.id).collect();
        let bot = self.clone();
        tokio::spawn(async move {
            panel::restore(&ctx, &bot, &guilds).await;
        });
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        if self.panels.is_music_channel(guild_id, msg.channel_id).await {
            self.handle_music_channel_message(&ctx, &msg, guild_id).await;
            return;
        }

        if let Some(command) = PrefixCommand::parse(&msg.content, &self.config.command_prefix) {
            prefix::handle(&ctx, self, &msg, command).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = commands::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let bot_id = ctx.cache.current_user().id;

        // El bot salió o fue expulsado del canal
        if new.user_id == bot_id && new.channel_id.is_none() {
            info!("🔌 Bot desconectado de voz en guild {}", guild_id);
            self.driver.teardown(guild_id);
            if self.driver.connected_channel(guild_id).await.is_some() {
                if let Err(e) = self.driver.disconnect(guild_id).await {
                    debug!("Limpieza de la conexión de voz en guild {}: {}", guild_id, e);
                }
            }
            return;
        }

        let Some(bot_channel) = self.driver.connected_channel(guild_id).await else {
            return;
        };

        let touched_bot_channel = new.channel_id == Some(bot_channel)
            || old.as_ref().and_then(|state| state.channel_id) == Some(bot_channel);
        if !touched_bot_channel {
            return;
        }

        if Self::humans_in_channel(&ctx, guild_id, bot_channel) == Some(0)
            && self.driver.is_idle_without_loop(guild_id)
        {
            info!("🚪 Bot solo e inactivo en guild {}", guild_id);
            self.driver.schedule_auto_leave(guild_id, "solo e inactivo");
        }
    }
}
