use async_trait::async_trait;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::notify::Notifier;

/// Publica los avisos del reproductor en Discord y pide redibujar paneles.
pub struct DiscordNotifier {
    http: Arc<Http>,
    refresh: mpsc::UnboundedSender<GuildId>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, refresh: mpsc::UnboundedSender<GuildId>) -> Self {
        Self { http, refresh }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, channel_id: ChannelId, content: String, delete_after: Option<Duration>) {
        let message = match channel_id.say(&self.http, content).await {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ No se pudo enviar mensaje a {}: {}", channel_id, e);
                return;
            }
        };

        if let Some(delay) = delete_after {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = channel_id.delete_message(&http, message.id).await {
                    debug!("Mensaje {} ya no existe: {}", message.id, e);
                }
            });
        }
    }

    fn state_changed(&self, guild_id: GuildId) {
        if self.refresh.send(guild_id).is_err() {
            debug!("Canal de refresco de paneles cerrado");
        }
    }
}
