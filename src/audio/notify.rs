use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::time::Duration;

/// Salida de avisos del reproductor hacia Discord.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publica un mensaje y, si se indica, lo borra pasado `delete_after`.
    async fn send(&self, channel_id: ChannelId, content: String, delete_after: Option<Duration>);

    /// El estado del servidor cambió (el panel debe volver a dibujarse).
    fn state_changed(&self, guild_id: GuildId);
}
