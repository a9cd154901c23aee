use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    error::{MusicError, MusicResult},
    sources::Track,
};

/// Fin de una canción. `error` viene relleno si el stream falló.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackEnd {
    pub error: Option<String>,
}

/// Control síncrono sobre la pista que está sonando.
pub trait TrackControl: Send + Sync {
    fn pause(&self) -> MusicResult<()>;
    fn resume(&self) -> MusicResult<()>;
    fn stop(&self) -> MusicResult<()>;
    fn set_volume(&self, volume: f32) -> MusicResult<()>;
}

/// Pista iniciada y el futuro que se completa cuando termina.
pub struct ActiveTrack {
    pub control: Box<dyn TrackControl>,
    pub finished: oneshot::Receiver<PlaybackEnd>,
}

#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Une o mueve el bot al canal indicado.
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()>;

    async fn leave(&self, guild_id: GuildId) -> MusicResult<()>;

    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId>;

    async fn play(&self, guild_id: GuildId, track: &Track, volume: f32) -> MusicResult<ActiveTrack>;
}

pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>) -> MusicResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MusicError::Playback(format!("cliente HTTP: {}", e)))?;

        Ok(Self { manager, http })
    }
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))?;

        // El bot siempre entra ensordecido
        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("⚠️ No se pudo ensordecer al bot en guild {}: {}", guild_id, e);
        }

        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        match self.manager.remove(guild_id).await {
            Ok(()) => {
                info!("👋 Desconectado de guild {}", guild_id);
                Ok(())
            }
            Err(songbird::error::JoinError::NoCall) => Ok(()),
            Err(e) => Err(MusicError::Connection(e.to_string())),
        }
    }

    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    async fn play(&self, guild_id: GuildId, track: &Track, volume: f32) -> MusicResult<ActiveTrack> {
        let call = self.manager.get(guild_id).ok_or(MusicError::NotConnected)?;

        let input = HttpRequest::new(self.http.clone(), track.stream_url.clone());
        let handle = {
            let mut call = call.lock().await;
            call.play_input(input.into())
        };

        let control = SongbirdTrack(handle);
        control.set_volume(volume)?;

        let (sender, finished) = oneshot::channel();
        let notifier = TrackEndNotifier {
            sender: Arc::new(parking_lot::Mutex::new(Some(sender))),
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            control
                .0
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| MusicError::Playback(format!("no se pudo registrar el evento: {}", e)))?;
        }

        debug!("▶️ Stream iniciado en guild {}: {}", guild_id, track.title);
        Ok(ActiveTrack {
            control: Box::new(control),
            finished,
        })
    }
}

struct SongbirdTrack(TrackHandle);

impl TrackControl for SongbirdTrack {
    fn pause(&self) -> MusicResult<()> {
        self.0.pause().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn resume(&self) -> MusicResult<()> {
        self.0.play().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn stop(&self) -> MusicResult<()> {
        self.0.stop().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.0
            .set_volume(volume)
            .map_err(|e| MusicError::Playback(e.to_string()))
    }
}

/// Entrega un único [`PlaybackEnd`] aunque lleguen `End` y `Error`.
#[derive(Clone)]
struct TrackEndNotifier {
    sender: Arc<parking_lot::Mutex<Option<oneshot::Sender<PlaybackEnd>>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(states) => states.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(e.to_string()),
                _ => None,
            }),
            _ => None,
        };

        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(PlaybackEnd { error });
        }

        None
    }
}
