//! Dobles en memoria del backend de voz, el resolutor y el notificador.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::oneshot;

use super::{
    notify::Notifier,
    voice::{ActiveTrack, PlaybackEnd, TrackControl, VoiceBackend},
};
use crate::{
    error::{MusicError, MusicResult},
    sources::{PlaylistTail, Resolution, StubEntry, Track, TrackResolver},
};

type Finisher = Arc<Mutex<Option<oneshot::Sender<PlaybackEnd>>>>;

pub fn track(title: &str) -> Track {
    Track {
        title: title.to_string(),
        stream_url: format!("https://cdn.example/{}", title),
        page_url: Some(format!("https://youtu.be/{}", title)),
        duration: Duration::from_secs(180),
        uploader: "Band".to_string(),
        requester: UserId::new(1),
        thumbnail: None,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    channels: Mutex<HashMap<GuildId, ChannelId>>,
    started: Mutex<Vec<String>>,
    finishers: Mutex<Vec<Finisher>>,
    volumes: Arc<Mutex<Vec<f32>>>,
    attempts: AtomicUsize,
    leaves: AtomicUsize,
    fail_all: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    /// Simula que Discord cortó la conexión sin pasar por `leave`.
    pub fn drop_connection(&self, guild_id: GuildId) {
        self.channels.lock().remove(&guild_id);
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.volumes.lock().last().copied()
    }

    /// Termina la última pista iniciada.
    pub fn finish_current(&self) {
        self.finish(PlaybackEnd::default());
    }

    pub fn finish_with_error(&self, error: &str) {
        self.finish(PlaybackEnd {
            error: Some(error.to_string()),
        });
    }

    fn finish(&self, end: PlaybackEnd) {
        let finisher = self.finishers.lock().last().cloned();
        if let Some(sender) = finisher.and_then(|f| f.lock().take()) {
            let _ = sender.send(end);
        }
    }
}

#[async_trait]
impl VoiceBackend for FakeBackend {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<()> {
        self.channels.lock().insert(guild_id, channel_id);
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> MusicResult<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().remove(&guild_id);
        Ok(())
    }

    async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.channels.lock().get(&guild_id).copied()
    }

    async fn play(&self, _guild_id: GuildId, track: &Track, volume: f32) -> MusicResult<ActiveTrack> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(MusicError::Playback(format!("stream caído: {}", track.title)));
        }

        self.started.lock().push(track.title.clone());
        self.volumes.lock().push(volume);

        let (sender, finished) = oneshot::channel();
        let finisher: Finisher = Arc::new(Mutex::new(Some(sender)));
        self.finishers.lock().push(finisher.clone());

        Ok(ActiveTrack {
            control: Box::new(FakeControl {
                finisher,
                volumes: self.volumes.clone(),
            }),
            finished,
        })
    }
}

struct FakeControl {
    finisher: Finisher,
    volumes: Arc<Mutex<Vec<f32>>>,
}

impl TrackControl for FakeControl {
    fn pause(&self) -> MusicResult<()> {
        Ok(())
    }

    fn resume(&self) -> MusicResult<()> {
        Ok(())
    }

    fn stop(&self) -> MusicResult<()> {
        if let Some(sender) = self.finisher.lock().take() {
            let _ = sender.send(PlaybackEnd::default());
        }
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> MusicResult<()> {
        self.volumes.lock().push(volume);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeResolver {
    playlists: Mutex<HashMap<String, (Track, PlaylistTail)>>,
    failing_stubs: Mutex<HashSet<String>>,
    failing_queries: Mutex<HashSet<String>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_playlist(&self, query: &str, first: Track, tail: PlaylistTail) {
        self.playlists.lock().insert(query.to_string(), (first, tail));
    }

    pub fn fail_query(&self, query: &str) {
        self.failing_queries.lock().insert(query.to_string());
    }

    pub fn fail_stub(&self, url: &str) {
        self.failing_stubs.lock().insert(url.to_string());
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Resolution> {
        if self.failing_queries.lock().contains(query) {
            return Err(MusicError::Resolution(format!("sin resultados para '{}'", query)));
        }
        if let Some((first, tail)) = self.playlists.lock().get(query).cloned() {
            return Ok(Resolution {
                track: Track { requester, ..first },
                playlist: Some(tail),
            });
        }

        Ok(Resolution {
            track: Track {
                requester,
                ..track(query)
            },
            playlist: None,
        })
    }

    async fn resolve_stub(&self, stub: &StubEntry, requester: UserId) -> MusicResult<Track> {
        if self.failing_stubs.lock().contains(&stub.url) {
            return Err(MusicError::Resolution(format!("vídeo no disponible: {}", stub.url)));
        }

        Ok(Track {
            requester,
            ..track(stub.display_title())
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(ChannelId, String)>>,
    changes: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|(_, content)| content.clone())
            .collect()
    }

    pub fn change_count(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, channel_id: ChannelId, content: String, _delete_after: Option<Duration>) {
        self.messages.lock().push((channel_id, content));
    }

    fn state_changed(&self, _guild_id: GuildId) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}
