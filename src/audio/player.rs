use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    notify::Notifier,
    queue::{GuildQueue, LoopMode},
    voice::{ActiveTrack, PlaybackEnd, TrackControl, VoiceBackend},
};
use crate::{
    config::Config,
    error::{MusicError, MusicResult},
    sources::{PlaylistTail, Resolution, StubEntry, Track, TrackResolver},
};

const NOW_PLAYING_FALLBACK: Duration = Duration::from_secs(600);
const SHORT_NOTICE: Duration = Duration::from_secs(10);
const PLAYLIST_NOTICE: Duration = Duration::from_secs(20);
const QUEUE_END_NOTICE: Duration = Duration::from_secs(15);
const LEAVE_NOTICE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    /// El backend está abriendo el stream
    Starting,
    Playing,
    Paused,
}

impl PlaybackPhase {
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackPhase::Playing | PlaybackPhase::Paused)
    }
}

/// Canal donde se pidió la música y si los avisos públicos están silenciados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub channel_id: ChannelId,
    pub silent: bool,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub default_volume: u16,
    pub max_queue_size: usize,
    pub idle_timeout: Duration,
    pub playlist_entry_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl From<&Config> for DriverSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume_percent(),
            max_queue_size: config.max_queue_size,
            idle_timeout: config.idle_timeout,
            playlist_entry_delay: config.playlist_entry_delay,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Queued { title: String, position: usize },
    Playlist { title: String, total: usize, first: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Moved,
    AlreadyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseToggle {
    Paused,
    Resumed,
    Started,
}

/// Copia de solo lectura del estado de un servidor para la interfaz.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub current: Option<Track>,
    pub queued: Vec<Track>,
    pub stubs: Vec<StubEntry>,
    pub playlist_title: Option<String>,
    pub phase: PlaybackPhase,
    pub loop_mode: LoopMode,
    pub volume: u16,
    pub muted: bool,
}

impl GuildSnapshot {
    fn from_queue(queue: &GuildQueue, phase: PlaybackPhase) -> Self {
        Self {
            current: queue.current().cloned(),
            queued: queue.tracks().cloned().collect(),
            stubs: queue.stubs().to_vec(),
            playlist_title: queue.playlist_title().map(String::from),
            phase,
            loop_mode: queue.loop_mode(),
            volume: queue.volume(),
            muted: queue.is_muted(),
        }
    }
}

struct GuildState {
    queue: GuildQueue,
    phase: PlaybackPhase,
    /// Se incrementa al iniciar o forzar la parada de una pista
    generation: u64,
    failures: u32,
    control: Option<Box<dyn TrackControl>>,
    origin: Option<Origin>,
    auto_leave: Option<CancellationToken>,
    expansion: Option<CancellationToken>,
    /// Consultas que se están resolviendo ahora mismo
    resolving: usize,
    /// La cola se detuvo por fallos seguidos; lo que queda no retiene al bot
    halted: bool,
}

impl GuildState {
    fn new(settings: &DriverSettings) -> Self {
        Self {
            queue: GuildQueue::new(settings.default_volume, settings.max_queue_size),
            phase: PlaybackPhase::Idle,
            generation: 0,
            failures: 0,
            control: None,
            origin: None,
            auto_leave: None,
            expansion: None,
            resolving: 0,
            halted: false,
        }
    }

    /// Corta la salida e invalida la finalización pendiente.
    fn stop_output(&mut self) {
        self.generation += 1;
        if let Some(control) = self.control.take() {
            if let Err(e) = control.stop() {
                debug!("No se pudo detener la pista: {}", e);
            }
        }
        self.phase = PlaybackPhase::Idle;
    }

    fn apply_volume(&self) {
        if let Some(control) = &self.control {
            if let Err(e) = control.set_volume(self.queue.effective_volume()) {
                warn!("⚠️ No se pudo aplicar el volumen: {}", e);
            }
        }
    }

    fn cancel_auto_leave(&mut self) {
        if let Some(token) = self.auto_leave.take() {
            token.cancel();
        }
    }

    fn cancel_expansion(&mut self) {
        if let Some(token) = self.expansion.take() {
            token.cancel();
        }
    }

    /// Sin nada sonando ni por sonar.
    fn is_idle_and_drained(&self) -> bool {
        self.phase == PlaybackPhase::Idle
            && self.resolving == 0
            && (self.halted || self.queue.is_empty())
            && !self.queue.has_pending_stubs()
    }

    /// Cuenta un fallo. Devuelve `true` al alcanzar el límite (y reinicia el contador).
    fn record_failure(&mut self, limit: u32) -> bool {
        self.failures += 1;
        if self.failures >= limit {
            self.failures = 0;
            true
        } else {
            false
        }
    }
}

enum Next {
    Start {
        track: Track,
        volume: f32,
        generation: u64,
        origin: Option<Origin>,
    },
    Exhausted {
        origin: Option<Origin>,
        pending_stubs: bool,
        loop_queue: bool,
    },
}

/// Motor de reproducción: una cola por servidor y las transiciones
/// Idle → Playing → (Paused ⇄ Playing) → Idle.
pub struct PlaybackDriver {
    guilds: DashMap<GuildId, Arc<Mutex<GuildState>>>,
    backend: Arc<dyn VoiceBackend>,
    resolver: Arc<dyn TrackResolver>,
    notifier: Arc<dyn Notifier>,
    settings: DriverSettings,
}

impl PlaybackDriver {
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        resolver: Arc<dyn TrackResolver>,
        notifier: Arc<dyn Notifier>,
        settings: DriverSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            guilds: DashMap::new(),
            backend,
            resolver,
            notifier,
            settings,
        })
    }

    fn state(&self, guild_id: GuildId) -> Arc<Mutex<GuildState>> {
        let entry = self
            .guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildState::new(&self.settings))));
        Arc::clone(entry.value())
    }

    fn existing(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildState>>> {
        self.guilds.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    async fn announce(&self, origin: Option<Origin>, content: String, delete_after: Duration) {
        if let Some(origin) = origin.filter(|origin| !origin.silent) {
            self.notifier
                .send(origin.channel_id, content, Some(delete_after))
                .await;
        }
    }

    pub async fn connected_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.backend.current_channel(guild_id).await
    }

    /// Une o mueve el bot al canal de voz.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> MusicResult<JoinOutcome> {
        let outcome = match self.backend.current_channel(guild_id).await {
            Some(current) if current == channel_id => return Ok(JoinOutcome::AlreadyConnected),
            Some(_) => JoinOutcome::Moved,
            None => JoinOutcome::Joined,
        };

        self.backend.join(guild_id, channel_id).await?;
        self.notifier.state_changed(guild_id);
        Ok(outcome)
    }

    /// Conecta, resuelve, encola y arranca si el reproductor está libre.
    pub async fn play_query(
        self: &Arc<Self>,
        guild_id: GuildId,
        voice_channel: ChannelId,
        query: &str,
        requester: UserId,
        origin: Origin,
    ) -> MusicResult<PlayOutcome> {
        self.join(guild_id, voice_channel).await?;

        let pending = self.state(guild_id);
        pending.lock().resolving += 1;
        let resolved = self.resolver.resolve(query, requester).await;
        pending.lock().resolving -= 1;

        // El estado pudo limpiarse mientras se resolvía la consulta
        let state = self.state(guild_id);
        let queued = resolved.and_then(|Resolution { track, playlist }| {
            Self::enqueue_resolution(&mut state.lock(), origin, track, playlist)
        });
        let (outcome, expansion) = match queued {
            Ok(queued) => queued,
            Err(e) => {
                self.rearm_auto_leave(guild_id, "petición fallida");
                return Err(e);
            }
        };

        let (message, delete_after) = match &outcome {
            PlayOutcome::Queued { title, .. } => {
                (format!("✅ Añadido a la cola: **{}**", title), SHORT_NOTICE)
            }
            PlayOutcome::Playlist { title, total, .. } => (
                format!(
                    "▶️ Reproduciendo la primera canción de la playlist **'{}'** ({} canciones)...",
                    title, total
                ),
                PLAYLIST_NOTICE,
            ),
        };
        self.announce(Some(origin), message, delete_after).await;
        self.notifier.state_changed(guild_id);

        self.advance(guild_id).await;

        if let Some((token, title)) = expansion {
            self.spawn_expansion(guild_id, token, requester, title, origin);
        }

        Ok(outcome)
    }

    /// Encola la pista resuelta y prepara la expansión de la playlist, si la hay.
    fn enqueue_resolution(
        s: &mut GuildState,
        origin: Origin,
        track: Track,
        playlist: Option<PlaylistTail>,
    ) -> MusicResult<(PlayOutcome, Option<(CancellationToken, String)>)> {
        let first_title = track.title.clone();
        let position = s.queue.enqueue(track)?;
        s.origin = Some(origin);
        s.cancel_auto_leave();

        let Some(tail) = playlist else {
            let outcome = PlayOutcome::Queued {
                title: first_title,
                position,
            };
            return Ok((outcome, None));
        };

        s.cancel_expansion();
        s.queue.clear_stubs();

        let outcome = PlayOutcome::Playlist {
            title: tail.title.clone(),
            total: tail.total,
            first: first_title,
        };
        if tail.stubs.is_empty() {
            return Ok((outcome, None));
        }

        let token = CancellationToken::new();
        s.expansion = Some(token.clone());
        s.queue.set_stubs(tail.title.clone(), tail.stubs);
        Ok((outcome, Some((token, tail.title))))
    }

    /// `play` sin consulta: reanuda o arranca la cola. `None` si hace falta una consulta.
    pub async fn resume_or_start(self: &Arc<Self>, guild_id: GuildId) -> MusicResult<Option<PauseToggle>> {
        let Some(state) = self.existing(guild_id) else {
            return Ok(None);
        };

        let (phase, has_queue) = {
            let s = state.lock();
            (s.phase, !s.queue.is_empty())
        };

        match phase {
            PlaybackPhase::Paused => {
                self.resume(guild_id)?;
                Ok(Some(PauseToggle::Resumed))
            }
            PlaybackPhase::Idle if has_queue => {
                self.advance(guild_id).await;
                Ok(Some(PauseToggle::Started))
            }
            _ => Ok(None),
        }
    }

    /// Avanza la cola si no hay nada sonando.
    pub async fn advance(self: &Arc<Self>, guild_id: GuildId) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };
        {
            let mut s = state.lock();
            s.cancel_auto_leave();
            s.halted = false;
        }

        loop {
            if self.backend.current_channel(guild_id).await.is_none() {
                {
                    let mut s = state.lock();
                    if s.phase == PlaybackPhase::Idle {
                        s.queue.take_current();
                    }
                }
                debug!("Guild {} sin conexión de voz, no se avanza la cola", guild_id);
                self.notifier.state_changed(guild_id);
                return;
            }

            let next = {
                let mut s = state.lock();
                if s.phase != PlaybackPhase::Idle {
                    return;
                }
                match s.queue.pop_next() {
                    Some(track) => {
                        s.phase = PlaybackPhase::Starting;
                        s.generation += 1;
                        Next::Start {
                            track,
                            volume: s.queue.effective_volume(),
                            generation: s.generation,
                            origin: s.origin,
                        }
                    }
                    None => Next::Exhausted {
                        origin: s.origin,
                        pending_stubs: s.queue.has_pending_stubs(),
                        loop_queue: s.queue.loop_mode() == LoopMode::Queue,
                    },
                }
            };

            let (track, volume, generation, origin) = match next {
                Next::Start {
                    track,
                    volume,
                    generation,
                    origin,
                } => (track, volume, generation, origin),
                Next::Exhausted {
                    origin,
                    pending_stubs,
                    loop_queue,
                } => {
                    debug!("📭 Cola vacía en guild {}", guild_id);
                    if !pending_stubs {
                        self.announce(
                            origin,
                            "🎶 **No hay más canciones en la cola**".to_string(),
                            QUEUE_END_NOTICE,
                        )
                        .await;
                    }
                    if !loop_queue {
                        self.schedule_auto_leave(guild_id, "cola vacía");
                    }
                    self.notifier.state_changed(guild_id);
                    return;
                }
            };

            match self.backend.play(guild_id, &track, volume).await {
                Ok(ActiveTrack { control, finished }) => {
                    let stale = {
                        let mut s = state.lock();
                        if s.generation != generation || s.phase != PlaybackPhase::Starting {
                            Some(control)
                        } else {
                            s.phase = PlaybackPhase::Playing;
                            s.control = Some(control);
                            // El volumen pudo cambiar mientras se abría el stream
                            s.apply_volume();
                            None
                        }
                    };
                    if let Some(control) = stale {
                        debug!("Pista {} descartada: la reproducción se detuvo al iniciar", track.title);
                        let _ = control.stop();
                        return;
                    }

                    info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title);
                    self.spawn_completion_waiter(guild_id, generation, finished);

                    let delete_after = if track.is_live() {
                        NOW_PLAYING_FALLBACK
                    } else {
                        track.duration
                    };
                    self.announce(
                        origin,
                        format!("🎶 Reproduciendo: **{}**", track.title),
                        delete_after,
                    )
                    .await;
                    self.notifier.state_changed(guild_id);
                    return;
                }
                Err(e) => {
                    error!("❌ No se pudo iniciar {} en guild {}: {}", track.title, guild_id, e);
                    let give_up = {
                        let mut s = state.lock();
                        if s.generation != generation {
                            return;
                        }
                        s.queue.take_current();
                        s.phase = PlaybackPhase::Idle;
                        let give_up = s.record_failure(self.settings.max_consecutive_failures);
                        s.halted = give_up;
                        give_up
                    };

                    self.announce(
                        origin,
                        format!("❌ No se pudo reproducir **{}**: {}", track.title, e),
                        SHORT_NOTICE,
                    )
                    .await;

                    if give_up {
                        self.give_up(guild_id, origin).await;
                        return;
                    }
                }
            }
        }
    }

    async fn give_up(self: &Arc<Self>, guild_id: GuildId, origin: Option<Origin>) {
        warn!("🛑 Demasiados fallos seguidos en guild {}, se detiene la cola", guild_id);
        self.announce(
            origin,
            "⚠️ Demasiados errores seguidos, reproducción detenida. Usa `play` para continuar.".to_string(),
            SHORT_NOTICE,
        )
        .await;
        self.schedule_auto_leave(guild_id, "fallos consecutivos");
        self.notifier.state_changed(guild_id);
    }

    fn spawn_completion_waiter(
        self: &Arc<Self>,
        guild_id: GuildId,
        generation: u64,
        finished: oneshot::Receiver<PlaybackEnd>,
    ) {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            // Un emisor descartado equivale a un final sin error
            let end = finished.await.unwrap_or_default();
            driver.on_track_end(guild_id, generation, end).await;
        });
    }

    async fn on_track_end(self: &Arc<Self>, guild_id: GuildId, generation: u64, end: PlaybackEnd) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let (origin, give_up) = {
            let mut s = state.lock();
            if s.generation != generation || !s.phase.is_active() {
                debug!("Finalización obsoleta ignorada en guild {}", guild_id);
                return;
            }
            s.control = None;
            s.phase = PlaybackPhase::Idle;

            let give_up = if end.error.is_some() {
                // Un stream roto no se repite aunque haya bucle
                s.queue.take_current();
                let give_up = s.record_failure(self.settings.max_consecutive_failures);
                s.halted = give_up;
                give_up
            } else {
                s.failures = 0;
                s.queue.finish_current();
                false
            };
            (s.origin, give_up)
        };

        if let Some(error) = end.error {
            warn!("⚠️ Error durante la reproducción en guild {}: {}", guild_id, error);
            self.announce(
                origin,
                format!("⚠️ Hubo un problema durante la reproducción ({})", error),
                SHORT_NOTICE,
            )
            .await;
        }

        if give_up {
            self.give_up(guild_id, origin).await;
            return;
        }

        self.advance(guild_id).await;
    }

    /// Programa la desconexión por inactividad, reemplazando la anterior.
    pub fn schedule_auto_leave(self: &Arc<Self>, guild_id: GuildId, reason: &'static str) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let token = CancellationToken::new();
        {
            let mut s = state.lock();
            s.cancel_auto_leave();
            s.auto_leave = Some(token.clone());
        }

        debug!(
            "⏲️ Desconexión automática en {}s para guild {} ({})",
            self.settings.idle_timeout.as_secs(),
            guild_id,
            reason
        );

        let driver = Arc::clone(self);
        let timeout = self.settings.idle_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    driver.leave_if_idle(guild_id, token, reason).await;
                }
            }
        });
    }

    /// Vuelve a programar la desconexión si el servidor quedó sin nada que reproducir.
    fn rearm_auto_leave(self: &Arc<Self>, guild_id: GuildId, reason: &'static str) {
        let idle = self
            .existing(guild_id)
            .is_some_and(|state| state.lock().is_idle_and_drained());
        if idle {
            self.schedule_auto_leave(guild_id, reason);
        }
    }

    async fn leave_if_idle(&self, guild_id: GuildId, token: CancellationToken, reason: &str) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let origin = {
            let s = state.lock();
            if token.is_cancelled() || !s.is_idle_and_drained() {
                return;
            }
            s.origin
        };

        self.teardown(guild_id);
        if self.backend.current_channel(guild_id).await.is_none() {
            debug!("Guild {} ya estaba desconectado de voz", guild_id);
            return;
        }

        info!("💤 Desconexión automática de guild {} ({})", guild_id, reason);
        if let Err(e) = self.backend.leave(guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {}", guild_id, e);
        }
        self.announce(
            origin,
            "👋 Me desconecté del canal de voz por inactividad".to_string(),
            LEAVE_NOTICE,
        )
        .await;
    }

    /// Elimina el estado del servidor: corta la salida y cancela las tareas.
    pub fn teardown(&self, guild_id: GuildId) {
        if let Some((_, state)) = self.guilds.remove(&guild_id) {
            let mut s = state.lock();
            s.cancel_auto_leave();
            s.cancel_expansion();
            s.stop_output();
            info!("🧹 Estado de reproducción limpiado para guild {}", guild_id);
        }
        self.notifier.state_changed(guild_id);
    }

    pub async fn disconnect(&self, guild_id: GuildId) -> MusicResult<()> {
        if self.backend.current_channel(guild_id).await.is_none() {
            return Err(MusicError::NotConnected);
        }
        self.teardown(guild_id);
        self.backend.leave(guild_id).await
    }

    pub fn pause(&self, guild_id: GuildId) -> MusicResult<()> {
        let state = self.existing(guild_id).ok_or(MusicError::NothingPlaying)?;
        {
            let mut s = state.lock();
            if s.phase != PlaybackPhase::Playing {
                return Err(MusicError::NothingPlaying);
            }
            s.control.as_ref().ok_or(MusicError::NothingPlaying)?.pause()?;
            s.phase = PlaybackPhase::Paused;
        }
        info!("⏸️ Reproducción pausada en guild {}", guild_id);
        self.notifier.state_changed(guild_id);
        Ok(())
    }

    pub fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        let state = self.existing(guild_id).ok_or(MusicError::NothingPaused)?;
        {
            let mut s = state.lock();
            if s.phase != PlaybackPhase::Paused {
                return Err(MusicError::NothingPaused);
            }
            s.control.as_ref().ok_or(MusicError::NothingPaused)?.resume()?;
            s.phase = PlaybackPhase::Playing;
            s.cancel_auto_leave();
        }
        info!("▶️ Reproducción reanudada en guild {}", guild_id);
        self.notifier.state_changed(guild_id);
        Ok(())
    }

    /// Botón de reproducir/pausar del panel.
    pub async fn toggle_pause(self: &Arc<Self>, guild_id: GuildId) -> MusicResult<PauseToggle> {
        let phase = self.snapshot(guild_id).phase;
        match phase {
            PlaybackPhase::Playing => self.pause(guild_id).map(|_| PauseToggle::Paused),
            PlaybackPhase::Paused => self.resume(guild_id).map(|_| PauseToggle::Resumed),
            PlaybackPhase::Starting => Err(MusicError::NothingPlaying),
            PlaybackPhase::Idle => self
                .resume_or_start(guild_id)
                .await?
                .ok_or(MusicError::NothingPlaying),
        }
    }

    /// Detiene la salida, vacía la cola y los stubs y quita la repetición.
    pub async fn stop(self: &Arc<Self>, guild_id: GuildId) -> MusicResult<()> {
        if self.backend.current_channel(guild_id).await.is_none() {
            return Err(MusicError::NotConnected);
        }

        let state = self.state(guild_id);
        {
            let mut s = state.lock();
            s.cancel_expansion();
            s.stop_output();
            s.queue.clear();
            s.queue.take_current();
            s.queue.set_loop_mode(LoopMode::Off);
            s.failures = 0;
        }

        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        self.schedule_auto_leave(guild_id, "stop");
        self.notifier.state_changed(guild_id);
        Ok(())
    }

    /// Corta la pista actual; la finalización aplica la política de repetición.
    pub fn skip(&self, guild_id: GuildId) -> MusicResult<Track> {
        let state = self.existing(guild_id).ok_or(MusicError::NothingPlaying)?;
        let skipped = {
            let mut s = state.lock();
            if !s.phase.is_active() {
                return Err(MusicError::NothingPlaying);
            }
            let current = s.queue.current().cloned().ok_or(MusicError::NothingPlaying)?;
            s.cancel_auto_leave();
            if let Some(control) = &s.control {
                control.stop()?;
            }
            current
        };

        info!("⏭️ Saltada en guild {}: {}", guild_id, skipped.title);
        Ok(skipped)
    }

    pub fn toggle_loop(&self, guild_id: GuildId) -> LoopMode {
        let mode = self.state(guild_id).lock().queue.cycle_loop();
        info!("🔁 Modo de repetición en guild {}: {:?}", guild_id, mode);
        self.notifier.state_changed(guild_id);
        mode
    }

    /// Devuelve `true` si quedó silenciado.
    pub fn toggle_mute(&self, guild_id: GuildId) -> bool {
        let muted = {
            let state = self.state(guild_id);
            let mut s = state.lock();
            let muted = s.queue.toggle_mute();
            s.apply_volume();
            muted
        };
        self.notifier.state_changed(guild_id);
        muted
    }

    /// Ajusta el volumen lógico. Silenciado, solo cambia el nivel recordado.
    pub fn adjust_volume(&self, guild_id: GuildId, delta: i16) -> u16 {
        let volume = {
            let state = self.state(guild_id);
            let mut s = state.lock();
            let volume = s.queue.adjust_volume(delta);
            s.apply_volume();
            volume
        };
        debug!("🔊 Volumen en guild {}: {}%", guild_id, volume);
        self.notifier.state_changed(guild_id);
        volume
    }

    /// Vacía la cola y los stubs. La canción actual sigue sonando.
    pub fn clear(self: &Arc<Self>, guild_id: GuildId) -> usize {
        let removed = match self.existing(guild_id) {
            Some(state) => {
                let mut s = state.lock();
                s.cancel_expansion();
                s.queue.clear()
            }
            None => 0,
        };
        info!("🗑️ {} canciones eliminadas de la cola en guild {}", removed, guild_id);
        // Un temporizador anterior pudo rendirse mientras quedaban stubs
        self.rearm_auto_leave(guild_id, "cola vaciada");
        self.notifier.state_changed(guild_id);
        removed
    }

    pub fn snapshot(&self, guild_id: GuildId) -> GuildSnapshot {
        match self.existing(guild_id) {
            Some(state) => {
                let s = state.lock();
                GuildSnapshot::from_queue(&s.queue, s.phase)
            }
            None => GuildSnapshot::from_queue(
                &GuildQueue::new(self.settings.default_volume, self.settings.max_queue_size),
                PlaybackPhase::Idle,
            ),
        }
    }

    /// `true` si el bot puede irse al quedarse solo: sin reproducir, cola vacía y sin bucle.
    pub fn is_idle_without_loop(&self, guild_id: GuildId) -> bool {
        match self.existing(guild_id) {
            Some(state) => {
                let s = state.lock();
                s.phase == PlaybackPhase::Idle
                    && s.queue.is_empty()
                    && s.queue.loop_mode() == LoopMode::Off
            }
            None => true,
        }
    }

    /// Registra el servidor aunque todavía no tenga cola (p. ej. tras `join`).
    pub fn ensure_state(&self, guild_id: GuildId) {
        self.state(guild_id);
    }

    fn spawn_expansion(
        self: &Arc<Self>,
        guild_id: GuildId,
        token: CancellationToken,
        requester: UserId,
        title: String,
        origin: Origin,
    ) {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            driver
                .run_expansion(guild_id, token, requester, title, origin)
                .await;
        });
    }

    /// Resuelve los stubs de uno en uno y los añade a la cola viva.
    async fn run_expansion(
        self: &Arc<Self>,
        guild_id: GuildId,
        token: CancellationToken,
        requester: UserId,
        title: String,
        origin: Origin,
    ) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };
        let stubs: Vec<StubEntry> = state.lock().queue.stubs().to_vec();
        info!(
            "📥 Expandiendo playlist '{}' en guild {}: {} entradas",
            title,
            guild_id,
            stubs.len()
        );

        let mut added = 0usize;
        for stub in stubs {
            if token.is_cancelled() || self.backend.current_channel(guild_id).await.is_none() {
                break;
            }

            let resolved = tokio::select! {
                _ = token.cancelled() => break,
                result = self.resolver.resolve_stub(&stub, requester) => result,
            };

            let (start_now, queue_full) = {
                let mut s = state.lock();
                if token.is_cancelled() {
                    break;
                }
                s.queue.remove_stub(&stub);
                match resolved {
                    Ok(track) => match s.queue.enqueue(track) {
                        Ok(_) => {
                            added += 1;
                            (s.phase == PlaybackPhase::Idle, false)
                        }
                        Err(e) => {
                            warn!("⚠️ {}", e);
                            (false, true)
                        }
                    },
                    Err(e) => {
                        warn!("⚠️ Se omitió '{}' de la playlist: {}", stub.display_title(), e);
                        (false, false)
                    }
                }
            };

            if start_now {
                self.advance(guild_id).await;
            }
            self.notifier.state_changed(guild_id);

            if queue_full {
                break;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.settings.playlist_entry_delay) => {}
            }
        }

        if token.is_cancelled() {
            debug!("Expansión de '{}' cancelada en guild {}", title, guild_id);
            return;
        }

        let idle_and_empty = {
            let mut s = state.lock();
            s.queue.clear_stubs();
            s.expansion = None;
            s.phase == PlaybackPhase::Idle
                && s.queue.is_empty()
                && s.queue.loop_mode() != LoopMode::Queue
        };

        info!("✅ Playlist '{}': {} canciones añadidas en guild {}", title, added, guild_id);
        if added > 0 {
            self.announce(
                Some(origin),
                format!(
                    "✅ Se añadieron {} canciones restantes de la playlist **'{}'**",
                    added, title
                ),
                QUEUE_END_NOTICE,
            )
            .await;
        }
        if idle_and_empty {
            self.schedule_auto_leave(guild_id, "playlist sin canciones");
        }
        self.notifier.state_changed(guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{track, FakeBackend, FakeResolver, RecordingNotifier};
    use pretty_assertions::assert_eq;

    const GUILD: u64 = 100;
    const VOICE: u64 = 200;
    const TEXT: u64 = 300;

    struct Harness {
        driver: Arc<PlaybackDriver>,
        backend: Arc<FakeBackend>,
        resolver: Arc<FakeResolver>,
        notifier: Arc<RecordingNotifier>,
    }

    fn settings() -> DriverSettings {
        DriverSettings {
            default_volume: 70,
            max_queue_size: 100,
            idle_timeout: Duration::from_secs(60),
            playlist_entry_delay: Duration::from_millis(100),
            max_consecutive_failures: 5,
        }
    }

    fn harness() -> Harness {
        harness_with(settings())
    }

    fn harness_with(settings: DriverSettings) -> Harness {
        let backend = FakeBackend::new();
        let resolver = FakeResolver::new();
        let notifier = RecordingNotifier::new();
        let driver = PlaybackDriver::new(
            backend.clone(),
            resolver.clone(),
            notifier.clone(),
            settings,
        );
        Harness {
            driver,
            backend,
            resolver,
            notifier,
        }
    }

    fn guild() -> GuildId {
        GuildId::new(GUILD)
    }

    fn origin() -> Origin {
        Origin {
            channel_id: ChannelId::new(TEXT),
            silent: false,
        }
    }

    impl Harness {
        async fn try_play(&self, query: &str) -> MusicResult<PlayOutcome> {
            self.driver
                .play_query(guild(), ChannelId::new(VOICE), query, UserId::new(1), origin())
                .await
        }

        async fn play(&self, query: &str) -> PlayOutcome {
            self.try_play(query).await.unwrap()
        }

        fn queued(&self) -> Vec<String> {
            self.driver
                .snapshot(guild())
                .queued
                .iter()
                .map(|t| t.title.clone())
                .collect()
        }

        fn current(&self) -> Option<String> {
            self.driver.snapshot(guild()).current.map(|t| t.title)
        }
    }

    /// Deja correr todas las tareas pendientes.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_play_starts_and_rest_queue() {
        let h = harness();
        h.play("a").await;
        h.play("b").await;

        assert_eq!(h.backend.started(), vec!["a"]);
        assert_eq!(h.current().as_deref(), Some("a"));
        assert_eq!(h.queued(), vec!["b"]);

        h.backend.finish_current();
        settle().await;

        assert_eq!(h.backend.started(), vec!["a", "b"]);
        assert!(h.queued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_track_replays_finished_track() {
        let h = harness();
        h.play("a").await;
        h.play("b").await;
        assert_eq!(h.driver.toggle_loop(guild()), LoopMode::Track);

        h.backend.finish_current();
        settle().await;

        assert_eq!(h.backend.started(), vec!["a", "a"]);
        assert_eq!(h.queued(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_queue_moves_finished_to_tail() {
        let h = harness();
        for name in ["a", "b", "c"] {
            h.play(name).await;
        }
        h.driver.toggle_loop(guild());
        h.driver.toggle_loop(guild());

        for _ in 0..3 {
            h.backend.finish_current();
            settle().await;
        }

        assert_eq!(h.backend.started(), vec!["a", "b", "c", "a"]);
        assert_eq!(h.queued(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_advances_to_next() {
        let h = harness();
        h.play("a").await;
        h.play("b").await;

        let skipped = h.driver.skip(guild()).unwrap();
        assert_eq!(skipped.title, "a");
        settle().await;

        assert_eq!(h.current().as_deref(), Some("b"));
        assert!(matches!(
            h.driver.skip(GuildId::new(999)),
            Err(MusicError::NothingPlaying)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_transitions() {
        let h = harness();
        assert!(matches!(h.driver.pause(guild()), Err(MusicError::NothingPlaying)));

        h.play("a").await;
        h.driver.pause(guild()).unwrap();
        assert_eq!(h.driver.snapshot(guild()).phase, PlaybackPhase::Paused);
        assert!(matches!(h.driver.pause(guild()), Err(MusicError::NothingPlaying)));

        h.driver.resume(guild()).unwrap();
        assert_eq!(h.driver.snapshot(guild()).phase, PlaybackPhase::Playing);
        assert!(matches!(h.driver.resume(guild()), Err(MusicError::NothingPaused)));

        assert_eq!(h.driver.toggle_pause(guild()).await.unwrap(), PauseToggle::Paused);
        assert_eq!(h.driver.toggle_pause(guild()).await.unwrap(), PauseToggle::Resumed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_and_mute_reach_output() {
        let h = harness();
        h.play("a").await;
        assert_eq!(h.backend.last_volume(), Some(0.7));

        assert_eq!(h.driver.adjust_volume(guild(), 10), 80);
        assert_eq!(h.backend.last_volume(), Some(0.8));

        assert!(h.driver.toggle_mute(guild()));
        assert_eq!(h.backend.last_volume(), Some(0.0));

        assert_eq!(h.driver.adjust_volume(guild(), 10), 90);
        assert_eq!(h.backend.last_volume(), Some(0.0));

        assert!(!h.driver.toggle_mute(guild()));
        assert_eq!(h.backend.last_volume(), Some(0.9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playlist_expands_in_original_order() {
        let h = harness();
        let stubs = (1..=4)
            .map(|i| StubEntry {
                id: Some(format!("id{}", i)),
                title: Some(format!("s{}", i)),
                url: format!("https://youtu.be/s{}", i),
            })
            .collect();
        h.resolver.add_playlist(
            "mix",
            track("first"),
            PlaylistTail {
                title: "Mix".to_string(),
                total: 5,
                stubs,
            },
        );

        let outcome = h.play("mix").await;
        assert_eq!(
            outcome,
            PlayOutcome::Playlist {
                title: "Mix".to_string(),
                total: 5,
                first: "first".to_string()
            }
        );
        assert_eq!(h.driver.snapshot(guild()).stubs.len(), 4);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.current().as_deref(), Some("first"));
        assert_eq!(h.queued(), vec!["s1", "s2", "s3", "s4"]);
        assert!(h.driver.snapshot(guild()).stubs.is_empty());
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("4 canciones restantes")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expansion_skips_failed_stub_and_restarts_idle_driver() {
        let h = harness();
        let stubs = vec![
            StubEntry {
                id: None,
                title: Some("broken".into()),
                url: "https://youtu.be/broken".into(),
            },
            StubEntry {
                id: None,
                title: Some("ok".into()),
                url: "https://youtu.be/ok".into(),
            },
        ];
        h.resolver.fail_stub("https://youtu.be/broken");
        h.resolver.add_playlist(
            "list",
            track("first"),
            PlaylistTail {
                title: "List".into(),
                total: 3,
                stubs,
            },
        );

        h.play("list").await;
        h.backend.finish_current();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.backend.started(), vec!["first", "ok"]);
        assert!(h.queued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_queue_disconnects_exactly_once() {
        let h = harness();
        h.play("a").await;
        h.backend.finish_current();
        settle().await;

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(h.backend.leave_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.backend.leave_count(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.backend.leave_count(), 1);
        assert!(h.current().is_none());
        assert!(h.notifier.messages().iter().any(|m| m.contains("inactividad")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_play_cancels_pending_auto_leave() {
        let h = harness();
        h.play("a").await;
        h.backend.finish_current();
        settle().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.play("b").await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.backend.leave_count(), 0);
        assert_eq!(h.current().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_queue_and_resets_loop() {
        let h = harness();
        h.play("a").await;
        h.play("b").await;
        h.driver.toggle_loop(guild());

        h.driver.stop(guild()).await.unwrap();
        settle().await;

        let snapshot = h.driver.snapshot(guild());
        assert!(snapshot.current.is_none());
        assert!(snapshot.queued.is_empty());
        assert_eq!(snapshot.loop_mode, LoopMode::Off);
        assert_eq!(snapshot.phase, PlaybackPhase::Idle);
        // La finalización de la pista detenida no debe arrancar nada
        assert_eq!(h.backend.started(), vec!["a"]);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.backend.leave_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_keeps_current_track() {
        let h = harness();
        for name in ["a", "b", "c"] {
            h.play(name).await;
        }

        assert_eq!(h.driver.clear(guild()), 2);
        assert_eq!(h.current().as_deref(), Some("a"));
        assert!(h.queued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_start_failures_are_capped() {
        let h = harness();
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            h.play(name).await;
        }
        h.backend.fail_all(true);

        h.backend.finish_current();
        settle().await;

        assert_eq!(h.backend.attempts(), 6);
        assert_eq!(h.queued(), vec!["g"]);
        assert_eq!(h.driver.snapshot(guild()).phase, PlaybackPhase::Idle);
        assert!(h.notifier.messages().iter().any(|m| m.contains("Demasiados errores")));

        // Lo que quedó en la cola no retiene al bot en el canal
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.backend.leave_count(), 1);
        assert!(h.driver.connected_channel(guild()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_on_fresh_join_still_leaves() {
        let h = harness();
        h.resolver.fail_query("nada");

        assert!(matches!(
            h.try_play("nada").await,
            Err(MusicError::Resolution(_))
        ));
        assert_eq!(
            h.driver.connected_channel(guild()).await,
            Some(ChannelId::new(VOICE))
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.backend.leave_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_keeps_idle_countdown() {
        let h = harness();
        h.resolver.fail_query("nada");
        h.play("a").await;
        h.backend.finish_current();
        settle().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(h.try_play("nada").await.is_err());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.backend.leave_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejection_keeps_playback() {
        let h = harness_with(DriverSettings {
            max_queue_size: 1,
            ..settings()
        });
        h.play("a").await;
        h.play("b").await;

        assert!(matches!(h.try_play("c").await, Err(MusicError::QueueFull(1))));
        assert_eq!(h.current().as_deref(), Some("a"));
        assert_eq!(h.queued(), vec!["b"]);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.backend.leave_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_idle_with_stubs_rearms_auto_leave() {
        let h = harness_with(DriverSettings {
            playlist_entry_delay: Duration::from_secs(120),
            ..settings()
        });
        let stubs = ["s1", "s2"]
            .into_iter()
            .map(|name| StubEntry {
                id: None,
                title: Some(name.to_string()),
                url: format!("https://youtu.be/{}", name),
            })
            .collect();
        h.resolver.add_playlist(
            "list",
            track("first"),
            PlaylistTail {
                title: "List".into(),
                total: 3,
                stubs,
            },
        );
        h.backend.fail_all(true);

        h.play("list").await;
        settle().await;

        // El temporizador vence con stubs pendientes y no desconecta
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(h.backend.leave_count(), 0);
        assert_eq!(h.driver.snapshot(guild()).stubs.len(), 1);

        h.driver.clear(guild());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.backend.leave_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_leave_is_quiet_when_already_disconnected() {
        let h = harness();
        h.play("a").await;
        h.backend.finish_current();
        settle().await;

        h.backend.drop_connection(guild());
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(h.backend.leave_count(), 0);
        assert!(!h.notifier.messages().iter().any(|m| m.contains("inactividad")));
        assert!(h.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_errored_track_is_not_looped() {
        let h = harness();
        h.play("a").await;
        h.play("b").await;
        h.driver.toggle_loop(guild());

        h.backend.finish_with_error("connection reset");
        settle().await;

        assert_eq!(h.backend.started(), vec!["a", "b"]);
        assert!(h.queued().is_empty());
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("connection reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_requires_connection() {
        let h = harness();
        assert!(matches!(
            h.driver.disconnect(guild()).await,
            Err(MusicError::NotConnected)
        ));

        h.play("a").await;
        h.driver.disconnect(guild()).await.unwrap();
        settle().await;

        assert_eq!(h.backend.leave_count(), 1);
        assert!(h.driver.connected_channel(guild()).await.is_none());
        assert!(h.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_origin_suppresses_announcements() {
        let h = harness();
        h.driver
            .play_query(
                guild(),
                ChannelId::new(VOICE),
                "quiet",
                UserId::new(1),
                Origin {
                    channel_id: ChannelId::new(TEXT),
                    silent: true,
                },
            )
            .await
            .unwrap();

        assert!(h.notifier.messages().is_empty());
        assert!(h.notifier.change_count() > 0);
    }
}
