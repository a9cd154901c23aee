use std::collections::VecDeque;
use tracing::{debug, info};

use crate::{
    error::{MusicError, MusicResult},
    sources::{StubEntry, Track},
};

pub const VOLUME_STEP: i16 = 10;
pub const MAX_VOLUME: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// off → track → queue → off
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LoopMode::Off => "Desactivado",
            LoopMode::Track => "Canción",
            LoopMode::Queue => "Cola",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            LoopMode::Off => "➡️",
            LoopMode::Track => "🔂",
            LoopMode::Queue => "🔁",
        }
    }
}

/// Cola de un servidor: canciones pendientes, canción actual, modo de
/// repetición, volumen lógico (porcentaje entero) y stubs de playlist.
#[derive(Debug)]
pub struct GuildQueue {
    tracks: VecDeque<Track>,
    current: Option<Track>,
    loop_mode: LoopMode,
    volume: u16,
    muted: bool,
    stubs: Vec<StubEntry>,
    playlist_title: Option<String>,
    max_size: usize,
}

impl GuildQueue {
    pub fn new(default_volume: u16, max_size: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            current: None,
            loop_mode: LoopMode::Off,
            volume: default_volume.min(MAX_VOLUME),
            muted: false,
            stubs: Vec::new(),
            playlist_title: None,
            max_size,
        }
    }

    /// Añade al final. Devuelve la posición (1 = siguiente).
    pub fn enqueue(&mut self, track: Track) -> MusicResult<usize> {
        if self.tracks.len() >= self.max_size {
            return Err(MusicError::QueueFull(self.max_size));
        }

        info!("➕ Añadido a la cola: {}", track.title);
        self.tracks.push_back(track);
        Ok(self.tracks.len())
    }

    /// Saca la siguiente canción y la marca como actual.
    pub fn pop_next(&mut self) -> Option<Track> {
        let next = self.tracks.pop_front()?;
        self.current = Some(next.clone());
        Some(next)
    }

    /// Termina la canción actual aplicando la política de repetición.
    pub fn finish_current(&mut self) -> Option<Track> {
        let finished = self.current.take()?;
        match self.loop_mode {
            LoopMode::Off => {}
            LoopMode::Track => self.tracks.push_front(finished.clone()),
            LoopMode::Queue => self.tracks.push_back(finished.clone()),
        }
        debug!("🔚 Terminó {} (repetición: {:?})", finished.title, self.loop_mode);
        Some(finished)
    }

    /// Descarta la canción actual sin volver a encolarla.
    pub fn take_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    /// Vacía la cola y los stubs pendientes. La canción actual no se toca.
    pub fn clear(&mut self) -> usize {
        let removed = self.tracks.len() + self.stubs.len();
        self.tracks.clear();
        self.clear_stubs();
        removed
    }

    pub fn cycle_loop(&mut self) -> LoopMode {
        self.loop_mode = self.loop_mode.next();
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Ajusta el volumen lógico limitado a [0, 200].
    pub fn adjust_volume(&mut self, delta: i16) -> u16 {
        let next = (self.volume as i32 + delta as i32).clamp(0, MAX_VOLUME as i32);
        self.volume = next as u16;
        self.volume
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        self.muted
    }

    /// Volumen que se aplica a la salida (0.0 si está silenciado).
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume as f32 / 100.0
        }
    }

    pub fn set_stubs(&mut self, title: String, stubs: Vec<StubEntry>) {
        self.playlist_title = Some(title);
        self.stubs = stubs;
    }

    /// Quita el stub que coincide por id o URL.
    pub fn remove_stub(&mut self, stub: &StubEntry) -> bool {
        match self.stubs.iter().position(|pending| pending.matches(stub)) {
            Some(index) => {
                self.stubs.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear_stubs(&mut self) {
        self.stubs.clear();
        self.playlist_title = None;
    }

    pub fn has_pending_stubs(&self) -> bool {
        !self.stubs.is_empty()
    }

    pub fn stubs(&self) -> &[StubEntry] {
        &self.stubs
    }

    pub fn playlist_title(&self) -> Option<&str> {
        self.playlist_title.as_deref()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn volume(&self) -> u16 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

/// Devuelve la página `page` (base 0, ajustada al rango) y el total de páginas.
pub fn page<T>(items: &[T], page: usize, per_page: usize) -> (&[T], usize, usize) {
    let per_page = per_page.max(1);
    let total_pages = items.len().div_ceil(per_page).max(1);
    let page = page.min(total_pages - 1);
    let start = (page * per_page).min(items.len());
    let end = (start + per_page).min(items.len());
    (&items[start..end], page, total_pages)
}
