//! # Sources Module
//!
//! Turns what a user typed into something the voice backend can stream.
//!
//! - [`ytdlp`]: runs the external `yt-dlp` extractor and models its JSON output
//! - [`resolver`]: decides between single URL, playlist URL and text search,
//!   and builds the [`Track`] plus the lazily expanded playlist tail
//!
//! Everything above this module only sees the [`TrackResolver`] trait.

use async_trait::async_trait;
use serenity::model::id::UserId;
use std::time::Duration;

use crate::error::MusicResult;

pub mod resolver;
pub mod ytdlp;

pub const UNKNOWN_UPLOADER: &str = "Unknown uploader";

/// Canción lista para reproducir. Inmutable una vez encolada.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub stream_url: String,
    pub page_url: Option<String>,
    /// `Duration::ZERO` para directos o duración desconocida
    pub duration: Duration,
    pub uploader: String,
    pub requester: UserId,
    pub thumbnail: Option<String>,
}

impl Track {
    pub fn is_live(&self) -> bool {
        self.duration.is_zero()
    }
}

/// Entrada de playlist que todavía no se ha resuelto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: String,
}

impl StubEntry {
    /// Coincide por id cuando ambos lo tienen, si no por URL.
    pub fn matches(&self, other: &StubEntry) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.url == other.url,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }
}

/// Resto de una playlist pendiente de expansión en segundo plano.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistTail {
    pub title: String,
    /// Número de entradas que tenía la playlist original
    pub total: usize,
    pub stubs: Vec<StubEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub track: Track,
    pub playlist: Option<PlaylistTail>,
}

#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resuelve texto libre o una URL en una canción y, si aplica, el resto de la playlist.
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Resolution>;

    /// Resuelve una entrada pendiente de playlist.
    async fn resolve_stub(&self, stub: &StubEntry, requester: UserId) -> MusicResult<Track>;
}

/// Una consulta "parece URL" si empieza por `http://`, `https://` o `www.`.
pub fn is_url(query: &str) -> bool {
    let query = query.trim();
    query.starts_with("http://") || query.starts_with("https://") || query.starts_with("www.")
}
