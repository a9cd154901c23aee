use async_trait::async_trait;
use serenity::model::id::UserId;
use tracing::{debug, info};

use super::{
    is_url,
    ytdlp::{ExtractMode, ExtractedInfo, Extractor},
    PlaylistTail, Resolution, StubEntry, Track, TrackResolver, UNKNOWN_UPLOADER,
};
use crate::error::{MusicError, MusicResult};

/// Resolutor de consultas sobre un [`Extractor`].
pub struct QueryResolver<E> {
    extractor: E,
}

impl<E: Extractor> QueryResolver<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }

    async fn fetch_single(&self, url: &str) -> MusicResult<ExtractedInfo> {
        self.extractor.extract(url, ExtractMode::Single).await
    }

    /// Primera entrada de una playlist con datos completos.
    async fn resolve_first_entry(
        &self,
        playlist: &ExtractedInfo,
        entries: &[&ExtractedInfo],
    ) -> MusicResult<ExtractedInfo> {
        let Some(first) = entries.first() else {
            return Err(MusicError::Resolution("la playlist está vacía".to_string()));
        };

        if first.has_stream_data() {
            return Ok((*first).clone());
        }

        let url = first.entry_url().ok_or_else(|| {
            MusicError::Resolution(format!(
                "la primera canción de `{}` no tiene URL",
                playlist.title.as_deref().unwrap_or("playlist")
            ))
        })?;
        self.fetch_single(url).await
    }
}

/// Construye la canción a partir de los datos completos del extractor.
fn build_track(info: &ExtractedInfo, query: &str, requester: UserId) -> MusicResult<Track> {
    let query_is_url = is_url(query);

    let title = match info.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() && !is_placeholder_title(title) => title.to_string(),
        _ if !query_is_url => query.to_string(),
        Some(title) if !title.is_empty() => title.to_string(),
        _ => UNTITLED.to_string(),
    };

    let stream_url = info.stream_url().ok_or_else(|| {
        MusicError::Resolution(format!("no hay URL de stream para `{}`", title))
    })?;

    let page_url = info
        .webpage_url
        .clone()
        .or_else(|| info.original_url.clone())
        .or_else(|| query_is_url.then(|| query.to_string()));

    Ok(Track {
        title,
        stream_url: stream_url.to_string(),
        page_url,
        duration: info.duration(),
        uploader: info
            .uploader
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
        requester,
        thumbnail: info.best_thumbnail().map(String::from),
    })
}

const UNTITLED: &str = "Canción sin título";

fn is_placeholder_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower == "videoplayback" || lower.contains("video playback")
}

/// Convierte las entradas restantes en stubs. Las que no tienen URL se descartan.
fn build_tail(playlist: &ExtractedInfo, entries: &[&ExtractedInfo], query: &str) -> PlaylistTail {
    let stubs = entries
        .iter()
        .skip(1)
        .filter_map(|entry| {
            entry.entry_url().map(|url| StubEntry {
                id: entry.id.clone(),
                title: entry.title.clone(),
                url: url.to_string(),
            })
        })
        .collect();

    PlaylistTail {
        title: playlist.title.clone().unwrap_or_else(|| query.to_string()),
        total: entries.len(),
        stubs,
    }
}

#[async_trait]
impl<E: Extractor> TrackResolver for QueryResolver<E> {
    async fn resolve(&self, query: &str, requester: UserId) -> MusicResult<Resolution> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::Resolution("la búsqueda está vacía".to_string()));
        }

        if is_url(query) {
            let probe = self.extractor.extract(query, ExtractMode::FlatProbe).await?;
            let entries = probe.entries();

            if probe.is_playlist() && !entries.is_empty() {
                info!(
                    "📃 Playlist detectada: {} ({} entradas)",
                    probe.title.as_deref().unwrap_or(query),
                    entries.len()
                );
                let first = self.resolve_first_entry(&probe, &entries).await?;
                return Ok(Resolution {
                    track: build_track(&first, query, requester)?,
                    playlist: Some(build_tail(&probe, &entries, query)),
                });
            }

            let info = self.fetch_single(query).await?;
            return Ok(Resolution {
                track: build_track(&info, query, requester)?,
                playlist: None,
            });
        }

        let found = self.extractor.extract(query, ExtractMode::Search).await?;
        if !found.is_playlist() {
            debug!("🔎 Búsqueda '{}' devolvió un solo vídeo", query);
            return Ok(Resolution {
                track: build_track(&found, query, requester)?,
                playlist: None,
            });
        }

        let entries = found.entries();
        if entries.is_empty() {
            return Err(MusicError::Resolution(format!("sin resultados para `{}`", query)));
        }

        let first = self.resolve_first_entry(&found, &entries).await?;
        let track = build_track(&first, query, requester)?;

        // ytsearch1 envuelve el resultado en una colección de un elemento
        let playlist = (entries.len() > 1).then(|| build_tail(&found, &entries, query));

        Ok(Resolution { track, playlist })
    }

    async fn resolve_stub(&self, stub: &StubEntry, requester: UserId) -> MusicResult<Track> {
        let info = self.fetch_single(&stub.url).await?;
        let mut track = build_track(&info, &stub.url, requester)?;
        if track.title == UNTITLED || is_placeholder_title(&track.title) {
            if let Some(title) = &stub.title {
                track.title = title.clone();
            }
        }
        Ok(track)
    }
}
