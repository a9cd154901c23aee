use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MusicError, MusicResult};

/// Cómo se invoca al extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Una sola canción con datos completos de stream
    Single,
    /// Búsqueda de un resultado (`ytsearch1:`)
    Search,
    /// Sondeo rápido de playlist sin resolver las entradas
    FlatProbe,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Format {
    pub url: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
}

impl Format {
    fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|codec| !codec.is_empty() && codec != "none")
    }

    fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref().map_or(true, |codec| codec.is_empty() || codec == "none")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    pub url: Option<String>,
}

/// Subconjunto del JSON que imprime `yt-dlp -J`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInfo {
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub original_url: Option<String>,
    pub thumbnail: Option<String>,
    pub thumbnails: Option<Vec<Thumbnail>>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub formats: Option<Vec<Format>>,
    pub entries: Option<Vec<Option<ExtractedInfo>>>,
}

impl ExtractedInfo {
    pub fn is_playlist(&self) -> bool {
        self.kind.as_deref() == Some("playlist") || self.entries.is_some()
    }

    /// Entradas no nulas (yt-dlp usa `null` para vídeos no disponibles).
    pub fn entries(&self) -> Vec<&ExtractedInfo> {
        self.entries
            .iter()
            .flatten()
            .filter_map(|entry| entry.as_ref())
            .collect()
    }

    /// URL para volver a pedir la entrada completa.
    pub fn entry_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .or(self.webpage_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    /// `true` si la entrada ya trae datos de stream y no es una referencia plana.
    pub fn has_stream_data(&self) -> bool {
        if self.kind.as_deref() == Some("url") {
            return false;
        }
        self.formats.as_ref().is_some_and(|formats| !formats.is_empty())
    }

    /// URL de stream: la de nivel superior o el mejor formato con audio,
    /// prefiriendo los que no llevan vídeo.
    pub fn stream_url(&self) -> Option<&str> {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return Some(url);
        }

        let formats = self.formats.as_deref().unwrap_or_default();
        let mut fallback = None;
        for format in formats.iter().filter(|f| f.has_audio()) {
            let Some(url) = format.url.as_deref().filter(|url| !url.is_empty()) else {
                continue;
            };
            if format.is_audio_only() {
                return Some(url);
            }
            if fallback.is_none() {
                fallback = Some(url);
            }
        }
        fallback
    }

    /// `thumbnail`, si no la última de `thumbnails`.
    pub fn best_thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref().filter(|url| !url.is_empty()).or_else(|| {
            self.thumbnails
                .as_deref()
                .and_then(|thumbs| thumbs.last())
                .and_then(|thumb| thumb.url.as_deref())
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO)
    }
}

/// Fuente de metadatos. La implementación real ejecuta `yt-dlp`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, target: &str, mode: ExtractMode) -> MusicResult<ExtractedInfo>;
}

pub struct YtDlp {
    binary: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    fn args(target: &str, mode: ExtractMode) -> Vec<String> {
        let mut args: Vec<String> = ["-J", "--quiet", "--no-warnings", "--source-address", "0.0.0.0"]
            .into_iter()
            .map(String::from)
            .collect();

        match mode {
            ExtractMode::Single => {
                args.extend(["-f", "bestaudio/best", "--no-playlist"].map(String::from));
                args.push(target.to_string());
            }
            ExtractMode::Search => {
                args.extend(["-f", "bestaudio/best"].map(String::from));
                args.push(format!("ytsearch1:{}", target));
            }
            ExtractMode::FlatProbe => {
                args.extend(["--flat-playlist", "--yes-playlist"].map(String::from));
                args.push(target.to_string());
            }
        }

        args
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn extract(&self, target: &str, mode: ExtractMode) -> MusicResult<ExtractedInfo> {
        debug!("🔍 yt-dlp ({:?}): {}", mode, target);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(Self::args(target, mode)).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                MusicError::Resolution(format!(
                    "yt-dlp no respondió en {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| MusicError::Resolution(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("sin detalles")
                .to_string();
            warn!("❌ yt-dlp falló para {}: {}", target, reason);
            return Err(MusicError::Resolution(reason));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            MusicError::Resolution(format!("respuesta de yt-dlp ilegible: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> ExtractedInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_top_level_url_wins() {
        let info = parse(
            r#"{"title": "Song", "url": "https://cdn/top.webm",
                "formats": [{"url": "https://cdn/a.m4a", "acodec": "mp4a", "vcodec": "none"}]}"#,
        );
        assert_eq!(info.stream_url(), Some("https://cdn/top.webm"));
    }

    #[test]
    fn test_prefers_audio_only_format() {
        let info = parse(
            r#"{"title": "Song", "formats": [
                {"url": "https://cdn/storyboard", "acodec": "none", "vcodec": "none"},
                {"url": "https://cdn/muxed.mp4", "acodec": "mp4a", "vcodec": "avc1"},
                {"acodec": "opus", "vcodec": "none"},
                {"url": "https://cdn/audio.webm", "acodec": "opus", "vcodec": "none"}
            ]}"#,
        );
        assert_eq!(info.stream_url(), Some("https://cdn/audio.webm"));
    }

    #[test]
    fn test_falls_back_to_first_audio_format() {
        let info = parse(
            r#"{"formats": [
                {"url": "https://cdn/video-only", "acodec": "none", "vcodec": "vp9"},
                {"url": "https://cdn/muxed-1.mp4", "acodec": "mp4a", "vcodec": "avc1"},
                {"url": "https://cdn/muxed-2.mp4", "acodec": "mp4a", "vcodec": "avc1"}
            ]}"#,
        );
        assert_eq!(info.stream_url(), Some("https://cdn/muxed-1.mp4"));

        let nothing = parse(r#"{"formats": [{"url": "https://cdn/v", "acodec": "none"}]}"#);
        assert_eq!(nothing.stream_url(), None);
    }

    #[test]
    fn test_thumbnail_fallback_uses_last() {
        let info = parse(
            r#"{"thumbnails": [{"url": "https://img/small.jpg"}, {"url": "https://img/large.jpg"}]}"#,
        );
        assert_eq!(info.best_thumbnail(), Some("https://img/large.jpg"));

        let direct = parse(r#"{"thumbnail": "https://img/main.jpg", "thumbnails": null}"#);
        assert_eq!(direct.best_thumbnail(), Some("https://img/main.jpg"));
    }

    #[test]
    fn test_playlist_entries_skip_nulls() {
        let info = parse(
            r#"{"_type": "playlist", "title": "Mix", "entries": [
                {"_type": "url", "id": "a", "url": "https://youtu.be/a", "title": "A"},
                null,
                {"_type": "url", "id": "b", "url": "https://youtu.be/b"}
            ]}"#,
        );
        assert!(info.is_playlist());
        let entries = info.entries();
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].has_stream_data());
        assert_eq!(entries[1].entry_url(), Some("https://youtu.be/b"));
    }

    #[test]
    fn test_duration_defaults_to_zero() {
        assert_eq!(parse(r#"{"duration": null}"#).duration(), Duration::ZERO);
        assert_eq!(parse(r#"{"duration": 212.0}"#).duration(), Duration::from_secs(212));
    }

    #[test]
    fn test_search_args_prefix_query() {
        let args = YtDlp::args("lofi beats", ExtractMode::Search);
        assert_eq!(args.last().map(String::as_str), Some("ytsearch1:lofi beats"));
        assert!(YtDlp::args("https://x", ExtractMode::FlatProbe).contains(&"--flat-playlist".to_string()));
        assert!(YtDlp::args("https://x", ExtractMode::Single).contains(&"--no-playlist".to_string()));
    }
}
