use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PANEL_IMAGE_URL: &str =
    "https://media.tenor.com/Ja5Y7-qUwNQAAAAC/rimuru-tempest.gif";

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para registrar comandos en un solo servidor
    pub command_prefix: String,
    pub status_message: String,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub idle_timeout: Duration,
    pub playlist_entry_delay: Duration,
    pub max_consecutive_failures: u32,

    // Extracción
    pub ytdlp_path: String,
    pub extract_timeout: Duration,

    // Panel
    pub data_dir: PathBuf,
    pub music_channel_name: String,
    pub panel_image_url: String,
    pub support_url: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración a partir de una función de búsqueda de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN no está definido")?,
            guild_id: match lookup("GUILD_ID") {
                Some(value) if !value.trim().is_empty() => {
                    Some(value.trim().parse().context("GUILD_ID inválido")?)
                }
                _ => None,
            },
            command_prefix: var("COMMAND_PREFIX", "s!"),
            status_message: var("STATUS_MESSAGE", "/help | jukebox slime musicbot"),

            default_volume: var("DEFAULT_VOLUME", "0.7")
                .parse()
                .context("DEFAULT_VOLUME inválido")?,
            max_queue_size: var("MAX_QUEUE_SIZE", "1000")
                .parse()
                .context("MAX_QUEUE_SIZE inválido")?,
            idle_timeout: Duration::from_secs(
                var("IDLE_TIMEOUT_SECS", "60")
                    .parse()
                    .context("IDLE_TIMEOUT_SECS inválido")?,
            ),
            playlist_entry_delay: Duration::from_millis(
                var("PLAYLIST_ENTRY_DELAY_MS", "100")
                    .parse()
                    .context("PLAYLIST_ENTRY_DELAY_MS inválido")?,
            ),
            max_consecutive_failures: var("MAX_CONSECUTIVE_FAILURES", "5")
                .parse()
                .context("MAX_CONSECUTIVE_FAILURES inválido")?,

            ytdlp_path: var("YTDLP_PATH", "yt-dlp"),
            extract_timeout: Duration::from_secs(
                var("EXTRACT_TIMEOUT_SECS", "60")
                    .parse()
                    .context("EXTRACT_TIMEOUT_SECS inválido")?,
            ),

            data_dir: var("DATA_DIR", "data").into(),
            music_channel_name: var("MUSIC_CHANNEL_NAME", "🎵jukebox-slime"),
            panel_image_url: var("PANEL_IMAGE_URL", DEFAULT_PANEL_IMAGE_URL),
            support_url: lookup("SUPPORT_URL").filter(|url| url::Url::parse(url).is_ok()),
        })
    }

    /// Valida rangos y valores mínimos.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "El volumen por defecto debe estar entre 0.0 y 2.0, recibido: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("MAX_QUEUE_SIZE debe ser mayor que 0");
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_FAILURES debe ser mayor que 0");
        }

        if self.extract_timeout.is_zero() {
            anyhow::bail!("EXTRACT_TIMEOUT_SECS debe ser mayor que 0");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("COMMAND_PREFIX no puede estar vacío");
        }

        Ok(())
    }

    /// Volumen por defecto como porcentaje entero (0.7 -> 70).
    pub fn default_volume_percent(&self) -> u16 {
        (self.default_volume * 100.0).round() as u16
    }

    /// Resumen sin datos sensibles para el log de arranque.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: prefijo '{}' (comandos: {})\n  \
            Audio: {}% vol, cola máx {}, desconexión tras {}s inactivo\n  \
            Playlists: {}ms entre canciones, {} fallos seguidos máx\n  \
            Extracción: {} (timeout {}s)\n  \
            Panel: #{} en {}",
            self.command_prefix,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume_percent(),
            self.max_queue_size,
            self.idle_timeout.as_secs(),
            self.playlist_entry_delay.as_millis(),
            self.max_consecutive_failures,
            self.ytdlp_path,
            self.extract_timeout.as_secs(),
            self.music_channel_name,
            self.data_dir.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(config.command_prefix, "s!");
        assert_eq!(config.default_volume_percent(), 70);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.playlist_entry_delay, Duration::from_millis(100));
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.guild_id, None);
        assert!(config.support_url.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_token_fails() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "  ")])).is_err());
    }

    #[test]
    fn test_overrides_and_validation() {
        let config = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("GUILD_ID", "1234"),
            ("DEFAULT_VOLUME", "2.5"),
            ("COMMAND_PREFIX", "!"),
        ]))
        .unwrap();

        assert_eq!(config.guild_id, Some(1234));
        assert_eq!(config.command_prefix, "!");
        assert!(config.validate().is_err());

        let bad = Config::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("IDLE_TIMEOUT_SECS", "soon"),
        ]));
        assert!(bad.is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config =
            Config::from_lookup(lookup_from(&[("DISCORD_TOKEN", "super-secret")])).unwrap();
        assert!(!config.summary().contains("super-secret"));
    }
}
