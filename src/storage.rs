use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MusicResult;

const SETTINGS_FILE: &str = "music_panel_settings.json";

/// Canal de música y mensaje del panel de un servidor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSettings {
    #[serde(default)]
    pub music_channel_id: Option<u64>,
    #[serde(default)]
    pub music_panel_message_id: Option<u64>,
}

impl PanelSettings {
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.music_channel_id.filter(|id| *id != 0).map(ChannelId::new)
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.music_panel_message_id.filter(|id| *id != 0).map(MessageId::new)
    }
}

/// Persistencia JSON de la configuración de paneles por servidor
pub struct PanelStore {
    path: PathBuf,
    settings: Mutex<HashMap<GuildId, PanelSettings>>,
}

impl PanelStore {
    pub async fn load(data_dir: PathBuf) -> MusicResult<Self> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join(SETTINGS_FILE);
        let settings = read_settings(&path).await;

        info!("📁 {} paneles cargados desde {}", settings.len(), path.display());

        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub async fn get(&self, guild_id: GuildId) -> PanelSettings {
        self.settings
            .lock()
            .await
            .get(&guild_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_music_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.get(guild_id).await.channel_id() == Some(channel_id)
    }

    pub async fn guilds(&self) -> Vec<GuildId> {
        self.settings.lock().await.keys().copied().collect()
    }

    /// Modifica la configuración de un servidor y la guarda en disco.
    pub async fn update<F>(&self, guild_id: GuildId, change: F) -> MusicResult<PanelSettings>
    where
        F: FnOnce(&mut PanelSettings),
    {
        let mut settings = self.settings.lock().await;
        let entry = settings.entry(guild_id).or_default();
        change(entry);
        let updated = entry.clone();

        self.save(&settings).await?;
        debug!("💾 Panel actualizado para guild {}", guild_id);
        Ok(updated)
    }

    pub async fn remove(&self, guild_id: GuildId) -> MusicResult<()> {
        let mut settings = self.settings.lock().await;
        if settings.remove(&guild_id).is_some() {
            self.save(&settings).await?;
            info!("🗑️ Panel eliminado para guild {}", guild_id);
        }
        Ok(())
    }

    async fn save(&self, settings: &HashMap<GuildId, PanelSettings>) -> MusicResult<()> {
        let serializable: BTreeMap<String, &PanelSettings> = settings
            .iter()
            .map(|(guild_id, panel)| (guild_id.get().to_string(), panel))
            .collect();

        let content = serde_json::to_string_pretty(&serializable)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }
}

/// Lectura tolerante: archivo ausente, vacío, corrupto o sin objeto raíz = sin paneles.
async fn read_settings(path: &Path) -> HashMap<GuildId, PanelSettings> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!("⚠️ No se pudo leer {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    if content.trim().is_empty() {
        return HashMap::new();
    }

    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("⚠️ {} está corrupto, se ignora: {}", path.display(), e);
            return HashMap::new();
        }
    };

    let serde_json::Value::Object(entries) = value else {
        warn!("⚠️ {} no contiene un objeto JSON, se ignora", path.display());
        return HashMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(key, value)| {
            let guild_id = key.parse::<u64>().ok().filter(|id| *id != 0)?;
            match serde_json::from_value::<PanelSettings>(value) {
                Ok(settings) => Some((GuildId::new(guild_id), settings)),
                Err(e) => {
                    warn!("⚠️ Panel inválido para guild {}: {}", key, e);
                    None
                }
            }
        })
        .collect()
}
