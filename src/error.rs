use serenity::model::id::ChannelId;
use thiserror::Error;

/// Errores del sistema de música.
///
/// Ninguno es fatal para el proceso: se capturan en el límite de cada
/// operación, se registran y se muestran al usuario con [`MusicError::user_message`].
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("No se pudo conectar al canal de voz: {0}")]
    Connection(String),

    #[error("No se encontró nada reproducible: {0}")]
    Resolution(String),

    #[error("Error de reproducción: {0}")]
    Playback(String),

    #[error("Permisos insuficientes: {0}")]
    Permission(String),

    #[error("Debes estar en un canal de voz")]
    NotInVoice,

    #[error("Debes estar en el mismo canal de voz que el bot (<#{0}>)")]
    WrongVoiceChannel(ChannelId),

    #[error("El bot no está conectado a un canal de voz")]
    NotConnected,

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("La reproducción no está pausada")]
    NothingPaused,

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error(transparent)]
    Discord(#[from] serenity::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;

impl MusicError {
    /// Texto seguro para mostrar en Discord. Los errores internos no exponen detalles.
    pub fn user_message(&self) -> String {
        match self {
            Self::Discord(_) | Self::Io(_) | Self::Json(_) => {
                "❌ Ocurrió un error interno, inténtalo de nuevo".to_string()
            }
            other => format!("❌ {}", other),
        }
    }
}
