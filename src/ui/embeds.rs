use serenity::{
    all::{ChannelId, Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    player::{GuildSnapshot, PlaybackPhase},
    queue::{self, LoopMode},
};

pub const QUEUE_PAGE_SIZE: usize = 10;
const MAX_TITLE_CHARS: usize = 60;

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const PANEL_PURPLE: Colour = Colour::from_rgb(126, 0, 159);
    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 165, 0);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

/// Panel persistente del canal de música.
pub fn panel_embed(
    snapshot: &GuildSnapshot,
    connected: Option<ChannelId>,
    bot_name: &str,
    default_image: &str,
) -> CreateEmbed {
    let footer = CreateEmbedFooter::new(format!("{} Music System", bot_name));

    let Some(track) = snapshot.current.as_ref().filter(|_| snapshot.phase != PlaybackPhase::Idle)
    else {
        let mut description = String::from(
            "Escribe el nombre de una canción o pega un enlace en este canal para empezar.\n\
             Usa los botones de abajo para controlar la reproducción.",
        );
        if !snapshot.stubs.is_empty() {
            description.push_str(&format!(
                "\n\n⏳ Cargando {} canciones de la playlist...",
                snapshot.stubs.len()
            ));
        }

        return CreateEmbed::default()
            .title("🎶 Nada reproduciéndose")
            .description(description)
            .color(colors::PANEL_PURPLE)
            .field("🔊 Volumen", volume_label(snapshot), true)
            .field("📢 Canal", channel_label(connected), true)
            .field("📜 En cola", pending_count(snapshot).to_string(), true)
            .image(default_image)
            .footer(footer);
    };

    let status = match snapshot.phase {
        PlaybackPhase::Paused => "⏸️ En pausa",
        PlaybackPhase::Starting => "⏳ Cargando",
        _ => "🎶 Reproduciendo",
    };

    let song = match &track.page_url {
        Some(url) => format!("[{}]({})", truncate(&track.title, MAX_TITLE_CHARS), url),
        None => truncate(&track.title, MAX_TITLE_CHARS),
    };

    let mut embed = CreateEmbed::default()
        .title(status)
        .color(colors::PANEL_PURPLE)
        .field("🎵 Canción", song, false)
        .field("⏱️ Duración", format_duration(track.duration), true)
        .field("👤 Pedida por", format!("<@{}>", track.requester), true)
        .field("🔊 Volumen", volume_label(snapshot), true)
        .field("📢 Canal", channel_label(connected), true)
        .field("🔁 Repetición", loop_label(snapshot.loop_mode), true)
        .field("📜 En cola", pending_count(snapshot).to_string(), true)
        .image(track.thumbnail.as_deref().unwrap_or(default_image))
        .footer(footer)
        .timestamp(Timestamp::now());

    if let Some(title) = &snapshot.playlist_title {
        if !snapshot.stubs.is_empty() {
            embed = embed.description(format!(
                "⏳ Cargando playlist **{}** ({} restantes)",
                truncate(title, MAX_TITLE_CHARS),
                snapshot.stubs.len()
            ));
        }
    }

    embed
}

/// Respuesta de `nowplaying`. `None` si no hay canción actual.
pub fn now_playing_embed(snapshot: &GuildSnapshot) -> Option<CreateEmbed> {
    let track = snapshot.current.as_ref().filter(|_| snapshot.phase.is_active())?;

    let mut embed = CreateEmbed::default()
        .title(if snapshot.phase == PlaybackPhase::Paused {
            "⏸️ En pausa"
        } else {
            "🎵 Reproduciendo ahora"
        })
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Autor", &track.uploader, true)
        .field("⏱️ Duración", format_duration(track.duration), true)
        .field("👤 Pedida por", format!("<@{}>", track.requester), true)
        .field("🔊 Volumen", volume_label(snapshot), true)
        .timestamp(Timestamp::now());

    if let Some(url) = &track.page_url {
        embed = embed.url(url);
    }
    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    Some(embed)
}

/// Líneas de la cola: actual, pendientes y stubs aún sin resolver.
pub fn queue_lines(snapshot: &GuildSnapshot) -> Vec<String> {
    let mut lines = Vec::with_capacity(1 + snapshot.queued.len() + snapshot.stubs.len());

    if let Some(current) = snapshot.current.as_ref().filter(|_| snapshot.phase != PlaybackPhase::Idle) {
        lines.push(format!(
            "▶️ **{}** `{}`",
            truncate(&current.title, MAX_TITLE_CHARS),
            format_duration(current.duration)
        ));
    }

    let mut position = 1;
    for track in &snapshot.queued {
        lines.push(format!(
            "`{}.` {} `{}`",
            position,
            truncate(&track.title, MAX_TITLE_CHARS),
            format_duration(track.duration)
        ));
        position += 1;
    }

    for stub in &snapshot.stubs {
        lines.push(format!(
            "`{}.` {} *(cargando...)*",
            position,
            truncate(stub.display_title(), MAX_TITLE_CHARS)
        ));
        position += 1;
    }

    lines
}

/// Una página de la cola. Devuelve el embed, la página ajustada y el total de páginas.
pub fn queue_embed(snapshot: &GuildSnapshot, page: usize) -> (CreateEmbed, usize, usize) {
    let lines = queue_lines(snapshot);
    let (visible, page, total_pages) = queue::page(&lines, page, QUEUE_PAGE_SIZE);

    let description = if visible.is_empty() {
        "📭 La cola está vacía".to_string()
    } else {
        visible.join("\n")
    };

    let embed = CreateEmbed::default()
        .title("📜 Cola de reproducción")
        .description(description)
        .color(colors::INFO_BLUE)
        .field("🔁 Repetición", loop_label(snapshot.loop_mode), true)
        .field("📊 Total", pending_count(snapshot).to_string(), true)
        .footer(CreateEmbedFooter::new(format!(
            "Página {}/{}",
            page + 1,
            total_pages
        )));

    (embed, page, total_pages)
}

pub fn help_embed(prefix: &str) -> CreateEmbed {
    let commands = [
        ("play <canción o URL>", "p", "Reproduce o añade a la cola"),
        ("join", "", "Entra a tu canal de voz"),
        ("leave", "dc", "Sale del canal de voz"),
        ("pause / resume", "", "Pausa o reanuda"),
        ("stop", "", "Detiene y vacía la cola"),
        ("skip", "s", "Salta la canción actual"),
        ("loop", "l", "Cambia el modo de repetición"),
        ("queue [página]", "q", "Muestra la cola"),
        ("nowplaying", "np", "Muestra la canción actual"),
        ("clear", "clr", "Vacía la cola"),
    ];

    let text = commands
        .iter()
        .map(|(name, alias, about)| {
            if alias.is_empty() {
                format!("`{}{}` - {}", prefix, name, about)
            } else {
                format!("`{}{}` (`{}{}`) - {}", prefix, name, prefix, alias, about)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::default()
        .title("🎵 Ayuda")
        .description("También puedes escribir canciones directamente en el canal de música.")
        .color(colors::PANEL_PURPLE)
        .field("Comandos de texto", text, false)
        .field(
            "Comandos slash",
            "`/help` - Esta ayuda\n`/ping` - Latencia del bot\n`/setup-music` - Crea el canal y el panel de música",
            false,
        )
}

pub fn ping_embed(latency: Option<Duration>) -> CreateEmbed {
    let (value, colour) = match latency {
        Some(latency) => {
            let ms = latency.as_millis();
            (format!("{} ms", ms), ping_colour(ms))
        }
        None => ("Calculando...".to_string(), colors::INFO_BLUE),
    };

    CreateEmbed::default()
        .title("🏓 Pong!")
        .field("📡 Latencia del gateway", value, true)
        .color(colour)
}

/// Verde por debajo de 150 ms, naranja por debajo de 300 ms, rojo si no.
pub fn ping_colour(ms: u128) -> Colour {
    match ms {
        0..=149 => colors::SUCCESS_GREEN,
        150..=299 => colors::WARNING_ORANGE,
        _ => colors::ERROR_RED,
    }
}

fn volume_label(snapshot: &GuildSnapshot) -> String {
    if snapshot.muted {
        "🔇 Silenciado (0%)".to_string()
    } else {
        format!("{}%", snapshot.volume)
    }
}

fn channel_label(connected: Option<ChannelId>) -> String {
    connected.map_or("Ninguno".to_string(), |channel| format!("<#{}>", channel))
}

fn loop_label(mode: LoopMode) -> String {
    format!("{} {}", mode.emoji(), mode.label())
}

fn pending_count(snapshot: &GuildSnapshot) -> usize {
    snapshot.queued.len() + snapshot.stubs.len()
}

pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "🔴 En vivo".to_string();
    }

    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Recorta a `max` caracteres añadiendo "…".
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
