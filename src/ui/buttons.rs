use serenity::{
    all::{ButtonStyle, GuildId, ReactionType},
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::{
    player::{GuildSnapshot, PlaybackPhase},
    queue::LoopMode,
};

/// Prefijos de los custom_id
pub mod button_ids {
    pub const PANEL_PREFIX: &str = "musicpanel_";
    pub const QUEUE_PAGE_PREFIX: &str = "queuepage_";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    PlayPause,
    Skip,
    Stop,
    Loop,
    Mute,
    VolumeUp,
    VolumeDown,
    Queue,
}

impl PanelAction {
    const ALL: [PanelAction; 8] = [
        PanelAction::PlayPause,
        PanelAction::Skip,
        PanelAction::Stop,
        PanelAction::Loop,
        PanelAction::Mute,
        PanelAction::VolumeUp,
        PanelAction::VolumeDown,
        PanelAction::Queue,
    ];

    fn as_str(self) -> &'static str {
        match self {
            PanelAction::PlayPause => "play_pause",
            PanelAction::Skip => "skip",
            PanelAction::Stop => "stop",
            PanelAction::Loop => "loop",
            PanelAction::Mute => "mute",
            PanelAction::VolumeUp => "vol_up",
            PanelAction::VolumeDown => "vol_down",
            PanelAction::Queue => "queue",
        }
    }

    /// Acciones que pueden conectar a voz antes de responder; se difiere la respuesta.
    pub fn defers_reply(self) -> bool {
        matches!(self, PanelAction::PlayPause)
    }

    /// `musicpanel_<acción>:<guild_id>`
    pub fn custom_id(self, guild_id: GuildId) -> String {
        format!("{}{}:{}", button_ids::PANEL_PREFIX, self.as_str(), guild_id)
    }

    pub fn parse_custom_id(custom_id: &str) -> Option<(PanelAction, GuildId)> {
        let rest = custom_id.strip_prefix(button_ids::PANEL_PREFIX)?;
        let (action, guild) = rest.split_once(':')?;
        let action = Self::ALL.into_iter().find(|a| a.as_str() == action)?;
        let guild_id = guild.parse::<u64>().ok().filter(|id| *id != 0)?;
        Some((action, GuildId::new(guild_id)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerTarget {
    First,
    Previous,
    Next,
    Last,
}

impl PagerTarget {
    fn as_str(self) -> &'static str {
        match self {
            PagerTarget::First => "first",
            PagerTarget::Previous => "prev",
            PagerTarget::Next => "next",
            PagerTarget::Last => "last",
        }
    }

    /// Página destino a partir de la actual (base 0).
    pub fn resolve(self, current: usize, total_pages: usize) -> usize {
        let last = total_pages.saturating_sub(1);
        match self {
            PagerTarget::First => 0,
            PagerTarget::Previous => current.saturating_sub(1),
            PagerTarget::Next => (current + 1).min(last),
            PagerTarget::Last => last,
        }
    }

    fn custom_id(self, page: usize) -> String {
        format!("{}{}:{}", button_ids::QUEUE_PAGE_PREFIX, self.as_str(), page)
    }

    /// `queuepage_<destino>:<página actual>`
    pub fn parse_custom_id(custom_id: &str) -> Option<(PagerTarget, usize)> {
        let rest = custom_id.strip_prefix(button_ids::QUEUE_PAGE_PREFIX)?;
        let (target, page) = rest.split_once(':')?;
        let target = [
            PagerTarget::First,
            PagerTarget::Previous,
            PagerTarget::Next,
            PagerTarget::Last,
        ]
        .into_iter()
        .find(|t| t.as_str() == target)?;
        Some((target, page.parse().ok()?))
    }
}

/// Estado visual de un botón del panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonState {
    pub emoji: &'static str,
    pub label: Option<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelButtons {
    pub play_pause: ButtonState,
    pub skip: ButtonState,
    pub stop: ButtonState,
    pub loop_mode: ButtonState,
    pub mute: ButtonState,
    pub volume_up: ButtonState,
    pub volume_down: ButtonState,
    pub queue: ButtonState,
}

impl PanelButtons {
    /// Calcula qué botones están activos según el estado del servidor.
    pub fn from_state(snapshot: &GuildSnapshot, connected: bool) -> Self {
        let active = snapshot.phase.is_active();
        let has_pending = !snapshot.queued.is_empty() || !snapshot.stubs.is_empty();

        let play_pause = match snapshot.phase {
            PlaybackPhase::Playing | PlaybackPhase::Starting => button("⏸️", None, false),
            PlaybackPhase::Paused => button("▶️", None, false),
            PlaybackPhase::Idle if has_pending || snapshot.current.is_some() => {
                button("▶️", None, false)
            }
            PlaybackPhase::Idle => button("⏯️", None, true),
        };

        let loop_emoji = match snapshot.loop_mode {
            LoopMode::Off => "🔁",
            mode => mode.emoji(),
        };

        Self {
            play_pause,
            skip: button("⏭️", None, !(active || has_pending)),
            stop: button("⏹️", None, !active),
            loop_mode: button(
                loop_emoji,
                Some(format!("Loop: {}", snapshot.loop_mode.label())),
                !connected,
            ),
            mute: if snapshot.muted {
                button("🔇", Some("Activar sonido".to_string()), !connected)
            } else {
                button("🔊", Some("Silenciar".to_string()), !connected)
            },
            volume_up: button("🔊", Some("+10%".to_string()), !connected || snapshot.muted),
            volume_down: button("🔉", Some("-10%".to_string()), !connected || snapshot.muted),
            queue: button("📜", Some("Cola".to_string()), false),
        }
    }
}

fn button(emoji: &'static str, label: Option<String>, disabled: bool) -> ButtonState {
    ButtonState {
        emoji,
        label,
        disabled,
    }
}

fn render(custom_id: String, state: &ButtonState, style: ButtonStyle) -> CreateButton {
    let mut button = CreateButton::new(custom_id)
        .emoji(ReactionType::Unicode(state.emoji.to_string()))
        .style(style)
        .disabled(state.disabled);
    if let Some(label) = &state.label {
        button = button.label(label);
    }
    button
}

/// Dos filas de botones del panel.
pub fn panel_rows(
    guild_id: GuildId,
    snapshot: &GuildSnapshot,
    connected: bool,
    support_url: Option<&str>,
) -> Vec<CreateActionRow> {
    let state = PanelButtons::from_state(snapshot, connected);

    let loop_style = if snapshot.loop_mode == LoopMode::Off {
        ButtonStyle::Secondary
    } else {
        ButtonStyle::Success
    };

    let row1 = CreateActionRow::Buttons(vec![
        render(PanelAction::PlayPause.custom_id(guild_id), &state.play_pause, ButtonStyle::Primary),
        render(PanelAction::Skip.custom_id(guild_id), &state.skip, ButtonStyle::Secondary),
        render(PanelAction::Stop.custom_id(guild_id), &state.stop, ButtonStyle::Danger),
        render(PanelAction::Loop.custom_id(guild_id), &state.loop_mode, loop_style),
        render(PanelAction::Mute.custom_id(guild_id), &state.mute, ButtonStyle::Secondary),
    ]);

    let mut row2 = vec![
        render(PanelAction::VolumeUp.custom_id(guild_id), &state.volume_up, ButtonStyle::Secondary),
        render(PanelAction::Queue.custom_id(guild_id), &state.queue, ButtonStyle::Primary),
    ];
    if let Some(url) = support_url {
        row2.push(
            CreateButton::new_link(url)
                .label("Soporte")
                .emoji(ReactionType::Unicode("🔗".to_string())),
        );
    }
    row2.push(render(
        PanelAction::VolumeDown.custom_id(guild_id),
        &state.volume_down,
        ButtonStyle::Secondary,
    ));

    vec![row1, CreateActionRow::Buttons(row2)]
}

/// Controles de paginación de la cola.
pub fn pager_row(page: usize, total_pages: usize) -> CreateActionRow {
    let at_start = page == 0;
    let at_end = page + 1 >= total_pages;

    let nav = |target: PagerTarget, emoji: &str, disabled: bool| {
        CreateButton::new(target.custom_id(page))
            .emoji(ReactionType::Unicode(emoji.to_string()))
            .style(ButtonStyle::Secondary)
            .disabled(disabled)
    };

    let label = CreateButton::new(format!("{}label:{}", button_ids::QUEUE_PAGE_PREFIX, page))
        .label(format!("Página {}/{}", page + 1, total_pages.max(1)))
        .style(ButtonStyle::Secondary)
        .disabled(true);

    CreateActionRow::Buttons(vec![
        nav(PagerTarget::First, "⏮️", at_start),
        nav(PagerTarget::Previous, "◀️", at_start),
        label,
        nav(PagerTarget::Next, "▶️", at_end),
        nav(PagerTarget::Last, "⏭️", at_end),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::track;
    use crate::sources::StubEntry;
    use pretty_assertions::assert_eq;

    fn snapshot(phase: PlaybackPhase) -> GuildSnapshot {
        GuildSnapshot {
            current: phase.is_active().then(|| track("now")),
            queued: Vec::new(),
            stubs: Vec::new(),
            playlist_title: None,
            phase,
            loop_mode: LoopMode::Off,
            volume: 70,
            muted: false,
        }
    }

    #[test]
    fn test_panel_custom_id_round_trip() {
        let guild = GuildId::new(555);
        for action in PanelAction::ALL {
            assert_eq!(
                PanelAction::parse_custom_id(&action.custom_id(guild)),
                Some((action, guild))
            );
        }
        assert_eq!(PanelAction::VolumeUp.custom_id(guild), "musicpanel_vol_up:555");
        assert_eq!(PanelAction::parse_custom_id("musicpanel_dance:555"), None);
        assert_eq!(PanelAction::parse_custom_id("musicpanel_skip:abc"), None);
        assert_eq!(PanelAction::parse_custom_id("queuepage_next:1"), None);
    }

    #[test]
    fn test_only_play_pause_defers_reply() {
        let deferred: Vec<PanelAction> = PanelAction::ALL
            .into_iter()
            .filter(|action| action.defers_reply())
            .collect();
        assert_eq!(deferred, vec![PanelAction::PlayPause]);
    }

    #[test]
    fn test_pager_targets() {
        assert_eq!(
            PagerTarget::parse_custom_id("queuepage_next:2"),
            Some((PagerTarget::Next, 2))
        );
        assert_eq!(PagerTarget::parse_custom_id("queuepage_label:2"), None);

        assert_eq!(PagerTarget::Next.resolve(2, 3), 2);
        assert_eq!(PagerTarget::Previous.resolve(0, 3), 0);
        assert_eq!(PagerTarget::Last.resolve(0, 3), 2);
        assert_eq!(PagerTarget::First.resolve(2, 3), 0);
    }

    #[test]
    fn test_idle_panel_disables_playback_buttons() {
        let state = PanelButtons::from_state(&snapshot(PlaybackPhase::Idle), false);

        assert_eq!(state.play_pause, button("⏯️", None, true));
        assert!(state.skip.disabled);
        assert!(state.stop.disabled);
        assert!(state.loop_mode.disabled);
        assert!(state.mute.disabled);
        assert!(state.volume_up.disabled);
        assert!(!state.queue.disabled);
    }

    #[test]
    fn test_playing_panel_enables_controls() {
        let state = PanelButtons::from_state(&snapshot(PlaybackPhase::Playing), true);

        assert_eq!(state.play_pause.emoji, "⏸️");
        assert!(!state.skip.disabled);
        assert!(!state.stop.disabled);
        assert_eq!(state.loop_mode.label.as_deref(), Some("Loop: Desactivado"));
        assert!(!state.volume_down.disabled);
    }

    #[test]
    fn test_idle_with_pending_stubs_can_start() {
        let mut idle = snapshot(PlaybackPhase::Idle);
        idle.stubs.push(StubEntry {
            id: None,
            title: None,
            url: "https://youtu.be/x".into(),
        });

        let state = PanelButtons::from_state(&idle, true);
        assert_eq!(state.play_pause, button("▶️", None, false));
        assert!(!state.skip.disabled);
        assert!(state.stop.disabled);
    }

    #[test]
    fn test_muted_disables_volume() {
        let mut paused = snapshot(PlaybackPhase::Paused);
        paused.muted = true;
        paused.loop_mode = LoopMode::Queue;

        let state = PanelButtons::from_state(&paused, true);
        assert_eq!(state.play_pause.emoji, "▶️");
        assert_eq!(state.mute.emoji, "🔇");
        assert!(state.volume_up.disabled);
        assert!(state.volume_down.disabled);
        assert_eq!(state.loop_mode.label.as_deref(), Some("Loop: Cola"));
    }
}
