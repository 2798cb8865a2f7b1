use std::{
    io::Write as _,
    process::{Child, Command, Stdio},
    sync::{Mutex, PoisonError},
};

#[cfg(target_os = "macos")]
use mac_notification_sys::{MainButton, Notification, NotificationResponse};
use serde::Serialize;
#[cfg(target_os = "macos")]
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::{
    consts::NOTIF_TIMEOUT_NEVER,
    core::plural,
    model::{ButtonIndexMap, NotificationId, UnreadState},
    settings::Settings,
    site::{PlatformCapabilities, SiteProfile},
    Result,
};

const NOTIFICATION_MESSAGE: &str = "You have unread notifications";
const BELL_EMOJI: &str = "🔔";
const ENVELOPE_EMOJI: &str = "✉";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationButton {
    pub title: String,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub icon_url: String,
    pub buttons: Vec<NotificationButton>,
    pub require_interaction: bool,
    pub silent: bool,
}

/// Builds the payload for `unread` and the button map that goes with it.
///
/// The notifications button comes first when present, so a messages-only
/// notification has its messages button at index 0. Platforms without
/// action buttons get the same entries folded into the message text and an
/// empty map.
pub fn build_notification(
    profile: &SiteProfile,
    capabilities: PlatformCapabilities,
    settings: &Settings,
    unread: UnreadState,
) -> (NotificationPayload, ButtonIndexMap) {
    let mut entries = Vec::new();
    let mut map = ButtonIndexMap::default();

    if unread.notifs > 0 {
        let icon = capabilities
            .supports_emoji_icons
            .then(|| BELL_EMOJI.to_string())
            .unwrap_or_else(|| format!("img/bell-{}.svg", settings.bell_icon_style));
        map.notifs = Some(entries.len());
        entries.push(NotificationButton {
            title: format!("View {}", plural(unread.notifs, "Notification")),
            icon_url: settings.notif_icons.then_some(icon),
        });
    }
    if unread.messages > 0 {
        let icon = capabilities
            .supports_emoji_icons
            .then(|| ENVELOPE_EMOJI.to_string())
            .unwrap_or_else(|| format!("img/envelope-{}.svg", settings.envelope_icon_style));
        map.messages = Some(entries.len());
        entries.push(NotificationButton {
            title: format!("View {}", plural(unread.messages, "Message")),
            icon_url: settings.notif_icons.then_some(icon),
        });
    }

    let mut payload = NotificationPayload {
        title: profile.name.clone(),
        message: NOTIFICATION_MESSAGE.to_string(),
        icon_url: profile.notification_icon.clone(),
        buttons: Vec::new(),
        require_interaction: settings.notif_timeout == NOTIF_TIMEOUT_NEVER,
        silent: true,
    };

    if capabilities.supports_action_buttons {
        payload.buttons = entries;
    } else {
        map = ButtonIndexMap::default();
        if !entries.is_empty() {
            payload.message.push_str(":\n");
        }
        for entry in entries {
            payload.message.push('\n');
            if let Some(icon) = &entry.icon_url {
                payload.message.push_str(icon);
                payload.message.push_str("   ");
            }
            payload
                .message
                .push_str(entry.title.strip_prefix("View ").unwrap_or(&entry.title));
        }
    }

    (payload, map)
}

/// Shows and clears notifications on the host.
pub trait NotificationSink: Send + Sync {
    fn show(&self, id: NotificationId, payload: &NotificationPayload) -> Result<()>;
    fn clear(&self, id: NotificationId) -> Result<()>;
}

pub trait SoundPlayer: Send + Sync {
    /// Starts the alert from the beginning, cutting off a previous playback.
    fn play(&self);
}

/// User interaction reported back by a notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    ButtonClicked { id: NotificationId, index: usize },
    Clicked { id: NotificationId },
    Closed { id: NotificationId },
}

/// Writes notifications to the log. Used where no native surface exists.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn show(&self, id: NotificationId, payload: &NotificationPayload) -> Result<()> {
        let buttons: Vec<&str> = payload.buttons.iter().map(|b| b.title.as_str()).collect();
        info!(
            "notification {id}: {} - {} {buttons:?}",
            payload.title, payload.message
        );
        Ok(())
    }

    fn clear(&self, id: NotificationId) -> Result<()> {
        debug!("notification {id} cleared");
        Ok(())
    }
}

#[cfg(target_os = "macos")]
pub struct MacNotifier {
    events: UnboundedSender<NotificationEvent>,
}

#[cfg(target_os = "macos")]
impl MacNotifier {
    pub fn new(events: UnboundedSender<NotificationEvent>) -> Self {
        Self { events }
    }
}

#[cfg(target_os = "macos")]
impl NotificationSink for MacNotifier {
    fn show(&self, id: NotificationId, payload: &NotificationPayload) -> Result<()> {
        let payload = payload.clone();
        let events = self.events.clone();
        std::thread::spawn(move || {
            ensure_macos_notification_application();
            let titles: Vec<&str> = payload.buttons.iter().map(|b| b.title.as_str()).collect();

            let mut notification = Notification::new();
            notification
                .title(&payload.title)
                .message(&payload.message)
                .close_button("Dismiss")
                .wait_for_click(true)
                .asynchronous(false);
            match titles.as_slice() {
                [] => {}
                [single] => {
                    notification.main_button(MainButton::SingleAction(*single));
                }
                many => {
                    notification.main_button(MainButton::DropdownActions("View", many));
                }
            }

            let event = match notification.send() {
                Ok(NotificationResponse::ActionButton(title)) => titles
                    .iter()
                    .position(|candidate| *candidate == title)
                    .map(|index| NotificationEvent::ButtonClicked { id, index }),
                Ok(NotificationResponse::Click) => Some(NotificationEvent::Clicked { id }),
                Ok(_) => Some(NotificationEvent::Closed { id }),
                Err(error) => {
                    warn!("failed to show macOS notification: {error}");
                    None
                }
            };
            if let Some(event) = event {
                let _ = events.send(event);
            }
        });
        Ok(())
    }

    fn clear(&self, id: NotificationId) -> Result<()> {
        // Delivered banners can only be dismissed by the user.
        debug!("notification {id} released");
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn ensure_macos_notification_application() {
    static INIT_NOTIFICATION_APP: std::sync::Once = std::sync::Once::new();
    INIT_NOTIFICATION_APP.call_once(|| {
        for bundle_id in ["com.apple.Terminal", "com.apple.Finder"] {
            match mac_notification_sys::set_application(bundle_id) {
                Ok(_) => return,
                Err(error) => {
                    debug!("failed to set macOS notification bundle id {bundle_id}: {error}")
                }
            }
        }
    });
}

/// Plays the desktop's alert sound through an external player, falling back
/// to the terminal bell.
pub struct SystemSound {
    command: Option<(String, Vec<String>)>,
    current: Mutex<Option<Child>>,
}

impl SystemSound {
    pub fn platform_default() -> Self {
        #[cfg(target_os = "macos")]
        let command = Some((
            "afplay".to_string(),
            vec!["/System/Library/Sounds/Glass.aiff".to_string()],
        ));
        #[cfg(target_os = "linux")]
        let command = Some((
            "paplay".to_string(),
            vec!["/usr/share/sounds/freedesktop/stereo/message-new-instant.oga".to_string()],
        ));
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        let command = None;

        Self {
            command,
            current: Mutex::new(None),
        }
    }

    fn ring_bell() {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

impl SoundPlayer for SystemSound {
    fn play(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut previous) = current.take() {
            let _ = previous.kill();
            let _ = previous.wait();
        }

        let Some((program, args)) = &self.command else {
            Self::ring_bell();
            return;
        };
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => *current = Some(child),
            Err(error) => {
                warn!("failed to start {program}: {error}");
                Self::ring_bell();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::defaults(&SiteProfile::derpibooru())
    }

    #[test]
    fn messages_only_button_takes_first_slot() {
        let (payload, map) = build_notification(
            &SiteProfile::derpibooru(),
            PlatformCapabilities::ACTION_BUTTONS,
            &settings(),
            UnreadState::new(0, 3),
        );

        assert_eq!(
            payload.buttons,
            vec![NotificationButton {
                title: "View 3 Messages".to_string(),
                icon_url: Some("img/envelope-orange.svg".to_string()),
            }]
        );
        assert_eq!(map.notifs, None);
        assert_eq!(map.messages, Some(0));
    }

    #[test]
    fn both_buttons_in_fixed_order() {
        let mut settings = settings();
        settings.bell_icon_style = "white".to_string();
        settings.notif_timeout = 10;

        let (payload, map) = build_notification(
            &SiteProfile::derpibooru(),
            PlatformCapabilities::ACTION_BUTTONS,
            &settings,
            UnreadState::new(1, 2),
        );

        assert_eq!(payload.title, "Derpibooru");
        assert_eq!(payload.message, "You have unread notifications");
        assert_eq!(payload.icon_url, "img/notif-128.png");
        assert_eq!(payload.buttons[0].title, "View 1 Notification");
        assert_eq!(
            payload.buttons[0].icon_url.as_deref(),
            Some("img/bell-white.svg")
        );
        assert_eq!(payload.buttons[1].title, "View 2 Messages");
        assert!(!payload.require_interaction);
        assert!(payload.silent);
        assert_eq!(map.notifs, Some(0));
        assert_eq!(map.messages, Some(1));
    }

    #[test]
    fn icons_can_be_turned_off() {
        let mut settings = settings();
        settings.notif_icons = false;

        let (payload, _) = build_notification(
            &SiteProfile::derpibooru(),
            PlatformCapabilities::ACTION_BUTTONS,
            &settings,
            UnreadState::new(4, 0),
        );

        assert_eq!(payload.buttons[0].icon_url, None);
        assert!(payload.require_interaction);
    }

    #[test]
    fn plain_text_platform_folds_entries_into_message() {
        let (payload, map) = build_notification(
            &SiteProfile::derpibooru(),
            PlatformCapabilities::PLAIN_TEXT,
            &settings(),
            UnreadState::new(2, 1),
        );

        assert!(payload.buttons.is_empty());
        assert_eq!(map, ButtonIndexMap::default());
        assert_eq!(
            payload.message,
            "You have unread notifications:\n\n🔔   2 Notifications\n✉   1 Message"
        );
    }
}
