use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Local;
use rand::Rng as _;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    badge::{BadgeRenderer, BadgeSurface},
    consts::{NOTIF_TIMEOUT_NEVER, TEST_NOTIFICATION_MAX_COUNT},
    model::{
        ButtonAction, ButtonIndexMap, IdentityState, NotificationId, PageRecord, RawCount,
        UnreadState,
    },
    notifications::{build_notification, NotificationEvent, NotificationSink, SoundPlayer},
    settings::{Settings, SettingsStore},
    shell::PageOpener,
    site::{PlatformCapabilities, SiteProfile},
    Error, Result,
};

/// Host surfaces the engine drives.
#[derive(Clone)]
pub struct Surfaces {
    pub capabilities: PlatformCapabilities,
    pub badge: Arc<dyn BadgeSurface>,
    pub notifier: Arc<dyn NotificationSink>,
    pub sound: Arc<dyn SoundPlayer>,
    pub opener: Arc<dyn PageOpener>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Notifications,
    Messages,
    SignIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    SignedOut,
    Unchanged,
    Suppressed,
    Notified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPhase {
    Idle,
    Shown,
    AutoClearScheduled,
}

struct ClearTimer {
    epoch: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct NotificationSlot {
    buttons: ButtonIndexMap,
    clear_timer: Option<ClearTimer>,
}

#[derive(Default)]
struct EngineState {
    unread: UnreadState,
    identity: IdentityState,
    slots: HashMap<NotificationId, NotificationSlot>,
    timer_epoch: u64,
}

/// Owns the unread and identity state and decides what the user sees.
///
/// Every page record goes through [`ReconciliationEngine::ingest`]. A user
/// notification is raised only when the badge text changed and the new total
/// may be higher than what the badge showed before. Each notification id has
/// its own button map and at most one pending auto-clear timer.
pub struct ReconciliationEngine {
    profile: Arc<SiteProfile>,
    capabilities: PlatformCapabilities,
    settings: Arc<SettingsStore>,
    badge: BadgeRenderer,
    notifier: Arc<dyn NotificationSink>,
    sound: Arc<dyn SoundPlayer>,
    opener: Arc<dyn PageOpener>,
    state: Arc<Mutex<EngineState>>,
}

impl ReconciliationEngine {
    pub fn new(
        profile: Arc<SiteProfile>,
        settings: Arc<SettingsStore>,
        surfaces: Surfaces,
    ) -> Self {
        Self {
            profile,
            capabilities: surfaces.capabilities,
            settings,
            badge: BadgeRenderer::new(surfaces.badge),
            notifier: surfaces.notifier,
            sound: surfaces.sound,
            opener: surfaces.opener,
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    pub fn ingest(&self, record: &PageRecord) -> IngestOutcome {
        let unread = UnreadState::new(
            count_or_zero(&record.notif_count, "notification"),
            count_or_zero(&record.message_count, "message"),
        );

        {
            let mut state = lock_state(&self.state);
            state.unread = unread;
            state.identity.signed_in = record.signed_in;
            state.identity.username = record.username.trim().to_string();
            if let Some(theme) = &record.theme {
                state.identity.observe_theme(theme);
            }
            state.identity.last_check = Some(Local::now());
        }

        if !record.signed_in {
            self.badge.render(0, false);
            debug!("page reports signed out");
            return IngestOutcome::SignedOut;
        }

        let settings = self.settings.get_all();
        self.badge.apply_color(&settings.badge_color);
        let Some(change) = self.badge.render(unread.total(), true) else {
            return IngestOutcome::Unchanged;
        };

        if !may_have_increased(&change.previous, unread.total()) {
            debug!(
                "badge {:?} -> {:?}, not notifying",
                change.previous, change.current
            );
            return IngestOutcome::Suppressed;
        }

        info!(
            "unread counts changed: {} notifications, {} messages",
            unread.notifs, unread.messages
        );
        if self.notify_user(NotificationId::Live, &settings, unread) {
            IngestOutcome::Notified
        } else {
            IngestOutcome::Suppressed
        }
    }

    /// Plays the sound and shows the notification for `id`. Returns whether
    /// a notification was displayed.
    pub fn notify_user(
        &self,
        id: NotificationId,
        settings: &Settings,
        unread: UnreadState,
    ) -> bool {
        if !settings.notif_enabled {
            debug!("notifications disabled, skipping {id}");
            return false;
        }
        if settings.notif_sound {
            self.sound.play();
        }

        let (payload, buttons) =
            build_notification(&self.profile, self.capabilities, settings, unread);
        {
            let mut state = lock_state(&self.state);
            let slot = state.slots.entry(id).or_default();
            if let Some(timer) = slot.clear_timer.take() {
                timer.handle.abort();
            }
            slot.buttons = buttons;
        }

        if let Err(error) = self.notifier.show(id, &payload) {
            warn!("failed to show notification {id}: {error}");
            lock_state(&self.state).slots.remove(&id);
            return false;
        }

        if settings.notif_timeout != NOTIF_TIMEOUT_NEVER {
            self.schedule_auto_clear(id, Duration::from_secs(settings.notif_timeout));
        }
        true
    }

    /// Shows a notification under the test id with random counts, using
    /// `draft` instead of the stored settings.
    pub fn test_notification(&self, draft: &Settings) -> UnreadState {
        self.clear_notification(NotificationId::Test);
        let unread = {
            let mut rng = rand::thread_rng();
            UnreadState::new(
                rng.gen_range(0..=TEST_NOTIFICATION_MAX_COUNT),
                rng.gen_range(0..=TEST_NOTIFICATION_MAX_COUNT),
            )
        };
        self.notify_user(NotificationId::Test, draft, unread);
        unread
    }

    pub fn handle_event(&self, event: NotificationEvent) {
        match event {
            NotificationEvent::ButtonClicked { id, index } => self.on_button_clicked(id, index),
            NotificationEvent::Clicked { id } => self.on_generic_click(id),
            NotificationEvent::Closed { id } => self.forget(id),
        }
    }

    pub fn on_button_clicked(&self, id: NotificationId, index: usize) {
        let action = lock_state(&self.state)
            .slots
            .get(&id)
            .and_then(|slot| slot.buttons.action_for(index));
        let page = match action {
            Some(ButtonAction::OpenNotifications) => PageKind::Notifications,
            Some(ButtonAction::OpenMessages) => PageKind::Messages,
            None => {
                debug!("button {index} of {id} has no action");
                return;
            }
        };

        if let Err(error) = self.open_page(page) {
            warn!("failed to open {page:?} page: {error}");
        }
        self.clear_notification(id);
    }

    pub fn on_generic_click(&self, id: NotificationId) {
        self.clear_notification(id);
    }

    pub fn clear_notification(&self, id: NotificationId) {
        self.forget(id);
        if let Err(error) = self.notifier.clear(id) {
            warn!("failed to clear notification {id}: {error}");
        }
    }

    /// Restarts the auto-clear timer of a notification that is still shown.
    pub fn reschedule_auto_clear(&self, id: NotificationId, timeout_secs: u64) {
        if timeout_secs == NOTIF_TIMEOUT_NEVER {
            return;
        }
        if !lock_state(&self.state).slots.contains_key(&id) {
            return;
        }
        self.schedule_auto_clear(id, Duration::from_secs(timeout_secs));
    }

    /// Repaints the badge background with the stored color while signed in.
    pub fn recolor_badge(&self) {
        if !lock_state(&self.state).identity.signed_in {
            return;
        }
        self.badge.apply_color(&self.settings.get_all().badge_color);
    }

    pub fn resolve_theme(&self, theme: &str) -> Result<String> {
        if theme != "auto" {
            return Ok(theme.to_string());
        }
        lock_state(&self.state)
            .identity
            .auto_theme
            .clone()
            .ok_or(Error::StateNotReady)
    }

    pub fn open_page(&self, page: PageKind) -> Result<()> {
        let links = &self.profile.links;
        let path = match page {
            PageKind::Notifications => &links.notifs,
            PageKind::Messages => &links.messages,
            PageKind::SignIn => &links.sign_in,
        };
        let domain = self.settings.get_all().preferred_domain;
        self.opener.open(&self.profile.url(&domain, path))
    }

    pub fn phase(&self, id: NotificationId) -> NotificationPhase {
        match lock_state(&self.state).slots.get(&id) {
            None => NotificationPhase::Idle,
            Some(slot) if slot.clear_timer.is_some() => NotificationPhase::AutoClearScheduled,
            Some(_) => NotificationPhase::Shown,
        }
    }

    pub fn button_indexes(&self, id: NotificationId) -> Option<ButtonIndexMap> {
        lock_state(&self.state).slots.get(&id).map(|slot| slot.buttons)
    }

    pub fn unread(&self) -> UnreadState {
        lock_state(&self.state).unread
    }

    pub fn identity(&self) -> IdentityState {
        lock_state(&self.state).identity.clone()
    }

    fn forget(&self, id: NotificationId) {
        let removed = lock_state(&self.state).slots.remove(&id);
        if let Some(timer) = removed.and_then(|slot| slot.clear_timer) {
            timer.handle.abort();
        }
    }

    fn schedule_auto_clear(&self, id: NotificationId, delay: Duration) {
        let mut state = lock_state(&self.state);
        state.timer_epoch = state.timer_epoch.wrapping_add(1);
        let epoch = state.timer_epoch;
        let Some(slot) = state.slots.get_mut(&id) else {
            return;
        };
        if let Some(previous) = slot.clear_timer.take() {
            previous.handle.abort();
        }

        let shared = self.state.clone();
        let notifier = self.notifier.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = {
                let mut state = lock_state(&shared);
                let current = state
                    .slots
                    .get(&id)
                    .and_then(|slot| slot.clear_timer.as_ref())
                    .map(|timer| timer.epoch);
                if current == Some(epoch) {
                    state.slots.remove(&id);
                    true
                } else {
                    false
                }
            };
            if fired {
                debug!("auto-clearing notification {id}");
                if let Err(error) = notifier.clear(id) {
                    warn!("failed to auto-clear notification {id}: {error}");
                }
            }
        });
        slot.clear_timer = Some(ClearTimer { epoch, handle });
        debug!("notification {id} clears in {}s", delay.as_secs());
    }
}

fn lock_state(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn count_or_zero(raw: &RawCount, what: &str) -> u64 {
    raw.value().unwrap_or_else(|| {
        warn!("unreadable {what} count {raw:?}, using 0");
        0
    })
}

/// `false` only when the previous badge text was an exact number at least as
/// large as `total`. Shortened ("12k"), empty and signed-out text could stand
/// for a smaller count.
fn may_have_increased(previous_text: &str, total: u64) -> bool {
    if total == 0 {
        return false;
    }
    match previous_text.parse::<u64>() {
        Ok(previous) => total > previous,
        Err(_) => true,
    }
}
