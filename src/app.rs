use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    consts::NOTIF_TIMEOUT_NEVER,
    domains::DomainAuthorizer,
    engine::{ReconciliationEngine, Surfaces},
    model::NotificationId,
    observer::HtmlPageObserver,
    poller::{PageSource, PollingLoop},
    router::MessageRouter,
    settings::{SettingKey, SettingsBackend, SettingsStore},
    site::SiteProfile,
};

/// Every long-lived component, constructed once per process.
pub struct App {
    pub settings: Arc<SettingsStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub poller: Arc<PollingLoop>,
    pub router: MessageRouter,
}

impl App {
    /// Loads the settings, wires the setting effects, runs the first check
    /// and starts the schedule.
    pub async fn start(
        profile: Arc<SiteProfile>,
        authorizer: Arc<dyn DomainAuthorizer>,
        backend: Box<dyn SettingsBackend>,
        surfaces: Surfaces,
        source: Arc<dyn PageSource>,
    ) -> Self {
        let settings = Arc::new(SettingsStore::new(
            profile.clone(),
            authorizer.clone(),
            backend,
        ));
        let loaded = settings.load().await;

        let engine = Arc::new(ReconciliationEngine::new(
            profile.clone(),
            settings.clone(),
            surfaces,
        ));
        let poller = Arc::new(PollingLoop::new(
            settings.clone(),
            engine.clone(),
            source,
            Arc::new(HtmlPageObserver::new(profile)),
        ));
        register_effects(&settings, &engine, &poller);

        if poller.poll_once().await.is_err() {
            debug!("initial check failed, waiting for the schedule");
        }
        poller.start(loaded.update_interval);

        let router = MessageRouter::new(
            settings.clone(),
            engine.clone(),
            poller.clone(),
            authorizer,
            env!("CARGO_PKG_VERSION"),
        );
        info!("started, watching {}", loaded.preferred_domain);

        Self {
            settings,
            engine,
            poller,
            router,
        }
    }

    pub fn shutdown(&self) {
        self.poller.stop();
        self.engine.clear_notification(NotificationId::Live);
        self.engine.clear_notification(NotificationId::Test);
    }
}

fn register_effects(
    settings: &SettingsStore,
    engine: &Arc<ReconciliationEngine>,
    poller: &Arc<PollingLoop>,
) {
    let weak_engine = Arc::downgrade(engine);
    settings.subscribe(SettingKey::BadgeColor, move |_| {
        if let Some(engine) = weak_engine.upgrade() {
            engine.recolor_badge();
        }
    });

    let weak_poller = Arc::downgrade(poller);
    settings.subscribe(SettingKey::UpdateInterval, move |value| {
        if let (Some(poller), Some(secs)) = (weak_poller.upgrade(), value.as_seconds()) {
            poller.restart(secs);
        }
    });

    let weak_engine = Arc::downgrade(engine);
    settings.subscribe(SettingKey::NotifEnabled, move |value| {
        if value.as_flag() != Some(false) {
            return;
        }
        if let Some(engine) = weak_engine.upgrade() {
            engine.clear_notification(NotificationId::Live);
        }
    });

    let weak_engine = Arc::downgrade(engine);
    settings.subscribe(SettingKey::NotifTimeout, move |value| {
        let Some(secs) = value.as_seconds().filter(|secs| *secs != NOTIF_TIMEOUT_NEVER) else {
            return;
        };
        if let Some(engine) = weak_engine.upgrade() {
            engine.reschedule_auto_clear(NotificationId::Live, secs);
        }
    });
}
