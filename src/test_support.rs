//! Recording doubles for the host surfaces, shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use futures_util::{future::BoxFuture, FutureExt as _};

use crate::{
    badge::BadgeSurface,
    domains::{DomainAuthorizer, OriginGrants},
    engine::{ReconciliationEngine, Surfaces},
    model::NotificationId,
    notifications::{NotificationPayload, NotificationSink, SoundPlayer},
    poller::PageSource,
    settings::{SettingsBackend, SettingsStore},
    shell::PageOpener,
    site::{PlatformCapabilities, SiteProfile},
    Error, Result,
};

/// In-memory grants that count permission checks and requests.
pub struct CountingAuthorizer {
    grants: OriginGrants,
    checks: AtomicUsize,
    requests: AtomicUsize,
}

impl CountingAuthorizer {
    pub fn granting(domains: &[&str]) -> Self {
        Self {
            grants: OriginGrants::in_memory(domains.iter().copied()),
            checks: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl DomainAuthorizer for CountingAuthorizer {
    fn has_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.grants.has_permission(domain)
    }

    fn request_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.grants.request_permission(domain)
    }

    fn revoke_permission<'a>(&'a self, domain: &'a str) -> BoxFuture<'a, bool> {
        self.grants.revoke_permission(domain)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<String>>,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn with_snapshot(snapshot: Option<&str>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot.map(str::to_string)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<String> {
        self.snapshot.lock().unwrap().clone()
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &str) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().unwrap() = Some(snapshot.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBadge {
    texts: Mutex<Vec<String>>,
    colors: Mutex<Vec<String>>,
}

impl RecordingBadge {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn colors(&self) -> Vec<String> {
        self.colors.lock().unwrap().clone()
    }
}

impl BadgeSurface for RecordingBadge {
    fn set_text(&self, text: &str) -> Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn set_background(&self, color: &str) -> Result<()> {
        self.colors.lock().unwrap().push(color.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(NotificationId, NotificationPayload)>>,
    clears: Mutex<Vec<NotificationId>>,
}

impl RecordingNotifier {
    pub fn shown(&self) -> Vec<(NotificationId, NotificationPayload)> {
        self.shown.lock().unwrap().clone()
    }

    pub fn clears(&self) -> Vec<NotificationId> {
        self.clears.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn show(&self, id: NotificationId, payload: &NotificationPayload) -> Result<()> {
        self.shown.lock().unwrap().push((id, payload.clone()));
        Ok(())
    }

    fn clear(&self, id: NotificationId) -> Result<()> {
        self.clears.lock().unwrap().push(id);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingSound {
    plays: AtomicUsize,
}

impl CountingSound {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl SoundPlayer for CountingSound {
    fn play(&self) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingOpener {
    urls: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl PageOpener for RecordingOpener {
    fn open(&self, url: &str) -> Result<()> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Serves queued pages in order; an empty queue answers with a fetch error.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<VecDeque<Result<String>>>,
    fetched: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn push_page(&self, notifs: u64, messages: u64) {
        self.pages
            .lock()
            .unwrap()
            .push_back(Ok(signed_in_page(notifs, messages)));
    }

    pub fn push_signed_out_page(&self) {
        self.pages.lock().unwrap().push_back(Ok(
            "<html><body data-theme=\"default\"><a href=\"/session/new\">Sign in</a></body></html>"
                .to_string(),
        ));
    }

    pub fn push_error(&self, message: &str) {
        self.pages
            .lock()
            .unwrap()
            .push_back(Err(Error::Fetch(message.to_string())));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        self.fetched.lock().unwrap().push(url.to_string());
        let next = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Fetch("no scripted page".to_string())));
        async move { next }.boxed()
    }
}

pub fn signed_in_page(notifs: u64, messages: u64) -> String {
    format!(
        r#"<html><body data-theme="dark-blue"><nav>
<span class="js-notification-ticker">{notifs}</span>
<i class="fa-embedded--unread-message"></i><span>{messages}</span>
<a class="header__link-user" href="/registrations/edit">Account</a>
</nav><nav><a href="/profiles/tester">tester</a></nav></body></html>"#
    )
}

pub struct EngineFixture {
    pub settings: Arc<SettingsStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub authorizer: Arc<CountingAuthorizer>,
    pub backend: Arc<MemoryBackend>,
    pub badge: Arc<RecordingBadge>,
    pub notifier: Arc<RecordingNotifier>,
    pub sound: Arc<CountingSound>,
    pub opener: Arc<RecordingOpener>,
    pub surfaces: Surfaces,
}

impl EngineFixture {
    pub async fn grant(&self, domain: &str) {
        assert!(self.authorizer.request_permission(domain).await);
    }
}

/// Engine over recording doubles with default settings and the default
/// domain granted.
pub fn engine_fixture(capabilities: PlatformCapabilities) -> EngineFixture {
    let profile = Arc::new(SiteProfile::derpibooru());
    let authorizer = Arc::new(CountingAuthorizer::granting(&[profile.default_domain()]));
    let backend = Arc::new(MemoryBackend::default());
    let settings = Arc::new(SettingsStore::new(
        profile.clone(),
        authorizer.clone(),
        Box::new(backend.clone()),
    ));

    let badge = Arc::new(RecordingBadge::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let sound = Arc::new(CountingSound::default());
    let opener = Arc::new(RecordingOpener::default());
    let surfaces = Surfaces {
        capabilities,
        badge: badge.clone(),
        notifier: notifier.clone(),
        sound: sound.clone(),
        opener: opener.clone(),
    };
    let engine = Arc::new(ReconciliationEngine::new(
        profile,
        settings.clone(),
        surfaces.clone(),
    ));

    EngineFixture {
        settings,
        engine,
        authorizer,
        backend,
        badge,
        notifier,
        sound,
        opener,
        surfaces,
    }
}
