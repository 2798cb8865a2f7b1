use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::Local;
use futures_util::{future::BoxFuture, FutureExt as _};
use tokio::{
    sync::watch,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    consts::{FETCH_TIMEOUT_SECS, LOG_BODY_PREVIEW_CHARS, MAX_PAGE_BYTES},
    core::truncate_message,
    diagnostics::PollDiagnostics,
    engine::ReconciliationEngine,
    observer::PageObserver,
    settings::SettingsStore,
    Error, Result,
};

/// Fetches the HTML of a site page with the user's session.
pub trait PageSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>>;
}

pub struct HttpPageSource {
    client: reqwest::Client,
    cookie: Option<String>,
}

impl HttpPageSource {
    /// `cookie` is sent verbatim as the `Cookie` header of every request.
    pub fn new(cookie: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .cookie_store(true)
            .user_agent(concat!("derpi-notify/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| Error::Fetch(format!("Failed to build HTTP client: {error}")))?;
        Ok(Self {
            client,
            cookie: cookie.filter(|value| !value.trim().is_empty()),
        })
    }
}

impl PageSource for HttpPageSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        async move {
            let mut request = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml");
            if let Some(cookie) = &self.cookie {
                request = request.header(reqwest::header::COOKIE, cookie.trim());
            }

            let response = request
                .send()
                .await
                .map_err(|error| Error::Fetch(format!("Request to {url} failed: {error}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Fetch(format!(
                    "HTTP {} from {url}: {}",
                    status.as_u16(),
                    truncate_message(body.trim(), LOG_BODY_PREVIEW_CHARS)
                )));
            }

            if let Some(content_length) = response.content_length() {
                if content_length > MAX_PAGE_BYTES as u64 {
                    return Err(Error::Fetch(format!(
                        "Page too large ({content_length} bytes > {MAX_PAGE_BYTES} bytes)"
                    )));
                }
            }

            read_limited_body(response, MAX_PAGE_BYTES).await
        }
        .boxed()
    }
}

async fn read_limited_body(mut response: reqwest::Response, max_bytes: usize) -> Result<String> {
    let mut out = Vec::new();
    loop {
        let next_chunk = response
            .chunk()
            .await
            .map_err(|error| Error::Fetch(format!("Failed to read page body: {error}")))?;
        let Some(chunk) = next_chunk else {
            break;
        };
        if out.len().saturating_add(chunk.len()) > max_bytes {
            return Err(Error::Fetch(format!(
                "Page exceeded {max_bytes} byte limit"
            )));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&out).to_string())
}

#[derive(Default)]
struct PollRuntime {
    stop_tx: Option<watch::Sender<bool>>,
    diagnostics: PollDiagnostics,
}

struct PollShared {
    settings: Arc<SettingsStore>,
    engine: Arc<ReconciliationEngine>,
    source: Arc<dyn PageSource>,
    observer: Arc<dyn PageObserver>,
    runtime: Mutex<PollRuntime>,
}

impl PollShared {
    fn lock_runtime(&self) -> MutexGuard<'_, PollRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_once(&self) -> Result<()> {
        let profile = self.settings.profile();
        let domain = self.settings.get_all().preferred_domain;
        let url = profile.url(&domain, &profile.links.parse_path);

        let result = match self.source.fetch(&url).await {
            Ok(html) => Ok(self.observer.observe(&html)),
            Err(error) => Err(error),
        };

        match result {
            Ok(record) => {
                let outcome = self.engine.ingest(&record);
                debug!("checked {url}: {outcome:?}");
                self.lock_runtime().diagnostics.record_success(Local::now());
                Ok(())
            }
            Err(error) => {
                warn!("site check skipped: {error}");
                self.lock_runtime()
                    .diagnostics
                    .record_failure(&error.to_string());
                Err(error)
            }
        }
    }
}

/// Re-checks the site on a fixed period. At most one loop runs at a time;
/// `restart` swaps the period without ever leaving two loops alive.
pub struct PollingLoop {
    shared: Arc<PollShared>,
}

impl PollingLoop {
    pub fn new(
        settings: Arc<SettingsStore>,
        engine: Arc<ReconciliationEngine>,
        source: Arc<dyn PageSource>,
        observer: Arc<dyn PageObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(PollShared {
                settings,
                engine,
                source,
                observer,
                runtime: Mutex::new(PollRuntime::default()),
            }),
        }
    }

    /// Starts the loop. The first tick fires one full period from now.
    pub fn start(&self, interval_secs: u64) {
        let interval_secs = interval_secs.max(1);
        let mut runtime = self.shared.lock_runtime();
        if runtime.stop_tx.is_some() {
            return;
        }

        let (tx, rx) = watch::channel(false);
        runtime.stop_tx = Some(tx);
        runtime.diagnostics.epoch = runtime.diagnostics.epoch.wrapping_add(1);
        let task_epoch = runtime.diagnostics.epoch;
        runtime.diagnostics.running = true;
        runtime.diagnostics.interval_seconds = interval_secs;
        drop(runtime);

        info!("polling every {interval_secs}s");
        tokio::spawn(run_poll_loop(
            self.shared.clone(),
            Duration::from_secs(interval_secs),
            rx,
            task_epoch,
        ));
    }

    pub fn stop(&self) {
        let mut runtime = self.shared.lock_runtime();
        if let Some(stop_tx) = runtime.stop_tx.take() {
            let _ = stop_tx.send(true);
            debug!("polling stopped");
        }
        runtime.diagnostics.running = false;
    }

    pub fn restart(&self, interval_secs: u64) {
        self.stop();
        self.start(interval_secs);
    }

    /// One check outside the schedule. Errors are already logged and
    /// recorded in the diagnostics.
    pub async fn poll_once(&self) -> Result<()> {
        self.shared.poll_once().await
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_runtime().stop_tx.is_some()
    }

    pub fn diagnostics(&self) -> PollDiagnostics {
        self.shared.lock_runtime().diagnostics.snapshot(Local::now())
    }
}

async fn run_poll_loop(
    shared: Arc<PollShared>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    task_epoch: u64,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let stopped = tokio::select! {
                    _ = stop_rx.changed() => true,
                    _ = shared.poll_once() => false,
                };
                if stopped {
                    break;
                }
            }
        }
    }

    let mut runtime = shared.lock_runtime();
    if runtime.diagnostics.epoch == task_epoch {
        runtime.stop_tx = None;
        runtime.diagnostics.running = false;
    }
    debug!("poll loop {task_epoch} exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::UnreadState,
        observer::HtmlPageObserver,
        site::PlatformCapabilities,
        test_support::{engine_fixture, EngineFixture, ScriptedSource},
    };

    const ABOUT_URL: &str = "https://derpibooru.org/pages/about";

    fn polling_loop(fixture: &EngineFixture, source: Arc<ScriptedSource>) -> PollingLoop {
        let profile = Arc::new(fixture.settings.profile().clone());
        PollingLoop::new(
            fixture.settings.clone(),
            fixture.engine.clone(),
            source,
            Arc::new(HtmlPageObserver::new(profile)),
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn first_tick_waits_a_full_period() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        let source = Arc::new(ScriptedSource::default());
        source.push_page(2, 1);
        let poller = polling_loop(&fixture, source.clone());

        poller.start(60);
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(source.fetched().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.fetched(), vec![ABOUT_URL.to_string()]);
        assert_eq!(fixture.engine.unread(), UnreadState::new(2, 1));
        assert_eq!(poller.diagnostics().ticks, 1);
        assert!(poller.is_running());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn restart_leaves_a_single_schedule() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        let source = Arc::new(ScriptedSource::default());
        let poller = polling_loop(&fixture, source.clone());

        poller.start(60);
        tokio::time::sleep(Duration::from_secs(30)).await;
        poller.restart(60);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(source.fetched().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetched().len(), 1);
        assert_eq!(poller.diagnostics().interval_seconds, 60);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn starting_twice_keeps_one_loop() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        let source = Arc::new(ScriptedSource::default());
        let poller = polling_loop(&fixture, source.clone());

        poller.start(30);
        poller.start(30);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(source.fetched().len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn failed_fetch_skips_the_tick() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        let source = Arc::new(ScriptedSource::default());
        source.push_error("connection reset");
        source.push_page(3, 0);
        let poller = polling_loop(&fixture, source.clone());

        poller.start(30);
        tokio::time::sleep(Duration::from_secs(31)).await;
        let diagnostics = poller.diagnostics();
        assert_eq!(diagnostics.failures, 1);
        assert!(diagnostics
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("connection reset")));
        assert_eq!(fixture.engine.unread(), UnreadState::default());
        assert!(fixture.badge.texts().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fixture.engine.unread(), UnreadState::new(3, 0));
        assert_eq!(poller.diagnostics().consecutive_failures, 0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_halts_further_checks() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        let source = Arc::new(ScriptedSource::default());
        let poller = polling_loop(&fixture, source.clone());

        poller.start(30);
        poller.stop();
        tokio::time::sleep(Duration::from_secs(100)).await;

        assert!(source.fetched().is_empty());
        assert!(!poller.is_running());
        assert!(!poller.diagnostics().running);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poll_once_uses_preferred_domain() {
        let fixture = engine_fixture(PlatformCapabilities::ACTION_BUTTONS);
        fixture.grant("trixiebooru.org").await;
        fixture
            .settings
            .try_set("preferredDomain", &serde_json::json!("trixiebooru.org"))
            .await
            .unwrap();
        let source = Arc::new(ScriptedSource::default());
        source.push_signed_out_page();
        let poller = polling_loop(&fixture, source.clone());

        poller.poll_once().await.unwrap();

        assert_eq!(
            source.fetched(),
            vec!["https://trixiebooru.org/pages/about".to_string()]
        );
        assert_eq!(fixture.badge.texts(), vec!["?".to_string()]);
    }
}
