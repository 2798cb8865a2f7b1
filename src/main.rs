use std::{fs::File, sync::Arc};

use derpi_notify::{
    app::App,
    badge::LogBadge,
    consts::SESSION_COOKIE_ENV,
    core::{config_dir, permissions_file, settings_file},
    domains::OriginGrants,
    engine::Surfaces,
    notifications::{NotificationEvent, NotificationSink, SystemSound},
    poller::HttpPageSource,
    router::MessageRouter,
    settings::JsonFileBackend,
    shell::SystemBrowser,
    site::{PlatformCapabilities, SiteProfile},
    Error, Result,
};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    sync::mpsc::{self, UnboundedSender},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    info!("derpi-notify starting (pid={})", std::process::id());

    if let Err(error) = run().await {
        error!("fatal: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_dir = config_dir()?;
    let profile = Arc::new(SiteProfile::derpibooru());
    let authorizer = Arc::new(OriginGrants::for_site(permissions_file(&config_dir), &profile));
    let backend = Box::new(JsonFileBackend::new(settings_file(&config_dir)));
    let source = Arc::new(HttpPageSource::new(std::env::var(SESSION_COOKIE_ENV).ok())?);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let surfaces = desktop_surfaces(events_tx);
    let app = App::start(profile, authorizer, backend, surfaces, source).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = handle_line(&app.router, &line).await;
                    let written = async {
                        stdout.write_all(reply.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await
                    };
                    if let Err(error) = written.await {
                        warn!("stdout closed: {error}");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(error) => {
                    warn!("failed to read request: {error}");
                    break;
                }
            },
            Some(event) = events_rx.recv() => app.engine.handle_event(event),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    app.shutdown();
    info!("derpi-notify stopped");
    Ok(())
}

async fn handle_line(router: &MessageRouter, line: &str) -> String {
    let response = match serde_json::from_str::<Value>(line) {
        Ok(request) => router.dispatch_value(request).await,
        Err(error) => Err(Error::Protocol(format!("Request is not JSON: {error}"))),
    };

    let body = response.and_then(|response| {
        serde_json::to_value(response)
            .map_err(|error| Error::Protocol(format!("Unencodable response: {error}")))
    });
    match body {
        Ok(body) => body.to_string(),
        Err(error) => {
            error!("request failed: {error}");
            json!({ "error": error.to_string() }).to_string()
        }
    }
}

#[cfg(target_os = "macos")]
fn desktop_surfaces(events: UnboundedSender<NotificationEvent>) -> Surfaces {
    use derpi_notify::notifications::MacNotifier;

    desktop_surfaces_with(
        PlatformCapabilities::ACTION_BUTTONS,
        Arc::new(MacNotifier::new(events)),
    )
}

#[cfg(not(target_os = "macos"))]
fn desktop_surfaces(events: UnboundedSender<NotificationEvent>) -> Surfaces {
    use derpi_notify::notifications::LogNotifier;

    // No native surface reports clicks here.
    drop(events);
    desktop_surfaces_with(PlatformCapabilities::PLAIN_TEXT, Arc::new(LogNotifier))
}

fn desktop_surfaces_with(
    capabilities: PlatformCapabilities,
    notifier: Arc<dyn NotificationSink>,
) -> Surfaces {
    Surfaces {
        capabilities,
        badge: Arc::new(LogBadge),
        notifier,
        sound: Arc::new(SystemSound::platform_default()),
        opener: Arc::new(SystemBrowser),
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("derpi_notify=info"));
    let file_layer = debug_log_file().map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

/// Debug builds also log to a file, which survives a detached terminal.
#[cfg(debug_assertions)]
fn debug_log_file() -> Option<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open("/tmp/derpi-notify.log")
        .ok()
}

#[cfg(not(debug_assertions))]
fn debug_log_file() -> Option<File> {
    None
}
