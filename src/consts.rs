pub const APP_NAME: &str = "derpi-notify";
pub const CONFIG_DIR_ENV: &str = "DERPI_NOTIFY_CONFIG_DIR";
/// Raw `Cookie` header value for the site session, read at startup.
pub const SESSION_COOKIE_ENV: &str = "DERPI_NOTIFY_COOKIE";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const PERMISSIONS_FILE_NAME: &str = "permissions.json";

pub const DEFAULT_BADGE_COLOR: &str = "#618fc3";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_NOTIF_TIMEOUT_SECS: u64 = 0;
/// Timeout value meaning "keep the notification until the user interacts".
pub const NOTIF_TIMEOUT_NEVER: u64 = 0;

pub const MAX_BADGE_LUMINANCE: f64 = 180.0;
pub const SIGNED_OUT_BADGE_TEXT: &str = "?";
pub const SIGNED_OUT_BADGE_COLOR: &str = "#222";

pub const VALID_THEMES: [&str; 4] = ["default", "dark", "red", "auto"];
pub const BELL_ICON_STYLES: [&str; 2] = ["black", "white"];
pub const ENVELOPE_ICON_STYLES: [&str; 3] = ["orange", "black", "white"];

pub const LIVE_NOTIFICATION_ID: &str = "derpi-notify";
pub const TEST_NOTIFICATION_ID: &str = "derpi-notify-Test";
pub const TEST_NOTIFICATION_MAX_COUNT: u64 = 256;

pub const FETCH_TIMEOUT_SECS: u64 = 15;
pub const MAX_PAGE_BYTES: usize = 2_000_000;
pub const LOG_BODY_PREVIEW_CHARS: usize = 200;
