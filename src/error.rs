use thiserror::Error;

/// Failures that escape a component. Per-setting validation and permission
/// problems are reported through `settings::SettingRejection` instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A polling fetch or page decode failed; the tick is skipped.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The theme is set to "auto" but no page has reported one yet.
    #[error("auto theme value not found, no page has been observed yet")]
    StateNotReady,
    /// An inbound request the router cannot handle.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("settings storage: {0}")]
    Storage(String),
    #[error("platform: {0}")]
    Platform(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
