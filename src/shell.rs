use std::process::Command;

use tracing::debug;

use crate::{Error, Result};

/// Opens a site page for the user.
pub trait PageOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Hands the URL to the desktop's default browser.
#[derive(Debug, Default)]
pub struct SystemBrowser;

impl PageOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        let candidate = checked_page_url(url)?;
        debug!("opening {candidate}");

        #[cfg(target_os = "macos")]
        let status = Command::new("open").arg(candidate).status();
        #[cfg(target_os = "linux")]
        let status = Command::new("xdg-open").arg(candidate).status();
        #[cfg(target_os = "windows")]
        let status = Command::new("cmd")
            .arg("/C")
            .arg("start")
            .arg("")
            .arg(candidate)
            .status();
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        let status: std::io::Result<std::process::ExitStatus> = Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no browser launcher on this platform",
        ));

        let status =
            status.map_err(|error| Error::Platform(format!("Failed to open URL: {error}")))?;
        if !status.success() {
            return Err(Error::Platform(format!(
                "Failed to open URL (exit code {})",
                status.code().unwrap_or(-1)
            )));
        }

        Ok(())
    }
}

/// Only web pages are ever opened.
pub fn checked_page_url(url: &str) -> Result<&str> {
    let candidate = url.trim();
    if candidate.is_empty() {
        return Err(Error::Platform("Missing URL".to_string()));
    }
    let parsed = reqwest::Url::parse(candidate)
        .map_err(|error| Error::Platform(format!("Invalid URL: {error}")))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(Error::Platform(format!("Unsupported URL scheme: {scheme}")));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_web_urls_pass() {
        assert_eq!(
            checked_page_url(" https://derpibooru.org/notifications ").unwrap(),
            "https://derpibooru.org/notifications"
        );
        assert!(checked_page_url("").is_err());
        assert!(checked_page_url("file:///etc/passwd").is_err());
        assert!(checked_page_url("mailto:someone@example.com").is_err());
        assert!(checked_page_url("not a url").is_err());
    }
}
