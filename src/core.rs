use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    consts::{APP_NAME, CONFIG_DIR_ENV, PERMISSIONS_FILE_NAME, SETTINGS_FILE_NAME},
    Error, Result,
};

pub fn config_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or_else(|| Error::Storage("Failed to resolve app config dir".to_string()))?
            .join(APP_NAME),
    };

    fs::create_dir_all(&dir)
        .map_err(|error| Error::Storage(format!("Failed to create config directory: {error}")))?;

    Ok(dir)
}

pub fn settings_file(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE_NAME)
}

pub fn permissions_file(config_dir: &Path) -> PathBuf {
    config_dir.join(PERMISSIONS_FILE_NAME)
}

#[cfg(unix)]
pub fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt as _;

    if path.exists() {
        if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            debug!("restrict_file_permissions: failed for {path:?}: {error}");
        }
    }
}

#[cfg(not(unix))]
pub fn restrict_file_permissions(_path: &Path) {}

/// Writes `content` next to `path` and renames it into place so readers never
/// observe a half-written snapshot.
pub fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .map_err(|error| Error::Storage(format!("Failed to write {tmp:?}: {error}")))?;
    fs::rename(&tmp, path)
        .map_err(|error| Error::Storage(format!("Failed to replace {path:?}: {error}")))?;
    restrict_file_permissions(path);
    Ok(())
}

pub fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub fn plural(count: u64, word: &str) -> String {
    let suffix = if count == 1 { "" } else { "s" };
    format!("{count} {word}{suffix}")
}

/// Badge-sized rendering of a count: exact below 10,000, then rounded
/// thousands ("12k") and rounded millions ("3m").
pub fn shorten_count(count: u64) -> String {
    if count < 10_000 {
        count.to_string()
    } else if count < 1_000_000 {
        format!("{}k", rounded_div(count, 1_000))
    } else {
        format!("{}m", rounded_div(count, 1_000_000))
    }
}

/// Half-up division that cannot overflow.
fn rounded_div(count: u64, unit: u64) -> u64 {
    count / unit + u64::from(count % unit >= unit / 2)
}

/// Perceived brightness in the 0..=255 range.
pub fn yiq(r: u8, g: u8, b: u8) -> f64 {
    (f64::from(r) * 299.0 + f64::from(g) * 587.0 + f64::from(b) * 114.0) / 1000.0
}

/// Parses counter text scraped from a page. Empty text is zero; otherwise the
/// leading digits are used, ignoring digit-group commas. Text without any
/// leading digit yields `None`.
pub fn parse_count(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0);
    }

    let digits: String = trimmed
        .chars()
        .filter(|c| *c != ',')
        .take_while(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

pub fn http_url(domain: &str, path: &str) -> String {
    format!("https://{domain}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorten_count_keeps_small_numbers_exact() {
        assert_eq!(shorten_count(0), "0");
        assert_eq!(shorten_count(42), "42");
        assert_eq!(shorten_count(9_999), "9999");
    }

    #[test]
    fn shorten_count_rounds_thousands_and_millions() {
        assert_eq!(shorten_count(10_000), "10k");
        assert_eq!(shorten_count(12_499), "12k");
        assert_eq!(shorten_count(12_500), "13k");
        assert_eq!(shorten_count(999_999), "1000k");
        assert_eq!(shorten_count(1_000_000), "1m");
        assert_eq!(shorten_count(2_600_000), "3m");
    }

    #[test]
    fn shorten_count_handles_the_largest_count() {
        assert_eq!(shorten_count(u64::MAX), "18446744073710m");
        assert_eq!(shorten_count(u64::MAX - 1_000_000), "18446744073709m");
    }

    #[test]
    fn yiq_spans_black_to_white() {
        assert_eq!(yiq(0, 0, 0), 0.0);
        assert_eq!(yiq(255, 255, 255), 255.0);
        assert!(yiq(0x61, 0x8f, 0xc3) <= 180.0);
    }

    #[test]
    fn parse_count_handles_scraped_text() {
        assert_eq!(parse_count(""), Some(0));
        assert_eq!(parse_count("  \n"), Some(0));
        assert_eq!(parse_count(" 17 "), Some(17));
        assert_eq!(parse_count("1,204"), Some(1204));
        assert_eq!(parse_count("3 new"), Some(3));
        assert_eq!(parse_count("none"), None);
    }

    #[test]
    fn plural_only_for_counts_other_than_one() {
        assert_eq!(plural(1, "Message"), "1 Message");
        assert_eq!(plural(0, "Message"), "0 Messages");
        assert_eq!(plural(2, "Notification"), "2 Notifications");
    }

    #[test]
    fn truncate_message_appends_ellipsis() {
        assert_eq!(truncate_message("abc", 5), "abc");
        assert_eq!(truncate_message("abcdef", 3), "abc...");
    }
}
