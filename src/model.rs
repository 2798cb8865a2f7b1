use std::{fmt, str::FromStr};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    consts::{LIVE_NOTIFICATION_ID, TEST_NOTIFICATION_ID},
    core::parse_count,
    settings::Settings,
    site::SiteSelectors,
    Error,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnreadState {
    pub notifs: u64,
    pub messages: u64,
}

impl UnreadState {
    pub fn new(notifs: u64, messages: u64) -> Self {
        Self { notifs, messages }
    }

    pub fn total(&self) -> u64 {
        self.notifs.saturating_add(self.messages)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityState {
    pub signed_in: bool,
    pub username: String,
    /// Theme token reported by the site, `None` until a page reported one.
    pub auto_theme: Option<String>,
    pub last_check: Option<DateTime<Local>>,
}

impl IdentityState {
    /// Keeps the part of the raw theme attribute before the first `-`
    /// ("dark-blue" becomes "dark"). Blank input leaves the last value.
    pub fn observe_theme(&mut self, raw: &str) {
        let token = raw.split('-').next().unwrap_or_default().trim();
        if !token.is_empty() {
            self.auto_theme = Some(token.to_string());
        }
    }
}

/// A counter as the page observer delivers it: already numeric, or the raw
/// text of the badge element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawCount {
    Number(u64),
    Text(String),
}

impl RawCount {
    pub fn value(&self) -> Option<u64> {
        match self {
            RawCount::Number(count) => Some(*count),
            RawCount::Text(text) => parse_count(text),
        }
    }
}

impl Default for RawCount {
    fn default() -> Self {
        RawCount::Text(String::new())
    }
}

impl From<u64> for RawCount {
    fn from(count: u64) -> Self {
        RawCount::Number(count)
    }
}

impl From<&str> for RawCount {
    fn from(text: &str) -> Self {
        RawCount::Text(text.to_string())
    }
}

/// Flat record a page observer extracts from one rendering of the site.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageRecord {
    #[serde(alias = "notifs")]
    pub notif_count: RawCount,
    #[serde(alias = "messages")]
    pub message_count: RawCount,
    pub signed_in: bool,
    pub username: String,
    pub theme: Option<String>,
}

impl PageRecord {
    pub fn signed_in(notifs: u64, messages: u64) -> Self {
        Self {
            notif_count: RawCount::Number(notifs),
            message_count: RawCount::Number(messages),
            signed_in: true,
            ..Self::default()
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationId {
    Live,
    Test,
}

impl NotificationId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationId::Live => LIVE_NOTIFICATION_ID,
            NotificationId::Test => TEST_NOTIFICATION_ID,
        }
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            LIVE_NOTIFICATION_ID => Ok(NotificationId::Live),
            TEST_NOTIFICATION_ID => Ok(NotificationId::Test),
            other => Err(Error::Protocol(format!("Unknown notification id {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    OpenNotifications,
    OpenMessages,
}

/// Which button of a shown notification maps to which action. `None` means
/// the button was not rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonIndexMap {
    pub notifs: Option<usize>,
    pub messages: Option<usize>,
}

impl ButtonIndexMap {
    pub fn action_for(&self, index: usize) -> Option<ButtonAction> {
        if self.notifs == Some(index) {
            Some(ButtonAction::OpenNotifications)
        } else if self.messages == Some(index) {
            Some(ButtonAction::OpenMessages)
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupData {
    pub unread_counts: UnreadState,
    pub signed_in: bool,
    pub username: String,
    pub domain: String,
    pub theme: String,
    pub version: String,
    pub last_check: Option<DateTime<Local>>,
}

#[derive(Debug, Serialize)]
pub struct IconStyles {
    pub bell: Vec<String>,
    pub envelope: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsData {
    pub settings: Settings,
    pub theme: String,
    pub version: String,
    pub valid_domains: Vec<String>,
    pub valid_themes: Vec<String>,
    pub valid_icon_styles: IconStyles,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorsResponse {
    pub selectors: SiteSelectors,
    pub only_trusted_domain: String,
}
