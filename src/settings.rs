use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    consts::{
        BELL_ICON_STYLES, DEFAULT_BADGE_COLOR, DEFAULT_NOTIF_TIMEOUT_SECS,
        DEFAULT_UPDATE_INTERVAL_SECS, ENVELOPE_ICON_STYLES, MAX_BADGE_LUMINANCE,
        MIN_UPDATE_INTERVAL_SECS, VALID_THEMES,
    },
    core::{write_atomically, yiq},
    domains::DomainAuthorizer,
    site::SiteProfile,
    Error, Result,
};

const NO_DOMAIN_PERMISSION: &str =
    "The extension does not have permission to use the selected domain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    BadgeColor,
    PreferredDomain,
    Theme,
    UpdateInterval,
    NotifEnabled,
    NotifSound,
    NotifTimeout,
    NotifIcons,
    BellIconStyle,
    EnvelopeIconStyle,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::BadgeColor,
        SettingKey::PreferredDomain,
        SettingKey::Theme,
        SettingKey::UpdateInterval,
        SettingKey::NotifEnabled,
        SettingKey::NotifSound,
        SettingKey::NotifTimeout,
        SettingKey::NotifIcons,
        SettingKey::BellIconStyle,
        SettingKey::EnvelopeIconStyle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::BadgeColor => "badgeColor",
            SettingKey::PreferredDomain => "preferredDomain",
            SettingKey::Theme => "theme",
            SettingKey::UpdateInterval => "updateInterval",
            SettingKey::NotifEnabled => "notifEnabled",
            SettingKey::NotifSound => "notifSound",
            SettingKey::NotifTimeout => "notifTimeout",
            SettingKey::NotifIcons => "notifIcons",
            SettingKey::BellIconStyle => "bellIconStyle",
            SettingKey::EnvelopeIconStyle => "envelopeIconStyle",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingRejection;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == name)
            .ok_or_else(|| SettingRejection::invalid(format!("Missing handler for setting {name}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Text(String),
    Seconds(u64),
    Flag(bool),
}

impl SettingValue {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SettingValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            SettingValue::Seconds(seconds) => Some(*seconds),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Why a single setting was not applied. Both variants are meant for the
/// user; `PermissionDenied` lets the caller offer a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingRejection {
    Invalid(Vec<String>),
    PermissionDenied { domain: String },
}

impl SettingRejection {
    fn invalid(message: impl Into<String>) -> Self {
        SettingRejection::Invalid(vec![message.into()])
    }

    pub fn messages(&self) -> Vec<String> {
        match self {
            SettingRejection::Invalid(messages) => messages.clone(),
            SettingRejection::PermissionDenied { .. } => vec![NO_DOMAIN_PERMISSION.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub badge_color: String,
    pub preferred_domain: String,
    pub theme: String,
    pub update_interval: u64,
    pub notif_enabled: bool,
    pub notif_sound: bool,
    pub notif_timeout: u64,
    pub notif_icons: bool,
    pub bell_icon_style: String,
    pub envelope_icon_style: String,
}

impl Settings {
    pub fn defaults(profile: &SiteProfile) -> Self {
        Self {
            badge_color: DEFAULT_BADGE_COLOR.to_string(),
            preferred_domain: profile.default_domain().to_string(),
            theme: "auto".to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL_SECS,
            notif_enabled: true,
            notif_sound: true,
            notif_timeout: DEFAULT_NOTIF_TIMEOUT_SECS,
            notif_icons: true,
            bell_icon_style: BELL_ICON_STYLES[0].to_string(),
            envelope_icon_style: ENVELOPE_ICON_STYLES[0].to_string(),
        }
    }

    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::BadgeColor => SettingValue::Text(self.badge_color.clone()),
            SettingKey::PreferredDomain => SettingValue::Text(self.preferred_domain.clone()),
            SettingKey::Theme => SettingValue::Text(self.theme.clone()),
            SettingKey::UpdateInterval => SettingValue::Seconds(self.update_interval),
            SettingKey::NotifEnabled => SettingValue::Flag(self.notif_enabled),
            SettingKey::NotifSound => SettingValue::Flag(self.notif_sound),
            SettingKey::NotifTimeout => SettingValue::Seconds(self.notif_timeout),
            SettingKey::NotifIcons => SettingValue::Flag(self.notif_icons),
            SettingKey::BellIconStyle => SettingValue::Text(self.bell_icon_style.clone()),
            SettingKey::EnvelopeIconStyle => SettingValue::Text(self.envelope_icon_style.clone()),
        }
    }

    /// Stores an already validated value. A value of the wrong shape for the
    /// key is ignored.
    pub fn apply(&mut self, key: SettingKey, value: SettingValue) {
        match (key, value) {
            (SettingKey::BadgeColor, SettingValue::Text(text)) => self.badge_color = text,
            (SettingKey::PreferredDomain, SettingValue::Text(text)) => {
                self.preferred_domain = text
            }
            (SettingKey::Theme, SettingValue::Text(text)) => self.theme = text,
            (SettingKey::UpdateInterval, SettingValue::Seconds(secs)) => {
                self.update_interval = secs
            }
            (SettingKey::NotifEnabled, SettingValue::Flag(flag)) => self.notif_enabled = flag,
            (SettingKey::NotifSound, SettingValue::Flag(flag)) => self.notif_sound = flag,
            (SettingKey::NotifTimeout, SettingValue::Seconds(secs)) => self.notif_timeout = secs,
            (SettingKey::NotifIcons, SettingValue::Flag(flag)) => self.notif_icons = flag,
            (SettingKey::BellIconStyle, SettingValue::Text(text)) => self.bell_icon_style = text,
            (SettingKey::EnvelopeIconStyle, SettingValue::Text(text)) => {
                self.envelope_icon_style = text
            }
            (key, value) => debug!("ignoring mismatched value {value:?} for {key}"),
        }
    }
}

/// Checks one raw value against the rule table. The domain rule here only
/// covers list membership; the permission check is asynchronous and lives
/// in `SettingsStore::validate`.
pub fn validate_value(
    key: SettingKey,
    raw: &Value,
    profile: &SiteProfile,
) -> Result<SettingValue, SettingRejection> {
    match key {
        SettingKey::BadgeColor => validate_badge_color(raw),
        SettingKey::PreferredDomain => match raw.as_str() {
            Some(domain) if profile.is_allowed_domain(domain) => {
                Ok(SettingValue::Text(domain.to_string()))
            }
            _ => Err(SettingRejection::invalid("The domain is invalid")),
        },
        SettingKey::Theme => one_of(raw, &VALID_THEMES, "The theme is invalid"),
        SettingKey::UpdateInterval => match parse_integer(raw) {
            None => Err(SettingRejection::invalid(
                "The update interval must be a number",
            )),
            Some(secs) if secs < MIN_UPDATE_INTERVAL_SECS as i64 => {
                Err(SettingRejection::invalid(format!(
                    "The update interval must be greater than or equal to {MIN_UPDATE_INTERVAL_SECS} seconds"
                )))
            }
            Some(secs) => Ok(SettingValue::Seconds(secs as u64)),
        },
        SettingKey::NotifTimeout => match parse_integer(raw) {
            None => Err(SettingRejection::invalid(
                "The notification timeout must be a number",
            )),
            Some(secs) if secs < 0 => Err(SettingRejection::invalid(
                "The notification timeout must be greater than or equal to 0 seconds",
            )),
            Some(secs) => Ok(SettingValue::Seconds(secs as u64)),
        },
        SettingKey::NotifEnabled => flag(
            raw,
            "Invalid value for notification enable/disable toggle",
        ),
        SettingKey::NotifSound => flag(raw, "Invalid value for notification sound on/off toggle"),
        SettingKey::NotifIcons => flag(
            raw,
            "Invalid value for notification button icons on/off toggle",
        ),
        SettingKey::BellIconStyle => {
            one_of(raw, &BELL_ICON_STYLES, "The bell icon style is invalid")
        }
        SettingKey::EnvelopeIconStyle => one_of(
            raw,
            &ENVELOPE_ICON_STYLES,
            "The envelope icon style is invalid",
        ),
    }
}

fn validate_badge_color(raw: &Value) -> Result<SettingValue, SettingRejection> {
    let Some(color) = raw.as_str() else {
        return Err(SettingRejection::invalid("Badge color type is invalid"));
    };
    let Some([r, g, b]) = parse_hex_color(color) else {
        return Err(SettingRejection::invalid(
            "Badge color format is invalid (must be #RRGGBB)",
        ));
    };
    if yiq(r, g, b) > MAX_BADGE_LUMINANCE {
        return Err(SettingRejection::invalid(
            "Badge color is too bright, the number would not be readable",
        ));
    }
    Ok(SettingValue::Text(color.to_string()))
}

fn parse_hex_color(color: &str) -> Option<[u8; 3]> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |at: usize| u8::from_str_radix(&hex[at..at + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

fn parse_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite())
                .map(|value| value.trunc() as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn flag(raw: &Value, message: &str) -> Result<SettingValue, SettingRejection> {
    raw.as_bool()
        .map(SettingValue::Flag)
        .ok_or_else(|| SettingRejection::invalid(message))
}

fn one_of(raw: &Value, allowed: &[&str], message: &str) -> Result<SettingValue, SettingRejection> {
    match raw.as_str() {
        Some(value) if allowed.contains(&value) => Ok(SettingValue::Text(value.to_string())),
        _ => Err(SettingRejection::invalid(message)),
    }
}

/// Where the settings snapshot lives between runs.
pub trait SettingsBackend: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, snapshot: &str) -> Result<()>;
}

impl<T: SettingsBackend + ?Sized> SettingsBackend for Arc<T> {
    fn load(&self) -> Result<Option<String>> {
        (**self).load()
    }

    fn save(&self, snapshot: &str) -> Result<()> {
        (**self).save(snapshot)
    }
}

pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|error| Error::Storage(format!("Failed to read settings: {error}")))
    }

    fn save(&self, snapshot: &str) -> Result<()> {
        write_atomically(&self.path, snapshot)
    }
}

/// Outcome of one key in a `set_all` batch.
#[derive(Debug, Clone)]
pub struct SettingOutcome {
    pub key: String,
    pub result: Result<SettingValue, SettingRejection>,
}

impl SettingOutcome {
    pub fn ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn errors(&self) -> Vec<String> {
        match &self.result {
            Ok(_) => Vec::new(),
            Err(rejection) => rejection.messages(),
        }
    }
}

pub type SettingEffect = Arc<dyn Fn(&SettingValue) + Send + Sync>;

pub struct SettingsStore {
    profile: Arc<SiteProfile>,
    authorizer: Arc<dyn DomainAuthorizer>,
    backend: Box<dyn SettingsBackend>,
    values: Mutex<Settings>,
    subscribers: Mutex<HashMap<SettingKey, Vec<SettingEffect>>>,
}

impl SettingsStore {
    pub fn new(
        profile: Arc<SiteProfile>,
        authorizer: Arc<dyn DomainAuthorizer>,
        backend: Box<dyn SettingsBackend>,
    ) -> Self {
        let defaults = Settings::defaults(&profile);
        Self {
            profile,
            authorizer,
            backend,
            values: Mutex::new(defaults),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Merges the defaults with the persisted snapshot. Every value goes
    /// through its validator; rejected or unknown keys keep the default.
    pub async fn load(&self) -> Settings {
        let persisted = match self.backend.load() {
            Ok(Some(raw)) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(map) => map,
                Err(error) => {
                    debug!("discarding unparsable settings snapshot: {error}");
                    Map::new()
                }
            },
            Ok(None) => Map::new(),
            Err(error) => {
                warn!("failed to read settings snapshot: {error}");
                Map::new()
            }
        };

        let mut settings = Settings::defaults(&self.profile);
        for (name, raw) in persisted {
            let key = match name.parse::<SettingKey>() {
                Ok(key) => key,
                Err(_) => {
                    warn!("dropping unknown persisted setting {name}");
                    continue;
                }
            };
            match self.validate(key, &raw).await {
                Ok(value) => settings.apply(key, value),
                Err(rejection) => warn!(
                    "persisted {key} rejected, keeping default: {}",
                    rejection.messages().join("; ")
                ),
            }
        }

        *self.lock_values() = settings.clone();
        if let Err(error) = self.persist() {
            warn!("failed to persist loaded settings: {error}");
        }
        info!(
            "settings loaded (domain={}, interval={}s)",
            settings.preferred_domain, settings.update_interval
        );
        settings
    }

    /// Registers an effect run after every successful write of `key`.
    pub fn subscribe<F>(&self, key: SettingKey, effect: F)
    where
        F: Fn(&SettingValue) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(Arc::new(effect));
    }

    pub async fn validate(
        &self,
        key: SettingKey,
        raw: &Value,
    ) -> Result<SettingValue, SettingRejection> {
        let value = validate_value(key, raw, &self.profile)?;
        if key == SettingKey::PreferredDomain {
            let domain = value.as_text().unwrap_or_default();
            if !self.authorizer.has_permission(domain).await {
                return Err(SettingRejection::PermissionDenied {
                    domain: domain.to_string(),
                });
            }
        }
        Ok(value)
    }

    /// Validates and applies one value, then runs its subscribed effects.
    /// Does not persist; `set_all` does.
    pub async fn try_set(
        &self,
        name: &str,
        raw: &Value,
    ) -> Result<SettingValue, SettingRejection> {
        let key = name.parse::<SettingKey>()?;
        let value = match self.validate(key, raw).await {
            Ok(value) => value,
            Err(rejection) => {
                warn!(
                    "failed to set setting {key} to {raw}: {}",
                    rejection.messages().join("; ")
                );
                return Err(rejection);
            }
        };

        self.lock_values().apply(key, value.clone());
        debug!("setting {key} = {raw}");
        self.run_effects(key, &value);
        Ok(value)
    }

    /// Applies every key independently and persists once at the end.
    pub async fn set_all(&self, changes: &Map<String, Value>) -> Vec<SettingOutcome> {
        let mut outcomes = Vec::with_capacity(changes.len());
        for (name, raw) in changes {
            let result = self.try_set(name, raw).await;
            outcomes.push(SettingOutcome {
                key: name.clone(),
                result,
            });
        }

        if let Err(error) = self.persist() {
            warn!("failed to persist settings: {error}");
        }
        outcomes
    }

    /// Current settings with `changes` overlaid, without touching the store.
    /// The domain is never part of a draft.
    pub fn draft(
        &self,
        changes: &Map<String, Value>,
    ) -> Result<Settings, BTreeMap<String, Vec<String>>> {
        let mut settings = self.get_all();
        let mut errors = BTreeMap::new();
        for (name, raw) in changes {
            let key = match name.parse::<SettingKey>() {
                Ok(SettingKey::PreferredDomain) => continue,
                Ok(key) => key,
                Err(rejection) => {
                    errors.insert(name.clone(), rejection.messages());
                    continue;
                }
            };
            match validate_value(key, raw, &self.profile) {
                Ok(value) => settings.apply(key, value),
                Err(rejection) => {
                    errors.insert(name.clone(), rejection.messages());
                }
            }
        }

        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, key: SettingKey) -> SettingValue {
        self.lock_values().get(key)
    }

    pub fn get_all(&self) -> Settings {
        self.lock_values().clone()
    }

    fn persist(&self) -> Result<()> {
        let snapshot = self.get_all();
        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|error| Error::Storage(format!("Failed to serialize settings: {error}")))?;
        self.backend.save(&content)
    }

    fn run_effects(&self, key: SettingKey, value: &SettingValue) {
        let effects = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_default();
        for effect in effects {
            effect(value);
        }
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
