use serde::Serialize;

use crate::core::http_url;

/// CSS selectors a page observer uses to read the site header.
#[derive(Debug, Clone, Serialize)]
pub struct SiteSelectors {
    pub notifs: String,
    pub messages: String,
    #[serde(rename = "signedIn")]
    pub signed_in: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteLinks {
    #[serde(rename = "parseURL")]
    pub parse_path: String,
    pub messages: String,
    pub notifs: String,
    #[serde(rename = "signInPage")]
    pub sign_in: String,
}

/// Everything that differs between the sites the companion can watch.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub name: String,
    pub domains: Vec<String>,
    pub selectors: SiteSelectors,
    pub links: SiteLinks,
    pub theme_attribute: String,
    pub notification_icon: String,
}

impl SiteProfile {
    pub fn derpibooru() -> Self {
        Self {
            name: "Derpibooru".to_string(),
            domains: vec!["derpibooru.org".to_string(), "trixiebooru.org".to_string()],
            selectors: SiteSelectors {
                notifs: ".js-notification-ticker".to_string(),
                messages: ".fa-embedded--unread-message + *, .fa-embedded--message + *"
                    .to_string(),
                signed_in: "a.header__link-user".to_string(),
                username: r#"nav > a[href^="/profiles/"]:not([href$="user_links"])"#.to_string(),
            },
            links: SiteLinks {
                parse_path: "/pages/about".to_string(),
                messages: "/conversations".to_string(),
                notifs: "/notifications".to_string(),
                sign_in: "/session/new".to_string(),
            },
            theme_attribute: "data-theme".to_string(),
            notification_icon: "img/notif-128.png".to_string(),
        }
    }

    pub fn default_domain(&self) -> &str {
        self.domains.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_allowed_domain(&self, domain: &str) -> bool {
        self.domains.iter().any(|allowed| allowed == domain)
    }

    pub fn url(&self, domain: &str, path: &str) -> String {
        http_url(domain, path)
    }
}

/// What the notification surface of the host platform can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub supports_action_buttons: bool,
    pub supports_emoji_icons: bool,
}

impl PlatformCapabilities {
    pub const ACTION_BUTTONS: Self = Self {
        supports_action_buttons: true,
        supports_emoji_icons: false,
    };

    pub const PLAIN_TEXT: Self = Self {
        supports_action_buttons: false,
        supports_emoji_icons: true,
    };
}
