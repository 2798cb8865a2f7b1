use std::sync::Arc;

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::{
    model::{PageRecord, RawCount},
    site::SiteProfile,
};

/// Turns one rendering of a site page into a [`PageRecord`].
pub trait PageObserver: Send + Sync {
    fn observe(&self, html: &str) -> PageRecord;
}

/// Reads the header of a site page with the profile's selectors.
pub struct HtmlPageObserver {
    profile: Arc<SiteProfile>,
}

impl HtmlPageObserver {
    pub fn new(profile: Arc<SiteProfile>) -> Self {
        Self { profile }
    }
}

impl PageObserver for HtmlPageObserver {
    fn observe(&self, html: &str) -> PageRecord {
        let doc = Html::parse_document(html);
        let selectors = &self.profile.selectors;
        let theme = find_body_attr(&doc, &self.profile.theme_attribute);

        // The notification ticker is only rendered for signed-in users.
        let Some(notifs) = find_text(&doc, &selectors.notifs) else {
            debug!("no notification ticker on page, treating as signed out");
            return PageRecord {
                theme,
                ..PageRecord::signed_out()
            };
        };

        let messages = find_text(&doc, &selectors.messages).unwrap_or_default();
        PageRecord {
            notif_count: RawCount::Text(notifs),
            message_count: RawCount::Text(messages),
            signed_in: has_match(&doc, &selectors.signed_in),
            username: find_text(&doc, &selectors.username).unwrap_or_default(),
            theme,
        }
    }
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(error) => {
            warn!("invalid selector {css:?}: {error}");
            None
        }
    }
}

fn find_text(doc: &Html, css: &str) -> Option<String> {
    let selector = parse_selector(css)?;
    let el = doc.select(&selector).next()?;
    let text: String = el.text().collect();
    Some(text.trim().to_string())
}

fn has_match(doc: &Html, css: &str) -> bool {
    parse_selector(css).is_some_and(|selector| doc.select(&selector).next().is_some())
}

fn find_body_attr(doc: &Html, attr: &str) -> Option<String> {
    let selector = parse_selector("body")?;
    let value = doc.select(&selector).next()?.value().attr(attr)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNED_IN_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <body data-theme="dark-blue">
    <header>
      <nav>
        <a class="header__link" href="/notifications">
          <span class="js-notification-ticker">1,204</span>
        </a>
        <a class="header__link" href="/conversations">
          <i class="fa-embedded--unread-message"></i><span> 3 </span>
        </a>
        <a class="header__link-user" href="/registrations/edit">Account</a>
      </nav>
      <nav>
        <a href="/profiles/background-pony">Background Pony</a>
        <a href="/profiles/background-pony/user_links">Links</a>
      </nav>
    </header>
  </body>
</html>"#;

    const SIGNED_OUT_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <body data-theme="red">
    <header><a href="/session/new">Sign in</a></header>
  </body>
</html>"#;

    fn observer() -> HtmlPageObserver {
        HtmlPageObserver::new(Arc::new(SiteProfile::derpibooru()))
    }

    #[test]
    fn reads_counts_identity_and_theme() {
        let record = observer().observe(SIGNED_IN_PAGE);

        assert!(record.signed_in);
        assert_eq!(record.notif_count.value(), Some(1204));
        assert_eq!(record.message_count.value(), Some(3));
        assert_eq!(record.username, "Background Pony");
        assert_eq!(record.theme.as_deref(), Some("dark-blue"));
    }

    #[test]
    fn missing_ticker_means_signed_out() {
        let record = observer().observe(SIGNED_OUT_PAGE);

        assert!(!record.signed_in);
        assert_eq!(record.notif_count.value(), Some(0));
        assert_eq!(record.theme.as_deref(), Some("red"));
    }

    #[test]
    fn read_messages_icon_has_no_unread_count() {
        let page = SIGNED_IN_PAGE.replace("fa-embedded--unread-message", "fa-embedded--message");
        let page = page.replace("<span> 3 </span>", "<span></span>");

        let record = observer().observe(&page);

        assert_eq!(record.message_count.value(), Some(0));
    }
}
