use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::{
    consts::{SIGNED_OUT_BADGE_COLOR, SIGNED_OUT_BADGE_TEXT},
    core::shorten_count,
    Result,
};

/// Where the toolbar badge is painted.
pub trait BadgeSurface: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
    fn set_background(&self, color: &str) -> Result<()>;
}

/// Last state painted on the surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeSnapshot {
    pub text: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeChange {
    pub previous: String,
    pub current: String,
}

pub fn badge_text(total: u64, signed_in: bool) -> String {
    if !signed_in {
        SIGNED_OUT_BADGE_TEXT.to_string()
    } else if total == 0 {
        String::new()
    } else {
        shorten_count(total)
    }
}

pub struct BadgeRenderer {
    surface: Arc<dyn BadgeSurface>,
    snapshot: Mutex<BadgeSnapshot>,
}

impl BadgeRenderer {
    pub fn new(surface: Arc<dyn BadgeSurface>) -> Self {
        Self {
            surface,
            snapshot: Mutex::new(BadgeSnapshot::default()),
        }
    }

    /// Paints the text for `total`. Returns `None` when the text is already
    /// on the badge, or when the surface refused the update.
    pub fn render(&self, total: u64, signed_in: bool) -> Option<BadgeChange> {
        if !signed_in {
            self.apply_color(SIGNED_OUT_BADGE_COLOR);
        }

        let text = badge_text(total, signed_in);
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.text == text {
            return None;
        }
        if let Err(error) = self.surface.set_text(&text) {
            warn!("failed to set badge text {text:?}: {error}");
            return None;
        }

        let previous = std::mem::replace(&mut snapshot.text, text.clone());
        debug!("badge text {previous:?} -> {text:?}");
        Some(BadgeChange {
            previous,
            current: text,
        })
    }

    pub fn apply_color(&self, color: &str) -> bool {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if snapshot.color.as_deref() == Some(color) {
            return false;
        }
        if let Err(error) = self.surface.set_background(color) {
            warn!("failed to set badge color {color}: {error}");
            return false;
        }
        snapshot.color = Some(color.to_string());
        true
    }

    pub fn snapshot(&self) -> BadgeSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Badge surface for hosts without a toolbar: every repaint is logged.
#[derive(Debug, Default)]
pub struct LogBadge;

impl BadgeSurface for LogBadge {
    fn set_text(&self, text: &str) -> Result<()> {
        info!("badge: {text:?}");
        Ok(())
    }

    fn set_background(&self, color: &str) -> Result<()> {
        info!("badge color: {color}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingBadge;

    #[test]
    fn text_follows_sign_in_and_magnitude() {
        assert_eq!(badge_text(5, false), "?");
        assert_eq!(badge_text(0, true), "");
        assert_eq!(badge_text(9_999, true), "9999");
        assert_eq!(badge_text(15_400, true), "15k");
        assert_eq!(badge_text(4_400_000, true), "4m");
    }

    #[test]
    fn identical_text_is_not_repainted() {
        let surface = Arc::new(RecordingBadge::default());
        let renderer = BadgeRenderer::new(surface.clone());

        let first = renderer.render(3, true).unwrap();
        assert_eq!(first.previous, "");
        assert_eq!(first.current, "3");
        assert_eq!(renderer.render(3, true), None);
        assert_eq!(surface.texts(), vec!["3".to_string()]);
    }

    #[test]
    fn signed_out_paints_indicator_and_dark_background() {
        let surface = Arc::new(RecordingBadge::default());
        let renderer = BadgeRenderer::new(surface.clone());
        renderer.apply_color("#618fc3");

        let change = renderer.render(12, false).unwrap();

        assert_eq!(change.current, "?");
        assert_eq!(
            surface.colors(),
            vec!["#618fc3".to_string(), "#222".to_string()]
        );
        assert_eq!(renderer.render(40, false), None);
    }

    #[test]
    fn same_color_is_applied_once() {
        let surface = Arc::new(RecordingBadge::default());
        let renderer = BadgeRenderer::new(surface.clone());

        assert!(renderer.apply_color("#000000"));
        assert!(!renderer.apply_color("#000000"));
        assert!(renderer.apply_color("#123456"));
        assert_eq!(surface.colors().len(), 2);
        assert_eq!(renderer.snapshot().color.as_deref(), Some("#123456"));
    }
}
