//! Passive page-state detectors: cookie-consent dismissal, auth-wall and
//! CAPTCHA detection. These are pure functions over already-observed page
//! state so they are unit-testable without a live browser, per the
//! supplemental passive-detector capability.

/// Ordered consent-dialog selector catalog (most common consent-management
/// platforms first, generic heuristics last).
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    ".onetrust-close-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#CybotCookiebotDialogBodyButtonAccept",
    "[data-cookiefirst-action='accept']",
    "button[aria-label='Accept all cookies']",
    "button[aria-label='Accept cookies']",
    "#accept-cookies",
    "#cookie-accept",
    ".cookie-consent-accept",
    ".cc-allow",
    ".cc-accept",
];

/// Text-heuristic fallback: a visible button/link whose normalized text
/// exactly matches one of these phrases.
pub const CONSENT_TEXT_PHRASES: &[&str] = &["accept all", "i agree", "got it", "allow all", "accept cookies"];

pub const BANNER_SELECTORS: &[&str] = &[
    "#onetrust-banner-sdk",
    "#CybotCookiebotDialog",
    "[data-cookiefirst-root]",
    ".cookie-consent",
    ".cc-window",
];

/// Returns the first selector that should be clicked to dismiss a cookie
/// banner, given the set of selectors currently visible on the page.
/// Best-effort: returns `None` when nothing matches, which callers treat as
/// silent (no banner, or an unrecognized one).
pub fn dismiss_cookie_consent(visible_selectors: &[String]) -> Option<&'static str> {
    CONSENT_SELECTORS
        .iter()
        .find(|candidate| visible_selectors.iter().any(|visible| visible == *candidate))
        .copied()
}

/// Whether any known consent-banner container is currently visible.
pub fn detect_cookie_banner(visible_selectors: &[String]) -> bool {
    BANNER_SELECTORS
        .iter()
        .any(|candidate| visible_selectors.iter().any(|visible| visible == candidate))
}

/// URL substrings that commonly indicate a redirect to an authentication gate.
pub const AUTH_URL_PATTERNS: &[&str] = &[
    "/login",
    "/signin",
    "/sign-in",
    "/auth",
    "accounts.google.com",
    "/sso",
];

/// Page-text phrases that, combined with a URL change, indicate an auth wall.
pub const AUTH_CONTENT_INDICATORS: &[&str] = &[
    "please sign in",
    "please log in",
    "you must be logged in",
    "session has expired",
    "authentication required",
];

pub const CAPTCHA_SELECTORS: &[&str] = &[
    "iframe[src*='recaptcha']",
    ".g-recaptcha",
    "#cf-challenge-running",
    "[data-hcaptcha-widget-id]",
    ".h-captcha",
    "#captcha",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocker {
    AuthWall,
    Captcha,
}

impl Blocker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthWall => "auth_wall",
            Self::Captcha => "captcha",
        }
    }
}

/// Detects a redirect-to-login blocker: the current URL differs from the
/// URL the Navigator intended to be on and matches a known auth pattern, OR
/// the visible text contains an auth-required phrase.
pub fn detect_auth_wall(current_url: &str, original_url: &str, body_text: &str) -> Option<Blocker> {
    let current_lower = current_url.to_ascii_lowercase();
    let body_lower = body_text.to_ascii_lowercase();

    let url_changed = !current_url.eq_ignore_ascii_case(original_url);
    let url_matches_auth_pattern = AUTH_URL_PATTERNS
        .iter()
        .any(|pattern| current_lower.contains(pattern));
    let content_matches = AUTH_CONTENT_INDICATORS
        .iter()
        .any(|phrase| body_lower.contains(phrase));

    if (url_changed && url_matches_auth_pattern) || content_matches {
        Some(Blocker::AuthWall)
    } else {
        None
    }
}

/// Detects a CAPTCHA challenge from the set of currently-visible selectors.
pub fn detect_captcha(visible_selectors: &[String]) -> Option<Blocker> {
    CAPTCHA_SELECTORS
        .iter()
        .any(|candidate| visible_selectors.iter().any(|visible| visible == candidate))
        .then_some(Blocker::Captcha)
}

/// Composes both detectors; auth wall takes priority since a CAPTCHA probe on
/// a login redirect is usually a false positive from a shared widget.
pub fn detect_blockers(
    current_url: &str,
    original_url: &str,
    body_text: &str,
    visible_selectors: &[String],
) -> Option<Blocker> {
    detect_auth_wall(current_url, original_url, body_text).or_else(|| detect_captcha(visible_selectors))
}
