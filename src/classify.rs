//! Decides whether a freshly loaded page is usable.
//!
//! Two entry points: [`classify_home`] for the logged-in homepage check (only run when
//! cookies were supplied) and [`classify_search`] for the results page, which is more
//! forgiving because the mobile site often keeps a login prompt on screen next to
//! perfectly good results.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dom::{collapse_whitespace, ElementHandle};

const EVIDENCE_CHARS: usize = 400;

static LOGIN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z]+://[^/?#]+/(?:[^?#]*/)?login(?:\.php)?(?:[/?#]|$)").unwrap()
});

static CHECKPOINT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z]+://[^/?#]+/checkpoint(?:[/?#]|$)").unwrap());

const LOGIN_FORM_MARKERS: &str =
    r#"form#login_form, form[action*="login"], input[name="pass"], input[type="password"]"#;

const CHECKPOINT_MARKERS: &str =
    r#"form[action*="checkpoint"], a[href*="/checkpoint/"], #checkpointSubmitButton"#;

const AUTHENTICATED_MARKERS: &str = r#"[aria-label="Account"], [aria-label="Your profile"], [role="feed"], #MComposer, [data-sigil*="composer"], a[href*="/composer/"], #mbasic_logout_button, a[href*="logout.php"]"#;

/// Anti-bot interstitial wording. Only consulted when a search page rendered no results.
const CHALLENGE_PHRASES: [&str; 7] = [
    "you're temporarily blocked",
    "you’re temporarily blocked",
    "unusual traffic",
    "automated requests",
    "security check",
    "captcha",
    "log in to continue",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageClassification {
    Authenticated,
    LoginRequired,
    Checkpoint,
    Blocked,
}

impl PageClassification {
    pub fn is_accessible(&self) -> bool {
        matches!(self, PageClassification::Authenticated)
    }
}

impl fmt::Display for PageClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PageClassification::Authenticated => "authenticated",
            PageClassification::LoginRequired => "login required",
            PageClassification::Checkpoint => "checkpoint",
            PageClassification::Blocked => "blocked",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageVerdict {
    pub classification: PageClassification,
    pub evidence: String,
}

impl PageVerdict {
    fn new(classification: PageClassification, evidence: impl Into<String>) -> Self {
        Self {
            classification,
            evidence: evidence.into(),
        }
    }
}

/// Redirects to the login or checkpoint flow settle the question before looking at the DOM.
pub fn classify_url(resolved_url: &str) -> Option<PageClassification> {
    if CHECKPOINT_URL.is_match(resolved_url) {
        Some(PageClassification::Checkpoint)
    } else if LOGIN_URL.is_match(resolved_url) {
        Some(PageClassification::LoginRequired)
    } else {
        None
    }
}

/// Homepage check for cookie-authenticated runs.
pub fn classify_home<E: ElementHandle>(resolved_url: &str, root: &E) -> PageVerdict {
    if let Some(classification) = classify_url(resolved_url) {
        return PageVerdict::new(classification, resolved_url);
    }

    let snippet = || collapse_whitespace(&root.inner_text(), EVIDENCE_CHARS);

    if has_visible(root, LOGIN_FORM_MARKERS) {
        return PageVerdict::new(PageClassification::LoginRequired, snippet());
    }
    if has_visible(root, CHECKPOINT_MARKERS) {
        return PageVerdict::new(PageClassification::Checkpoint, snippet());
    }
    if root.find(AUTHENTICATED_MARKERS).is_none() {
        return PageVerdict::new(PageClassification::LoginRequired, snippet());
    }
    PageVerdict::new(PageClassification::Authenticated, snippet())
}

/// Search page check. A login prompt or challenge only blocks the run when it comes with
/// zero rendered results.
pub fn classify_search<E: ElementHandle>(
    resolved_url: &str,
    root: &E,
    container_count: usize,
) -> PageVerdict {
    if let Some(classification) = classify_url(resolved_url) {
        return PageVerdict::new(classification, resolved_url);
    }

    let text = collapse_whitespace(&root.inner_text(), usize::MAX);
    let snippet: String = text.chars().take(EVIDENCE_CHARS).collect();
    if container_count > 0 {
        return PageVerdict::new(PageClassification::Authenticated, snippet);
    }

    // Phrases are matched against the whole page text.
    let lowered = text.to_lowercase();
    let blocked = has_visible(root, LOGIN_FORM_MARKERS)
        || has_visible(root, CHECKPOINT_MARKERS)
        || CHALLENGE_PHRASES.iter().any(|p| lowered.contains(p));

    if blocked {
        PageVerdict::new(PageClassification::Blocked, snippet)
    } else {
        PageVerdict::new(PageClassification::Authenticated, snippet)
    }
}

fn has_visible<E: ElementHandle>(root: &E, css: &str) -> bool {
    root.find_all(css).iter().any(ElementHandle::is_visible)
}
