//! Heuristic classification of the portal's free-text HTML responses.
//!
//! The portal never answers with anything machine-readable, so the login
//! result is inferred from marker substrings. The heuristic is deliberately
//! permissive toward success (absence of the login form is itself evidence
//! of success): a false "failure" triggers needless retries, while a false
//! "success" is corrected by the next reachability probe. The marker lists
//! match observed portal wording and may misclassify wording we have not
//! seen yet.

use reqwest::StatusCode;

/// Marker present on every rendering of the portal login form.
pub const LOGIN_FORM_MARKER: &str = "login-form";
/// Secondary login-page marker, used by the reachability fallback probe.
pub const USERNAME_FIELD_MARKER: &str = "username";

/// Any of these in a 2xx body means the session is up.
const SUCCESS_MARKERS: &[&str] = &["keepalive", "Logout", "success"];
/// Explicit rejection wording used by the portal.
const REJECTION_MARKERS: &[&str] = &["Invalid", "failed", "incorrect"];

/// Outcome of classifying one login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginClassification {
    /// The portal accepted the credentials.
    Success,
    /// The portal explicitly rejected the credentials.
    InvalidCredentials,
    /// Nothing recognizable; treated as a transient protocol failure.
    Unknown,
}

/// Classify the HTTP response to a login form submission.
///
/// Pure function over the status and body so it can be unit tested against
/// literal fixtures.
pub fn classify_login_response(status: StatusCode, body: &str) -> LoginClassification {
    // The portal redirects on successful auth; redirects are not followed,
    // so a 302/303 here is a definitive success signal.
    if status == StatusCode::FOUND || status == StatusCode::SEE_OTHER {
        return LoginClassification::Success;
    }

    if status.is_success() {
        if SUCCESS_MARKERS.iter().any(|marker| body.contains(marker))
            || !body.contains(LOGIN_FORM_MARKER)
        {
            return LoginClassification::Success;
        }
        if REJECTION_MARKERS.iter().any(|marker| body.contains(marker)) {
            return LoginClassification::InvalidCredentials;
        }
    }

    LoginClassification::Unknown
}

/// Whether a page body looks like the portal's login page.
pub fn page_has_login_form(body: &str) -> bool {
    body.contains(LOGIN_FORM_MARKER) || body.contains(USERNAME_FIELD_MARKER)
}
