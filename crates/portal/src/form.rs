//! Login-page scraping.
//!
//! The portal embeds a single-use `magic` token and an optional `4Tredir`
//! redirect target as hidden form inputs. There is no API; the values are
//! pulled straight out of the HTML with regexes so this stays a pure
//! function over a string.

use regex::Regex;
use std::sync::LazyLock;

static MAGIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="magic"\s+value="([^"]+)""#).unwrap());
static TREDIR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="4Tredir"\s+value="([^"]+)""#).unwrap());

/// Hidden fields scraped from the portal login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// Single-use token correlating the browsing session with this form.
    pub magic: String,
    /// Post-login redirect target, when the portal supplies one.
    pub redirect_target: Option<String>,
}

/// Extract the hidden login-form fields from the portal page HTML.
///
/// Returns `None` when the `magic` token is absent; the token is mandatory,
/// the redirect target is not.
pub fn extract_login_form(html: &str) -> Option<LoginForm> {
    let magic = MAGIC_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())?;

    let redirect_target = TREDIR_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    Some(LoginForm {
        magic,
        redirect_target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAGE: &str = r#"
        <html><body>
        <form id="login-form" action="/" method="post">
            <input type="hidden" name="4Tredir" value="https://agnigarh.iitg.ac.in:1442/login?">
            <input type="hidden" name="magic" value="0a2c5d9e8f1b3c47">
            <input type="text" name="username">
            <input type="password" name="password">
        </form>
        </body></html>"#;

    #[test]
    fn extracts_magic_and_redirect() {
        let form = extract_login_form(FULL_PAGE).expect("form should parse");
        assert_eq!(form.magic, "0a2c5d9e8f1b3c47");
        assert_eq!(
            form.redirect_target.as_deref(),
            Some("https://agnigarh.iitg.ac.in:1442/login?")
        );
    }

    #[test]
    fn redirect_target_is_optional() {
        let html = r#"<input type="hidden" name="magic" value="deadbeef">"#;
        let form = extract_login_form(html).expect("form should parse");
        assert_eq!(form.magic, "deadbeef");
        assert!(form.redirect_target.is_none());
    }

    #[test]
    fn missing_magic_is_none() {
        let html = r#"<form><input name="4Tredir" value="https://x/"><input name="username"></form>"#;
        assert!(extract_login_form(html).is_none());
    }

    #[test]
    fn empty_page_is_none() {
        assert!(extract_login_form("").is_none());
    }
}
