//! Portal login client.
//!
//! Drives the two-step login exchange: fetch the login page (collecting any
//! session cookie the portal sets), scrape the one-time `magic` token, then
//! POST the credentials back with the token. Redirects are never followed;
//! a 302 on the submission is itself the success signal.

use crate::classify::{LoginClassification, classify_login_response};
use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::form::extract_login_form;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Build the HTTP client the prober and login client share.
///
/// Automatic redirects are disabled for the whole client: the probe and the
/// login submission both classify redirect statuses instead of following
/// them.
pub fn build_client(timeout: Duration) -> Result<Client, PortalError> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(PortalError::from)
}

/// Definitive outcome of a login attempt.
///
/// Transient failures (transport errors, missing token, unclassifiable
/// responses) are reported as [`PortalError`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    /// The portal explicitly rejected the credentials; retrying with the
    /// same secret is pointless.
    InvalidCredentials,
}

/// Client for the portal's login form.
///
/// Keeps its own small cookie jar: the portal correlates the login page GET
/// and the form POST through a session cookie, and `reqwest`'s automatic
/// store is not used because every header on the POST is set explicitly.
pub struct PortalClient {
    client: Client,
    config: PortalConfig,
    cookies: Mutex<HashMap<String, String>>,
}

impl PortalClient {
    pub fn new(client: Client, config: PortalConfig) -> Self {
        Self {
            client,
            config,
            cookies: Mutex::new(HashMap::new()),
        }
    }

    /// Run one full login exchange against the portal.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, PortalError> {
        let html = self.fetch_login_page().await?;

        let form = extract_login_form(&html).ok_or(PortalError::TokenNotFound)?;
        let redirect_target = form
            .redirect_target
            .unwrap_or_else(|| self.config.login_url.clone());

        let fields = [
            ("username", username),
            ("password", password),
            ("magic", form.magic.as_str()),
            ("4Tredir", redirect_target.as_str()),
        ];

        let response = self
            .client
            .post(self.config.submit_url())
            .headers(self.submit_headers())
            .form(&fields)
            .send()
            .await?;

        let status = response.status();
        self.store_cookies(response.headers());
        let body = if status.is_success() {
            response.text().await?
        } else {
            String::new()
        };

        match classify_login_response(status, &body) {
            LoginClassification::Success => {
                info!("portal accepted login");
                Ok(LoginOutcome::Success)
            }
            LoginClassification::InvalidCredentials => {
                info!("portal rejected credentials");
                Ok(LoginOutcome::InvalidCredentials)
            }
            LoginClassification::Unknown => Err(PortalError::UnknownResponse { status }),
        }
    }

    async fn fetch_login_page(&self) -> Result<String, PortalError> {
        let mut request = self
            .client
            .get(&self.config.login_url)
            .header(reqwest::header::ACCEPT, ACCEPT_HTML);
        if let Some(cookie_header) = self.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie_header);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::LoginPageStatus { status });
        }

        self.store_cookies(response.headers());
        Ok(response.text().await?)
    }

    fn submit_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(ACCEPT_HTML),
        );
        if let Ok(origin) = HeaderValue::from_str(&self.config.base_url) {
            headers.insert(reqwest::header::ORIGIN, origin);
        }
        if let Ok(referer) = HeaderValue::from_str(&self.config.login_url) {
            headers.insert(reqwest::header::REFERER, referer);
        }
        if let Some(cookie_header) = self.cookie_header()
            && let Ok(value) = HeaderValue::from_str(&cookie_header)
        {
            headers.insert(reqwest::header::COOKIE, value);
        }
        headers
    }

    /// Capture `Set-Cookie` headers into the jar.
    fn store_cookies(&self, headers: &HeaderMap) {
        let mut cookies = self.cookies.lock();
        for value in headers.get_all(reqwest::header::SET_COOKIE) {
            if let Ok(cookie_str) = value.to_str()
                && let Some(pair) = cookie_str.split(';').next()
                && let Some((name, value)) = pair.split_once('=')
            {
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() || value.is_empty() {
                    continue;
                }
                debug!(cookie = name, "storing portal cookie");
                cookies.insert(name.to_owned(), value.to_owned());
            }
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.lock();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    #[cfg(test)]
    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }
}
