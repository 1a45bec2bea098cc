//! Captive-portal protocol client.
//!
//! This crate speaks the wire protocol of a FortiGate-style campus login
//! gateway: probing whether traffic is intercepted, scraping the one-time
//! `magic` token out of the portal's login page, and submitting the login
//! form. The portal returns free-text HTML rather than anything structured,
//! so success/failure classification is heuristic and kept in pure functions
//! that can be tested against fixture strings.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod form;
pub mod probe;

pub use classify::{LoginClassification, classify_login_response, page_has_login_form};
pub use client::{LoginOutcome, PortalClient, build_client};
pub use config::PortalConfig;
pub use error::PortalError;
pub use form::{LoginForm, extract_login_form};
pub use probe::{ProbeOutcome, Prober};
