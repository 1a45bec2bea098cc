//! Human-readable rendering of the persisted session state.

use chrono::{DateTime, Utc};
use keeper_engine::{PersistedState, SessionStatus};

pub fn print_state(state: &PersistedState) {
    let session = &state.session;
    println!("Status:       {}", status_label(session.status));
    println!(
        "Connected:    {}",
        if session.is_connected { "yes" } else { "no" }
    );
    println!("Last login:   {}", format_past(session.last_login_at));
    println!("Next renewal: {}", format_future(session.next_renew_at));
    println!(
        "Last error:   {}",
        session.last_error.as_deref().unwrap_or("-")
    );
    println!("Retries:      {}", session.retry_count);
    println!("Paused:       {}", if state.paused { "yes" } else { "no" });
    println!(
        "Credentials:  {}",
        if state.encrypted_credentials.is_some() {
            "stored"
        } else {
            "not configured"
        }
    );
}

pub fn status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Checking => "checking",
        SessionStatus::Connected => "connected",
        SessionStatus::NeedsLogin => "needs login",
        SessionStatus::Error => "error",
        SessionStatus::NetworkDown => "network down",
    }
}

fn format_past(timestamp: Option<DateTime<Utc>>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };
    let elapsed = Utc::now() - timestamp;
    let rendered = timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    if elapsed < chrono::Duration::minutes(1) {
        format!("{rendered} (just now)")
    } else if elapsed < chrono::Duration::hours(1) {
        format!("{rendered} ({}m ago)", elapsed.num_minutes())
    } else {
        format!("{rendered} ({}h ago)", elapsed.num_hours())
    }
}

fn format_future(timestamp: Option<DateTime<Utc>>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };
    let remaining = timestamp - Utc::now();
    let rendered = timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    if remaining <= chrono::Duration::zero() {
        format!("{rendered} (due now)")
    } else if remaining < chrono::Duration::minutes(1) {
        format!("{rendered} (in less than 1m)")
    } else if remaining < chrono::Duration::hours(1) {
        format!("{rendered} (in {}m)", remaining.num_minutes())
    } else {
        format!(
            "{rendered} (in {}h {}m)",
            remaining.num_hours(),
            remaining.num_minutes() % 60
        )
    }
}
