//! Session-keeping engine.
//!
//! Owns the connectivity/session state machine: an orchestrator actor that
//! serializes probe and login cycles, a durable session/state store, the
//! credential vault (encryption at rest), and the fixed backoff schedule.
//! The portal wire protocol itself lives in `portal-client`; the UI surface
//! (CLI, prompts) only reads snapshots produced here and sends commands.

pub mod backoff;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod vault;

pub use backoff::BackoffSchedule;
pub use config::KeeperConfig;
pub use error::KeeperError;
pub use notify::{LogNotifier, Notification, Notify};
pub use orchestrator::{ConnectivityProbe, KeeperHandle, Orchestrator, PortalLogin};
pub use state::{PersistedState, SessionState, SessionStatus};
pub use store::StateStore;
pub use vault::{CredentialVault, Credentials};
